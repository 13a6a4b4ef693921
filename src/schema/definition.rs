//! Generator, materializer and formatter definitions as handed over by storage.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

/// Newtype wrapper for generator/materializer/formatter row ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefinitionId(pub i64);

impl fmt::Display for DefinitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A profile-scoped pairing of an API template with logic over its response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generator {
    pub id: DefinitionId,
    #[serde(default)]
    pub name: String,
    /// URL template; `<key>` placeholders are swapped before fetching.
    pub api: String,
    /// Script body, evaluated with the fetched response bound to `resp`.
    pub logic: String,
    #[serde(default)]
    pub ordering: i64,
}

/// A profile-scoped refinement step over the accumulated variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Materializer {
    pub id: DefinitionId,
    #[serde(default)]
    pub name: String,
    /// Script body, evaluated with the running variables bound to `variables`.
    pub logic: String,
    pub ordering: i64,
}

/// A global display helper `(n) -> value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formatter {
    pub id: DefinitionId,
    pub name: String,
    pub logic: String,
}

/// Everything a single resolution request needs from storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefinitionSet {
    #[serde(default)]
    pub generators: Vec<Generator>,
    #[serde(default)]
    pub materializers: Vec<Materializer>,
    #[serde(default)]
    pub formatters: Vec<Formatter>,
}

impl DefinitionSet {
    /// Load a definition set from a RON file.
    pub fn load_from_ron(path: &Path) -> Result<DefinitionSet, DefinitionError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    /// Parse a definition set from a RON string.
    pub fn parse_ron(input: &str) -> Result<DefinitionSet, DefinitionError> {
        Ok(ron::from_str(input)?)
    }

    /// Append another set's definitions. Formatters added later win on
    /// name collisions when compiled.
    pub fn merge(&mut self, other: DefinitionSet) {
        self.generators.extend(other.generators);
        self.materializers.extend(other.materializers);
        self.formatters.extend(other.formatters);
    }

    /// Restrict the set to a single generator and/or materializer, as
    /// developer tooling does when previewing one definition.
    pub fn only(&self, generator: Option<DefinitionId>, materializer: Option<DefinitionId>) -> DefinitionSet {
        let generators = match generator {
            Some(id) => self.generators.iter().filter(|g| g.id == id).cloned().collect(),
            None => self.generators.clone(),
        };
        let materializers = match materializer {
            Some(id) => self.materializers.iter().filter(|m| m.id == id).cloned().collect(),
            None => self.materializers.clone(),
        };
        DefinitionSet {
            generators,
            materializers,
            formatters: self.formatters.clone(),
        }
    }
}
