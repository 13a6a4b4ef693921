//! Dimensions (slug/id pairs) and the lookups that depend on them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

/// A user-reachable "not found" condition. The message is the payload
/// returned to the caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LookupError {
    #[error("Profile not found for slugs: {0}")]
    ProfileForSlugs(String),
    #[error("Profile not found for section: {0}")]
    ProfileForSection(String),
    #[error("Section not found: {0}")]
    Section(String),
}

/// One `(slug, id)` pair from the page URL, e.g. `geo` / `04000US25`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub slug: String,
    pub id: String,
}

/// Collect `slug1`/`id1`, `slug2`/`id2`, ... query pairs into dimensions.
/// Stops at the first index where either half is missing.
pub fn collate(query: &HashMap<String, String>) -> Vec<Dimension> {
    let mut dims = Vec::new();
    for i in 1.. {
        let slug = query.get(&format!("slug{}", i));
        let id = query.get(&format!("id{}", i));
        match (slug, id) {
            (Some(slug), Some(id)) => dims.push(Dimension {
                slug: slug.clone(),
                id: id.clone(),
            }),
            _ => break,
        }
    }
    dims
}

/// String lookup table for `<key>` placeholders in generator URLs,
/// derived from the search rows matched for each dimension.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeContext {
    attrs: HashMap<String, String>,
}

impl AttributeContext {
    /// The first row is exposed unsuffixed; every row is also exposed with
    /// a 1-based suffix (`id1`, `name2`, ...).
    pub fn from_rows(rows: &[Map<String, Value>]) -> Self {
        let mut attrs = HashMap::new();
        for (i, row) in rows.iter().enumerate() {
            for (key, value) in row {
                let Some(text) = scalar_text(value) else {
                    continue;
                };
                if i == 0 {
                    attrs.insert(key.clone(), text.clone());
                }
                attrs.insert(format!("{}{}", key, i + 1), text);
            }
        }
        AttributeContext { attrs }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attrs.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.attrs.iter()
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A profile's dimension declaration row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileMeta {
    pub profile_id: i64,
    pub slug: String,
    #[serde(default)]
    pub ordering: i64,
    #[serde(default)]
    pub levels: Vec<String>,
}

/// Reverse-lookup the profile whose ordered meta slugs equal the
/// requested dimension slugs.
pub fn resolve_profile_by_slugs(meta: &[ProfileMeta], dims: &[Dimension]) -> Result<i64, LookupError> {
    let wanted = dims
        .iter()
        .map(|d| d.slug.as_str())
        .collect::<Vec<_>>()
        .join(",");

    let mut grouped: HashMap<i64, Vec<&ProfileMeta>> = HashMap::new();
    for row in meta {
        grouped.entry(row.profile_id).or_default().push(row);
    }

    let mut candidates: Vec<i64> = grouped
        .iter_mut()
        .filter_map(|(pid, rows)| {
            rows.sort_by_key(|r| r.ordering);
            let slugs = rows
                .iter()
                .map(|r| r.slug.as_str())
                .collect::<Vec<_>>()
                .join(",");
            (slugs == wanted).then_some(*pid)
        })
        .collect();
    candidates.sort_unstable();

    candidates
        .into_iter()
        .next()
        .ok_or(LookupError::ProfileForSlugs(wanted))
}

/// A section row reduced to what the profile lookup needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionRef {
    pub id: i64,
    #[serde(default)]
    pub slug: Option<String>,
    pub profile_id: i64,
}

/// Find the owning profile of a section given by numeric id or slug.
pub fn resolve_profile_by_section(sections: &[SectionRef], key: &str) -> Result<i64, LookupError> {
    let found = match key.trim().parse::<i64>() {
        Ok(id) => sections.iter().find(|s| s.id == id),
        Err(_) => sections.iter().find(|s| s.slug.as_deref() == Some(key)),
    };
    found
        .map(|s| s.profile_id)
        .ok_or_else(|| LookupError::ProfileForSection(key.to_string()))
}
