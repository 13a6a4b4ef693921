//! Variable maps and the per-definition status reports built alongside them.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::definition::DefinitionId;

/// Reserved key carrying generator outcomes in the serialized map.
pub const GEN_STATUS_KEY: &str = "_genStatus";
/// Reserved key carrying materializer outcomes in the serialized map.
pub const MAT_STATUS_KEY: &str = "_matStatus";

/// Name to value bindings resolved for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableMap {
    vars: Map<String, Value>,
}

impl VariableMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    /// Fold `vars` into the map. Existing keys are overwritten.
    pub fn fold(&mut self, vars: Map<String, Value>) {
        for (name, value) in vars {
            self.vars.insert(name, value);
        }
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.vars.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.vars
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.vars.clone())
    }

    /// Build a map from a previously serialized one, dropping the
    /// diagnostic keys. Non-object input yields an empty map.
    pub fn from_value(value: Value) -> VariableMap {
        match value {
            Value::Object(mut vars) => {
                vars.remove(GEN_STATUS_KEY);
                vars.remove(MAT_STATUS_KEY);
                VariableMap { vars }
            }
            _ => VariableMap::default(),
        }
    }
}

impl From<Map<String, Value>> for VariableMap {
    fn from(vars: Map<String, Value>) -> Self {
        VariableMap::from_value(Value::Object(vars))
    }
}

/// Outcome of evaluating one generator or materializer.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Produced(Map<String, Value>),
    Failed { error: String },
}

impl RunStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, RunStatus::Failed { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            RunStatus::Failed { error } => Some(error),
            RunStatus::Produced(_) => None,
        }
    }

    /// Produced variables verbatim, or `{"error": message}`.
    pub fn to_value(&self) -> Value {
        match self {
            RunStatus::Produced(vars) => Value::Object(vars.clone()),
            RunStatus::Failed { error } => {
                let mut obj = Map::new();
                obj.insert("error".to_string(), Value::String(error.clone()));
                Value::Object(obj)
            }
        }
    }
}

/// Outcomes keyed by definition id.
pub type StatusReport = BTreeMap<DefinitionId, RunStatus>;

fn report_to_value(report: &StatusReport) -> Value {
    let obj = report
        .iter()
        .map(|(id, status)| (id.to_string(), status.to_value()))
        .collect();
    Value::Object(obj)
}

/// Final product of the generator and materializer stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedVariables {
    pub variables: VariableMap,
    pub gen_status: StatusReport,
    pub mat_status: StatusReport,
}

impl ResolvedVariables {
    /// Serialized form for developer tooling, diagnostics included.
    pub fn to_value(&self) -> Value {
        let mut obj = self.variables.as_map().clone();
        obj.insert(GEN_STATUS_KEY.to_string(), report_to_value(&self.gen_status));
        obj.insert(MAT_STATUS_KEY.to_string(), report_to_value(&self.mat_status));
        Value::Object(obj)
    }

    /// The variables alone, ready for substitution or reuse by a later request.
    pub fn into_variables(self) -> VariableMap {
        self.variables
    }
}
