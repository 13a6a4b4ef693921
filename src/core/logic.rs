//! Isolated evaluation of generator and materializer logic.

use rhai::{Dynamic, Scope};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::core::formatter::FormatterSet;

#[derive(Debug, Error)]
pub enum LogicError {
    #[error("compile error: {0}")]
    Compile(String),
    #[error("{0}")]
    Evaluation(String),
    #[error("logic must return an object map, got {0}")]
    NotAnObject(String),
    #[error("value conversion failed: {0}")]
    Conversion(String),
}

/// Name under which the logic sees its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputBinding {
    /// A generator's fetched API response.
    Resp,
    /// The running variable map, for materializers.
    Variables,
}

impl InputBinding {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Resp => "resp",
            Self::Variables => "variables",
        }
    }
}

/// Result of one evaluation: produced variables, or a captured error with
/// an empty variable set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalOutcome {
    pub vars: Map<String, Value>,
    pub error: Option<String>,
}

impl EvalOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs logic bodies against the request's compiled formatters.
pub struct LogicEvaluator<'a> {
    formatters: &'a FormatterSet,
}

impl<'a> LogicEvaluator<'a> {
    pub fn new(formatters: &'a FormatterSet) -> Self {
        LogicEvaluator { formatters }
    }

    /// Evaluate `logic` with `input` bound under `binding`. Never fails:
    /// errors are captured in the outcome.
    pub fn evaluate(&self, binding: InputBinding, input: &Value, logic: &str) -> EvalOutcome {
        match self.try_evaluate(binding, input, logic) {
            Ok(vars) => EvalOutcome { vars, error: None },
            Err(e) => {
                warn!(binding = binding.name(), error = %e, "Logic evaluation failed");
                EvalOutcome {
                    vars: Map::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Compile `logic` without running it.
    pub fn check(&self, logic: &str) -> Result<(), LogicError> {
        self.formatters
            .engine()
            .compile(logic)
            .map(|_| ())
            .map_err(|e| LogicError::Compile(e.to_string()))
    }

    pub fn try_evaluate(
        &self,
        binding: InputBinding,
        input: &Value,
        logic: &str,
    ) -> Result<Map<String, Value>, LogicError> {
        let engine = self.formatters.engine();
        let script = engine
            .compile(logic)
            .map_err(|e| LogicError::Compile(e.to_string()))?;
        let ast = self.formatters.ast().merge(&script);

        let input = rhai::serde::to_dynamic(input).map_err(|e| LogicError::Conversion(e.to_string()))?;
        let mut scope = Scope::new();
        scope.push_dynamic(binding.name(), input);
        scope.push_constant("locale", self.formatters.locale().to_string());

        let result = engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
            .map_err(|e| LogicError::Evaluation(e.to_string()))?;
        if !result.is_map() {
            return Err(LogicError::NotAnObject(result.type_name().to_string()));
        }
        rhai::serde::from_dynamic::<Map<String, Value>>(&result)
            .map_err(|e| LogicError::Conversion(e.to_string()))
    }
}
