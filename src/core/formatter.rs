//! Formatter compilation: user-authored `(n) -> value` helpers.
//!
//! Every formatter body becomes a script function `fn name(n)` in one shared
//! AST, so formatters can call each other and generator logic can call them
//! all. A formatter that fails to compile is replaced by a stand-in that
//! returns the configured fallback marker.

use rhai::{Dynamic, Engine, Scope, AST};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error};

use crate::core::config::EngineConfig;
use crate::core::helpers::{build_engine, is_function_name, string_literal};
use crate::schema::definition::Formatter;

/// Normalize a declared formatter name to the identifier used in logic and
/// placeholders: all-caps names are lower-cased, anything else has only its
/// first character lower-cased.
pub fn normalize_name(name: &str) -> String {
    if name == name.to_uppercase() {
        return name.to_lowercase();
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// The compiled formatters of one request, with the engine that runs them.
pub struct FormatterSet {
    engine: Engine,
    ast: AST,
    compiled: BTreeSet<String>,
    fallbacks: BTreeSet<String>,
    locale: String,
    fallback_marker: String,
}

impl FormatterSet {
    /// An empty set, for passes that need no formatters.
    pub fn empty(locale: &str, config: &EngineConfig) -> FormatterSet {
        FormatterSet {
            engine: build_engine(config),
            ast: AST::empty(),
            compiled: BTreeSet::new(),
            fallbacks: BTreeSet::new(),
            locale: locale.to_string(),
            fallback_marker: config.fallback_marker.clone(),
        }
    }

    /// Compile every definition. Later definitions win on name collisions.
    pub fn compile(definitions: &[Formatter], locale: &str, config: &EngineConfig) -> FormatterSet {
        let mut set = FormatterSet::empty(locale, config);
        let mut sources: BTreeMap<String, String> = BTreeMap::new();

        for def in definitions {
            let name = normalize_name(&def.name);
            if !is_function_name(&name) {
                error!(formatter = %def.name, "Malformed formatter: name is not a usable function name");
                sources.remove(&name);
                set.mark_fallback(&name);
                continue;
            }

            let source = set.function_source(&name, &def.logic);
            match set.engine.compile(&source) {
                Ok(_) => {
                    set.fallbacks.remove(&name);
                    set.compiled.insert(name.clone());
                    sources.insert(name, source);
                }
                Err(e) => {
                    error!(formatter = %name, error = %e, "Malformed formatter encountered");
                    // The stand-in joins the shared AST only if it compiles alone.
                    let stand_in = set.fallback_source(&name);
                    if set.engine.compile(&stand_in).is_ok() {
                        sources.insert(name.clone(), stand_in);
                    } else {
                        sources.remove(&name);
                    }
                    set.mark_fallback(&name);
                }
            }
        }

        let combined = sources.into_values().collect::<Vec<_>>().join("\n");
        match set.engine.compile(&combined) {
            Ok(ast) => set.ast = ast,
            Err(e) => {
                error!(error = %e, "Formatter set failed to compile as a whole; all formatters fall back");
                let names: Vec<String> = set.compiled.iter().cloned().collect();
                for name in names {
                    set.mark_fallback(&name);
                }
            }
        }
        debug!(
            compiled = set.compiled.len(),
            fallbacks = set.fallbacks.len(),
            "Formatters compiled"
        );
        set
    }

    fn function_source(&self, name: &str, body: &str) -> String {
        format!(
            "fn {}(n) {{\nlet locale = {};\n{}\n}}",
            name,
            string_literal(&self.locale),
            body
        )
    }

    fn fallback_source(&self, name: &str) -> String {
        format!("fn {}(n) {{ {} }}", name, string_literal(&self.fallback_marker))
    }

    fn mark_fallback(&mut self, name: &str) {
        self.compiled.remove(name);
        self.fallbacks.insert(name.to_string());
    }

    /// Whether `name` resolves to a formatter, working or stand-in.
    pub fn contains(&self, name: &str) -> bool {
        self.compiled.contains(name) || self.fallbacks.contains(name)
    }

    pub fn is_fallback(&self, name: &str) -> bool {
        self.fallbacks.contains(name)
    }

    /// Names of formatters that compiled cleanly.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.compiled.iter().map(String::as_str)
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn fallback_marker(&self) -> &str {
        &self.fallback_marker
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.engine
    }

    pub(crate) fn ast(&self) -> &AST {
        &self.ast
    }

    /// Apply formatter `name` to `value`. A formatter that raises is logged
    /// and yields the fallback marker; an unknown name is the identity.
    pub fn apply(&self, name: &str, value: &Value) -> Value {
        if self.fallbacks.contains(name) {
            return Value::String(self.fallback_marker.clone());
        }
        if !self.compiled.contains(name) {
            debug!(formatter = %name, "Unknown formatter; value passed through");
            return value.clone();
        }

        let result = rhai::serde::to_dynamic(value).and_then(|arg| {
            let mut scope = Scope::new();
            self.engine
                .call_fn::<Dynamic>(&mut scope, &self.ast, name, (arg,))
        });
        match result.and_then(|out| rhai::serde::from_dynamic::<Value>(&out)) {
            Ok(out) => out,
            Err(e) => {
                error!(formatter = %name, error = %e, "Formatter raised during evaluation");
                Value::String(self.fallback_marker.clone())
            }
        }
    }
}
