//! Placeholder substitution over content trees.
//!
//! Text fields may contain `{{variable}}` tokens, optionally piped through
//! formatters (`{{pop|abbreviate|dollar}}`) or carrying a legacy formatter
//! prefix (`dollar{{pop}}`), and `[[selector]]` tokens that expand to the
//! active option of a selector before variables are resolved.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use crate::core::formatter::{normalize_name, FormatterSet};
use crate::core::helpers::is_identifier;
use crate::core::transpile::LogicTranspiler;
use crate::schema::content::{ContentNode, LocaleContentRow, NodeKind};
use crate::schema::variables::VariableMap;

/// Selector name to active option, as seen from one point in the tree.
pub type Selections = BTreeMap<String, String>;

/// One `{{...}}` token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub prefix: Option<String>,
    pub variable: String,
    pub pipes: Vec<String>,
}

impl Placeholder {
    fn parse_inner(inner: &str) -> Option<(String, Vec<String>)> {
        let mut parts = inner.split('|').map(str::trim);
        let variable = parts.next()?;
        if !is_variable_name(variable) {
            return None;
        }
        let pipes = parts
            .map(|p| is_identifier(p).then(|| p.to_string()))
            .collect::<Option<Vec<_>>>()?;
        Some((variable.to_string(), pipes))
    }
}

fn is_variable_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '{' | '}' | '|'))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Placeholder(Placeholder),
}

/// A text field split into literal runs and placeholders. Malformed tokens
/// stay literal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextTemplate {
    segments: Vec<Segment>,
}

impl TextTemplate {
    pub fn parse(text: &str) -> TextTemplate {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = text;

        while let Some(open) = rest.find("{{") {
            let after = &rest[open + 2..];
            let Some(close) = after.find("}}") else {
                break;
            };
            match Placeholder::parse_inner(&after[..close]) {
                Some((variable, pipes)) => {
                    let before = &rest[..open];
                    let prefix_len = before
                        .bytes()
                        .rev()
                        .take_while(u8::is_ascii_alphanumeric)
                        .count();
                    let split = before.len() - prefix_len;
                    literal.push_str(&before[..split]);
                    if !literal.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut literal)));
                    }
                    let prefix = &before[split..];
                    segments.push(Segment::Placeholder(Placeholder {
                        prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
                        variable,
                        pipes,
                    }));
                    rest = &after[close + 2..];
                }
                None => {
                    literal.push_str(&rest[..open + 2]);
                    rest = after;
                }
            }
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Text(literal));
        }
        TextTemplate { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn has_placeholders(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Placeholder(_)))
    }
}

/// Replace `[[name]]` with the active option of selector `name`. Unknown
/// selectors are left as written.
pub fn swap_selectors(text: &str, selections: &Selections) -> String {
    if selections.is_empty() || !text.contains("[[") {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find("[[") {
        let after = &rest[open + 2..];
        let Some(close) = after.find("]]") else {
            break;
        };
        out.push_str(&rest[..open]);
        match selections.get(after[..close].trim()) {
            Some(option) => out.push_str(option),
            None => out.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    out
}

/// Text form of a resolved value.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Fills placeholders across a content tree for one request.
pub struct Substitutor<'a> {
    formatters: &'a FormatterSet,
    variables: &'a VariableMap,
    missing_marker: &'a str,
    query: Option<&'a HashMap<String, String>>,
    transpiler: Option<&'a dyn LogicTranspiler>,
}

impl<'a> Substitutor<'a> {
    pub fn new(formatters: &'a FormatterSet, variables: &'a VariableMap, missing_marker: &'a str) -> Self {
        Substitutor {
            formatters,
            variables,
            missing_marker,
            query: None,
            transpiler: None,
        }
    }

    /// Query parameters that steer selector choices.
    pub fn with_query(mut self, query: &'a HashMap<String, String>) -> Self {
        self.query = Some(query);
        self
    }

    /// Hook applied to every field named `logic` after substitution.
    pub fn with_transpiler(mut self, transpiler: &'a dyn LogicTranspiler) -> Self {
        self.transpiler = Some(transpiler);
        self
    }

    pub fn substitute_text(&self, text: &str, selections: &Selections) -> String {
        let swapped = swap_selectors(text, selections);
        let template = TextTemplate::parse(&swapped);
        if !template.has_placeholders() {
            return swapped;
        }

        let mut out = String::with_capacity(swapped.len());
        for segment in template.segments() {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Placeholder(p) => self.render_placeholder(p, &mut out),
            }
        }
        out
    }

    fn render_placeholder(&self, p: &Placeholder, out: &mut String) {
        // Content may spell formatters as declared or as normalized.
        let formatting_prefix = p
            .prefix
            .as_deref()
            .map(normalize_name)
            .filter(|name| self.formatters.contains(name));
        if formatting_prefix.is_none() {
            if let Some(prefix) = &p.prefix {
                out.push_str(prefix);
            }
        }

        let Some(value) = self.variables.get(&p.variable) else {
            out.push_str(self.missing_marker);
            return;
        };
        let mut value = value.clone();
        for pipe in &p.pipes {
            value = self.formatters.apply(&normalize_name(pipe), &value);
        }
        if let Some(name) = &formatting_prefix {
            value = self.formatters.apply(name, &value);
        }
        out.push_str(&render_value(&value));
    }

    /// Substitute every string inside `value`. `key` is the field the value
    /// sits under; `logic` fields also go through the transpile hook.
    pub fn substitute_value(&self, key: Option<&str>, value: &Value, selections: &Selections) -> Value {
        match value {
            Value::String(text) => {
                let text = self.substitute_text(text, selections);
                match (key, self.transpiler) {
                    (Some("logic"), Some(transpiler)) => match transpiler.transpile(&text) {
                        Ok(code) => Value::String(code),
                        Err(e) => {
                            warn!(error = %e, "Logic transpile failed; keeping source");
                            Value::String(text)
                        }
                    },
                    _ => Value::String(text),
                }
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.substitute_value(key, item, selections))
                    .collect(),
            ),
            Value::Object(obj) => Value::Object(self.substitute_map(obj, selections)),
            other => other.clone(),
        }
    }

    fn substitute_map(&self, obj: &Map<String, Value>, selections: &Selections) -> Map<String, Value> {
        obj.iter()
            .map(|(k, v)| (k.clone(), self.substitute_value(Some(k), v, selections)))
            .collect()
    }

    /// Substitute a whole tree.
    pub fn substitute_node(&self, node: &ContentNode) -> ContentNode {
        self.substitute_within(node, &Selections::new())
    }

    fn substitute_within(&self, node: &ContentNode, inherited: &Selections) -> ContentNode {
        let selections = if node.kind.collection("selectors").is_some() {
            self.selections_for(node.children("selectors"), inherited)
        } else {
            inherited.clone()
        };

        let mut fields = node.fields.clone();
        if node.kind == NodeKind::Selector {
            if let Some(chosen) = self.query_choice(node) {
                fields.insert("default".to_string(), Value::String(chosen));
            }
        }
        let fields = self.substitute_map(&fields, &selections);

        let content = node
            .content
            .iter()
            .map(|row| LocaleContentRow {
                lang: row.lang.clone(),
                fields: self.substitute_map(&row.fields, &selections),
            })
            .collect();

        let children = node
            .children
            .iter()
            .map(|(name, nodes)| {
                let nodes = nodes
                    .iter()
                    .map(|child| self.substitute_within(child, &selections))
                    .collect();
                (*name, nodes)
            })
            .collect();

        ContentNode {
            kind: node.kind,
            fields,
            content,
            children,
        }
    }

    /// Layer `selectors` over the selections inherited from above.
    pub fn selections_for(&self, selectors: &[ContentNode], inherited: &Selections) -> Selections {
        let mut selections = inherited.clone();
        for selector in selectors {
            let Some(name) = selector.str_field("name") else {
                continue;
            };
            let active = self
                .query_choice(selector)
                .or_else(|| selector.field("default").map(render_value));
            if let Some(active) = active {
                selections.insert(name.to_string(), active);
            }
        }
        selections
    }

    /// The query's value for this selector, if it is one of its options.
    fn query_choice(&self, selector: &ContentNode) -> Option<String> {
        let name = selector.str_field("name")?;
        let wanted = self.query?.get(name)?;
        let valid = selector
            .field("options")
            .and_then(Value::as_array)
            .map_or(false, |options| {
                options
                    .iter()
                    .any(|o| o.get("option").and_then(Value::as_str) == Some(wanted.as_str()))
            });
        valid.then(|| wanted.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EngineConfig;
    use crate::core::transpile::DeclarationDownlevel;
    use crate::schema::definition::{DefinitionId, Formatter};
    use serde_json::json;

    fn formatters() -> FormatterSet {
        let defs = vec![
            Formatter {
                id: DefinitionId(1),
                name: "Double".to_string(),
                logic: "n * 2".to_string(),
            },
            Formatter {
                id: DefinitionId(2),
                name: "Dollar".to_string(),
                logic: r#""$" + commas(n)"#.to_string(),
            },
            Formatter {
                id: DefinitionId(3),
                name: "Broken".to_string(),
                logic: "n +".to_string(),
            },
        ];
        FormatterSet::compile(&defs, "en", &EngineConfig::default())
    }

    fn variables() -> VariableMap {
        let mut vars = VariableMap::new();
        vars.insert("x", json!(5));
        vars.insert("pop", json!(1500));
        vars.insert("name", json!("Massachusetts"));
        vars.insert("ratio", json!(2.5));
        vars.insert("whole", json!(3.0));
        vars.insert("flag", json!(true));
        vars.insert("nothing", Value::Null);
        vars.insert("list", json!([1, "a"]));
        vars
    }

    fn text(sub: &Substitutor, input: &str) -> String {
        sub.substitute_text(input, &Selections::new())
    }

    #[test]
    fn parses_tokens() {
        let template = TextTemplate::parse("A dollar{{ pop | double }} z");
        assert_eq!(
            template.segments(),
            &[
                Segment::Text("A ".to_string()),
                Segment::Placeholder(Placeholder {
                    prefix: Some("dollar".to_string()),
                    variable: "pop".to_string(),
                    pipes: vec!["double".to_string()],
                }),
                Segment::Text(" z".to_string()),
            ]
        );
        assert!(!TextTemplate::parse("no tokens {here}").has_placeholders());
    }

    #[test]
    fn plain_variable_and_missing_marker() {
        let f = formatters();
        let vars = variables();
        let sub = Substitutor::new(&f, &vars, "N/A");
        assert_eq!(text(&sub, "Value: {{x}}"), "Value: 5");
        assert_eq!(text(&sub, "Value: {{y}}"), "Value: N/A");
        assert_eq!(text(&sub, "{{name}} has {{pop}}"), "Massachusetts has 1500");
    }

    #[test]
    fn pipes_apply_left_to_right() {
        let f = formatters();
        let vars = variables();
        let sub = Substitutor::new(&f, &vars, "N/A");
        assert_eq!(text(&sub, "{{x|double}}"), "10");
        assert_eq!(text(&sub, "{{pop|double|dollar}}"), "$3,000");
        assert_eq!(text(&sub, "{{x|unknown}}"), "5");
        assert_eq!(text(&sub, "{{x|broken}}"), "N/A");
    }

    #[test]
    fn legacy_prefix_formats_outermost() {
        let f = formatters();
        let vars = variables();
        let sub = Substitutor::new(&f, &vars, "N/A");
        assert_eq!(text(&sub, "Cost: dollar{{pop|double}}"), "Cost: $3,000");
        // Not a formatter: the prefix is just text.
        assert_eq!(text(&sub, "Pop{{x}}"), "Pop5");
        assert_eq!(text(&sub, "dollar{{missing}}"), "N/A");
    }

    #[test]
    fn declared_formatter_names_resolve() {
        let f = formatters();
        let vars = variables();
        let sub = Substitutor::new(&f, &vars, "N/A");
        assert_eq!(text(&sub, "Dollar{{pop}}"), "$1,500");
        assert_eq!(text(&sub, "{{pop|Dollar}}"), "$1,500");
        assert_eq!(text(&sub, "{{x|Double|Dollar}}"), "$10");
    }

    #[test]
    fn malformed_tokens_stay_literal() {
        let f = formatters();
        let vars = variables();
        let sub = Substitutor::new(&f, &vars, "N/A");
        assert_eq!(text(&sub, "{{}} {{a b}} {{x|}}"), "{{}} {{a b}} {{x|}}");
        assert_eq!(text(&sub, "open {{x"), "open {{x");
        assert_eq!(text(&sub, "{{{x}}}"), "{{{x}}}");
    }

    #[test]
    fn renders_value_types() {
        let f = formatters();
        let vars = variables();
        let sub = Substitutor::new(&f, &vars, "N/A");
        assert_eq!(
            text(&sub, "{{ratio}} {{whole}} {{flag}} {{nothing}} {{list}}"),
            r#"2.5 3 true null [1,"a"]"#
        );
    }

    #[test]
    fn resolved_tree_is_unchanged() {
        let f = formatters();
        let vars = variables();
        let sub = Substitutor::new(&f, &vars, "N/A");
        let raw = json!({
            "id": 1,
            "title": "Hello {{name}}",
            "sections": [{"id": 2, "ordering": 1, "title": "{{x|double}} items"}],
        });
        let node = ContentNode::from_value(NodeKind::Profile, raw).unwrap();
        let once = sub.substitute_node(&node);
        let twice = sub.substitute_node(&once);
        assert_eq!(once, twice);
        assert_eq!(once.to_value()["sections"][0]["title"], json!("10 items"));
    }

    #[test]
    fn selectors_choose_variables() {
        let f = formatters();
        let vars = variables();
        let profile = json!({
            "id": 1,
            "title": "{{[[metric]]}}",
            "selectors": [{
                "name": "metric",
                "default": "x",
                "options": [{"option": "x"}, {"option": "pop"}],
            }],
            "sections": [{
                "id": 2,
                "title": "{{[[metric]]}} / [[unknown]]",
                "selectors": [{
                    "name": "metric",
                    "default": "name",
                    "options": [{"option": "name"}],
                }],
            }],
        });
        let node = ContentNode::from_value(NodeKind::Profile, profile).unwrap();

        let plain = Substitutor::new(&f, &vars, "N/A").substitute_node(&node).to_value();
        assert_eq!(plain["title"], json!("5"));
        assert_eq!(plain["sections"][0]["title"], json!("Massachusetts / [[unknown]]"));

        let query: HashMap<String, String> = [("metric".to_string(), "pop".to_string())].into();
        let chosen = Substitutor::new(&f, &vars, "N/A")
            .with_query(&query)
            .substitute_node(&node)
            .to_value();
        assert_eq!(chosen["title"], json!("1500"));
        assert_eq!(chosen["selectors"][0]["default"], json!("pop"));
        // `pop` is not an option of the section's selector.
        assert_eq!(chosen["sections"][0]["selectors"][0]["default"], json!("name"));
    }

    #[test]
    fn logic_fields_are_transpiled() {
        let f = formatters();
        let vars = variables();
        let transpiler = DeclarationDownlevel;
        let sub = Substitutor::new(&f, &vars, "N/A").with_transpiler(&transpiler);
        let viz = json!({"logic": "const a = {{x}};", "title": "let it be"});
        let out = sub.substitute_value(None, &viz, &Selections::new());
        assert_eq!(out["logic"], json!("var a = 5;"));
        assert_eq!(out["title"], json!("let it be"));

        let broken = json!({"logic": "let s = \"open"});
        let out = sub.substitute_value(None, &broken, &Selections::new());
        assert_eq!(out["logic"], json!("let s = \"open"));
    }
}
