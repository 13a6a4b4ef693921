//! Locale projection: lift one translation of each node's content rows onto
//! the node itself.

use serde_json::Value;
use std::collections::BTreeSet;

use crate::schema::content::{ContentNode, LocaleContentRow};

/// Row fields that belong to the row itself rather than the translation.
const ROW_KEYS: [&str; 2] = ["id", "lang"];

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn pick<'r>(row: Option<&'r LocaleContentRow>, key: &str) -> Option<&'r Value> {
    row.and_then(|r| r.fields.get(key)).filter(|v| is_present(v))
}

/// Flatten `node`'s content rows into its fields and drop the rows.
///
/// Each field found in any row takes the `locale` row's value when present
/// and non-empty, else the `default_locale` row's, else `""`.
pub fn bubble_up(node: &mut ContentNode, locale: &str, default_locale: &str) {
    if node.content.is_empty() {
        return;
    }
    let rows = std::mem::take(&mut node.content);
    let active = rows.iter().find(|r| r.lang == locale);
    let fallback = rows.iter().find(|r| r.lang == default_locale);

    let keys: BTreeSet<&String> = rows
        .iter()
        .flat_map(|r| r.fields.keys())
        .filter(|k| !ROW_KEYS.contains(&k.as_str()))
        .collect();

    for key in keys {
        let value = pick(active, key)
            .or_else(|| pick(fallback, key))
            .cloned()
            .unwrap_or_else(|| Value::String(String::new()));
        node.fields.insert(key.clone(), value);
    }
}

/// Project the whole tree onto `locale`, following each kind's child
/// collections.
pub fn extract_locale_content(node: &mut ContentNode, locale: &str, default_locale: &str) {
    if node.kind.is_localized() {
        bubble_up(node, locale, default_locale);
    }
    for children in node.children.values_mut() {
        for child in children.iter_mut() {
            extract_locale_content(child, locale, default_locale);
        }
    }
}
