//! Script sandbox construction and the native helpers visible to user logic.
//!
//! Rhai's standard packages carry no filesystem, network or process access.
//! On top of that `eval` is disabled, `print`/`debug` go to the log, and a
//! handful of number and text helpers are registered.

use rhai::{Engine, FLOAT, INT};
use tracing::debug;

use crate::core::config::EngineConfig;

/// Native helpers registered on every engine. A formatter declared under one
/// of these names shadows it.
pub const HELPER_NAMES: [&str; 4] = ["commas", "round_to", "abbreviate_number", "title_case"];

/// Words the script parser refuses as function names: keywords, reserved
/// words and the built-ins it treats as syntax.
const RESERVED_WORDS: &[&str] = &[
    "as", "async", "await", "break", "call", "case", "catch", "const", "continue", "curry",
    "debug", "default", "do", "else", "eval", "exit", "export", "false", "fn", "Fn", "for",
    "global", "go", "goto", "if", "import", "in", "is_def_fn", "is_def_var", "is_shared",
    "let", "loop", "match", "module", "new", "nil", "null", "package", "print", "private",
    "protected", "public", "return", "shared", "spawn", "static", "super", "switch", "sync",
    "this", "thread", "throw", "true", "try", "type_of", "until", "use", "var", "void",
    "while", "with", "yield",
];

/// Build the per-request script engine.
pub fn build_engine(config: &EngineConfig) -> Engine {
    let mut engine = Engine::new();
    engine.disable_symbol("eval");
    if config.max_operations > 0 {
        engine.set_max_operations(config.max_operations);
    }
    engine.on_print(|text| debug!(target: "mortar::script", "{}", text));
    engine.on_debug(|text, source, pos| {
        debug!(target: "mortar::script", source = source.unwrap_or(""), "{} @ {:?}", text, pos)
    });

    engine.register_fn("commas", |n: INT| group_digits(n));
    engine.register_fn("commas", |n: FLOAT| commas_float(n));
    engine.register_fn("round_to", |n: FLOAT, digits: INT| round_to(n, digits));
    engine.register_fn("round_to", |n: INT, _digits: INT| n);
    engine.register_fn("abbreviate_number", |n: INT| abbreviate_number(n as f64));
    engine.register_fn("abbreviate_number", |n: FLOAT| abbreviate_number(n));
    engine.register_fn("title_case", |s: &str| title_case(s));
    engine
}

/// Whether `name` can be declared as a script function.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Whether `name` can be declared as a script function: an identifier the
/// parser does not reserve.
pub fn is_function_name(name: &str) -> bool {
    is_identifier(name) && !RESERVED_WORDS.contains(&name)
}

/// Quote `text` as a script string literal.
pub fn string_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn group_digits(n: INT) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn commas_float(n: FLOAT) -> String {
    if !n.is_finite() {
        return n.to_string();
    }
    let rounded = round_to(n, 2);
    let whole = rounded.trunc();
    let mut out = group_digits(whole as INT);
    if whole == 0.0 && rounded < 0.0 {
        out.insert(0, '-');
    }
    let fraction = format!("{:.2}", rounded.abs().fract());
    let fraction = fraction.trim_start_matches('0').trim_end_matches('0');
    if fraction.len() > 1 {
        out.push_str(fraction);
    }
    out
}

fn round_to(n: FLOAT, digits: INT) -> FLOAT {
    let factor = 10f64.powi(digits.clamp(0, 15) as i32);
    (n * factor).round() / factor
}

fn abbreviate_number(n: FLOAT) -> String {
    const UNITS: [(f64, &str); 4] = [(1e12, "T"), (1e9, "B"), (1e6, "M"), (1e3, "k")];
    for (scale, suffix) in UNITS {
        if n.abs() >= scale {
            return format!("{}{}", trim_float(round_to(n / scale, 1)), suffix);
        }
    }
    trim_float(round_to(n, 2))
}

fn trim_float(n: FLOAT) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as INT)
    } else {
        n.to_string()
    }
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
