/// Logic Linter: compiles every definition and reports authoring problems.
///
/// Usage: logic_linter <definitions.ron | dir> [--locale <l>]

use mortar_engine::core::config::EngineConfig;
use mortar_engine::core::formatter::{normalize_name, FormatterSet};
use mortar_engine::core::helpers::HELPER_NAMES;
use mortar_engine::core::logic::LogicEvaluator;
use mortar_engine::schema::definition::DefinitionSet;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        println!("Usage: logic_linter <definitions.ron | dir> [--locale <l>]");
        process::exit(0);
    }

    let defs_path = &args[1];
    let mut locale = None;

    let mut i = 2;
    while i < args.len() {
        if args[i] == "--locale" && i + 1 < args.len() {
            i += 1;
            locale = Some(args[i].clone());
        }
        i += 1;
    }

    let mut defs = DefinitionSet::default();
    let path = Path::new(defs_path);
    if path.is_file() {
        match DefinitionSet::load_from_ron(path) {
            Ok(set) => defs.merge(set),
            Err(e) => {
                eprintln!("ERROR: Failed to load definitions: {}", e);
                process::exit(1);
            }
        }
    } else if path.is_dir() {
        load_definitions_recursive(path, &mut defs);
    } else {
        eprintln!("ERROR: Path '{}' does not exist", defs_path);
        process::exit(1);
    }

    println!(
        "Loaded {} generators, {} materializers, {} formatters",
        defs.generators.len(),
        defs.materializers.len(),
        defs.formatters.len()
    );

    let config = EngineConfig::default().with_env();
    let locale = locale.unwrap_or_else(|| config.default_locale.clone());
    let (errors, warnings) = lint_definitions(&defs, &locale, &config);

    println!("\n=== Logic Lint Report ===\n");

    if errors.is_empty() && warnings.is_empty() {
        println!("All checks passed!");
    }

    for warning in &warnings {
        println!("WARNING: {}", warning);
    }

    for error in &errors {
        println!("ERROR: {}", error);
    }

    println!(
        "\nSummary: {} errors, {} warnings",
        errors.len(),
        warnings.len()
    );

    if errors.is_empty() {
        process::exit(0);
    } else {
        process::exit(1);
    }
}

fn load_definitions_recursive(dir: &Path, defs: &mut DefinitionSet) {
    if let Ok(entries) = std::fs::read_dir(dir) {
        let mut paths: Vec<_> = entries.flatten().map(|e| e.path()).collect();
        paths.sort();
        for path in paths {
            if path.is_dir() {
                load_definitions_recursive(&path, defs);
            } else if path.extension().and_then(|s| s.to_str()) == Some("ron") {
                match DefinitionSet::load_from_ron(&path) {
                    Ok(set) => {
                        println!("  Loaded: {}", path.display());
                        defs.merge(set);
                    }
                    Err(e) => {
                        eprintln!("  ERROR loading {}: {}", path.display(), e);
                    }
                }
            }
        }
    }
}

fn lint_definitions(defs: &DefinitionSet, locale: &str, config: &EngineConfig) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    // Formatters
    let formatters = FormatterSet::compile(&defs.formatters, locale, config);
    let mut declared: HashMap<String, Vec<&str>> = HashMap::new();
    for formatter in &defs.formatters {
        let name = normalize_name(&formatter.name);
        declared.entry(name.clone()).or_default().push(&formatter.name);

        if formatters.is_fallback(&name) {
            errors.push(format!(
                "Formatter {} '{}' does not compile; it will render '{}'",
                formatter.id,
                formatter.name,
                formatters.fallback_marker()
            ));
        }
        if HELPER_NAMES.contains(&name.as_str()) {
            warnings.push(format!(
                "Formatter {} '{}' shadows the built-in helper '{}'",
                formatter.id, formatter.name, name
            ));
        }
    }
    let mut collisions: Vec<_> = declared.iter().filter(|(_, names)| names.len() > 1).collect();
    collisions.sort();
    for (name, names) in collisions {
        warnings.push(format!(
            "Formatters {:?} all normalize to '{}'; the last one wins",
            names, name
        ));
    }

    // Generators
    let evaluator = LogicEvaluator::new(&formatters);
    for generator in &defs.generators {
        if generator.api.trim().is_empty() {
            errors.push(format!("Generator {} '{}' has no API", generator.id, generator.name));
        }
        if let Err(e) = evaluator.check(&generator.logic) {
            errors.push(format!("Generator {} '{}': {}", generator.id, generator.name, e));
        }
    }

    // Materializers
    let mut orderings: BTreeMap<i64, Vec<String>> = BTreeMap::new();
    for materializer in &defs.materializers {
        orderings
            .entry(materializer.ordering)
            .or_default()
            .push(materializer.id.to_string());
        if let Err(e) = evaluator.check(&materializer.logic) {
            errors.push(format!(
                "Materializer {} '{}': {}",
                materializer.id, materializer.name, e
            ));
        }
    }
    for (ordering, ids) in &orderings {
        if ids.len() > 1 {
            errors.push(format!(
                "Materializers {} share ordering {}; orderings must be unique",
                ids.join(", "),
                ordering
            ));
        }
    }

    (errors, warnings)
}
