/// Preview: render a profile or story offline and print the JSON.
///
/// Usage: preview --definitions <ron> (--profile <json> | --story <json>)
///                [--responses <json>] [--attributes <json>] [--locale <l>]
///                [--origin <url>] [--variables-only] [key=value ...]
///
/// `--responses` maps URLs to canned JSON bodies; without it generators
/// fetch over HTTP. `key=value` pairs form the request query
/// (`slug1=geo id1=04000US25 section=intro metric=pop`).

use mortar_engine::core::config::EngineConfig;
use mortar_engine::core::fetch::{DataSource, MemoryDataSource};
use mortar_engine::core::pipeline::{MortarEngine, PipelineError, ProfileRequest, VariablesRequest};
use mortar_engine::schema::definition::DefinitionSet;
use mortar_engine::schema::dimension::AttributeContext;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

struct Options {
    definitions: Option<String>,
    profile: Option<String>,
    story: Option<String>,
    responses: Option<String>,
    attributes: Option<String>,
    locale: Option<String>,
    origin: Option<String>,
    variables_only: bool,
    query: HashMap<String, String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage();
        return;
    }

    let options = parse_args(&args);
    if let Err(e) = run(options).await {
        eprintln!("ERROR: {}", e);
        std::process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Options {
    let mut options = Options {
        definitions: None,
        profile: None,
        story: None,
        responses: None,
        attributes: None,
        locale: None,
        origin: None,
        variables_only: false,
        query: HashMap::new(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--definitions" if i + 1 < args.len() => {
                i += 1;
                options.definitions = Some(args[i].clone());
            }
            "--profile" if i + 1 < args.len() => {
                i += 1;
                options.profile = Some(args[i].clone());
            }
            "--story" if i + 1 < args.len() => {
                i += 1;
                options.story = Some(args[i].clone());
            }
            "--responses" if i + 1 < args.len() => {
                i += 1;
                options.responses = Some(args[i].clone());
            }
            "--attributes" if i + 1 < args.len() => {
                i += 1;
                options.attributes = Some(args[i].clone());
            }
            "--locale" if i + 1 < args.len() => {
                i += 1;
                options.locale = Some(args[i].clone());
            }
            "--origin" if i + 1 < args.len() => {
                i += 1;
                options.origin = Some(args[i].clone());
            }
            "--variables-only" => options.variables_only = true,
            arg => match arg.split_once('=') {
                Some((key, value)) if !key.starts_with('-') => {
                    options.query.insert(key.to_string(), value.to_string());
                }
                _ => {
                    eprintln!("Unknown argument: {}", arg);
                    print_usage();
                    std::process::exit(1);
                }
            },
        }
        i += 1;
    }
    options
}

async fn run(options: Options) -> Result<(), PipelineError> {
    let mut config = EngineConfig::default().with_env();
    if options.origin.is_some() {
        config.origin = options.origin.clone();
    }

    let mut builder = MortarEngine::builder().with_config(config);
    if let Some(path) = &options.responses {
        builder = builder.with_source(load_responses(path)?);
    }
    let engine = builder.build()?;

    if let Some(path) = &options.story {
        let raw = read_json(path)?;
        let story = engine.render_story(raw, options.locale.as_deref())?;
        print_json(&story.to_value())?;
        return Ok(());
    }

    let defs = match &options.definitions {
        Some(path) => DefinitionSet::load_from_ron(Path::new(path))?,
        None => DefinitionSet::default(),
    };
    let attributes = match &options.attributes {
        Some(path) => {
            let rows: Vec<Map<String, Value>> = serde_json::from_value(read_json(path)?)?;
            AttributeContext::from_rows(&rows)
        }
        None => AttributeContext::default(),
    };

    let mut request = ProfileRequest::from_query(options.query);
    request.attributes = attributes;
    if options.locale.is_some() {
        request.locale = options.locale;
    }

    if options.variables_only {
        let vreq = VariablesRequest {
            profile_id: request.profile_id.unwrap_or_default(),
            locale: request.locale.clone(),
            attributes: request.attributes.clone(),
            params: request.query.clone(),
            ..VariablesRequest::default()
        };
        let resolved = engine.resolve_variables(&defs, &vreq).await;
        print_json(&resolved.to_value())?;
        return Ok(());
    }

    let Some(path) = &options.profile else {
        eprintln!("ERROR: one of --profile or --story is required");
        print_usage();
        std::process::exit(1);
    };
    let mut raw = read_json(path)?;
    // Selectors may ship inside the profile file.
    let selectors = match raw.as_object_mut().and_then(|obj| obj.remove("selectors")) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };

    let response = engine.render_profile(raw, selectors, &defs, &request).await?;
    print_json(&response.to_value())?;
    Ok(())
}

fn read_json(path: &str) -> Result<Value, PipelineError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn load_responses(path: &str) -> Result<Arc<dyn DataSource>, PipelineError> {
    let bodies: HashMap<String, Value> = serde_json::from_value(read_json(path)?)?;
    let source = bodies
        .into_iter()
        .fold(MemoryDataSource::new(), |source, (url, body)| source.with_response(url, body));
    Ok(Arc::new(source))
}

fn print_json(value: &Value) -> Result<(), PipelineError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_usage() {
    println!("Usage: preview --definitions <ron> (--profile <json> | --story <json>)");
    println!("               [--responses <json>] [--attributes <json>] [--locale <l>]");
    println!("               [--origin <url>] [--variables-only] [key=value ...]");
}
