/// Pipeline integration tests: end-to-end variable resolution and rendering.

use async_trait::async_trait;
use mortar_engine::core::config::EngineConfig;
use mortar_engine::core::fetch::{DataSource, FetchError, MemoryDataSource};
use mortar_engine::core::pipeline::{MortarEngine, ProfileRequest, ProfileResponse, VariablesRequest};
use mortar_engine::core::throttle::FetchThrottle;
use mortar_engine::schema::definition::{DefinitionId, DefinitionSet, Generator, Materializer};
use mortar_engine::schema::dimension::{AttributeContext, Dimension};
use mortar_engine::schema::variables::VariableMap;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const POP_URL: &str = "/api/data?geo=04000US25&measure=population";
const INCOME_URL: &str = "/api/data?geo=04000US25&measure=income&lang=en";

fn fixture_source() -> Arc<MemoryDataSource> {
    Arc::new(
        MemoryDataSource::new()
            .with_response(
                POP_URL,
                json!({"data": [
                    {"name": "Massachusetts", "value": 6400000},
                    {"name": "Massachusetts", "value": 7200000},
                ]}),
            )
            .with_response(
                INCOME_URL,
                json!({"data": [{"value": 360000000000i64}], "label": "Median"}),
            ),
    )
}

fn build_engine(source: Arc<MemoryDataSource>) -> MortarEngine {
    MortarEngine::builder()
        .with_config(EngineConfig::default())
        .with_source(source)
        .build()
        .unwrap()
}

fn fixture_definitions() -> DefinitionSet {
    DefinitionSet::load_from_ron(Path::new("tests/fixtures/definitions.ron")).unwrap()
}

fn read_fixture(name: &str) -> Value {
    let contents = std::fs::read_to_string(format!("tests/fixtures/{}", name)).unwrap();
    serde_json::from_str(&contents).unwrap()
}

fn selectors() -> Vec<Value> {
    match read_fixture("selectors.json") {
        Value::Array(items) => items,
        _ => panic!("selectors fixture must be an array"),
    }
}

fn geo_request() -> ProfileRequest {
    let mut attributes = AttributeContext::default();
    attributes.insert("id1", "04000US25");
    ProfileRequest {
        profile_id: Some(1),
        dimensions: vec![Dimension {
            slug: "geo".to_string(),
            id: "04000US25".to_string(),
        }],
        attributes,
        ..ProfileRequest::default()
    }
}

fn generator(id: i64, api: &str, logic: &str) -> Generator {
    Generator {
        id: DefinitionId(id),
        name: String::new(),
        api: api.to_string(),
        logic: logic.to_string(),
        ordering: id,
    }
}

fn materializer(id: i64, ordering: i64, logic: &str) -> Materializer {
    Materializer {
        id: DefinitionId(id),
        name: String::new(),
        logic: logic.to_string(),
        ordering,
    }
}

#[tokio::test]
async fn shared_endpoint_scenario() {
    let source = Arc::new(MemoryDataSource::new().with_response("/a", json!({"val": 5})));
    let engine = build_engine(source.clone());
    let defs = DefinitionSet {
        generators: vec![
            generator(1, "/a", "return #{x: resp.val};"),
            generator(2, "/a", "return #{y: resp.val * 2};"),
        ],
        materializers: vec![materializer(1, 1, "return #{z: variables.x + 1};")],
        formatters: vec![],
    };

    let resolved = engine
        .resolve_variables(&defs, &VariablesRequest::default())
        .await;

    assert_eq!(source.fetch_count("/a"), 1);
    assert_eq!(resolved.variables.get("x"), Some(&json!(5)));
    assert_eq!(resolved.variables.get("y"), Some(&json!(10)));
    assert_eq!(resolved.variables.get("z"), Some(&json!(6)));
    assert_eq!(resolved.variables.len(), 3);
}

#[tokio::test]
async fn many_generators_one_fetch() {
    let source = Arc::new(MemoryDataSource::new().with_response("/shared", json!({"val": 1})));
    let engine = build_engine(source.clone());
    let generators = (1..=25)
        .map(|i| generator(i, "/shared", &format!("#{{ v{}: resp.val + {} }}", i, i)))
        .collect();
    let defs = DefinitionSet {
        generators,
        ..DefinitionSet::default()
    };

    let resolved = engine
        .resolve_variables(&defs, &VariablesRequest::default())
        .await;

    assert_eq!(source.fetched(), vec!["/shared".to_string()]);
    assert_eq!(resolved.variables.len(), 25);
    assert_eq!(resolved.variables.get("v25"), Some(&json!(26)));
}

#[tokio::test]
async fn materializers_run_by_ordering_not_position() {
    let engine = build_engine(Arc::new(MemoryDataSource::new()));
    let defs = DefinitionSet {
        materializers: vec![
            materializer(1, 2, r#"#{ order: variables.order + "1" }"#),
            materializer(2, 1, r#"#{ order: "2" }"#),
            materializer(3, 3, r#"#{ order: variables.order + "3" }"#),
        ],
        ..DefinitionSet::default()
    };

    let resolved = engine
        .resolve_variables(&defs, &VariablesRequest::default())
        .await;

    // Materializer 2 (ordering 1) runs first, then 1, then 3.
    assert_eq!(resolved.variables.get("order"), Some(&json!("213")));
}

#[tokio::test]
async fn throwing_generator_is_isolated() {
    let source = Arc::new(
        MemoryDataSource::new()
            .with_response("/a", json!({"val": 5}))
            .with_response("/b", json!({"val": 8})),
    );
    let engine = build_engine(source);
    let defs = DefinitionSet {
        generators: vec![
            generator(1, "/a", "#{ x: resp.val }"),
            generator(2, "/a", r#"throw "column renamed upstream";"#),
            generator(3, "/b", "#{ w: resp.val }"),
            generator(4, "/c", "#{ missing: resp.val.len() }"),
        ],
        ..DefinitionSet::default()
    };

    let resolved = engine
        .resolve_variables(&defs, &VariablesRequest::default())
        .await;

    assert_eq!(resolved.variables.get("x"), Some(&json!(5)));
    assert_eq!(resolved.variables.get("w"), Some(&json!(8)));
    let value = resolved.to_value();
    let error = value["_genStatus"]["2"]["error"].as_str().unwrap();
    assert!(error.contains("column renamed upstream"));
    // Failed fetch: the generator saw an empty response.
    assert!(value["_genStatus"]["4"]["error"].is_string());
    assert_eq!(value["_genStatus"]["1"], json!({"x": 5}));
}

#[tokio::test]
async fn fixture_variables_resolve() {
    let source = fixture_source();
    let engine = build_engine(source.clone());
    let mut attributes = AttributeContext::default();
    attributes.insert("id1", "04000US25");
    let req = VariablesRequest {
        profile_id: 1,
        attributes,
        ..VariablesRequest::default()
    };

    let resolved = engine.resolve_variables(&fixture_definitions(), &req).await;

    assert_eq!(source.fetch_count(POP_URL), 1);
    assert_eq!(source.fetch_count(INCOME_URL), 1);
    let vars = &resolved.variables;
    assert_eq!(vars.get("pop"), Some(&json!(7200000)));
    assert_eq!(vars.get("growth"), Some(&json!(12.5)));
    assert_eq!(vars.get("incomePerPerson"), Some(&json!(50000)));
    assert_eq!(
        vars.get("headline"),
        Some(&json!("Massachusetts has 7,200,000 residents"))
    );
    assert!(resolved.gen_status.values().all(|s| !s.is_error()));
    assert!(resolved.mat_status.values().all(|s| !s.is_error()));
}

#[tokio::test]
async fn renders_fixture_profile() {
    let engine = build_engine(fixture_source());

    let response = engine
        .render_profile(
            read_fixture("profile.json"),
            selectors(),
            &fixture_definitions(),
            &geo_request(),
        )
        .await
        .unwrap();
    let page = response.to_value();

    assert_eq!(page["title"], json!("Massachusetts"));
    assert_eq!(page["subtitle"], json!("Population $7,200,000"));
    assert_eq!(page["ids"], json!("04000US25"));
    assert!(page.get("content").is_none());
    assert!(page["variables"].get("_genStatus").is_none());

    let intro = &page["sections"][0];
    assert_eq!(intro["slug"], json!("intro"));
    assert_eq!(intro["title"], json!("Massachusetts has 7,200,000 residents"));
    assert_eq!(intro["subtitle"], json!("Showing 7.2M"));
    assert_eq!(intro["subtitles"][0]["subtitle"], json!("Missing: N/A"));

    let economy = &page["sections"][1];
    assert_eq!(economy["title"], json!("Economy of Massachusetts"));
    assert_eq!(
        economy["descriptions"][0]["description"],
        json!("Income per person is $50,000.")
    );
    assert_eq!(economy["stats"][0]["value"], json!("12.5%"));
    assert_eq!(economy["stats"][1]["title"], json!("Median income"));
    assert_eq!(economy["stats"][1]["value"], json!("360B"));
    assert_eq!(
        economy["visualizations"][0]["logic"],
        json!("var v = 7200000;\nreturn {data: v};")
    );
}

#[tokio::test]
async fn query_selector_steers_variables() {
    let engine = build_engine(fixture_source());
    let mut req = geo_request();
    req.query.insert("metric".to_string(), "income".to_string());

    let page = engine
        .render_profile(
            read_fixture("profile.json"),
            selectors(),
            &fixture_definitions(),
            &req,
        )
        .await
        .unwrap()
        .to_value();

    assert_eq!(page["sections"][0]["subtitle"], json!("Showing 360B"));
    assert_eq!(page["selectors"][0]["default"], json!("income"));

    // Not one of the options: the default stands.
    req.query.insert("metric".to_string(), "area".to_string());
    let page = engine
        .render_profile(
            read_fixture("profile.json"),
            selectors(),
            &fixture_definitions(),
            &req,
        )
        .await
        .unwrap()
        .to_value();
    assert_eq!(page["sections"][0]["subtitle"], json!("Showing 7.2M"));
}

#[tokio::test]
async fn section_request_returns_only_that_section() {
    let engine = build_engine(fixture_source());
    let mut req = geo_request();
    req.section = Some("20".to_string());

    let page = engine
        .render_profile(
            read_fixture("profile.json"),
            selectors(),
            &fixture_definitions(),
            &req,
        )
        .await
        .unwrap()
        .to_value();
    assert_eq!(page["slug"], json!("economy"));
    assert_eq!(page["ids"], json!("04000US25"));

    req.section = Some("nowhere".to_string());
    let response = engine
        .render_profile(
            read_fixture("profile.json"),
            selectors(),
            &fixture_definitions(),
            &req,
        )
        .await
        .unwrap();
    assert_eq!(
        response,
        ProfileResponse::NotFound("Section not found: nowhere".to_string())
    );
}

#[tokio::test]
async fn unconfigured_locale_falls_back_to_default() {
    let engine = build_engine(fixture_source());
    let mut req = geo_request();
    req.locale = Some("es".to_string());

    let page = engine
        .render_profile(
            read_fixture("profile.json"),
            selectors(),
            &fixture_definitions(),
            &req,
        )
        .await
        .unwrap()
        .to_value();

    assert_eq!(page["title"], json!("Massachusetts (es)"));
    // Empty in the es row, so the en row supplies it.
    assert_eq!(page["subtitle"], json!("Population $7,200,000"));
    assert_eq!(page["sections"][1]["title"], json!("Economy of Massachusetts"));
}

#[tokio::test]
async fn reload_reuses_previous_variables() {
    let source = fixture_source();
    let engine = build_engine(source.clone());
    let first = engine
        .render_profile(
            read_fixture("profile.json"),
            selectors(),
            &fixture_definitions(),
            &geo_request(),
        )
        .await
        .unwrap();
    let fetches = source.fetched().len();

    // The page posts back what it received, diagnostics and all.
    let mut echoed = first.to_value()["variables"].clone();
    echoed["_genStatus"] = json!({"1": {"error": "stale"}});
    let mut req = geo_request();
    req.variables = Some(VariableMap::from_value(echoed));

    let second = engine
        .render_profile(
            read_fixture("profile.json"),
            selectors(),
            &fixture_definitions(),
            &req,
        )
        .await
        .unwrap();

    assert_eq!(source.fetched().len(), fetches);
    assert_eq!(first, second);
}

#[test]
fn story_render_transpiles_visualization_logic() {
    let engine = build_engine(Arc::new(MemoryDataSource::new()));

    let story = engine
        .render_story(read_fixture("story.json"), Some("fr"))
        .unwrap()
        .to_value();

    assert_eq!(story["title"], json!("La récolte"));
    assert_eq!(story["authors"][0]["name"], json!("A. Writer"));
    assert_eq!(story["storysections"][0]["title"], json!("Fields"));
    assert_eq!(
        story["storysections"][1]["visualizations"][0]["logic"],
        json!("var rows = [];\nvar label = \"let me be\";\nreturn {rows};")
    );
}

/// Counts how many fetches are in flight at once.
struct SlowSource {
    running: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl DataSource for SlowSource {
    async fn fetch(&self, url: &str) -> Result<Value, FetchError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({ "url": url }))
    }
}

#[tokio::test]
async fn throttle_is_shared_across_requests() {
    let source = Arc::new(SlowSource {
        running: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let engine = MortarEngine::builder()
        .with_source(source.clone())
        .with_throttle(FetchThrottle::new(3))
        .build()
        .unwrap();
    let defs = DefinitionSet {
        generators: (1..=8)
            .map(|i| generator(i, &format!("/slow/{}", i), "#{ last: resp.url }"))
            .collect(),
        ..DefinitionSet::default()
    };
    let req = VariablesRequest::default();

    let (a, b) = tokio::join!(
        engine.resolve_variables(&defs, &req),
        engine.resolve_variables(&defs, &req)
    );

    assert!(source.peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(a.variables.get("last"), Some(&json!("/slow/8")));
    assert_eq!(a, b);
    assert_eq!(engine.throttle().available(), 3);
}
