/// The resolution pipeline: definitions + content tree → rendered page.
///
/// Wires together formatter compilation, the generator run, materializers,
/// locale projection and placeholder substitution.

use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::bubble::extract_locale_content;
use crate::core::config::{ConfigError, EngineConfig};
use crate::core::fetch::{DataSource, FetchError, HttpDataSource};
use crate::core::formatter::FormatterSet;
use crate::core::generator::GeneratorRunner;
use crate::core::logic::LogicEvaluator;
use crate::core::materializer::MaterializerPipeline;
use crate::core::substitute::Substitutor;
use crate::core::throttle::FetchThrottle;
use crate::core::transpile::{DeclarationDownlevel, LogicTranspiler};
use crate::schema::content::{ContentError, ContentNode, NodeKind};
use crate::schema::definition::{DefinitionError, DefinitionId, DefinitionSet};
use crate::schema::dimension::{
    collate, resolve_profile_by_section, resolve_profile_by_slugs, AttributeContext, Dimension,
    LookupError, ProfileMeta, SectionRef,
};
use crate::schema::variables::{ResolvedVariables, VariableMap};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("definition error: {0}")]
    Definition(#[from] DefinitionError),
    #[error("content error: {0}")]
    Content(#[from] ContentError),
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Input to a variables run.
#[derive(Debug, Clone, Default)]
pub struct VariablesRequest {
    pub profile_id: i64,
    pub locale: Option<String>,
    /// Search-row attributes for the page's dimensions.
    pub attributes: AttributeContext,
    /// Extra `<key>` values for generator URLs.
    pub params: HashMap<String, String>,
    /// Run only this generator.
    pub generator: Option<DefinitionId>,
    /// Run only this materializer.
    pub materializer: Option<DefinitionId>,
}

/// Input to a profile render.
#[derive(Debug, Clone, Default)]
pub struct ProfileRequest {
    pub profile_id: Option<i64>,
    pub locale: Option<String>,
    pub dimensions: Vec<Dimension>,
    pub attributes: AttributeContext,
    /// Raw query parameters; selector choices are read from here.
    pub query: HashMap<String, String>,
    /// Return only this section (id or slug).
    pub section: Option<String>,
    /// Variables from an earlier render. When present the generator run
    /// is skipped.
    pub variables: Option<VariableMap>,
}

impl ProfileRequest {
    /// Read `slugN`/`idN`, `locale`, `section` and `profile` from a query.
    pub fn from_query(query: HashMap<String, String>) -> ProfileRequest {
        ProfileRequest {
            profile_id: query.get("profile").and_then(|p| p.trim().parse().ok()),
            locale: query.get("locale").cloned(),
            dimensions: collate(&query),
            section: query.get("section").cloned(),
            query,
            ..ProfileRequest::default()
        }
    }

    /// Comma-joined dimension ids, as echoed back to the page.
    pub fn ids(&self) -> String {
        self.dimensions
            .iter()
            .map(|d| d.id.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A rendered profile or section.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedProfile {
    pub node: ContentNode,
    pub ids: String,
    pub variables: VariableMap,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProfileResponse {
    Rendered(RenderedProfile),
    /// A user-reachable lookup failure; the string is the payload.
    NotFound(String),
}

impl ProfileResponse {
    pub fn to_value(&self) -> Value {
        match self {
            ProfileResponse::Rendered(rendered) => {
                let mut value = rendered.node.to_value();
                if let Value::Object(obj) = &mut value {
                    obj.insert("ids".to_string(), Value::String(rendered.ids.clone()));
                    obj.insert("variables".to_string(), rendered.variables.to_value());
                }
                value
            }
            ProfileResponse::NotFound(message) => Value::String(message.clone()),
        }
    }
}

/// The top-level resolution engine. Built via `MortarEngine::builder()`.
///
/// One engine serves every request in the process; its fetch throttle is
/// shared by all of them.
pub struct MortarEngine {
    config: EngineConfig,
    source: Arc<dyn DataSource>,
    throttle: FetchThrottle,
    transpiler: Arc<dyn LogicTranspiler>,
}

/// Builder for constructing a `MortarEngine`.
#[derive(Default)]
pub struct MortarEngineBuilder {
    config_path: Option<String>,
    use_env: bool,
    /// Directly provided config (for testing without files).
    config: Option<EngineConfig>,
    source: Option<Arc<dyn DataSource>>,
    throttle: Option<FetchThrottle>,
    transpiler: Option<Arc<dyn LogicTranspiler>>,
}

impl MortarEngine {
    pub fn builder() -> MortarEngineBuilder {
        MortarEngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn throttle(&self) -> &FetchThrottle {
        &self.throttle
    }

    fn locale_for<'s>(&'s self, requested: Option<&'s str>) -> &'s str {
        requested.unwrap_or(&self.config.default_locale)
    }

    /// Values for `<key>` placeholders, lowest precedence first: config
    /// constants, attributes, request params, locale.
    fn url_params(&self, req: &VariablesRequest, locale: &str) -> HashMap<String, String> {
        let mut params = self.config.constants.clone();
        for (key, value) in req.attributes.iter() {
            params.insert(key.clone(), value.clone());
        }
        for (key, value) in &req.params {
            params.insert(key.clone(), value.clone());
        }
        params.insert("locale".to_string(), locale.to_string());
        params
    }

    /// Run generators then materializers for one profile.
    #[instrument(skip_all, fields(profile = req.profile_id))]
    pub async fn resolve_variables(&self, defs: &DefinitionSet, req: &VariablesRequest) -> ResolvedVariables {
        let locale = self.locale_for(req.locale.as_deref());
        let defs = defs.only(req.generator, req.materializer);
        let formatters = FormatterSet::compile(&defs.formatters, locale, &self.config);
        let evaluator = LogicEvaluator::new(&formatters);
        let params = self.url_params(req, locale);

        let run = GeneratorRunner::new(self.source.as_ref(), &self.throttle)
            .with_origin(self.config.origin.as_deref())
            .run(&defs.generators, &params, &evaluator)
            .await;
        let (variables, mat_status) =
            MaterializerPipeline::new(&evaluator).run(run.variables, &defs.materializers);

        info!(
            variables = variables.len(),
            endpoints = run.endpoints.len(),
            generator_errors = run.status.values().filter(|s| s.is_error()).count(),
            materializer_errors = mat_status.values().filter(|s| s.is_error()).count(),
            "Variables resolved"
        );
        ResolvedVariables {
            variables,
            gen_status: run.status,
            mat_status,
        }
    }

    /// Project a raw tree onto a locale and order its children.
    pub fn localize(&self, raw: Value, kind: NodeKind, locale: Option<&str>) -> Result<ContentNode, PipelineError> {
        let locale = self.locale_for(locale);
        let mut node = ContentNode::from_value(kind, raw)?;
        extract_locale_content(&mut node, locale, &self.config.default_locale);
        node.sort_by_ordering();
        Ok(node)
    }

    /// Which profile a request addresses. With supplied variables a section
    /// key or explicit profile id wins; otherwise the dimension slugs are
    /// matched against profile meta.
    pub fn locate_profile(
        &self,
        req: &ProfileRequest,
        meta: &[ProfileMeta],
        sections: &[SectionRef],
    ) -> Result<i64, LookupError> {
        if req.variables.is_some() {
            if let Some(key) = &req.section {
                return resolve_profile_by_section(sections, key);
            }
            if let Some(pid) = req.profile_id {
                return Ok(pid);
            }
        }
        resolve_profile_by_slugs(meta, &req.dimensions)
    }

    /// Render a profile (or one of its sections) with every placeholder
    /// resolved. `selectors` are all selectors of the profile.
    #[instrument(skip_all, fields(profile = ?req.profile_id, section = ?req.section))]
    pub async fn render_profile(
        &self,
        raw: Value,
        selectors: Vec<Value>,
        defs: &DefinitionSet,
        req: &ProfileRequest,
    ) -> Result<ProfileResponse, PipelineError> {
        let locale = self.locale_for(req.locale.as_deref());
        let profile_id = req
            .profile_id
            .or_else(|| raw.get("id").and_then(Value::as_i64))
            .unwrap_or_default();

        let variables = match &req.variables {
            Some(vars) => {
                debug!("Using supplied variables; generators skipped");
                VariableMap::from_value(vars.to_value())
            }
            None => {
                let mut params = HashMap::new();
                for (i, dim) in req.dimensions.iter().enumerate() {
                    params.insert(format!("slug{}", i + 1), dim.slug.clone());
                    params.insert(format!("id{}", i + 1), dim.id.clone());
                }
                let vreq = VariablesRequest {
                    profile_id,
                    locale: Some(locale.to_string()),
                    attributes: req.attributes.clone(),
                    params,
                    ..VariablesRequest::default()
                };
                self.resolve_variables(defs, &vreq).await.into_variables()
            }
        };

        let mut node = ContentNode::from_value(NodeKind::Profile, raw)?;
        let selectors = selectors
            .into_iter()
            .map(|s| ContentNode::from_value(NodeKind::Selector, s))
            .collect::<Result<Vec<_>, _>>()?;
        node.set_children("selectors", selectors)?;
        extract_locale_content(&mut node, locale, &self.config.default_locale);
        node.sort_by_ordering();

        let formatters = FormatterSet::compile(&defs.formatters, locale, &self.config);
        let substituted = Substitutor::new(&formatters, &variables, &self.config.missing_marker)
            .with_query(&req.query)
            .with_transpiler(self.transpiler.as_ref())
            .substitute_node(&node);

        let node = match &req.section {
            Some(key) => match substituted
                .children("sections")
                .iter()
                .find(|s| s.matches_key(key))
            {
                Some(section) => section.clone(),
                None => {
                    warn!(section = %key, "Requested section not in profile");
                    return Ok(ProfileResponse::NotFound(LookupError::Section(key.clone()).to_string()));
                }
            },
            None => substituted,
        };

        Ok(ProfileResponse::Rendered(RenderedProfile {
            node,
            ids: req.ids(),
            variables,
        }))
    }

    /// Render a story. Stories carry no variables; the pass exists to run
    /// the transpile hook over visualization logic.
    #[instrument(skip_all)]
    pub fn render_story(&self, raw: Value, locale: Option<&str>) -> Result<ContentNode, PipelineError> {
        let node = self.localize(raw, NodeKind::Story, locale)?;
        let locale = self.locale_for(locale);
        let formatters = FormatterSet::empty(locale, &self.config);
        let variables = VariableMap::new();
        Ok(
            Substitutor::new(&formatters, &variables, &self.config.missing_marker)
                .with_transpiler(self.transpiler.as_ref())
                .substitute_node(&node),
        )
    }
}

impl MortarEngineBuilder {
    /// Load config from a RON file at build time.
    pub fn config(mut self, path: &str) -> Self {
        self.config_path = Some(path.to_string());
        self
    }

    /// Overlay `MORTAR_*` environment variables on the config.
    pub fn from_env(mut self) -> Self {
        self.use_env = true;
        self
    }

    /// Provide config directly (for testing without files).
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Share an existing throttle instead of creating one from config.
    pub fn with_throttle(mut self, throttle: FetchThrottle) -> Self {
        self.throttle = Some(throttle);
        self
    }

    pub fn with_transpiler(mut self, transpiler: Arc<dyn LogicTranspiler>) -> Self {
        self.transpiler = Some(transpiler);
        self
    }

    pub fn build(self) -> Result<MortarEngine, PipelineError> {
        let mut config = match (&self.config_path, self.config) {
            (Some(path), _) if Path::new(path).exists() => EngineConfig::load_from_ron(Path::new(path))?,
            (_, Some(config)) => config,
            _ => EngineConfig::default(),
        };
        if self.use_env {
            config = config.with_env();
        }

        let source = match self.source {
            Some(source) => source,
            None => Arc::new(HttpDataSource::new(config.fetch_timeout())?),
        };
        let throttle = self
            .throttle
            .unwrap_or_else(|| FetchThrottle::new(config.max_concurrent_fetches));
        let transpiler = self
            .transpiler
            .unwrap_or_else(|| Arc::new(DeclarationDownlevel));

        debug!(
            default_locale = %config.default_locale,
            max_concurrent_fetches = throttle.limit(),
            "Engine built"
        );
        Ok(MortarEngine {
            config,
            source,
            throttle,
            transpiler,
        })
    }
}
