//! Generator runs: fetch each distinct endpoint once, then fold every
//! generator's output into the variable map.

use futures::future::join_all;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::core::fetch::{absolutize, swap_url, DataSource};
use crate::core::logic::{InputBinding, LogicEvaluator};
use crate::core::throttle::FetchThrottle;
use crate::schema::definition::Generator;
use crate::schema::variables::{RunStatus, StatusReport, VariableMap};

/// Output of a generator run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratorRun {
    pub variables: VariableMap,
    pub status: StatusReport,
    /// Distinct endpoints fetched, in first-reference order.
    pub endpoints: Vec<String>,
}

/// Generators grouped under the resolved URL they share.
struct Endpoint<'g> {
    url: String,
    generators: Vec<&'g Generator>,
}

pub struct GeneratorRunner<'a> {
    source: &'a dyn DataSource,
    throttle: &'a FetchThrottle,
    origin: Option<&'a str>,
}

impl<'a> GeneratorRunner<'a> {
    pub fn new(source: &'a dyn DataSource, throttle: &'a FetchThrottle) -> Self {
        GeneratorRunner {
            source,
            throttle,
            origin: None,
        }
    }

    /// Prefix relative generator URLs with `origin`.
    pub fn with_origin(mut self, origin: Option<&'a str>) -> Self {
        self.origin = origin;
        self
    }

    /// Run `generators` with `params` filling their URL placeholders.
    pub async fn run(
        &self,
        generators: &[Generator],
        params: &HashMap<String, String>,
        evaluator: &LogicEvaluator<'_>,
    ) -> GeneratorRun {
        let endpoints = self.group_by_endpoint(generators, params);
        debug!(
            generators = generators.len(),
            endpoints = endpoints.len(),
            "Fetching generator endpoints"
        );

        let responses = join_all(endpoints.iter().map(|e| self.fetch(&e.url))).await;

        let mut run = GeneratorRun::default();
        for (endpoint, resp) in endpoints.iter().zip(responses) {
            for generator in &endpoint.generators {
                let outcome = evaluator.evaluate(InputBinding::Resp, &resp, &generator.logic);
                let status = match outcome.error {
                    Some(error) => {
                        warn!(generator = %generator.id, name = %generator.name, "Generator failed");
                        RunStatus::Failed { error }
                    }
                    None => RunStatus::Produced(outcome.vars.clone()),
                };
                run.status.insert(generator.id, status);
                run.variables.fold(outcome.vars);
            }
            run.endpoints.push(endpoint.url.clone());
        }
        run
    }

    fn group_by_endpoint<'g>(
        &self,
        generators: &'g [Generator],
        params: &HashMap<String, String>,
    ) -> Vec<Endpoint<'g>> {
        let mut index: FxHashMap<String, usize> = FxHashMap::default();
        let mut endpoints: Vec<Endpoint<'g>> = Vec::new();
        for generator in generators {
            let url = absolutize(&swap_url(&generator.api, params), self.origin);
            match index.get(&url) {
                Some(&i) => endpoints[i].generators.push(generator),
                None => {
                    index.insert(url.clone(), endpoints.len());
                    endpoints.push(Endpoint {
                        url,
                        generators: vec![generator],
                    });
                }
            }
        }
        endpoints
    }

    /// Fetch under the throttle. A failure yields an empty object.
    async fn fetch(&self, url: &str) -> Value {
        match self.throttle.run(self.source.fetch(url)).await {
            Ok(resp) => {
                debug!(url, "Variable loaded");
                resp
            }
            Err(e) => {
                warn!(url, error = %e, "Variable fetch failed");
                Value::Object(Map::new())
            }
        }
    }
}
