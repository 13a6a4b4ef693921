//! Materializers: ordered refinement of the generator output.

use tracing::{debug, warn};

use crate::core::logic::{InputBinding, LogicEvaluator};
use crate::schema::definition::Materializer;
use crate::schema::variables::{RunStatus, StatusReport, VariableMap};

pub struct MaterializerPipeline<'a> {
    evaluator: &'a LogicEvaluator<'a>,
}

impl<'a> MaterializerPipeline<'a> {
    pub fn new(evaluator: &'a LogicEvaluator<'a>) -> Self {
        MaterializerPipeline { evaluator }
    }

    /// Apply `materializers` ascending by `ordering`. Each one sees the map
    /// as left by every materializer before it; a failure leaves the map
    /// untouched for that step.
    pub fn run(&self, mut variables: VariableMap, materializers: &[Materializer]) -> (VariableMap, StatusReport) {
        let mut ordered: Vec<&Materializer> = materializers.iter().collect();
        ordered.sort_by_key(|m| m.ordering);

        let mut status = StatusReport::new();
        for materializer in ordered {
            debug!(materializer = %materializer.id, ordering = materializer.ordering, "Running materializer");
            let input = variables.to_value();
            let outcome = self
                .evaluator
                .evaluate(InputBinding::Variables, &input, &materializer.logic);
            match outcome.error {
                Some(error) => {
                    warn!(materializer = %materializer.id, name = %materializer.name, "Materializer failed");
                    status.insert(materializer.id, RunStatus::Failed { error });
                }
                None => {
                    status.insert(materializer.id, RunStatus::Produced(outcome.vars.clone()));
                    variables.fold(outcome.vars);
                }
            }
        }
        (variables, status)
    }
}
