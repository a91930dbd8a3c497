use std::sync::Arc;

use tracing::debug;

use crate::{
    error::Result, executor::FlowExecutor, status::FlowExecutionStatus, step::Step,
};

/// State that runs a single step.
#[derive(Clone, Debug)]
pub struct StepState {
    name: String,
    step: Arc<dyn Step>,
}

impl StepState {
    pub fn new(name: impl Into<String>, step: Arc<dyn Step>) -> Self {
        Self {
            name: name.into(),
            step,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step(&self) -> &Arc<dyn Step> {
        &self.step
    }

    pub(crate) async fn handle(&self, executor: &dyn FlowExecutor) -> Result<FlowExecutionStatus> {
        // A step that ended unsuccessfully and is followed by another step
        // has been dealt with by the flow; it must not be replayed on restart.
        executor.abandon_step_execution().await?;
        debug!(state = %self.name, step = %self.step.name(), "Executing step");
        executor.execute_step(self.step.as_ref()).await
    }
}
