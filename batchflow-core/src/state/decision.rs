use std::sync::Arc;

use tracing::debug;

use crate::{
    decider::JobExecutionDecider, error::Result, executor::FlowExecutor,
    status::FlowExecutionStatus,
};

/// State that delegates the outcome to a [`JobExecutionDecider`].
#[derive(Clone, Debug)]
pub struct DecisionState {
    name: String,
    decider: Arc<dyn JobExecutionDecider>,
}

impl DecisionState {
    pub fn new(name: impl Into<String>, decider: Arc<dyn JobExecutionDecider>) -> Self {
        Self {
            name: name.into(),
            decider,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) async fn handle(&self, executor: &dyn FlowExecutor) -> Result<FlowExecutionStatus> {
        let job_execution = executor.job_execution().await;
        let step_execution = executor.step_execution().await;
        let status = self
            .decider
            .decide(&job_execution, step_execution.as_ref());
        debug!(state = %self.name, %status, "Decision made");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decider::FnDecider, executor::mock::MockExecutor, status::BatchStatus};

    #[tokio::test]
    async fn test_decider_sees_last_step() {
        let state = DecisionState::new(
            "route",
            Arc::new(FnDecider::new("route", |_job, step| match step {
                Some(step) if step.status() == BatchStatus::Failed => "RETRY".into(),
                Some(_) => FlowExecutionStatus::completed(),
                None => FlowExecutionStatus::new("NO_STEP"),
            })),
        );

        let status = state.handle(&MockExecutor::new()).await.unwrap();
        assert_eq!(status.name(), "NO_STEP");

        let executor = MockExecutor::with_last_step("load", BatchStatus::Failed);
        let status = state.handle(&executor).await.unwrap();
        assert_eq!(status.name(), "RETRY");
        assert!(executor.recorded().await.executed.is_empty());
    }
}
