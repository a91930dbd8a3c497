use std::sync::Arc;

use futures::future::try_join_all;
use tracing::debug;

use crate::{
    error::Result,
    executor::FlowExecutor,
    flow::Flow,
    status::{FlowExecution, FlowExecutionStatus},
};

/// State that runs several flows concurrently and waits for all of them.
///
/// The flows share the executor and are polled on the caller's task; the
/// split adds no threads of its own.
///
/// Because the executor is shared, its current step execution after the
/// split is whichever sub-flow step was recorded last. States after the
/// split, such as an end state checking for `UNKNOWN`, see that step.
#[derive(Clone)]
pub struct SplitState {
    name: String,
    flows: Vec<Arc<dyn Flow>>,
}

impl std::fmt::Debug for SplitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let flows: Vec<&str> = self.flows.iter().map(|flow| flow.name()).collect();
        f.debug_struct("SplitState")
            .field("name", &self.name)
            .field("flows", &flows)
            .finish()
    }
}

impl SplitState {
    pub fn new(name: impl Into<String>, flows: Vec<Arc<dyn Flow>>) -> Self {
        Self {
            name: name.into(),
            flows,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flows(&self) -> &[Arc<dyn Flow>] {
        &self.flows
    }

    pub(crate) async fn handle(&self, executor: &dyn FlowExecutor) -> Result<FlowExecutionStatus> {
        debug!(state = %self.name, flows = self.flows.len(), "Starting split");
        let results = try_join_all(self.flows.iter().map(|flow| flow.start(executor))).await?;
        Ok(aggregate(&results))
    }
}

/// Most severe status among `results`, or `UNKNOWN` when there are none.
pub fn aggregate(results: &[FlowExecution]) -> FlowExecutionStatus {
    results
        .iter()
        .max()
        .map(|result| result.status.clone())
        .unwrap_or_else(FlowExecutionStatus::unknown)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        executor::mock::MockExecutor,
        flow::SimpleFlow,
        state::State,
        step::helpers,
    };

    fn single_step_flow(name: &str, exit: &str) -> Arc<dyn Flow> {
        let flow = SimpleFlow::builder()
            .name(name)
            .state(State::step(name, helpers::passthrough(name, exit)))
            .end(name, "*")
            .build()
            .unwrap();
        Arc::new(flow)
    }

    #[test]
    fn test_aggregate_keeps_most_severe() {
        let results = vec![
            FlowExecution::new("a", FlowExecutionStatus::completed()),
            FlowExecution::new("b", FlowExecutionStatus::failed()),
            FlowExecution::new("c", FlowExecutionStatus::stopped()),
        ];
        assert_eq!(aggregate(&results), FlowExecutionStatus::failed());
        assert_eq!(aggregate(&[]), FlowExecutionStatus::unknown());
    }

    #[tokio::test]
    async fn test_split_runs_every_flow() {
        let split = SplitState::new(
            "split",
            vec![
                single_step_flow("left", "COMPLETED"),
                single_step_flow("right", "STOPPED"),
            ],
        );
        let executor = MockExecutor::new();

        let status = split.handle(&executor).await.unwrap();

        assert_eq!(status, FlowExecutionStatus::stopped());
        let recorded = executor.recorded().await;
        let mut executed = recorded.executed.clone();
        executed.sort();
        assert_eq!(executed, vec!["left".to_string(), "right".to_string()]);
        assert_eq!(recorded.closed.len(), 2);
    }

    #[tokio::test]
    async fn test_split_leaves_last_recorded_branch_step_current() {
        let split = SplitState::new(
            "split",
            vec![
                single_step_flow("left", "COMPLETED"),
                single_step_flow("right", "COMPLETED"),
            ],
        );
        let executor = MockExecutor::new();

        split.handle(&executor).await.unwrap();

        let current = executor.step_execution().await.unwrap();
        let recorded = executor.recorded().await;
        assert_eq!(
            recorded.executed.last().map(String::as_str),
            Some(current.step_name())
        );
    }

    #[tokio::test]
    async fn test_split_propagates_sub_flow_errors() {
        let broken: Arc<dyn Flow> = Arc::new(SimpleFlow::new("broken", Vec::new()));
        let split = SplitState::new("split", vec![single_step_flow("ok", "COMPLETED"), broken]);
        let executor = MockExecutor::new();

        let err = split.handle(&executor).await.unwrap_err();
        assert!(err.is_configuration());
    }
}
