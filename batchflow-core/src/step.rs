//! Step abstraction: the unit of work behind a step state.

use std::fmt::Debug;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::{error::Result, execution::StepExecution, status::FlowExecutionStatus};

/// Trait for batch steps.
///
/// A step receives its execution record, performs its work (reading and
/// updating the record's checkpoint context as it goes), and returns the
/// record together with its exit status. The exit status is the outcome the
/// flow uses to pick the next transition.
///
/// Steps are run by a [`FlowExecutor`](crate::executor::FlowExecutor), which
/// owns restart and persistence decisions.
#[async_trait]
pub trait Step: Send + Sync + Debug {
    /// Execute the step's logic.
    async fn execute(
        &self,
        execution: StepExecution,
    ) -> Result<(StepExecution, FlowExecutionStatus)>;

    /// Name used to match executions across restarts.
    fn name(&self) -> String {
        format!("{self:?}")
    }
}

/// Boxed future returned by a [`FnStep`] closure.
pub type StepFuture = BoxFuture<'static, Result<(StepExecution, FlowExecutionStatus)>>;

/// Type-erased closure held by steps built with [`helpers::fn_step`].
pub type BoxedStepFn = Box<dyn Fn(StepExecution) -> StepFuture + Send + Sync>;

/// A step that wraps a closure.
pub struct FnStep<F>
where
    F: Fn(StepExecution) -> StepFuture + Send + Sync,
{
    func: F,
    name: String,
}

impl<F> std::fmt::Debug for FnStep<F>
where
    F: Fn(StepExecution) -> StepFuture + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStep").field("name", &self.name).finish()
    }
}

impl<F> FnStep<F>
where
    F: Fn(StepExecution) -> StepFuture + Send + Sync,
{
    /// Create a new functional step.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            func,
            name: name.into(),
        }
    }
}

#[async_trait]
impl<F> Step for FnStep<F>
where
    F: Fn(StepExecution) -> StepFuture + Send + Sync,
{
    async fn execute(
        &self,
        execution: StepExecution,
    ) -> Result<(StepExecution, FlowExecutionStatus)> {
        (self.func)(execution).await
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// A no-op step that always exits with the same status.
#[derive(Debug, Clone)]
pub struct PassthroughStep {
    exit_status: FlowExecutionStatus,
    name: String,
}

impl PassthroughStep {
    /// Create a new passthrough step.
    pub fn new(name: impl Into<String>, exit_status: impl Into<FlowExecutionStatus>) -> Self {
        Self {
            exit_status: exit_status.into(),
            name: name.into(),
        }
    }
}

#[async_trait]
impl Step for PassthroughStep {
    async fn execute(
        &self,
        execution: StepExecution,
    ) -> Result<(StepExecution, FlowExecutionStatus)> {
        Ok((execution, self.exit_status.clone()))
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Helper functions for creating common step types.
pub mod helpers {
    use super::*;

    /// Create a functional step from an async closure.
    pub fn fn_step<F, Fut>(name: impl Into<String>, f: F) -> FnStep<BoxedStepFn>
    where
        F: Fn(StepExecution) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(StepExecution, FlowExecutionStatus)>>
            + Send
            + 'static,
    {
        let func: BoxedStepFn =
            Box::new(move |execution: StepExecution| -> StepFuture { Box::pin(f(execution)) });
        FnStep::new(name, func)
    }

    /// Create a passthrough step that always exits with `status`.
    pub fn passthrough(
        name: impl Into<String>,
        status: impl Into<FlowExecutionStatus>,
    ) -> PassthroughStep {
        PassthroughStep::new(name, status)
    }
}
