//! The boundary between the flow engine and whatever runs and persists
//! executions.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    context::ExecutionContext,
    error::Result,
    execution::{JobExecution, StepExecution},
    status::{FlowExecution, FlowExecutionStatus},
    step::Step,
};

/// Capabilities a flow needs from the job it runs in.
///
/// Implementations are shared between the thread running the flow and an
/// operator that may request a stop, so every method takes `&self`.
#[async_trait]
pub trait FlowExecutor: Send + Sync {
    /// Mutex held by the end-state stop protocol. A stop request from
    /// another thread must take the same mutex, so the checkpoint write and
    /// the abandon decision are never interleaved with it.
    fn monitor(&self) -> &Mutex<()>;

    /// Run a step and return its exit status.
    async fn execute_step(&self, step: &dyn Step) -> Result<FlowExecutionStatus>;

    /// Snapshot of the current job execution.
    async fn job_execution(&self) -> JobExecution;

    /// Snapshot of the step execution most recently run or replayed.
    async fn step_execution(&self) -> Option<StepExecution>;

    /// True if this attempt is a restart that has not executed a step yet.
    async fn is_restart(&self) -> bool;

    /// Mark the most recent step execution abandoned if it ended
    /// unsuccessfully, so a restart will not replay it.
    async fn abandon_step_execution(&self) -> Result<()>;

    /// Remove the restart marker from the most recent step execution. Called
    /// when a stop point is recorded, so the run loop does not treat a stop
    /// made in this attempt as one it is resuming past.
    async fn clear_restart_marker(&self) -> Result<()>;

    /// Merge entries into the job's checkpoint context and persist it.
    async fn update_job_context(&self, entries: ExecutionContext) -> Result<()>;

    /// Record an exit code on the job.
    async fn add_exit_status(&self, code: &str);

    /// Called once when a flow run ends, normally or not.
    async fn close(&self, result: FlowExecution);
}
