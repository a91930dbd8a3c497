//! Job and step execution records.
//!
//! These are the records a backing store would persist. The engine only
//! reads their status, step name and checkpoint context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    context::ExecutionContext,
    status::{BatchStatus, FlowExecutionStatus},
};

/// One attempt at running a single step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: Uuid,
    pub step_name: String,
    pub status: BatchStatus,
    pub exit_status: FlowExecutionStatus,
    pub context: ExecutionContext,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub failure_messages: Vec<String>,
}

impl StepExecution {
    /// Create a record for a step that is about to start.
    pub fn new(step_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            step_name: step_name.into(),
            status: BatchStatus::Starting,
            exit_status: FlowExecutionStatus::unknown(),
            context: ExecutionContext::new(),
            started_at: Utc::now(),
            ended_at: None,
            failure_messages: Vec::new(),
        }
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ExecutionContext {
        &mut self.context
    }

    /// Mark the record finished with the given status and exit code.
    pub fn finish(&mut self, status: BatchStatus, exit_status: FlowExecutionStatus) {
        self.status = status;
        self.exit_status = exit_status;
        self.ended_at = Some(Utc::now());
    }
}

/// One attempt at running a whole job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: Uuid,
    pub job_name: String,
    pub status: BatchStatus,
    /// Most severe exit code recorded so far, if any.
    pub exit_status: Option<FlowExecutionStatus>,
    pub context: ExecutionContext,
    /// Step executions of this attempt, in the order they ran.
    pub step_executions: Vec<StepExecution>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub failure_messages: Vec<String>,
}

impl JobExecution {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.into(),
            status: BatchStatus::Starting,
            exit_status: None,
            context: ExecutionContext::new(),
            step_executions: Vec::new(),
            created_at: Utc::now(),
            ended_at: None,
            failure_messages: Vec::new(),
        }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Record an exit code, keeping the most severe one seen.
    pub fn add_exit_status(&mut self, status: FlowExecutionStatus) {
        self.exit_status = Some(match self.exit_status.take() {
            Some(current) => current.max(status),
            None => status,
        });
    }

    /// Latest execution of the named step in this attempt.
    pub fn last_step_execution(&self, step_name: &str) -> Option<&StepExecution> {
        self.step_executions
            .iter()
            .rev()
            .find(|execution| execution.step_name == step_name)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_exit_status_keeps_most_severe() {
        let mut job = JobExecution::new("job");
        assert_eq!(job.exit_status, None);

        job.add_exit_status(FlowExecutionStatus::stopped());
        job.add_exit_status(FlowExecutionStatus::completed());
        assert_eq!(job.exit_status, Some(FlowExecutionStatus::stopped()));

        job.add_exit_status(FlowExecutionStatus::failed());
        assert_eq!(job.exit_status, Some(FlowExecutionStatus::failed()));
    }

    #[test]
    fn test_last_step_execution_prefers_latest() {
        let mut job = JobExecution::new("job");
        let mut first = StepExecution::new("load");
        first.finish(BatchStatus::Failed, FlowExecutionStatus::failed());
        let mut second = StepExecution::new("load");
        second.finish(BatchStatus::Completed, FlowExecutionStatus::completed());
        job.step_executions = vec![first, second.clone(), StepExecution::new("report")];

        assert_eq!(job.last_step_execution("load"), Some(&second));
        assert!(job.last_step_execution("extract").is_none());
        assert!(second.ended_at.is_some());
    }
}
