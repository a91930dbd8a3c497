//! Deciders: pure functions of the job history that pick an outcome.

use std::fmt::Debug;

use crate::{
    execution::{JobExecution, StepExecution},
    status::FlowExecutionStatus,
};

/// Chooses an outcome from the job execution and the last step execution.
pub trait JobExecutionDecider: Send + Sync + Debug {
    fn decide(
        &self,
        job_execution: &JobExecution,
        step_execution: Option<&StepExecution>,
    ) -> FlowExecutionStatus;
}

/// A decider that wraps a closure.
pub struct FnDecider<F>
where
    F: Fn(&JobExecution, Option<&StepExecution>) -> FlowExecutionStatus + Send + Sync,
{
    func: F,
    name: String,
}

impl<F> FnDecider<F>
where
    F: Fn(&JobExecution, Option<&StepExecution>) -> FlowExecutionStatus + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            func,
            name: name.into(),
        }
    }
}

impl<F> std::fmt::Debug for FnDecider<F>
where
    F: Fn(&JobExecution, Option<&StepExecution>) -> FlowExecutionStatus + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnDecider").field("name", &self.name).finish()
    }
}

impl<F> JobExecutionDecider for FnDecider<F>
where
    F: Fn(&JobExecution, Option<&StepExecution>) -> FlowExecutionStatus + Send + Sync,
{
    fn decide(
        &self,
        job_execution: &JobExecution,
        step_execution: Option<&StepExecution>,
    ) -> FlowExecutionStatus {
        (self.func)(job_execution, step_execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::BatchStatus;

    #[test]
    fn test_decides_on_last_step() {
        let decider = FnDecider::new("retry_or_finish", |_job, step| match step {
            Some(step) if step.status() == BatchStatus::Failed => "RETRY".into(),
            _ => FlowExecutionStatus::completed(),
        });

        let job = JobExecution::new("job");
        let mut failed = StepExecution::new("load");
        failed.finish(BatchStatus::Failed, FlowExecutionStatus::failed());

        assert_eq!(decider.decide(&job, Some(&failed)).name(), "RETRY");
        assert_eq!(decider.decide(&job, None), FlowExecutionStatus::completed());
    }
}
