use tracing::{debug, warn};

use crate::{
    context::{ExecutionContext, INTERRUPTED_STEP_KEY, RESUME_FROM_STATE_KEY},
    error::Result,
    executor::FlowExecutor,
    status::{BatchStatus, FlowExecutionStatus},
};

/// Terminal state: normal completion, failure, or a stop point the job can
/// later be restarted from.
#[derive(Clone, Debug)]
pub struct EndState {
    name: String,
    status: FlowExecutionStatus,
    exit_code: String,
    abandon: bool,
    resume_from: Option<String>,
}

impl EndState {
    /// End state reporting `status`, with the status name as exit code.
    pub fn new(name: impl Into<String>, status: FlowExecutionStatus) -> Self {
        Self {
            name: name.into(),
            exit_code: status.name().to_string(),
            status,
            abandon: false,
            resume_from: None,
        }
    }

    /// Stop point; a restart resumes at `resume_from`.
    pub fn stop(name: impl Into<String>, resume_from: impl Into<String>) -> Self {
        Self::new(name, FlowExecutionStatus::stopped()).with_resume_from(resume_from)
    }

    /// Exit code reported to the executor instead of the status name.
    pub fn with_exit_code(mut self, exit_code: impl Into<String>) -> Self {
        self.exit_code = exit_code.into();
        self
    }

    /// Abandon the interrupted step execution when stopping, so a restart
    /// does not replay it.
    pub fn with_abandon(mut self, abandon: bool) -> Self {
        self.abandon = abandon;
        self
    }

    pub fn with_resume_from(mut self, state: impl Into<String>) -> Self {
        self.resume_from = Some(state.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> &FlowExecutionStatus {
        &self.status
    }

    pub fn exit_code(&self) -> &str {
        &self.exit_code
    }

    pub fn resume_from(&self) -> Option<&str> {
        self.resume_from.as_deref()
    }

    pub fn abandons(&self) -> bool {
        self.abandon
    }

    /// False for stop points, which a restart can move past.
    pub fn is_end_state(&self) -> bool {
        !self.status.is_stop()
    }

    pub(crate) async fn handle(&self, executor: &dyn FlowExecutor) -> Result<FlowExecutionStatus> {
        let _monitor = executor.monitor().lock().await;

        // The last step could not finish, so nothing about it is known.
        let step_execution = executor.step_execution().await;
        if let Some(step) = step_execution
            .as_ref()
            .filter(|step| step.status() == BatchStatus::Unknown)
        {
            warn!(
                state = %self.name,
                step = %step.step_name(),
                "Last step execution status is UNKNOWN; manual intervention required"
            );
            return Ok(FlowExecutionStatus::unknown());
        }

        if self.status.is_stop() {
            // Reaching a stop point again on a restart means everything
            // after it is what remains to run.
            if executor.is_restart().await {
                debug!(state = %self.name, "Passing stop point on restart");
                return Ok(FlowExecutionStatus::completed());
            }

            let mut checkpoint = ExecutionContext::new();
            checkpoint.put(RESUME_FROM_STATE_KEY, &self.resume_from)?;
            checkpoint.put(
                INTERRUPTED_STEP_KEY,
                step_execution.as_ref().map(|step| step.step_name()),
            )?;
            executor.update_job_context(checkpoint).await?;
            // This attempt stops here, even if the step that led here was a re-run.
            executor.clear_restart_marker().await?;

            if self.abandon {
                executor.abandon_step_execution().await?;
            }
            debug!(
                state = %self.name,
                resume_from = ?self.resume_from,
                abandon = self.abandon,
                "Recorded stop checkpoint"
            );
        }

        executor.add_exit_status(&self.exit_code).await;
        Ok(self.status.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{context::RESTART_REQUESTED_KEY, executor::mock::MockExecutor};

    #[tokio::test]
    async fn test_completion_reports_exit_code() {
        let executor = MockExecutor::new();
        let end = EndState::new("end", FlowExecutionStatus::completed()).with_exit_code("DONE");

        let status = end.handle(&executor).await.unwrap();

        assert_eq!(status, FlowExecutionStatus::completed());
        let recorded = executor.recorded().await;
        assert_eq!(recorded.exit_codes, vec!["DONE".to_string()]);
        assert_eq!(recorded.context_writes, 0);
        assert_eq!(recorded.abandon_calls, 0);
    }

    #[tokio::test]
    async fn test_first_stop_writes_checkpoint_and_abandons() {
        let executor = MockExecutor::with_last_step("load", BatchStatus::Failed);
        let stop = EndState::stop("job.stop0", "job.report").with_abandon(true);

        let status = stop.handle(&executor).await.unwrap();

        assert!(status.is_stop());
        let recorded = executor.recorded().await;
        assert_eq!(
            recorded.job.context.get_str(RESUME_FROM_STATE_KEY),
            Some("job.report")
        );
        assert_eq!(recorded.job.context.get_str(INTERRUPTED_STEP_KEY), Some("load"));
        assert_eq!(recorded.job.context.len(), 2);
        assert_eq!(recorded.abandon_calls, 1);
        assert_eq!(
            recorded.step.as_ref().map(|step| step.status()),
            Some(BatchStatus::Abandoned)
        );
        assert_eq!(recorded.exit_codes, vec!["STOPPED".to_string()]);
    }

    #[tokio::test]
    async fn test_stop_clears_restart_marker_of_rerun_step() {
        let executor = MockExecutor::with_last_step("load", BatchStatus::Failed);
        if let Some(step) = executor.recorded().await.step.as_mut() {
            step.context.put(RESTART_REQUESTED_KEY, true).unwrap();
        }
        let stop = EndState::stop("job.stop0", "job.report").with_abandon(true);

        let status = stop.handle(&executor).await.unwrap();

        assert!(status.is_stop());
        let recorded = executor.recorded().await;
        assert_eq!(recorded.marker_clears, 1);
        let step = recorded.step.as_ref().unwrap();
        assert!(!step.context().is_truthy(RESTART_REQUESTED_KEY));
        assert_eq!(step.status(), BatchStatus::Abandoned);
    }

    #[tokio::test]
    async fn test_stop_without_abandon_keeps_step_status() {
        let executor = MockExecutor::with_last_step("load", BatchStatus::Failed);
        let stop = EndState::stop("job.stop0", "load");

        stop.handle(&executor).await.unwrap();

        let recorded = executor.recorded().await;
        assert_eq!(recorded.abandon_calls, 0);
        assert_eq!(
            recorded.step.as_ref().map(|step| step.status()),
            Some(BatchStatus::Failed)
        );
    }

    #[tokio::test]
    async fn test_stop_on_restart_completes_without_writing() {
        let executor = MockExecutor::with_last_step("load", BatchStatus::Failed).restarting();
        let stop = EndState::stop("job.stop0", "job.report").with_abandon(true);

        let status = stop.handle(&executor).await.unwrap();

        assert_eq!(status, FlowExecutionStatus::completed());
        let recorded = executor.recorded().await;
        assert_eq!(recorded.context_writes, 0);
        assert_eq!(recorded.abandon_calls, 0);
        assert_eq!(recorded.marker_clears, 0);
        assert!(recorded.exit_codes.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_step_short_circuits_any_end_state() {
        for end in [
            EndState::stop("stop", "next").with_abandon(true),
            EndState::new("fail", FlowExecutionStatus::failed()),
        ] {
            let executor = MockExecutor::with_last_step("load", BatchStatus::Unknown);

            let status = end.handle(&executor).await.unwrap();

            assert_eq!(status, FlowExecutionStatus::unknown());
            let recorded = executor.recorded().await;
            assert_eq!(recorded.context_writes, 0);
            assert_eq!(recorded.abandon_calls, 0);
            assert!(recorded.exit_codes.is_empty());
        }
    }

    #[tokio::test]
    async fn test_stop_without_step_records_null_step() {
        let executor = MockExecutor::new();
        let stop = EndState::stop("stop", "first");

        stop.handle(&executor).await.unwrap();

        let recorded = executor.recorded().await;
        assert!(recorded.job.context.contains_key(INTERRUPTED_STEP_KEY));
        assert_eq!(recorded.job.context.get_str(INTERRUPTED_STEP_KEY), None);
        assert_eq!(recorded.job.context.get_str(RESUME_FROM_STATE_KEY), Some("first"));
    }

    #[tokio::test]
    async fn test_stop_protocol_waits_for_monitor() {
        let executor = Arc::new(MockExecutor::with_last_step("load", BatchStatus::Failed));
        let guard = executor.monitor().lock().await;

        let handle = tokio::spawn({
            let executor = executor.clone();
            async move {
                EndState::stop("stop", "next")
                    .handle(executor.as_ref())
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        assert_eq!(executor.recorded().await.context_writes, 0);

        drop(guard);
        let status = handle.await.unwrap().unwrap();
        assert!(status.is_stop());
        assert_eq!(executor.recorded().await.context_writes, 1);
    }
}
