//! Running a flow as a restartable job.
//!
//! [`JobFlowExecutor`] is an in-memory [`FlowExecutor`]: it records one
//! attempt of a job together with the step executions of earlier attempts,
//! and applies the restart rules to each step it is asked to run.
//! [`FlowJob`] drives a flow through it and settles the job's final status.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{
    context::{
        ExecutionContext, INTERRUPTED_STEP_KEY, RESTART_REQUESTED_KEY, RESUME_FROM_STATE_KEY,
    },
    error::{FlowError, Result},
    execution::{JobExecution, StepExecution},
    executor::FlowExecutor,
    flow::Flow,
    status::{BatchStatus, FlowExecution, FlowExecutionStatus},
    step::Step,
};

#[derive(Debug)]
struct ExecutorState {
    execution: JobExecution,
    /// Step executions of earlier attempts, oldest first.
    history: Vec<StepExecution>,
    restarted: bool,
    current: Option<StepExecution>,
    result: Option<FlowExecution>,
}

impl ExecutorState {
    fn record(&mut self, execution: StepExecution) {
        self.execution.step_executions.push(execution.clone());
        self.current = Some(execution);
    }
}

/// Executor holding one attempt of a job in memory.
///
/// Shared by reference between the task running the flow and any task that
/// may call [`JobFlowExecutor::request_stop`].
#[derive(Debug)]
pub struct JobFlowExecutor {
    monitor: Mutex<()>,
    inner: RwLock<ExecutorState>,
}

impl JobFlowExecutor {
    /// First attempt of the named job.
    pub fn new(job_name: impl Into<String>) -> Self {
        Self::from_state(ExecutorState {
            execution: JobExecution::new(job_name),
            history: Vec::new(),
            restarted: false,
            current: None,
            result: None,
        })
    }

    fn from_state(state: ExecutorState) -> Self {
        Self {
            monitor: Mutex::new(()),
            inner: RwLock::new(state),
        }
    }

    /// A new attempt of the same job, carrying over its checkpoint context
    /// and step history.
    ///
    /// Completed and abandoned jobs cannot be restarted, nor can one that is
    /// still running.
    pub async fn next_attempt(&self) -> Result<Self> {
        let state = self.inner.read().await;
        let previous = &state.execution;
        match previous.status {
            BatchStatus::Completed | BatchStatus::Abandoned => {
                return Err(FlowError::restart(format!(
                    "Job {} is {} and cannot be restarted",
                    previous.job_name, previous.status
                )));
            }
            status if status.is_running() => {
                return Err(FlowError::restart(format!(
                    "Job {} is still {status}",
                    previous.job_name
                )));
            }
            _ => {}
        }

        let mut history = state.history.clone();
        history.extend(previous.step_executions.iter().cloned());

        let mut execution = JobExecution::new(&previous.job_name);
        execution.context = previous.context.clone();
        info!(
            job = %execution.job_name,
            previous = %previous.id,
            status = %previous.status,
            "Restarting job"
        );

        Ok(Self::from_state(ExecutorState {
            execution,
            history,
            restarted: true,
            current: None,
            result: None,
        }))
    }

    /// Ask the running job to stop. Steps that start or finish after this
    /// are recorded as stopped and interrupt the flow.
    ///
    /// Returns false if the job was not running.
    pub async fn request_stop(&self) -> bool {
        let _monitor = self.monitor.lock().await;
        let mut state = self.inner.write().await;
        let job = &mut state.execution;
        if job.status.is_running() {
            job.status = BatchStatus::Stopping;
            info!(job = %job.job_name, "Stop requested");
            true
        } else {
            warn!(
                job = %job.job_name,
                status = %job.status,
                "Stop requested for a job that is not running"
            );
            false
        }
    }

    /// The result the flow closed with, if it has ended.
    pub async fn last_result(&self) -> Option<FlowExecution> {
        self.inner.read().await.result.clone()
    }

    async fn mark_started(&self) {
        let mut state = self.inner.write().await;
        if state.execution.status == BatchStatus::Starting {
            state.execution.status = BatchStatus::Started;
        }
    }

    /// Read and clear the checkpoint left by a stop point.
    async fn take_resume_state(&self) -> Option<String> {
        let mut state = self.inner.write().await;
        let context = &mut state.execution.context;
        let resume = context.get_str(RESUME_FROM_STATE_KEY).map(str::to_string);
        context.remove(RESUME_FROM_STATE_KEY);
        context.remove(INTERRUPTED_STEP_KEY);
        resume
    }

    async fn finish(&self, status: BatchStatus, exit_status: FlowExecutionStatus) -> JobExecution {
        let mut state = self.inner.write().await;
        let job = &mut state.execution;
        job.status = status;
        if job.exit_status.is_none() {
            job.exit_status = Some(exit_status);
        }
        job.ended_at = Some(Utc::now());
        job.clone()
    }

    async fn fail(&self, err: &FlowError) -> JobExecution {
        self.inner
            .write()
            .await
            .execution
            .failure_messages
            .push(err.to_string());
        self.finish(BatchStatus::Failed, FlowExecutionStatus::failed())
            .await
    }
}

#[async_trait]
impl FlowExecutor for JobFlowExecutor {
    fn monitor(&self) -> &Mutex<()> {
        &self.monitor
    }

    async fn execute_step(&self, step: &dyn Step) -> Result<FlowExecutionStatus> {
        let name = step.name();

        let execution = {
            let mut state = self.inner.write().await;

            // Runs within this attempt are deliberate; only earlier attempts
            // decide whether a step is skipped or resumed.
            let previous = if state.execution.last_step_execution(&name).is_some() {
                None
            } else {
                state
                    .history
                    .iter()
                    .rev()
                    .find(|execution| execution.step_name == name)
                    .cloned()
            };

            let mut execution = StepExecution::new(&name);
            if let Some(previous) = previous {
                match previous.status {
                    BatchStatus::Unknown => {
                        return Err(FlowError::restart(format!(
                            "Cannot restart step [{name}] from UNKNOWN status. \
                             The last execution ended with an unknown outcome, so it may \
                             already have had effects. Inspect it and abandon it before restarting."
                        )));
                    }
                    BatchStatus::Completed | BatchStatus::Abandoned => {
                        debug!(
                            step = %name,
                            status = %previous.status,
                            "Step finished in an earlier attempt; not running it again"
                        );
                        let exit_status = previous.exit_status.clone();
                        state.current = Some(previous);
                        return Ok(exit_status);
                    }
                    _ => {
                        execution.context = previous.context.clone();
                        execution.context.put(RESTART_REQUESTED_KEY, true)?;
                    }
                }
            }

            if state.execution.status == BatchStatus::Stopping {
                execution.finish(BatchStatus::Stopped, FlowExecutionStatus::stopped());
                state.record(execution);
                info!(step = %name, "Job is stopping; step not started");
                return Err(FlowError::interrupted(name));
            }

            execution.status = BatchStatus::Started;
            execution
        };

        let started = execution.clone();
        let outcome = step.execute(execution).await;

        let mut state = self.inner.write().await;
        let stopping = state.execution.status == BatchStatus::Stopping;
        match outcome {
            Ok((mut execution, status)) if stopping => {
                execution.finish(BatchStatus::Stopped, FlowExecutionStatus::stopped());
                state.record(execution);
                info!(step = %name, exit_status = %status, "Job stopped while step was running");
                Err(FlowError::interrupted(name))
            }
            Ok((mut execution, status)) => {
                execution.finish(BatchStatus::from_outcome(&status), status.clone());
                state.record(execution);
                debug!(step = %name, exit_status = %status, "Step finished");
                Ok(status)
            }
            Err(err) => {
                error!(step = %name, error = %err, "Step failed");
                let mut execution = started;
                execution.failure_messages.push(err.to_string());
                execution.finish(BatchStatus::Failed, FlowExecutionStatus::failed());
                state.record(execution);
                Ok(FlowExecutionStatus::failed())
            }
        }
    }

    async fn job_execution(&self) -> JobExecution {
        self.inner.read().await.execution.clone()
    }

    async fn step_execution(&self) -> Option<StepExecution> {
        self.inner.read().await.current.clone()
    }

    async fn is_restart(&self) -> bool {
        let state = self.inner.read().await;
        // An abandoned step was replayed, so this attempt is moving past
        // the stop point that abandoned it.
        if state
            .current
            .as_ref()
            .is_some_and(|step| step.status == BatchStatus::Abandoned)
        {
            return true;
        }
        state.restarted && state.execution.step_executions.is_empty()
    }

    async fn abandon_step_execution(&self) -> Result<()> {
        let mut guard = self.inner.write().await;
        let state = &mut *guard;
        let Some(current) = state.current.as_mut() else {
            return Ok(());
        };
        if matches!(current.status, BatchStatus::Stopped | BatchStatus::Failed) {
            current.status = BatchStatus::Abandoned;
            if let Some(record) = state
                .execution
                .step_executions
                .iter_mut()
                .find(|record| record.id == current.id)
            {
                record.status = BatchStatus::Abandoned;
            }
            debug!(step = %current.step_name, "Abandoned step execution");
        }
        Ok(())
    }

    async fn clear_restart_marker(&self) -> Result<()> {
        let mut guard = self.inner.write().await;
        let state = &mut *guard;
        let Some(current) = state.current.as_mut() else {
            return Ok(());
        };
        if current.context.remove(RESTART_REQUESTED_KEY).is_some() {
            if let Some(record) = state
                .execution
                .step_executions
                .iter_mut()
                .find(|record| record.id == current.id)
            {
                record.context.remove(RESTART_REQUESTED_KEY);
            }
            debug!(step = %current.step_name, "Cleared restart marker at stop point");
        }
        Ok(())
    }

    async fn update_job_context(&self, entries: ExecutionContext) -> Result<()> {
        self.inner.write().await.execution.context.merge(&entries);
        Ok(())
    }

    async fn add_exit_status(&self, code: &str) {
        self.inner
            .write()
            .await
            .execution
            .add_exit_status(FlowExecutionStatus::new(code));
    }

    async fn close(&self, result: FlowExecution) {
        debug!(state = %result.name, status = %result.status, "Flow closed");
        self.inner.write().await.result = Some(result);
    }
}

/// A job whose work is a flow.
#[derive(Clone, Debug)]
pub struct FlowJob {
    name: String,
    flow: Arc<dyn Flow>,
}

impl FlowJob {
    pub fn new(name: impl Into<String>, flow: Arc<dyn Flow>) -> Self {
        Self {
            name: name.into(),
            flow,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flow(&self) -> &Arc<dyn Flow> {
        &self.flow
    }

    /// Executor for a first attempt of this job.
    pub fn executor(&self) -> JobFlowExecutor {
        JobFlowExecutor::new(&self.name)
    }

    /// Run one attempt of the job.
    ///
    /// A checkpoint left by a stop point makes the flow resume at the
    /// recorded state; otherwise it starts from the beginning. Flow errors
    /// fail the job and are kept in its failure messages; configuration
    /// errors are also returned.
    pub async fn execute(&self, executor: &JobFlowExecutor) -> Result<JobExecution> {
        executor.mark_started().await;

        let outcome = match executor.take_resume_state().await {
            Some(state) if self.flow.state(&state).is_none() => Err(FlowError::configuration(
                format!("Cannot resume job {} at unknown state {state}", self.name),
            )),
            Some(state) => {
                info!(job = %self.name, state = %state, "Resuming job");
                self.flow.resume(&state, executor).await
            }
            None => {
                info!(job = %self.name, "Starting job");
                self.flow.start(executor).await
            }
        };

        match outcome {
            Ok(result) => {
                let status = BatchStatus::from_outcome(&result.status);
                let job = executor.finish(status, result.status).await;
                info!(job = %self.name, status = %job.status, "Job finished");
                Ok(job)
            }
            Err(err) if err.is_interrupted() => {
                let job = executor
                    .finish(BatchStatus::Stopped, FlowExecutionStatus::stopped())
                    .await;
                info!(job = %self.name, "Job stopped on request");
                Ok(job)
            }
            Err(err) if err.is_configuration() => {
                error!(job = %self.name, error = %err, "Job is misconfigured");
                executor.fail(&err).await;
                Err(err)
            }
            Err(err) => {
                error!(job = %self.name, error = %err, "Job failed");
                Ok(executor.fail(&err).await)
            }
        }
    }
}
