//! Flow orchestration: the run loop over a transition table.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use tracing::{debug, error, info};

use crate::{
    context::RESTART_REQUESTED_KEY,
    error::{FlowError, Result},
    execution::StepExecution,
    executor::FlowExecutor,
    state::State,
    status::{FlowExecution, FlowExecutionStatus},
    table::TransitionTable,
    transition::{StateTransition, TransitionComparator, by_specificity},
};

/// A named graph of states that can be started or resumed at a state.
#[async_trait]
pub trait Flow: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Look up a state by name.
    fn state(&self, name: &str) -> Option<Arc<State>>;

    /// Names of all states in the flow.
    fn state_names(&self) -> Vec<String>;

    /// Run from the start state.
    async fn start(&self, executor: &dyn FlowExecutor) -> Result<FlowExecution>;

    /// Run from the named state.
    async fn resume(&self, state_name: &str, executor: &dyn FlowExecutor)
    -> Result<FlowExecution>;
}

/// Flow driven by a [`TransitionTable`].
///
/// The table is built on first use, or eagerly with
/// [`SimpleFlow::initialize`].
pub struct SimpleFlow {
    name: String,
    transitions: Vec<StateTransition>,
    comparator: Option<TransitionComparator>,
    table: OnceCell<TransitionTable>,
}

impl std::fmt::Debug for SimpleFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleFlow")
            .field("name", &self.name)
            .field("transitions", &self.transitions.len())
            .field("ordered", &self.comparator.is_some())
            .finish()
    }
}

impl SimpleFlow {
    /// Create a flow from raw transitions. Nothing is validated until the
    /// flow is initialized or first run.
    pub fn new(name: impl Into<String>, transitions: Vec<StateTransition>) -> Self {
        Self {
            name: name.into(),
            transitions,
            comparator: None,
            table: OnceCell::new(),
        }
    }

    /// Create a new flow builder.
    pub fn builder() -> SimpleFlowBuilder {
        SimpleFlowBuilder::new()
    }

    /// Order each state's transitions with `comparator` instead of
    /// declaration order.
    pub fn with_comparator(mut self, comparator: TransitionComparator) -> Self {
        self.comparator = Some(comparator);
        self.table = OnceCell::new();
        self
    }

    /// Build and validate the transition table now.
    pub fn initialize(&self) -> Result<()> {
        self.table().map(|_| ())
    }

    /// The transition table, built on first access.
    pub fn table(&self) -> Result<&TransitionTable> {
        self.table.get_or_try_init(|| {
            TransitionTable::build(&self.name, &self.transitions, self.comparator.as_ref())
        })
    }

    /// The transitions this flow was declared with.
    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    async fn close(
        &self,
        executor: &dyn FlowExecutor,
        state_name: &str,
        status: &FlowExecutionStatus,
    ) {
        executor
            .close(FlowExecution::new(state_name, status.clone()))
            .await;
    }
}

/// Whether the run loop handles `state` next.
///
/// A stopped outcome normally ends the run. When the last step execution is
/// a restart of an interrupted step, a stopped outcome only ends the run at
/// the state for that step.
// The "state for that step" test is a name-suffix match, so it relies on
// state names ending with the step name they run.
fn is_flow_continued(
    state: Option<&State>,
    status: &FlowExecutionStatus,
    step_execution: Option<&StepExecution>,
) -> bool {
    let Some(state) = state else {
        return false;
    };
    if status.name() != FlowExecutionStatus::STOPPED {
        return true;
    }
    step_execution.is_some_and(|execution| {
        execution.context().is_truthy(RESTART_REQUESTED_KEY)
            && !state.name().ends_with(execution.step_name())
    })
}

#[async_trait]
impl Flow for SimpleFlow {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self, name: &str) -> Option<Arc<State>> {
        self.table().ok()?.state(name).cloned()
    }

    fn state_names(&self) -> Vec<String> {
        self.table()
            .map(|table| table.states().map(|state| state.name().to_string()).collect())
            .unwrap_or_default()
    }

    async fn start(&self, executor: &dyn FlowExecutor) -> Result<FlowExecution> {
        let start = self.table()?.start_state().name().to_string();
        self.resume(&start, executor).await
    }

    async fn resume(
        &self,
        state_name: &str,
        executor: &dyn FlowExecutor,
    ) -> Result<FlowExecution> {
        let table = self.table()?;
        let mut status = FlowExecutionStatus::unknown();
        let mut state = table.state(state_name).cloned();
        let mut state_name = state_name.to_string();
        let mut step_execution: Option<StepExecution> = None;

        debug!(flow = %self.name, state = %state_name, %status, "Resuming flow");

        while is_flow_continued(state.as_deref(), &status, step_execution.as_ref()) {
            let Some(current) = state.take() else {
                break;
            };
            state_name = current.name().to_string();

            debug!(flow = %self.name, state = %state_name, "Handling state");
            status = match current.handle(executor).await {
                Ok(status) => status,
                Err(err) => {
                    error!(flow = %self.name, state = %state_name, error = %err, "State failed");
                    self.close(executor, &state_name, &status).await;
                    return Err(err.wrap_state_failure(&self.name, &state_name));
                }
            };
            step_execution = executor.step_execution().await;
            debug!(flow = %self.name, state = %state_name, %status, "Completed state");

            #[cfg(feature = "metrics")]
            metrics::counter!("batchflow_states_handled_total", "flow" => self.name.clone())
                .increment(1);

            state = match table.resolve(&state_name, &status) {
                Ok(next) => next,
                Err(err) => {
                    self.close(executor, &state_name, &status).await;
                    return Err(err);
                }
            };
        }

        let result = FlowExecution::new(state_name, status);
        executor.close(result.clone()).await;
        info!(flow = %self.name, state = %result.name, status = %result.status, "Flow ended");

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "batchflow_flows_ended_total",
            "status" => result.status.name().to_string()
        )
        .increment(1);

        Ok(result)
    }
}

enum PendingTransition {
    Named {
        from: String,
        pattern: String,
        next: Option<String>,
    },
    Raw(StateTransition),
}

/// Builder for SimpleFlow.
///
/// States are registered by name; transitions refer to them by name.
pub struct SimpleFlowBuilder {
    name: String,
    states: HashMap<String, Arc<State>>,
    transitions: Vec<PendingTransition>,
    comparator: Option<TransitionComparator>,
}

impl SimpleFlowBuilder {
    /// Create a new flow builder.
    pub fn new() -> Self {
        Self {
            name: "flow".to_string(),
            states: HashMap::new(),
            transitions: Vec::new(),
            comparator: None,
        }
    }

    /// Set the flow name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Register a state that transitions can refer to.
    pub fn state(mut self, state: impl Into<State>) -> Self {
        let state = state.into();
        self.states.insert(state.name().to_string(), Arc::new(state));
        self
    }

    /// Leave `from` for `next` on outcomes matching `pattern`.
    pub fn on(
        mut self,
        from: impl Into<String>,
        pattern: impl Into<String>,
        next: impl Into<String>,
    ) -> Self {
        self.transitions.push(PendingTransition::Named {
            from: from.into(),
            pattern: pattern.into(),
            next: Some(next.into()),
        });
        self
    }

    /// End the flow after `from` on outcomes matching `pattern`.
    pub fn end(mut self, from: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.transitions.push(PendingTransition::Named {
            from: from.into(),
            pattern: pattern.into(),
            next: None,
        });
        self
    }

    /// Add a prebuilt transition.
    pub fn transition(mut self, transition: StateTransition) -> Self {
        self.transitions.push(PendingTransition::Raw(transition));
        self
    }

    /// Order each state's transitions with `comparator`.
    pub fn comparator(mut self, comparator: TransitionComparator) -> Self {
        self.comparator = Some(comparator);
        self
    }

    /// Try the most specific patterns first.
    pub fn most_specific_first(self) -> Self {
        self.comparator(Arc::new(by_specificity))
    }

    /// Build and validate the flow.
    pub fn build(self) -> Result<SimpleFlow> {
        let mut transitions = Vec::with_capacity(self.transitions.len());
        for pending in self.transitions {
            let transition = match pending {
                PendingTransition::Raw(transition) => transition,
                PendingTransition::Named {
                    from,
                    pattern,
                    next,
                } => {
                    let state = self.states.get(&from).cloned().ok_or_else(|| {
                        FlowError::configuration(format!(
                            "Unknown state {from:?} in flow={}",
                            self.name
                        ))
                    })?;
                    StateTransition::new(state, &pattern, next.as_deref())?
                }
            };
            transitions.push(transition);
        }

        let mut flow = SimpleFlow::new(self.name, transitions);
        if let Some(comparator) = self.comparator {
            flow = flow.with_comparator(comparator);
        }
        flow.initialize()?;
        Ok(flow)
    }
}

impl Default for SimpleFlowBuilder {
    fn default() -> Self {
        Self::new()
    }
}
