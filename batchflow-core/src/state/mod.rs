//! States: the executable units of a flow.
//!
//! A flow is a graph of named states. Handling a state produces an outcome
//! that the transition table uses to pick the next state. The set of state
//! kinds is closed; the run loop only sees [`State`].

mod decision;
mod end;
mod split;
mod step;

use std::sync::Arc;

pub use decision::DecisionState;
pub use end::EndState;
pub use split::{SplitState, aggregate};
pub use step::StepState;

use crate::{
    decider::JobExecutionDecider, error::Result, executor::FlowExecutor, flow::Flow,
    status::FlowExecutionStatus, step::Step,
};

/// A named, executable unit of a flow.
#[derive(Clone, Debug)]
pub enum State {
    /// Runs one step through the executor
    Step(StepState),
    /// Runs a decider against the job history
    Decision(DecisionState),
    /// Runs sub-flows concurrently and aggregates their outcomes
    Split(SplitState),
    /// Terminal or stop point
    End(EndState),
}

impl State {
    /// Create a step state.
    pub fn step(name: impl Into<String>, step: impl Step + 'static) -> Self {
        State::Step(StepState::new(name, Arc::new(step)))
    }

    /// Create a decision state.
    pub fn decision(name: impl Into<String>, decider: impl JobExecutionDecider + 'static) -> Self {
        State::Decision(DecisionState::new(name, Arc::new(decider)))
    }

    /// Create a split state over the given flows.
    pub fn split(name: impl Into<String>, flows: Vec<Arc<dyn Flow>>) -> Self {
        State::Split(SplitState::new(name, flows))
    }

    /// The state's unique name within its flow.
    pub fn name(&self) -> &str {
        match self {
            State::Step(state) => state.name(),
            State::Decision(state) => state.name(),
            State::Split(state) => state.name(),
            State::End(state) => state.name(),
        }
    }

    /// Handle the state and return its outcome.
    pub async fn handle(&self, executor: &dyn FlowExecutor) -> Result<FlowExecutionStatus> {
        match self {
            State::Step(state) => state.handle(executor).await,
            State::Decision(state) => state.handle(executor).await,
            State::Split(state) => state.handle(executor).await,
            State::End(state) => state.handle(executor).await,
        }
    }

    /// True if reaching this state ends the flow for good. Stop points are
    /// not end states: the flow can be resumed past them.
    pub fn is_end_state(&self) -> bool {
        match self {
            State::End(state) => state.is_end_state(),
            _ => false,
        }
    }
}

impl From<EndState> for State {
    fn from(state: EndState) -> Self {
        State::End(state)
    }
}

impl From<StepState> for State {
    fn from(state: StepState) -> Self {
        State::Step(state)
    }
}

impl From<DecisionState> for State {
    fn from(state: DecisionState) -> Self {
        State::Decision(state)
    }
}

impl From<SplitState> for State {
    fn from(state: SplitState) -> Self {
        State::Split(state)
    }
}
