//! The transition table a flow is driven by.

use std::{collections::HashMap, sync::Arc};

use tracing::debug;

use crate::{
    error::{FlowError, Result},
    state::State,
    status::FlowExecutionStatus,
    transition::{StateTransition, TransitionComparator},
};

/// Transitions grouped by source state, with every state they mention.
///
/// Immutable once built, so concurrent runs of the same flow can resolve
/// transitions without locking.
#[derive(Clone, Debug)]
pub struct TransitionTable {
    flow: String,
    states: HashMap<String, Arc<State>>,
    transitions: HashMap<String, Vec<StateTransition>>,
    start: Arc<State>,
}

impl TransitionTable {
    /// Build the table for `flow`.
    ///
    /// Each state's transitions keep declaration order unless a comparator is
    /// given. The start state is the source of the first transition.
    pub fn build(
        flow: &str,
        transitions: &[StateTransition],
        comparator: Option<&TransitionComparator>,
    ) -> Result<Self> {
        let Some(first) = transitions.first() else {
            return Err(FlowError::configuration(format!(
                "No start state was found in flow={flow}. At least one transition is required."
            )));
        };

        let states: HashMap<String, Arc<State>> = transitions
            .iter()
            .map(|transition| (transition.state_name().to_string(), transition.state().clone()))
            .collect();

        let mut grouped: HashMap<String, Vec<StateTransition>> = HashMap::new();
        let mut has_end = false;
        for transition in transitions {
            match transition.next() {
                Some(next) if !states.contains_key(next) => {
                    return Err(FlowError::configuration(format!(
                        "Missing state for [{transition}] in flow={flow}"
                    )));
                }
                Some(_) => {}
                None => has_end = true,
            }
            grouped
                .entry(transition.state_name().to_string())
                .or_default()
                .push(transition.clone());
        }

        if !has_end {
            return Err(FlowError::configuration(format!(
                "No end state was found in flow={flow}. At least one transition must have no next state."
            )));
        }

        if let Some(comparator) = comparator {
            for group in grouped.values_mut() {
                group.sort_by(|a, b| comparator(a, b));
            }
        }

        debug!(
            flow,
            states = states.len(),
            start = first.state_name(),
            "Built transition table"
        );

        Ok(Self {
            flow: flow.to_string(),
            states,
            transitions: grouped,
            start: first.state().clone(),
        })
    }

    pub fn flow(&self) -> &str {
        &self.flow
    }

    pub fn start_state(&self) -> &Arc<State> {
        &self.start
    }

    pub fn state(&self, name: &str) -> Option<&Arc<State>> {
        self.states.get(name)
    }

    pub fn states(&self) -> impl Iterator<Item = &Arc<State>> {
        self.states.values()
    }

    /// Ordered transitions leaving the named state.
    pub fn transitions_from(&self, name: &str) -> Option<&[StateTransition]> {
        self.transitions.get(name).map(Vec::as_slice)
    }

    /// The state to run after `state_name` produced `status`, or `None` if
    /// the flow ends here.
    ///
    /// The first matching transition wins. A `PENDING` outcome also matches
    /// transitions written for `STOPPED`.
    pub fn resolve(
        &self,
        state_name: &str,
        status: &FlowExecutionStatus,
    ) -> Result<Option<Arc<State>>> {
        let group = self.transitions.get(state_name).ok_or_else(|| {
            FlowError::execution(&self.flow, state_name, "No transitions found for state")
        })?;

        let code = status.name();
        let matched = group.iter().find(|transition| {
            transition.matches(code)
                || (status.is_pending() && transition.matches(FlowExecutionStatus::STOPPED))
        });

        let Some(transition) = matched else {
            return Err(FlowError::execution(
                &self.flow,
                state_name,
                format!("Next state not found with exit status={code}"),
            ));
        };

        let Some(next) = transition.next() else {
            return Ok(None);
        };

        self.states.get(next).cloned().map(Some).ok_or_else(|| {
            FlowError::execution(
                &self.flow,
                state_name,
                format!("Next state not specified for next={next}"),
            )
        })
    }
}
