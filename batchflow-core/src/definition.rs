//! Declarative flow definitions.
//!
//! A [`FlowDefinition`] lists transitions between named states and can be
//! loaded from YAML or JSON:
//!
//! ```yaml
//! name: import
//! transitions:
//!   - { from: extract, on: COMPLETED, next: load }
//!   - { from: extract, on: FAILED, stop: { restart: load } }
//!   - { from: load, on: "FAILED*", fail: { exit_code: LOAD_FAILED } }
//!   - { from: load, end: {} }
//! ```
//!
//! `end`, `fail` and `stop` create end states named `<flow>.<kind><n>`.
//! A transition with none of `next`, `end`, `fail` or `stop` simply ends
//! the flow. A stop's `to` names the state a restart moves on to after the
//! stop point; it defaults to `restart`. Each `(from, on)` pair may appear
//! only once, and an omitted `on` means `*`.
//!
//! A state whose only transition is a `next` without `on` also ends the
//! flow as failed on `FAILED` and as unknown on `UNKNOWN`. A state that is
//! only ever a target gets those two plus an end on every other outcome;
//! a registered end state used as a target just ends the flow.
//! The states named in `from` are looked up in a [`StateRegistry`].

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{FlowError, Result},
    flow::SimpleFlow,
    state::{EndState, State},
    status::FlowExecutionStatus,
    transition::{ExitPattern, StateTransition},
};

/// Options of an `end`, `fail` or `stop` transition.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndDefinition {
    /// Exit code reported to the job; defaults to the status name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<String>,
    /// State a restart resumes from (stop only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
    /// State following the stop point when a restart passes it (stop only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

/// One transition of a [`FlowDefinition`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionDefinition {
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<EndDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<EndDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<EndDefinition>,
}

impl TransitionDefinition {
    fn bare(from: impl Into<String>, on: Option<String>) -> Self {
        Self {
            from: from.into(),
            on,
            next: None,
            end: None,
            fail: None,
            stop: None,
        }
    }

    /// Go to `next` on outcomes matching `on`.
    pub fn next(from: impl Into<String>, on: impl Into<String>, next: impl Into<String>) -> Self {
        Self {
            next: Some(next.into()),
            ..Self::bare(from, Some(on.into()))
        }
    }

    /// Go to `next` whatever the outcome, except that `FAILED` and
    /// `UNKNOWN` end the flow.
    pub fn then(from: impl Into<String>, next: impl Into<String>) -> Self {
        Self {
            next: Some(next.into()),
            ..Self::bare(from, None)
        }
    }

    /// End the flow without an end state.
    pub fn finish(from: impl Into<String>, on: impl Into<String>) -> Self {
        Self::bare(from, Some(on.into()))
    }

    /// End the flow as completed.
    pub fn end(from: impl Into<String>, on: impl Into<String>) -> Self {
        Self {
            end: Some(EndDefinition::default()),
            ..Self::bare(from, Some(on.into()))
        }
    }

    /// End the flow as failed.
    pub fn fail(from: impl Into<String>, on: impl Into<String>) -> Self {
        Self {
            fail: Some(EndDefinition::default()),
            ..Self::bare(from, Some(on.into()))
        }
    }

    /// Stop the flow; a restart resumes at `restart`.
    pub fn stop(
        from: impl Into<String>,
        on: impl Into<String>,
        restart: impl Into<String>,
    ) -> Self {
        Self {
            stop: Some(EndDefinition {
                restart: Some(restart.into()),
                ..EndDefinition::default()
            }),
            ..Self::bare(from, Some(on.into()))
        }
    }

    /// The outcome pattern, `*` when `on` is omitted.
    pub fn pattern(&self) -> &str {
        self.on.as_deref().unwrap_or(ExitPattern::ANY)
    }

    /// A `next` without `on`.
    fn is_plain_next(&self) -> bool {
        self.on.is_none() && self.next.is_some()
    }

    /// States this transition leads to, including a stop's restart state.
    fn targets(&self) -> impl Iterator<Item = &str> {
        let stop = self.stop.as_ref();
        [
            self.next.as_deref(),
            stop.and_then(|stop| stop.to.as_deref()),
            stop.and_then(|stop| stop.restart.as_deref()),
        ]
        .into_iter()
        .flatten()
    }
}

#[derive(Clone, Copy)]
enum EndKind {
    End,
    Fail,
    Stop,
    Unknown,
}

impl EndKind {
    fn label(self) -> &'static str {
        match self {
            EndKind::End => "end",
            EndKind::Fail => "fail",
            EndKind::Stop => "stop",
            EndKind::Unknown => "unknown",
        }
    }

    fn status(self) -> FlowExecutionStatus {
        match self {
            EndKind::End => FlowExecutionStatus::completed(),
            EndKind::Fail => FlowExecutionStatus::failed(),
            EndKind::Stop => FlowExecutionStatus::stopped(),
            EndKind::Unknown => FlowExecutionStatus::unknown(),
        }
    }
}

enum Target<'a> {
    Next(&'a str),
    Finish,
    End(EndKind, &'a EndDefinition),
}

impl TransitionDefinition {
    fn target(&self, flow: &str) -> Result<Target<'_>> {
        let targets = [
            self.next.as_deref().map(Target::Next),
            self.end.as_ref().map(|end| Target::End(EndKind::End, end)),
            self.fail.as_ref().map(|end| Target::End(EndKind::Fail, end)),
            self.stop.as_ref().map(|end| Target::End(EndKind::Stop, end)),
        ];
        let mut chosen = targets.into_iter().flatten();
        let target = chosen.next().unwrap_or(Target::Finish);
        if chosen.next().is_some() {
            return Err(FlowError::configuration(format!(
                "Transition from {:?} on {:?} in flow={flow} has more than one target",
                self.from,
                self.pattern()
            )));
        }
        if let Target::End(EndKind::End | EndKind::Fail, end) = &target {
            if end.restart.is_some() || end.to.is_some() {
                return Err(FlowError::configuration(format!(
                    "Transition from {:?} in flow={flow}: restart and to are only valid on stop",
                    self.from
                )));
            }
        }
        Ok(target)
    }
}

/// Transitions and generated end states of a flow being built.
struct Assembly<'a> {
    flow: &'a str,
    transitions: Vec<StateTransition>,
    end_states: usize,
}

impl Assembly<'_> {
    /// Add `from --on--> <end state>` and the end state's own transition
    /// to `next`, or to the end of the flow.
    fn end_state(
        &mut self,
        from: &Arc<State>,
        on: &str,
        kind: EndKind,
        options: &EndDefinition,
    ) -> Result<()> {
        let name = format!("{}.{}{}", self.flow, kind.label(), self.end_states);
        self.end_states += 1;

        let status = kind.status();
        let exit_code = options
            .exit_code
            .clone()
            .unwrap_or_else(|| status.name().to_string());
        let mut end = EndState::new(&name, status).with_exit_code(exit_code);
        if let Some(restart) = &options.restart {
            end = end
                .with_resume_from(restart)
                .with_abandon(restart != from.name());
        }
        let next = options.to.as_deref().or(options.restart.as_deref());

        self.transitions
            .push(StateTransition::to(from.clone(), on, &name)?);
        self.transitions.push(StateTransition::new(
            Arc::new(State::from(end)),
            ExitPattern::ANY,
            next,
        )?);
        Ok(())
    }

    /// End states for outcomes `from` has no explicit transition for.
    fn default_ends(&mut self, from: &Arc<State>, on_completion: bool) -> Result<()> {
        let options = EndDefinition::default();
        self.end_state(from, FlowExecutionStatus::FAILED, EndKind::Fail, &options)?;
        self.end_state(from, FlowExecutionStatus::UNKNOWN, EndKind::Unknown, &options)?;
        if on_completion {
            self.end_state(from, ExitPattern::ANY, EndKind::End, &options)?;
        }
        Ok(())
    }
}

/// A named list of transitions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub name: String,
    pub transitions: Vec<TransitionDefinition>,
}

impl FlowDefinition {
    pub fn new(name: impl Into<String>, transitions: Vec<TransitionDefinition>) -> Self {
        Self {
            name: name.into(),
            transitions,
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject repeated `(from, on)` pairs, and a plain `next` sharing its
    /// source with any other transition.
    fn verify_patterns(&self) -> Result<()> {
        let mut seen = HashSet::new();
        let mut plain = HashSet::new();
        let mut explicit = HashSet::new();
        for definition in &self.transitions {
            let from = definition.from.as_str();
            if !seen.insert((from, definition.pattern())) {
                return Err(FlowError::configuration(format!(
                    "Duplicate transition pattern {:?} from {from:?} in flow={}",
                    definition.pattern(),
                    self.name
                )));
            }
            if definition.is_plain_next() {
                plain.insert(from);
            } else {
                explicit.insert(from);
            }
            if plain.contains(from) && explicit.contains(from) {
                return Err(FlowError::configuration(format!(
                    "State {from:?} in flow={} has a next without on and other transitions",
                    self.name
                )));
            }
        }
        Ok(())
    }

    fn source(&self, registry: &StateRegistry, name: &str) -> Result<Arc<State>> {
        registry.get(name).ok_or_else(|| {
            FlowError::configuration(format!("Unknown state {name:?} in flow={}", self.name))
        })
    }

    /// Build a validated flow, taking source states from `registry`.
    pub fn build(&self, registry: &StateRegistry) -> Result<SimpleFlow> {
        self.verify_patterns()?;

        let mut assembly = Assembly {
            flow: &self.name,
            transitions: Vec::with_capacity(self.transitions.len()),
            end_states: 0,
        };

        for definition in &self.transitions {
            let from = self.source(registry, &definition.from)?;
            let on = definition.pattern();

            match definition.target(&self.name)? {
                Target::Next(next) => {
                    if definition.is_plain_next() {
                        assembly.default_ends(&from, false)?;
                    }
                    assembly
                        .transitions
                        .push(StateTransition::to(from, on, next)?);
                }
                Target::Finish => {
                    assembly.transitions.push(StateTransition::end(from, on)?);
                }
                Target::End(kind, options) => assembly.end_state(&from, on, kind, options)?,
            }
        }

        // Targets with no transitions of their own end the flow. Targets
        // missing from the registry are left for the table to report.
        let sources: HashSet<&str> = self
            .transitions
            .iter()
            .map(|definition| definition.from.as_str())
            .collect();
        let mut finished = HashSet::new();
        for target in self.transitions.iter().flat_map(TransitionDefinition::targets) {
            if sources.contains(target) || !finished.insert(target) {
                continue;
            }
            match registry.get(target) {
                Some(state) if matches!(state.as_ref(), State::End(_)) => {
                    assembly
                        .transitions
                        .push(StateTransition::end(state, ExitPattern::ANY)?);
                }
                Some(state) => assembly.default_ends(&state, true)?,
                None => {}
            }
        }

        let flow = SimpleFlow::new(&self.name, assembly.transitions);
        flow.initialize()?;
        Ok(flow)
    }
}

/// States available to flow definitions, by name.
#[derive(Clone, Debug, Default)]
pub struct StateRegistry {
    states: HashMap<String, Arc<State>>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a state under its own name, replacing any previous one.
    pub fn with(mut self, state: impl Into<State>) -> Self {
        self.register(state);
        self
    }

    pub fn register(&mut self, state: impl Into<State>) {
        let state = state.into();
        self.states.insert(state.name().to_string(), Arc::new(state));
    }

    pub fn get(&self, name: &str) -> Option<Arc<State>> {
        self.states.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{flow::Flow, step::helpers};

    const IMPORT: &str = r#"
name: import
transitions:
  - { from: extract, on: COMPLETED, next: load }
  - { from: extract, on: FAILED, stop: { restart: load } }
  - { from: load, on: "FAILED*", fail: { exit_code: LOAD_FAILED } }
  - { from: load, end: {} }
"#;

    fn registry() -> StateRegistry {
        StateRegistry::new()
            .with(State::step("extract", helpers::passthrough("extract", "COMPLETED")))
            .with(State::step("load", helpers::passthrough("load", "COMPLETED")))
    }

    #[test]
    fn test_yaml_parses_targets_and_defaults() {
        let definition = FlowDefinition::from_yaml(IMPORT).unwrap();

        assert_eq!(definition.name, "import");
        assert_eq!(
            definition.transitions[1],
            TransitionDefinition::stop("extract", "FAILED", "load")
        );
        assert_eq!(definition.transitions[3].on, None);
        assert_eq!(definition.transitions[3].pattern(), "*");
        assert_eq!(definition.transitions[3].end, Some(EndDefinition::default()));
        assert_eq!(
            definition.transitions[2].fail.as_ref().and_then(|f| f.exit_code.as_deref()),
            Some("LOAD_FAILED")
        );
    }

    #[test]
    fn test_build_creates_end_states() {
        let flow = FlowDefinition::from_yaml(IMPORT)
            .unwrap()
            .build(&registry())
            .unwrap();

        let mut names = flow.state_names();
        names.sort();
        assert_eq!(
            names,
            vec!["extract", "import.end2", "import.fail1", "import.stop0", "load"]
        );

        let stop = flow.state("import.stop0").unwrap();
        let State::End(stop) = stop.as_ref() else {
            panic!("expected an end state");
        };
        assert!(stop.status().is_stop());
        assert_eq!(stop.resume_from(), Some("load"));
        assert!(stop.abandons());

        let fail = flow.state("import.fail1").unwrap();
        let State::End(fail) = fail.as_ref() else {
            panic!("expected an end state");
        };
        assert_eq!(fail.exit_code(), "LOAD_FAILED");
        assert!(fail.is_end_state());

        let table = flow.table().unwrap();
        let next = table
            .resolve("import.stop0", &FlowExecutionStatus::stopped())
            .unwrap();
        assert_eq!(next.map(|s| s.name().to_string()).as_deref(), Some("load"));
        assert!(table
            .resolve("import.end2", &FlowExecutionStatus::completed())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_stop_restarting_same_state_does_not_abandon() {
        let definition = FlowDefinition::new(
            "retry",
            vec![
                TransitionDefinition::stop("extract", "FAILED", "extract"),
                TransitionDefinition::finish("extract", "*"),
            ],
        );
        let flow = definition.build(&registry()).unwrap();
        let stop = flow.state("retry.stop0").unwrap();
        let State::End(stop) = stop.as_ref() else {
            panic!("expected an end state");
        };
        assert!(!stop.abandons());
    }

    fn next_of(flow: &SimpleFlow, state: &str, status: &str) -> Option<String> {
        flow.table()
            .unwrap()
            .resolve(state, &FlowExecutionStatus::new(status))
            .unwrap()
            .map(|next| next.name().to_string())
    }

    #[test]
    fn test_plain_next_ends_flow_on_failure() {
        let flow = FlowDefinition::from_yaml(
            r#"
name: import
transitions:
  - { from: extract, next: load }
  - { from: load, end: {} }
"#,
        )
        .unwrap()
        .build(&registry())
        .unwrap();

        let mut names = flow.state_names();
        names.sort();
        assert_eq!(
            names,
            vec!["extract", "import.end2", "import.fail0", "import.unknown1", "load"]
        );
        assert_eq!(next_of(&flow, "extract", "FAILED").as_deref(), Some("import.fail0"));
        assert_eq!(next_of(&flow, "extract", "UNKNOWN").as_deref(), Some("import.unknown1"));
        assert_eq!(next_of(&flow, "extract", "COMPLETED").as_deref(), Some("load"));
        assert_eq!(next_of(&flow, "extract", "FAILED_VALIDATION").as_deref(), Some("load"));

        let unknown = flow.state("import.unknown1").unwrap();
        let State::End(unknown) = unknown.as_ref() else {
            panic!("expected an end state");
        };
        assert_eq!(unknown.status(), &FlowExecutionStatus::unknown());
    }

    #[test]
    fn test_target_without_transitions_ends_flow() {
        let flow = FlowDefinition::new(
            "import",
            vec![TransitionDefinition::next("extract", "COMPLETED", "load")],
        )
        .build(&registry())
        .unwrap();

        assert_eq!(next_of(&flow, "load", "FAILED").as_deref(), Some("import.fail0"));
        assert_eq!(next_of(&flow, "load", "UNKNOWN").as_deref(), Some("import.unknown1"));
        assert_eq!(next_of(&flow, "load", "COMPLETED").as_deref(), Some("import.end2"));
        assert_eq!(next_of(&flow, "import.end2", "COMPLETED"), None);
    }

    #[test]
    fn test_registered_end_state_target_ends_flow() {
        let registry = registry().with(EndState::new("done", FlowExecutionStatus::completed()));
        let flow = FlowDefinition::new(
            "import",
            vec![TransitionDefinition::next("extract", "*", "done")],
        )
        .build(&registry)
        .unwrap();

        let mut names = flow.state_names();
        names.sort();
        assert_eq!(names, vec!["done", "extract"]);
        assert_eq!(next_of(&flow, "done", "COMPLETED"), None);
    }

    #[test]
    fn test_stop_moves_on_to_its_own_target() {
        let mut stop = TransitionDefinition::stop("extract", "FAILED", "extract");
        if let Some(options) = stop.stop.as_mut() {
            options.to = Some("load".to_string());
        }
        let flow = FlowDefinition::new(
            "import",
            vec![
                stop,
                TransitionDefinition::next("extract", "*", "load"),
                TransitionDefinition::end("load", "*"),
            ],
        )
        .build(&registry())
        .unwrap();

        let state = flow.state("import.stop0").unwrap();
        let State::End(state) = state.as_ref() else {
            panic!("expected an end state");
        };
        assert_eq!(state.resume_from(), Some("extract"));
        assert!(!state.abandons());
        assert_eq!(next_of(&flow, "import.stop0", "STOPPED").as_deref(), Some("load"));
    }

    #[test]
    fn test_duplicate_patterns_are_rejected() {
        let duplicate = FlowDefinition::new(
            "job",
            vec![
                TransitionDefinition::next("extract", "COMPLETED", "load"),
                TransitionDefinition::fail("extract", "COMPLETED"),
                TransitionDefinition::end("load", "*"),
            ],
        );
        let err = duplicate.build(&registry()).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("Duplicate transition pattern"));

        // An omitted `on` is the same pattern as `*`.
        let mut implicit = TransitionDefinition::end("load", "*");
        implicit.on = None;
        let duplicate = FlowDefinition::new(
            "job",
            vec![
                TransitionDefinition::next("extract", "*", "load"),
                TransitionDefinition::finish("load", "*"),
                implicit,
            ],
        );
        assert!(duplicate.build(&registry()).unwrap_err().is_configuration());

        let mixed = FlowDefinition::new(
            "job",
            vec![
                TransitionDefinition::then("extract", "load"),
                TransitionDefinition::fail("extract", "FAILED"),
                TransitionDefinition::end("load", "*"),
            ],
        );
        let err = mixed.build(&registry()).unwrap_err();
        assert!(err.to_string().contains("next without on"));
    }

    #[test]
    fn test_invalid_definitions() {
        let unknown = FlowDefinition::new("job", vec![TransitionDefinition::end("ghost", "*")]);
        assert!(unknown.build(&registry()).unwrap_err().is_configuration());

        let mut ambiguous = TransitionDefinition::next("extract", "*", "load");
        ambiguous.end = Some(EndDefinition::default());
        let err = FlowDefinition::new("job", vec![ambiguous])
            .build(&registry())
            .unwrap_err();
        assert!(err.to_string().contains("more than one target"));

        let mut restart_on_end = TransitionDefinition::end("extract", "*");
        restart_on_end.end = Some(EndDefinition {
            restart: Some("load".to_string()),
            ..EndDefinition::default()
        });
        let err = FlowDefinition::new("job", vec![restart_on_end])
            .build(&registry())
            .unwrap_err();
        assert!(err.to_string().contains("only valid on stop"));

        let dangling = FlowDefinition::new(
            "job",
            vec![
                TransitionDefinition::next("extract", "*", "nowhere"),
                TransitionDefinition::finish("load", "*"),
            ],
        );
        assert!(dangling.build(&registry()).unwrap_err().is_configuration());

        assert!(FlowDefinition::from_yaml("name: [").is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let definition = FlowDefinition::from_yaml(IMPORT).unwrap();
        let json = definition.to_json().unwrap();
        assert_eq!(FlowDefinition::from_json(&json).unwrap(), definition);
    }
}
