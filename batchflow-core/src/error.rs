//! Error types for batchflow.

use thiserror::Error;

/// Result type for flow operations.
pub type Result<T> = std::result::Result<T, FlowError>;

/// Error types that can occur while building or running a flow.
#[derive(Error, Debug)]
pub enum FlowError {
    /// Invalid flow configuration, raised before anything runs.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transition resolution failed while the flow was running.
    #[error("Flow execution error in flow={flow} at state={state}: {message}")]
    Execution {
        /// Flow name
        flow: String,
        /// State at which the error occurred
        state: String,
        /// What went wrong
        message: String,
    },

    /// A state's handler failed with an error that was not already a
    /// flow execution error.
    #[error("Ended flow={flow} at state={state} with exception: {source}")]
    StateFailed {
        /// Flow name
        flow: String,
        /// State whose handler failed
        state: String,
        /// Underlying error
        #[source]
        source: Box<FlowError>,
    },

    /// Step implementation error.
    #[error("Step {step} failed: {message}")]
    Step {
        /// Step name
        step: String,
        /// Failure description
        message: String,
    },

    /// A stop was requested while the job was running.
    #[error("Job interrupted at step {0}")]
    Interrupted(String),

    /// The job cannot be restarted from its previous execution.
    #[error("Restart error: {0}")]
    Restart(String),

    /// Serialization/Deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML definition error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Generic error.
    #[error("Error: {0}")]
    Generic(#[from] eyre::Report),
}

impl FlowError {
    /// Create a new configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new execution error.
    pub fn execution(
        flow: impl Into<String>,
        state: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Execution {
            flow: flow.into(),
            state: state.into(),
            message: msg.into(),
        }
    }

    /// Create a new step error.
    pub fn step(step: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Step {
            step: step.into(),
            message: msg.into(),
        }
    }

    /// Create a new restart error.
    pub fn restart(msg: impl Into<String>) -> Self {
        Self::Restart(msg.into())
    }

    /// Create a new interruption error for the step that saw the stop request.
    pub fn interrupted(step: impl Into<String>) -> Self {
        Self::Interrupted(step.into())
    }

    /// Wrap a handler failure with the flow and state it happened in.
    ///
    /// Flow execution errors are returned unchanged.
    pub fn wrap_state_failure(self, flow: &str, state: &str) -> Self {
        if self.is_flow_execution() {
            return self;
        }
        Self::StateFailed {
            flow: flow.to_string(),
            state: state.to_string(),
            source: Box::new(self),
        }
    }

    /// Returns true for errors raised by the run loop itself.
    pub fn is_flow_execution(&self) -> bool {
        matches!(self, Self::Execution { .. } | Self::StateFailed { .. })
    }

    /// Returns true if the error, or the handler failure it wraps, is an
    /// interruption.
    pub fn is_interrupted(&self) -> bool {
        match self {
            Self::Interrupted(_) => true,
            Self::StateFailed { source, .. } => source.is_interrupted(),
            _ => false,
        }
    }

    /// Returns true for errors raised while building a flow.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
