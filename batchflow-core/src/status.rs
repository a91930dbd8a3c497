//! Outcome codes produced by states and the statuses of execution records.

use std::{cmp::Ordering, fmt};

use serde::{Deserialize, Serialize};

/// Severity class of a [`FlowExecutionStatus`].
///
/// Ordered from least to most severe. Aggregation of parallel outcomes keeps
/// the most severe one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StatusKind {
    /// Ran to completion (also the class of custom codes)
    Completed,
    /// Suspended at a stop point
    Stopped,
    /// Ended in failure
    Failed,
    /// Outcome could not be determined
    Unknown,
}

impl StatusKind {
    fn prefix(self) -> &'static str {
        match self {
            StatusKind::Completed => FlowExecutionStatus::COMPLETED,
            StatusKind::Stopped => FlowExecutionStatus::STOPPED,
            StatusKind::Failed => FlowExecutionStatus::FAILED,
            StatusKind::Unknown => FlowExecutionStatus::UNKNOWN,
        }
    }

    /// Classify a code by prefix; anything unrecognised ranks as completed.
    pub fn of(code: &str) -> Self {
        [StatusKind::Unknown, StatusKind::Failed, StatusKind::Stopped]
            .into_iter()
            .find(|kind| code.starts_with(kind.prefix()))
            .unwrap_or(StatusKind::Completed)
    }
}

/// The outcome of handling a state, used to select the next transition.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowExecutionStatus {
    name: String,
}

impl FlowExecutionStatus {
    pub const COMPLETED: &'static str = "COMPLETED";
    pub const STOPPED: &'static str = "STOPPED";
    pub const FAILED: &'static str = "FAILED";
    pub const UNKNOWN: &'static str = "UNKNOWN";
    pub const PENDING: &'static str = "PENDING";

    /// Create a status with an arbitrary code.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn completed() -> Self {
        Self::new(Self::COMPLETED)
    }

    pub fn stopped() -> Self {
        Self::new(Self::STOPPED)
    }

    pub fn failed() -> Self {
        Self::new(Self::FAILED)
    }

    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN)
    }

    pub fn pending() -> Self {
        Self::new(Self::PENDING)
    }

    /// The status code.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Severity class of this code.
    pub fn kind(&self) -> StatusKind {
        StatusKind::of(&self.name)
    }

    /// True if the code denotes a stop point.
    pub fn is_stop(&self) -> bool {
        self.name.starts_with(Self::STOPPED)
    }

    /// True if the code denotes a failure.
    pub fn is_fail(&self) -> bool {
        self.name.starts_with(Self::FAILED)
    }

    /// True if the code denotes completion.
    pub fn is_complete(&self) -> bool {
        self.name.starts_with(Self::COMPLETED)
    }

    /// True if the code ends a flow: completion, failure or stop.
    pub fn is_end(&self) -> bool {
        self.is_stop() || self.is_fail() || self.is_complete()
    }

    pub fn is_unknown(&self) -> bool {
        self.name == Self::UNKNOWN
    }

    pub fn is_pending(&self) -> bool {
        self.name == Self::PENDING
    }
}

impl Default for FlowExecutionStatus {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for FlowExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for FlowExecutionStatus {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl PartialOrd for FlowExecutionStatus {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FlowExecutionStatus {
    fn cmp(&self, other: &Self) -> Ordering {
        self.kind()
            .cmp(&other.kind())
            .then_with(|| self.name.cmp(&other.name))
    }
}

/// Result of a flow run: the state it ended at and the last outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowExecution {
    /// Name of the last state handled
    pub name: String,
    /// Outcome of that state
    pub status: FlowExecutionStatus,
}

impl FlowExecution {
    pub fn new(name: impl Into<String>, status: FlowExecutionStatus) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }
}

impl PartialOrd for FlowExecution {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FlowExecution {
    fn cmp(&self, other: &Self) -> Ordering {
        self.status
            .cmp(&other.status)
            .then_with(|| self.name.cmp(&other.name))
    }
}

/// Lifecycle status of a job or step execution record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Starting,
    Started,
    Stopping,
    Stopped,
    Completed,
    Failed,
    Abandoned,
    Unknown,
}

impl BatchStatus {
    /// True while the execution is in progress.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            BatchStatus::Starting | BatchStatus::Started | BatchStatus::Stopping
        )
    }

    /// Record status implied by a flow outcome.
    pub fn from_outcome(status: &FlowExecutionStatus) -> Self {
        match status.kind() {
            StatusKind::Completed => BatchStatus::Completed,
            StatusKind::Stopped => BatchStatus::Stopped,
            StatusKind::Failed => BatchStatus::Failed,
            StatusKind::Unknown => BatchStatus::Unknown,
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchStatus::Starting => "STARTING",
            BatchStatus::Started => "STARTED",
            BatchStatus::Stopping => "STOPPING",
            BatchStatus::Stopped => "STOPPED",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Failed => "FAILED",
            BatchStatus::Abandoned => "ABANDONED",
            BatchStatus::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}
