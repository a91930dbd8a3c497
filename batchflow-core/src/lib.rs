//! # batchflow
//!
//! A flow engine for restartable batch jobs.
//!
//! ## Core Concepts
//!
//! - **Step**: A unit of work that updates its execution record and reports an exit status
//! - **State**: A named node of a flow: a step, a decision, a split or an end state
//! - **Transition**: A rule `(state, outcome pattern) -> next state | end`
//! - **Flow**: Runs states until a transition ends it or a stop point interrupts it
//! - **Executor**: Runs steps for a flow, persists checkpoints and answers restart questions
//!
//! ## Quick Start
//!
//! ```rust
//! use batchflow_core::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let flow = SimpleFlow::builder()
//!     .name("import")
//!     .state(State::step("extract", helpers::passthrough("extract", "COMPLETED")))
//!     .state(State::step("load", helpers::passthrough("load", "COMPLETED")))
//!     .on("extract", "COMPLETED", "load")
//!     .end("extract", "*")
//!     .end("load", "*")
//!     .build()?;
//!
//! assert_eq!(flow.name(), "import");
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod decider;
pub mod definition;
pub mod error;
pub mod execution;
pub mod executor;
pub mod flow;
pub mod job;
pub mod state;
pub mod status;
pub mod step;
pub mod table;
pub mod transition;

/// Convenient re-exports for common use.
pub mod prelude {
    pub use async_trait::async_trait;
    pub use eyre;
    pub use serde::{Deserialize, Serialize};
    pub use tokio;

    pub use crate::{
        context::{
            ExecutionContext, ExecutionContextBuilder, INTERRUPTED_STEP_KEY,
            RESTART_REQUESTED_KEY, RESUME_FROM_STATE_KEY,
        },
        decider::{FnDecider, JobExecutionDecider},
        definition::{EndDefinition, FlowDefinition, StateRegistry, TransitionDefinition},
        error::{FlowError, Result},
        execution::{JobExecution, StepExecution},
        executor::FlowExecutor,
        flow::{Flow, SimpleFlow, SimpleFlowBuilder},
        job::{FlowJob, JobFlowExecutor},
        state::{DecisionState, EndState, SplitState, State, StepState},
        status::{BatchStatus, FlowExecution, FlowExecutionStatus},
        step::{FnStep, PassthroughStep, Step, helpers},
        table::TransitionTable,
        transition::{ExitPattern, StateTransition, TransitionComparator, by_specificity},
    };
}
