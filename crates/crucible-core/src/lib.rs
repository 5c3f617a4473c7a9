//! CRUCIBLE Core
//!
//! Core execution engine for conformance test suites. This crate provides
//! the runnable tree with suite-option resolution, the run state machine
//! (including suspend/resume on external callbacks), requirement coverage,
//! session-scoped scratch storage, and result aggregation.

pub mod coordinator;
pub mod error;
pub mod loader;
pub mod outcome;
pub mod procedure;
pub mod repository;
pub mod requirements;
pub mod result;
pub mod run;
pub mod runnable;
pub mod scratch;
pub mod session;
pub mod waits;

// Re-export commonly used types
pub use coordinator::{Engine, spawn_expiry_sweep};
pub use error::{CrucibleError, ErrorKind};
pub use loader::{
    InputField, NodeDefinition, OptionDefinition, ProcedureRegistry, SuiteDefinition, build_suite,
    load_suite,
};
pub use outcome::{
    AggregateStatus, Message, MessageLevel, RequestDirection, RequestRecord, ResultStatus,
    TestResult, status_of,
};
pub use procedure::{ExternalEvent, FnProcedure, Outcome, TestContext, TestProcedure, WaitRequest};
pub use repository::{InMemoryRepository, RunRepository};
pub use requirements::{coverage, verified_by};
pub use result::Result;
pub use run::{RunHandle, RunStatus, TestRun};
pub use runnable::{
    BoundTest, EffectiveTree, InputDefinition, OutputDefinition, RunnableIndex, RunnableKind,
    RunnableNode, SelectedOptions, SuiteOption, TreeResolver, WhenPredicate,
};
pub use scratch::{ScratchHandle, ScratchStore};
pub use session::TestSession;
pub use waits::{WaitRegistry, WaitToken};

/// Initialize the tracing subscriber for logging
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("crucible=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
