//! Parallel explicit-state exploration over a deduplicating state store.

pub mod explorer;
pub mod frontier;
pub mod model;
pub mod settings;
pub mod stats;

pub use explorer::{
    CheckerKind, ExploreConfig, ExploreError, ExploreOutcome, ExploreResult, Explorer,
    ProgressCounters, TransitionHook,
};
pub use frontier::RunPhase;
pub use model::{Model, ModelContext, Transition};
pub use settings::{ConfigError, Settings};
pub use stats::{RunSummary, SizeHistogram, WorkerStats};
