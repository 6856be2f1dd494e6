//! Flow execution engine
//!
//! A [`TableSource`] hands each input column to the [`Stage`] bound to it, the
//! [`Orchestrator`] runs stages and advances through [`Junction`]s in readiness
//! order, and a [`TableSink`] merges stage outputs into the result file.

pub mod junction;
pub mod ops;
pub mod orchestrator;
pub mod queue;
pub mod sink;
pub mod source;
pub mod stage;

pub use junction::Junction;
pub use orchestrator::{Orchestrator, Registrant, RunOutcome, RunSummary, StageTiming};
pub use queue::ReadinessQueue;
pub use sink::{merge, TableSink};
pub use source::TableSource;
pub use stage::{Operation, RunResult, Stage, StageBuilder};
