//! # Workflow
//!
//! The orchestrator that turns a natural-language contract description
//! into a deployed-and-verified on-chain artifact.
//!
//! A workflow walks a fixed stage sequence — input parsing, generation,
//! compilation, dependency resolution, audit, deployment, verification,
//! output — with a retry/repair budget per stage. Critical stages failing
//! terminally mark the workflow as failed; everything else degrades. The
//! output stage runs on every path and always persists a diagnostic
//! bundle.

pub mod diagnostics;
pub mod engine;
pub mod options;
pub mod stages;
pub mod state;
pub mod summary;

pub use diagnostics::TempEnv;
pub use engine::Orchestrator;
pub use options::RunOptions;
pub use state::{StageOutcome, WorkflowState};
