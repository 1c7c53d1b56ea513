//! Pipeline — the orchestrator and its periodic driver.

pub mod orchestrator;

pub use orchestrator::{Orchestrator, PassOutcome, spawn_driver};
