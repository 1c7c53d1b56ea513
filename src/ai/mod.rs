//! AI response generation — client seam, retry, parsing, templates, engine.

pub mod analysis;
pub mod client;
pub mod engine;
pub mod retry;
pub mod templates;

pub use client::{HttpInferenceClient, InferenceClient};
pub use engine::{AiOutcome, ResponseEngine, content_hash};
pub use templates::TemplateSet;
