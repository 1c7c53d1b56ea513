//! MailMind — automated inbox triage and reply generation.

pub mod ai;
pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod mail;
pub mod pipeline;
pub mod store;

pub use error::{Error, Result};
