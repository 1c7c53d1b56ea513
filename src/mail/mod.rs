//! Mail handling — types, content extraction, transports, reply composition.

pub mod extract;
pub mod reply;
pub mod transport;
pub mod types;
