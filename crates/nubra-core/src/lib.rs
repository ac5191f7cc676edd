//! # Nubra Core
//!
//! Session model, classification, context compaction, conversation control
//! and reply rendering for the Nubra Assistant. The hub and the CLI both
//! build on the types defined here.

pub mod assistant;
pub mod bus;
pub mod classifier;
pub mod compactor;
pub mod config;
pub mod controller;
pub mod error;
pub mod message;
pub mod protocol;
pub mod provider;
pub mod renderer;
pub mod session;
pub mod store;

#[cfg(test)]
mod testing;

pub use assistant::{Assistant, AssistantCommand};
pub use error::{NubraError, Result};
