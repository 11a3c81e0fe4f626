//! Core error definitions for the Agentfarm orchestration engine.
//!
//! This crate provides the foundational types shared across all Agentfarm crates.
//!
//! # Main types
//!
//! - [`AgentfarmError`]: Unified error enum for all Agentfarm subsystems.
//! - [`AgentfarmResult`]: Convenience alias for `Result<T, AgentfarmError>`.

/// Error types shared by every Agentfarm crate.
pub mod error;

pub use error::{AgentfarmError, AgentfarmResult};
