//! # taskwire-common
//!
//! Shared types for the Taskwire workspace.
//!
//! This crate provides functionality used across the Taskwire crates:
//! - The error taxonomy for configuration building, plugin invocation and
//!   in-namespace command execution
//! - The plugin environment, resolved once when the client is composed

#![warn(missing_docs)]

pub mod config;
pub mod error;

pub use config::PluginEnvironment;
pub use error::{TaskwireError, TaskwireResult};
