//! # Taskwire
//!
//! Operator CLI for wiring task network namespaces through CNI plugins.
//! The heavy lifting lives in `taskwire-network`; this crate parses
//! arguments and prints results.

#![warn(missing_docs)]

pub mod cli;
