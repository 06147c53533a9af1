//! Shared domain types for blockflow.
//!
//! This crate contains the data model consumed and produced by the execution
//! engine: the workflow graph (blocks and connections), per-block results,
//! recovery records, trace events, capability requests, the error taxonomy,
//! and engine configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod capability;
pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod graph;
pub mod recovery;
