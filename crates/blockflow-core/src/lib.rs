//! Execution engine for blockflow workflow graphs.
//!
//! This crate defines the capability port (`CapabilityProvider`) that the
//! infrastructure layer implements, plus graph validation, DAG ordering, the
//! block runner, the recovery controller, and the scheduler. It depends only
//! on `blockflow-types` -- never on `blockflow-infra` or any HTTP/IO crate.

pub mod capability;
pub mod event;
pub mod workflow;
