//! Workflow engine core: graph parsing, validation, scheduling, and recovery.
//!
//! - `definition` -- YAML/JSON graph parsing, filesystem load/save
//! - `validate` -- structural validation collecting every violation
//! - `dag` -- dependency index, topological order, parallel waves
//! - `operation` -- typed block operations parsed from kind + properties
//! - `template` -- `{{ path }}` placeholder resolution
//! - `expression` -- JEXL evaluator for condition blocks
//! - `context` -- append-only run record and trace log
//! - `runner` -- single-attempt block execution
//! - `recovery` -- Recovery Path state machine
//! - `scheduler` -- dependency-driven parallel dispatch
//! - `engine` -- run registry, cancellation, and handles

pub mod context;
pub mod dag;
pub mod definition;
pub mod engine;
pub mod expression;
pub mod operation;
pub mod recovery;
pub mod runner;
pub mod scheduler;
pub mod template;
pub mod validate;
