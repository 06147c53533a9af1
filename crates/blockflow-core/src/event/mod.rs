//! Trace event distribution.
//!
//! - `bus` -- broadcast channel wrapper for live trace subscribers

pub mod bus;
