//! Error taxonomy shared by the engine and its observers.
//!
//! - `ValidationReport` / `Violation`: graph malformed, returned before any execution.
//! - `CapabilityError`: a single capability invocation failed.
//! - `FailureReason`: serializable explanation attached to a failed block result.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// What kind of rule a graph violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    EmptyGraph,
    DuplicateBlockId,
    DanglingConnection,
    SelfLoop,
    Cycle,
    UnsupportedKind,
    MissingProperty,
    InvalidProperty,
    InvalidConnection,
    InvalidRecovery,
}

/// A single graph rule violation, pointing at the offending block or connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    /// Offending block, when the violation is block-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    /// Offending connection as `(source, target)`, when connection-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<(String, String)>,
    pub message: String,
}

impl Violation {
    pub fn block(kind: ViolationKind, block_id: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            block_id: Some(block_id.to_string()),
            connection: None,
            message: message.into(),
        }
    }

    pub fn connection(
        kind: ViolationKind,
        source: &str,
        target: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            block_id: None,
            connection: Some((source.to_string(), target.to_string())),
            message: message.into(),
        }
    }

    pub fn graph(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            block_id: None,
            connection: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.block_id, &self.connection) {
            (Some(id), _) => write!(f, "block '{id}': {}", self.message),
            (None, Some((s, t))) => write!(f, "connection '{s}' -> '{t}': {}", self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

/// Outcome of graph validation. Invalidity is a value, never a panic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Error)]
#[error("graph validation failed with {} violation(s)", .violations.len())]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn push(&mut self, violation: Violation) {
        self.violations.push(violation);
    }

    /// Whether any violation of the given kind was recorded.
    pub fn has(&self, kind: ViolationKind) -> bool {
        self.violations.iter().any(|v| v.kind == kind)
    }
}

// ---------------------------------------------------------------------------
// Capability errors
// ---------------------------------------------------------------------------

/// Typed failure class reported by capability providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityErrorKind {
    Timeout,
    Auth,
    RateLimit,
    InvalidInput,
    /// The provider failed for any other reason (5xx, transport, parse).
    Provider,
}

impl fmt::Display for CapabilityErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CapabilityErrorKind::Timeout => "timeout",
            CapabilityErrorKind::Auth => "auth",
            CapabilityErrorKind::RateLimit => "rate_limit",
            CapabilityErrorKind::InvalidInput => "invalid_input",
            CapabilityErrorKind::Provider => "provider",
        };
        f.write_str(s)
    }
}

/// One failed capability invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind} error: {detail}")]
pub struct CapabilityError {
    pub kind: CapabilityErrorKind,
    pub detail: String,
}

impl CapabilityError {
    pub fn new(kind: CapabilityErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(CapabilityErrorKind::Timeout, detail)
    }

    pub fn invalid_input(detail: impl Into<String>) -> Self {
        Self::new(CapabilityErrorKind::InvalidInput, detail)
    }

    pub fn provider(detail: impl Into<String>) -> Self {
        Self::new(CapabilityErrorKind::Provider, detail)
    }
}

// ---------------------------------------------------------------------------
// Failure reasons (trace-side taxonomy)
// ---------------------------------------------------------------------------

/// Why a block did not produce a normal output. Carried on `BlockResult`
/// and on trace events so observers can explain a non-completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureReason {
    /// A single invocation failed (before or without recovery).
    #[error("{0}")]
    Capability(CapabilityError),

    /// Every recovery step was exhausted.
    #[error("recovery exhausted after {attempts} attempt(s): {last_error}")]
    RecoveryExhausted { attempts: u32, last_error: CapabilityError },

    /// Automatic recovery stopped for a manual decision.
    #[error("escalated: {reason}")]
    Escalated { reason: String },

    /// Failed, but a compensating action ran.
    #[error("compensated after failure: {last_error}")]
    Compensated { last_error: CapabilityError },

    /// The run was cancelled while the block was in flight.
    #[error("cancelled")]
    Cancelled,
}

impl From<CapabilityError> for FailureReason {
    fn from(e: CapabilityError) -> Self {
        FailureReason::Capability(e)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
