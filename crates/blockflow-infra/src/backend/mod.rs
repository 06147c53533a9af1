//! Model backend provider.
//!
//! [`BackendProvider`] implements the
//! [`CapabilityProvider`](blockflow_core::capability::provider::CapabilityProvider)
//! port against the model backend's HTTP API:
//!
//! | capability  | endpoint              |
//! |-------------|-----------------------|
//! | `chat`      | `POST /chat`          |
//! | `reasoning` | `POST /reasoning`     |
//! | `rag`       | `POST /rag/query`     |
//! | `agent`     | `POST /agent/execute` |

pub mod client;
pub mod types;

pub use client::{BackendError, BackendProvider};
