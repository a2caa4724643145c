//! Error taxonomy and the log-and-continue combinator for best-effort steps.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::bus::{BusEvent, SharedBus};
use crate::model::Backend;

/// Errors reported by backend clients.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Network, auth or timeout failure; retried on the next tick
    #[error("{backend} backend unavailable: {message}")]
    Unavailable { backend: Backend, message: String },
    /// The device or firmware cannot perform the request at all
    #[error("not supported: {0}")]
    Unsupported(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// The backend understood the request and refused it
    #[error("rejected: {0}")]
    Rejected(String),
}

impl BackendError {
    pub fn cloud(message: impl Into<String>) -> Self {
        Self::Unavailable {
            backend: Backend::Cloud,
            message: message.into(),
        }
    }

    pub fn local(message: impl Into<String>) -> Self {
        Self::Unavailable {
            backend: Backend::LocalProtocol,
            message: message.into(),
        }
    }
}

/// Errors surfaced by the player core to its host.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// A backend call failed; one kind per command, cause kept for diagnostics
    #[error("{operation} failed: backend unavailable")]
    BackendUnavailable {
        operation: &'static str,
        #[source]
        source: BackendError,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Name or id did not resolve even after a forced device refresh
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    /// Shutdown fired while a compound command was waiting
    #[error("command cancelled")]
    Cancelled,
}

impl PlayerError {
    pub fn backend(operation: &'static str, source: BackendError) -> Self {
        Self::BackendUnavailable { operation, source }
    }

    /// Backend cause, if this error came from a backend call.
    pub fn backend_cause(&self) -> Option<&BackendError> {
        match self {
            Self::BackendUnavailable { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// A compound operation that completed through a fallback path.
///
/// Not an error: returned inside successful outcomes and published as
/// [`BusEvent::PartialDegradation`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Degradation {
    pub operation: String,
    pub reason: String,
}

/// Await a best-effort step: on failure log it, publish
/// [`BusEvent::BestEffortFailed`] and continue with `None`.
pub async fn best_effort<T, F>(bus: &SharedBus, step: &str, fut: F) -> Option<T>
where
    F: Future<Output = Result<T, BackendError>>,
{
    match fut.await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("best-effort step '{}' failed, continuing: {}", step, e);
            bus.publish(BusEvent::BestEffortFailed {
                step: step.to_string(),
                error: e.to_string(),
            });
            None
        }
    }
}
