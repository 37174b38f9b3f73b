//! Session registry
//!
//! Owns every live backend session in registration order. Registration
//! order is load-bearing: listings are merged and shutdown runs in terms
//! of it.

use std::sync::Arc;

use orchestra_types::errors::{GatewayError, GatewayResult};
use orchestra_types::NAMESPACE_SEPARATOR;

use crate::session::BackendSession;

#[derive(Default)]
pub struct SessionRegistry {
    entries: Vec<Arc<BackendSession>>,
}

/// One backend that failed to shut down cleanly
#[derive(Debug)]
pub struct ShutdownFailure {
    pub backend_id: String,
    pub error: GatewayError,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under its backend id
    ///
    /// Ids containing the namespace separator are rejected here so composite
    /// identifiers stay unambiguous.
    pub fn register(&mut self, session: Arc<BackendSession>) -> GatewayResult<()> {
        let id = session.id();

        if id.is_empty() {
            return Err(GatewayError::Config("backend id must not be empty".to_string()));
        }
        if id.contains(NAMESPACE_SEPARATOR) {
            return Err(GatewayError::Config(format!(
                "backend id '{}' must not contain '{}'",
                id, NAMESPACE_SEPARATOR
            )));
        }
        if self.entries.iter().any(|entry| entry.id() == id) {
            return Err(GatewayError::DuplicateBackend(id.to_string()));
        }

        self.entries.push(session);
        Ok(())
    }

    pub fn lookup(&self, backend_id: &str) -> GatewayResult<Arc<BackendSession>> {
        self.entries
            .iter()
            .find(|entry| entry.id() == backend_id)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownBackend(backend_id.to_string()))
    }

    /// Sessions in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<BackendSession>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Close every session in reverse registration order
    ///
    /// A failing close never stops the sweep; failures are collected and
    /// returned so the caller can report them.
    pub async fn shutdown_all(&self) -> Vec<ShutdownFailure> {
        let mut failures = Vec::new();

        for session in self.entries.iter().rev() {
            tracing::debug!(backend_id = session.id(), "closing backend session");
            if let Err(error) = session.close().await {
                tracing::warn!(
                    backend_id = session.id(),
                    %error,
                    "backend failed to shut down cleanly"
                );
                failures.push(ShutdownFailure {
                    backend_id: session.id().to_string(),
                    error,
                });
            }
        }

        failures
    }
}
