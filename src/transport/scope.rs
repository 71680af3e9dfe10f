//! Scoped session ownership for a single probe call

use super::{disconnect_if_connected, BrokerSession, SessionError, SessionFactory};
use std::sync::Arc;

/// Owns every session a probe opens and disconnects them in [`SessionScope::close`]
///
/// Probes open sessions through the scope, run their body, then close the
/// scope on every path. Sessions that were never connected (or were already
/// dropped by the broker) are skipped during close.
pub struct SessionScope<'a, F: SessionFactory> {
    factory: &'a F,
    sessions: Vec<Arc<F::Session>>,
}

impl<'a, F: SessionFactory> SessionScope<'a, F> {
    pub fn new(factory: &'a F) -> Self {
        Self {
            factory,
            sessions: Vec::new(),
        }
    }

    /// Create a session owned by this scope without connecting it
    pub fn open(&mut self, client_id: Option<&str>) -> Result<Arc<F::Session>, SessionError> {
        let session = Arc::new(self.factory.create_session(client_id)?);
        self.sessions.push(session.clone());
        Ok(session)
    }

    /// Create and connect a session. A CONNACK with a failure code is an error.
    pub async fn connect(&mut self, client_id: Option<&str>) -> Result<Arc<F::Session>, SessionError> {
        let session = self.open(client_id)?;
        let ack = session.connect().await?;
        if !ack.code.is_success() {
            return Err(SessionError::ConnectRejected(ack.code));
        }
        Ok(session)
    }

    /// Number of sessions opened so far
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Disconnect every session that is still connected
    pub async fn close(self) {
        for session in &self.sessions {
            disconnect_if_connected(session.as_ref()).await;
        }
    }
}
