//! Caller-owned set of peer sessions and broadcast dispatch.

use std::sync::Arc;

use super::broadcast::{self, BroadcastMessage};
use super::session::{Handled, PeerSession};
use crate::srtp::{Result, SrtpError};

/// A broadcast applied to one local session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub session_id: u32,
    pub client_id: String,
    pub message: BroadcastMessage,
    pub handled: Handled,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Vec<Arc<PeerSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session ids must be unique within the registry.
    pub fn add(&mut self, session: Arc<PeerSession>) -> Result<()> {
        if self.get(session.session_id()).is_some() {
            return Err(SrtpError::bad_param(format!(
                "session {} already registered",
                session.session_id()
            )));
        }
        self.sessions.push(session);
        Ok(())
    }

    pub fn get(&self, session_id: u32) -> Option<&Arc<PeerSession>> {
        self.sessions.iter().find(|s| s.session_id() == session_id)
    }

    pub fn remove(&mut self, session_id: u32) -> Option<Arc<PeerSession>> {
        let at = self.sessions.iter().position(|s| s.session_id() == session_id)?;
        Some(self.sessions.remove(at))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PeerSession>> {
        self.sessions.iter()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Hand a received datagram to every session. A `sendindexes` from a
    /// party a session has not heard of is skipped for that session only.
    pub fn dispatch(&self, datagram: &str) -> Result<Vec<Delivery>> {
        let (client_id, message) = broadcast::decode_datagram(datagram)?;
        let mut delivered = Vec::new();
        for session in &self.sessions {
            match session.handle(&client_id, &message) {
                Ok(Handled::OwnMessage) => {}
                Ok(handled) => delivered.push(Delivery {
                    session_id: session.session_id(),
                    client_id: client_id.clone(),
                    message: message.clone(),
                    handled,
                }),
                Err(SrtpError::NotFound(what)) => {
                    tracing::debug!(session = session.session_id(), "Ignoring broadcast: {}", what);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(delivered)
    }

    /// Datagrams announcing every session, `notify` before `sendindexes`.
    pub fn announcements(&self) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(self.sessions.len() * 2);
        for session in &self.sessions {
            out.push(broadcast::encode_datagram(
                session.client_id(),
                &session.notify_message()?,
            ));
            out.push(broadcast::encode_datagram(
                session.client_id(),
                &session.send_indexes_message()?,
            ));
        }
        Ok(out)
    }
}
