//! What a session has learned about the other peers from their broadcasts.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::srtp::{Result, SrtpError};

/// One remote peer session, keyed by `(client id, session id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteParty {
    pub client_id: String,
    pub session_id: u32,
    pub addr: SocketAddr,
    pub ssrc: u32,
    pub seq: u16,
    pub roc: u32,
    /// First SRTCP index from the last `notify`.
    pub rtcp_start: u32,
    /// Outbound indices from the last `sendindexes`, if any arrived.
    pub published: Option<(u64, u64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// First notify from this party.
    Joined,
    /// Same SSRC as before.
    Refreshed,
    /// The party restarted with a new SSRC.
    SsrcChanged { previous: u32 },
}

#[derive(Debug, Default)]
pub struct RemotePartyTable {
    parties: HashMap<(String, u32), RemoteParty>,
}

impl RemotePartyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a `notify`. Later messages overwrite earlier ones.
    #[allow(clippy::too_many_arguments)]
    pub fn notify(
        &mut self,
        client_id: &str,
        session_id: u32,
        addr: SocketAddr,
        ssrc: u32,
        seq: u16,
        roc: u32,
        rtcp_start: u32,
    ) -> NotifyOutcome {
        let key = (client_id.to_string(), session_id);
        match self.parties.get_mut(&key) {
            Some(party) => {
                let previous = party.ssrc;
                party.addr = addr;
                party.ssrc = ssrc;
                party.seq = seq;
                party.roc = roc;
                party.rtcp_start = rtcp_start;
                if previous == ssrc {
                    NotifyOutcome::Refreshed
                } else {
                    party.published = None;
                    NotifyOutcome::SsrcChanged { previous }
                }
            }
            None => {
                self.parties.insert(
                    key,
                    RemoteParty {
                        client_id: client_id.to_string(),
                        session_id,
                        addr,
                        ssrc,
                        seq,
                        roc,
                        rtcp_start,
                        published: None,
                    },
                );
                NotifyOutcome::Joined
            }
        }
    }

    /// Record a `sendindexes`. The party must have sent `notify` first.
    pub fn send_indexes(
        &mut self,
        client_id: &str,
        session_id: u32,
        rtp_index: u64,
        rtcp_index: u64,
    ) -> Result<()> {
        let party = self
            .parties
            .get_mut(&(client_id.to_string(), session_id))
            .ok_or_else(|| not_found(client_id, session_id))?;
        party.published = Some((rtp_index, rtcp_index));
        Ok(())
    }

    pub fn get(&self, client_id: &str, session_id: u32) -> Option<&RemoteParty> {
        self.parties.get(&(client_id.to_string(), session_id))
    }

    /// Like [`get`](Self::get), failing with `NullPtr` for a party that
    /// never announced itself.
    pub fn require(&self, client_id: &str, session_id: u32) -> Result<&RemoteParty> {
        self.get(client_id, session_id)
            .ok_or(SrtpError::NullPtr("valid remote party"))
    }

    pub fn remove(&mut self, client_id: &str, session_id: u32) -> Option<RemoteParty> {
        self.parties.remove(&(client_id.to_string(), session_id))
    }

    pub fn clear(&mut self) {
        self.parties.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteParty> {
        self.parties.values()
    }

    pub fn len(&self) -> usize {
        self.parties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parties.is_empty()
    }
}

fn not_found(client_id: &str, session_id: u32) -> SrtpError {
    SrtpError::not_found(format!("remote party {}/{}", client_id, session_id))
}
