//! A test session as seen by the key-exchange protocol.
//!
//! [`PeerSession`] puts an [`SrtpSession`] behind the addressing the interop
//! tests use: remote sources are named by the `(client id, session id)` of
//! the peer that announced them, and scheduled key changes are given as an
//! offset from an index the two sides have exchanged.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;

use super::broadcast::BroadcastMessage;
use super::remote::{NotifyOutcome, RemoteParty, RemotePartyTable};
use crate::srtp::{split_rtp_index, LocalIdentity, Result, SrtpError, SrtpSession, StreamKind};

/// What a received broadcast did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// Sent by this session itself.
    OwnMessage,
    Notify(NotifyOutcome),
    Indexes,
}

pub struct PeerSession {
    client_id: String,
    session_id: u32,
    local: SocketAddr,
    srtp: Arc<SrtpSession>,
    remotes: Mutex<RemotePartyTable>,
    /// `(rtp, rtcp)` from the last [`get_local_indexes`](Self::get_local_indexes).
    local_indexes: Mutex<Option<(u64, u64)>>,
}

impl PeerSession {
    pub fn new(client_id: &str, session_id: u32, local: SocketAddr, srtp: Arc<SrtpSession>) -> Self {
        Self {
            client_id: client_id.to_string(),
            session_id,
            local,
            srtp,
            remotes: Mutex::new(RemotePartyTable::new()),
            local_indexes: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn srtp(&self) -> &Arc<SrtpSession> {
        &self.srtp
    }

    pub fn init(&self, local: LocalIdentity) -> Result<()> {
        self.srtp.init(local)
    }

    /// Close the SRTP session and forget every remote party.
    pub fn close(&self) -> Result<()> {
        *self.local_indexes.lock() = None;
        self.remotes.lock().clear();
        self.srtp.close()
    }

    pub fn remote(&self, client_id: &str, session_id: u32) -> Option<RemoteParty> {
        self.remotes.lock().get(client_id, session_id).cloned()
    }

    pub fn remotes(&self) -> Vec<RemoteParty> {
        self.remotes.lock().iter().cloned().collect()
    }

    fn require(&self, client_id: &str, session_id: u32) -> Result<RemoteParty> {
        self.remotes.lock().require(client_id, session_id).cloned()
    }

    // --- master keys ---

    pub fn add_master_key(&self, mki: &[u8], key: &[u8], salt: &[u8]) -> Result<()> {
        self.srtp.add_master_key(mki, key, salt)
    }

    pub fn remove_master_key(&self, mki: &[u8]) -> Result<()> {
        self.srtp.remove_master_key(mki)
    }

    pub fn remove_all_master_keys(&self) -> Result<()> {
        self.srtp.remove_all_master_keys()
    }

    // --- remote sources ---

    /// Start receiving `kind` from a party that has sent `notify`.
    pub fn add_remote_source(&self, client_id: &str, session_id: u32, kind: StreamKind) -> Result<()> {
        let party = self.require(client_id, session_id)?;
        let start = match kind {
            StreamKind::Rtp => party.seq as u32,
            StreamKind::Rtcp => party.rtcp_start,
        };
        self.srtp.add_remote_source(party.ssrc, kind, party.roc, start)
    }

    pub fn remove_remote_source(&self, client_id: &str, session_id: u32, kind: StreamKind) -> Result<()> {
        let party = self.require(client_id, session_id)?;
        self.srtp.remove_remote_source(party.ssrc, kind)
    }

    pub fn remove_all_remote_sources(&self) -> Result<()> {
        self.srtp.remove_all_remote_sources()?;
        self.remotes.lock().clear();
        Ok(())
    }

    pub fn set_source_key(
        &self,
        client_id: &str,
        session_id: u32,
        mki: Option<&[u8]>,
        kind: StreamKind,
        share_trigger: bool,
    ) -> Result<()> {
        let party = self.require(client_id, session_id)?;
        self.srtp.set_source_key(party.ssrc, kind, mki, share_trigger)
    }

    /// Schedule a receive-side key change `offset` indices past the index
    /// the party last published with `sendindexes`.
    pub fn schedule_source_key_at(
        &self,
        client_id: &str,
        session_id: u32,
        mki: Option<&[u8]>,
        kind: StreamKind,
        offset: u64,
        share_trigger: bool,
    ) -> Result<()> {
        let party = self.require(client_id, session_id)?;
        let (rtp, rtcp) = party
            .published
            .ok_or(SrtpError::NullPtr("published remote indexes"))?;
        let base = match kind {
            StreamKind::Rtp => rtp,
            StreamKind::Rtcp => rtcp,
        };
        let threshold = base.wrapping_add(offset) & kind.wrap();
        self.srtp
            .schedule_source_key_at(party.ssrc, kind, mki, threshold, share_trigger)
    }

    // --- destinations ---

    pub fn set_destination_key(
        &self,
        kind: StreamKind,
        addr: SocketAddr,
        mki: Option<&[u8]>,
        share_trigger: bool,
    ) -> Result<()> {
        self.srtp.set_destination_key(kind, addr, mki, share_trigger)
    }

    /// Schedule a send-side key change `offset` indices past the local
    /// index last obtained with [`get_local_indexes`](Self::get_local_indexes),
    /// or past the current one if none was taken.
    pub fn schedule_destination_key_at(
        &self,
        kind: StreamKind,
        addr: SocketAddr,
        mki: Option<&[u8]>,
        offset: u64,
        share_trigger: bool,
    ) -> Result<()> {
        let stored = *self.local_indexes.lock();
        let (rtp, rtcp) = match stored {
            Some(indexes) => indexes,
            None => self.srtp.local_indexes()?,
        };
        let base = match kind {
            StreamKind::Rtp => rtp,
            StreamKind::Rtcp => rtcp,
        };
        let threshold = base.wrapping_add(offset) & kind.wrap();
        self.srtp
            .schedule_destination_key_at(kind, addr, mki, threshold, share_trigger)
    }

    /// Current outbound indices towards `peer`, remembered as the base for
    /// later destination schedules.
    pub fn get_local_indexes(&self, peer: IpAddr, rtp_port: u16, rtcp_port: u16) -> Result<(u64, u64)> {
        let rtp = self
            .srtp
            .destination_index(StreamKind::Rtp, SocketAddr::new(peer, rtp_port))?;
        let rtcp = self
            .srtp
            .destination_index(StreamKind::Rtcp, SocketAddr::new(peer, rtcp_port))?;
        *self.local_indexes.lock() = Some((rtp, rtcp));
        Ok((rtp, rtcp))
    }

    // --- broadcast ---

    /// This session's `notify` announcement.
    pub fn notify_message(&self) -> Result<BroadcastMessage> {
        let ssrc = self.srtp.local_ssrc()?;
        let (rtp, rtcp) = self.srtp.local_indexes()?;
        let (roc, seq) = split_rtp_index(rtp);
        Ok(BroadcastMessage::Notify {
            addr: self.local,
            ssrc,
            seq,
            roc,
            index: rtcp as u32,
            session_id: self.session_id,
        })
    }

    /// This session's `sendindexes` announcement. Publishes the indices
    /// taken by the last [`get_local_indexes`](Self::get_local_indexes) so
    /// both sides schedule against the same base.
    pub fn send_indexes_message(&self) -> Result<BroadcastMessage> {
        let stored = *self.local_indexes.lock();
        let (rtp_index, rtcp_index) = match stored {
            Some(indexes) => indexes,
            None => self.srtp.local_indexes()?,
        };
        Ok(BroadcastMessage::SendIndexes {
            addr: self.local,
            rtp_index,
            rtcp_index,
            session_id: self.session_id,
        })
    }

    /// Apply a broadcast from `client_id`. Last write wins.
    pub fn handle(&self, client_id: &str, message: &BroadcastMessage) -> Result<Handled> {
        match *message {
            BroadcastMessage::Notify {
                addr,
                ssrc,
                seq,
                roc,
                index,
                session_id,
            } => {
                if addr == self.local && session_id == self.session_id {
                    return Ok(Handled::OwnMessage);
                }
                let outcome = self
                    .remotes
                    .lock()
                    .notify(client_id, session_id, addr, ssrc, seq, roc, index);
                if let NotifyOutcome::SsrcChanged { previous } = outcome {
                    tracing::info!(
                        client = client_id,
                        session = session_id,
                        "Remote party changed SSRC from {:#010x} to {:#010x}",
                        previous,
                        ssrc
                    );
                }
                Ok(Handled::Notify(outcome))
            }
            BroadcastMessage::SendIndexes {
                addr,
                rtp_index,
                rtcp_index,
                session_id,
            } => {
                if addr == self.local && session_id == self.session_id {
                    return Ok(Handled::OwnMessage);
                }
                self.remotes
                    .lock()
                    .send_indexes(client_id, session_id, rtp_index, rtcp_index)?;
                Ok(Handled::Indexes)
            }
        }
    }
}
