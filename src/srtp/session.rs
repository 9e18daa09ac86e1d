//! The SRTP session: configuration, master keys, streams and packet hooks.
//!
//! An [`SrtpSession`] starts out configurable. [`SrtpSession::init`] freezes
//! the configuration, builds the pools and lookup tables it describes, and
//! seeds the local sender's indices. From then on keys, destinations and
//! sources can be managed and packets protected. [`SrtpSession::close`]
//! drops all of it at once.
//!
//! All state sits behind one read-write lock, so key management and packet
//! processing may run on different tasks. Events are handed to the sink after
//! the lock is released.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;

use super::config::{AuthAlg, EncryptionAlg, KeyDerivationAlg, SrtpConfig};
use super::crypto::{self, ProtectedParts, SessionKeys, RTCP_HEADER_SIZE, SRTCP_INDEX_SIZE};
use super::error::{Result, SrtpError};
use super::event::{EventSink, SrtpEvent, TracingSink};
use super::history::{AddOutcome, ContextRecord};
use super::key::{MasterKey, MasterKeyStore, Mki};
use super::pool::{HashPolicy, LookupTable, Pool, PoolId, PoolPolicy};
use super::stream::{Endpoint, Stream, StreamId};
use super::{distance, rtp_index, split_rtp_index, StreamKind, RTCP_INDEX_MASK};
use crate::media::rtp;

/// Local sender state the session starts from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalIdentity {
    pub ssrc: u32,
    pub roc: u32,
    /// Sequence number of the next RTP packet.
    pub seq: u16,
    /// Index of the next SRTCP packet.
    pub rtcp_index: u32,
}

/// Which object pool a policy applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolTarget {
    MasterKeys,
    Streams,
    Contexts,
}

/// Which lookup table a hash policy applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashTarget {
    MasterKeys,
    Sources,
    Destinations,
}

enum State {
    Configuring,
    Active(Box<Engine>),
    Closed,
}

struct Inner {
    config: SrtpConfig,
    state: State,
}

pub struct SrtpSession {
    inner: RwLock<Inner>,
    sink: Arc<dyn EventSink>,
}

impl Default for SrtpSession {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl SrtpSession {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self::with_config(SrtpConfig::default(), sink)
    }

    pub fn with_config(config: SrtpConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                config,
                state: State::Configuring,
            }),
            sink,
        }
    }

    pub fn config(&self) -> SrtpConfig {
        self.inner.read().config.clone()
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.inner.read().state, State::Active(_))
    }

    fn emit(&self, events: Vec<SrtpEvent>) {
        for event in &events {
            self.sink.on_event(event);
        }
    }

    fn configure(&self, op: impl FnOnce(&mut SrtpConfig) -> Result<()>) -> Result<()> {
        let mut inner = self.inner.write();
        if matches!(inner.state, State::Active(_)) {
            return Err(SrtpError::InvalidState("configuration after init"));
        }
        op(&mut inner.config)
    }

    fn write<R>(&self, op: impl FnOnce(&mut Engine, &mut Vec<SrtpEvent>) -> Result<R>) -> Result<R> {
        let mut events = Vec::new();
        let result = {
            let mut inner = self.inner.write();
            match &mut inner.state {
                State::Active(engine) => op(engine.as_mut(), &mut events),
                State::Configuring => Err(SrtpError::NullPtr("initialized SRTP session")),
                State::Closed => Err(SrtpError::InvalidState("session closed")),
            }
        };
        self.emit(events);
        result
    }

    fn read<R>(&self, op: impl FnOnce(&Engine) -> Result<R>) -> Result<R> {
        let inner = self.inner.read();
        match &inner.state {
            State::Active(engine) => op(engine.as_ref()),
            State::Configuring => Err(SrtpError::NullPtr("initialized SRTP session")),
            State::Closed => Err(SrtpError::InvalidState("session closed")),
        }
    }

    // --- configuration ---

    pub fn set_master_key_sizes(&self, mki: usize, key: usize, salt: usize) -> Result<()> {
        self.configure(|c| c.set_master_key_sizes(mki, key, salt))
    }

    pub fn set_key_derivation(&self, alg: KeyDerivationAlg, rate: u64) -> Result<()> {
        self.configure(|c| c.set_key_derivation(alg, rate))
    }

    pub fn set_prefix_length(&self, len: usize) -> Result<()> {
        self.configure(|c| c.set_prefix_length(len))
    }

    pub fn set_encryption(&self, kind: StreamKind, alg: EncryptionAlg, use_mki: bool) -> Result<()> {
        self.configure(|c| c.set_encryption(kind, alg, use_mki))
    }

    pub fn set_authentication(&self, kind: StreamKind, alg: AuthAlg, tag_size: usize) -> Result<()> {
        self.configure(|c| c.set_authentication(kind, alg, tag_size))
    }

    pub fn set_key_sizes(
        &self,
        kind: StreamKind,
        encrypt_key: usize,
        auth_key: usize,
        salt: usize,
    ) -> Result<()> {
        self.configure(|c| c.set_key_sizes(kind, encrypt_key, auth_key, salt))
    }

    pub fn set_replay_size(&self, kind: StreamKind, size: usize) -> Result<()> {
        self.configure(|c| c.set_replay_size(kind, size))
    }

    pub fn set_history_size(&self, kind: StreamKind, size: u64) -> Result<()> {
        self.configure(|c| c.set_history_size(kind, size))
    }

    pub fn set_pool(&self, target: PoolTarget, policy: PoolPolicy) -> Result<()> {
        policy.validate()?;
        self.configure(|c| {
            let slot = match target {
                PoolTarget::MasterKeys => &mut c.pools.key_pool,
                PoolTarget::Streams => &mut c.pools.stream_pool,
                PoolTarget::Contexts => &mut c.pools.context_pool,
            };
            *slot = policy;
            Ok(())
        })
    }

    pub fn set_hash(&self, target: HashTarget, policy: HashPolicy) -> Result<()> {
        policy.validate()?;
        self.configure(|c| {
            let slot = match target {
                HashTarget::MasterKeys => &mut c.pools.key_hash,
                HashTarget::Sources => &mut c.pools.source_hash,
                HashTarget::Destinations => &mut c.pools.destination_hash,
            };
            *slot = policy;
            Ok(())
        })
    }

    /// Bytes reserved ahead of the RTP/RTCP header (keystream prefix).
    pub fn header_size(&self, _kind: StreamKind) -> usize {
        self.inner.read().config.prefix_length
    }

    /// Bytes protection appends to a packet of `kind`.
    pub fn footer_size(&self, kind: StreamKind) -> usize {
        let inner = self.inner.read();
        let cfg = inner.config.kind(kind);
        let mki = if cfg.use_mki {
            inner.config.master_key_sizes.mki
        } else {
            0
        };
        let index = match kind {
            StreamKind::Rtp => 0,
            StreamKind::Rtcp => SRTCP_INDEX_SIZE,
        };
        mki + cfg.effective_tag_size() + index
    }

    // --- lifecycle ---

    pub fn init(&self, local: LocalIdentity) -> Result<()> {
        {
            let mut inner = self.inner.write();
            if matches!(inner.state, State::Active(_)) {
                return Err(SrtpError::InvalidState("session already initialized"));
            }
            let engine = Engine::new(inner.config.clone(), local)?;
            inner.state = State::Active(Box::new(engine));
        }
        self.emit(vec![SrtpEvent::Initialized]);
        Ok(())
    }

    /// Drop every key, stream and context.
    pub fn close(&self) -> Result<()> {
        {
            let mut inner = self.inner.write();
            match &inner.state {
                State::Active(_) => {}
                State::Configuring => return Err(SrtpError::NullPtr("initialized SRTP session")),
                State::Closed => return Err(SrtpError::InvalidState("session closed")),
            }
            inner.state = State::Closed;
        }
        self.emit(vec![SrtpEvent::Closed]);
        Ok(())
    }

    // --- master keys ---

    pub fn add_master_key(&self, mki: &[u8], key: &[u8], salt: &[u8]) -> Result<()> {
        self.write(|e, ev| {
            let mki = e.keys.add(mki, key, salt)?.mki.clone();
            ev.push(SrtpEvent::KeyAdded { mki });
            Ok(())
        })
    }

    /// Remove a master key. Contexts still naming it stay in place and fail
    /// with `NotFound` once they are used.
    pub fn remove_master_key(&self, mki: &[u8]) -> Result<()> {
        self.write(|e, ev| {
            let removed = e.keys.remove(&Mki::from(mki))?;
            let contexts = e.context_count(&removed.mki);
            ev.push(SrtpEvent::KeyRemoved {
                mki: removed.mki,
                contexts,
            });
            Ok(())
        })
    }

    pub fn remove_all_master_keys(&self) -> Result<()> {
        self.write(|e, ev| {
            let count = e.keys.clear().len();
            ev.push(SrtpEvent::KeysCleared { count });
            Ok(())
        })
    }

    pub fn master_key(&self, mki: &[u8]) -> Result<MasterKey> {
        self.read(|e| {
            let mki = e.keys.lookup(mki)?;
            e.keys
                .get(&mki)
                .cloned()
                .ok_or(SrtpError::NullPtr("master key"))
        })
    }

    pub fn master_key_count(&self) -> Result<usize> {
        self.read(|e| Ok(e.keys.len()))
    }

    /// Number of stream contexts, past and scheduled, that name `mki`.
    pub fn master_key_context_count(&self, mki: &[u8]) -> Result<usize> {
        self.read(|e| {
            let mki = e.keys.lookup(mki)?;
            Ok(e.context_count(&mki))
        })
    }

    // --- destinations ---

    /// Switch the key used to send to `addr` from the next outbound index.
    /// `None` blocks the destination.
    pub fn set_destination_key(
        &self,
        kind: StreamKind,
        addr: SocketAddr,
        mki: Option<&[u8]>,
        share_trigger: bool,
    ) -> Result<()> {
        self.write(|e, ev| {
            let mki = e.resolve(mki)?;
            let slot = e.destination_or_create(addr, kind, ev)?;
            let at = e.next_outbound(kind);
            e.assign(slot, at, mki, share_trigger, ev)
        })
    }

    /// Switch the key used to send to `addr` once outbound traffic reaches
    /// `threshold`.
    pub fn schedule_destination_key_at(
        &self,
        kind: StreamKind,
        addr: SocketAddr,
        mki: Option<&[u8]>,
        threshold: u64,
        share_trigger: bool,
    ) -> Result<()> {
        self.write(|e, ev| {
            let mki = e.resolve(mki)?;
            let slot = e.destination_or_create(addr, kind, ev)?;
            e.assign(slot, threshold, mki, share_trigger, ev)
        })
    }

    pub fn destination_clear_all_keys(&self, kind: StreamKind, addr: SocketAddr) -> Result<()> {
        self.write(|e, ev| {
            let slot = e.destination(addr, kind)?;
            let stream = e.streams.get_mut(slot).ok_or(SrtpError::NullPtr("stream"))?;
            stream.timeline.clear(&mut e.contexts);
            ev.push(SrtpEvent::StreamKeysCleared { stream: stream.id });
            Ok(())
        })
    }

    pub fn remove_destination(&self, kind: StreamKind, addr: SocketAddr) -> Result<()> {
        self.write(|e, ev| {
            let slot = e.destination(addr, kind)?;
            e.destinations.remove(&(addr, kind));
            if let Some(mut stream) = e.streams.remove(slot) {
                stream.timeline.clear(&mut e.contexts);
                ev.push(SrtpEvent::DestinationRemoved { stream: stream.id });
            }
            Ok(())
        })
    }

    /// Index the next packet sent to `addr` will carry.
    pub fn destination_index(&self, kind: StreamKind, addr: SocketAddr) -> Result<u64> {
        self.read(|e| {
            e.destination(addr, kind)?;
            Ok(e.next_outbound(kind))
        })
    }

    pub fn destination_key_at(
        &self,
        kind: StreamKind,
        addr: SocketAddr,
        index: u64,
    ) -> Result<Option<Mki>> {
        self.read(|e| {
            let stream = e.stream(e.destination(addr, kind)?)?;
            Ok(stream.timeline.mki_at(index & kind.wrap()).cloned())
        })
    }

    /// Key the next packet sent to `addr` would use.
    pub fn active_destination_key(&self, kind: StreamKind, addr: SocketAddr) -> Result<Option<Mki>> {
        self.read(|e| {
            let stream = e.stream(e.destination(addr, kind)?)?;
            Ok(stream.timeline.mki_at(e.next_outbound(kind)).cloned())
        })
    }

    pub fn destination_count(&self) -> Result<usize> {
        self.read(|e| Ok(e.destinations.len()))
    }

    // --- remote sources ---

    /// Start receiving from `ssrc`. For RTP `seq_or_index` is the first
    /// sequence number (continuing `roc`); for RTCP it is the first SRTCP
    /// index.
    pub fn add_remote_source(
        &self,
        ssrc: u32,
        kind: StreamKind,
        roc: u32,
        seq_or_index: u32,
    ) -> Result<()> {
        self.write(|e, ev| e.add_source(ssrc, kind, roc, seq_or_index, ev))
    }

    pub fn remove_remote_source(&self, ssrc: u32, kind: StreamKind) -> Result<()> {
        self.write(|e, ev| {
            let slot = e.source(ssrc, kind)?;
            e.sources.remove(&(ssrc, kind));
            e.drop_stream(slot, ev);
            Ok(())
        })
    }

    pub fn remove_all_remote_sources(&self) -> Result<()> {
        self.write(|e, ev| {
            let slots: Vec<PoolId> = e.sources.drain().map(|(_, slot)| slot).collect();
            for slot in slots {
                e.drop_stream(slot, ev);
            }
            Ok(())
        })
    }

    /// Switch the key used to receive from `ssrc`, effective from the index
    /// after the highest one received.
    pub fn set_source_key(
        &self,
        ssrc: u32,
        kind: StreamKind,
        mki: Option<&[u8]>,
        share_trigger: bool,
    ) -> Result<()> {
        self.write(|e, ev| {
            let mki = e.resolve(mki)?;
            let slot = e.source(ssrc, kind)?;
            let at = e.stream(slot)?.next_index();
            e.assign(slot, at, mki, share_trigger, ev)
        })
    }

    pub fn schedule_source_key_at(
        &self,
        ssrc: u32,
        kind: StreamKind,
        mki: Option<&[u8]>,
        threshold: u64,
        share_trigger: bool,
    ) -> Result<()> {
        self.write(|e, ev| {
            let mki = e.resolve(mki)?;
            let slot = e.source(ssrc, kind)?;
            e.assign(slot, threshold, mki, share_trigger, ev)
        })
    }

    pub fn source_clear_all_keys(&self, ssrc: u32, kind: StreamKind) -> Result<()> {
        self.write(|e, ev| {
            let slot = e.source(ssrc, kind)?;
            let stream = e.streams.get_mut(slot).ok_or(SrtpError::NullPtr("stream"))?;
            stream.timeline.clear(&mut e.contexts);
            ev.push(SrtpEvent::StreamKeysCleared { stream: stream.id });
            Ok(())
        })
    }

    /// Index the next in-order packet from `ssrc` will carry.
    pub fn source_index(&self, ssrc: u32, kind: StreamKind) -> Result<u64> {
        self.read(|e| Ok(e.stream(e.source(ssrc, kind)?)?.next_index()))
    }

    pub fn source_key_at(&self, ssrc: u32, kind: StreamKind, index: u64) -> Result<Option<Mki>> {
        self.read(|e| {
            let stream = e.stream(e.source(ssrc, kind)?)?;
            Ok(stream.timeline.mki_at(index & kind.wrap()).cloned())
        })
    }

    pub fn active_source_key(&self, ssrc: u32, kind: StreamKind) -> Result<Option<Mki>> {
        self.read(|e| {
            let stream = e.stream(e.source(ssrc, kind)?)?;
            Ok(stream.timeline.mki_at(stream.next_index()).cloned())
        })
    }

    pub fn source_count(&self) -> Result<usize> {
        self.read(|e| Ok(e.sources.len()))
    }

    // --- local sender ---

    /// `(rtp, rtcp)` indices of the next outbound packets.
    pub fn local_indexes(&self) -> Result<(u64, u64)> {
        self.read(|e| Ok((e.next_rtp, e.next_rtcp)))
    }

    pub fn local_ssrc(&self) -> Result<u32> {
        self.read(|e| Ok(e.ssrc))
    }

    pub fn rtp_seq_changed(&self, seq: u16, roc: u32) -> Result<()> {
        self.write(|e, _| {
            e.next_rtp = rtp_index(roc, seq);
            Ok(())
        })
    }

    pub fn rtcp_index_changed(&self, index: u32) -> Result<()> {
        self.write(|e, _| {
            e.next_rtcp = index as u64 & RTCP_INDEX_MASK;
            Ok(())
        })
    }

    /// A new local SSRC invalidates every destination's key mappings.
    pub fn local_ssrc_changed(&self, ssrc: u32) -> Result<()> {
        self.write(|e, ev| {
            e.ssrc = ssrc;
            ev.push(SrtpEvent::LocalSsrcChanged { ssrc });
            let slots: Vec<PoolId> = e.destinations.values().copied().collect();
            for slot in slots {
                let Some(stream) = e.streams.get_mut(slot) else {
                    continue;
                };
                let first = match stream.id.kind {
                    StreamKind::Rtp => e.next_rtp,
                    StreamKind::Rtcp => e.next_rtcp,
                };
                stream.timeline.reset(first, &mut e.contexts);
                ev.push(SrtpEvent::StreamKeysCleared { stream: stream.id });
            }
            Ok(())
        })
    }

    // --- packets ---

    /// Protect an outbound RTP packet for `dest`.
    pub fn protect_rtp(&self, dest: SocketAddr, packet: &[u8], roc: u32) -> Result<Vec<u8>> {
        self.write(|e, ev| e.protect_rtp(dest, packet, roc, ev))
    }

    pub fn unprotect_rtp(&self, packet: &[u8]) -> Result<Vec<u8>> {
        self.write(|e, ev| e.unprotect_rtp(packet, ev))
    }

    /// Protect an outbound RTCP packet for `dest` with SRTCP index `index`.
    pub fn protect_rtcp(
        &self,
        dest: SocketAddr,
        packet: &[u8],
        index: u32,
        encrypt: bool,
    ) -> Result<Vec<u8>> {
        self.write(|e, ev| e.protect_rtcp(dest, packet, index, encrypt, ev))
    }

    pub fn unprotect_rtcp(&self, packet: &[u8]) -> Result<Vec<u8>> {
        self.write(|e, ev| e.unprotect_rtcp(packet, ev))
    }
}

/// Start, key and superseded key of a trigger that just fired.
type TakenTrigger = (u64, Option<Mki>, Option<Mki>);

/// Initialized session state.
struct Engine {
    config: SrtpConfig,
    ssrc: u32,
    next_rtp: u64,
    next_rtcp: u64,
    keys: MasterKeyStore,
    streams: Pool<Stream>,
    contexts: Pool<ContextRecord>,
    destinations: LookupTable<(SocketAddr, StreamKind), PoolId>,
    sources: LookupTable<(u32, StreamKind), PoolId>,
}

impl Engine {
    fn new(config: SrtpConfig, local: LocalIdentity) -> Result<Self> {
        config.validate()?;
        let pools = config.pools.clone();
        Ok(Self {
            keys: MasterKeyStore::new(config.master_key_sizes, pools.key_pool, pools.key_hash)?,
            streams: Pool::new("stream pool", pools.stream_pool)?,
            contexts: Pool::new("context pool", pools.context_pool)?,
            destinations: LookupTable::new("destination hash", pools.destination_hash)?,
            sources: LookupTable::new("source hash", pools.source_hash)?,
            ssrc: local.ssrc,
            next_rtp: rtp_index(local.roc, local.seq),
            next_rtcp: local.rtcp_index as u64 & RTCP_INDEX_MASK,
            config,
        })
    }

    fn next_outbound(&self, kind: StreamKind) -> u64 {
        match kind {
            StreamKind::Rtp => self.next_rtp,
            StreamKind::Rtcp => self.next_rtcp,
        }
    }

    fn resolve(&self, mki: Option<&[u8]>) -> Result<Option<Mki>> {
        mki.map(|m| self.keys.lookup(m)).transpose()
    }

    fn stream(&self, slot: PoolId) -> Result<&Stream> {
        self.streams.get(slot).ok_or(SrtpError::NullPtr("stream"))
    }

    fn destination(&self, addr: SocketAddr, kind: StreamKind) -> Result<PoolId> {
        self.destinations
            .get(&(addr, kind))
            .copied()
            .ok_or_else(|| SrtpError::not_found(format!("{} destination {}", kind, addr)))
    }

    fn source(&self, ssrc: u32, kind: StreamKind) -> Result<PoolId> {
        self.sources
            .get(&(ssrc, kind))
            .copied()
            .ok_or_else(|| SrtpError::not_found(format!("{} remote source {:#010x}", kind, ssrc)))
    }

    /// Index at which an immediate key change on this stream takes effect.
    fn current_index(&self, slot: PoolId) -> Result<u64> {
        let stream = self.stream(slot)?;
        Ok(match stream.id.endpoint {
            Endpoint::Destination(_) => self.next_outbound(stream.id.kind),
            Endpoint::Source(_) => stream.next_index(),
        })
    }

    fn context_count(&self, mki: &Mki) -> usize {
        self.contexts
            .iter()
            .filter(|(_, record)| record.mki.as_ref() == Some(mki))
            .count()
    }

    fn destination_or_create(
        &mut self,
        addr: SocketAddr,
        kind: StreamKind,
        events: &mut Vec<SrtpEvent>,
    ) -> Result<PoolId> {
        if let Some(slot) = self.destinations.get(&(addr, kind)) {
            return Ok(*slot);
        }
        let id = StreamId::destination(addr, kind);
        let history = self.config.kind(kind).effective_history_size();
        let stream = Stream::destination(id, history, self.next_outbound(kind));
        let slot = self.streams.insert(stream)?;
        if let Err(e) = self.destinations.insert((addr, kind), slot) {
            self.streams.remove(slot);
            return Err(e);
        }
        events.push(SrtpEvent::DestinationCreated { stream: id });
        Ok(slot)
    }

    fn add_source(
        &mut self,
        ssrc: u32,
        kind: StreamKind,
        roc: u32,
        seq_or_index: u32,
        events: &mut Vec<SrtpEvent>,
    ) -> Result<()> {
        if self.sources.contains_key(&(ssrc, kind)) {
            return Err(SrtpError::bad_param(format!(
                "{} remote source {:#010x} already exists",
                kind, ssrc
            )));
        }
        let first = match kind {
            StreamKind::Rtp => {
                let seq = u16::try_from(seq_or_index).map_err(|_| {
                    SrtpError::bad_param(format!("sequence number {} out of range", seq_or_index))
                })?;
                rtp_index(roc, seq)
            }
            StreamKind::Rtcp => seq_or_index as u64 & RTCP_INDEX_MASK,
        };
        let id = StreamId::source(ssrc, kind);
        let cfg = self.config.kind(kind);
        let stream = Stream::source(id, cfg.effective_history_size(), cfg.replay_size, first);
        let slot = self.streams.insert(stream)?;
        if let Err(e) = self.sources.insert((ssrc, kind), slot) {
            self.streams.remove(slot);
            return Err(e);
        }
        events.push(SrtpEvent::SourceAdded {
            stream: id,
            index: first,
        });
        Ok(())
    }

    fn drop_stream(&mut self, slot: PoolId, events: &mut Vec<SrtpEvent>) {
        if let Some(mut stream) = self.streams.remove(slot) {
            stream.timeline.clear(&mut self.contexts);
            events.push(SrtpEvent::SourceRemoved { stream: stream.id });
        }
    }

    /// Put `mki` on a stream's timeline from `from`, firing its trigger
    /// right away if it is already the active context.
    fn assign(
        &mut self,
        slot: PoolId,
        from: u64,
        mki: Option<Mki>,
        trigger: bool,
        events: &mut Vec<SrtpEvent>,
    ) -> Result<()> {
        let current = self.current_index(slot)?;
        let stream = self.streams.get_mut(slot).ok_or(SrtpError::NullPtr("stream"))?;
        let from = from & stream.id.kind.wrap();
        let replaced = stream.timeline.mki_at(from).cloned();
        let outcome = stream.timeline.add(from, mki.clone(), trigger, &mut self.contexts)?;
        if outcome == AddOutcome::Unchanged {
            return Ok(());
        }
        events.push(SrtpEvent::KeyScheduled {
            stream: stream.id,
            from,
            mki,
            trigger,
        });
        if trigger && from == current {
            if let Some((from, next, _)) = self.take_trigger(slot, current)? {
                self.share_switch(slot, from, replaced, next, events)?;
            }
        }
        Ok(())
    }

    /// Mark the trigger context in effect at `index` as fired. Returns its
    /// start, its key and the key it took over from, the first time only.
    fn take_trigger(&mut self, slot: PoolId, index: u64) -> Result<Option<TakenTrigger>> {
        let stream = self.streams.get_mut(slot).ok_or(SrtpError::NullPtr("stream"))?;
        match stream.timeline.find_mut(index) {
            Some(ctx) if ctx.trigger && !ctx.fired => {
                ctx.fired = true;
                Ok(Some((ctx.from, ctx.mki.clone(), ctx.takes_over.take())))
            }
            _ => Ok(None),
        }
    }

    fn fire_trigger(&mut self, slot: PoolId, index: u64, events: &mut Vec<SrtpEvent>) -> Result<()> {
        let Some((from, next, previous)) = self.take_trigger(slot, index)? else {
            return Ok(());
        };
        self.share_switch(slot, from, previous, next, events)
    }

    /// Move every other stream still on `previous` onto `next`, at each
    /// stream's own current index.
    fn share_switch(
        &mut self,
        slot: PoolId,
        from: u64,
        previous: Option<Mki>,
        next: Option<Mki>,
        events: &mut Vec<SrtpEvent>,
    ) -> Result<()> {
        let Some(previous) = previous else {
            return Ok(());
        };
        let trigger_id = self.stream(slot)?.id;
        let others: Vec<PoolId> = self
            .streams
            .iter()
            .map(|(other, _)| other)
            .filter(|other| *other != slot)
            .collect();
        let mut followers = 0;
        for other in others {
            let at = self.current_index(other)?;
            let Some(follower) = self.streams.get_mut(other) else {
                continue;
            };
            if follower.timeline.mki_at(at) != Some(&previous) {
                continue;
            }
            match follower.timeline.add(at, next.clone(), false, &mut self.contexts) {
                Ok(AddOutcome::Unchanged) => {}
                Ok(_) => {
                    followers += 1;
                    events.push(SrtpEvent::KeyScheduled {
                        stream: follower.id,
                        from: at,
                        mki: next.clone(),
                        trigger: false,
                    });
                }
                Err(SrtpError::BadParam(reason)) => {
                    tracing::debug!(stream = %follower.id, %reason, "Shared key switch skipped");
                }
                Err(e) => return Err(e),
            }
        }
        events.push(SrtpEvent::TriggerFired {
            stream: trigger_id,
            index: from,
            previous,
            next,
            followers,
        });
        Ok(())
    }

    /// Record `index` as processed, firing a trigger that just became
    /// active.
    fn advance(&mut self, slot: PoolId, index: u64, events: &mut Vec<SrtpEvent>) -> Result<()> {
        let stream = self.streams.get_mut(slot).ok_or(SrtpError::NullPtr("stream"))?;
        if let Some(window) = stream.replay.as_mut() {
            window.record(index);
        }
        if stream.timeline.advance(index, &mut self.contexts) {
            self.fire_trigger(slot, index, events)?;
        }
        Ok(())
    }

    fn check_replay(&self, slot: PoolId, index: u64, events: &mut Vec<SrtpEvent>) -> Result<()> {
        let stream = self.stream(slot)?;
        match &stream.replay {
            Some(window) if !window.check(index) => {
                events.push(SrtpEvent::ReplayRejected {
                    stream: stream.id,
                    index,
                });
                Err(SrtpError::Replay(index))
            }
            _ => Ok(()),
        }
    }

    /// Session keys for the context in effect at `index`.
    fn session_keys(&mut self, slot: PoolId, index: u64) -> Result<(Mki, SessionKeys)> {
        let rate = self.config.derivation_rate();
        let stream = self.streams.get_mut(slot).ok_or(SrtpError::NullPtr("stream"))?;
        let id = stream.id;
        let no_key = || SrtpError::NoKey {
            stream: id.to_string(),
            index,
        };
        let ctx = stream.timeline.find_mut(index).ok_or_else(no_key)?;
        let mki = ctx.mki.clone().ok_or_else(no_key)?;
        let master = self
            .keys
            .get(&mki)
            .ok_or_else(|| SrtpError::not_found(format!("master key {}", mki)))?;

        let epoch = crypto::derivation_epoch(index, rate);
        if let Some((at, keys)) = &ctx.derived {
            if *at == epoch {
                return Ok((mki, keys.clone()));
            }
        }
        let keys = crypto::derive_session_keys(master, id.kind, epoch, self.config.kind(id.kind))?;
        ctx.derived = Some((epoch, keys.clone()));
        Ok((mki, keys))
    }

    fn count_encryption(&mut self, slot: PoolId, index: u64, mki: &Mki, events: &mut Vec<SrtpEvent>) {
        let Some(stream) = self.streams.get_mut(slot) else {
            return;
        };
        let kind = stream.id.kind;
        let Some(ctx) = stream.timeline.find_mut(index) else {
            return;
        };
        ctx.encrypt_count += 1;
        if ctx.encrypt_count > kind.wrap() && self.keys.mark_limit_reached(mki) {
            events.push(SrtpEvent::KeyLimitReached {
                mki: mki.clone(),
                kind,
            });
        }
    }

    fn outbound(&self, dest: SocketAddr, kind: StreamKind, index: u64) -> Result<PoolId> {
        self.destinations
            .get(&(dest, kind))
            .copied()
            .ok_or_else(|| SrtpError::NoKey {
                stream: StreamId::destination(dest, kind).to_string(),
                index,
            })
    }

    fn track_outbound(&mut self, kind: StreamKind, index: u64) {
        let wrap = kind.wrap();
        let next = match kind {
            StreamKind::Rtp => &mut self.next_rtp,
            StreamKind::Rtcp => &mut self.next_rtcp,
        };
        if distance(*next, index, wrap) <= wrap / 2 {
            *next = index.wrapping_add(1) & wrap;
        }
    }

    fn protect_rtp(
        &mut self,
        dest: SocketAddr,
        packet: &[u8],
        roc: u32,
        events: &mut Vec<SrtpEvent>,
    ) -> Result<Vec<u8>> {
        let (_, seq) = rtp::ssrc_and_seq(packet)
            .ok_or_else(|| SrtpError::bad_param("RTP packet too short"))?;
        let index = rtp_index(roc, seq);
        self.track_outbound(StreamKind::Rtp, index);
        let slot = self.outbound(dest, StreamKind::Rtp, index)?;
        self.advance(slot, index, events)?;
        let (mki, keys) = self.session_keys(slot, index)?;
        let out = crypto::protect_rtp(self.config.kind(StreamKind::Rtp), &keys, packet, roc, Some(&mki))?;
        self.count_encryption(slot, index, &mki, events);
        Ok(out)
    }

    fn protect_rtcp(
        &mut self,
        dest: SocketAddr,
        packet: &[u8],
        index: u32,
        encrypt: bool,
        events: &mut Vec<SrtpEvent>,
    ) -> Result<Vec<u8>> {
        let index = index & RTCP_INDEX_MASK as u32;
        let full = index as u64;
        self.track_outbound(StreamKind::Rtcp, full);
        let slot = self.outbound(dest, StreamKind::Rtcp, full)?;
        self.advance(slot, full, events)?;
        let (mki, keys) = self.session_keys(slot, full)?;
        let out = crypto::protect_rtcp(
            self.config.kind(StreamKind::Rtcp),
            &keys,
            packet,
            index,
            encrypt,
            Some(&mki),
        )?;
        self.count_encryption(slot, full, &mki, events);
        Ok(out)
    }

    fn unprotect_rtp(&mut self, packet: &[u8], events: &mut Vec<SrtpEvent>) -> Result<Vec<u8>> {
        let (ssrc, seq) = rtp::ssrc_and_seq(packet)
            .ok_or_else(|| SrtpError::bad_param("SRTP packet too short"))?;
        let slot = self.source(ssrc, StreamKind::Rtp)?;
        let index = self.stream(slot)?.estimate_rtp_index(seq);
        self.check_replay(slot, index, events)?;

        let cfg = self.config.kind(StreamKind::Rtp).clone();
        let parts = crypto::split_trailer(&cfg, self.keys.sizes().mki, rtp::RTP_HEADER_SIZE, packet)?;
        let (mki, keys) = self.session_keys(slot, index)?;
        check_packet_mki(&parts, &mki)?;
        let (roc, _) = split_rtp_index(index);
        let plain = crypto::unprotect_rtp(&cfg, &keys, &parts, roc)?;

        self.advance(slot, index, events)?;
        Ok(plain)
    }

    fn unprotect_rtcp(&mut self, packet: &[u8], events: &mut Vec<SrtpEvent>) -> Result<Vec<u8>> {
        if packet.len() < RTCP_HEADER_SIZE {
            return Err(SrtpError::bad_param("SRTCP packet too short"));
        }
        let ssrc = u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);
        let slot = self.source(ssrc, StreamKind::Rtcp)?;

        let cfg = self.config.kind(StreamKind::Rtcp).clone();
        let parts = crypto::split_trailer(
            &cfg,
            self.keys.sizes().mki,
            RTCP_HEADER_SIZE + SRTCP_INDEX_SIZE,
            packet,
        )?;
        let (_, index) = crypto::srtcp_index(&parts)?;
        let index = index as u64;
        self.check_replay(slot, index, events)?;
        let (mki, keys) = self.session_keys(slot, index)?;
        check_packet_mki(&parts, &mki)?;
        let plain = crypto::unprotect_rtcp(&cfg, &keys, &parts)?;

        self.advance(slot, index, events)?;
        Ok(plain)
    }
}

fn check_packet_mki(parts: &ProtectedParts<'_>, mki: &Mki) -> Result<()> {
    match parts.mki {
        Some(carried) if carried != mki.as_bytes() => Err(SrtpError::bad_param(format!(
            "packet carries mki {} but {} is active",
            Mki::from(carried),
            mki
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rtcp::{self, RtpSendStats};
    use crate::srtp::event::MemorySink;
    use crate::srtp::pool::PoolKind;
    use crate::srtp::RTP_INDEX_MASK;

    const K1: [u8; 4] = [0, 0, 0, 1];
    const K2: [u8; 4] = [0, 0, 0, 2];
    const K3: [u8; 4] = [0, 0, 0, 3];

    fn key_bytes(n: u8) -> Vec<u8> {
        vec![n; 16]
    }

    fn salt_bytes(n: u8) -> Vec<u8> {
        vec![n.wrapping_add(0x40); 14]
    }

    fn dest() -> SocketAddr {
        "10.0.0.2:5004".parse().unwrap()
    }

    fn rtp_packet(ssrc: u32, seq: u16) -> Vec<u8> {
        rtp::encode(
            rtp::PT_PCMU,
            seq,
            seq as u32 * rtp::TIMESTAMP_INCREMENT,
            ssrc,
            &[0xD5; rtp::SAMPLES_PER_PACKET],
        )
    }

    fn rtcp_packet(ssrc: u32) -> Vec<u8> {
        let stats = RtpSendStats {
            ssrc,
            packets_sent: 10,
            bytes_sent: 1600,
            ..RtpSendStats::default()
        };
        rtcp::build_sender_report(&stats, 0x0102_0304_0506_0708, "rekey@test")
    }

    fn session(local: LocalIdentity) -> (SrtpSession, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let session = SrtpSession::new(sink.clone());
        session.init(local).unwrap();
        session.add_master_key(&K1, &key_bytes(1), &salt_bytes(1)).unwrap();
        session.add_master_key(&K2, &key_bytes(2), &salt_bytes(2)).unwrap();
        (session, sink)
    }

    fn local(ssrc: u32, seq: u16) -> LocalIdentity {
        LocalIdentity {
            ssrc,
            roc: 0,
            seq,
            rtcp_index: 0,
        }
    }

    fn mki(bytes: [u8; 4]) -> Option<Mki> {
        Some(Mki::new(bytes.to_vec()))
    }

    #[test]
    fn test_master_key_roundtrip() {
        let (s, _) = session(local(1, 0));
        let key = s.master_key(&K1).unwrap();
        assert_eq!(key.mki.as_bytes(), &K1);
        assert_eq!(key.key, key_bytes(1));
        assert_eq!(key.salt, salt_bytes(1));
        assert_eq!(s.master_key_count().unwrap(), 2);
    }

    #[test]
    fn test_calls_before_init() {
        let s = SrtpSession::new(Arc::new(MemorySink::new()));
        assert_eq!(
            s.add_master_key(&K1, &key_bytes(1), &salt_bytes(1)),
            Err(SrtpError::NullPtr("initialized SRTP session"))
        );
        assert!(matches!(s.local_indexes(), Err(SrtpError::NullPtr(_))));
    }

    #[test]
    fn test_configuration_after_init_rejected() {
        let (s, _) = session(local(1, 0));
        assert!(matches!(
            s.set_master_key_sizes(4, 16, 14),
            Err(SrtpError::InvalidState(_))
        ));
        assert!(matches!(
            s.set_replay_size(StreamKind::Rtp, 128),
            Err(SrtpError::InvalidState(_))
        ));
        assert!(matches!(
            s.set_pool(PoolTarget::Streams, PoolPolicy::default()),
            Err(SrtpError::InvalidState(_))
        ));
    }

    #[test]
    fn test_close_and_reopen() {
        let (s, sink) = session(local(1, 0));
        s.close().unwrap();
        assert!(matches!(s.master_key_count(), Err(SrtpError::InvalidState(_))));
        s.set_history_size(StreamKind::Rtp, 4096).unwrap();
        s.init(local(1, 0)).unwrap();
        assert_eq!(s.master_key_count().unwrap(), 0);
        assert!(sink.events().contains(&SrtpEvent::Closed));
    }

    #[test]
    fn test_duplicate_mki_rejected() {
        let (s, _) = session(local(1, 0));
        assert!(matches!(
            s.add_master_key(&K1, &key_bytes(3), &salt_bytes(3)),
            Err(SrtpError::BadParam(_))
        ));
    }

    #[test]
    fn test_fixed_key_pool_exhausted() {
        let s = SrtpSession::new(Arc::new(MemorySink::new()));
        s.set_pool(
            PoolTarget::MasterKeys,
            PoolPolicy {
                kind: PoolKind::Fixed,
                max_items: 1,
                ..PoolPolicy::default()
            },
        )
        .unwrap();
        s.init(local(1, 0)).unwrap();
        s.add_master_key(&K1, &key_bytes(1), &salt_bytes(1)).unwrap();
        assert_eq!(
            s.add_master_key(&K2, &key_bytes(2), &salt_bytes(2)),
            Err(SrtpError::OutOfResources("master key pool"))
        );
    }

    #[test]
    fn test_destination_blocked_by_default() {
        let (s, _) = session(local(1, 0));
        let packet = rtp_packet(1, 0);
        assert!(matches!(
            s.protect_rtp(dest(), &packet, 0),
            Err(SrtpError::NoKey { .. })
        ));

        s.set_destination_key(StreamKind::Rtp, dest(), None, false).unwrap();
        assert_eq!(s.destination_count().unwrap(), 1);
        assert_eq!(s.active_destination_key(StreamKind::Rtp, dest()).unwrap(), None);
        assert!(matches!(
            s.protect_rtp(dest(), &packet, 0),
            Err(SrtpError::NoKey { .. })
        ));

        s.set_destination_key(StreamKind::Rtp, dest(), Some(&K1), false).unwrap();
        let next = rtp_packet(1, 1);
        assert!(s.protect_rtp(dest(), &next, 0).is_ok());
    }

    #[test]
    fn test_zero_offset_schedule_matches_immediate_set() {
        let setup = || {
            let (s, _) = session(local(1, 10));
            s.set_destination_key(StreamKind::Rtp, dest(), Some(&K1), false).unwrap();
            s.add_remote_source(0xB0B, StreamKind::Rtp, 0, 500).unwrap();
            s.set_source_key(0xB0B, StreamKind::Rtp, Some(&K1), false).unwrap();
            s
        };
        let a = setup();
        let b = setup();

        a.set_destination_key(StreamKind::Rtp, dest(), Some(&K2), true).unwrap();
        let now = b.destination_index(StreamKind::Rtp, dest()).unwrap();
        b.schedule_destination_key_at(StreamKind::Rtp, dest(), Some(&K2), now, true)
            .unwrap();

        for s in [&a, &b] {
            assert_eq!(s.active_destination_key(StreamKind::Rtp, dest()).unwrap(), mki(K2));
            assert_eq!(s.active_source_key(0xB0B, StreamKind::Rtp).unwrap(), mki(K2));
        }
        assert_eq!(
            a.master_key_context_count(&K2).unwrap(),
            b.master_key_context_count(&K2).unwrap()
        );
    }

    #[test]
    fn test_trigger_fans_out_to_sharing_streams() {
        let (s, sink) = session(local(1, 0));
        let other: SocketAddr = "10.0.0.9:6000".parse().unwrap();
        s.set_destination_key(StreamKind::Rtp, dest(), Some(&K1), false).unwrap();
        s.set_destination_key(StreamKind::Rtcp, other, Some(&K1), false).unwrap();
        s.add_remote_source(0xB0B, StreamKind::Rtp, 0, 0).unwrap();
        s.set_source_key(0xB0B, StreamKind::Rtp, Some(&K1), false).unwrap();
        s.add_remote_source(0xC0C, StreamKind::Rtp, 0, 0).unwrap();
        s.set_source_key(0xC0C, StreamKind::Rtp, Some(&K2), false).unwrap();
        s.add_master_key(&K3, &key_bytes(3), &salt_bytes(3)).unwrap();
        sink.take();

        s.set_destination_key(StreamKind::Rtp, dest(), Some(&K3), true).unwrap();

        assert_eq!(s.active_destination_key(StreamKind::Rtp, dest()).unwrap(), mki(K3));
        assert_eq!(s.active_destination_key(StreamKind::Rtcp, other).unwrap(), mki(K3));
        assert_eq!(s.active_source_key(0xB0B, StreamKind::Rtp).unwrap(), mki(K3));
        // not sharing the old key
        assert_eq!(s.active_source_key(0xC0C, StreamKind::Rtp).unwrap(), mki(K2));

        assert!(sink.events().iter().any(|e| matches!(
            e,
            SrtpEvent::TriggerFired { followers: 2, .. }
        )));
    }

    #[test]
    fn test_switch_without_trigger_stays_local() {
        let (s, _) = session(local(1, 0));
        s.set_destination_key(StreamKind::Rtp, dest(), Some(&K1), false).unwrap();
        s.add_remote_source(0xB0B, StreamKind::Rtp, 0, 0).unwrap();
        s.set_source_key(0xB0B, StreamKind::Rtp, Some(&K1), false).unwrap();

        s.set_destination_key(StreamKind::Rtp, dest(), Some(&K2), false).unwrap();
        assert_eq!(s.active_source_key(0xB0B, StreamKind::Rtp).unwrap(), mki(K1));
    }

    #[test]
    fn test_scheduled_trigger_fires_when_traffic_reaches_it() {
        let (s, _) = session(local(1, 0));
        s.set_destination_key(StreamKind::Rtp, dest(), Some(&K1), false).unwrap();
        s.add_remote_source(0xB0B, StreamKind::Rtp, 0, 500).unwrap();
        s.set_source_key(0xB0B, StreamKind::Rtp, Some(&K1), false).unwrap();
        s.schedule_destination_key_at(StreamKind::Rtp, dest(), Some(&K2), 5, true)
            .unwrap();

        for seq in 0..5 {
            s.protect_rtp(dest(), &rtp_packet(1, seq), 0).unwrap();
            assert_eq!(s.active_source_key(0xB0B, StreamKind::Rtp).unwrap(), mki(K1));
        }
        let protected = s.protect_rtp(dest(), &rtp_packet(1, 5), 0).unwrap();
        assert_eq!(&protected[protected.len() - 14..protected.len() - 10], &K2);
        assert_eq!(s.active_source_key(0xB0B, StreamKind::Rtp).unwrap(), mki(K2));
    }

    #[test]
    fn test_trigger_reached_by_jump_past_history() {
        let sink = Arc::new(MemorySink::new());
        let s = SrtpSession::new(sink.clone());
        s.set_history_size(StreamKind::Rtp, 1024).unwrap();
        s.init(local(1, 0)).unwrap();
        s.add_master_key(&K1, &key_bytes(1), &salt_bytes(1)).unwrap();
        s.add_master_key(&K2, &key_bytes(2), &salt_bytes(2)).unwrap();
        s.set_destination_key(StreamKind::Rtp, dest(), Some(&K1), false).unwrap();
        s.add_remote_source(0xB0B, StreamKind::Rtp, 0, 500).unwrap();
        s.set_source_key(0xB0B, StreamKind::Rtp, Some(&K1), false).unwrap();
        s.schedule_destination_key_at(StreamKind::Rtp, dest(), Some(&K2), 5, true)
            .unwrap();
        s.protect_rtp(dest(), &rtp_packet(1, 0), 0).unwrap();
        sink.take();

        // Far enough ahead that the K1 context leaves the history window.
        let protected = s.protect_rtp(dest(), &rtp_packet(1, 5000), 0).unwrap();
        assert_eq!(&protected[protected.len() - 14..protected.len() - 10], &K2);
        assert_eq!(s.active_source_key(0xB0B, StreamKind::Rtp).unwrap(), mki(K2));
        assert!(sink.events().iter().any(|e| matches!(
            e,
            SrtpEvent::TriggerFired { previous, followers: 1, .. } if Some(previous) == mki(K1).as_ref()
        )));
    }

    #[test]
    fn test_end_to_end_with_replay_rejection() {
        let (sender, _) = session(local(0x5EED, 100));
        let (receiver, sink) = session(local(0xFEED, 0));
        sender.set_destination_key(StreamKind::Rtp, dest(), Some(&K1), false).unwrap();
        receiver.add_remote_source(0x5EED, StreamKind::Rtp, 0, 100).unwrap();
        receiver.set_source_key(0x5EED, StreamKind::Rtp, Some(&K1), false).unwrap();

        let first = rtp_packet(0x5EED, 100);
        let srtp = sender.protect_rtp(dest(), &first, 0).unwrap();
        assert_eq!(receiver.unprotect_rtp(&srtp).unwrap(), first);
        assert_eq!(receiver.unprotect_rtp(&srtp), Err(SrtpError::Replay(100)));

        let second = rtp_packet(0x5EED, 101);
        let srtp = sender.protect_rtp(dest(), &second, 0).unwrap();
        assert_eq!(receiver.unprotect_rtp(&srtp).unwrap(), second);

        assert!(sink
            .events()
            .contains(&SrtpEvent::ReplayRejected {
                stream: StreamId::source(0x5EED, StreamKind::Rtp),
                index: 100,
            }));
    }

    #[test]
    fn test_scheduled_rotation_on_both_ends() {
        let (sender, _) = session(local(0x5EED, 0));
        let (receiver, _) = session(local(0xFEED, 0));
        sender.set_destination_key(StreamKind::Rtp, dest(), Some(&K1), false).unwrap();
        receiver.add_remote_source(0x5EED, StreamKind::Rtp, 0, 0).unwrap();
        receiver.set_source_key(0x5EED, StreamKind::Rtp, Some(&K1), false).unwrap();

        let (now, _) = sender.local_indexes().unwrap();
        sender
            .schedule_destination_key_at(StreamKind::Rtp, dest(), Some(&K2), now + 3, false)
            .unwrap();
        receiver
            .schedule_source_key_at(0x5EED, StreamKind::Rtp, Some(&K2), now + 3, false)
            .unwrap();

        for seq in 0..6 {
            let packet = rtp_packet(0x5EED, seq);
            let srtp = sender.protect_rtp(dest(), &packet, 0).unwrap();
            assert_eq!(receiver.unprotect_rtp(&srtp).unwrap(), packet);
        }
        assert_eq!(receiver.active_source_key(0x5EED, StreamKind::Rtp).unwrap(), mki(K2));
    }

    #[test]
    fn test_key_mismatch_rejected() {
        let (sender, _) = session(local(0x5EED, 0));
        let (receiver, _) = session(local(0xFEED, 0));
        sender.set_destination_key(StreamKind::Rtp, dest(), Some(&K2), false).unwrap();
        receiver.add_remote_source(0x5EED, StreamKind::Rtp, 0, 0).unwrap();
        receiver.set_source_key(0x5EED, StreamKind::Rtp, Some(&K1), false).unwrap();

        let srtp = sender.protect_rtp(dest(), &rtp_packet(0x5EED, 0), 0).unwrap();
        assert!(matches!(receiver.unprotect_rtp(&srtp), Err(SrtpError::BadParam(_))));
        // a failed packet does not count as seen
        receiver.set_source_key(0x5EED, StreamKind::Rtp, Some(&K2), false).unwrap();
        assert!(receiver.unprotect_rtp(&srtp).is_ok());
    }

    #[test]
    fn test_rtcp_end_to_end() {
        let (sender, _) = session(local(0x5EED, 0));
        let (receiver, _) = session(local(0xFEED, 0));
        sender.set_destination_key(StreamKind::Rtcp, dest(), Some(&K1), false).unwrap();
        receiver.add_remote_source(0x5EED, StreamKind::Rtcp, 0, 7).unwrap();
        receiver.set_source_key(0x5EED, StreamKind::Rtcp, Some(&K1), false).unwrap();

        let report = rtcp_packet(0x5EED);
        let srtcp = sender.protect_rtcp(dest(), &report, 7, true).unwrap();
        assert_eq!(srtcp.len(), report.len() + sender.footer_size(StreamKind::Rtcp));
        assert_eq!(receiver.unprotect_rtcp(&srtcp).unwrap(), report);
        assert_eq!(receiver.unprotect_rtcp(&srtcp), Err(SrtpError::Replay(7)));
        assert_eq!(sender.local_indexes().unwrap().1, 8);
        assert_eq!(receiver.source_index(0x5EED, StreamKind::Rtcp).unwrap(), 8);
    }

    #[test]
    fn test_unknown_source_not_found() {
        let (s, _) = session(local(1, 0));
        assert!(matches!(
            s.set_source_key(0xB0B, StreamKind::Rtp, Some(&K1), false),
            Err(SrtpError::NotFound(_))
        ));
        assert!(matches!(
            s.unprotect_rtp(&rtp_packet(0xB0B, 0)),
            Err(SrtpError::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_all_keys_then_set_fails() {
        let (s, _) = session(local(1, 0));
        s.remove_all_master_keys().unwrap();
        assert!(matches!(
            s.set_destination_key(StreamKind::Rtp, dest(), Some(&K1), false),
            Err(SrtpError::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_referenced_key_reports_contexts() {
        let (s, sink) = session(local(1, 0));
        s.set_destination_key(StreamKind::Rtp, dest(), Some(&K1), false).unwrap();
        assert_eq!(s.master_key_context_count(&K1).unwrap(), 1);
        s.remove_master_key(&K1).unwrap();
        assert!(sink.events().contains(&SrtpEvent::KeyRemoved {
            mki: Mki::new(K1.to_vec()),
            contexts: 1,
        }));
        assert!(matches!(
            s.protect_rtp(dest(), &rtp_packet(1, 0), 0),
            Err(SrtpError::NotFound(_))
        ));
        assert!(matches!(s.remove_master_key(&K1), Err(SrtpError::NotFound(_))));
    }

    #[test]
    fn test_historical_threshold_rejected() {
        let (sender, _) = session(local(0x5EED, 0));
        let (receiver, _) = session(local(0xFEED, 0));
        sender.set_destination_key(StreamKind::Rtp, dest(), Some(&K1), false).unwrap();
        receiver.add_remote_source(0x5EED, StreamKind::Rtp, 0, 0).unwrap();
        receiver.set_source_key(0x5EED, StreamKind::Rtp, Some(&K1), false).unwrap();
        for seq in 0..10 {
            let srtp = sender.protect_rtp(dest(), &rtp_packet(0x5EED, seq), 0).unwrap();
            receiver.unprotect_rtp(&srtp).unwrap();
        }
        assert!(matches!(
            receiver.schedule_source_key_at(0x5EED, StreamKind::Rtp, Some(&K2), 4, false),
            Err(SrtpError::BadParam(_))
        ));
        assert!(matches!(
            sender.schedule_destination_key_at(StreamKind::Rtp, dest(), Some(&K2), 4, false),
            Err(SrtpError::BadParam(_))
        ));
    }

    #[test]
    fn test_local_ssrc_change_clears_destinations() {
        let (s, _) = session(local(1, 0));
        s.set_destination_key(StreamKind::Rtp, dest(), Some(&K1), false).unwrap();
        s.rtp_seq_changed(40, 0).unwrap();
        s.local_ssrc_changed(2).unwrap();
        assert_eq!(s.local_ssrc().unwrap(), 2);
        assert_eq!(s.active_destination_key(StreamKind::Rtp, dest()).unwrap(), None);
        assert_eq!(s.destination_index(StreamKind::Rtp, dest()).unwrap(), 40);
    }

    #[test]
    fn test_remove_sources_and_destinations() {
        let (s, sink) = session(local(1, 0));
        s.add_remote_source(0xB0B, StreamKind::Rtp, 0, 0).unwrap();
        s.add_remote_source(0xB0B, StreamKind::Rtcp, 0, 0).unwrap();
        assert!(matches!(
            s.add_remote_source(0xB0B, StreamKind::Rtp, 0, 0),
            Err(SrtpError::BadParam(_))
        ));
        s.set_destination_key(StreamKind::Rtp, dest(), Some(&K1), false).unwrap();

        s.remove_remote_source(0xB0B, StreamKind::Rtcp).unwrap();
        assert_eq!(s.source_count().unwrap(), 1);
        s.remove_all_remote_sources().unwrap();
        assert_eq!(s.source_count().unwrap(), 0);
        s.remove_destination(StreamKind::Rtp, dest()).unwrap();
        assert_eq!(s.master_key_context_count(&K1).unwrap(), 0);
        assert!(sink.events().contains(&SrtpEvent::DestinationRemoved {
            stream: StreamId::destination(dest(), StreamKind::Rtp),
        }));
    }

    #[test]
    fn test_clear_all_keys() {
        let (s, _) = session(local(1, 0));
        s.set_destination_key(StreamKind::Rtp, dest(), Some(&K1), false).unwrap();
        s.schedule_destination_key_at(StreamKind::Rtp, dest(), Some(&K2), 50, false)
            .unwrap();
        s.destination_clear_all_keys(StreamKind::Rtp, dest()).unwrap();
        assert_eq!(s.destination_key_at(StreamKind::Rtp, dest(), 60).unwrap(), None);

        s.add_remote_source(0xB0B, StreamKind::Rtp, 0, 0).unwrap();
        s.set_source_key(0xB0B, StreamKind::Rtp, Some(&K1), false).unwrap();
        s.source_clear_all_keys(0xB0B, StreamKind::Rtp).unwrap();
        assert_eq!(s.active_source_key(0xB0B, StreamKind::Rtp).unwrap(), None);
    }

    #[test]
    fn test_header_and_footer_sizes() {
        let s = SrtpSession::new(Arc::new(MemorySink::new()));
        assert_eq!(s.header_size(StreamKind::Rtp), 0);
        assert_eq!(s.footer_size(StreamKind::Rtp), 4 + 10);
        assert_eq!(s.footer_size(StreamKind::Rtcp), 4 + 10 + 4);
        s.set_encryption(StreamKind::Rtp, EncryptionAlg::AesCm, false).unwrap();
        s.set_authentication(StreamKind::Rtp, AuthAlg::None, 0).unwrap();
        assert_eq!(s.footer_size(StreamKind::Rtp), 0);
    }

    #[test]
    fn test_key_limit_reached_event() {
        let (s, sink) = session(local(1, 0));
        s.set_destination_key(StreamKind::Rtcp, dest(), Some(&K1), false).unwrap();
        {
            let mut inner = s.inner.write();
            let State::Active(engine) = &mut inner.state else {
                panic!("session not active");
            };
            let slot = engine.destination(dest(), StreamKind::Rtcp).unwrap();
            let stream = engine.streams.get_mut(slot).unwrap();
            stream.timeline.find_mut(0).unwrap().encrypt_count = RTCP_INDEX_MASK;
        }
        s.protect_rtcp(dest(), &rtcp_packet(1), 0, true).unwrap();
        assert!(sink.events().contains(&SrtpEvent::KeyLimitReached {
            mki: Mki::new(K1.to_vec()),
            kind: StreamKind::Rtcp,
        }));
    }

    #[test]
    fn test_rtp_index_wrap_reaches_mask() {
        let (s, _) = session(LocalIdentity {
            ssrc: 1,
            roc: u32::MAX,
            seq: 0xFFFF,
            rtcp_index: 0,
        });
        assert_eq!(s.local_indexes().unwrap().0, RTP_INDEX_MASK);
    }
}
