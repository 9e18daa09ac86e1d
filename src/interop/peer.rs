//! Interop peer runtime: binds UDP sockets, sends and receives SRTP audio
//! and exchanges key-rotation broadcasts.
//!
//! Every configured session gets one send task (PCMU/PCMA silence every 20ms
//! plus a periodic SRTCP sender report) and one receive task. The report
//! clock is shared with the handle so [`InteropPeer::request_report`] can
//! make a report due early. A shared
//! broadcast socket carries `notify` announcements and, when rotation is
//! configured, the `sendindexes` that tell the other side when to switch.
//! All tasks stop when the `open` flag drops; [`InteropPeer::close`] joins
//! them before the SRTP sessions are torn down.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;

use super::broadcast::{self, BroadcastMessage};
use super::registry::{Delivery, SessionRegistry};
use super::remote::NotifyOutcome;
use super::session::{Handled, PeerSession};
use crate::config::{AppConfig, PeerConfig, RotationConfig, SessionConfig};
use crate::media::rtcp::{self, RtcpBlock, RtpSendStats};
use crate::media::rtp::{self, PayloadCodec, G711};
use crate::srtp::{split_rtp_index, EventSink, LocalIdentity, SrtpError, SrtpSession, StreamKind};

/// How long a receive call waits before re-checking the `open` flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long `close` waits for a task before aborting it.
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-session packet counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PeerStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub reports_sent: u64,
    pub reports_received: u64,
    pub replays_rejected: u64,
    pub unprotect_failures: u64,
    pub last_seq: u16,
}

/// Key material a session was started with.
#[derive(Debug, Clone)]
struct SessionKeys {
    remote: SocketAddr,
    initial_mki: Vec<u8>,
    /// Rotation order.
    mkis: Vec<Vec<u8>>,
}

impl SessionKeys {
    /// The key after `current` in rotation order.
    fn after(&self, current: Option<&[u8]>) -> Option<&[u8]> {
        if self.mkis.is_empty() {
            return None;
        }
        let next = match current.and_then(|c| self.mkis.iter().position(|m| m == c)) {
            Some(at) => (at + 1) % self.mkis.len(),
            None => 0,
        };
        Some(self.mkis[next].as_slice())
    }
}

/// State shared by the broadcast and rotation tasks.
struct Shared {
    client_id: String,
    registry: SessionRegistry,
    keys: HashMap<u32, SessionKeys>,
    broadcast: UdpSocket,
    targets: Vec<SocketAddr>,
    rotation: Option<RotationConfig>,
    open: AtomicBool,
    /// Last `sendindexes` acted on, per local session and remote party.
    scheduled: Mutex<HashMap<(u32, String, u32), (u64, u64)>>,
}

impl Shared {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn send_datagram(&self, datagram: &str) {
        for target in &self.targets {
            if let Err(e) = self.broadcast.send_to(datagram.as_bytes(), target).await {
                tracing::warn!("Broadcast to {} failed: {:#}", target, e);
            }
        }
    }
}

/// When a session last sent an RTCP sender report; `None` makes one due on
/// the next send tick.
type ReportClock = Arc<Mutex<Option<Instant>>>;

/// A running interop peer.
pub struct InteropPeer {
    shared: Arc<Shared>,
    stats: HashMap<u32, Arc<Mutex<PeerStats>>>,
    reports: HashMap<u32, ReportClock>,
    handles: Vec<JoinHandle<()>>,
}

impl InteropPeer {
    /// Initialize every configured session, bind its sockets and start the
    /// send, receive, broadcast and rotation tasks.
    pub async fn start(config: &AppConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        let peer = &config.peer;
        let codec: G711 = peer.codec.parse()?;

        let broadcast = UdpSocket::bind(peer.broadcast_bind)
            .await
            .with_context(|| format!("Failed to bind broadcast socket on {}", peer.broadcast_bind))?;
        tracing::info!(
            "Peer {} listening for broadcasts on {}",
            peer.client_id,
            broadcast.local_addr()?
        );

        let mut registry = SessionRegistry::new();
        let mut keys = HashMap::new();
        let mut media = Vec::new();
        for session_config in &config.sessions {
            let (session, session_keys, sockets) =
                open_session(config, session_config, sink.clone()).await?;
            registry.add(session.clone())?;
            keys.insert(session_config.session_id, session_keys);
            media.push((session, sockets));
        }

        let shared = Arc::new(Shared {
            client_id: peer.client_id.clone(),
            registry,
            keys,
            broadcast,
            targets: peer.broadcast_targets.clone(),
            rotation: peer.rotation.clone(),
            open: AtomicBool::new(true),
            scheduled: Mutex::new(HashMap::new()),
        });

        let mut stats = HashMap::new();
        let mut reports = HashMap::new();
        let mut handles = Vec::new();
        for (session, sockets) in media {
            let session_stats = Arc::new(Mutex::new(PeerStats::default()));
            stats.insert(session.session_id(), session_stats.clone());
            let clock: ReportClock = Arc::new(Mutex::new(Some(Instant::now())));
            reports.insert(session.session_id(), clock.clone());
            let remote = shared
                .keys
                .get(&session.session_id())
                .map(|k| k.remote)
                .context("Session keys missing")?;

            handles.push(tokio::spawn(send_loop(
                shared.clone(),
                session.clone(),
                sockets.clone(),
                remote,
                codec,
                session_stats.clone(),
                clock,
                Duration::from_millis(peer.rtcp_interval_ms),
            )));
            handles.push(tokio::spawn(recv_loop(
                shared.clone(),
                session,
                sockets,
                session_stats,
            )));
        }
        handles.push(tokio::spawn(announce_loop(
            shared.clone(),
            Duration::from_millis(peer.announce_interval_ms),
        )));
        handles.push(tokio::spawn(listen_loop(shared.clone())));
        if let Some(rotation) = &peer.rotation {
            handles.push(tokio::spawn(rotation_loop(
                shared.clone(),
                Duration::from_millis(rotation.interval_ms),
            )));
        }

        Ok(Self {
            shared,
            stats,
            reports,
            handles,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.shared.client_id
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.shared.registry
    }

    pub fn broadcast_addr(&self) -> Result<SocketAddr> {
        Ok(self.shared.broadcast.local_addr()?)
    }

    pub async fn stats(&self, session_id: u32) -> Option<PeerStats> {
        let stats = self.stats.get(&session_id)?;
        Some(stats.lock().await.clone())
    }

    /// Make a sender report due on the session's next send tick.
    pub async fn request_report(&self, session_id: u32) -> Result<()> {
        let clock = self
            .reports
            .get(&session_id)
            .with_context(|| format!("No session {}", session_id))?;
        *clock.lock().await = None;
        Ok(())
    }

    /// Time since the session's last sender report.
    pub async fn since_last_report(&self, session_id: u32) -> Option<Duration> {
        let clock = self.reports.get(&session_id)?;
        let last = *clock.lock().await;
        last.map(|at| at.elapsed())
    }

    /// Schedule the next key on every session now instead of waiting for
    /// the rotation timer.
    pub async fn rotate_now(&self) -> Result<()> {
        let rotation = self
            .shared
            .rotation
            .clone()
            .context("Rotation is not configured")?;
        rotate(&self.shared, &rotation).await
    }

    /// Stop every task, wait for them, then close the SRTP sessions.
    pub async fn close(mut self) -> Result<()> {
        self.shared.open.store(false, Ordering::Release);
        for handle in self.handles.drain(..) {
            let abort = handle.abort_handle();
            if time::timeout(JOIN_TIMEOUT, handle).await.is_err() {
                tracing::warn!("Peer task did not stop in time, aborting");
                abort.abort();
            }
        }

        for (session_id, stats) in &self.stats {
            let s = stats.lock().await;
            tracing::info!(
                "Session {} stopped. Sent: {} ({} reports), Received: {} ({} bytes), replays rejected: {}",
                session_id,
                s.packets_sent,
                s.reports_sent,
                s.packets_received,
                s.bytes_received,
                s.replays_rejected
            );
        }
        for session in self.shared.registry.iter() {
            session
                .close()
                .with_context(|| format!("Failed to close session {}", session.session_id()))?;
        }
        Ok(())
    }
}

impl Drop for InteropPeer {
    fn drop(&mut self) {
        self.shared.open.store(false, Ordering::Release);
        for h in self.handles.drain(..) {
            h.abort();
        }
    }
}

/// RTP and RTCP sockets of one session.
#[derive(Clone)]
struct MediaSockets {
    rtp: Arc<UdpSocket>,
    rtcp: Arc<UdpSocket>,
}

async fn open_session(
    config: &AppConfig,
    session_config: &SessionConfig,
    sink: Arc<dyn EventSink>,
) -> Result<(Arc<PeerSession>, SessionKeys, MediaSockets)> {
    let local = session_config.local;
    let rtp_socket = UdpSocket::bind(local)
        .await
        .with_context(|| format!("Failed to bind RTP socket on {}", local))?;
    let rtcp_local = SessionConfig::rtcp_addr(local);
    let rtcp_socket = UdpSocket::bind(rtcp_local)
        .await
        .with_context(|| format!("Failed to bind RTCP socket on {}", rtcp_local))?;

    let identity = random_identity();
    let srtp = Arc::new(SrtpSession::with_config(config.srtp.clone(), sink));
    let session = Arc::new(PeerSession::new(
        &config.peer.client_id,
        session_config.session_id,
        rtp_socket.local_addr()?,
        srtp,
    ));
    session.init(identity).context("Failed to initialize SRTP session")?;

    let mut mkis = Vec::new();
    for key in &session_config.keys {
        let material = key.decode()?;
        session
            .add_master_key(&material.mki, &material.key, &material.salt)
            .with_context(|| format!("Failed to add master key to session {}", session_config.session_id))?;
        mkis.push(material.mki);
    }
    let initial_mki = session_config.initial_mki()?;
    let remote = session_config.remote;
    session.set_destination_key(StreamKind::Rtp, remote, Some(initial_mki.as_slice()), false)?;
    session.set_destination_key(
        StreamKind::Rtcp,
        SessionConfig::rtcp_addr(remote),
        Some(initial_mki.as_slice()),
        false,
    )?;

    tracing::info!(
        "Session {} bound to {}, remote: {} (SSRC: {:#010x})",
        session_config.session_id,
        local,
        remote,
        identity.ssrc
    );

    Ok((
        session,
        SessionKeys {
            remote,
            initial_mki,
            mkis,
        },
        MediaSockets {
            rtp: Arc::new(rtp_socket),
            rtcp: Arc::new(rtcp_socket),
        },
    ))
}

/// Random SSRC and starting sequence number.
fn random_identity() -> LocalIdentity {
    let id = uuid::Uuid::new_v4();
    let bytes = id.as_bytes();
    LocalIdentity {
        ssrc: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        roc: 0,
        // Keep clear of the top so the first packets do not wrap the ROC.
        seq: u16::from_be_bytes([bytes[4], bytes[5]]) & 0x7FFF,
        rtcp_index: 0,
    }
}

/// Send loop: every 20ms, protect a packet of silence and send it; every
/// `rtcp_interval`, a sender report.
async fn send_loop(
    shared: Arc<Shared>,
    session: Arc<PeerSession>,
    sockets: MediaSockets,
    remote: SocketAddr,
    codec: G711,
    stats: Arc<Mutex<PeerStats>>,
    time_lock: ReportClock,
    rtcp_interval: Duration,
) {
    let srtp = session.srtp().clone();
    let rtcp_remote = SessionConfig::rtcp_addr(remote);
    let mut timestamp: u32 = 0;
    let mut interval = time::interval(Duration::from_millis(rtp::PACKET_INTERVAL_MS));

    tracing::info!("Session {} send loop started ({})", session.session_id(), codec);

    while shared.is_open() {
        interval.tick().await;

        let Ok((rtp_index, rtcp_index)) = srtp.local_indexes() else {
            break;
        };
        let ssrc = match srtp.local_ssrc() {
            Ok(ssrc) => ssrc,
            Err(_) => break,
        };
        let (roc, seq) = split_rtp_index(rtp_index);
        let packet = rtp::encode(codec.payload_type(), seq, timestamp, ssrc, &codec.silence());
        timestamp = timestamp.wrapping_add(rtp::TIMESTAMP_INCREMENT);

        match srtp.protect_rtp(remote, &packet, roc) {
            Ok(protected) => match sockets.rtp.send_to(&protected, remote).await {
                Ok(_) => {
                    let mut s = stats.lock().await;
                    s.packets_sent += 1;
                    s.bytes_sent += packet.len() as u64;
                }
                Err(e) => tracing::warn!("UDP send failed: {:#}", e),
            },
            Err(e) => {
                tracing::debug!("SRTP protect failed: {}", e);
                continue;
            }
        }

        let due = {
            let mut last = time_lock.lock().await;
            let due = last.map_or(true, |at| at.elapsed() >= rtcp_interval);
            if due {
                *last = Some(Instant::now());
            }
            due
        };
        if !due {
            continue;
        }

        let report = {
            let s = stats.lock().await;
            rtcp::build_sender_report(
                &RtpSendStats {
                    packets_sent: s.packets_sent as u32,
                    bytes_sent: s.bytes_sent as u32,
                    ssrc,
                    last_rtp_timestamp: timestamp,
                },
                rtcp::ntp_timestamp(),
                &format!("{}@{}", shared.client_id, session.session_id()),
            )
        };
        match srtp.protect_rtcp(rtcp_remote, &report, rtcp_index as u32, true) {
            Ok(protected) => {
                if let Err(e) = sockets.rtcp.send_to(&protected, rtcp_remote).await {
                    tracing::warn!("RTCP send failed: {:#}", e);
                } else {
                    stats.lock().await.reports_sent += 1;
                }
            }
            Err(e) => tracing::debug!("SRTCP protect failed: {}", e),
        }
    }

    tracing::debug!("Session {} send loop stopped", session.session_id());
}

/// Receive loop: unprotect whatever arrives on the RTP and RTCP sockets.
async fn recv_loop(
    shared: Arc<Shared>,
    session: Arc<PeerSession>,
    sockets: MediaSockets,
    stats: Arc<Mutex<PeerStats>>,
) {
    let srtp = session.srtp().clone();
    let mut rtp_buf = [0u8; 2048];
    let mut rtcp_buf = [0u8; 2048];

    tracing::info!("Session {} recv loop started", session.session_id());

    while shared.is_open() {
        tokio::select! {
            received = sockets.rtp.recv_from(&mut rtp_buf) => match received {
                Ok((len, from)) => {
                    handle_rtp(&srtp, &rtp_buf[..len], from, &stats).await;
                }
                Err(e) => {
                    tracing::warn!("UDP recv error: {:#}", e);
                    time::sleep(POLL_INTERVAL).await;
                }
            },
            received = sockets.rtcp.recv_from(&mut rtcp_buf) => match received {
                Ok((len, from)) => {
                    handle_rtcp(&srtp, &rtcp_buf[..len], from, &stats).await;
                }
                Err(e) => {
                    tracing::warn!("RTCP recv error: {:#}", e);
                    time::sleep(POLL_INTERVAL).await;
                }
            },
            _ = time::sleep(POLL_INTERVAL) => {}
        }
    }

    tracing::debug!("Session {} recv loop stopped", session.session_id());
}

async fn handle_rtp(srtp: &SrtpSession, data: &[u8], from: SocketAddr, stats: &Mutex<PeerStats>) {
    match srtp.unprotect_rtp(data) {
        Ok(plain) => {
            if let Ok(pkt) = rtp::decode(&plain) {
                let mut s = stats.lock().await;
                s.packets_received += 1;
                s.bytes_received += plain.len() as u64;
                s.last_seq = pkt.sequence_number;

                if s.packets_received % 250 == 1 {
                    tracing::info!(
                        "Recv audio: seq={}, ssrc={:#010x}, pt={} (total: {} pkts)",
                        pkt.sequence_number,
                        pkt.ssrc,
                        pkt.payload_type,
                        s.packets_received
                    );
                }
            }
        }
        Err(SrtpError::Replay(_)) => stats.lock().await.replays_rejected += 1,
        Err(e) => {
            stats.lock().await.unprotect_failures += 1;
            tracing::trace!("Could not unprotect packet from {} ({} bytes): {}", from, data.len(), e);
        }
    }
}

async fn handle_rtcp(srtp: &SrtpSession, data: &[u8], from: SocketAddr, stats: &Mutex<PeerStats>) {
    if !rtcp::is_rtcp_packet(data) {
        tracing::trace!("Non-RTCP datagram on RTCP port from {}", from);
        return;
    }
    match srtp.unprotect_rtcp(data) {
        Ok(plain) => {
            stats.lock().await.reports_received += 1;
            for block in rtcp::parse_rtcp(&plain) {
                if let RtcpBlock::SenderReport {
                    ssrc,
                    sender_packet_count,
                    ..
                } = block
                {
                    tracing::debug!(
                        "Sender report from {:#010x}: {} packets sent",
                        ssrc,
                        sender_packet_count
                    );
                }
            }
        }
        Err(SrtpError::Replay(_)) => stats.lock().await.replays_rejected += 1,
        Err(e) => {
            stats.lock().await.unprotect_failures += 1;
            tracing::trace!("Could not unprotect RTCP from {}: {}", from, e);
        }
    }
}

/// Periodically announce every session with `notify`.
async fn announce_loop(shared: Arc<Shared>, every: Duration) {
    let mut interval = time::interval(every);
    while shared.is_open() {
        interval.tick().await;
        for session in shared.registry.iter() {
            match session.notify_message() {
                Ok(message) => {
                    let datagram = broadcast::encode_datagram(&shared.client_id, &message);
                    shared.send_datagram(&datagram).await;
                }
                Err(e) => tracing::debug!("No announcement for session {}: {}", session.session_id(), e),
            }
        }
    }
}

/// Receive broadcasts and apply them to the local sessions.
async fn listen_loop(shared: Arc<Shared>) {
    let mut buf = [0u8; 1500];
    while shared.is_open() {
        let received = match time::timeout(POLL_INTERVAL, shared.broadcast.recv_from(&mut buf)).await {
            Ok(received) => received,
            Err(_) => continue,
        };
        let (len, from) = match received {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Broadcast recv error: {:#}", e);
                time::sleep(POLL_INTERVAL).await;
                continue;
            }
        };
        let Ok(datagram) = std::str::from_utf8(&buf[..len]) else {
            tracing::debug!("Non-UTF-8 broadcast from {}", from);
            continue;
        };
        let deliveries = match shared.registry.dispatch(datagram) {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!("Bad broadcast from {}: {}", from, e);
                continue;
            }
        };
        for delivery in deliveries {
            if let Err(e) = apply(&shared, &delivery).await {
                tracing::warn!(
                    session = delivery.session_id,
                    client = %delivery.client_id,
                    "Could not apply broadcast: {}",
                    e
                );
            }
        }
    }
}

/// React to a broadcast a session accepted: admit new parties as remote
/// sources and follow their scheduled key changes.
async fn apply(shared: &Shared, delivery: &Delivery) -> crate::srtp::Result<()> {
    let session = shared
        .registry
        .get(delivery.session_id)
        .ok_or(SrtpError::NullPtr("registered session"))?;
    let keys = shared
        .keys
        .get(&delivery.session_id)
        .ok_or(SrtpError::NullPtr("session keys"))?;
    let client = delivery.client_id.as_str();
    let party_session = delivery.message.session_id();

    match delivery.handled {
        Handled::Notify(NotifyOutcome::Joined) => {
            admit(session, keys, client, party_session)?;
        }
        Handled::Notify(NotifyOutcome::SsrcChanged { previous }) => {
            for kind in [StreamKind::Rtp, StreamKind::Rtcp] {
                match session.srtp().remove_remote_source(previous, kind) {
                    Ok(()) | Err(SrtpError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            admit(session, keys, client, party_session)?;
        }
        Handled::Indexes => {
            let Some(rotation) = &shared.rotation else {
                return Ok(());
            };
            let BroadcastMessage::SendIndexes {
                rtp_index,
                rtcp_index,
                ..
            } = delivery.message
            else {
                return Ok(());
            };
            let key = (delivery.session_id, client.to_string(), party_session);
            {
                let mut scheduled = shared.scheduled.lock().await;
                if scheduled.get(&key) == Some(&(rtp_index, rtcp_index)) {
                    return Ok(());
                }
                scheduled.insert(key, (rtp_index, rtcp_index));
            }
            let party = session
                .remote(client, party_session)
                .ok_or(SrtpError::NullPtr("valid remote party"))?;
            for kind in [StreamKind::Rtp, StreamKind::Rtcp] {
                let current = session.srtp().active_source_key(party.ssrc, kind)?;
                let Some(next) = keys.after(current.as_ref().map(|m| m.as_bytes())) else {
                    return Ok(());
                };
                session.schedule_source_key_at(
                    client,
                    party_session,
                    Some(next),
                    kind,
                    rotation.index_offset,
                    false,
                )?;
            }
        }
        Handled::Notify(NotifyOutcome::Refreshed) | Handled::OwnMessage => {}
    }
    Ok(())
}

fn admit(session: &PeerSession, keys: &SessionKeys, client: &str, party_session: u32) -> crate::srtp::Result<()> {
    for kind in [StreamKind::Rtp, StreamKind::Rtcp] {
        session.add_remote_source(client, party_session, kind)?;
        session.set_source_key(client, party_session, Some(keys.initial_mki.as_slice()), kind, false)?;
    }
    tracing::info!(
        session = session.session_id(),
        "Admitted remote party {}/{}",
        client,
        party_session
    );
    Ok(())
}

/// Periodically schedule the next key on every session.
async fn rotation_loop(shared: Arc<Shared>, every: Duration) {
    let Some(rotation) = shared.rotation.clone() else {
        return;
    };
    let mut interval = time::interval(every);
    // The first tick completes immediately.
    interval.tick().await;
    while shared.is_open() {
        interval.tick().await;
        if !shared.is_open() {
            break;
        }
        if let Err(e) = rotate(&shared, &rotation).await {
            tracing::warn!("Key rotation failed: {:#}", e);
        }
    }
}

/// Schedule the next send-side key `index_offset` packets ahead and tell
/// the other peers with `sendindexes`.
async fn rotate(shared: &Shared, rotation: &RotationConfig) -> Result<()> {
    for session in shared.registry.iter() {
        let Some(keys) = shared.keys.get(&session.session_id()) else {
            continue;
        };
        let remote = keys.remote;
        let rtcp_remote = SessionConfig::rtcp_addr(remote);
        let current = session.srtp().active_destination_key(StreamKind::Rtp, remote)?;
        let Some(next) = keys.after(current.as_ref().map(|m| m.as_bytes())) else {
            continue;
        };

        session.get_local_indexes(remote.ip(), remote.port(), rtcp_remote.port())?;
        session.schedule_destination_key_at(
            StreamKind::Rtp,
            remote,
            Some(next),
            rotation.index_offset,
            rotation.share_trigger,
        )?;
        session.schedule_destination_key_at(
            StreamKind::Rtcp,
            rtcp_remote,
            Some(next),
            rotation.index_offset,
            rotation.share_trigger,
        )?;
        tracing::info!(
            "Session {} rotating to mki {} in {} packets",
            session.session_id(),
            crate::srtp::Mki::from(next),
            rotation.index_offset
        );

        let datagram = broadcast::encode_datagram(&shared.client_id, &session.send_indexes_message()?);
        shared.send_datagram(&datagram).await;
    }
    Ok(())
}

/// Defaults for a pair of peers on the loopback interface.
pub fn loopback_pair(base_port: u16) -> (PeerConfig, PeerConfig) {
    let addr = |offset: u16| SocketAddr::from(([127, 0, 0, 1], base_port + offset));
    let a = PeerConfig {
        client_id: "peer-a".to_string(),
        broadcast_bind: addr(0),
        broadcast_targets: vec![addr(1)],
        ..PeerConfig::default()
    };
    let b = PeerConfig {
        client_id: "peer-b".to_string(),
        broadcast_bind: addr(1),
        broadcast_targets: vec![addr(0)],
        ..PeerConfig::default()
    };
    (a, b)
}
