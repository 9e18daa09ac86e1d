//! Key-lifecycle notifications.
//!
//! The session reports what it does to an [`EventSink`]. [`TracingSink`]
//! logs every event; [`MemorySink`] records them for inspection.

use parking_lot::Mutex;

use super::key::Mki;
use super::stream::StreamId;
use super::StreamKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SrtpEvent {
    Initialized,
    Closed,
    KeyAdded {
        mki: Mki,
    },
    /// `contexts` counts the stream contexts still naming the key.
    KeyRemoved {
        mki: Mki,
        contexts: usize,
    },
    KeysCleared {
        count: usize,
    },
    /// A key protected as many packets as the index space allows.
    KeyLimitReached {
        mki: Mki,
        kind: StreamKind,
    },
    /// A key assignment was added to a stream's timeline.
    KeyScheduled {
        stream: StreamId,
        from: u64,
        mki: Option<Mki>,
        trigger: bool,
    },
    /// A shared-trigger switch moved other streams to a new key.
    TriggerFired {
        stream: StreamId,
        index: u64,
        previous: Mki,
        next: Option<Mki>,
        followers: usize,
    },
    StreamKeysCleared {
        stream: StreamId,
    },
    DestinationCreated {
        stream: StreamId,
    },
    DestinationRemoved {
        stream: StreamId,
    },
    SourceAdded {
        stream: StreamId,
        index: u64,
    },
    SourceRemoved {
        stream: StreamId,
    },
    ReplayRejected {
        stream: StreamId,
        index: u64,
    },
    LocalSsrcChanged {
        ssrc: u32,
    },
}

/// Receiver of session events. Events are delivered after the session lock
/// is released, in the order they happened.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &SrtpEvent);
}

/// Logs each event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_event(&self, event: &SrtpEvent) {
        match event {
            SrtpEvent::Initialized => tracing::debug!("SRTP session initialized"),
            SrtpEvent::Closed => tracing::debug!("SRTP session closed"),
            SrtpEvent::KeyAdded { mki } => tracing::info!(%mki, "Master key added"),
            SrtpEvent::KeyRemoved { mki, contexts } => {
                if *contexts > 0 {
                    tracing::warn!(%mki, contexts, "Master key removed while still referenced");
                } else {
                    tracing::info!(%mki, "Master key removed");
                }
            }
            SrtpEvent::KeysCleared { count } => tracing::info!(count, "All master keys removed"),
            SrtpEvent::KeyLimitReached { mki, kind } => {
                tracing::warn!(%mki, %kind, "Master key reached its packet limit")
            }
            SrtpEvent::KeyScheduled {
                stream,
                from,
                mki,
                trigger,
            } => match mki {
                Some(mki) => tracing::info!(%stream, from, %mki, trigger, "Key scheduled"),
                None => tracing::info!(%stream, from, trigger, "Stream blocked"),
            },
            SrtpEvent::TriggerFired {
                stream,
                index,
                previous,
                next,
                followers,
            } => tracing::info!(
                %stream,
                index,
                %previous,
                next = ?next,
                followers,
                "Shared key switch"
            ),
            SrtpEvent::StreamKeysCleared { stream } => {
                tracing::info!(%stream, "Stream key mappings cleared")
            }
            SrtpEvent::DestinationCreated { stream } => tracing::debug!(%stream, "Destination created"),
            SrtpEvent::DestinationRemoved { stream } => tracing::debug!(%stream, "Destination removed"),
            SrtpEvent::SourceAdded { stream, index } => {
                tracing::info!(%stream, index, "Remote source added")
            }
            SrtpEvent::SourceRemoved { stream } => tracing::info!(%stream, "Remote source removed"),
            SrtpEvent::ReplayRejected { stream, index } => {
                tracing::debug!(%stream, index, "Replayed packet rejected")
            }
            SrtpEvent::LocalSsrcChanged { ssrc } => {
                tracing::info!("Local SSRC changed to {:#010x}", ssrc)
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<SrtpEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SrtpEvent> {
        self.events.lock().clone()
    }

    /// Drain the recorded events.
    pub fn take(&self) -> Vec<SrtpEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl EventSink for MemorySink {
    fn on_event(&self, event: &SrtpEvent) {
        self.events.lock().push(event.clone());
    }
}
