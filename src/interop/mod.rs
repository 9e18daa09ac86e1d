//! Key-exchange broadcast interop: the `notify`/`sendindexes` protocol,
//! per-session peer state, and a UDP peer runtime that drives it.

pub mod broadcast;
pub mod peer;
pub mod registry;
pub mod remote;
pub mod session;

pub use broadcast::BroadcastMessage;
pub use peer::{InteropPeer, PeerStats};
pub use registry::{Delivery, SessionRegistry};
pub use remote::{NotifyOutcome, RemoteParty};
pub use session::{Handled, PeerSession};
