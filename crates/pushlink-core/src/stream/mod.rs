//! Realtime stream
//!
//! One long-lived WebSocket per signed-in account. The server sends `nop`
//! heartbeats, `tickle`s when pushes change, and `push` ephemerals carrying
//! mirrored phone notifications (possibly end-to-end encrypted).
//!
//! ## Lifecycle
//!
//! 1. Read the credential; without one, stay disconnected
//! 2. Open `wss://.../websocket/<token>`
//! 3. Arm the heartbeat, start the keepalive, run a sync pass
//! 4. On close, error or silence: tear down and let the reconnection policy
//!    schedule the next attempt
//!
//! ## Usage
//!
//! ```ignore
//! let handle = ConnectionManager::start(config, parts);
//! let status = handle.status().await?;
//! ```

mod heartbeat;
mod keepalive;
mod manager;
mod message;
mod reconnect;
mod transport;

pub use heartbeat::{HeartbeatMonitor, DEFAULT_HEARTBEAT_TIMEOUT};
pub use keepalive::{KeepalivePulse, DEFAULT_KEEPALIVE_INTERVAL};
pub use manager::{
    Collaborators, ConnectionHandle, ConnectionManager, ConnectionState, IdleState,
    ManagerCommand, ManagerEvent, StatusReport,
};
pub use message::{StreamFrame, TickleKind, KEEPALIVE_TOKEN};
pub use reconnect::{Disconnected, PolicyAction, PolicyContext, ReconnectionPolicy};
pub use transport::{
    check_stream, AssumeOnline, Connector, Inbound, NetworkMonitor, StreamHandle, WsConnector,
    CLOSE_CODE_UNAUTHORIZED,
};
