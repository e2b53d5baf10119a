//! Transport module - the single duplex socket.
//!
//! - [`socket`] - socket abstraction and the WebSocket dialer
//! - [`Connection`] - live socket with reader/writer tasks
//! - [`Link`] - lazy connect and close-once per facade
//! - [`ConnectionState`] - lifecycle state machine

mod connection;
mod link;
pub mod socket;
mod state;

pub use connection::{
    Connection, TransportConfig, DEFAULT_CLOSE_TIMEOUT, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_INBOUND_CAPACITY,
};
pub use link::Link;
pub use socket::{BoxedSocket, ConnectRequest, Dialer, FrameSocket, TungsteniteDialer};
pub use state::{ConnectionState, SharedState};
