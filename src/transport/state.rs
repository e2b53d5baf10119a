//! Connection lifecycle state.
//!
//! ```text
//! Unconnected -> Connecting -> Open -> Closing -> Closed
//!                     |                              ^
//!                     +------------------------------+  (dial failed)
//! ```
//!
//! `Closed` is terminal. Transitions are compare-and-swap on one atomic so
//! the reader task, the writer task and `close()` can race safely.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Unconnected = 0,
    Connecting = 1,
    Open = 2,
    Closing = 3,
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Unconnected,
            1 => Self::Connecting,
            2 => Self::Open,
            3 => Self::Closing,
            _ => Self::Closed,
        }
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Unconnected, Connecting)
                | (Connecting, Open)
                | (Connecting, Closed)
                | (Open, Closing)
                | (Open, Closed)
                | (Closing, Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unconnected => "unconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Shared, atomically updated [`ConnectionState`].
#[derive(Debug, Clone)]
pub struct SharedState(Arc<AtomicU8>);

impl SharedState {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ConnectionState::Unconnected as u8)))
    }

    #[inline]
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.get() == ConnectionState::Open
    }

    /// Move from `from` to `to`.
    ///
    /// Fails with the actual current state when it is not `from`, or when
    /// the edge does not exist.
    pub fn transition(
        &self,
        from: ConnectionState,
        to: ConnectionState,
    ) -> Result<(), ConnectionState> {
        if !from.can_transition_to(to) {
            return Err(self.get());
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(ConnectionState::from_u8)
    }

    /// Enter `Closed` from whatever state we are in. Returns the previous state.
    pub fn mark_closed(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.swap(ConnectionState::Closed as u8, Ordering::AcqRel))
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
