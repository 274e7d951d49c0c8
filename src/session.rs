//! Communication session management
//!
//! This module defines the trait for tunneling messages between the session
//! engine and connected clients (drivers and students). The tunnel
//! abstraction allows for different communication mechanisms while
//! maintaining a consistent interface.

use std::fmt::Display;

use uuid::Uuid;

use super::game::{SyncMessage, UpdateMessage};

/// Identity of one client connection
///
/// A user may hold several connections at once, one per quiz, and replaces
/// a connection when they reconnect. Disconnects are matched against this
/// identity so that losing one connection never affects another.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Creates a new random connection identity
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Trait for sending messages through a communication tunnel
///
/// This trait abstracts the communication mechanism used to send messages
/// to connected clients. Implementations might use WebSockets, Server-Sent
/// Events, or other real-time communication protocols. Sending must not
/// block: it is called while the session is locked.
pub trait Tunnel {
    /// Identity of the connection behind this tunnel
    ///
    /// Clones of a tunnel share the identity of the connection they write to.
    fn connection(&self) -> ConnectionId;

    /// Sends an update message to the client
    ///
    /// Update messages notify clients about changes that affect their
    /// current view or state.
    fn send_message(&self, message: &UpdateMessage);

    /// Sends a state synchronization message to the client
    ///
    /// Sync messages are used to synchronize the client's state with
    /// the current session state, typically when they join or rejoin.
    fn send_state(&self, state: &SyncMessage);

    /// Closes the communication tunnel
    ///
    /// Called when the connection is replaced by a newer one from the same
    /// user, or when the session is removed.
    fn close(self);
}
