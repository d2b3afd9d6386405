//! Connection Handles.
//!
//! This module contains the [`ConnectionHandle`] which allows banning a peer, disconnecting a peer and
//! checking if the peer is still connected.
use std::sync::{Arc, OnceLock};

use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// A [`ConnectionHandle`] builder.
#[derive(Default, Debug)]
pub struct HandleBuilder {
    permit: Option<OwnedSemaphorePermit>,
}

impl HandleBuilder {
    /// Create a new builder.
    pub const fn new() -> Self {
        Self { permit: None }
    }

    /// Sets the permit for this connection.
    #[must_use]
    pub fn with_permit(mut self, permit: Option<OwnedSemaphorePermit>) -> Self {
        self.permit = permit;
        self
    }

    /// Builds the [`ConnectionGuard`] which should be handed to the connection task and the [`ConnectionHandle`].
    pub fn build(self) -> (ConnectionGuard, ConnectionHandle) {
        let token = CancellationToken::new();

        (
            ConnectionGuard {
                token: token.clone(),
                _permit: self.permit,
            },
            ConnectionHandle {
                token,
                ban: Arc::new(OnceLock::new()),
            },
        )
    }
}

/// A marker set on a [`ConnectionHandle`] when the peer is disconnected for misbehaving.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BanPeer;

/// A struct given to the connection task.
pub struct ConnectionGuard {
    token: CancellationToken,
    _permit: Option<OwnedSemaphorePermit>,
}

impl ConnectionGuard {
    /// Checks if we should close the connection.
    pub fn should_shutdown(&self) -> WaitForCancellationFutureOwned {
        self.token.clone().cancelled_owned()
    }

    /// Tell the corresponding [`ConnectionHandle`]s that this connection is closed.
    ///
    /// This will be called on [`Drop::drop`].
    pub fn connection_closed(&self) {
        self.token.cancel();
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// A handle given to a task that needs to ban, disconnect or check the peer is still connected.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    token: CancellationToken,
    ban: Arc<OnceLock<BanPeer>>,
}

impl ConnectionHandle {
    /// A future that resolves when the connection closes.
    pub fn closed(&self) -> WaitForCancellationFutureOwned {
        self.token.clone().cancelled_owned()
    }

    /// Disconnects the peer and marks it as banned.
    pub fn ban_peer(&self) {
        drop(self.ban.set(BanPeer));
        self.token.cancel();
    }

    /// Checks if this connection is closed.
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns `true` if [`ConnectionHandle::ban_peer`] was called.
    pub fn is_banned(&self) -> bool {
        self.ban.get().is_some()
    }

    /// Sends the signal to the connection task to disconnect.
    pub fn send_close_signal(&self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropping_the_guard_closes_the_handle() {
        let (guard, handle) = HandleBuilder::new().build();
        assert!(!handle.is_closed());
        drop(guard);
        assert!(handle.is_closed());
        assert!(!handle.is_banned());
    }

    #[test]
    fn ban_closes_and_marks() {
        let (_guard, handle) = HandleBuilder::new().build();
        handle.clone().ban_peer();
        assert!(handle.is_closed());
        assert!(handle.is_banned());
    }
}
