use std::time::Duration;

/// The time a peer has to complete the [`Status`](cinder_wire::Status) exchange.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// The amount of requests that can be queued for a connection task before
/// [`Client::request`](crate::client::Client::request) waits.
pub const CLIENT_QUEUE_SIZE: usize = 32;
