//! Inspection wire protocol.
//!
//! This module defines how the inspector talks to an inspected application: the
//! JSON envelope exchanged over a WebSocket, the connection that carries it, and
//! the correlation machinery every storage sub-protocol is built on.
//!
//! # Overview
//!
//! A single duplex connection carries several independent domains. Each text
//! frame is one [`Envelope`]:
//!
//! ```json
//! {"domain": "key_value", "requestId": "…", "data": {"type": "get", "data": {"id": "prefs"}}}
//! ```
//!
//! Replies echo the `requestId` and carry either `data` or `error`. Envelopes
//! without a `requestId` are announcements, most notably `identify`, which a
//! storage server sends to make itself known.
//!
//! # Key Components
//!
//! - [`ConnectionManager`]: dial-out or single-peer listen connection, serializes
//!   every callback coming from the transport.
//! - [`Multiplexer`]: parses envelopes, routes them per domain and sends requests.
//! - [`DomainChannel`]: request/response correlation and the server registry of
//!   one domain, shared by the sub-protocol clients in [`crate::client`].
//! - [`ValueWithType`]: typed values of the key-value and SQL domains.
//!
//! # Error Handling
//!
//! Malformed or unroutable envelopes are logged and dropped without affecting
//! other traffic. Only [`RequestError`] reaches calling code, and only for the
//! call it belongs to. Losing the connection fails every request in flight with
//! [`RequestError::ConnectionClosed`].
//!
//! # See Also
//!
//! - [`inspector`](crate::inspector): caches built on top of the clients.
use std::sync::{Mutex, MutexGuard};

pub mod connection;
pub mod domain;
pub mod envelope;
pub mod multiplexer;
pub mod pending;
pub mod registry;
pub mod transport;
pub mod value;

pub use connection::{
    ConnectionListener, ConnectionManager, ConnectionMode, MessageHandler, MessageSink,
};
pub use domain::{DomainChannel, DomainHandler};
pub use envelope::{Envelope, ProtocolError};
pub use multiplexer::{Multiplexer, SessionIdentification};
pub use pending::{PendingRequests, Reply, RequestError};
pub use registry::{Listener, Registry};
pub use transport::{TransportError, WebSocketTransport};
pub use value::{ValueType, ValueWithType};

/// Recovers the guard of a poisoned lock. Critical sections in this crate only
/// swap whole values, so the data stays consistent after a panicking holder.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
