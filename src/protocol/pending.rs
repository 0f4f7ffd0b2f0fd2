use std::{
    collections::HashMap,
    sync::{
        Mutex,
        mpsc::{self, Receiver},
    },
};

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::{lock, transport::TransportError};

/// Error seen by the caller of a correlated request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("remote error: {0}")]
    Remote(String),
    #[error("failed to decode response: {0}")]
    Decode(serde_json::Error),
    #[error("failed to encode request: {0}")]
    Encode(serde_json::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
}

/// Fresh request id, unique for the lifetime of the process.
pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

type Resolver = Box<dyn FnOnce(Result<Value, RequestError>) + Send>;

/// Requests sent but not answered yet, keyed by request id.
///
/// Each entry is resolved at most once: the first matching response (or error)
/// removes it and runs its decoder, anything citing the same id afterwards is
/// reported as unknown.
#[derive(Default)]
pub struct PendingRequests {
    table: Mutex<HashMap<String, Resolver>>,
}

/// Completion slot of one registered request.
#[derive(Debug)]
pub struct Reply<T> {
    id: String,
    receiver: Receiver<Result<T, RequestError>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id` with the decoder for its reply shape. Must be called before
    /// the request goes out so that a fast response always finds its entry.
    pub fn register<T, F>(&self, id: &str, decode: F) -> Reply<T>
    where
        T: Send + 'static,
        F: FnOnce(Value) -> Result<T, serde_json::Error> + Send + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel(1);
        let resolver: Resolver = Box::new(move |outcome| {
            let decoded = outcome.and_then(|data| decode(data).map_err(RequestError::Decode));
            let _ = sender.send(decoded);
        });

        let previous = lock(&self.table).insert(id.to_string(), resolver);
        debug_assert!(previous.is_none(), "request id {id} registered twice");

        Reply {
            id: id.to_string(),
            receiver,
        }
    }

    /// Resolves the entry for `id`. Returns `false` when no such request is pending.
    pub fn resolve(&self, id: &str, outcome: Result<Value, RequestError>) -> bool {
        let resolver = lock(&self.table).remove(id);
        match resolver {
            Some(resolve) => {
                resolve(outcome);
                true
            }
            None => false,
        }
    }

    /// Drops the entry for `id` without resolving it; its [`Reply`] then reports
    /// [`RequestError::ConnectionClosed`].
    pub fn cancel(&self, id: &str) -> bool {
        lock(&self.table).remove(id).is_some()
    }

    /// Resolves every pending request with the error built by `error`.
    pub fn fail_all(&self, error: impl Fn() -> RequestError) -> usize {
        let drained: Vec<_> = lock(&self.table).drain().collect();
        let count = drained.len();
        for (_, resolve) in drained {
            resolve(Err(error()));
        }
        count
    }

    pub fn contains(&self, id: &str) -> bool {
        lock(&self.table).contains_key(id)
    }

    pub fn len(&self) -> usize {
        lock(&self.table).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Reply<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Blocks the calling thread until the request is resolved. There is no
    /// timeout: an unanswered request waits until the connection goes away.
    pub fn wait(self) -> Result<T, RequestError> {
        self.receiver
            .recv()
            .unwrap_or(Err(RequestError::ConnectionClosed))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn decode_string(data: Value) -> Result<String, serde_json::Error> {
        serde_json::from_value(data)
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(new_request_id(), new_request_id());
    }

    #[test]
    fn resolves_exactly_once() {
        let pending = PendingRequests::new();
        let reply = pending.register("r1", decode_string);

        assert!(pending.contains("r1"));
        assert!(pending.resolve("r1", Ok(json!("first"))));
        assert!(!pending.resolve("r1", Ok(json!("second"))));
        assert!(pending.is_empty());
        assert_eq!(reply.wait().unwrap(), "first");
    }

    #[test]
    fn remote_error_reaches_caller() {
        let pending = PendingRequests::new();
        let reply = pending.register("r1", decode_string);

        pending.resolve("r1", Err(RequestError::Remote("no such table".to_string())));
        assert!(matches!(reply.wait(), Err(RequestError::Remote(m)) if m == "no such table"));
    }

    #[test]
    fn decode_failure_is_reported() {
        let pending = PendingRequests::new();
        let reply = pending.register("r1", decode_string);

        pending.resolve("r1", Ok(json!({"not": "a string"})));
        assert!(matches!(reply.wait(), Err(RequestError::Decode(_))));
    }

    #[test]
    fn responses_correlate_by_id_not_order() {
        let pending = PendingRequests::new();
        let first = pending.register("a", decode_string);
        let second = pending.register("b", decode_string);

        pending.resolve("b", Ok(json!("for b")));
        pending.resolve("a", Ok(json!("for a")));

        assert_eq!(first.wait().unwrap(), "for a");
        assert_eq!(second.wait().unwrap(), "for b");
    }

    #[test]
    fn cancelled_request_reports_closed() {
        let pending = PendingRequests::new();
        let reply = pending.register("r1", decode_string);

        assert!(pending.cancel("r1"));
        assert_eq!(reply.id(), "r1");
        assert!(matches!(reply.wait(), Err(RequestError::ConnectionClosed)));
    }

    #[test]
    fn fail_all_drains_table() {
        let pending = PendingRequests::new();
        let first = pending.register("a", decode_string);
        let second = pending.register("b", decode_string);

        assert_eq!(pending.fail_all(|| RequestError::ConnectionClosed), 2);
        assert!(pending.is_empty());
        assert!(matches!(first.wait(), Err(RequestError::ConnectionClosed)));
        assert!(matches!(second.wait(), Err(RequestError::ConnectionClosed)));
    }
}
