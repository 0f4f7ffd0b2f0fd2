use std::sync::{Arc, Weak};

use log::{debug, warn};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use super::{
    envelope::{TYPE_IDENTIFY, TypedMessage},
    multiplexer::Multiplexer,
    pending::{PendingRequests, RequestError, new_request_id},
    registry::{Listener, Registry},
};

/// Receiver of the traffic the multiplexer routes to one domain.
pub trait DomainHandler: Send + Sync {
    fn on_response(&self, request_id: &str, outcome: Result<Value, RequestError>);
    fn on_unsolicited(&self, data: Value);
    fn on_disconnected(&self);
}

/// Correlation core shared by the sub-protocol clients.
///
/// `I` is the identification record servers of this domain announce.
pub struct DomainChannel<I> {
    domain: &'static str,
    mux: Arc<Multiplexer>,
    pending: PendingRequests,
    servers: Registry<I>,
}

impl<I> DomainChannel<I>
where
    I: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Creates the channel and registers it with `mux` for `domain`.
    pub fn register(domain: &'static str, mux: &Arc<Multiplexer>) -> Arc<Self> {
        let channel = Arc::new(Self {
            domain,
            mux: Arc::clone(mux),
            pending: PendingRequests::new(),
            servers: Registry::new(),
        });
        let handler: Arc<dyn DomainHandler> = channel.clone();
        mux.register_domain(domain, Arc::downgrade(&handler));
        channel
    }

    pub fn domain(&self) -> &'static str {
        self.domain
    }

    /// Sends `{"type": verb, "data": payload}` and blocks until the correlated
    /// reply arrives, decoding it as `T`.
    pub fn request<R, T>(&self, verb: &str, payload: &R) -> Result<T, RequestError>
    where
        R: Serialize + ?Sized,
        T: DeserializeOwned + Send + 'static,
    {
        self.request_with(verb, payload, serde_json::from_value)
    }

    /// Like [`DomainChannel::request`] for replies whose body carries nothing of interest.
    pub fn request_ack<R>(&self, verb: &str, payload: &R) -> Result<(), RequestError>
    where
        R: Serialize + ?Sized,
    {
        self.request_with(verb, payload, |_| Ok(()))
    }

    pub fn request_with<R, T, F>(
        &self,
        verb: &str,
        payload: &R,
        decode: F,
    ) -> Result<T, RequestError>
    where
        R: Serialize + ?Sized,
        T: Send + 'static,
        F: FnOnce(Value) -> Result<T, serde_json::Error> + Send + 'static,
    {
        let data = serde_json::to_value(TypedMessage {
            kind: verb.to_string(),
            data: payload,
        })
        .map_err(RequestError::Encode)?;

        let id = new_request_id();
        let reply = self.pending.register(&id, decode);
        debug!("{} request {id}: {verb}", self.domain);

        if let Err(e) = self.mux.send_request(self.domain, &id, data) {
            self.pending.cancel(&id);
            return Err(e);
        }
        reply.wait()
    }

    /// Identifications announced so far, in arrival order.
    pub fn servers(&self) -> Vec<I> {
        self.servers.snapshot()
    }

    pub fn add_server_listener(&self, listener: Listener<I>) {
        self.servers.subscribe(listener);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        self.pending.contains(request_id)
    }
}

impl<I> DomainHandler for DomainChannel<I>
where
    I: DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn on_response(&self, request_id: &str, outcome: Result<Value, RequestError>) {
        if self.pending.resolve(request_id, outcome) {
            debug!("{} request {request_id} resolved", self.domain);
        } else {
            warn!(
                "{}: unsolicited response for unknown request {request_id}, ignoring",
                self.domain
            );
        }
    }

    fn on_unsolicited(&self, data: Value) {
        let message: TypedMessage<Value> = match serde_json::from_value(data) {
            Ok(message) => message,
            Err(e) => {
                warn!("{}: dropping malformed announcement: {e}", self.domain);
                return;
            }
        };

        if message.kind != TYPE_IDENTIFY {
            warn!(
                "{}: dropping unsupported announcement '{}'",
                self.domain, message.kind
            );
            return;
        }

        match serde_json::from_value::<I>(message.data) {
            Ok(server) => self.servers.announce(server),
            Err(e) => warn!("{}: dropping malformed identification: {e}", self.domain),
        }
    }

    fn on_disconnected(&self) {
        let failed = self.pending.fail_all(|| RequestError::ConnectionClosed);
        if failed > 0 {
            warn!(
                "{}: connection lost with {failed} request(s) in flight",
                self.domain
            );
        }
    }
}

/// Weak handle kept by the multiplexer.
pub(crate) type DomainRef = Weak<dyn DomainHandler>;
