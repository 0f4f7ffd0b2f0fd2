use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{
    connection::{MessageHandler, MessageSink},
    domain::{DomainHandler, DomainRef},
    envelope::{DOMAIN_ID, Envelope, Inbound, ProtocolError, TYPE_UNPAUSE},
    lock,
    pending::RequestError,
    registry::{Listener, Registry},
};

/// Descriptor of the inspected application, announced on the `id` domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentification {
    pub bundle_id: String,
    pub version: String,
    #[serde(default)]
    pub icon: Option<String>,
    /// The application waits for an `unpause` before it starts.
    #[serde(default)]
    pub paused: bool,
}

/// Routes inbound envelopes to domain handlers and wraps outbound requests.
pub struct Multiplexer {
    sink: Arc<dyn MessageSink>,
    domains: Mutex<HashMap<String, DomainRef>>,
    session: Registry<SessionIdentification>,
}

impl Multiplexer {
    pub fn new(sink: Arc<dyn MessageSink>) -> Self {
        Self {
            sink,
            domains: Mutex::new(HashMap::new()),
            session: Registry::new(),
        }
    }

    pub fn register_domain(&self, domain: &str, handler: DomainRef) {
        if lock(&self.domains)
            .insert(domain.to_string(), handler)
            .is_some()
        {
            warn!("handler for domain '{domain}' replaced");
        }
    }

    pub fn send_request(
        &self,
        domain: &str,
        request_id: &str,
        data: Value,
    ) -> Result<(), RequestError> {
        let text = Envelope::request(domain, request_id, data)
            .to_text()
            .map_err(RequestError::Encode)?;
        self.sink.send(text)?;
        Ok(())
    }

    /// Lets a paused application continue.
    pub fn unpause(&self) -> Result<(), RequestError> {
        let text = Envelope::unsolicited(DOMAIN_ID, json!({ "type": TYPE_UNPAUSE }))
            .to_text()
            .map_err(RequestError::Encode)?;
        info!("sending unpause");
        self.sink.send(text)?;
        Ok(())
    }

    pub fn session_identifications(&self) -> Vec<SessionIdentification> {
        self.session.snapshot()
    }

    pub fn add_session_listener(&self, listener: Listener<SessionIdentification>) {
        self.session.subscribe(listener);
    }

    fn handler(&self, domain: &str) -> Option<Arc<dyn DomainHandler>> {
        lock(&self.domains).get(domain).and_then(|h| h.upgrade())
    }

    fn dispatch(&self, text: &str) -> Result<(), ProtocolError> {
        let inbound = Envelope::parse(text)?.classify()?;

        let domain = match &inbound {
            Inbound::Unsolicited { domain, .. }
            | Inbound::Response { domain, .. }
            | Inbound::Error { domain, .. } => domain.clone(),
        };

        if domain == DOMAIN_ID {
            return self.dispatch_session(inbound);
        }

        let handler = self
            .handler(&domain)
            .ok_or(ProtocolError::UnknownDomain(domain))?;

        match inbound {
            Inbound::Unsolicited { data, .. } => handler.on_unsolicited(data),
            Inbound::Response {
                request_id, data, ..
            } => handler.on_response(&request_id, Ok(data)),
            Inbound::Error {
                request_id,
                message,
                ..
            } => handler.on_response(&request_id, Err(RequestError::Remote(message))),
        }
        Ok(())
    }

    fn dispatch_session(&self, inbound: Inbound) -> Result<(), ProtocolError> {
        match inbound {
            Inbound::Unsolicited { data, .. } => {
                let identification: SessionIdentification = serde_json::from_value(data)?;
                info!(
                    "inspecting {} {}{}",
                    identification.bundle_id,
                    identification.version,
                    if identification.paused { " (paused)" } else { "" }
                );
                self.session.announce(identification);
                Ok(())
            }
            Inbound::Response { request_id, .. } | Inbound::Error { request_id, .. } => {
                warn!("unsolicited response {request_id} on session domain, ignoring");
                Ok(())
            }
        }
    }
}

impl MessageHandler for Multiplexer {
    fn on_message(&self, text: &str) {
        if let Err(e) = self.dispatch(text) {
            warn!("dropping inbound message: {e}");
            debug!("dropped message: {text}");
        }
    }

    fn on_disconnected(&self) {
        let handlers: Vec<_> = lock(&self.domains)
            .values()
            .filter_map(|h| h.upgrade())
            .collect();
        for handler in handlers {
            handler.on_disconnected();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        sync::mpsc::{self, Receiver, Sender},
        thread::{self, JoinHandle},
        time::Duration,
    };

    use super::*;
    use crate::protocol::{TransportError, domain::DomainChannel, envelope::DOMAIN_KEY_VALUE};

    pub(crate) const TIMEOUT: Duration = Duration::from_secs(5);

    /// Sink standing in for a connection: records every outgoing text.
    pub(crate) struct RecordingSink {
        sent: Mutex<Sender<String>>,
        connected: Mutex<bool>,
    }

    impl MessageSink for RecordingSink {
        fn send(&self, text: String) -> Result<(), TransportError> {
            if !*self.connected.lock().unwrap() {
                return Err(TransportError::NotConnected);
            }
            self.sent.lock().unwrap().send(text).unwrap();
            Ok(())
        }
    }

    /// Fake remote end wired to a multiplexer.
    pub(crate) struct Remote {
        pub(crate) mux: Arc<Multiplexer>,
        sink: Arc<RecordingSink>,
        outgoing: Receiver<String>,
    }

    impl Remote {
        pub(crate) fn new() -> Self {
            let (sent, outgoing) = mpsc::channel();
            let sink = Arc::new(RecordingSink {
                sent: Mutex::new(sent),
                connected: Mutex::new(true),
            });
            let mux = Arc::new(Multiplexer::new(sink.clone()));
            Self {
                mux,
                sink,
                outgoing,
            }
        }

        pub(crate) fn disconnect(&self) {
            *self.sink.connected.lock().unwrap() = false;
            self.mux.on_disconnected();
        }

        /// Next envelope the inspector sent.
        pub(crate) fn next_request(&self) -> Value {
            let text = self.outgoing.recv_timeout(TIMEOUT).unwrap();
            serde_json::from_str(&text).unwrap()
        }

        pub(crate) fn no_request(&self) -> bool {
            self.outgoing.recv_timeout(Duration::from_millis(50)).is_err()
        }

        pub(crate) fn push(&self, envelope: Value) {
            self.mux.on_message(&envelope.to_string());
        }

        /// Waits for one request, checks its type, answers it with `data`.
        pub(crate) fn answer(&self, expected_type: &str, data: Value) -> Value {
            let request = self.next_request();
            assert_eq!(request["data"]["type"], expected_type, "request: {request}");
            self.push(json!({
                "domain": request["domain"],
                "requestId": request["requestId"],
                "data": data,
            }));
            request
        }

        pub(crate) fn fail(&self, expected_type: &str, error: &str) -> Value {
            let request = self.next_request();
            assert_eq!(request["data"]["type"], expected_type, "request: {request}");
            self.push(json!({
                "domain": request["domain"],
                "requestId": request["requestId"],
                "error": error,
            }));
            request
        }
    }

    /// Runs `call` on a separate thread, as an inspector consumer would.
    pub(crate) fn spawn<T: Send + 'static>(
        call: impl FnOnce() -> T + Send + 'static,
    ) -> JoinHandle<T> {
        thread::spawn(call)
    }

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Named {
        id: String,
    }

    fn key_value_channel(remote: &Remote) -> Arc<DomainChannel<Named>> {
        DomainChannel::register(DOMAIN_KEY_VALUE, &remote.mux)
    }

    #[test]
    fn end_to_end_get_round_trip() {
        let remote = Remote::new();
        let channel = key_value_channel(&remote);

        let caller = Arc::clone(&channel);
        let call = spawn(move || caller.request::<_, Value>("get", &json!({"id": "db1"})));

        let request = remote.next_request();
        assert_eq!(request["domain"], "key_value");
        assert_eq!(request["data"], json!({"type": "get", "data": {"id": "db1"}}));
        let id = request["requestId"].as_str().unwrap().to_string();
        assert!(channel.is_pending(&id));

        remote.push(json!({"domain": "key_value", "requestId": id, "data": {"id": "db1", "values": []}}));

        assert_eq!(call.join().unwrap().unwrap(), json!({"id": "db1", "values": []}));
        assert!(!channel.is_pending(&id));
        assert_eq!(channel.pending_count(), 0);
    }

    #[test]
    fn duplicate_response_has_no_effect() {
        let remote = Remote::new();
        let channel = key_value_channel(&remote);

        let caller = Arc::clone(&channel);
        let call = spawn(move || caller.request::<_, String>("get", &json!({})));
        let request = remote.answer("get", json!("first"));
        assert_eq!(call.join().unwrap().unwrap(), "first");

        remote.push(json!({"domain": "key_value", "requestId": request["requestId"], "data": "again"}));
        remote.push(json!({"domain": "key_value", "requestId": request["requestId"], "error": "late"}));
        assert_eq!(channel.pending_count(), 0);
    }

    #[test]
    fn concurrent_requests_resolve_out_of_order() {
        let remote = Remote::new();
        let channel = key_value_channel(&remote);

        let first_caller = Arc::clone(&channel);
        let first = spawn(move || first_caller.request::<_, String>("get", &json!({"n": 1})));
        let first_request = remote.next_request();
        let second_caller = Arc::clone(&channel);
        let second = spawn(move || second_caller.request::<_, String>("get", &json!({"n": 2})));
        let second_request = remote.next_request();

        remote.push(json!({"domain": "key_value", "requestId": second_request["requestId"], "data": "two"}));
        remote.push(json!({"domain": "key_value", "requestId": first_request["requestId"], "data": "one"}));

        assert_eq!(first.join().unwrap().unwrap(), "one");
        assert_eq!(second.join().unwrap().unwrap(), "two");
    }

    #[test]
    fn remote_error_is_scoped_to_one_call() {
        let remote = Remote::new();
        let channel = key_value_channel(&remote);

        let caller = Arc::clone(&channel);
        let call = spawn(move || caller.request::<_, Value>("clear", &json!({"id": "db1"})));
        remote.fail("clear", "read only store");

        assert!(matches!(
            call.join().unwrap(),
            Err(RequestError::Remote(message)) if message == "read only store"
        ));
    }

    #[test]
    fn malformed_and_unknown_messages_are_dropped() {
        let remote = Remote::new();
        let channel = key_value_channel(&remote);

        remote.mux.on_message("{not json");
        remote.push(json!({"domain": "shared_prefs", "data": {"type": "identify", "data": {}}}));
        remote.push(json!({"domain": "key_value"}));
        remote.push(json!({"domain": "key_value", "data": {"type": "identify", "data": {"name": "no id"}}}));
        remote.push(json!({"domain": "key_value", "data": {"type": "identify", "data": {"id": "ok"}}}));

        assert_eq!(
            channel.servers(),
            vec![Named {
                id: "ok".to_string()
            }]
        );
    }

    #[test]
    fn identifications_replay_to_late_listeners() {
        let remote = Remote::new();
        let channel = key_value_channel(&remote);
        for id in ["a", "b", "a"] {
            remote.push(json!({"domain": "key_value", "data": {"type": "identify", "data": {"id": id}}}));
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        channel.add_server_listener(Arc::new(move |server: &Named| {
            sink.lock().unwrap().push(server.id.clone())
        }));
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "a"]);

        remote.push(json!({"domain": "key_value", "data": {"type": "identify", "data": {"id": "c"}}}));
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "a", "c"]);
    }

    #[test]
    fn disconnect_fails_requests_in_flight() {
        let remote = Remote::new();
        let channel = key_value_channel(&remote);

        let caller = Arc::clone(&channel);
        let call = spawn(move || caller.request::<_, Value>("get", &json!({"id": "db1"})));
        remote.next_request();
        remote.disconnect();

        assert!(matches!(
            call.join().unwrap(),
            Err(RequestError::ConnectionClosed)
        ));
        assert_eq!(channel.pending_count(), 0);
    }

    #[test]
    fn send_failure_leaves_nothing_pending() {
        let remote = Remote::new();
        let channel = key_value_channel(&remote);
        remote.disconnect();

        let result = channel.request::<_, Value>("get", &json!({"id": "db1"}));
        assert!(matches!(
            result,
            Err(RequestError::Transport(TransportError::NotConnected))
        ));
        assert_eq!(channel.pending_count(), 0);
    }

    #[test]
    fn session_identification_and_unpause() {
        let remote = Remote::new();
        remote.push(json!({
            "domain": "id",
            "data": {"bundleId": "com.example.app", "version": "1.2.0", "paused": true}
        }));

        let sessions = remote.mux.session_identifications();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].bundle_id, "com.example.app");
        assert!(sessions[0].paused);
        assert_eq!(sessions[0].icon, None);

        remote.mux.unpause().unwrap();
        assert_eq!(
            remote.next_request(),
            json!({"domain": "id", "data": {"type": "unpause"}})
        );
    }
}
