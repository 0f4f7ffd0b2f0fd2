//! Minimal JSON-RPC 2.0 client for the VM service of the inspected process.
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::protocol::{
    ConnectionManager, ConnectionMode, MessageHandler, MessageSink, PendingRequests,
    RequestError, TransportError,
};

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("JSON-RPC error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl From<ErrorObject> for RpcError {
    fn from(error: ErrorObject) -> Self {
        RpcError::Remote {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

#[derive(Serialize)]
struct Call<'a> {
    jsonrpc: &'static str,
    id: &'a str,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IsolateRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Vm {
    #[serde(default)]
    pub isolates: Vec<IsolateRef>,
}

struct Responses {
    pending: PendingRequests,
}

impl MessageHandler for Responses {
    fn on_message(&self, text: &str) {
        trace!("vm service <- {text}");
        let message: Value = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("dropping malformed VM service message: {e}");
                return;
            }
        };

        let id = match message.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                debug!(
                    "ignoring VM service notification {}",
                    message.get("method").unwrap_or(&Value::Null)
                );
                return;
            }
        };

        if !self.pending.resolve(&id, Ok(message)) {
            warn!("VM service answered unknown request {id}, ignoring");
        }
    }

    fn on_disconnected(&self) {
        self.pending.fail_all(|| RequestError::ConnectionClosed);
    }
}

/// JSON-RPC client over its own dial-out connection.
pub struct VmServiceClient {
    connection: ConnectionManager,
    responses: Arc<Responses>,
    next_id: AtomicU64,
}

impl VmServiceClient {
    pub fn connect(url: &str, poll_interval: Duration) -> Result<Self, RpcError> {
        let connection = ConnectionManager::new(
            ConnectionMode::Dial {
                url: url.to_string(),
            },
            poll_interval,
        );
        let responses = Arc::new(Responses {
            pending: PendingRequests::new(),
        });
        let handler: Arc<dyn MessageHandler> = responses.clone();
        connection.set_message_handler(Arc::downgrade(&handler));
        connection.connect()?;

        Ok(Self {
            connection,
            responses,
            next_id: AtomicU64::new(1),
        })
    }

    /// Calls `method` and decodes its `result` as `T`.
    pub fn call<T>(&self, method: &str, params: Value) -> Result<T, RpcError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let text = serde_json::to_string(&Call {
            jsonrpc: "2.0",
            id: &id,
            method,
            params,
        })
        .map_err(RequestError::Encode)?;

        let reply = self.responses.pending.register(&id, |message: Value| {
            let response: Response = serde_json::from_value(message)?;
            match response.error {
                Some(error) => Ok(Err(error)),
                None => serde_json::from_value::<T>(response.result.unwrap_or(Value::Null)).map(Ok),
            }
        });

        debug!("vm service -> {method} ({id})");
        if let Err(e) = self.connection.send(text) {
            self.responses.pending.cancel(&id);
            return Err(e.into());
        }
        Ok(reply.wait()??)
    }

    pub fn get_vm(&self) -> Result<Vm, RpcError> {
        self.call("getVM", json!({}))
    }

    /// Invokes a service extension on one isolate. Every parameter travels as a
    /// string.
    pub fn call_extension_method(
        &self,
        method: &str,
        isolate_id: &str,
        params: &[(&str, String)],
    ) -> Result<Value, RpcError> {
        let mut args: Map<String, Value> = params
            .iter()
            .map(|(name, value)| (name.to_string(), Value::String(value.clone())))
            .collect();
        args.insert("isolateId".to_string(), Value::String(isolate_id.to_string()));
        self.call(method, Value::Object(args))
    }

    pub fn close(&self) {
        self.connection.close();
    }
}
