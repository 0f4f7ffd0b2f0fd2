use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Session level domain carrying the application descriptor and control messages.
pub const DOMAIN_ID: &str = "id";
pub const DOMAIN_KEY_VALUE: &str = "key_value";
pub const DOMAIN_SQL: &str = "sql";
pub const DOMAIN_FILE: &str = "file";

/// Message type of unsolicited server announcements.
pub const TYPE_IDENTIFY: &str = "identify";
/// Control message resuming a remote application that waits for an inspector.
pub const TYPE_UNPAUSE: &str = "unpause";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to parse envelope: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("malformed envelope, {0}")]
    Malformed(String),
    #[error("unknown domain '{0}'")]
    UnknownDomain(String),
}

/// Top level message unit exchanged over the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `{"type": ..., "data": ...}` body used by requests and announcements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedMessage<T> {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: T,
}

/// Envelope classified by its correlation fields.
#[derive(Debug, PartialEq)]
pub enum Inbound {
    /// `requestId` is absent.
    Unsolicited { domain: String, data: Value },
    Response {
        domain: String,
        request_id: String,
        data: Value,
    },
    Error {
        domain: String,
        request_id: String,
        message: String,
    },
}

impl Envelope {
    pub fn request(domain: &str, request_id: &str, data: Value) -> Self {
        Self {
            domain: domain.to_string(),
            request_id: Some(request_id.to_string()),
            data: Some(data),
            error: None,
        }
    }

    pub fn unsolicited(domain: &str, data: Value) -> Self {
        Self {
            domain: domain.to_string(),
            request_id: None,
            data: Some(data),
            error: None,
        }
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Applies the correlation rules: a request id makes the envelope a reply
    /// (error wins when both `data` and `error` are set), no request id makes it
    /// an announcement which must then carry `data`.
    pub fn classify(self) -> Result<Inbound, ProtocolError> {
        let Envelope {
            domain,
            request_id,
            data,
            error,
        } = self;

        match (request_id, data, error) {
            (Some(request_id), data, Some(message)) => {
                if data.is_some() {
                    log::warn!(
                        "envelope {domain}/{request_id} carries both data and error, using error"
                    );
                }
                Ok(Inbound::Error {
                    domain,
                    request_id,
                    message,
                })
            }
            (Some(request_id), data, None) => Ok(Inbound::Response {
                domain,
                request_id,
                data: data.unwrap_or(Value::Null),
            }),
            (None, Some(data), _) => Ok(Inbound::Unsolicited { domain, data }),
            (None, None, Some(message)) => Err(ProtocolError::Malformed(format!(
                "uncorrelated error on domain '{domain}': {message}"
            ))),
            (None, None, None) => Err(ProtocolError::Malformed(format!(
                "envelope on domain '{domain}' has neither requestId nor data"
            ))),
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
