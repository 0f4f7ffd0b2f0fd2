use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::protocol::{
    DomainChannel, Listener, Multiplexer, RequestError, ValueType, ValueWithType,
    envelope::DOMAIN_KEY_VALUE,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyValueServerIdentification {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub key_suggestions: Vec<ValueWithType>,
    #[serde(default)]
    pub key_options: Vec<ValueWithType>,
    #[serde(default)]
    pub supported_key_types: Vec<ValueType>,
    #[serde(default)]
    pub supported_value_types: Vec<ValueType>,
    #[serde(default)]
    pub key_type_hints: Vec<KeyTypeHint>,
    #[serde(default)]
    pub key_icons: Vec<KeyIcon>,
}

/// Value type the server expects for a given key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyTypeHint {
    pub key: ValueWithType,
    #[serde(rename = "type")]
    pub value_type: ValueType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyIcon {
    pub key: ValueWithType,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValueEntry {
    pub key: ValueWithType,
    pub value: ValueWithType,
}

/// Full content of one key-value server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KeyValueServerValues {
    pub id: String,
    pub values: Vec<KeyValueEntry>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KeyValueServerValue {
    pub id: String,
    pub key: ValueWithType,
    pub value: ValueWithType,
}

#[derive(Serialize)]
struct ServerRequest<'a> {
    id: &'a str,
}

#[derive(Serialize)]
struct KeyRequest<'a> {
    id: &'a str,
    key: &'a ValueWithType,
}

#[derive(Serialize)]
struct SetRequest<'a> {
    id: &'a str,
    key: &'a ValueWithType,
    value: &'a ValueWithType,
}

/// Client of the `key_value` domain.
pub struct KeyValueClient {
    channel: Arc<DomainChannel<KeyValueServerIdentification>>,
}

impl KeyValueClient {
    pub fn new(mux: &Arc<Multiplexer>) -> Self {
        Self {
            channel: DomainChannel::register(DOMAIN_KEY_VALUE, mux),
        }
    }

    pub fn servers(&self) -> Vec<KeyValueServerIdentification> {
        self.channel.servers()
    }

    pub fn add_server_listener(&self, listener: Listener<KeyValueServerIdentification>) {
        self.channel.add_server_listener(listener);
    }

    pub fn pending_count(&self) -> usize {
        self.channel.pending_count()
    }

    pub fn get_all(&self, server_id: &str) -> Result<KeyValueServerValues, RequestError> {
        self.channel.request("get", &ServerRequest { id: server_id })
    }

    pub fn get(
        &self,
        server_id: &str,
        key: &ValueWithType,
    ) -> Result<KeyValueServerValue, RequestError> {
        self.channel.request(
            "get_value",
            &KeyRequest {
                id: server_id,
                key,
            },
        )
    }

    pub fn set(
        &self,
        server_id: &str,
        key: &ValueWithType,
        value: &ValueWithType,
    ) -> Result<(), RequestError> {
        self.channel.request_ack(
            "set",
            &SetRequest {
                id: server_id,
                key,
                value,
            },
        )
    }

    pub fn remove(&self, server_id: &str, key: &ValueWithType) -> Result<(), RequestError> {
        self.channel.request_ack(
            "remove",
            &KeyRequest {
                id: server_id,
                key,
            },
        )
    }

    pub fn clear(&self, server_id: &str) -> Result<(), RequestError> {
        self.channel
            .request_ack("clear", &ServerRequest { id: server_id })
    }
}
