use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize, de::Error as _};
use serde_json::Value;

use crate::protocol::{
    DomainChannel, Listener, Multiplexer, RequestError, envelope::DOMAIN_FILE,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileServerIdentification {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub root: Option<String>,
}

/// One entry of a file listing. `date` is the modification time in
/// milliseconds since the epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub is_dir: bool,
}

#[derive(Serialize)]
struct ListRequest<'a> {
    id: &'a str,
    root: &'a str,
}

#[derive(Serialize)]
struct PathRequest<'a> {
    id: &'a str,
    path: &'a str,
}

#[derive(Serialize)]
struct WriteRequest<'a> {
    id: &'a str,
    path: &'a str,
    data: String,
}

#[derive(Serialize)]
struct RemoveRequest<'a> {
    id: &'a str,
    path: &'a str,
    recursive: bool,
}

#[derive(Deserialize)]
struct Contents {
    data: String,
}

/// Accepts both `[...]` and `{"files": [...]}` as a listing.
fn decode_listing(value: Value) -> Result<Vec<FileInfo>, serde_json::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Listing {
        Plain(Vec<FileInfo>),
        Wrapped { files: Vec<FileInfo> },
    }

    Ok(match serde_json::from_value(value)? {
        Listing::Plain(files) | Listing::Wrapped { files } => files,
    })
}

fn decode_contents(value: Value) -> Result<Vec<u8>, serde_json::Error> {
    let contents: Contents = serde_json::from_value(value)?;
    STANDARD
        .decode(contents.data)
        .map_err(|e| serde_json::Error::custom(format!("invalid base64 file data: {e}")))
}

/// Client of the `file` domain.
pub struct FileClient {
    channel: Arc<DomainChannel<FileServerIdentification>>,
}

impl FileClient {
    pub fn new(mux: &Arc<Multiplexer>) -> Self {
        Self {
            channel: DomainChannel::register(DOMAIN_FILE, mux),
        }
    }

    pub fn servers(&self) -> Vec<FileServerIdentification> {
        self.channel.servers()
    }

    pub fn add_server_listener(&self, listener: Listener<FileServerIdentification>) {
        self.channel.add_server_listener(listener);
    }

    pub fn pending_count(&self) -> usize {
        self.channel.pending_count()
    }

    pub fn list(&self, server_id: &str, root: &str) -> Result<Vec<FileInfo>, RequestError> {
        self.channel.request_with(
            "list",
            &ListRequest {
                id: server_id,
                root,
            },
            decode_listing,
        )
    }

    pub fn read(&self, server_id: &str, path: &str) -> Result<Vec<u8>, RequestError> {
        self.channel.request_with(
            "read",
            &PathRequest {
                id: server_id,
                path,
            },
            decode_contents,
        )
    }

    pub fn write(&self, server_id: &str, path: &str, bytes: &[u8]) -> Result<(), RequestError> {
        self.channel.request_ack(
            "write",
            &WriteRequest {
                id: server_id,
                path,
                data: STANDARD.encode(bytes),
            },
        )
    }

    pub fn remove(&self, server_id: &str, path: &str, recursive: bool) -> Result<(), RequestError> {
        self.channel.request_ack(
            "remove",
            &RemoveRequest {
                id: server_id,
                path,
                recursive,
            },
        )
    }
}
