//! Typed clients for the storage sub-protocols.
//!
//! Each client owns a [`DomainChannel`](crate::protocol::DomainChannel)
//! registered with the session's multiplexer. Calls block the calling thread
//! until the inspected application answers, so they must never be issued from
//! a server listener, which runs on the connection's I/O thread.
pub mod file;
pub mod key_value;
pub mod sql;

pub use file::{FileClient, FileInfo, FileServerIdentification};
pub use key_value::{
    KeyIcon, KeyTypeHint, KeyValueClient, KeyValueEntry, KeyValueServerIdentification,
    KeyValueServerValue, KeyValueServerValues,
};
pub use sql::{
    QueryResult, SqlClient, SqlColumn, SqlServerIdentification, SqlTable, UpdateResult,
};

/// A storage server announced by the inspected application, of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageServer {
    KeyValue(KeyValueServerIdentification),
    Sql(SqlServerIdentification),
    File(FileServerIdentification),
}

impl StorageServer {
    pub fn id(&self) -> &str {
        match self {
            StorageServer::KeyValue(server) => &server.id,
            StorageServer::Sql(server) => &server.id,
            StorageServer::File(server) => &server.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            StorageServer::KeyValue(server) => &server.name,
            StorageServer::Sql(server) => &server.name,
            StorageServer::File(server) => &server.name,
        }
    }

    pub fn icon(&self) -> Option<&str> {
        match self {
            StorageServer::KeyValue(server) => server.icon.as_deref(),
            StorageServer::Sql(server) => server.icon.as_deref(),
            StorageServer::File(server) => server.icon.as_deref(),
        }
    }

    /// Domain the server was announced on.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageServer::KeyValue(_) => "key_value",
            StorageServer::Sql(_) => "sql",
            StorageServer::File(_) => "file",
        }
    }
}

impl From<KeyValueServerIdentification> for StorageServer {
    fn from(server: KeyValueServerIdentification) -> Self {
        StorageServer::KeyValue(server)
    }
}

impl From<SqlServerIdentification> for StorageServer {
    fn from(server: SqlServerIdentification) -> Self {
        StorageServer::Sql(server)
    }
}

impl From<FileServerIdentification> for StorageServer {
    fn from(server: FileServerIdentification) -> Self {
        StorageServer::File(server)
    }
}
