//! One inspection session: a connection, its multiplexer, and the clients and
//! caches of every storage domain.
use std::{
    sync::{Arc, mpsc},
    thread,
    time::{Duration, Instant},
};

use log::{error, info};
use thiserror::Error;

use crate::{
    bootstrap::{self, BootstrapError},
    client::{FileClient, KeyValueClient, SqlClient, StorageServer},
    config::Config,
    inspector::{FileInspector, KeyValueInspector, SqlInspector},
    protocol::{
        ConnectionListener, ConnectionManager, ConnectionMode, Listener, MessageHandler,
        Multiplexer, RequestError, SessionIdentification, TransportError,
        connection::BoundCallback,
    },
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),
}

pub struct Session {
    connection: Arc<ConnectionManager>,
    mux: Arc<Multiplexer>,
    key_value_client: Arc<KeyValueClient>,
    sql_client: Arc<SqlClient>,
    file_client: Arc<FileClient>,
    key_value: KeyValueInspector,
    sql: SqlInspector,
    file: FileInspector,
}

impl Session {
    fn new(config: &Config, mode: ConnectionMode) -> Self {
        let connection = Arc::new(ConnectionManager::new(mode, config.poll_interval()));
        let mux = Arc::new(Multiplexer::new(connection.clone()));
        let handler: Arc<dyn MessageHandler> = mux.clone();
        connection.set_message_handler(Arc::downgrade(&handler));

        let key_value_client = Arc::new(KeyValueClient::new(&mux));
        let sql_client = Arc::new(SqlClient::new(&mux));
        let file_client = Arc::new(FileClient::new(&mux));

        Self {
            key_value: KeyValueInspector::new(Arc::clone(&key_value_client)),
            sql: SqlInspector::new(Arc::clone(&sql_client), config.sql_cache_capacity),
            file: FileInspector::new(Arc::clone(&file_client)),
            connection,
            mux,
            key_value_client,
            sql_client,
            file_client,
        }
    }

    /// Connects to an application listening at `url`.
    pub fn dial(config: &Config, url: &str) -> Result<Self, SessionError> {
        let session = Self::new(
            config,
            ConnectionMode::Dial {
                url: url.to_string(),
            },
        );
        session.connection.connect()?;
        Ok(session)
    }

    /// Binds `config.listen_address` and waits for an application to dial in.
    /// `on_bound` receives the bound port.
    pub fn listen(config: &Config, on_bound: BoundCallback) -> Result<Self, SessionError> {
        let session = Self::new(
            config,
            ConnectionMode::Listen {
                bind: config.listen_address,
                on_bound,
            },
        );
        session.connection.connect()?;
        Ok(session)
    }

    /// Listens, then asks the process behind `vm_service_url` to dial back.
    pub fn listen_and_bootstrap(
        config: &Config,
        vm_service_url: &str,
    ) -> Result<Self, SessionError> {
        let (done, outcome) = mpsc::channel();
        let url = vm_service_url.to_string();
        let extension = config.connect_extension.clone();
        let poll_interval = config.poll_interval();

        let session = Self::listen(
            config,
            Box::new(move |port| {
                let result = bootstrap::dial_back(&url, port, &extension, poll_interval);
                if let Err(e) = &result {
                    error!("dial back failed: {e}");
                }
                let _ = done.send(result);
            }),
        )?;

        match outcome.recv() {
            Ok(result) => {
                let isolates = result?;
                info!("dial back requested from {isolates} isolate(s)");
                Ok(session)
            }
            Err(_) => Err(TransportError::Closed.into()),
        }
    }

    /// Polls until a peer is connected or `timeout` elapses.
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.connection.is_connected() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
        true
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn local_port(&self) -> Option<u16> {
        self.connection.local_port()
    }

    pub fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.connection.add_listener(listener);
    }

    /// Every storage server announced so far: key-value, then SQL, then file
    /// servers, each in arrival order.
    pub fn servers(&self) -> Vec<StorageServer> {
        let key_value = self.key_value_client.servers().into_iter().map(StorageServer::from);
        let sql = self.sql_client.servers().into_iter().map(StorageServer::from);
        let file = self.file_client.servers().into_iter().map(StorageServer::from);
        key_value.chain(sql).chain(file).collect()
    }

    pub fn session_identifications(&self) -> Vec<SessionIdentification> {
        self.mux.session_identifications()
    }

    pub fn add_session_listener(&self, listener: Listener<SessionIdentification>) {
        self.mux.add_session_listener(listener);
    }

    pub fn unpause(&self) -> Result<(), RequestError> {
        self.mux.unpause()
    }

    pub fn key_value_client(&self) -> &KeyValueClient {
        &self.key_value_client
    }

    pub fn sql_client(&self) -> &SqlClient {
        &self.sql_client
    }

    pub fn file_client(&self) -> &FileClient {
        &self.file_client
    }

    pub fn key_value(&self) -> &KeyValueInspector {
        &self.key_value
    }

    pub fn sql(&self) -> &SqlInspector {
        &self.sql
    }

    pub fn file(&self) -> &FileInspector {
        &self.file
    }

    /// Closes the connection. Requests still in flight fail with
    /// [`RequestError::ConnectionClosed`].
    pub fn close(&self) {
        self.connection.close();
    }
}
