//! Connection lifecycle for one inspection session.
//!
//! A [`ConnectionManager`] either dials out to a known `ws://` address or binds an
//! ephemeral port and waits for the remote application to dial in. In listen mode
//! only one peer is active at a time: additional inbound connections are shut down
//! as soon as they are accepted.
//!
//! Every callback coming from the active transport (open, message, close, error)
//! runs under the manager's dispatch lock, so the message handler and listeners
//! never observe interleaved lifecycle events. Sending does not take that lock
//! and may be done from inside a callback.
use std::{
    io,
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use log::{debug, error, info, warn};

use super::{
    lock,
    transport::{self, TransportError, TransportEvents, WebSocketTransport},
};

/// Longest an accepted stream may take to complete the websocket upgrade.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle notifications of a connection.
pub trait ConnectionListener: Send + Sync {
    fn on_connected(&self) {}
    fn on_closed(&self) {}
    fn on_error(&self, _error: &TransportError) {}
}

/// Receiver of every inbound text message.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, text: &str);
    /// Called once the active peer is gone.
    fn on_disconnected(&self) {}
}

/// Anything able to push a text message to the remote side.
pub trait MessageSink: Send + Sync {
    fn send(&self, text: String) -> Result<(), TransportError>;
}

pub type BoundCallback = Box<dyn FnOnce(u16) + Send>;

pub enum ConnectionMode {
    /// Connect to a remote `ws://` endpoint.
    Dial { url: String },
    /// Bind `bind` (use port 0 for an OS assigned one) and accept a single peer.
    /// `on_bound` is invoked once with the bound port.
    Listen {
        bind: SocketAddr,
        on_bound: BoundCallback,
    },
}

struct Peer {
    id: u64,
    transport: WebSocketTransport,
}

struct Shared {
    poll_interval: Duration,
    dispatch: Mutex<()>,
    /// Whether listeners were last told about an open peer. Guarded by `dispatch`.
    open: AtomicBool,
    peer: Mutex<Option<Peer>>,
    next_peer: AtomicU64,
    accepting: AtomicBool,
    listeners: Mutex<Vec<Arc<dyn ConnectionListener>>>,
    handler: Mutex<Option<Weak<dyn MessageHandler>>>,
}

pub struct ConnectionManager {
    shared: Arc<Shared>,
    mode: Mutex<Option<ConnectionMode>>,
    local_port: Mutex<Option<u16>>,
}

impl ConnectionManager {
    pub fn new(mode: ConnectionMode, poll_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                poll_interval,
                dispatch: Mutex::new(()),
                open: AtomicBool::new(false),
                peer: Mutex::new(None),
                next_peer: AtomicU64::new(1),
                accepting: AtomicBool::new(false),
                listeners: Mutex::new(Vec::new()),
                handler: Mutex::new(None),
            }),
            mode: Mutex::new(Some(mode)),
            local_port: Mutex::new(None),
        }
    }

    /// Adds a lifecycle listener. A listener added while a peer is connected
    /// gets `on_connected` right away. Must not be called from a callback.
    pub fn add_listener(&self, listener: Arc<dyn ConnectionListener>) {
        let _guard = lock(&self.shared.dispatch);
        lock(&self.shared.listeners).push(Arc::clone(&listener));
        if self.shared.open.load(Ordering::SeqCst) {
            listener.on_connected();
        }
    }

    /// Installs the receiver of inbound messages. Only a weak reference is kept,
    /// the handler is owned by whoever owns the session.
    pub fn set_message_handler(&self, handler: Weak<dyn MessageHandler>) {
        *lock(&self.shared.handler) = Some(handler);
    }

    /// Dials out, or binds and starts accepting. Can be called once.
    pub fn connect(&self) -> Result<(), TransportError> {
        let mode = lock(&self.mode).take().ok_or(TransportError::Closed)?;
        match mode {
            ConnectionMode::Dial { url } => {
                info!("connecting to {url}");
                let socket = transport::dial(&url)?;
                self.shared.install(socket)?;
                Ok(())
            }
            ConnectionMode::Listen { bind, on_bound } => {
                let listener = TcpListener::bind(bind)?;
                let port = listener.local_addr()?.port();
                listener.set_nonblocking(true)?;
                *lock(&self.local_port) = Some(port);
                info!("listening for inspected applications at {bind}, port {port}");

                self.shared.accepting.store(true, Ordering::SeqCst);
                let shared = Arc::clone(&self.shared);
                thread::Builder::new()
                    .name("ws-accept".to_string())
                    .spawn(move || accept_loop(listener, shared))?;

                on_bound(port);
                Ok(())
            }
        }
    }

    /// Port bound in listen mode.
    pub fn local_port(&self) -> Option<u16> {
        *lock(&self.local_port)
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.shared.peer).is_some()
    }

    /// Closes the active peer and stops accepting new ones.
    pub fn close(&self) {
        self.shared.accepting.store(false, Ordering::SeqCst);
        if let Some(peer) = lock(&self.shared.peer).take() {
            info!("closing connection to {}", peer.transport.peer_addr());
            peer.transport.close();
        }
    }
}

impl MessageSink for ConnectionManager {
    fn send(&self, text: String) -> Result<(), TransportError> {
        match lock(&self.shared.peer).as_ref() {
            Some(peer) => peer.transport.send(text),
            None => Err(TransportError::NotConnected),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    fn install(
        self: &Arc<Self>,
        socket: tungstenite::WebSocket<TcpStream>,
    ) -> Result<(), TransportError> {
        let id = self.next_peer.fetch_add(1, Ordering::SeqCst);
        let events = Arc::new(PeerEvents {
            id,
            shared: Arc::clone(self),
        });

        // Held while the I/O thread starts so an early close always finds the peer installed.
        let mut slot = lock(&self.peer);
        let transport = WebSocketTransport::start(socket, self.poll_interval, events)?;
        info!("peer #{id} connected from {}", transport.peer_addr());
        *slot = Some(Peer { id, transport });
        Ok(())
    }

    fn listeners(&self) -> Vec<Arc<dyn ConnectionListener>> {
        lock(&self.listeners).clone()
    }

    fn handler(&self) -> Option<Arc<dyn MessageHandler>> {
        lock(&self.handler).as_ref().and_then(Weak::upgrade)
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    while shared.accepting.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                if let Err(e) = accept_peer(&shared, stream, addr) {
                    warn!("failed to accept {addr}: {e}");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(shared.poll_interval);
            }
            Err(e) => {
                error!("accept failed: {e}");
                thread::sleep(shared.poll_interval);
            }
        }
    }
    debug!("accept loop stopped");
}

fn accept_peer(
    shared: &Arc<Shared>,
    stream: TcpStream,
    addr: SocketAddr,
) -> Result<(), TransportError> {
    if lock(&shared.peer).is_some() {
        info!("rejecting {addr}, a peer is already connected");
        let _ = stream.shutdown(Shutdown::Both);
        return Ok(());
    }

    // A silent client must not hold the accept loop past the handshake timeout.
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    let socket = transport::accept(stream)?;
    shared.install(socket)
}

struct PeerEvents {
    id: u64,
    shared: Arc<Shared>,
}

impl TransportEvents for PeerEvents {
    fn on_open(&self) {
        let _guard = lock(&self.shared.dispatch);
        self.shared.open.store(true, Ordering::SeqCst);
        for listener in self.shared.listeners() {
            listener.on_connected();
        }
    }

    fn on_message(&self, text: String) {
        let _guard = lock(&self.shared.dispatch);
        match self.shared.handler() {
            Some(handler) => handler.on_message(&text),
            None => debug!("no message handler installed, dropping message"),
        }
    }

    fn on_close(&self) {
        let _guard = lock(&self.shared.dispatch);
        {
            let mut slot = lock(&self.shared.peer);
            if slot.as_ref().is_some_and(|peer| peer.id == self.id) {
                *slot = None;
            }
        }
        self.shared.open.store(false, Ordering::SeqCst);
        info!("peer #{} disconnected", self.id);

        if let Some(handler) = self.shared.handler() {
            handler.on_disconnected();
        }
        for listener in self.shared.listeners() {
            listener.on_closed();
        }
    }

    fn on_error(&self, error: TransportError) {
        let _guard = lock(&self.shared.dispatch);
        error!("peer #{} transport error: {error}", self.id);
        for listener in self.shared.listeners() {
            listener.on_error(&error);
        }
    }
}
