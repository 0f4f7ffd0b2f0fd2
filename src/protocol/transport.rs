//! WebSocket transport.
//!
//! A [`WebSocketTransport`] owns its socket on a dedicated I/O thread. The
//! thread alternates between draining the outgoing queue and polling the socket
//! with a short read timeout, so [`WebSocketTransport::send`] never blocks on
//! inbound traffic. Lifecycle and inbound messages are reported through
//! [`TransportEvents`], always from the I/O thread and always starting with
//! `on_open`.
use std::{
    io,
    net::{SocketAddr, TcpStream},
    sync::{
        Arc,
        mpsc::{self, Receiver, Sender, TryRecvError},
    },
    thread,
    time::Duration,
};

use log::{debug, trace, warn};
use thiserror::Error;
use tungstenite::{Message, WebSocket, client::IntoClientRequest};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport IO error: {0}")]
    Io(#[from] io::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
    #[error("invalid address '{0}'")]
    InvalidAddress(String),
    #[error("not connected")]
    NotConnected,
    #[error("connection closed")]
    Closed,
}

/// Callbacks raised from a transport's I/O thread.
pub trait TransportEvents: Send + Sync {
    fn on_open(&self);
    fn on_message(&self, text: String);
    fn on_close(&self);
    fn on_error(&self, error: TransportError);
}

enum Outgoing {
    Text(String),
    Close,
}

#[derive(Debug)]
pub struct WebSocketTransport {
    outgoing: Sender<Outgoing>,
    peer: SocketAddr,
}

/// Performs the client side handshake against a `ws://` url.
pub fn dial(url: &str) -> Result<WebSocket<TcpStream>, TransportError> {
    let request = url
        .into_client_request()
        .map_err(|e| TransportError::InvalidAddress(format!("{url}: {e}")))?;

    let uri = request.uri();
    if uri.scheme_str() != Some("ws") {
        return Err(TransportError::InvalidAddress(format!(
            "{url}: only ws:// urls are supported"
        )));
    }
    let host = uri
        .host()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
        .ok_or_else(|| TransportError::InvalidAddress(url.to_string()))?;
    let port = uri.port_u16().unwrap_or(80);

    let stream = TcpStream::connect((host.as_str(), port))?;
    stream.set_nodelay(true)?;
    let (socket, _response) = tungstenite::client(request, stream)
        .map_err(|e| TransportError::Handshake(e.to_string()))?;
    Ok(socket)
}

/// Performs the server side handshake on an accepted stream.
pub fn accept(stream: TcpStream) -> Result<WebSocket<TcpStream>, TransportError> {
    stream.set_nodelay(true)?;
    tungstenite::accept(stream).map_err(|e| TransportError::Handshake(e.to_string()))
}

impl WebSocketTransport {
    /// Hands an established socket over to a new I/O thread.
    pub fn start(
        socket: WebSocket<TcpStream>,
        poll_interval: Duration,
        events: Arc<dyn TransportEvents>,
    ) -> Result<Self, TransportError> {
        let peer = socket.get_ref().peer_addr()?;
        socket
            .get_ref()
            .set_read_timeout(Some(poll_interval.max(Duration::from_millis(1))))?;

        let (outgoing, queue) = mpsc::channel();
        thread::Builder::new()
            .name(format!("ws-io-{peer}"))
            .spawn(move || run_io(socket, queue, events))?;

        Ok(Self { outgoing, peer })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn send(&self, text: String) -> Result<(), TransportError> {
        self.outgoing
            .send(Outgoing::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    pub fn close(&self) {
        // The I/O thread may already be gone, nothing left to close then.
        let _ = self.outgoing.send(Outgoing::Close);
    }
}

fn run_io(
    mut socket: WebSocket<TcpStream>,
    queue: Receiver<Outgoing>,
    events: Arc<dyn TransportEvents>,
) {
    events.on_open();

    loop {
        loop {
            match queue.try_recv() {
                Ok(Outgoing::Text(text)) => {
                    trace!("-> {text}");
                    if let Err(e) = socket.send(Message::Text(text)) {
                        events.on_error(e.into());
                        events.on_close();
                        return;
                    }
                }
                Ok(Outgoing::Close) | Err(TryRecvError::Disconnected) => {
                    debug!("closing websocket to {:?}", socket.get_ref().peer_addr());
                    let _ = socket.close(None);
                    let _ = socket.flush();
                    events.on_close();
                    return;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        match socket.read() {
            Ok(Message::Text(text)) => {
                trace!("<- {text}");
                events.on_message(text);
            }
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => events.on_message(text),
                Err(e) => warn!("dropping non UTF-8 binary frame: {e}"),
            },
            // Close replies and pongs are queued by tungstenite and flushed on the next read.
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) => {}
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                events.on_close();
                return;
            }
            Err(e) => {
                events.on_error(e.into());
                events.on_close();
                return;
            }
        }
    }
}
