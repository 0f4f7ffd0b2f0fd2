//! Asks an inspected process to dial back into a listening inspector.
//!
//! The process exposes a VM service (JSON-RPC over WebSocket). Once the
//! inspector has bound its listen port, [`dial_back`] tells every relevant
//! isolate, through a service extension, which address to connect to.
use std::{
    io,
    net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket},
    time::Duration,
};

use log::{info, warn};
use thiserror::Error;
use tungstenite::client::IntoClientRequest;

pub mod rpc;

pub use rpc::{IsolateRef, RpcError, Vm, VmServiceClient};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("invalid VM service url '{0}'")]
    InvalidUrl(String),
    #[error("could not determine a local address: {0}")]
    LocalAddress(#[from] io::Error),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("VM service reports no isolates")]
    NoIsolates,
    #[error("{extension} failed on every isolate: {last}")]
    ExtensionFailed { extension: String, last: RpcError },
}

fn vm_service_address(url: &str) -> Result<SocketAddr, BootstrapError> {
    let request = url
        .into_client_request()
        .map_err(|_| BootstrapError::InvalidUrl(url.to_string()))?;
    let uri = request.uri();
    let host = uri
        .host()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
        .ok_or_else(|| BootstrapError::InvalidUrl(url.to_string()))?;
    let port = uri.port_u16().unwrap_or(80);

    (host.as_str(), port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| BootstrapError::InvalidUrl(url.to_string()))
}

/// Local address the host routes traffic towards `target` from. Nothing is
/// sent, connecting a UDP socket only selects a route.
pub fn local_address_towards(target: SocketAddr) -> Result<IpAddr, BootstrapError> {
    let bind: SocketAddr = if target.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    let socket = UdpSocket::bind(bind)?;
    socket.connect(target)?;
    Ok(socket.local_addr()?.ip())
}

/// The isolate named `main` (or `main()`) when there is one, every isolate
/// otherwise.
pub fn select_isolates(vm: &Vm) -> Vec<&IsolateRef> {
    match vm
        .isolates
        .iter()
        .find(|isolate| isolate.name == "main" || isolate.name == "main()")
    {
        Some(main) => vec![main],
        None => vm.isolates.iter().collect(),
    }
}

/// Makes the process behind `vm_service_url` connect to `port` on this host.
/// Returns how many isolates accepted the call, at least one on success.
pub fn dial_back(
    vm_service_url: &str,
    port: u16,
    extension: &str,
    poll_interval: Duration,
) -> Result<usize, BootstrapError> {
    let ip = local_address_towards(vm_service_address(vm_service_url)?)?;
    info!("asking {vm_service_url} to dial back to {ip}:{port}");

    let client = VmServiceClient::connect(vm_service_url, poll_interval)?;
    let vm = client.get_vm()?;
    let isolates = select_isolates(&vm);
    if isolates.is_empty() {
        return Err(BootstrapError::NoIsolates);
    }

    let params = [("port", port.to_string()), ("ip", ip.to_string())];
    let mut succeeded = 0;
    let mut last_error = None;
    for isolate in isolates {
        match client.call_extension_method(extension, &isolate.id, &params) {
            Ok(_) => succeeded += 1,
            Err(e) => {
                warn!("{extension} failed on isolate {} ({}): {e}", isolate.name, isolate.id);
                last_error = Some(e);
            }
        }
    }
    client.close();

    match last_error {
        Some(last) if succeeded == 0 => Err(BootstrapError::ExtensionFailed {
            extension: extension.to_string(),
            last,
        }),
        _ => Ok(succeeded),
    }
}
