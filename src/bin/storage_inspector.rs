use std::{
    error::Error,
    io,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, mpsc},
    thread,
    time::Duration,
};

use clap::{Parser, Subcommand};
use log::{error, info};
use storage_inspector::{Config, Session, protocol::ConnectionListener, run};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the config file, defaults to ~/.config/storage-inspector/config.toml
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Connect to an application already listening for an inspector
    Dial {
        /// WebSocket url of the application, e.g. ws://127.0.0.1:9000
        url: String,
    },
    /// Listen and ask the application's VM service to dial back
    Listen {
        /// WebSocket url of the VM service
        #[arg(long)]
        vm_service: String,
        /// Service extension to call, overrides the config file
        #[arg(long)]
        extension: Option<String>,
        /// Address to listen at, overrides the config file
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
}

struct Announce;

impl ConnectionListener for Announce {
    fn on_connected(&self) {
        eprintln!("application connected");
    }

    fn on_closed(&self) {
        eprintln!("application disconnected");
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize env_logger; For logging to STDOUT/STDERR
    env_logger::init();

    let cli = Cli::parse();
    let mut config = Config::from_file(cli.config.as_deref())?;

    let session = match cli.mode {
        Mode::Dial { url } => Session::dial(&config, &url)?,
        Mode::Listen {
            vm_service,
            extension,
            bind,
        } => {
            if let Some(extension) = extension {
                config.connect_extension = extension;
            }
            if let Some(bind) = bind {
                config.listen_address = bind;
            }
            let session = Session::listen_and_bootstrap(&config, &vm_service)?;
            if !session.wait_connected(Duration::from_secs(30)) {
                eprintln!(
                    "the application has not connected yet, commands will fail until it does"
                );
            }
            session
        }
    };
    session.add_connection_listener(Arc::new(Announce));
    let session = Arc::new(session);

    // Either the shell finishing or Ctrl-C ends the session.
    let (done, finished) = mpsc::channel();
    let interrupted = done.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = interrupted.send(());
    }) {
        error!("failed to set Ctrl-C handler: {e}");
    }

    let shell = Arc::clone(&session);
    thread::Builder::new()
        .name("shell".to_string())
        .spawn(move || {
            if let Err(e) = run(&shell, io::stdin().lock(), io::stdout().lock()) {
                error!("shell stopped: {e}");
            }
            let _ = done.send(());
        })?;

    let _ = finished.recv();
    info!("closing session");
    session.close();
    Ok(())
}
