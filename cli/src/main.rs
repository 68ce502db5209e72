//! `meshsync`: watches a directory and keeps it mirrored across every peer
//! that announces itself on the local network (spec.md §6).
//!
//! This binary is pure wiring: parse arguments, initialize logging and the
//! signature store, spawn one thread per responsibility (TCP accept loop,
//! discovery sender, discovery listener, filesystem watcher), and convert
//! Ctrl-C into an orderly `PeerRegistry::stop()` / watcher shutdown,
//! mirroring `original_source/main.py`'s thread layout one-for-one.

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;

use meshsync_discovery::{DiscoveryStop, broadcast_presence, listen_for_broadcasts};
use meshsync_net::{EchoGuard, PeerRegistry};
use meshsync_store::SignatureStore;
use meshsync_watcher::ChangeWatcher;

/// Directory synchronization tool: mirrors `monitor_dir` across every peer
/// discovered on the local network.
#[derive(Parser, Debug)]
#[command(about, version)]
struct Cli {
    /// The directory to monitor and synchronize.
    monitor_dir: PathBuf,

    /// Directory to store block-checksum signatures in (default: platform temp).
    #[arg(short = 's', long = "signature_dir", value_name = "DIR")]
    signature_dir: Option<PathBuf>,

    /// UDP port used to broadcast and listen for peer presence.
    #[arg(short = 'b', long = "broadcast-port", default_value_t = 5000)]
    broadcast_port: u16,

    /// TCP port this node listens on for synchronization connections.
    #[arg(short = 'l', long = "listen-port", default_value_t = 6000)]
    listen_port: u16,
}

fn default_signature_dir() -> PathBuf {
    std::env::temp_dir().join("meshsync-signatures")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let signature_dir = cli.signature_dir.unwrap_or_else(default_signature_dir);

    let store = SignatureStore::new(signature_dir.clone());
    store
        .init()
        .with_context(|| format!("failed to initialize signature directory {signature_dir:?}"))?;
    tracing::info!(root = ?cli.monitor_dir, signatures = ?signature_dir, "signature store initialized");

    let echo_guard = Arc::new(EchoGuard::new());
    let registry = PeerRegistry::new(cli.monitor_dir.clone(), store.clone(), Arc::clone(&echo_guard));

    let listener = TcpListener::bind(("0.0.0.0", cli.listen_port))
        .with_context(|| format!("failed to bind TCP listen port {}", cli.listen_port))?;
    tracing::info!(port = cli.listen_port, "TCP server listening");

    let discovery_stop = DiscoveryStop::new();

    let broadcast_thread = {
        let stop = Arc::clone(&discovery_stop);
        let (broadcast_port, listen_port) = (cli.broadcast_port, cli.listen_port);
        thread::spawn(move || {
            if let Err(e) = broadcast_presence(broadcast_port, listen_port, stop) {
                tracing::error!(error = %e, "presence broadcast thread exited");
            }
        })
    };

    let listen_thread = {
        let stop = Arc::clone(&discovery_stop);
        let registry = Arc::clone(&registry);
        let (broadcast_port, listen_port) = (cli.broadcast_port, cli.listen_port);
        thread::spawn(move || {
            if let Err(e) = listen_for_broadcasts(broadcast_port, listen_port, registry, stop) {
                tracing::error!(error = %e, "discovery listener thread exited");
            }
        })
    };

    let accept_thread = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            for incoming in listener.incoming() {
                match incoming {
                    Ok(stream) => {
                        if let Err(e) = registry.accept(stream) {
                            tracing::warn!(error = %e, "failed to register inbound connection");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "TCP accept error; listener exiting");
                        break;
                    }
                }
            }
        })
    };

    let watcher = Arc::new(ChangeWatcher::new(
        cli.monitor_dir.clone(),
        store,
        Arc::clone(&registry),
        echo_guard,
    ));
    let watcher_thread = {
        let watcher = Arc::clone(&watcher);
        thread::spawn(move || {
            if let Err(e) = watcher.run() {
                tracing::error!(error = %e, "filesystem watcher exited");
            }
        })
    };

    let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .context("failed to install Ctrl-C handler")?;
    shutdown_rx.recv().ok();

    tracing::info!("shutdown signal received, stopping");
    discovery_stop.signal();
    registry.stop();

    // The watcher's debouncer channel only closes when its debouncer is
    // dropped; since `run()` blocks this process's dedicated thread for
    // its lifetime and there's no separate handle to stop it short of
    // process exit, the remaining threads are left detached here rather
    // than joined, matching spec.md §5's "joined where meaningful,
    // detached otherwise."
    let _ = broadcast_thread;
    let _ = listen_thread;
    let _ = accept_thread;
    let _ = watcher_thread;

    println!("Directory Synchronization Tool stopped.");
    Ok(())
}
