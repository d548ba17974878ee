//! peerbus agent - listens for or connects to peerbus peers.
//!
//! `listen` accepts connections and answers `echo` plus the policy methods
//! with empty results. `connect` dials a server, announces itself with
//! `send_identity` and keeps the connection alive until interrupted.

use anyhow::Result;
use clap::{Parser, Subcommand};
use peerbus::{
    methods, MethodRegistry, PeerConfig, PeerEvent, PeerHandle, Reactor, ReactorConfig,
    Reply, Request, RetryConfig,
};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "peerbus-agent")]
#[command(about = "Peer connection agent speaking JSON-RPC style messages")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Keep-alive interval in milliseconds (0 = disabled)
    #[arg(long, global = true, default_value = "0")]
    keepalive_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept connections from other agents
    Listen {
        /// Address to bind to
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,

        /// Port to listen on
        #[arg(short, long, default_value = "8009")]
        port: u32,
    },
    /// Connect to a listening agent
    Connect {
        /// Host to connect to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port (service) to connect to
        #[arg(short, long, default_value = "8009")]
        port: String,

        /// Name announced with send_identity
        #[arg(long, default_value = "peerbus-agent")]
        name: String,

        /// Give up after this many failed connection attempts
        #[arg(long)]
        max_attempts: Option<u32>,
    },
}

/// Policy methods are acknowledged with an empty result.
fn acknowledge(peer: &PeerHandle, request: &Request) -> Reply {
    info!(
        "Peer {} {} {}: {}",
        peer.id(),
        request.method,
        request.id,
        request.params
    );
    Reply::Result(Value::Null)
}

fn registry() -> peerbus::Result<MethodRegistry> {
    let mut builder = MethodRegistry::builder().echo();
    for method in methods::ALL.iter().filter(|m| **m != methods::ECHO) {
        builder = builder.request_fn(method.as_str(), acknowledge);
    }
    builder.build()
}

fn log_event(peer: &PeerHandle, event: &PeerEvent) {
    match event {
        PeerEvent::Connected => info!(
            "Peer {} ({}) up: {}",
            peer.id(),
            peer.role(),
            peer.target()
        ),
        PeerEvent::Reconnecting { attempt, delay } => info!(
            "Peer {} reconnect attempt {} in {:?}",
            peer.id(),
            attempt,
            delay
        ),
        PeerEvent::Disconnected => info!("Peer {} disconnected", peer.id()),
        PeerEvent::Failed(err) => warn!("Peer {} failed: {}", peer.id(), err),
        PeerEvent::Destroyed => debug!("Peer {} destroyed", peer.id()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let mut peer_config = PeerConfig::default();
    if args.keepalive_ms > 0 {
        peer_config = peer_config.with_keepalive(Duration::from_millis(args.keepalive_ms));
    }

    if let Command::Connect { max_attempts, .. } = &args.command {
        let mut retry = RetryConfig::new().with_jitter(true);
        if let Some(max) = max_attempts {
            retry = retry.with_max_attempts(*max);
        }
        peer_config = peer_config.with_retry(retry);
    }

    let reactor = Reactor::start(
        ReactorConfig::default().with_peer_config(peer_config),
        registry()?,
    )?;

    match args.command {
        Command::Listen { bind, port } => {
            let listener = reactor.listen_passive(&bind, port, log_event)?;
            info!("Listening on {}", listener.target());
        }
        Command::Connect {
            host, port, name, ..
        } => {
            reactor.connect_active(&host, &port, move |peer, event| {
                log_event(peer, event);
                if let PeerEvent::Connected = event {
                    let identity = json!({ "name": name, "my_role": ["policy_element"] });
                    if let Err(e) = peer.send(methods::SEND_IDENTITY.as_str(), identity) {
                        warn!("Peer {} identity not sent: {}", peer.id(), e);
                    }
                }
            })?;
        }
    }

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!(
        "Shutdown signal received, closing {} peers",
        reactor.directory().len()
    );
    tokio::task::spawn_blocking(move || drop(reactor)).await?;

    Ok(())
}
