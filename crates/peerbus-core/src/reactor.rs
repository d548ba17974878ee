//! The reactor thread.
//!
//! A [`Reactor`] owns one OS thread running a single-threaded tokio runtime.
//! Every peer task, and therefore every socket, lives on that runtime.
//! Application threads create peers through the reactor and talk to them
//! through [`PeerHandle`]s; they never block on network I/O.
//!
//! Dropping the reactor shuts it down.

use crate::config::{CommsConfig, PeerConfig, ReactorConfig};
use crate::directory::PeerDirectory;
use crate::error::{CommsError, Result};
use crate::peer::{self, EventHandler, PeerContext, PeerEvent, PeerHandle, PeerRole};
use crate::rpc::MethodRegistry;
use std::net::{IpAddr, SocketAddr};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tokio::net::TcpSocket;
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

pub struct Reactor {
    config: ReactorConfig,
    ctx: PeerContext,
    handle: Handle,
    thread_id: ThreadId,
    stop_tx: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Reactor {
    /// Spawn the reactor thread and return once its runtime is running.
    pub fn start(config: ReactorConfig, registry: MethodRegistry) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let handle = runtime.handle().clone();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let thread = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                let _ = ready_tx.send(thread::current().id());
                runtime.block_on(async {
                    let _ = stop_rx.await;
                });
                debug!("Reactor runtime stopped");
            })?;

        let thread_id = ready_rx.recv().map_err(|_| CommsError::ReactorStopped)?;
        info!(
            "Reactor started on thread {} with {} methods",
            config.thread_name,
            registry.len()
        );

        Ok(Self {
            config,
            ctx: PeerContext {
                directory: PeerDirectory::new(),
                registry: Arc::new(registry),
            },
            handle,
            thread_id,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    pub fn directory(&self) -> &PeerDirectory {
        &self.ctx.directory
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.ctx.registry
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }

    pub fn is_reactor_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Create an Active peer connecting to `host:service`.
    ///
    /// Returns immediately; the outcome is reported through `on_event`.
    /// Fails only on malformed arguments.
    pub fn connect_active<F>(
        &self,
        host: &str,
        service: &str,
        on_event: F,
    ) -> Result<PeerHandle>
    where
        F: Fn(&PeerHandle, &PeerEvent) + Send + Sync + 'static,
    {
        self.connect_active_with(host, service, self.config.peer.clone(), Arc::new(on_event))
    }

    pub fn connect_active_with(
        &self,
        host: &str,
        service: &str,
        config: PeerConfig,
        on_event: EventHandler,
    ) -> Result<PeerHandle> {
        let port = parse_service(host, service)?;
        self.ensure_running()?;

        let peer = PeerHandle::new(
            self.ctx.directory.allocate_id(),
            PeerRole::Active,
            format!("{}:{}", host, port),
            config,
            on_event,
        );
        self.ctx.directory.insert(peer.clone());
        debug!("Peer {} created for {}", peer.id(), peer.target());

        self.handle.spawn(peer::active::run(
            peer.clone(),
            self.ctx.clone(),
            host.to_string(),
            port,
        ));
        Ok(peer)
    }

    /// Create a Listening peer bound to `bind_address:port`.
    ///
    /// Bind failures are reported synchronously. Each accepted connection
    /// becomes a Passive peer reporting to `on_event`.
    pub fn listen_passive<F>(
        &self,
        bind_address: &str,
        port: u32,
        on_event: F,
    ) -> Result<PeerHandle>
    where
        F: Fn(&PeerHandle, &PeerEvent) + Send + Sync + 'static,
    {
        self.listen_passive_with(
            bind_address,
            port,
            self.config.peer.clone(),
            Arc::new(on_event),
        )
    }

    pub fn listen_passive_with(
        &self,
        bind_address: &str,
        port: u32,
        config: PeerConfig,
        on_event: EventHandler,
    ) -> Result<PeerHandle> {
        let addr = parse_bind(bind_address, port)?;
        self.ensure_running()?;
        if self.is_reactor_thread() {
            return Err(CommsError::Config {
                message: "listen_passive cannot be called from the reactor thread".to_string(),
            });
        }

        let (tx, rx) = mpsc::sync_channel(1);
        let ctx = self.ctx.clone();
        self.handle.spawn(async move {
            let listener = match bind(addr) {
                Ok(listener) => listener,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            };
            let bound = listener.local_addr().unwrap_or(addr);
            let peer = PeerHandle::new(
                ctx.directory.allocate_id(),
                PeerRole::Listening,
                bound.to_string(),
                config,
                on_event,
            );
            peer.set_addrs(Some(bound), None);
            ctx.directory.insert(peer.clone());
            let _ = tx.send(Ok(peer.clone()));
            peer::listener::run(peer, ctx, listener).await;
        });

        rx.recv().map_err(|_| CommsError::ReactorStopped)?
    }

    /// Destroy every peer, wait for the directory to drain and stop the
    /// reactor thread.
    pub fn shutdown(&mut self) {
        let Some(stop_tx) = self.stop_tx.take() else {
            return;
        };
        info!("Reactor shutting down ({} peers)", self.ctx.directory.len());

        let on_reactor = self.is_reactor_thread();
        self.ctx.directory.destroy_all(false);
        if !on_reactor && !self.ctx.directory.wait_empty(self.config.shutdown_timeout) {
            warn!(
                "{} peers still open after {:?}, forcing close",
                self.ctx.directory.len(),
                self.config.shutdown_timeout
            );
            self.ctx.directory.destroy_all(true);
            self.ctx.directory.wait_empty(self.config.shutdown_timeout);
        }

        let _ = stop_tx.send(());
        if on_reactor {
            return;
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Reactor thread panicked");
            }
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(CommsError::ReactorStopped)
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn parse_service(host: &str, service: &str) -> Result<u16> {
    if host.trim().is_empty() {
        return Err(CommsError::InvalidAddress {
            address: host.to_string(),
            message: "host must not be empty".to_string(),
        });
    }
    let port: u32 = service.trim().parse().map_err(|_| CommsError::InvalidAddress {
        address: format!("{}:{}", host, service),
        message: "service must be a numeric port".to_string(),
    })?;
    valid_port(port)
}

fn parse_bind(bind_address: &str, port: u32) -> Result<SocketAddr> {
    let port = valid_port(port)?;
    let ip: IpAddr = bind_address
        .trim()
        .parse()
        .map_err(|e: std::net::AddrParseError| CommsError::InvalidAddress {
            address: bind_address.to_string(),
            message: e.to_string(),
        })?;
    Ok(SocketAddr::new(ip, port))
}

fn valid_port(port: u32) -> Result<u16> {
    match u16::try_from(port) {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(CommsError::InvalidPort { port }),
    }
}

fn bind(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    #[cfg(unix)]
    socket.set_reuseaddr(true)?;
    socket
        .bind(addr)
        .map_err(|e| CommsError::io_with_addr(e, addr))?;
    socket
        .listen(CommsConfig::LISTEN_BACKLOG)
        .map_err(|e| CommsError::io_with_addr(e, addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_validation() {
        assert_eq!(parse_service("localhost", "8009").unwrap(), 8009);
        assert!(matches!(
            parse_service("", "8009"),
            Err(CommsError::InvalidAddress { .. })
        ));
        assert!(matches!(
            parse_service("localhost", "http"),
            Err(CommsError::InvalidAddress { .. })
        ));
        assert!(matches!(
            parse_service("localhost", "0"),
            Err(CommsError::InvalidPort { port: 0 })
        ));
    }

    #[test]
    fn test_bind_validation() {
        assert_eq!(
            parse_bind("127.0.0.1", 8009).unwrap(),
            "127.0.0.1:8009".parse::<SocketAddr>().unwrap()
        );
        assert!(parse_bind("::1", 65535).is_ok());
        assert!(matches!(
            parse_bind("127.0.0.1", 65536),
            Err(CommsError::InvalidPort { port: 65536 })
        ));
        assert!(matches!(
            parse_bind("not-an-ip", 8009),
            Err(CommsError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_start_and_shutdown() {
        let registry = MethodRegistry::builder().echo().build().unwrap();
        let mut reactor = Reactor::start(ReactorConfig::default(), registry).unwrap();

        assert!(reactor.is_running());
        assert!(!reactor.is_reactor_thread());
        assert_eq!(reactor.registry().len(), 1);

        reactor.shutdown();
        assert!(!reactor.is_running());
        assert!(matches!(
            reactor.connect_active("localhost", "1", |_, _| {}),
            Err(CommsError::ReactorStopped)
        ));

        // Second shutdown is a no-op.
        reactor.shutdown();
    }
}
