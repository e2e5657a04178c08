//! A running listener: one bound socket, its accept loop and the
//! connections it spawned.

use crate::config::{ListenerConfig, TlsConfig};
use crate::error::ServerError;
use crate::proxy::{self, ConnectionInfo, ListenerStats};
use crate::stream::Downstream;
use crate::tls;
use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use uuid::Uuid;

/// A bound listener proxying accepted connections to its upstream.
///
/// Configuration and the TLS acceptor are read once per accepted
/// connection, so updates apply to new connections only.
pub struct ActiveListener {
    name: String,
    local_addr: SocketAddr,
    config: RwLock<ListenerConfig>,
    tls: RwLock<Option<Arc<TlsAcceptor>>>,
    stats: Arc<ListenerStats>,
    shutdown: broadcast::Sender<()>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ActiveListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveListener")
            .field("name", &self.name)
            .field("local_addr", &self.local_addr)
            .field("tls_enabled", &self.is_tls())
            .finish()
    }
}

impl ActiveListener {
    /// Binds the configured address and starts accepting.
    pub async fn start(config: ListenerConfig) -> Result<Arc<Self>, ServerError> {
        config.validate()?;
        let acceptor = tls::build_acceptor(&config.tls)?;

        let listener =
            TcpListener::bind(config.bind_addr)
                .await
                .map_err(|source| ServerError::Bind {
                    name: config.name.clone(),
                    addr: config.bind_addr,
                    source,
                })?;
        let local_addr = listener.local_addr()?;

        tracing::info!(
            "[{}] listening on {} -> {}{}",
            config.name,
            local_addr,
            config.upstream_addr,
            if acceptor.is_some() { " (TLS)" } else { "" }
        );

        let (shutdown, _) = broadcast::channel(1);
        let active = Arc::new(Self {
            name: config.name.clone(),
            local_addr,
            config: RwLock::new(config),
            tls: RwLock::new(acceptor),
            stats: Arc::new(ListenerStats::default()),
            shutdown,
            accept_task: Mutex::new(None),
        });

        let shutdown_rx = active.shutdown.subscribe();
        let task = tokio::spawn(active.clone().accept_loop(listener, shutdown_rx));
        *active.accept_task.lock() = Some(task);

        Ok(active)
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp, peer)) => self.spawn_connection(tcp, peer),
                        Err(e) => {
                            tracing::error!("[{}] accept error: {}", self.name, e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("[{}] listener shutting down", self.name);
                    break;
                }
            }
        }
    }

    fn spawn_connection(&self, tcp: tokio::net::TcpStream, peer: SocketAddr) {
        let config = self.config.read().clone();
        if self.stats.active() >= config.max_connections as u64 {
            tracing::warn!("[{}] connection limit reached, rejecting {}", self.name, peer);
            return;
        }
        if let Err(e) = tcp.set_nodelay(true) {
            tracing::debug!("[{}] set_nodelay failed for {}: {}", self.name, peer, e);
        }

        self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
        self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

        let acceptor = self.tls.read().clone();
        let stats = self.stats.clone();
        let mut conn_shutdown = self.shutdown.subscribe();
        let info = ConnectionInfo {
            id: Uuid::new_v4(),
            listener: self.name.clone(),
            peer,
        };

        tokio::spawn(async move {
            let downstream = match Downstream::accept(tcp, acceptor.as_deref()).await {
                Ok(s) => s,
                Err(e) => {
                    let err = ServerError::TlsHandshake(e.to_string());
                    tracing::warn!("[{}] {} from {}: {}", info.listener, info.id, peer, err);
                    stats.errors_total.fetch_add(1, Ordering::Relaxed);
                    stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                    return;
                }
            };

            tracing::debug!("[{}] {} accepted {}", info.listener, info.id, peer);
            match proxy::run(downstream, info.clone(), &config, &stats, &mut conn_shutdown).await {
                Ok(()) | Err(ServerError::ShuttingDown) => {}
                Err(e) => {
                    tracing::debug!("[{}] {} connection error: {}", info.listener, info.id, e);
                    stats.errors_total.fetch_add(1, Ordering::Relaxed);
                }
            }

            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
            tracing::debug!("[{}] {} closed", info.listener, info.id);
        });
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address actually bound, which differs from the configured one when
    /// port 0 was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> ListenerConfig {
        self.config.read().clone()
    }

    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }

    pub fn is_tls(&self) -> bool {
        self.tls.read().is_some()
    }

    /// Replaces the configuration in place. The bind address is fixed for
    /// the life of the listener; callers restart it to move.
    pub fn update(&self, config: ListenerConfig) -> Result<(), ServerError> {
        config.validate()?;
        let acceptor = tls::build_acceptor(&config.tls)?;
        *self.tls.write() = acceptor;
        *self.config.write() = config;
        tracing::info!("[{}] configuration updated", self.name);
        Ok(())
    }

    /// Swaps the TLS acceptor used for connections accepted from now on.
    pub fn update_tls(&self, tls_config: TlsConfig) -> Result<(), ServerError> {
        let acceptor = tls::build_acceptor(&tls_config)?;
        let enabled = acceptor.is_some();
        *self.tls.write() = acceptor;
        self.config.write().tls = tls_config;
        tracing::info!(
            "[{}] TLS {}",
            self.name,
            if enabled { "updated" } else { "disabled" }
        );
        Ok(())
    }

    /// Stops accepting and signals every open connection to close.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(());
        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}
