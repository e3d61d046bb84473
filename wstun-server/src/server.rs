//! Server supervisor
//!
//! Owns the TUN device, the allocator and the relay, serves the HTTP surface
//! and stops on the first of: a shutdown request, the outbound flow ending,
//! or an interface failure reported by a connection.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use wstun_core::{
    Allocator, ByteCounters, Codec, FileStore, LeaseStore, Passthrough, PeerRegistry, Relay,
    TunTransport,
};
use wstun_tun::{TunConfig, TunDevice};

use crate::api::{self, AppState};
use crate::config::Config;
use crate::error::{Error, Result};

/// How long in-flight HTTP requests get to finish after a stop
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The VPN concentrator
pub struct Server {
    config: Config,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Create a server from a validated configuration
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            config,
            shutdown_tx,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get a handle that stops the server when sent to
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Build the HTTP router over prepared state
    pub fn router(state: AppState) -> Router {
        api::router(state)
    }

    /// Create the interface, open the lease store and serve until stopped
    pub async fn run(&self) -> Result<()> {
        let server = &self.config.server;
        let block = server.block()?;

        let tun_config = TunConfig::for_block(server.device_name.as_str(), &block, server.mtu)?;
        let tun = TunDevice::create(tun_config).await?;

        let store_path = self.config.paths.allocator_file();
        let store = FileStore::open(&store_path)?;
        log::info!("Opened lease store {}", store_path.display());

        let addr = server.listen_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;

        self.serve(listener, Arc::new(tun), store).await
    }

    /// Serve on an already bound listener with the given interface and store
    pub async fn serve<S>(
        &self,
        listener: TcpListener,
        tun: Arc<dyn TunTransport>,
        store: S,
    ) -> Result<()>
    where
        S: LeaseStore + 'static,
    {
        let server = &self.config.server;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let allocator = Allocator::new(server.block()?, store)?;
        log::info!(
            "Allocator serving {} ({} of {} addresses leased)",
            allocator.block(),
            allocator.lease_count()?,
            allocator.capacity()
        );

        let mut codec = Codec::new(server.compress).with_max_packet(server.buffer_size);
        if let Some(key) = server.key() {
            codec = codec.with_cipher(Arc::new(Passthrough::with_secret(key)?));
        }

        let relay = Relay::new(
            tun,
            Arc::new(PeerRegistry::new()),
            Arc::new(ByteCounters::new()),
        )
        .with_codec(codec)
        .with_binding_ttl(server.binding_ttl())
        .with_buffer_size(server.buffer_size);

        let (state, mut fatal_rx) = AppState::new(server, Arc::new(allocator), relay.clone());
        let app = Self::router(state);

        let outbound_relay = relay.clone();
        let mut outbound = tokio::spawn(async move { outbound_relay.run_outbound().await });
        let purge = spawn_purge(relay.registry().clone(), server.purge_interval());

        let local_addr = listener.local_addr()?;
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let mut http = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = stop_rx.await;
                })
                .await
        });
        log::info!("Listening on {}", local_addr);

        let (result, http_done) = tokio::select! {
            _ = shutdown_rx.recv() => {
                log::info!("Server shutdown requested");
                (Ok(()), false)
            }
            res = &mut outbound => {
                let reason = match res {
                    Ok(Err(e)) => format!("interface read failed: {}", e),
                    Ok(Ok(())) => "outbound relay stopped".to_string(),
                    Err(e) => format!("outbound relay task failed: {}", e),
                };
                log::error!("{}", reason);
                (Err(Error::Fatal(reason)), false)
            }
            Some(e) = fatal_rx.recv() => {
                (Err(Error::Fatal(format!("interface write failed: {}", e))), false)
            }
            res = &mut http => {
                let reason = match res {
                    Ok(Ok(())) => "HTTP server stopped".to_string(),
                    Ok(Err(e)) => e.to_string(),
                    Err(e) => e.to_string(),
                };
                log::error!("HTTP server ended: {}", reason);
                (Err(Error::Serve(reason)), true)
            }
        };

        outbound.abort();
        purge.abort();

        if !http_done {
            let _ = stop_tx.send(());
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut http).await.is_err() {
                log::warn!("HTTP server did not drain in time");
                http.abort();
            }
        }

        let stats = relay.counters().snapshot();
        log::info!("Server stopped ({})", stats.render());
        result
    }
}

/// Periodically sweep bindings whose TTL elapsed
fn spawn_purge(registry: Arc<PeerRegistry>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = registry.purge_expired();
            if purged > 0 {
                log::debug!("Purged {} expired bindings, {} left", purged, registry.len());
            }
        }
    })
}
