use std::{future::Future, net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    task::{JoinError, JoinSet},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    connection::{ConnectionConfig, serve_connection},
    hub::{Hub, HubConfig, HubError, HubHandle},
    peer::PeerId,
};

/// How long shutdown waits for connections to wind down before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Accepts TCP connections and registers each one with a hub it owns.
pub struct Server {
    listener: TcpListener,
    hub_config: HubConfig,
    connection_config: ConnectionConfig,
}

impl Server {
    pub fn new(listener: TcpListener) -> Self {
        Self::with_config(listener, HubConfig::default(), ConnectionConfig::default())
    }

    pub fn with_config(
        listener: TcpListener,
        hub_config: HubConfig,
        connection_config: ConnectionConfig,
    ) -> Self {
        Self {
            listener,
            hub_config,
            connection_config,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves connections until `shutdown` resolves, then stops accepting,
    /// closes every peer's queue, and waits for all workers and the hub.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            hub_config,
            connection_config,
        } = self;
        let (hub, hub_task) = Hub::spawn(hub_config);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => break,
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &hub, &connection_config, &mut connections);
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    log_connection_exit(joined);
                }
            }
        }

        drop(listener);
        info!(connections = connections.len(), "shutting down");
        match hub.shutdown().await {
            Ok(()) | Err(HubError::Closed) => {}
            Err(err) => warn!(error = %err, "unexpected hub shutdown result"),
        }

        drain_connections(&mut connections).await;
        drop(hub);
        hub_task.await.context("hub task failed")?;
        info!("shutdown complete");

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    hub: &HubHandle,
    config: &ConnectionConfig,
    connections: &mut JoinSet<()>,
) {
    match result {
        Ok((stream, addr)) => {
            spawn_connection(stream, PeerId::from(addr), hub, config, connections)
        }
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection(
    stream: TcpStream,
    id: PeerId,
    hub: &HubHandle,
    config: &ConnectionConfig,
    connections: &mut JoinSet<()>,
) {
    let hub = hub.clone();
    let config = config.clone();
    debug!(peer = %id, "accepted connection");
    connections.spawn(async move {
        if let Err(err) = serve_connection(stream, id.clone(), hub, config).await {
            warn!(peer = %id, error = ?err, "connection closed with error");
        }
    });
}

async fn drain_connections(connections: &mut JoinSet<()>) {
    let drained = timeout(SHUTDOWN_GRACE, async {
        while let Some(joined) = connections.join_next().await {
            log_connection_exit(joined);
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            remaining = connections.len(),
            "connections still busy after grace period; aborting"
        );
        connections.shutdown().await;
    }
}

fn log_connection_exit(joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        if err.is_panic() {
            warn!(error = ?err, "connection task panicked");
        }
    }
}
