//! Miner-facing TCP listener.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::manager::Manager;
use crate::session::SessionHandler;

pub struct Listener {
    listener: TcpListener,
    manager: Arc<Manager>,
}

impl Listener {
    pub async fn new(manager: Arc<Manager>) -> anyhow::Result<Self> {
        let bind_address = manager.config().server.bind_address;
        let listener = TcpListener::bind(bind_address).await?;

        info!(
            "stratum relay listening on {} (upstream: {})",
            bind_address,
            manager.config().primary.rpc_url
        );

        Ok(Self { listener, manager })
    }

    pub async fn accept(&self) -> anyhow::Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let active = self.manager.connection_count();
                    if active >= self.manager.config().server.max_connections {
                        warn!("connection limit reached, refusing {}", addr);
                        metrics::counter!("network_refused_total").increment(1);
                        drop(stream);
                        continue;
                    }

                    info!("new miner connection from {}", addr);
                    self.manager.connection_opened();
                    metrics::counter!("network_connected_total").increment(1);

                    let manager = self.manager.clone();
                    tokio::spawn(async move {
                        let handler = SessionHandler::new(manager);
                        if let Err(e) = handler.run(stream, addr).await {
                            error!("miner {} - session error: {}", addr, e);
                        }
                        metrics::counter!("network_disconnected_total").increment(1);
                    });
                }
                Err(e) => {
                    error!("failed to accept connection: {}", e);
                }
            }
        }
    }
}
