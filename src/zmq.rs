//! Node block-notification listener.
//!
//! Subscribes to a node's ZMQ `hashblock` feed and kicks an immediate
//! template refresh per event. The feed is an optimization, never a
//! correctness requirement: on repeated failure the listener backs off and
//! reconnects while the poll loop carries the load.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zeromq::{Socket, SocketRecv, SubSocket};

use crate::job::TemplateUpdater;

const MAX_CONSECUTIVE_ERRORS: u32 = 5;

pub struct ZmqListener {
    chain: String,
    endpoint: String,
    updater: Arc<TemplateUpdater>,
}

impl ZmqListener {
    pub fn new(chain: impl Into<String>, endpoint: impl Into<String>, updater: Arc<TemplateUpdater>) -> Self {
        Self {
            chain: chain.into(),
            endpoint: endpoint.into(),
            updater,
        }
    }

    /// Run forever: connect, consume `hashblock` events, reconnect with
    /// capped backoff after persistent errors.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut reconnect_delay = Duration::from_secs(1);
            loop {
                match self.listen_once().await {
                    Ok(()) => {
                        reconnect_delay = Duration::from_secs(1);
                    }
                    Err(e) => {
                        warn!(
                            "{} zmq listener failed ({}), reconnecting in {:?}",
                            self.chain, e, reconnect_delay
                        );
                    }
                }
                tokio::time::sleep(reconnect_delay).await;
                reconnect_delay = (reconnect_delay * 2).min(Duration::from_secs(30));
            }
        })
    }

    async fn listen_once(&self) -> std::result::Result<(), zeromq::ZmqError> {
        let mut socket = SubSocket::new();
        socket.connect(&self.endpoint).await?;
        socket.subscribe("hashblock").await?;
        info!("{} zmq connected to {}", self.chain, self.endpoint);

        let mut consecutive_errors = 0u32;
        loop {
            match socket.recv().await {
                Ok(message) => {
                    consecutive_errors = 0;
                    let frames = message.into_vec();
                    if frames.len() < 2 {
                        warn!("{} zmq received malformed message", self.chain);
                        continue;
                    }
                    if &frames[0][..] != b"hashblock" {
                        debug!("{} zmq ignoring topic {:?}", self.chain, frames[0]);
                        continue;
                    }

                    let block_hash = hex::encode(&frames[1][..]);
                    info!("{} new block notification: {}", self.chain, block_hash);
                    metrics::counter!("zmq_block_notified_total", "chain" => self.chain.clone())
                        .increment(1);

                    if let Err(e) = self.updater.refresh(true).await {
                        error!("{} refresh after block notification failed: {}", self.chain, e);
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        return Err(e);
                    }
                    warn!(
                        "{} zmq recv error ({}/{}): {}",
                        self.chain, consecutive_errors, MAX_CONSECUTIVE_ERRORS, e
                    );
                    tokio::time::sleep(Duration::from_millis(500 * consecutive_errors as u64))
                        .await;
                }
            }
        }
    }
}
