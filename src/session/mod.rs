//! Per-connection Stratum session engine.
//!
//! Protocol states: Connected -> Subscribed -> Authorized -> Mining ->
//! Closed. Each connection runs a reader loop plus a pusher task that
//! forwards new jobs and keepalives; all outbound traffic funnels through
//! one writer task so responses and notifications never interleave
//! mid-line.

pub mod address;
pub mod extranonce;
pub mod hashrate;
pub mod share;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{codes, Result};
use crate::events::Event;
use crate::job::Job;
use crate::manager::Manager;
use crate::session::address::{address_part, decode_p2pkh_address};
use crate::session::extranonce::{ExtranoncePool, EXTRANONCE2_SIZE};
use crate::session::share::parse_submit;

/// Session protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Subscribed,
    Authorized,
    Mining,
    Closed,
}

/// One miner connection's mutable state.
#[derive(Debug)]
pub struct Session {
    id: u64,
    remote: SocketAddr,
    state: RwLock<SessionState>,
    extranonce1: RwLock<Option<u32>>,
    worker: RwLock<Option<String>>,
    miner_software: RwLock<Option<String>>,
    difficulty: RwLock<f64>,
    last_push: Mutex<Instant>,
}

impl Session {
    fn new(remote: SocketAddr) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            remote,
            state: RwLock::new(SessionState::Connected),
            extranonce1: RwLock::new(None),
            worker: RwLock::new(None),
            miner_software: RwLock::new(None),
            difficulty: RwLock::new(0.0),
            last_push: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.state(),
            SessionState::Authorized | SessionState::Mining
        )
    }

    pub fn extranonce1(&self) -> Option<u32> {
        *self.extranonce1.read()
    }

    pub fn worker(&self) -> Option<String> {
        self.worker.read().clone()
    }

    pub fn difficulty(&self) -> f64 {
        *self.difficulty.read()
    }

    fn set_difficulty(&self, difficulty: f64) {
        *self.difficulty.write() = difficulty;
    }

    fn touch_push(&self) {
        *self.last_push.lock() = Instant::now();
    }

    fn push_idle(&self) -> std::time::Duration {
        self.last_push.lock().elapsed()
    }
}

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

type Outbound = mpsc::UnboundedSender<String>;

fn send_json(out: &Outbound, value: Value) {
    let mut line = value.to_string();
    line.push('\n');
    let _ = out.send(line);
}

fn respond(out: &Outbound, id: Option<Value>, result: Value) {
    send_json(
        out,
        json!({"id": id, "result": result, "error": Value::Null}),
    );
}

fn respond_error(out: &Outbound, id: Option<Value>, code: i32, message: &str) {
    send_json(
        out,
        json!({"id": id, "result": Value::Null, "error": [code, message, Value::Null]}),
    );
}

fn notify(out: &Outbound, method: &str, params: Value) {
    send_json(
        out,
        json!({"id": Value::Null, "method": method, "params": params}),
    );
}

/// Per-connection handler; one instance serves one TCP stream to the end.
pub struct SessionHandler {
    manager: Arc<Manager>,
}

impl SessionHandler {
    pub fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }

    pub async fn run(&self, stream: TcpStream, remote: SocketAddr) -> Result<()> {
        let session = Arc::new(Session::new(remote));
        let manager = self.manager.clone();

        let (read_half, write_half) = stream.into_split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

        let writer = tokio::spawn(async move {
            let mut writer = BufWriter::new(write_half);
            while let Some(line) = out_rx.recv().await {
                if writer.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
        });

        let pusher = spawn_pusher(manager.clone(), session.clone(), out_tx.clone());

        let idle_timeout = manager.config().server.idle_timeout;
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        loop {
            line.clear();
            match tokio::time::timeout(idle_timeout, reader.read_line(&mut line)).await {
                Err(_) => {
                    info!("session {} idle for {:?}, dropping", session.id(), idle_timeout);
                    break;
                }
                Ok(Ok(0)) => {
                    debug!("session {} closed by peer", session.id());
                    break;
                }
                Ok(Ok(_)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    self.handle_line(&session, trimmed, &out_tx).await;
                }
                Ok(Err(e)) => {
                    debug!("session {} read error: {}", session.id(), e);
                    break;
                }
            }
        }

        session.set_state(SessionState::Closed);
        pusher.abort();
        drop(out_tx);
        let _ = writer.await;
        self.cleanup(&session);
        Ok(())
    }

    fn cleanup(&self, session: &Session) {
        if let Some(prefix) = session.extranonce1() {
            self.manager.extranonces().release(prefix);
        }
        if let Some(worker) = session.worker() {
            self.manager.hashrate().remove_worker(&worker);
            self.manager
                .events()
                .publish(Event::MinerDisconnected { worker });
        }
        let remaining = self.manager.connection_closed();
        debug!(
            "session {} cleaned up ({} miners remaining)",
            session.id(),
            remaining
        );
    }

    /// Parse and dispatch one request line. Malformed requests reject that
    /// request only; the connection survives.
    async fn handle_line(&self, session: &Arc<Session>, line: &str, out: &Outbound) {
        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!("session {} sent invalid JSON: {}", session.id(), e);
                respond_error(out, None, codes::OTHER, "invalid request");
                return;
            }
        };

        match request.method.as_str() {
            "mining.subscribe" => self.handle_subscribe(session, request, out),
            "mining.authorize" => self.handle_authorize(session, request, out).await,
            "mining.submit" => self.handle_submit(session, request, out),
            "mining.configure" => respond(out, request.id, json!({})),
            "mining.extranonce.subscribe" => respond(out, request.id, json!(false)),
            "eth_submitHashrate" => {
                debug!(
                    "session {} reported hashrate via eth_submitHashrate",
                    session.id()
                );
                respond(out, request.id, json!(true));
            }
            other => {
                debug!("session {} unknown method {}", session.id(), other);
                respond_error(
                    out,
                    request.id,
                    codes::OTHER,
                    &format!("unknown method {other}"),
                );
            }
        }
    }

    fn handle_subscribe(&self, session: &Arc<Session>, request: Request, out: &Outbound) {
        let user_agent = request
            .params
            .as_ref()
            .and_then(Value::as_array)
            .and_then(|params| params.first())
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string();
        info!(
            "session {} subscribed from {} ({})",
            session.id(),
            session.remote,
            user_agent
        );
        *session.miner_software.write() = Some(user_agent);

        // Idempotent for re-subscribes: keep the allocated prefix.
        let prefix = match session.extranonce1() {
            Some(prefix) => prefix,
            None => {
                let prefix = self.manager.extranonces().allocate();
                *session.extranonce1.write() = Some(prefix);
                prefix
            }
        };
        if session.state() == SessionState::Connected {
            session.set_state(SessionState::Subscribed);
        }

        let subscription = format!("session-{}", session.id());
        respond(
            out,
            request.id,
            json!([
                [
                    ["mining.set_difficulty", subscription.clone()],
                    ["mining.notify", subscription],
                ],
                ExtranoncePool::prefix_hex(prefix),
                EXTRANONCE2_SIZE,
            ]),
        );
    }

    async fn handle_authorize(&self, session: &Arc<Session>, request: Request, out: &Outbound) {
        if session.state() == SessionState::Connected {
            respond_error(out, request.id, codes::NOT_SUBSCRIBED, "subscribe first");
            return;
        }

        let Some(identity) = request
            .params
            .as_ref()
            .and_then(Value::as_array)
            .and_then(|params| params.first())
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            respond_error(out, request.id, codes::OTHER, "missing worker identity");
            return;
        };

        let testnet = self.manager.config().primary.testnet;
        let pub_h160 = match decode_p2pkh_address(address_part(&identity), testnet) {
            Ok(h160) => h160,
            Err(e) => {
                warn!("session {} authorize failed: {}", session.id(), e);
                respond_error(out, request.id, codes::UNAUTHORIZED, &e.to_string());
                return;
            }
        };

        *session.worker.write() = Some(identity.clone());
        session.set_state(SessionState::Authorized);

        // The first authorized address becomes the fallback payout; kick a
        // refresh so the first job can be built from it.
        if self.manager.payout().learn(pub_h160) {
            info!("payout address learned from {}", identity);
            let updater = self.manager.updater().clone();
            tokio::spawn(async move {
                if let Err(e) = updater.refresh(true).await {
                    warn!("refresh after payout learn failed: {}", e);
                }
            });
        }

        metrics::counter!("session_authorized_total").increment(1);
        self.manager.events().publish(Event::MinerConnected {
            worker: identity.clone(),
            miner_software: session
                .miner_software
                .read()
                .clone()
                .unwrap_or_else(|| "Unknown".into()),
        });

        respond(out, request.id, json!(true));

        // Push current work right away when a job exists.
        if let Some(job) = self.manager.jobs().current() {
            push_job(&self.manager, session, out, &job);
        }
    }

    fn handle_submit(&self, session: &Arc<Session>, request: Request, out: &Outbound) {
        let Some(extranonce1) = session.extranonce1() else {
            respond_error(out, request.id, codes::NOT_SUBSCRIBED, "not subscribed");
            return;
        };
        if !matches!(
            session.state(),
            SessionState::Authorized | SessionState::Mining
        ) {
            respond_error(out, request.id, codes::UNAUTHORIZED, "not authorized");
            return;
        }

        let share = match parse_submit(request.params.as_ref()) {
            Ok(share) => share,
            Err(e) => {
                warn!("session {} malformed submit: {}", session.id(), e);
                respond_error(out, request.id, e.stratum_code(), &e.to_string());
                return;
            }
        };

        let mut assigned = session.difficulty();
        if assigned <= 0.0 {
            // Submit raced ahead of the first difficulty push.
            if let Some(job) = self.manager.jobs().get(&share.job_id) {
                assigned = self.manager.assigned_difficulty(Some(&share.worker), &job);
            }
        }

        match self.manager.shares().process(extranonce1, assigned, &share) {
            Ok(outcome) => {
                respond(out, request.id, json!(true));
                if let Some(new_difficulty) = outcome.vardiff_update {
                    session.set_difficulty(new_difficulty);
                    notify(out, "mining.set_difficulty", json!([new_difficulty]));
                    session.touch_push();
                }
            }
            Err(e) if e.is_share_local() => {
                debug!("session {} share rejected: {}", session.id(), e);
                respond_error(out, request.id, e.stratum_code(), &e.to_string());
            }
            Err(e) => {
                warn!("session {} share processing failed: {}", session.id(), e);
                respond_error(out, request.id, codes::OTHER, &e.to_string());
            }
        }
    }
}

/// Send a difficulty directive followed by the job itself.
fn push_job(manager: &Arc<Manager>, session: &Arc<Session>, out: &Outbound, job: &Job) {
    let worker = session.worker();
    let difficulty = manager.assigned_difficulty(worker.as_deref(), job);
    session.set_difficulty(difficulty);
    notify(out, "mining.set_difficulty", json!([difficulty]));
    notify(out, "mining.notify", job.notify_params());
    session.touch_push();
    session.set_state(SessionState::Mining);
}

/// Job broadcasts and keepalives for one session.
fn spawn_pusher(
    manager: Arc<Manager>,
    session: Arc<Session>,
    out: Outbound,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut jobs_rx = manager.jobs().subscribe();
        let keepalive_after = manager.config().server.keepalive_after;
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(30));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                received = jobs_rx.recv() => match received {
                    Ok(job) => {
                        if session.is_active() {
                            push_job(&manager, &session, &out, &job);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // Only the newest job matters; resync on the next recv.
                        debug!("session {} lagged {} job broadcasts", session.id(), skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = tick.tick() => {
                    if session.state() == SessionState::Mining
                        && session.push_idle() > keepalive_after
                    {
                        // Some miners drop quiet connections; a difficulty
                        // re-send keeps the line warm without new work.
                        notify(&out, "mining.set_difficulty", json!([session.difficulty()]));
                        session.touch_push();
                    }
                }
            }
        }
    })
}
