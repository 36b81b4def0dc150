//! Stratum v1 session state machine.
//!
//! One client owns one pool connection and runs as a dedicated task. The
//! task blocks in a single combined wait (socket readability, submission
//! notifier, command channel, shutdown token, earliest pending deadline) and
//! runs every state transition to completion between wakes, so session state
//! needs no locking. Other tasks interact only by enqueueing submissions or
//! sending commands.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use strum::Display;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::connection::{PoolAddr, PoolConnection};
use super::error::{StratumError, StratumResult};
use super::messages::{
    self, ClientCommand, ClientEvent, RpcResponse, ServerMessage, SubmitParams,
};
use super::FLOOD_PREVENTION_CAP;
use crate::notify::Notifier;
use crate::target::{self, Target};
use crate::timer::{Clock, Deadline, SystemClock};

/// Advertised to the pool on subscription.
const USER_AGENT: &str = concat!("kestrel-miner/", env!("CARGO_PKG_VERSION"));

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on waiting for a subscribe, authorize, or submit response.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

const BACKOFF_MIN: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Connection settings for one pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// `stratum+tcp://host:port`
    pub url: String,
    /// Worker name sent with mining.authorize and every submission.
    pub username: String,
    pub password: String,
}

/// Session lifecycle. Transitions are serialized on the owning task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Active,
    Suspended,
}

/// Thread-safe hand-off of computed shares into the session task.
///
/// Hash workers push from any thread; the push wakes the session's combined
/// wait through the notifier. Shares are drained in enqueue order.
#[derive(Debug, Clone, Default)]
pub struct SubmitQueue {
    inner: Arc<SubmitQueueInner>,
}

#[derive(Debug, Default)]
struct SubmitQueueInner {
    queue: Mutex<VecDeque<SubmitParams>>,
    notifier: Notifier,
}

impl SubmitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a share and wake the owning session task.
    pub fn push(&self, params: SubmitParams) {
        self.inner.queue.lock().push_back(params);
        self.inner.notifier.wake();
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pop(&self) -> Option<SubmitParams> {
        self.inner.queue.lock().pop_front()
    }

    async fn notified(&self) {
        self.inner.notifier.notified().await;
    }

    fn drain_wakes(&self) {
        self.inner.notifier.drain();
    }

    // Re-wake the owner without enqueueing, e.g. after leaving suspension.
    fn nudge(&self) {
        self.inner.notifier.wake();
    }
}

// A submission awaiting its pool response.
#[derive(Debug)]
struct PendingSubmit {
    job_id: String,
    deadline: Deadline,
}

// What woke the steady-state loop.
enum Wake {
    Readable(io::Result<()>),
    Command(Option<ClientCommand>),
    Submission,
    DeadlineExpired,
    Shutdown,
}

/// Stratum v1 client for one pool.
///
/// Construct with [`StratumV1Client::new`] (events only) or
/// [`StratumV1Client::with_commands`], then spawn [`StratumV1Client::run`].
/// The client reconnects with doubling backoff on transient failures and
/// exits with an error on permanent ones (bad address, rejected
/// credentials).
pub struct StratumV1Client {
    config: PoolConfig,
    event_tx: mpsc::Sender<ClientEvent>,
    command_rx: Option<mpsc::Receiver<ClientCommand>>,
    shutdown: CancellationToken,
    clock: Arc<dyn Clock>,
    submissions: SubmitQueue,

    state: SessionState,
    connection: Option<PoolConnection>,
    next_id: u64,
    pending: HashMap<u64, PendingSubmit>,
    current_target: Target,
    next_submit_allowed: Deadline,
    backoff: Duration,
}

impl StratumV1Client {
    pub fn new(
        config: PoolConfig,
        event_tx: mpsc::Sender<ClientEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self::build(config, event_tx, None, shutdown)
    }

    pub fn with_commands(
        config: PoolConfig,
        event_tx: mpsc::Sender<ClientEvent>,
        command_rx: mpsc::Receiver<ClientCommand>,
        shutdown: CancellationToken,
    ) -> Self {
        Self::build(config, event_tx, Some(command_rx), shutdown)
    }

    fn build(
        config: PoolConfig,
        event_tx: mpsc::Sender<ClientEvent>,
        command_rx: Option<mpsc::Receiver<ClientCommand>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            event_tx,
            command_rx,
            shutdown,
            clock: SystemClock::shared(),
            submissions: SubmitQueue::new(),
            state: SessionState::Disconnected,
            connection: None,
            next_id: 0,
            pending: HashMap::new(),
            current_target: Target::difficulty_1(),
            next_submit_allowed: Deadline::UNSET,
            backoff: BACKOFF_MIN,
        }
    }

    /// Handle hash workers use to enqueue shares; survives reconnects.
    pub fn submit_queue(&self) -> SubmitQueue {
        self.submissions.clone()
    }

    /// Substitute the monotonic clock source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run the session until shutdown or a permanent failure.
    pub async fn run(mut self) -> StratumResult<()> {
        info!(
            pool = %self.config.url,
            user = %self.config.username,
            agent = USER_AGENT,
            "starting stratum session"
        );
        let mut first_attempt = true;
        loop {
            if self.shutdown.is_cancelled() {
                trace!("session shutting down");
                return Ok(());
            }
            match self.state {
                SessionState::Disconnected => {
                    if !first_attempt && !self.wait_backoff().await {
                        return Ok(());
                    }
                    first_attempt = false;
                    match self.connect_and_authorize().await {
                        Ok(true) => {}
                        Ok(false) => return Ok(()),
                        Err(e) if e.is_permanent() => {
                            warn!(pool = %self.config.url, error = %e, "permanent pool failure");
                            self.send_event(ClientEvent::Disconnected).await;
                            return Err(e);
                        }
                        Err(e) => self.drop_connection(e).await,
                    }
                }
                _ => match self.steady_state().await {
                    Ok(()) => return Ok(()),
                    Err(e) => self.drop_connection(e).await,
                },
            }
        }
    }

    // Sleep the current backoff (doubling it for next time) unless shutdown
    // arrives first.
    async fn wait_backoff(&mut self) -> bool {
        let delay = self.backoff;
        self.backoff = (self.backoff * 2).min(BACKOFF_MAX);
        debug!(pool = %self.config.url, delay_secs = delay.as_secs(), "reconnect backoff");
        tokio::select! {
            _ = sleep(delay) => true,
            _ = self.shutdown.cancelled() => false,
        }
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            trace!(pool = %self.config.url, from = %self.state, to = %next, "session state");
            self.state = next;
        }
    }

    fn take_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn conn_mut(&mut self) -> StratumResult<&mut PoolConnection> {
        self.connection
            .as_mut()
            .ok_or_else(|| StratumError::Protocol("not connected".into()))
    }

    async fn send_event(&self, event: ClientEvent) {
        if self.event_tx.send(event).await.is_err() {
            trace!("event receiver dropped");
        }
    }

    // Disconnected → Connecting → Authenticating → Active, or an error.
    // Ok(false) means shutdown arrived mid-handshake.
    async fn connect_and_authorize(&mut self) -> StratumResult<bool> {
        self.set_state(SessionState::Connecting);
        let addr = PoolAddr::parse(&self.config.url)?;
        let conn = PoolConnection::connect(&addr, CONNECT_TIMEOUT).await?;
        debug!(pool = %self.config.url, peer = %conn.peer(), "connected, subscribing");
        self.connection = Some(conn);

        let id = self.take_id();
        self.send(&messages::subscribe_request(id, USER_AGENT)).await?;
        let Some(resp) = self.await_response(id, "subscribe").await? else {
            return Ok(false);
        };
        let (extranonce1, extranonce2_size) = messages::parse_subscribe_result(&resp)?;

        self.set_state(SessionState::Authenticating);
        let id = self.take_id();
        let request =
            messages::authorize_request(id, &self.config.username, &self.config.password);
        self.send(&request).await?;
        let Some(resp) = self.await_response(id, "authorize").await? else {
            return Ok(false);
        };
        messages::parse_authorize_result(&resp)?;

        info!(pool = %self.config.url, user = %self.config.username, "authorized");
        self.backoff = BACKOFF_MIN;
        self.set_state(SessionState::Active);
        self.send_event(ClientEvent::Subscribed {
            extranonce1,
            extranonce2_size,
        })
        .await;
        Ok(true)
    }

    async fn send(&mut self, line: &str) -> StratumResult<()> {
        self.conn_mut()?.send_line(line, true).await?;
        Ok(())
    }

    // Wait for the response matching `id`, handling any notifications the
    // pool interleaves before it. Ok(None) means shutdown arrived.
    async fn await_response(
        &mut self,
        id: u64,
        what: &'static str,
    ) -> StratumResult<Option<RpcResponse>> {
        let deadline = Deadline::after(&*self.clock, RESPONSE_TIMEOUT);
        loop {
            // anything already buffered or readable comes first
            loop {
                let Some(line) = self.conn_mut()?.recv_line()? else {
                    break;
                };
                match ServerMessage::parse(&line)? {
                    ServerMessage::Response(resp) if resp.id == id => return Ok(Some(resp)),
                    msg => self.handle_server_message(msg).await?,
                }
            }

            let now = self.clock.now();
            if deadline.has_passed(now) {
                return Err(StratumError::Timeout(what));
            }
            let wait = deadline.remaining(now).unwrap_or_default();

            let readable = {
                let conn = self
                    .connection
                    .as_mut()
                    .ok_or_else(|| StratumError::Protocol("not connected".into()))?;
                tokio::select! {
                    r = timeout(wait, conn.readable()) => r,
                    _ = self.shutdown.cancelled() => return Ok(None),
                }
            };
            match readable {
                Err(_) => return Err(StratumError::Timeout(what)),
                Ok(Err(e)) => return Err(StratumError::Connect(e)),
                Ok(Ok(())) => {}
            }
        }
    }

    // Active/Suspended steady state. Returns Ok on shutdown, Err on any
    // connection-invalidating failure.
    async fn steady_state(&mut self) -> StratumResult<()> {
        // lines buffered during the handshake must not wait for fresh
        // socket readiness
        self.drain_lines().await?;
        loop {
            let mut wake_at = Deadline::UNSET;
            for pending in self.pending.values() {
                wake_at.reduce_to(pending.deadline);
            }
            let wait = wake_at.remaining(self.clock.now());

            let wake = {
                let conn = self
                    .connection
                    .as_mut()
                    .ok_or_else(|| StratumError::Protocol("not connected".into()))?;
                let command_rx = self.command_rx.as_mut();
                tokio::select! {
                    r = conn.readable() => Wake::Readable(r),
                    cmd = recv_command(command_rx) => Wake::Command(cmd),
                    _ = self.submissions.notified() => Wake::Submission,
                    _ = sleep_maybe(wait) => Wake::DeadlineExpired,
                    _ = self.shutdown.cancelled() => Wake::Shutdown,
                }
            };

            match wake {
                Wake::Shutdown => return Ok(()),
                Wake::Readable(Err(e)) => return Err(StratumError::Connect(e)),
                Wake::Readable(Ok(())) => self.drain_lines().await?,
                Wake::Command(None) => self.command_rx = None,
                Wake::Command(Some(cmd)) => self.handle_command(cmd)?,
                Wake::Submission => self.pump_submissions().await?,
                Wake::DeadlineExpired => {
                    let now = self.clock.now();
                    if self.pending.values().any(|p| p.deadline.has_passed(now)) {
                        return Err(StratumError::Timeout("share response"));
                    }
                }
            }
        }
    }

    // Process every complete line already buffered or readable, checking for
    // cancellation before each new line.
    async fn drain_lines(&mut self) -> StratumResult<()> {
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }
            let Some(line) = self.conn_mut()?.recv_line()? else {
                return Ok(());
            };
            let msg = ServerMessage::parse(&line)?;
            self.handle_server_message(msg).await?;
        }
    }

    fn handle_command(&mut self, cmd: ClientCommand) -> StratumResult<()> {
        match cmd {
            ClientCommand::SubmitShare(params) => self.submissions.push(params),
            ClientCommand::Suspend => {
                if self.state == SessionState::Active {
                    info!(pool = %self.config.url, "suspending session");
                    self.set_state(SessionState::Suspended);
                }
            }
            ClientCommand::Resume => {
                if self.state == SessionState::Suspended {
                    info!(pool = %self.config.url, "resuming session");
                    self.set_state(SessionState::Active);
                    self.submissions.nudge();
                }
            }
        }
        Ok(())
    }

    // Drain queued submissions. While suspended the queue holds; dispatched
    // requests still complete through the normal response path.
    async fn pump_submissions(&mut self) -> StratumResult<()> {
        self.submissions.drain_wakes();
        if self.state == SessionState::Suspended {
            return Ok(());
        }
        while let Some(params) = self.submissions.pop() {
            self.submit_share(params).await?;
        }
        Ok(())
    }

    async fn submit_share(&mut self, params: SubmitParams) -> StratumResult<()> {
        // The check uses the target active when the hash was computed, not
        // the current one; the pool stays the accept/reject authority.
        if !target::meets_target_verbose(&params.hash, &params.target) {
            debug!(job_id = %params.job_id, "discarding candidate above target");
            return Ok(());
        }
        if params.target != self.current_target {
            trace!(job_id = %params.job_id, "target changed since computation, submitting anyway");
        }

        let now = self.clock.now();
        if self.next_submit_allowed.is_set() && !self.next_submit_allowed.has_passed(now) {
            warn!(
                job_id = %params.job_id,
                cap = %FLOOD_PREVENTION_CAP,
                "dropping share over the flood prevention cap"
            );
            return Ok(());
        }
        self.next_submit_allowed
            .set_delay(now, FLOOD_PREVENTION_CAP.as_interval());

        let id = self.take_id();
        let request = messages::submit_request(id, &params);
        self.pending.insert(
            id,
            PendingSubmit {
                job_id: params.job_id.clone(),
                deadline: Deadline::after(&*self.clock, RESPONSE_TIMEOUT),
            },
        );

        let pool_url = self.config.url.clone();
        let conn = self.conn_mut()?;
        if conn.is_write_blocked() {
            debug!(pool = %pool_url, "socket backpressured, forcing share write");
        }
        conn.send_line(&request, true).await?;
        debug!(id, job_id = %params.job_id, nonce = format!("{:08x}", params.nonce), "share submitted");
        Ok(())
    }

    async fn handle_server_message(&mut self, msg: ServerMessage) -> StratumResult<()> {
        match msg {
            ServerMessage::Notify(job) => {
                debug!(job_id = %job.job_id, clean = job.clean_jobs, "new work from pool");
                self.send_event(ClientEvent::NewJob(job)).await;
            }
            ServerMessage::SetDifficulty(difficulty) => {
                info!(pool = %self.config.url, difficulty, "pool set difficulty");
                // takes effect for subsequent comparisons, never retroactively
                self.current_target = Target::from_difficulty(difficulty);
                self.send_event(ClientEvent::DifficultyChanged(difficulty)).await;
            }
            ServerMessage::SetVersionMask(mask) => {
                debug!(mask = format!("{mask:#010x}"), "pool set version mask");
                self.send_event(ClientEvent::VersionMaskSet(mask)).await;
            }
            ServerMessage::Response(resp) => self.handle_response(resp).await,
        }
        Ok(())
    }

    async fn handle_response(&mut self, resp: RpcResponse) {
        let Some(submit) = self.pending.remove(&resp.id) else {
            debug!(id = resp.id, "response for unknown request id, dropping");
            return;
        };
        let accepted = resp.error.is_none() && resp.result.as_bool().unwrap_or(false);
        if accepted {
            debug!(job_id = %submit.job_id, "share accepted");
            self.send_event(ClientEvent::ShareAccepted {
                job_id: submit.job_id,
            })
            .await;
        } else {
            let reason = resp
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "rejected".to_string());
            warn!(job_id = %submit.job_id, reason = %reason, "share rejected");
            self.send_event(ClientEvent::ShareRejected {
                job_id: submit.job_id,
                reason,
            })
            .await;
        }
    }

    // Tear down after a failure: resolve outstanding submissions, report,
    // and leave the state machine in Disconnected for the retry loop.
    async fn drop_connection(&mut self, err: StratumError) {
        warn!(pool = %self.config.url, error = %err, "pool connection lost");
        self.connection = None;
        let unresolved: Vec<String> = self.pending.drain().map(|(_, p)| p.job_id).collect();
        for job_id in unresolved {
            self.send_event(ClientEvent::ShareRejected {
                job_id,
                reason: "connection lost before response".to_string(),
            })
            .await;
        }
        self.set_state(SessionState::Disconnected);
        self.send_event(ClientEvent::Disconnected).await;
        self.send_event(ClientEvent::Error(err)).await;
    }
}

async fn recv_command(rx: Option<&mut mpsc::Receiver<ClientCommand>>) -> Option<ClientCommand> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_maybe(wait: Option<Duration>) {
    match wait {
        Some(delay) => sleep(delay).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Sha256d;

    fn dummy_share(job_id: &str) -> SubmitParams {
        SubmitParams {
            username: "w".into(),
            job_id: job_id.into(),
            extranonce2: vec![0; 4],
            ntime: 0,
            nonce: 0,
            version_bits: None,
            hash: Sha256d::from_be_bytes([0; 32]),
            target: Target::MAX,
        }
    }

    #[tokio::test]
    async fn submit_queue_preserves_enqueue_order() {
        let queue = SubmitQueue::new();
        queue.push(dummy_share("a"));
        queue.push(dummy_share("b"));
        queue.push(dummy_share("c"));
        assert_eq!(queue.len(), 3);

        // the pending wake is observed at least once
        tokio::time::timeout(Duration::from_millis(100), queue.notified())
            .await
            .expect("push must wake the owner");

        let order: Vec<String> = std::iter::from_fn(|| queue.pop())
            .map(|p| p.job_id)
            .collect();
        assert_eq!(order, ["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn request_ids_increase_monotonically() {
        let (event_tx, _event_rx) = mpsc::channel(1);
        let mut client = StratumV1Client::new(
            PoolConfig {
                url: "stratum+tcp://pool.example.com:3333".into(),
                username: "w".into(),
                password: "x".into(),
            },
            event_tx,
            CancellationToken::new(),
        );
        let a = client.take_id();
        let b = client.take_id();
        let c = client.take_id();
        assert!(a < b && b < c);
    }
}
