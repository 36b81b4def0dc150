//! End-to-end session tests against a simulated pool on loopback TCP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use kestrel_miner::stratum_v1::{
    ClientCommand, ClientEvent, PoolConfig, StratumError, StratumV1Client, SubmitParams,
};
use kestrel_miner::target::{Sha256d, Target};

/// Method names the simulated pool has received, in arrival order.
#[derive(Default)]
struct PoolLog {
    methods: Mutex<Vec<String>>,
}

struct SimPool {
    addr: SocketAddr,
    log: Arc<PoolLog>,
}

impl SimPool {
    /// Start a pool that subscribes, authorizes, pushes difficulty 1 and one
    /// job, and accepts every submission.
    ///
    /// `drop_first_session_after_job` closes the first connection right
    /// after the job lands; later connections behave normally.
    /// `reject_auth` answers every mining.authorize with false.
    async fn start(drop_first_session_after_job: bool, reject_auth: bool) -> SimPool {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let log = Arc::new(PoolLog::default());
        let accept_log = log.clone();
        tokio::spawn(async move {
            let mut first = true;
            while let Ok((stream, _)) = listener.accept().await {
                let drop_after_job = drop_first_session_after_job && first;
                first = false;
                serve_connection(stream, accept_log.clone(), drop_after_job, reject_auth).await;
            }
        });
        SimPool { addr, log }
    }

    fn url(&self) -> String {
        format!("stratum+tcp://{}", self.addr)
    }

    fn count(&self, method: &str) -> usize {
        self.log
            .methods
            .lock()
            .iter()
            .filter(|m| m.as_str() == method)
            .count()
    }
}

async fn serve_connection(
    stream: TcpStream,
    log: Arc<PoolLog>,
    drop_after_job: bool,
    reject_auth: bool,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let msg: Value = serde_json::from_str(&line).expect("client sent invalid JSON");
        let id = msg["id"].as_u64().expect("client request without id");
        let method = msg["method"].as_str().unwrap_or_default().to_string();
        log.methods.lock().push(method.clone());

        match method.as_str() {
            "mining.subscribe" => {
                send_json(
                    &mut write_half,
                    json!({
                        "id": id,
                        "result": [[["mining.notify", "sess-1"]], "08000002", 4],
                        "error": null
                    }),
                )
                .await;
            }
            "mining.authorize" => {
                if reject_auth {
                    send_json(
                        &mut write_half,
                        json!({"id": id, "result": false, "error": null}),
                    )
                    .await;
                    continue;
                }
                send_json(
                    &mut write_half,
                    json!({"id": id, "result": true, "error": null}),
                )
                .await;
                send_json(
                    &mut write_half,
                    json!({"id": null, "method": "mining.set_difficulty", "params": [1]}),
                )
                .await;
                send_json(
                    &mut write_half,
                    json!({
                        "id": null,
                        "method": "mining.notify",
                        "params": [
                            "job-1",
                            "00".repeat(32),
                            "01000000",
                            "00000000",
                            [],
                            "20000000",
                            "1d00ffff",
                            "66f3a2b1",
                            true
                        ]
                    }),
                )
                .await;
                if drop_after_job {
                    return;
                }
            }
            "mining.submit" => {
                send_json(
                    &mut write_half,
                    json!({"id": id, "result": true, "error": null}),
                )
                .await;
            }
            other => panic!("unexpected method {other:?}"),
        }
    }
}

async fn send_json(writer: &mut (impl AsyncWriteExt + Unpin), value: Value) {
    let mut line = value.to_string();
    line.push('\n');
    writer.write_all(line.as_bytes()).await.unwrap();
}

fn pool_config(pool: &SimPool) -> PoolConfig {
    PoolConfig {
        url: pool.url(),
        username: "tester.1".to_string(),
        password: "x".to_string(),
    }
}

fn share(job_id: &str, hash_byte: u8) -> SubmitParams {
    SubmitParams {
        username: "tester.1".to_string(),
        job_id: job_id.to_string(),
        extranonce2: vec![0, 0, 0, 0],
        ntime: 0x66f3a2b1,
        nonce: 0x0000_0001,
        version_bits: None,
        hash: Sha256d::from_be_bytes([hash_byte; 32]),
        target: Target::difficulty_1(),
    }
}

async fn wait_for(
    rx: &mut mpsc::Receiver<ClientEvent>,
    what: &str,
    pred: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    timeout(Duration::from_secs(10), async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

#[tokio::test]
async fn session_submits_only_hashes_below_target() {
    let pool = SimPool::start(false, false).await;
    let (event_tx, mut events) = mpsc::channel(100);
    let shutdown = CancellationToken::new();
    let client = StratumV1Client::new(pool_config(&pool), event_tx, shutdown.clone());
    let shares = client.submit_queue();
    let session = tokio::spawn(client.run());

    wait_for(&mut events, "subscription", |e| {
        matches!(e, ClientEvent::Subscribed { .. })
    })
    .await;
    wait_for(&mut events, "difficulty", |e| {
        matches!(e, ClientEvent::DifficultyChanged(1))
    })
    .await;
    let job = wait_for(&mut events, "job", |e| matches!(e, ClientEvent::NewJob(_))).await;
    let ClientEvent::NewJob(job) = job else {
        unreachable!()
    };
    assert_eq!(job.job_id, "job-1");

    // below the difficulty-1 target: must reach the pool
    shares.push(share("job-1", 0x00));
    wait_for(&mut events, "share acceptance", |e| {
        matches!(e, ClientEvent::ShareAccepted { .. })
    })
    .await;
    assert_eq!(pool.count("mining.submit"), 1);

    // above the target: must be discarded before the network
    shares.push(share("job-1", 0xff));
    sleep(Duration::from_millis(300)).await;
    assert_eq!(pool.count("mining.submit"), 1);

    shutdown.cancel();
    timeout(Duration::from_secs(5), session)
        .await
        .expect("session did not shut down")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn session_reconnects_after_pool_drop_without_a_new_queue() {
    let pool = SimPool::start(true, false).await;
    let (event_tx, mut events) = mpsc::channel(100);
    let shutdown = CancellationToken::new();
    let client = StratumV1Client::new(pool_config(&pool), event_tx, shutdown.clone());
    let shares = client.submit_queue();
    let session = tokio::spawn(client.run());

    wait_for(&mut events, "first subscription", |e| {
        matches!(e, ClientEvent::Subscribed { .. })
    })
    .await;
    wait_for(&mut events, "disconnect", |e| {
        matches!(e, ClientEvent::Disconnected)
    })
    .await;

    // the retry loop reconnects on its own after backoff
    wait_for(&mut events, "second subscription", |e| {
        matches!(e, ClientEvent::Subscribed { .. })
    })
    .await;
    assert_eq!(pool.count("mining.subscribe"), 2);
    assert_eq!(pool.count("mining.authorize"), 2);

    // the submit queue handed out before the drop still reaches the pool
    shares.push(share("job-1", 0x00));
    wait_for(&mut events, "share acceptance", |e| {
        matches!(e, ClientEvent::ShareAccepted { .. })
    })
    .await;
    assert_eq!(pool.count("mining.submit"), 1);

    shutdown.cancel();
    timeout(Duration::from_secs(5), session)
        .await
        .expect("session did not shut down")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn suspend_and_resume_do_not_reauthorize() {
    let pool = SimPool::start(false, false).await;
    let (event_tx, mut events) = mpsc::channel(100);
    let (command_tx, command_rx) = mpsc::channel(10);
    let shutdown = CancellationToken::new();
    let client =
        StratumV1Client::with_commands(pool_config(&pool), event_tx, command_rx, shutdown.clone());
    let shares = client.submit_queue();
    let session = tokio::spawn(client.run());

    wait_for(&mut events, "job", |e| matches!(e, ClientEvent::NewJob(_))).await;

    command_tx.send(ClientCommand::Suspend).await.unwrap();
    sleep(Duration::from_millis(200)).await;

    // suspended sessions queue shares instead of sending them
    shares.push(share("job-1", 0x00));
    sleep(Duration::from_millis(300)).await;
    assert_eq!(pool.count("mining.submit"), 0);

    command_tx.send(ClientCommand::Resume).await.unwrap();
    wait_for(&mut events, "share acceptance", |e| {
        matches!(e, ClientEvent::ShareAccepted { .. })
    })
    .await;
    assert_eq!(pool.count("mining.submit"), 1);

    // the still-open socket required no new handshake
    assert_eq!(pool.count("mining.subscribe"), 1);
    assert_eq!(pool.count("mining.authorize"), 1);

    shutdown.cancel();
    timeout(Duration::from_secs(5), session)
        .await
        .expect("session did not shut down")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn rejected_credentials_are_not_retried() {
    let pool = SimPool::start(false, true).await;
    let (event_tx, _events) = mpsc::channel(100);
    let shutdown = CancellationToken::new();
    let client = StratumV1Client::new(pool_config(&pool), event_tx, shutdown);
    let session = tokio::spawn(client.run());

    let result = timeout(Duration::from_secs(10), session)
        .await
        .expect("session should exit on auth failure")
        .unwrap();
    assert!(matches!(result, Err(StratumError::AuthFailed(_))));

    sleep(Duration::from_millis(300)).await;
    assert_eq!(pool.count("mining.authorize"), 1, "no automatic auth retry");
}
