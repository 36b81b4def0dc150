//! Legacy JSON-RPC (getwork-style) call bridge.
//!
//! Some pools still speak plain JSON-RPC over HTTP instead of Stratum. The
//! HTTP transport itself is an external collaborator behind
//! [`LegacyTransport`]; this module owns what the core is actually
//! responsible for — correlating fire-and-forget calls with their later
//! completions (the caller's context must round-trip unchanged) and
//! classifying failures uniformly as network, HTTP, or payload faults.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

/// Classified failure for a completed call.
#[derive(Debug, Error)]
pub enum RpcFailure {
    /// The request never produced an HTTP response.
    #[error("network failure: {0}")]
    Network(String),

    /// The server answered outside 2xx.
    #[error("HTTP failure: status {0}")]
    Http(u16),

    /// The response body was not a usable JSON-RPC result.
    #[error("payload failure: {0}")]
    Payload(String),
}

/// Correlates a submitted call with its completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(u64);

/// What the transport observed for one round trip.
#[derive(Debug, Default)]
pub struct TransportOutcome {
    /// HTTP status; `None` when the request failed below HTTP.
    pub status: Option<u16>,
    pub body: Option<String>,
    pub network_error: Option<String>,
    /// Parsed X-Roll-NTime header, for long-poll callers.
    pub rolltime: Option<u32>,
}

/// A call registered and awaiting completion.
#[derive(Debug)]
struct PendingCall<C> {
    url: String,
    long_poll: bool,
    share: bool,
    context: C,
}

/// A completed call: the untouched context plus the classified result.
#[derive(Debug)]
pub struct CompletedCall<C> {
    pub context: C,
    pub rolltime: Option<u32>,
    pub result: Result<Value, RpcFailure>,
}

/// Pending-call table keyed by [`CallId`].
///
/// `submit_call` is fire-and-forget from the caller's perspective; the
/// result is delivered later through `complete_call`, which returns the
/// caller's context exactly as registered. No call is silently forgotten:
/// teardown drains the table through [`CallTable::abort_all`].
#[derive(Debug)]
pub struct CallTable<C> {
    next_id: u64,
    pending: HashMap<u64, PendingCall<C>>,
}

impl<C> Default for CallTable<C> {
    fn default() -> Self {
        Self {
            next_id: 0,
            pending: HashMap::new(),
        }
    }
}

impl<C> CallTable<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Register a call. `long_poll` and `share` only tag the call for the
    /// caller's benefit; the table treats all calls alike.
    pub fn submit_call(&mut self, url: &str, long_poll: bool, share: bool, context: C) -> CallId {
        self.next_id += 1;
        let id = self.next_id;
        trace!(id, url, long_poll, share, "legacy rpc call registered");
        self.pending.insert(
            id,
            PendingCall {
                url: url.to_string(),
                long_poll,
                share,
                context,
            },
        );
        CallId(id)
    }

    /// Whether a registered call was a share submission.
    pub fn is_share(&self, id: CallId) -> bool {
        self.pending.get(&id.0).map_or(false, |p| p.share)
    }

    /// Complete a registered call against what the transport observed.
    /// Returns `None` for an id that was never registered (or already
    /// completed) — a bug in the caller, but not a panic.
    pub fn complete_call(&mut self, id: CallId, outcome: TransportOutcome) -> Option<CompletedCall<C>> {
        let pending = self.pending.remove(&id.0)?;
        trace!(
            id = id.0,
            url = %pending.url,
            long_poll = pending.long_poll,
            "legacy rpc call completed"
        );
        Some(CompletedCall {
            context: pending.context,
            rolltime: outcome.rolltime,
            result: classify(outcome),
        })
    }

    /// Resolve every outstanding call as a network failure, returning the
    /// contexts so callers can notify their waiters.
    pub fn abort_all(&mut self) -> Vec<C> {
        self.pending.drain().map(|(_, p)| p.context).collect()
    }
}

// Uniform error classification: network, then HTTP, then payload.
fn classify(outcome: TransportOutcome) -> Result<Value, RpcFailure> {
    if let Some(reason) = outcome.network_error {
        return Err(RpcFailure::Network(reason));
    }
    let status = outcome
        .status
        .ok_or_else(|| RpcFailure::Network("no HTTP response".to_string()))?;
    if !(200..300).contains(&status) {
        return Err(RpcFailure::Http(status));
    }
    let body = outcome
        .body
        .ok_or_else(|| RpcFailure::Payload("empty response body".to_string()))?;
    let value: Value =
        serde_json::from_str(&body).map_err(|e| RpcFailure::Payload(e.to_string()))?;
    if let Some(err) = value.get("error") {
        if !err.is_null() {
            return Err(RpcFailure::Payload(format!("rpc error: {err}")));
        }
    }
    match value.get("result") {
        Some(result) if !result.is_null() => Ok(result.clone()),
        _ => Err(RpcFailure::Payload("missing result".to_string())),
    }
}

/// The external HTTP collaborator.
#[async_trait]
pub trait LegacyTransport: Send + Sync {
    async fn roundtrip(
        &self,
        url: &str,
        userpass: Option<&str>,
        body: &str,
        long_poll: bool,
    ) -> TransportOutcome;
}

/// Default collaborator backed by reqwest.
#[derive(Debug, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LegacyTransport for HttpTransport {
    async fn roundtrip(
        &self,
        url: &str,
        userpass: Option<&str>,
        body: &str,
        long_poll: bool,
    ) -> TransportOutcome {
        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string());
        if let Some(userpass) = userpass {
            let (user, pass) = userpass.split_once(':').unwrap_or((userpass, ""));
            request = request.basic_auth(user, Some(pass));
        }
        if !long_poll {
            request = request.timeout(std::time::Duration::from_secs(60));
        }

        let response = match request.send().await {
            Err(e) => {
                return TransportOutcome {
                    network_error: Some(e.to_string()),
                    ..Default::default()
                }
            }
            Ok(response) => response,
        };

        let status = response.status().as_u16();
        let rolltime = response
            .headers()
            .get("X-Roll-NTime")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_rolltime);
        match response.text().await {
            Ok(body) => TransportOutcome {
                status: Some(status),
                body: Some(body),
                network_error: None,
                rolltime,
            },
            Err(e) => TransportOutcome {
                status: Some(status),
                network_error: Some(e.to_string()),
                ..Default::default()
            },
        }
    }
}

// Header value is "N", "Y", or a seconds count.
fn parse_rolltime(value: &str) -> Option<u32> {
    match value.trim() {
        "N" | "n" => None,
        "Y" | "y" => Some(60),
        other => other.parse().ok(),
    }
}

/// Issue a call through a transport and complete it against the table in
/// one step. The split API remains available for callers that dispatch and
/// complete on different tasks.
pub async fn call<C, T>(
    transport: &T,
    table: &mut CallTable<C>,
    url: &str,
    userpass: Option<&str>,
    body: String,
    long_poll: bool,
    share: bool,
    context: C,
) -> CompletedCall<C>
where
    T: LegacyTransport + ?Sized,
{
    let id = table.submit_call(url, long_poll, share, context);
    let outcome = transport.roundtrip(url, userpass, &body, long_poll).await;
    table
        .complete_call(id, outcome)
        .expect("call registered above cannot be missing")
}
