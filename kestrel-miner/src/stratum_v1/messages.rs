//! Stratum v1 wire messages and the client-facing event/command types.
//!
//! The wire dialect is line-delimited JSON-RPC: one complete JSON object per
//! newline-terminated UTF-8 line, in both directions. Pool-originated
//! messages form a closed set; anything outside it is a protocol error
//! rather than silently ignored.

use std::fmt;

use bitcoin::block::Version;
use bitcoin::hash_types::{BlockHash, TxMerkleNode};
use bitcoin::hashes::Hash;
use bitcoin::pow::CompactTarget;
use serde_json::{json, Value};

use super::error::{StratumError, StratumResult};
use crate::target::{Sha256d, Target};

/// New-work notification (`mining.notify`).
///
/// Hex fields are decoded strictly; byte order of the hash fields is kept as
/// the pool sent them, since header assembly happens in the device layer.
#[derive(Debug, Clone)]
pub struct JobNotification {
    /// Pool-assigned job identifier; echoed back on submission.
    pub job_id: String,
    pub prev_hash: BlockHash,
    pub coinbase1: Vec<u8>,
    pub coinbase2: Vec<u8>,
    pub merkle_branches: Vec<TxMerkleNode>,
    pub version: Version,
    pub nbits: CompactTarget,
    pub ntime: u32,
    /// True when previous jobs are invalidated outright.
    pub clean_jobs: bool,
}

/// Share submission parameters, carried from the hash workers to the
/// session task.
#[derive(Debug, Clone)]
pub struct SubmitParams {
    pub username: String,
    /// Job the candidate was computed against; the pool is the authority on
    /// staleness.
    pub job_id: String,
    pub extranonce2: Vec<u8>,
    pub ntime: u32,
    pub nonce: u32,
    /// Set when version rolling was used for this candidate.
    pub version_bits: Option<u32>,
    /// The double-hash the device computed.
    pub hash: Sha256d,
    /// The target that was active when the candidate was computed. Targets
    /// can change mid-computation; the check must use this one.
    pub target: Target,
}

/// JSON-RPC error payload from a response.
#[derive(Debug, Clone)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Response to a previously issued request, matched by id.
#[derive(Debug)]
pub struct RpcResponse {
    pub id: u64,
    pub result: Value,
    pub error: Option<RpcError>,
}

/// The closed set of pool-originated messages.
#[derive(Debug)]
pub enum ServerMessage {
    Notify(JobNotification),
    SetDifficulty(u64),
    SetVersionMask(u32),
    Response(RpcResponse),
}

impl ServerMessage {
    /// Parse one line of pool output. Unknown methods and malformed
    /// payloads are protocol errors.
    pub fn parse(line: &str) -> StratumResult<ServerMessage> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| StratumError::Protocol(format!("invalid JSON: {e}")))?;
        let obj = value
            .as_object()
            .ok_or_else(|| StratumError::Protocol("message is not an object".into()))?;

        match obj.get("method").and_then(Value::as_str) {
            Some("mining.notify") => parse_notify(params(obj)?),
            Some("mining.set_difficulty") => parse_set_difficulty(params(obj)?),
            Some("mining.set_version_mask") => parse_set_version_mask(params(obj)?),
            Some(other) => Err(StratumError::Protocol(format!("unknown method {other:?}"))),
            None => {
                let id = obj
                    .get("id")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| StratumError::Protocol("response without an id".into()))?;
                Ok(ServerMessage::Response(RpcResponse {
                    id,
                    result: obj.get("result").cloned().unwrap_or(Value::Null),
                    error: parse_rpc_error(obj.get("error")),
                }))
            }
        }
    }
}

fn params(obj: &serde_json::Map<String, Value>) -> StratumResult<&Vec<Value>> {
    obj.get("params")
        .and_then(Value::as_array)
        .ok_or_else(|| StratumError::Protocol("params is not an array".into()))
}

fn param<'a>(params: &'a [Value], index: usize, what: &str) -> StratumResult<&'a Value> {
    params
        .get(index)
        .ok_or_else(|| StratumError::Protocol(format!("missing param {index} ({what})")))
}

fn str_param<'a>(params: &'a [Value], index: usize, what: &str) -> StratumResult<&'a str> {
    param(params, index, what)?
        .as_str()
        .ok_or_else(|| StratumError::Protocol(format!("param {index} ({what}) is not a string")))
}

fn hex_param(params: &[Value], index: usize, what: &str) -> StratumResult<Vec<u8>> {
    hex::decode(str_param(params, index, what)?)
        .map_err(|e| StratumError::Protocol(format!("param {index} ({what}): {e}")))
}

fn hex_u32_param(params: &[Value], index: usize, what: &str) -> StratumResult<u32> {
    let s = str_param(params, index, what)?;
    u32::from_str_radix(s, 16)
        .map_err(|e| StratumError::Protocol(format!("param {index} ({what}): {e}")))
}

fn hash_param(params: &[Value], index: usize, what: &str) -> StratumResult<[u8; 32]> {
    hex_param(params, index, what)?
        .try_into()
        .map_err(|_| StratumError::Protocol(format!("param {index} ({what}) is not 32 bytes")))
}

fn parse_notify(params: &[Value]) -> StratumResult<ServerMessage> {
    let branches = param(params, 4, "merkle branches")?
        .as_array()
        .ok_or_else(|| StratumError::Protocol("merkle branches is not an array".into()))?
        .iter()
        .map(|branch| {
            let bytes: [u8; 32] = branch
                .as_str()
                .and_then(|s| hex::decode(s).ok())
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| StratumError::Protocol("bad merkle branch".into()))?;
            Ok(TxMerkleNode::from_byte_array(bytes))
        })
        .collect::<StratumResult<Vec<_>>>()?;

    Ok(ServerMessage::Notify(JobNotification {
        job_id: str_param(params, 0, "job id")?.to_string(),
        prev_hash: BlockHash::from_byte_array(hash_param(params, 1, "prev hash")?),
        coinbase1: hex_param(params, 2, "coinbase1")?,
        coinbase2: hex_param(params, 3, "coinbase2")?,
        merkle_branches: branches,
        version: Version::from_consensus(hex_u32_param(params, 5, "version")? as i32),
        nbits: CompactTarget::from_consensus(hex_u32_param(params, 6, "nbits")?),
        ntime: hex_u32_param(params, 7, "ntime")?,
        clean_jobs: param(params, 8, "clean jobs")?.as_bool().unwrap_or(false),
    }))
}

fn parse_set_difficulty(params: &[Value]) -> StratumResult<ServerMessage> {
    let raw = param(params, 0, "difficulty")?
        .as_f64()
        .ok_or_else(|| StratumError::Protocol("difficulty is not a number".into()))?;
    if !raw.is_finite() || raw <= 0.0 {
        return Err(StratumError::Protocol(format!("bad difficulty {raw}")));
    }
    // held as an integer; sub-1 pool difficulties clamp up to 1
    Ok(ServerMessage::SetDifficulty((raw.round() as u64).max(1)))
}

fn parse_set_version_mask(params: &[Value]) -> StratumResult<ServerMessage> {
    Ok(ServerMessage::SetVersionMask(hex_u32_param(
        params,
        0,
        "version mask",
    )?))
}

fn parse_rpc_error(error: Option<&Value>) -> Option<RpcError> {
    let error = error?;
    match error {
        Value::Null => None,
        // the common shape: [code, message, traceback]
        Value::Array(parts) => Some(RpcError {
            code: parts.first().and_then(Value::as_i64).unwrap_or(0),
            message: parts
                .get(1)
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        }),
        Value::Object(fields) => Some(RpcError {
            code: fields.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: fields
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        }),
        other => Some(RpcError {
            code: 0,
            message: other.to_string(),
        }),
    }
}

/// Extract `(extranonce1, extranonce2_size)` from a subscription response.
pub fn parse_subscribe_result(resp: &RpcResponse) -> StratumResult<(Vec<u8>, usize)> {
    if let Some(err) = &resp.error {
        return Err(StratumError::Protocol(format!("subscribe rejected: {err}")));
    }
    let parts = resp
        .result
        .as_array()
        .ok_or_else(|| StratumError::Protocol("subscribe result is not an array".into()))?;
    let extranonce1 = hex_param(parts, 1, "extranonce1")?;
    let extranonce2_size = param(parts, 2, "extranonce2 size")?
        .as_u64()
        .ok_or_else(|| StratumError::Protocol("extranonce2 size is not a number".into()))?;
    Ok((extranonce1, extranonce2_size as usize))
}

/// Interpret an authorization response; rejection is [`StratumError::AuthFailed`].
pub fn parse_authorize_result(resp: &RpcResponse) -> StratumResult<()> {
    if let Some(err) = &resp.error {
        return Err(StratumError::AuthFailed(err.to_string()));
    }
    match resp.result.as_bool() {
        Some(true) => Ok(()),
        _ => Err(StratumError::AuthFailed("pool returned false".into())),
    }
}

pub fn subscribe_request(id: u64, agent: &str) -> String {
    json!({"id": id, "method": "mining.subscribe", "params": [agent]}).to_string()
}

pub fn authorize_request(id: u64, username: &str, password: &str) -> String {
    json!({"id": id, "method": "mining.authorize", "params": [username, password]}).to_string()
}

pub fn submit_request(id: u64, p: &SubmitParams) -> String {
    let mut params = vec![
        Value::from(p.username.as_str()),
        Value::from(p.job_id.as_str()),
        Value::from(hex::encode(&p.extranonce2)),
        Value::from(format!("{:08x}", p.ntime)),
        Value::from(format!("{:08x}", p.nonce)),
    ];
    if let Some(bits) = p.version_bits {
        params.push(Value::from(format!("{bits:08x}")));
    }
    json!({"id": id, "method": "mining.submit", "params": params}).to_string()
}

/// Events pushed from the client task to its consumer.
#[derive(Debug)]
pub enum ClientEvent {
    /// Subscription completed; protocol parameters for job construction.
    Subscribed {
        extranonce1: Vec<u8>,
        extranonce2_size: usize,
    },
    NewJob(JobNotification),
    DifficultyChanged(u64),
    VersionMaskSet(u32),
    ShareAccepted {
        job_id: String,
    },
    ShareRejected {
        job_id: String,
        reason: String,
    },
    /// The session lost its connection; reconnection is automatic.
    Disconnected,
    /// A transient fault worth reporting; the session keeps running.
    Error(StratumError),
}

/// Commands accepted by the client task.
#[derive(Debug)]
pub enum ClientCommand {
    SubmitShare(SubmitParams),
    /// Keep the connection but stop issuing new submissions.
    Suspend,
    /// Leave suspension; degrades to a full reconnect if the socket died.
    Resume,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notify_line() -> String {
        json!({
            "id": null,
            "method": "mining.notify",
            "params": [
                "job-42",
                "4d".repeat(32),          // prev hash
                "01000000ffffffff",       // coinbase1
                "00f2052a01000000",       // coinbase2
                ["ab".repeat(32)],        // merkle branches
                "20000000",
                "1d00ffff",
                "66f3a2b1",
                true
            ]
        })
        .to_string()
    }

    #[test]
    fn notify_parses_into_a_job() {
        let msg = ServerMessage::parse(&notify_line()).unwrap();
        let ServerMessage::Notify(job) = msg else {
            panic!("expected a job notification");
        };
        assert_eq!(job.job_id, "job-42");
        assert_eq!(job.coinbase1, hex::decode("01000000ffffffff").unwrap());
        assert_eq!(job.merkle_branches.len(), 1);
        assert_eq!(job.version.to_consensus(), 0x20000000);
        assert_eq!(job.nbits.to_consensus(), 0x1d00ffff);
        assert_eq!(job.ntime, 0x66f3a2b1);
        assert!(job.clean_jobs);
    }

    #[test]
    fn notify_with_missing_params_is_a_protocol_error() {
        let line = json!({"id": null, "method": "mining.notify", "params": ["job-1"]}).to_string();
        assert!(matches!(
            ServerMessage::parse(&line),
            Err(StratumError::Protocol(_))
        ));
    }

    #[test]
    fn set_difficulty_accepts_integers_and_floats() {
        let int = json!({"id": null, "method": "mining.set_difficulty", "params": [512]});
        let Ok(ServerMessage::SetDifficulty(d)) = ServerMessage::parse(&int.to_string()) else {
            panic!();
        };
        assert_eq!(d, 512);

        let frac = json!({"id": null, "method": "mining.set_difficulty", "params": [0.25]});
        let Ok(ServerMessage::SetDifficulty(d)) = ServerMessage::parse(&frac.to_string()) else {
            panic!();
        };
        assert_eq!(d, 1, "sub-1 difficulties clamp to 1");
    }

    #[test]
    fn set_version_mask_parses_hex() {
        let line = json!({"id": null, "method": "mining.set_version_mask", "params": ["1fffe000"]});
        let Ok(ServerMessage::SetVersionMask(mask)) = ServerMessage::parse(&line.to_string())
        else {
            panic!();
        };
        assert_eq!(mask, 0x1fffe000);
    }

    #[test]
    fn unknown_method_is_a_protocol_error() {
        let line = json!({"id": null, "method": "client.reconnect", "params": []}).to_string();
        assert!(matches!(
            ServerMessage::parse(&line),
            Err(StratumError::Protocol(_))
        ));
    }

    #[test]
    fn response_round_trips_id_result_error() {
        let ok = json!({"id": 7, "result": true, "error": null}).to_string();
        let ServerMessage::Response(resp) = ServerMessage::parse(&ok).unwrap() else {
            panic!();
        };
        assert_eq!(resp.id, 7);
        assert_eq!(resp.result, Value::Bool(true));
        assert!(resp.error.is_none());

        let rejected =
            json!({"id": 8, "result": null, "error": [23, "low difficulty share", null]})
                .to_string();
        let ServerMessage::Response(resp) = ServerMessage::parse(&rejected).unwrap() else {
            panic!();
        };
        let err = resp.error.unwrap();
        assert_eq!(err.code, 23);
        assert_eq!(err.message, "low difficulty share");
    }

    #[test]
    fn response_without_id_is_a_protocol_error() {
        let line = json!({"id": null, "result": true, "error": null}).to_string();
        assert!(matches!(
            ServerMessage::parse(&line),
            Err(StratumError::Protocol(_))
        ));
    }

    #[test]
    fn subscribe_result_extracts_extranonce() {
        let resp = RpcResponse {
            id: 1,
            result: json!([[["mining.notify", "abc"]], "08000002", 4]),
            error: None,
        };
        let (extranonce1, size) = parse_subscribe_result(&resp).unwrap();
        assert_eq!(extranonce1, vec![0x08, 0x00, 0x00, 0x02]);
        assert_eq!(size, 4);
    }

    #[test]
    fn authorize_rejection_is_auth_failed() {
        let resp = RpcResponse {
            id: 2,
            result: Value::Bool(false),
            error: None,
        };
        assert!(matches!(
            parse_authorize_result(&resp),
            Err(StratumError::AuthFailed(_))
        ));

        let resp = RpcResponse {
            id: 3,
            result: Value::Null,
            error: Some(RpcError {
                code: 24,
                message: "unknown worker".into(),
            }),
        };
        let Err(StratumError::AuthFailed(reason)) = parse_authorize_result(&resp) else {
            panic!();
        };
        assert!(reason.contains("unknown worker"));
    }

    #[test]
    fn submit_request_formats_hex_fields() {
        let p = SubmitParams {
            username: "worker.1".into(),
            job_id: "job-42".into(),
            extranonce2: vec![0x00, 0x00, 0x00, 0x2a],
            ntime: 0x66f3a2b1,
            nonce: 0xdeadbeef,
            version_bits: None,
            hash: Sha256d::from_be_bytes([0; 32]),
            target: Target::MAX,
        };
        let parsed: Value = serde_json::from_str(&submit_request(9, &p)).unwrap();
        assert_eq!(parsed["id"], 9);
        assert_eq!(parsed["method"], "mining.submit");
        assert_eq!(
            parsed["params"],
            json!(["worker.1", "job-42", "0000002a", "66f3a2b1", "deadbeef"])
        );

        let rolled = SubmitParams {
            version_bits: Some(0x00e00000),
            ..p
        };
        let parsed: Value = serde_json::from_str(&submit_request(10, &rolled)).unwrap();
        assert_eq!(parsed["params"][5], "00e00000");
    }
}
