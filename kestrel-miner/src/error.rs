//! Common error types for kestrel-miner.
//!
//! A centralized Error enum using thiserror, with conversions from the
//! error types of the crate's subsystems. Task and binary boundaries use
//! `anyhow::Result` instead; this type is for library callers that need to
//! match on the failure class.

use thiserror::Error;

/// Main error type for kestrel-miner operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from tokio or std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed or out-of-contract data
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Stratum session errors
    #[error("pool error: {0}")]
    Pool(#[from] crate::stratum_v1::StratumError),

    /// Legacy JSON-RPC bridge errors
    #[error("legacy rpc error: {0}")]
    Rpc(#[from] crate::getwork::RpcFailure),

    /// Generic errors for development
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
