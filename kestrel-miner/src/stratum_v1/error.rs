//! Stratum protocol error taxonomy.
//!
//! The distinction that matters operationally is permanent versus transient:
//! transient failures drive the session back to `Disconnected` and are
//! retried with backoff, permanent ones are surfaced once and wait for the
//! operator.

use thiserror::Error;

pub type StratumResult<T> = std::result::Result<T, StratumError>;

#[derive(Debug, Error)]
pub enum StratumError {
    /// Pool address could not be parsed or resolved. Permanent; retrying the
    /// same URL cannot succeed without operator intervention.
    #[error("bad pool address {url}: {reason}")]
    Address { url: String, reason: String },

    /// Connection-level failure: refused, unreachable, reset, closed.
    /// Transient; retried with backoff.
    #[error("pool connection failed: {0}")]
    Connect(#[source] std::io::Error),

    /// The pool sent something outside the protocol. Closes the connection
    /// and retries from the connect path.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The pool rejected our credentials. Permanent for these credentials;
    /// never retried automatically.
    #[error("pool rejected authorization: {0}")]
    AuthFailed(String),

    /// A line exceeded the framing limit without a terminator. An unbounded
    /// line is a resource-exhaustion vector, not a valid protocol state.
    #[error("oversized message: {0} bytes without a line terminator")]
    OversizedMessage(usize),

    /// A connect, response, or forced-send deadline expired.
    #[error("{0} timed out")]
    Timeout(&'static str),
}

impl StratumError {
    /// Permanent errors are surfaced to the operator instead of retried.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Address { .. } | Self::AuthFailed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn permanence_classification() {
        assert!(StratumError::Address {
            url: "x".into(),
            reason: "no port".into()
        }
        .is_permanent());
        assert!(StratumError::AuthFailed("bad worker".into()).is_permanent());

        assert!(!StratumError::Connect(io::Error::from(io::ErrorKind::ConnectionRefused))
            .is_permanent());
        assert!(!StratumError::Protocol("garbage".into()).is_permanent());
        assert!(!StratumError::OversizedMessage(10_000).is_permanent());
        assert!(!StratumError::Timeout("connect").is_permanent());
    }
}
