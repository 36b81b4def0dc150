//! Stratum v1 mining protocol client.
//!
//! This module provides a reusable Stratum v1 client for connecting to
//! mining pools. The protocol uses JSON-RPC over TCP with newline-delimited
//! messages.
//!
//! # Protocol Overview
//!
//! Stratum v1 is a bidirectional, event-driven protocol:
//!
//! - **Client requests**: subscribe, authorize, submit
//! - **Server notifications**: mining.notify (new work),
//!   mining.set_difficulty, mining.set_version_mask
//! - **Server responses**: Results for client requests (boolean or error
//!   array)
//!
//! # Architecture
//!
//! The client is an active async task owning the TCP connection and a small
//! state machine (disconnected, connecting, authenticating, active,
//! suspended). It pushes [`ClientEvent`]s to a consumer over a channel and
//! accepts [`ClientCommand`]s back. Computed shares enter through a
//! [`SubmitQueue`], which any thread may push into; the push wakes the
//! session task's combined wait, keeping all socket writes and state
//! transitions on the one owning task.
//!
//! # Usage
//!
//! ```rust,ignore
//! use stratum_v1::{StratumV1Client, ClientEvent, PoolConfig};
//!
//! let (event_tx, mut event_rx) = mpsc::channel(100);
//! let config = PoolConfig {
//!     url: "stratum+tcp://pool.example.com:3333".to_string(),
//!     username: "worker".to_string(),
//!     password: "x".to_string(),
//! };
//!
//! let client = StratumV1Client::new(config, event_tx, shutdown_token);
//! let shares = client.submit_queue();
//! tokio::spawn(client.run());
//!
//! while let Some(event) = event_rx.recv().await {
//!     match event {
//!         ClientEvent::NewJob(job) => { /* handle new work */ }
//!         ClientEvent::DifficultyChanged(diff) => { /* update difficulty */ }
//!         // ...
//!     }
//! }
//! ```

mod client;
mod connection;
mod error;
mod messages;

use crate::types::ShareRate;
use std::time::Duration;

pub use client::{PoolConfig, StratumV1Client, SubmitQueue};
pub use connection::{PoolAddr, PoolConnection, SendOutcome, MAX_LINE_LEN};
pub use error::{StratumError, StratumResult};
pub use messages::{ClientCommand, ClientEvent, JobNotification, SubmitParams};

/// Safety cap on the share submission rate.
///
/// This exists only to stop pathological floods: a pool that starts
/// high-hashrate hardware at difficulty 1, a misconfigured vardiff, or a bug
/// in our own difficulty handling. It is deliberately far above any sane
/// pool's target share rate so that normal vardiff operation never touches
/// it; a pool seeing shares arrive at this ceiling will raise difficulty
/// within a few adjustment cycles, after which the cap is inactive.
pub const FLOOD_PREVENTION_CAP: ShareRate = ShareRate::from_interval(Duration::from_millis(100));
