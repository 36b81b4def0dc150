//! Pool-communication core of the kestrel mining daemon.
//!
//! This crate maintains persistent connections to mining pools over the
//! Stratum v1 protocol, validates computed hashes against pool-assigned
//! difficulty targets, and hands work to (and accepts shares from) the
//! device layer through the [`job_source`] abstraction.
//!
//! The layering, leaves first:
//!
//! - [`types`] — byte buffer and small value types
//! - [`timer`] — monotonic deadlines behind an injectable clock
//! - [`notify`] — cross-task wake primitive
//! - [`target`] — 256-bit hash/target comparison and derivation
//! - [`stratum_v1`] — the pool connection and session state machine
//! - [`getwork`] — call correlation for the legacy JSON-RPC transport
//! - [`job_source`] — the seam between pools and the device layer

pub mod config;
pub mod error;
pub mod getwork;
pub mod job_source;
pub mod notify;
pub mod stratum_v1;
pub mod target;
pub mod timer;
pub mod tracing;
pub mod types;
