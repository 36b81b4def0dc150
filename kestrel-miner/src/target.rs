//! Hash and difficulty-target math for share validation.
//!
//! Hashes and targets are 256-bit unsigned integers; a computed hash is an
//! acceptable share iff it is numerically at or below the target, regardless
//! of the byte order either value used on the wire. Both types here store
//! big-endian bytes, so the numeric comparison is a plain byte comparison.

use std::fmt;

use bitcoin::pow::CompactTarget;
use ruint::aliases::U256;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::Error;

/// The difficulty-1 pool target, `0x00000000ffff` followed by zeros. Pool
/// share targets are this value divided by the share difficulty.
const DIFF1_TARGET: [u8; 32] = [
    0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00,
];

/// Byte offset of the compact difficulty encoding within an 80-byte block
/// header (version 4 + prev hash 32 + merkle root 32 + time 4).
const HEADER_NBITS_OFFSET: usize = 72;

/// Double-SHA-256 digest, stored most-significant byte first.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Sha256d([u8; 32]);

impl Sha256d {
    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// From wire order (least-significant byte first), as hashing hardware
    /// and the header serialization produce it.
    pub fn from_le_bytes(mut bytes: [u8; 32]) -> Self {
        bytes.reverse();
        Self(bytes)
    }

    pub fn to_be_bytes(self) -> [u8; 32] {
        self.0
    }

    pub fn to_le_bytes(self) -> [u8; 32] {
        let mut bytes = self.0;
        bytes.reverse();
        bytes
    }
}

impl fmt::Debug for Sha256d {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256d({})", hex::encode(self.0))
    }
}

impl fmt::Display for Sha256d {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Apply the pool's hash commitment: SHA-256 over the candidate, then
/// SHA-256 over that digest.
pub fn double_hash(data: &[u8]) -> Sha256d {
    let first = Sha256::digest(data);
    let second: [u8; 32] = Sha256::digest(first).into();
    // SHA output is in wire order; flip into comparison order
    Sha256d::from_le_bytes(second)
}

/// 256-bit difficulty threshold, stored most-significant byte first.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Target([u8; 32]);

impl Target {
    /// Accepts every hash.
    pub const MAX: Target = Target([0xff; 32]);

    /// Rejects every hash but zero.
    pub const ZERO: Target = Target([0x00; 32]);

    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_le_bytes(mut bytes: [u8; 32]) -> Self {
        bytes.reverse();
        Self(bytes)
    }

    pub fn to_be_bytes(self) -> [u8; 32] {
        self.0
    }

    /// Expand the compact difficulty encoding to the full 256-bit target.
    pub fn from_compact(bits: CompactTarget) -> Self {
        Self(bitcoin::pow::Target::from_compact(bits).to_be_bytes())
    }

    /// Extract the compact bits embedded in a serialized block header and
    /// expand them.
    pub fn from_header(header: &[u8]) -> Result<Self, Error> {
        let raw: [u8; 4] = header
            .get(HEADER_NBITS_OFFSET..HEADER_NBITS_OFFSET + 4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| {
                Error::Protocol(format!("block header too short: {} bytes", header.len()))
            })?;
        let bits = CompactTarget::from_consensus(u32::from_le_bytes(raw));
        Ok(Self::from_compact(bits))
    }

    /// Pool share target for a given share difficulty: the difficulty-1
    /// target divided by `difficulty` (clamped to at least 1).
    pub fn from_difficulty(difficulty: u64) -> Self {
        let one = U256::from_be_bytes::<32>(DIFF1_TARGET);
        let scaled = one / U256::from(difficulty.max(1));
        Self(scaled.to_be_bytes::<32>())
    }

    pub fn difficulty_1() -> Self {
        Self(DIFF1_TARGET)
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Target({})", hex::encode(self.0))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// True iff `hash <= target` as 256-bit unsigned integers, compared
/// most-significant byte first.
pub fn meets_target(hash: &Sha256d, target: &Target) -> bool {
    hash.0 <= target.0
}

/// Same numeric rule as [`meets_target`], but rejects are reported instead
/// of silently dropped.
pub fn meets_target_verbose(hash: &Sha256d, target: &Target) -> bool {
    if *target == Target::ZERO {
        warn!("share target is zero, rejecting all work");
    }
    let ok = meets_target(hash, target);
    if !ok {
        debug!(%hash, %target, "hash above target");
    }
    ok
}
