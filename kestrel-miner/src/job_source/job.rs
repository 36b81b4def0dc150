//! Mining job template and share types.

use bitcoin::block::Version;
use bitcoin::hash_types::{BlockHash, TxMerkleNode};
use bitcoin::pow::CompactTarget;

use crate::target::{Sha256d, Target};

/// Template for mining jobs from any source.
///
/// Carries everything the device layer needs to generate block headers:
/// coinbase parts, merkle branches, and the extranonce parameters from the
/// source's subscription. The merkle root is computed as extranonce2 rolls.
#[derive(Debug, Clone)]
pub struct JobTemplate {
    /// Identifier for this job assigned by the source
    pub id: String,

    /// Previous block hash
    pub prev_blockhash: BlockHash,

    /// Block version
    pub version: Version,

    /// Encoded network difficulty target
    pub bits: CompactTarget,

    /// Block timestamp
    pub time: u32,

    /// Coinbase transaction up to the extranonces
    pub coinbase1: Vec<u8>,

    /// Coinbase transaction after the extranonces
    pub coinbase2: Vec<u8>,

    /// Merkle branches for building the block header
    pub merkle_branches: Vec<TxMerkleNode>,

    /// Extranonce1 assigned by the source at subscription
    pub extranonce1: Vec<u8>,

    /// Extranonce2 width in bytes
    pub extranonce2_size: usize,

    /// Threshold a hash must meet to be worth submitting
    pub share_target: Target,
}

impl JobTemplate {
    /// The full network target encoded in the job's compact bits.
    pub fn network_target(&self) -> Target {
        Target::from_compact(self.bits)
    }
}

/// A solved candidate headed back to its source.
///
/// This is the `(job, nonce, hash)` tuple the device layer produces; the
/// source turns it into a protocol submission.
#[derive(Debug, Clone)]
pub struct Share {
    /// Job this share was computed against
    pub job_id: String,

    /// Nonce that solves the work
    pub nonce: u32,

    /// nTime value used in the header
    pub time: u32,

    /// Version bits, when version rolling was used
    pub version_bits: Option<u32>,

    /// Extranonce2 used for the coinbase
    pub extranonce2: Vec<u8>,

    /// Double-hash of the candidate header
    pub hash: Sha256d,

    /// Target the hash was checked against when computed
    pub target: Target,
}
