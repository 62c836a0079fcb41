//! Checkpoints: totally ordered ingestion positions.
//!
//! A checkpoint identifies a single event in the multi-chain ingestion
//! stream. Checkpoints order by block timestamp first so that events from
//! several chains interleave by time, then by chain, block, transaction and
//! event position.
//!
//! The persisted form is 40 bytes (five big-endian `u64`s). Byte-wise
//! comparison of two encodings equals checkpoint comparison, so SQL backends
//! can run range predicates directly on the encoded column. The five fields
//! behave like the digits of one 320-bit unsigned integer for [`Checkpoint::prev`]
//! and [`Checkpoint::next`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CheckpointError;

/// Length in bytes of an encoded checkpoint.
pub const ENCODED_LEN: usize = 40;

/// Length in characters of the hex form of a checkpoint.
pub const HEX_LEN: usize = ENCODED_LEN * 2;

/// A position in the ingestion stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Checkpoint {
    /// Unix timestamp of the block (seconds).
    pub block_timestamp: u64,
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// Block number.
    pub block_number: u64,
    /// Position of the transaction within the block.
    pub transaction_index: u64,
    /// Position of the event (log) within the block.
    pub event_index: u64,
}

impl Checkpoint {
    /// The smallest checkpoint.
    pub const ZERO: Checkpoint = Checkpoint {
        block_timestamp: 0,
        chain_id: 0,
        block_number: 0,
        transaction_index: 0,
        event_index: 0,
    };

    /// Sentinel greater than every real checkpoint; marks an open interval.
    pub const LATEST: Checkpoint = Checkpoint {
        block_timestamp: u64::MAX,
        chain_id: u64::MAX,
        block_number: u64::MAX,
        transaction_index: u64::MAX,
        event_index: u64::MAX,
    };

    pub const fn new(
        block_timestamp: u64,
        chain_id: u64,
        block_number: u64,
        transaction_index: u64,
        event_index: u64,
    ) -> Self {
        Self {
            block_timestamp,
            chain_id,
            block_number,
            transaction_index,
            event_index,
        }
    }

    /// Block-granular checkpoint (timestamp and in-block positions zeroed).
    ///
    /// Useful for single-chain drivers that write once per block.
    pub const fn block(chain_id: u64, block_number: u64) -> Self {
        Self::new(0, chain_id, block_number, 0, 0)
    }

    /// Returns `true` for the [`Checkpoint::LATEST`] sentinel.
    pub fn is_latest(&self) -> bool {
        *self == Self::LATEST
    }

    fn fields(&self) -> [u64; 5] {
        [
            self.block_timestamp,
            self.chain_id,
            self.block_number,
            self.transaction_index,
            self.event_index,
        ]
    }

    fn from_fields(f: [u64; 5]) -> Self {
        Self::new(f[0], f[1], f[2], f[3], f[4])
    }

    /// `self - 1`, or `None` for [`Checkpoint::ZERO`].
    pub fn checked_prev(&self) -> Option<Self> {
        let mut f = self.fields();
        for i in (0..f.len()).rev() {
            if f[i] > 0 {
                f[i] -= 1;
                return Some(Self::from_fields(f));
            }
            f[i] = u64::MAX;
        }
        None
    }

    /// `self + 1`, or `None` for [`Checkpoint::LATEST`].
    pub fn checked_next(&self) -> Option<Self> {
        let mut f = self.fields();
        for i in (0..f.len()).rev() {
            if f[i] < u64::MAX {
                f[i] += 1;
                return Some(Self::from_fields(f));
            }
            f[i] = 0;
        }
        None
    }

    /// `self - 1`, saturating at [`Checkpoint::ZERO`].
    pub fn prev(&self) -> Self {
        self.checked_prev().unwrap_or(Self::ZERO)
    }

    /// `self + 1`, saturating at [`Checkpoint::LATEST`].
    pub fn next(&self) -> Self {
        self.checked_next().unwrap_or(Self::LATEST)
    }

    /// Fixed-width, order-preserving byte encoding.
    pub fn encode(&self) -> [u8; ENCODED_LEN] {
        let mut out = [0u8; ENCODED_LEN];
        for (chunk, field) in out.chunks_exact_mut(8).zip(self.fields()) {
            chunk.copy_from_slice(&field.to_be_bytes());
        }
        out
    }

    /// Decode the output of [`Checkpoint::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, CheckpointError> {
        if bytes.len() != ENCODED_LEN {
            return Err(CheckpointError::InvalidLength {
                expected: ENCODED_LEN,
                actual: bytes.len(),
            });
        }
        let mut f = [0u64; 5];
        for (slot, chunk) in f.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            *slot = u64::from_be_bytes(buf);
        }
        Ok(Self::from_fields(f))
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for field in self.fields() {
            write!(f, "{field:016x}")?;
        }
        Ok(())
    }
}

impl FromStr for Checkpoint {
    type Err = CheckpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HEX_LEN {
            return Err(CheckpointError::InvalidLength {
                expected: HEX_LEN,
                actual: s.len(),
            });
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CheckpointError::InvalidHex(s.to_string()));
        }
        let mut f = [0u64; 5];
        for (i, slot) in f.iter_mut().enumerate() {
            let part = &s[i * 16..(i + 1) * 16];
            *slot = u64::from_str_radix(part, 16)
                .map_err(|_| CheckpointError::InvalidHex(s.to_string()))?;
        }
        Ok(Self::from_fields(f))
    }
}

impl Serialize for Checkpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Checkpoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
