//! Core type definitions for the Meridian Protocol.
//!
//! All fundamental types are defined here with explicit byte layouts
//! and invariant documentation.

pub mod address_set;
pub mod block;
pub mod lightning;
pub mod stake;
pub mod transaction;
pub mod vote;

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// 20-byte account identifier, the trailing 20 bytes of the Keccak-256
/// digest of the uncompressed secp256k1 public key.
#[derive(Clone, Copy, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// An all-zero address marks "not specified".
    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; 20]
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 20 {
            return None;
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(bytes);
        Some(Self(arr))
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// 32-byte Keccak-256 digest, the identity of blocks, transactions,
/// state roots, and sets.
#[derive(Clone, Copy, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// An all-zero hash marks "not specified".
    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 32 {
            return None;
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Some(Self(arr))
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let s = s.trim_start_matches("0x");
        let bytes = hex::decode(s).ok()?;
        Self::from_slice(&bytes)
    }

    pub fn hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

// ============================================================================
// TOKEN AMOUNTS
// ============================================================================

/// Dual-token balance: SCPT (stake token) and SPAY (gas/fee token),
/// both denominated in wei (10^-18).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Coins {
    pub scpt_wei: u128,
    pub spay_wei: u128,
}

impl Coins {
    pub const ZERO: Coins = Coins {
        scpt_wei: 0,
        spay_wei: 0,
    };

    pub fn new(scpt_wei: u128, spay_wei: u128) -> Self {
        Self { scpt_wei, spay_wei }
    }

    /// SPAY-only amount; checkpoint rewards never mint SCPT.
    pub fn spay(spay_wei: u128) -> Self {
        Self {
            scpt_wei: 0,
            spay_wei,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.scpt_wei == 0 && self.spay_wei == 0
    }

    pub fn plus(&self, other: Coins) -> Coins {
        Coins {
            scpt_wei: self.scpt_wei.saturating_add(other.scpt_wei),
            spay_wei: self.spay_wei.saturating_add(other.spay_wei),
        }
    }

    /// Component-wise subtraction; None if either token would underflow.
    pub fn minus(&self, other: Coins) -> Option<Coins> {
        Some(Coins {
            scpt_wei: self.scpt_wei.checked_sub(other.scpt_wei)?,
            spay_wei: self.spay_wei.checked_sub(other.spay_wei)?,
        })
    }

    pub fn is_gte(&self, other: &Coins) -> bool {
        self.scpt_wei >= other.scpt_wei && self.spay_wei >= other.spay_wei
    }
}

// ============================================================================
// UTILITY FUNCTIONS
// ============================================================================

/// Compute Keccak-256 hash of input bytes.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    use sha3::{Digest, Keccak256};
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Keccak-256 as a `Hash`.
pub fn keccak256_hash(data: &[u8]) -> Hash {
    Hash(keccak256(data))
}
