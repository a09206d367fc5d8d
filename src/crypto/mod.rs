//! secp256k1 signing primitives.
//!
//! Uses the `k256` crate for cryptographic operations. Signatures are
//! recoverable ECDSA over the Keccak-256 digest of the message, so a
//! signature can be verified directly against a 20-byte address without
//! carrying the public key alongside it.

use crate::types::{keccak256, Address};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid secret key bytes")]
    InvalidSecretKey,

    #[error("invalid public key bytes")]
    InvalidPublicKey,

    #[error("invalid signature bytes")]
    InvalidSignature,

    #[error("signature verification failed")]
    VerificationFailed,
}

/// secp256k1 secret key (32-byte scalar).
#[derive(Clone)]
pub struct PrivateKey(SigningKey);

/// secp256k1 public key.
#[derive(Clone, Debug)]
pub struct PublicKey(VerifyingKey);

/// Recoverable ECDSA signature: 64 bytes `r || s` plus one recovery byte.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Signature([u8; 65]);

impl PrivateKey {
    /// Generate a new random secret key.
    pub fn generate() -> Self {
        Self(SigningKey::random(&mut rand::rngs::OsRng))
    }

    /// Create from raw scalar bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        SigningKey::from_bytes(bytes.into())
            .map(Self)
            .map_err(|_| CryptoError::InvalidSecretKey)
    }

    /// Export raw scalar bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes().into()
    }

    /// Derive the public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(*self.0.verifying_key())
    }

    /// The address controlled by this key.
    pub fn address(&self) -> Address {
        self.public_key().address()
    }

    /// Sign the Keccak-256 digest of `message`.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let digest = keccak256(message);
        let (sig, recid) = self
            .0
            .sign_prehash_recoverable(&digest)
            .expect("signing over a fixed-size prehash cannot fail");
        Signature::from_parts(&sig, recid)
    }
}

impl PublicKey {
    /// Create from an uncompressed SEC1 encoding (65 bytes, 0x04 prefix).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        VerifyingKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    /// Export the uncompressed SEC1 encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(false).as_bytes().to_vec()
    }

    /// Derive the 20-byte address: trailing bytes of the Keccak-256 digest
    /// of the uncompressed point (without the 0x04 prefix).
    pub fn address(&self) -> Address {
        let encoded = self.0.to_encoded_point(false);
        let digest = keccak256(&encoded.as_bytes()[1..]);
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&digest[12..32]);
        Address(addr)
    }
}

impl Signature {
    fn from_parts(sig: &EcdsaSignature, recid: RecoveryId) -> Self {
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&sig.to_bytes());
        out[64] = recid.to_byte();
        Self(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 65 {
            return Err(CryptoError::InvalidSignature);
        }
        let mut arr = [0u8; 65];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    pub fn to_bytes(&self) -> [u8; 65] {
        self.0
    }

    /// Recover the signer of `message` and compare against `address`.
    ///
    /// Malformed signatures verify false; they never panic.
    pub fn verify(&self, message: &[u8], address: &Address) -> bool {
        match self.recover_signer(message) {
            Some(recovered) => recovered == *address,
            None => false,
        }
    }

    /// Recover the signing address from the message, if the signature
    /// is well-formed.
    pub fn recover_signer(&self, message: &[u8]) -> Option<Address> {
        let sig = EcdsaSignature::from_slice(&self.0[..64]).ok()?;
        let recid = RecoveryId::from_byte(self.0[64])?;
        let digest = keccak256(message);
        let key = VerifyingKey::recover_from_prehash(&digest, &sig, recid).ok()?;
        Some(PublicKey(key).address())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(0x{}...)", hex::encode(&self.0[..8]))
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes: Vec<u8> = Vec::deserialize(deserializer)?;
        Signature::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}
