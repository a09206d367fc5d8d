//! License records and the membership gate.
//!
//! Peer admission and consensus eligibility consult an in-memory pair
//! of address sets, populated at startup from a signed license file and
//! mutated by on-chain license transactions. The gate is passed as an
//! explicit handle to every consumer; all mutation serializes under one
//! read-write lock.

use crate::crypto::{PrivateKey, Signature};
use crate::errors::CoreError;
use crate::types::address_set::AddressSet;
use crate::types::transaction::{LicenseOp, LicenseTx, LicenseType};
use crate::types::Address;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// An authorization record issued off-chain.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct License {
    pub issuer: Address,
    pub licensee: Address,

    /// Validity window, unix seconds, inclusive.
    pub valid_from: u64,
    pub valid_to: u64,

    /// Item tags; "VN" admits a validator, "LN"/"LN-L" a lightning.
    pub items: Vec<String>,

    pub signature: Option<Signature>,
}

impl License {
    pub fn sign_bytes(&self) -> Vec<u8> {
        let mut unsigned = self.clone();
        unsigned.signature = None;
        bincode::serialize(&unsigned).expect("license serialization cannot fail")
    }

    pub fn sign(&mut self, key: &PrivateKey) {
        self.signature = Some(key.sign(&self.sign_bytes()));
    }

    /// Verify issuer identity, signature, and validity window.
    pub fn validate(&self, trusted_issuer: &Address, now: u64) -> bool {
        if self.issuer != *trusted_issuer {
            return false;
        }
        if now < self.valid_from || now > self.valid_to {
            return false;
        }
        match &self.signature {
            Some(sig) => sig.verify(&self.sign_bytes(), &self.issuer),
            None => false,
        }
    }

    /// License types this record grants.
    pub fn granted_types(&self) -> Vec<LicenseType> {
        let mut types: Vec<LicenseType> = self
            .items
            .iter()
            .filter_map(|tag| LicenseType::from_tag(tag))
            .collect();
        types.dedup();
        types
    }
}

#[derive(Default)]
struct GateInner {
    validators: AddressSet,
    lightnings: AddressSet,
}

/// Membership filter over licensed validators and lightnings.
pub struct LicenseGate {
    trusted_issuer: Address,
    chain_id: String,
    inner: RwLock<GateInner>,
}

impl LicenseGate {
    pub fn new(chain_id: &str, trusted_issuer: Address) -> Self {
        Self {
            trusted_issuer,
            chain_id: chain_id.to_string(),
            inner: RwLock::new(GateInner::default()),
        }
    }

    pub fn trusted_issuer(&self) -> Address {
        self.trusted_issuer
    }

    /// Load a JSON license file and admit every valid record.
    /// Returns the number of licenses admitted.
    pub fn load_license_file(&self, path: &Path, now: u64) -> Result<usize, CoreError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CoreError::License(format!("cannot read license file: {e}")))?;
        let licenses: Vec<License> = serde_json::from_str(&raw)
            .map_err(|e| CoreError::License(format!("cannot parse license file: {e}")))?;

        let mut admitted = 0;
        for license in &licenses {
            if !license.validate(&self.trusted_issuer, now) {
                debug!(licensee = %license.licensee, "skipping invalid license");
                continue;
            }
            for license_type in license.granted_types() {
                self.authorize(license.licensee, license_type);
            }
            admitted += 1;
        }
        info!(admitted, total = licenses.len(), "license file loaded");
        Ok(admitted)
    }

    /// Apply an on-chain license transaction. The signature must verify
    /// against the configured trusted issuer.
    pub fn apply_tx(&self, tx: &LicenseTx) -> Result<(), CoreError> {
        if !tx.validate_signature(&self.chain_id, &self.trusted_issuer) {
            return Err(CoreError::License(
                "license tx not signed by the trusted issuer".to_string(),
            ));
        }
        if tx.address.is_empty() {
            return Err(CoreError::License("license tx without address".to_string()));
        }
        match tx.op {
            LicenseOp::Authorize => self.authorize(tx.address, tx.license_type),
            LicenseOp::Revoke => self.revoke(tx.address, tx.license_type),
        }
        Ok(())
    }

    fn authorize(&self, addr: Address, license_type: LicenseType) {
        let mut inner = self.inner.write();
        match license_type {
            LicenseType::Validator => inner.validators.add(addr),
            LicenseType::Lightning => inner.lightnings.add(addr),
        };
    }

    fn revoke(&self, addr: Address, license_type: LicenseType) {
        let mut inner = self.inner.write();
        match license_type {
            LicenseType::Validator => inner.validators.remove(&addr),
            LicenseType::Lightning => inner.lightnings.remove(&addr),
        };
    }

    pub fn is_validator(&self, addr: &Address) -> bool {
        self.inner.read().validators.has(addr)
    }

    pub fn is_lightning(&self, addr: &Address) -> bool {
        self.inner.read().lightnings.has(addr)
    }

    /// Whether the address holds any license at all.
    pub fn has_license_peer(&self, addr: &Address) -> bool {
        let inner = self.inner.read();
        inner.validators.has(addr) || inner.lightnings.has(addr)
    }

    pub fn for_each_validator(&self, mut visitor: impl FnMut(&Address)) {
        for addr in self.inner.read().validators.iter() {
            visitor(addr);
        }
    }

    pub fn for_each_lightning(&self, mut visitor: impl FnMut(&Address)) {
        for addr in self.inner.read().lightnings.iter() {
            visitor(addr);
        }
    }
}
