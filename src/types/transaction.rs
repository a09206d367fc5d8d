//! On-chain transaction family.
//!
//! Transactions are a small closed set modeled as a tagged variant; each
//! executor in the ledger is a function over the variant and a store
//! view. Blocks carry transactions as opaque byte-blobs produced by
//! [`Transaction::encode`].

use crate::crypto::{PrivateKey, Signature};
use crate::types::{keccak256_hash, Address, Coins, Hash};
use serde::{Deserialize, Serialize};

/// A funded transaction input.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TxInput {
    pub address: Address,
    pub coins: Coins,

    /// Account sequence number, incremented per accepted transaction.
    pub sequence: u64,

    pub signature: Option<Signature>,
}

impl TxInput {
    pub fn new(address: Address, coins: Coins, sequence: u64) -> Self {
        Self {
            address,
            coins,
            sequence,
            signature: None,
        }
    }
}

/// A transaction output crediting one account.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: Address,
    pub coins: Coins,
}

/// Coinbase transaction, one per block, emitted by the proposer.
/// At checkpoint heights it carries the reward distribution.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CoinbaseTx {
    pub proposer: Address,
    pub outputs: Vec<TxOutput>,
    pub block_height: u64,
    pub signature: Option<Signature>,
}

/// Standard balance transfer.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SendTx {
    pub fee: Coins,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

/// Smart-contract invocation; execution semantics live behind the VM seam.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SmartContractTx {
    pub from: TxInput,

    /// None deploys a new contract.
    pub to: Option<Address>,

    pub value: Coins,
    pub gas_limit: u64,

    /// SPAY wei per gas unit.
    pub gas_price: u128,

    pub data: Vec<u8>,
}

/// License item tags admitted on-chain.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum LicenseType {
    /// "VN": admissible as a validator.
    Validator,
    /// "LN": admissible as a lightning.
    Lightning,
}

impl LicenseType {
    pub fn tag(&self) -> &'static str {
        match self {
            LicenseType::Validator => "VN",
            LicenseType::Lightning => "LN",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "VN" => Some(LicenseType::Validator),
            "LN" | "LN-L" => Some(LicenseType::Lightning),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum LicenseOp {
    Authorize,
    Revoke,
}

/// Mutates the license gate. The signature must verify against the
/// configured trusted license issuer.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LicenseTx {
    /// The address being licensed or revoked.
    pub address: Address,
    pub license_type: LicenseType,
    pub op: LicenseOp,
    pub signature: Option<Signature>,
}

/// Registers (or clears, with basis point zero) a holder's reward split.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RewardDistributionTx {
    pub holder: TxInput,
    pub beneficiary: Address,
    pub split_basis_point: u16,
    pub fee: Coins,
}

/// The closed transaction family carried on-chain.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Transaction {
    Coinbase(CoinbaseTx),
    Send(SendTx),
    SmartContract(SmartContractTx),
    License(LicenseTx),
    RewardDistribution(RewardDistributionTx),
}

impl Transaction {
    /// Canonical wire encoding; blocks carry these bytes verbatim.
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("transaction serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Option<Transaction> {
        bincode::deserialize(bytes).ok()
    }

    /// Transaction identity: Keccak-256 over the canonical encoding.
    pub fn hash(&self) -> Hash {
        keccak256_hash(&self.encode())
    }

    /// Signed payload: the transaction with every signature cleared.
    pub fn sign_bytes(&self, chain_id: &str) -> Vec<u8> {
        let mut cleared = self.clone();
        match &mut cleared {
            Transaction::Coinbase(tx) => tx.signature = None,
            Transaction::Send(tx) => {
                for input in &mut tx.inputs {
                    input.signature = None;
                }
            }
            Transaction::SmartContract(tx) => tx.from.signature = None,
            Transaction::License(tx) => tx.signature = None,
            Transaction::RewardDistribution(tx) => tx.holder.signature = None,
        }
        let mut payload = chain_id.as_bytes().to_vec();
        payload.extend_from_slice(&cleared.encode());
        payload
    }
}

impl CoinbaseTx {
    pub fn new(proposer: Address, outputs: Vec<TxOutput>, block_height: u64) -> Self {
        Self {
            proposer,
            outputs,
            block_height,
            signature: None,
        }
    }

    pub fn sign(&mut self, chain_id: &str, key: &PrivateKey) {
        let bytes = Transaction::Coinbase(self.clone()).sign_bytes(chain_id);
        self.signature = Some(key.sign(&bytes));
    }

    pub fn validate_signature(&self, chain_id: &str) -> bool {
        match &self.signature {
            Some(sig) => {
                let bytes = Transaction::Coinbase(self.clone()).sign_bytes(chain_id);
                sig.verify(&bytes, &self.proposer)
            }
            None => false,
        }
    }
}

impl LicenseTx {
    pub fn sign(&mut self, chain_id: &str, key: &PrivateKey) {
        let bytes = Transaction::License(self.clone()).sign_bytes(chain_id);
        self.signature = Some(key.sign(&bytes));
    }

    /// The license issuer is fixed by configuration, not carried in the tx.
    pub fn validate_signature(&self, chain_id: &str, issuer: &Address) -> bool {
        match &self.signature {
            Some(sig) => {
                let bytes = Transaction::License(self.clone()).sign_bytes(chain_id);
                sig.verify(&bytes, issuer)
            }
            None => false,
        }
    }
}
