//! Ledger state key conventions.
//!
//! These byte prefixes are part of the deployed chain state; an
//! implementation must match them byte-for-byte for genesis
//! compatibility.

use crate::types::Address;

/// Key for the chain's textual identifier.
pub fn chain_id_key() -> Vec<u8> {
    b"chainid".to_vec()
}

/// State key for an account record.
pub fn account_key(addr: &Address) -> Vec<u8> {
    let mut key = b"ls/a/".to_vec();
    key.extend_from_slice(addr.as_bytes());
    key
}

/// Prefix shared by all account keys.
pub fn account_key_prefix() -> Vec<u8> {
    b"ls/a/".to_vec()
}

/// State key for the validator address set.
pub fn validators_key() -> Vec<u8> {
    b"ls/validators".to_vec()
}

/// State key for the lightning address set.
pub fn lightnings_key() -> Vec<u8> {
    b"ls/lightnings".to_vec()
}

/// State key for the list of heights carrying validator-set transactions.
pub fn validator_tx_height_list_key() -> Vec<u8> {
    b"ls/vthl".to_vec()
}

/// Prefix of the reward redistribution rule keys.
pub fn reward_distribution_key_prefix() -> Vec<u8> {
    b"ls/srdrs/".to_vec()
}

/// State key for a holder's reward redistribution rule.
pub fn reward_distribution_key(addr: &Address) -> Vec<u8> {
    let mut key = reward_distribution_key_prefix();
    key.extend_from_slice(addr.as_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_prefixes() {
        let addr = Address([0xAB; 20]);

        assert_eq!(chain_id_key(), b"chainid");
        assert_eq!(&account_key(&addr)[..5], b"ls/a/");
        assert_eq!(account_key(&addr).len(), 5 + 20);
        assert_eq!(validators_key(), b"ls/validators");
        assert_eq!(lightnings_key(), b"ls/lightnings");
        assert_eq!(validator_tx_height_list_key(), b"ls/vthl");
        assert_eq!(&reward_distribution_key(&addr)[..9], b"ls/srdrs/");
    }
}
