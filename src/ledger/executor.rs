//! Transaction execution.
//!
//! Every executor is a pure function over the transaction variant and a
//! store view. The EVM is a black-box state transition behind the [`Vm`]
//! seam; consensus only cares that it is deterministic.

use crate::errors::CoreError;
use crate::ledger::coinbase;
use crate::ledger::license::LicenseGate;
use crate::storage::store_view::StoreView;
use crate::types::address_set::AddressSet;
use crate::types::stake::MAX_SPLIT_BASIS_POINT;
use crate::types::transaction::{
    RewardDistributionTx, SendTx, SmartContractTx, Transaction, TxInput,
};
use crate::types::stake::RewardDistribution;
use crate::types::{Address, Coins, Hash};
use std::sync::Arc;

/// Black-box smart-contract execution over the storage view.
pub trait Vm: Send + Sync {
    fn execute(&self, view: &mut StoreView, tx: &SmartContractTx) -> Result<(), CoreError>;
}

/// Reference VM: moves value, burns the gas budget, touches no code.
pub struct NullVm;

impl Vm for NullVm {
    fn execute(&self, view: &mut StoreView, tx: &SmartContractTx) -> Result<(), CoreError> {
        let gas_budget = Coins::spay(u128::from(tx.gas_limit) * tx.gas_price);
        let charge = tx.value.plus(gas_budget);

        let mut sender = view.get_or_create_account(&tx.from.address);
        sender.balance = sender
            .balance
            .minus(charge)
            .ok_or_else(|| CoreError::Fee("insufficient balance for value plus gas".to_string()))?;
        sender.sequence += 1;
        view.set_account(&tx.from.address, &sender);

        if let Some(to) = tx.to {
            let mut recipient = view.get_or_create_account(&to);
            recipient.balance = recipient.balance.plus(tx.value);
            view.set_account(&to, &recipient);
        }
        Ok(())
    }
}

/// Ordering metadata surfaced to the mempool.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxInfo {
    pub address: Address,
    pub sequence: u64,
    pub effective_gas_price: u128,
}

/// Per-block execution context.
pub struct TxContext<'a> {
    pub block_height: u64,
    pub validators: &'a AddressSet,
    pub lightnings: &'a AddressSet,
}

/// Dispatches sanity checks and state transitions over the closed
/// transaction family.
pub struct Executor {
    chain_id: String,
    checkpoint_interval: u64,
    min_tx_fee_spay_wei: u128,
    license_gate: Arc<LicenseGate>,
    vm: Arc<dyn Vm>,
}

impl Executor {
    pub fn new(
        chain_id: &str,
        checkpoint_interval: u64,
        min_tx_fee_spay_wei: u128,
        license_gate: Arc<LicenseGate>,
        vm: Arc<dyn Vm>,
    ) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            checkpoint_interval,
            min_tx_fee_spay_wei,
            license_gate,
            vm,
        }
    }

    /// Validate a transaction against a view without mutating it.
    pub fn sanity_check(
        &self,
        view: &StoreView,
        tx: &Transaction,
        ctx: &TxContext<'_>,
    ) -> Result<(), CoreError> {
        match tx {
            Transaction::Coinbase(cb) => coinbase::sanity_check_coinbase(
                &self.chain_id,
                view,
                cb,
                ctx.validators,
                ctx.lightnings,
                self.checkpoint_interval,
                ctx.block_height,
            ),
            Transaction::Send(send) => self.sanity_check_send(view, tx, send),
            Transaction::SmartContract(sc) => self.sanity_check_contract(view, tx, sc),
            Transaction::License(license) => {
                if !license
                    .validate_signature(&self.chain_id, &self.license_gate.trusted_issuer())
                {
                    return Err(CoreError::License(
                        "license tx not signed by the trusted issuer".to_string(),
                    ));
                }
                Ok(())
            }
            Transaction::RewardDistribution(rd) => self.sanity_check_reward_rule(view, tx, rd),
        }
    }

    /// Apply a transaction to a working view. Callers are expected to
    /// have run the sanity check against the same view.
    pub fn process(
        &self,
        view: &mut StoreView,
        tx: &Transaction,
        ctx: &TxContext<'_>,
    ) -> Result<Hash, CoreError> {
        self.sanity_check(view, tx, ctx)?;
        match tx {
            Transaction::Coinbase(cb) => coinbase::process_coinbase(view, cb)?,
            Transaction::Send(send) => self.process_send(view, send),
            Transaction::SmartContract(sc) => self.vm.execute(view, sc)?,
            Transaction::License(license) => self.license_gate.apply_tx(license)?,
            Transaction::RewardDistribution(rd) => self.process_reward_rule(view, rd),
        }
        Ok(tx.hash())
    }

    /// Ordering metadata for the mempool.
    pub fn tx_info(&self, tx: &Transaction) -> TxInfo {
        match tx {
            Transaction::Send(send) => {
                let first = send.inputs.first();
                TxInfo {
                    address: first.map(|i| i.address).unwrap_or_default(),
                    sequence: first.map(|i| i.sequence).unwrap_or_default(),
                    effective_gas_price: send.fee.spay_wei,
                }
            }
            Transaction::SmartContract(sc) => TxInfo {
                address: sc.from.address,
                sequence: sc.from.sequence,
                effective_gas_price: sc.gas_price,
            },
            Transaction::RewardDistribution(rd) => TxInfo {
                address: rd.holder.address,
                sequence: rd.holder.sequence,
                effective_gas_price: rd.fee.spay_wei,
            },
            Transaction::Coinbase(_) | Transaction::License(_) => TxInfo {
                address: Address::ZERO,
                sequence: 0,
                effective_gas_price: 0,
            },
        }
    }

    fn check_input(
        &self,
        view: &StoreView,
        tx: &Transaction,
        input: &TxInput,
    ) -> Result<(), CoreError> {
        if input.address.is_empty() {
            return Err(CoreError::validation("input address not specified"));
        }
        let sig = input
            .signature
            .as_ref()
            .ok_or_else(|| CoreError::validation("input is not signed"))?;
        if !sig.verify(&tx.sign_bytes(&self.chain_id), &input.address) {
            return Err(CoreError::validation(format!(
                "input signature verification failed for {}",
                input.address
            )));
        }
        let account = view
            .get_account(&input.address)
            .ok_or_else(|| CoreError::validation(format!("unknown account {}", input.address)))?;
        if input.sequence != account.sequence + 1 {
            return Err(CoreError::validation(format!(
                "sequence mismatch for {}: got {}, want {}",
                input.address,
                input.sequence,
                account.sequence + 1
            )));
        }
        if !account.balance.is_gte(&input.coins) {
            return Err(CoreError::validation(format!(
                "insufficient balance for {}",
                input.address
            )));
        }
        Ok(())
    }

    fn check_fee(&self, fee: &Coins) -> Result<(), CoreError> {
        if fee.scpt_wei != 0 {
            return Err(CoreError::Fee("fees are paid in SPAY only".to_string()));
        }
        if fee.spay_wei < self.min_tx_fee_spay_wei {
            return Err(CoreError::Fee(format!(
                "transaction fee needs to be at least {} SPAYWei",
                self.min_tx_fee_spay_wei
            )));
        }
        Ok(())
    }

    fn sanity_check_send(
        &self,
        view: &StoreView,
        tx: &Transaction,
        send: &SendTx,
    ) -> Result<(), CoreError> {
        if send.inputs.is_empty() {
            return Err(CoreError::validation("send tx without inputs"));
        }
        self.check_fee(&send.fee)?;
        let mut total_in = Coins::ZERO;
        for input in &send.inputs {
            self.check_input(view, tx, input)?;
            total_in = total_in.plus(input.coins);
        }
        let mut total_out = send.fee;
        for output in &send.outputs {
            if output.address.is_empty() {
                return Err(CoreError::validation("output address not specified"));
            }
            total_out = total_out.plus(output.coins);
        }
        if total_in != total_out {
            return Err(CoreError::validation(
                "input total does not equal output total plus fee",
            ));
        }
        Ok(())
    }

    fn process_send(&self, view: &mut StoreView, send: &SendTx) {
        for input in &send.inputs {
            let mut account = view.get_or_create_account(&input.address);
            account.balance = account
                .balance
                .minus(input.coins)
                .expect("balance checked during sanity check");
            account.sequence += 1;
            view.set_account(&input.address, &account);
        }
        for output in &send.outputs {
            let mut account = view.get_or_create_account(&output.address);
            account.balance = account.balance.plus(output.coins);
            view.set_account(&output.address, &account);
        }
    }

    fn sanity_check_contract(
        &self,
        view: &StoreView,
        tx: &Transaction,
        sc: &SmartContractTx,
    ) -> Result<(), CoreError> {
        self.check_input(view, tx, &sc.from)?;
        let gas_budget = Coins::spay(u128::from(sc.gas_limit) * sc.gas_price);
        let account = view.get_or_create_account(&sc.from.address);
        if !account.balance.is_gte(&sc.value.plus(gas_budget)) {
            return Err(CoreError::Fee(
                "insufficient balance for value plus gas budget".to_string(),
            ));
        }
        Ok(())
    }

    fn sanity_check_reward_rule(
        &self,
        view: &StoreView,
        tx: &Transaction,
        rd: &RewardDistributionTx,
    ) -> Result<(), CoreError> {
        if rd.split_basis_point > MAX_SPLIT_BASIS_POINT {
            return Err(CoreError::Stake(format!(
                "only up to 10.00% reward split is allowed (split_basis_point <= {})",
                MAX_SPLIT_BASIS_POINT
            )));
        }
        if rd.beneficiary.is_empty() {
            return Err(CoreError::validation("beneficiary not specified"));
        }
        self.check_fee(&rd.fee)?;
        self.check_input(view, tx, &rd.holder)?;
        Ok(())
    }

    fn process_reward_rule(&self, view: &mut StoreView, rd: &RewardDistributionTx) {
        let mut account = view.get_or_create_account(&rd.holder.address);
        account.balance = account
            .balance
            .minus(rd.fee)
            .expect("fee coverage checked during sanity check");
        account.sequence += 1;
        view.set_account(&rd.holder.address, &account);

        view.set_reward_distribution(&RewardDistribution {
            holder: rd.holder.address,
            beneficiary: rd.beneficiary,
            split_basis_point: rd.split_basis_point,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PrivateKey;
    use crate::storage::store_view::Account;
    use crate::storage::MemDatabase;
    use crate::types::transaction::TxOutput;

    const CHAIN_ID: &str = "meridian-test";
    const MIN_FEE: u128 = 1_000;

    fn make_executor() -> Executor {
        let issuer = PrivateKey::generate();
        Executor::new(
            CHAIN_ID,
            100,
            MIN_FEE,
            Arc::new(LicenseGate::new(CHAIN_ID, issuer.address())),
            Arc::new(NullVm),
        )
    }

    fn funded_view(addr: &Address, spay: u128) -> StoreView {
        let mut view = StoreView::empty(1, Arc::new(MemDatabase::new()));
        view.set_account(
            addr,
            &Account {
                balance: Coins::spay(spay),
                sequence: 0,
            },
        );
        view
    }

    fn signed_send(key: &PrivateKey, amount: u128, fee: u128, to: Address) -> Transaction {
        let mut send = SendTx {
            fee: Coins::spay(fee),
            inputs: vec![TxInput::new(key.address(), Coins::spay(amount + fee), 1)],
            outputs: vec![TxOutput {
                address: to,
                coins: Coins::spay(amount),
            }],
        };
        let sign_bytes = Transaction::Send(send.clone()).sign_bytes(CHAIN_ID);
        send.inputs[0].signature = Some(key.sign(&sign_bytes));
        Transaction::Send(send)
    }

    fn ctx<'a>(validators: &'a AddressSet, lightnings: &'a AddressSet) -> TxContext<'a> {
        TxContext {
            block_height: 2,
            validators,
            lightnings,
        }
    }

    #[test]
    fn test_send_transfers_balance() {
        let key = PrivateKey::generate();
        let to = Address([7; 20]);
        let executor = make_executor();
        let mut view = funded_view(&key.address(), 10_000);

        let validators = AddressSet::new();
        let lightnings = AddressSet::new();
        let tx = signed_send(&key, 5_000, MIN_FEE, to);

        executor
            .process(&mut view, &tx, &ctx(&validators, &lightnings))
            .unwrap();

        assert_eq!(
            view.get_account(&key.address()).unwrap().balance,
            Coins::spay(10_000 - 5_000 - MIN_FEE)
        );
        assert_eq!(view.get_account(&to).unwrap().balance, Coins::spay(5_000));
        assert_eq!(view.get_account(&key.address()).unwrap().sequence, 1);
    }

    #[test]
    fn test_send_rejects_low_fee() {
        let key = PrivateKey::generate();
        let executor = make_executor();
        let view = funded_view(&key.address(), 10_000);
        let validators = AddressSet::new();
        let lightnings = AddressSet::new();

        let tx = signed_send(&key, 1_000, MIN_FEE - 1, Address([7; 20]));
        let err = executor
            .sanity_check(&view, &tx, &ctx(&validators, &lightnings))
            .unwrap_err();
        assert!(matches!(err, CoreError::Fee(_)));
    }

    #[test]
    fn test_send_rejects_wrong_sequence() {
        let key = PrivateKey::generate();
        let executor = make_executor();
        let view = funded_view(&key.address(), 10_000);
        let validators = AddressSet::new();
        let lightnings = AddressSet::new();

        let mut send = SendTx {
            fee: Coins::spay(MIN_FEE),
            inputs: vec![TxInput::new(key.address(), Coins::spay(MIN_FEE), 5)],
            outputs: vec![],
        };
        let sign_bytes = Transaction::Send(send.clone()).sign_bytes(CHAIN_ID);
        send.inputs[0].signature = Some(key.sign(&sign_bytes));

        let err = executor
            .sanity_check(&view, &Transaction::Send(send), &ctx(&validators, &lightnings))
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_send_rejects_unbalanced_totals() {
        let key = PrivateKey::generate();
        let executor = make_executor();
        let view = funded_view(&key.address(), 10_000);
        let validators = AddressSet::new();
        let lightnings = AddressSet::new();

        let mut send = SendTx {
            fee: Coins::spay(MIN_FEE),
            inputs: vec![TxInput::new(key.address(), Coins::spay(5_000), 1)],
            outputs: vec![TxOutput {
                address: Address([7; 20]),
                coins: Coins::spay(1_000),
            }],
        };
        let sign_bytes = Transaction::Send(send.clone()).sign_bytes(CHAIN_ID);
        send.inputs[0].signature = Some(key.sign(&sign_bytes));

        assert!(executor
            .sanity_check(&view, &Transaction::Send(send), &ctx(&validators, &lightnings))
            .is_err());
    }

    #[test]
    fn test_reward_rule_registration() {
        let key = PrivateKey::generate();
        let executor = make_executor();
        let mut view = funded_view(&key.address(), 10_000);
        let validators = AddressSet::new();
        let lightnings = AddressSet::new();

        let mut rd = RewardDistributionTx {
            holder: TxInput::new(key.address(), Coins::ZERO, 1),
            beneficiary: Address([9; 20]),
            split_basis_point: 300,
            fee: Coins::spay(MIN_FEE),
        };
        let sign_bytes = Transaction::RewardDistribution(rd.clone()).sign_bytes(CHAIN_ID);
        rd.holder.signature = Some(key.sign(&sign_bytes));

        executor
            .process(
                &mut view,
                &Transaction::RewardDistribution(rd),
                &ctx(&validators, &lightnings),
            )
            .unwrap();

        let rule = view.get_reward_distribution(&key.address()).unwrap();
        assert_eq!(rule.beneficiary, Address([9; 20]));
        assert_eq!(rule.split_basis_point, 300);
    }

    #[test]
    fn test_reward_rule_rejects_excessive_split() {
        let key = PrivateKey::generate();
        let executor = make_executor();
        let view = funded_view(&key.address(), 10_000);
        let validators = AddressSet::new();
        let lightnings = AddressSet::new();

        let rd = RewardDistributionTx {
            holder: TxInput::new(key.address(), Coins::ZERO, 1),
            beneficiary: Address([9; 20]),
            split_basis_point: MAX_SPLIT_BASIS_POINT + 1,
            fee: Coins::spay(MIN_FEE),
        };

        let err = executor
            .sanity_check(
                &view,
                &Transaction::RewardDistribution(rd),
                &ctx(&validators, &lightnings),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::Stake(_)));
    }

    #[test]
    fn test_contract_charges_gas_budget() {
        let key = PrivateKey::generate();
        let to = Address([7; 20]);
        let executor = make_executor();
        let mut view = funded_view(&key.address(), 1_000_000);
        let validators = AddressSet::new();
        let lightnings = AddressSet::new();

        let mut sc = SmartContractTx {
            from: TxInput::new(key.address(), Coins::ZERO, 1),
            to: Some(to),
            value: Coins::spay(100),
            gas_limit: 1_000,
            gas_price: 2,
            data: vec![],
        };
        let sign_bytes = Transaction::SmartContract(sc.clone()).sign_bytes(CHAIN_ID);
        sc.from.signature = Some(key.sign(&sign_bytes));

        executor
            .process(
                &mut view,
                &Transaction::SmartContract(sc),
                &ctx(&validators, &lightnings),
            )
            .unwrap();

        assert_eq!(
            view.get_account(&key.address()).unwrap().balance,
            Coins::spay(1_000_000 - 100 - 2_000)
        );
        assert_eq!(view.get_account(&to).unwrap().balance, Coins::spay(100));
    }
}
