//! # Transaction Classifier & Parser
//!
//! Turns raw external transactions and receipts into typed bridge events.

use super::asset_registry::AssetRegistry;
use super::context::ChainContext;
use crate::domain::{
    Address, AssetDescriptor, BridgeTxType, CustodyCall, CustodyEvent, DockingError,
    DockingResult, ExternalTransaction, RecoveryPhase, TransferInfo, TxCategory, TxReceipt,
};
use primitive_types::U256;
use std::sync::Arc;

/// Custody broadcast decoded from a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BroadcastTx {
    /// Action kind (manager changes on recovery keys are `Recovery`).
    pub tx_type: BridgeTxType,
    /// Home-chain action id.
    pub internal_id: String,
    /// Decoded call.
    pub call: CustodyCall,
    /// Receipt present and successful.
    pub succeeded: bool,
    /// Signers, once the receipt carries the completion event for this key.
    pub completed_signers: Option<Vec<Address>>,
}

/// Bridge-relevant transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsedTx {
    /// Co-sign of an outbound action.
    Broadcast(BroadcastTx),
    /// Inbound deposit into a custody contract.
    Deposit(TransferInfo),
}

/// Classifier for one external chain.
pub struct TxClassifier {
    ctx: Arc<ChainContext>,
    assets: Arc<AssetRegistry>,
}

fn custody_events<'a>(
    receipt: Option<&'a TxReceipt>,
    emitter: Address,
) -> impl Iterator<Item = CustodyEvent> + 'a {
    receipt
        .filter(|r| r.success)
        .into_iter()
        .flat_map(|r| r.logs.iter())
        .filter(move |log| log.address == emitter)
        .filter_map(|log| CustodyEvent::decode(log).ok().flatten())
}

impl TxClassifier {
    /// Create a classifier.
    pub fn new(ctx: Arc<ChainContext>, assets: Arc<AssetRegistry>) -> Self {
        Self { ctx, assets }
    }

    /// Assign a category to `tx`.
    pub fn classify(
        &self,
        tx: &ExternalTransaction,
        receipt: Option<&TxReceipt>,
    ) -> DockingResult<TxCategory> {
        let Some(to) = tx.to else {
            return Ok(TxCategory::Irrelevant);
        };

        if self.ctx.is_listened(&to) {
            if tx.input.is_empty() {
                let deposit_confirmed = !tx.value.is_zero()
                    && custody_events(receipt, to).any(|event| {
                        event
                            == CustodyEvent::DepositFunds {
                                from: tx.from,
                                amount: tx.value,
                            }
                    });
                return Ok(if deposit_confirmed {
                    TxCategory::NativeDeposit
                } else {
                    TxCategory::Irrelevant
                });
            }
            return Ok(CustodyCall::category(&tx.input).unwrap_or(TxCategory::Irrelevant));
        }

        if self.assets.is_token(&to)? && self.token_transfer(to, receipt).is_some() {
            return Ok(TxCategory::TokenDeposit);
        }
        Ok(TxCategory::Irrelevant)
    }

    fn token_transfer(
        &self,
        token: Address,
        receipt: Option<&TxReceipt>,
    ) -> Option<(Address, Address, U256)> {
        custody_events(receipt, token).find_map(|event| match event {
            CustodyEvent::Transfer { from, to, value }
                if !value.is_zero() && self.ctx.is_listened(&to) =>
            {
                Some((from, to, value))
            }
            _ => None,
        })
    }

    /// Classify and decode `tx`. `Ok(None)` for irrelevant transactions;
    /// `Err` for a known selector with malformed call-data.
    pub fn parse(
        &self,
        tx: &ExternalTransaction,
        receipt: Option<&TxReceipt>,
    ) -> DockingResult<Option<ParsedTx>> {
        let category = self.classify(tx, receipt)?;
        let to = tx.to.unwrap_or_default();

        match category {
            TxCategory::Irrelevant => Ok(None),
            TxCategory::NativeDeposit => Ok(Some(ParsedTx::Deposit(TransferInfo {
                from: tx.from,
                to,
                amount: tx.value,
                asset: AssetDescriptor::native(self.ctx.chain_id(), self.ctx.native_asset_id()),
            }))),
            TxCategory::TokenDeposit => {
                let Some((from, custody, value)) = self.token_transfer(to, receipt) else {
                    return Ok(None);
                };
                let asset = self.assets.load_by_contract(&to)?.ok_or_else(|| {
                    DockingError::validation(format!("token {:?} not registered", to))
                })?;
                Ok(Some(ParsedTx::Deposit(TransferInfo {
                    from,
                    to: custody,
                    amount: value,
                    asset,
                })))
            }
            TxCategory::BroadcastWithdraw
            | TxCategory::BroadcastManagerChange
            | TxCategory::BroadcastUpgrade => {
                let call = CustodyCall::decode(&tx.input)?;
                let key = call.tx_key().to_string();
                let (tx_type, internal_id) = match &call {
                    CustodyCall::Withdraw(_) => (BridgeTxType::Withdraw, key.clone()),
                    CustodyCall::ManagerChange(_) => match RecoveryPhase::parse_key(&key) {
                        Some((id, _)) => (BridgeTxType::Recovery, id.to_string()),
                        None => (BridgeTxType::ManagerChange, key.clone()),
                    },
                    CustodyCall::Upgrade(_) => (BridgeTxType::Upgrade, key.clone()),
                };
                let completed_signers = custody_events(receipt, to).find_map(|event| match event {
                    CustodyEvent::Completed {
                        tx_key, signers, ..
                    } if tx_key == key => Some(signers),
                    _ => None,
                });
                Ok(Some(ParsedTx::Broadcast(BroadcastTx {
                    tx_type,
                    internal_id,
                    call,
                    succeeded: receipt.map(|r| r.success).unwrap_or(false),
                    completed_signers,
                })))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryAssetStore;
    use crate::domain::{AssetRegistration, ContractFunction, LogEntry, TxHash, WithdrawCall};

    const CUSTODY: u8 = 0xCC;
    const TOKEN: u8 = 0x70;

    fn addr(b: u8) -> Address {
        Address::repeat_byte(b)
    }

    fn create_test_classifier() -> TxClassifier {
        let ctx = Arc::new(ChainContext::new(101, addr(1), addr(CUSTODY), 1, 2));
        let assets = Arc::new(AssetRegistry::new(
            ctx.clone(),
            Arc::new(InMemoryAssetStore::with_max_asset_id(1)),
        ));
        assets
            .register(&[AssetRegistration {
                contract: addr(TOKEN),
                symbol: "USDX".to_string(),
                decimals: 6,
            }])
            .unwrap();
        TxClassifier::new(ctx, assets)
    }

    fn tx(to: u8, value: u64, input: Vec<u8>) -> ExternalTransaction {
        ExternalTransaction {
            hash: TxHash::repeat_byte(0x11),
            from: addr(9),
            to: Some(addr(to)),
            value: U256::from(value),
            input,
            block_number: Some(5),
        }
    }

    fn receipt(logs: Vec<LogEntry>) -> TxReceipt {
        TxReceipt {
            hash: TxHash::repeat_byte(0x11),
            success: true,
            block_number: 5,
            gas_used: U256::from(21_000),
            logs,
        }
    }

    #[test]
    fn test_native_deposit_requires_event() {
        let classifier = create_test_classifier();
        let deposit = tx(CUSTODY, 500, vec![]);

        let spoof = receipt(vec![]);
        assert_eq!(
            classifier.classify(&deposit, Some(&spoof)).unwrap(),
            TxCategory::Irrelevant
        );

        let real = receipt(vec![CustodyEvent::DepositFunds {
            from: addr(9),
            amount: U256::from(500),
        }
        .to_log(addr(CUSTODY))]);
        assert_eq!(
            classifier.classify(&deposit, Some(&real)).unwrap(),
            TxCategory::NativeDeposit
        );
    }

    #[test]
    fn test_native_deposit_amount_mismatch() {
        let classifier = create_test_classifier();
        let wrong = receipt(vec![CustodyEvent::DepositFunds {
            from: addr(9),
            amount: U256::from(1),
        }
        .to_log(addr(CUSTODY))]);
        assert_eq!(
            classifier.classify(&tx(CUSTODY, 500, vec![]), Some(&wrong)).unwrap(),
            TxCategory::Irrelevant
        );
    }

    #[test]
    fn test_token_deposit() {
        let classifier = create_test_classifier();
        let log = CustodyEvent::Transfer {
            from: addr(9),
            to: addr(CUSTODY),
            value: U256::from(77),
        }
        .to_log(addr(TOKEN));
        let parsed = classifier
            .parse(&tx(TOKEN, 0, vec![0xa9, 0x05, 0x9c, 0xbb]), Some(&receipt(vec![log])))
            .unwrap();
        match parsed {
            Some(ParsedTx::Deposit(info)) => {
                assert_eq!(info.amount, U256::from(77));
                assert_eq!(info.asset.asset_id, 2);
                assert_eq!(info.to, addr(CUSTODY));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_token_transfer_elsewhere_irrelevant() {
        let classifier = create_test_classifier();
        let log = CustodyEvent::Transfer {
            from: addr(9),
            to: addr(0x55),
            value: U256::from(77),
        }
        .to_log(addr(TOKEN));
        assert_eq!(
            classifier.classify(&tx(TOKEN, 0, vec![1, 2, 3, 4]), Some(&receipt(vec![log]))).unwrap(),
            TxCategory::Irrelevant
        );
    }

    #[test]
    fn test_short_and_unknown_selector() {
        let classifier = create_test_classifier();
        assert_eq!(
            classifier.classify(&tx(CUSTODY, 0, vec![1, 2]), None).unwrap(),
            TxCategory::Irrelevant
        );
        assert_eq!(
            classifier.classify(&tx(CUSTODY, 0, vec![1, 2, 3, 4, 5]), None).unwrap(),
            TxCategory::Irrelevant
        );
    }

    #[test]
    fn test_broadcast_without_receipt_not_succeeded() {
        let classifier = create_test_classifier();
        let input = WithdrawCall {
            tx_key: "a1".to_string(),
            to: addr(3),
            amount: U256::from(10),
            erc20: None,
        }
        .encode();
        match classifier.parse(&tx(CUSTODY, 0, input), None).unwrap() {
            Some(ParsedTx::Broadcast(b)) => {
                assert_eq!(b.tx_type, BridgeTxType::Withdraw);
                assert!(!b.succeeded);
                assert!(b.completed_signers.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_malformed_broadcast_is_error() {
        let classifier = create_test_classifier();
        let mut input = WithdrawCall {
            tx_key: "a1".to_string(),
            to: addr(3),
            amount: U256::from(10),
            erc20: None,
        }
        .encode();
        input.truncate(40);
        assert!(classifier.parse(&tx(CUSTODY, 0, input), None).is_err());
    }
}
