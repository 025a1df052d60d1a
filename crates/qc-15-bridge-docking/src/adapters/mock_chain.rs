//! Mock External Chain Adapter
//!
//! Implements `ExternalChainRpc` over an in-process chain that simulates the
//! multi-sig custody contract: administrator set, signature threshold,
//! pending proposals, duplicate-signature reverts, failed-receipt injection
//! and a configurable gas price.

use super::mock_signer::MockSignedTx;
use crate::domain::abi;
use crate::domain::contract::{self, custody};
use crate::domain::{
    Address, BridgeTxType, CustodyCall, CustodyEvent, DockingError, DockingResult,
    ExternalBlock, ExternalTransaction, LogEntry, PendingManagerChange, PendingWithdraw, TxHash,
    TxReceipt, UnsignedTx, DUPLICATE_SIGNATURES,
};
use crate::ports::outbound::{CallOutcome, ExternalChainRpc};
use async_trait::async_trait;
use parking_lot::Mutex;
use primitive_types::{H256, U256};
use std::collections::{HashMap, HashSet};
use tracing::debug;

const GENESIS_TIME: u64 = 1_700_000_000;
const BLOCK_TIME: u64 = 12;

struct Proposal {
    call: CustodyCall,
    signers: Vec<Address>,
}

struct ChainState {
    blocks: Vec<ExternalBlock>,
    transactions: HashMap<TxHash, ExternalTransaction>,
    receipts: HashMap<TxHash, TxReceipt>,
    mempool: Vec<ExternalTransaction>,
    auto_mine: bool,
    gas_price: U256,
    gas_estimate: U256,
    managers: Vec<Address>,
    threshold: usize,
    proposals: HashMap<String, Proposal>,
    completed: HashSet<String>,
    fail_custody_receipts: usize,
    forced_revert: Option<String>,
    sent: Vec<UnsignedTx>,
    foreign_nonce: u64,
    fork_salt: u64,
}

fn block_hash(height: u64, parent: &H256, salt: u64) -> H256 {
    let mut preimage = Vec::with_capacity(48);
    preimage.extend_from_slice(&height.to_be_bytes());
    preimage.extend_from_slice(parent.as_bytes());
    preimage.extend_from_slice(&salt.to_be_bytes());
    abi::keccak256(&preimage)
}

impl ChainState {
    fn tip(&self) -> u64 {
        self.blocks.len().saturating_sub(1) as u64
    }

    fn check_call(&self, from: &Address, call: &CustodyCall) -> Result<(), String> {
        if !self.managers.contains(from) {
            return Err("Not a manager".to_string());
        }
        let key = call.tx_key();
        if self.completed.contains(key) {
            return Err("Transaction already completed".to_string());
        }
        if let Some(proposal) = self.proposals.get(key) {
            if proposal.call != *call {
                return Err("Proposal mismatch".to_string());
            }
            if proposal.signers.contains(from) {
                return Err(DUPLICATE_SIGNATURES.to_string());
            }
        }
        Ok(())
    }

    fn apply_call(
        &mut self,
        custody: Address,
        from: Address,
        call: CustodyCall,
    ) -> Result<Vec<LogEntry>, String> {
        self.check_call(&from, &call)?;
        let key = call.tx_key().to_string();
        let threshold = self.threshold;
        let proposal = self.proposals.entry(key.clone()).or_insert(Proposal {
            call,
            signers: Vec::new(),
        });
        proposal.signers.push(from);
        if proposal.signers.len() < threshold {
            return Ok(Vec::new());
        }

        let Some(done) = self.proposals.remove(&key) else {
            return Ok(Vec::new());
        };
        let tx_type = match &done.call {
            CustodyCall::Withdraw(_) => BridgeTxType::Withdraw,
            CustodyCall::ManagerChange(change) => {
                self.managers.retain(|m| !change.removes.contains(m));
                for add in &change.adds {
                    if !self.managers.contains(add) {
                        self.managers.push(*add);
                    }
                }
                BridgeTxType::ManagerChange
            }
            CustodyCall::Upgrade(_) => BridgeTxType::Upgrade,
        };
        self.completed.insert(key.clone());
        debug!("[qc-15] Mock custody completed {} {}", tx_type, key);
        Ok(vec![CustodyEvent::Completed {
            tx_type,
            tx_key: key,
            signers: done.signers,
        }
        .to_log(custody)])
    }

    fn execute(&mut self, custody: Address, tx: &ExternalTransaction) -> (bool, Vec<LogEntry>) {
        if tx.to != Some(custody) {
            return (true, Vec::new());
        }
        if tx.input.is_empty() {
            if tx.value.is_zero() {
                return (false, Vec::new());
            }
            let event = CustodyEvent::DepositFunds {
                from: tx.from,
                amount: tx.value,
            };
            return (true, vec![event.to_log(custody)]);
        }
        if self.fail_custody_receipts > 0 {
            self.fail_custody_receipts -= 1;
            return (false, Vec::new());
        }
        match CustodyCall::decode(&tx.input) {
            Ok(call) => match self.apply_call(custody, tx.from, call) {
                Ok(logs) => (true, logs),
                Err(_) => (false, Vec::new()),
            },
            Err(_) => (false, Vec::new()),
        }
    }

    fn seal(&mut self, mut transactions: Vec<ExternalTransaction>, salt: u64) -> u64 {
        let height = self.blocks.len() as u64;
        let parent_hash = self.blocks.last().map(|b| b.hash).unwrap_or_default();
        for tx in &mut transactions {
            tx.block_number = Some(height);
            self.transactions.insert(tx.hash, tx.clone());
        }
        self.blocks.push(ExternalBlock {
            height,
            hash: block_hash(height, &parent_hash, salt),
            parent_hash,
            timestamp: GENESIS_TIME + height * BLOCK_TIME,
            transactions,
        });
        height
    }

    fn mine(&mut self, custody: Address) -> u64 {
        let pending = std::mem::take(&mut self.mempool);
        let height = self.blocks.len() as u64;
        for tx in &pending {
            let (success, logs) = self.execute(custody, tx);
            self.receipts.insert(
                tx.hash,
                TxReceipt {
                    hash: tx.hash,
                    success,
                    block_number: height,
                    gas_used: U256::from(21_000),
                    logs,
                },
            );
        }
        let salt = self.fork_salt;
        self.seal(pending, salt)
    }

    fn next_foreign_hash(&mut self) -> TxHash {
        self.foreign_nonce += 1;
        let mut preimage = b"foreign".to_vec();
        preimage.extend_from_slice(&self.foreign_nonce.to_be_bytes());
        abi::keccak256(&preimage)
    }
}

/// In-process external chain with a simulated custody contract.
pub struct MockExternalChain {
    custody: Address,
    state: Mutex<ChainState>,
}

impl MockExternalChain {
    /// Chain whose custody contract at `custody` is administered by
    /// `managers` with the given signature threshold. Starts with a genesis
    /// block at height 0 and auto-mining enabled.
    pub fn new(custody: Address, managers: Vec<Address>, threshold: usize) -> Self {
        let mut state = ChainState {
            blocks: Vec::new(),
            transactions: HashMap::new(),
            receipts: HashMap::new(),
            mempool: Vec::new(),
            auto_mine: true,
            gas_price: U256::from(20_000_000_000u64),
            gas_estimate: U256::from(80_000),
            managers,
            threshold,
            proposals: HashMap::new(),
            completed: HashSet::new(),
            fail_custody_receipts: 0,
            forced_revert: None,
            sent: Vec::new(),
            foreign_nonce: 0,
            fork_salt: 0,
        };
        state.seal(Vec::new(), 0);
        Self {
            custody,
            state: Mutex::new(state),
        }
    }

    /// Custody contract address.
    pub fn custody(&self) -> Address {
        self.custody
    }

    /// Mine every broadcast transaction on arrival (default) or hold them.
    pub fn set_auto_mine(&self, auto_mine: bool) {
        self.state.lock().auto_mine = auto_mine;
    }

    /// Set the current gas price.
    pub fn set_gas_price(&self, price: U256) {
        self.state.lock().gas_price = price;
    }

    /// Set the value returned by `estimate_gas`.
    pub fn set_gas_estimate(&self, estimate: U256) {
        self.state.lock().gas_estimate = estimate;
    }

    /// Fail the receipts of the next `n` custody calls.
    pub fn fail_next_custody_receipts(&self, n: usize) {
        self.state.lock().fail_custody_receipts = n;
    }

    /// Make every mutating dry-run revert with `reason`.
    pub fn force_revert(&self, reason: Option<&str>) {
        self.state.lock().forced_revert = reason.map(str::to_string);
    }

    /// Mine the mempool into a new block and return its height.
    pub fn mine_block(&self) -> u64 {
        let mut state = self.state.lock();
        state.mine(self.custody)
    }

    /// Mine `n` empty blocks.
    pub fn mine_empty_blocks(&self, n: u64) {
        let mut state = self.state.lock();
        for _ in 0..n {
            state.mine(self.custody);
        }
    }

    /// Replace the tip block with a sibling carrying the same transactions
    /// but a different hash.
    pub fn fork_tip(&self) {
        let mut state = self.state.lock();
        if state.blocks.len() < 2 {
            return;
        }
        if let Some(tip) = state.blocks.pop() {
            state.fork_salt += 1;
            let salt = state.fork_salt;
            state.seal(tip.transactions, salt);
        }
    }

    /// Transactions broadcast through `send_raw_transaction`.
    pub fn sent_transactions(&self) -> Vec<UnsignedTx> {
        self.state.lock().sent.clone()
    }

    /// Number of broadcasts from `from`.
    pub fn sent_count_from(&self, from: Address) -> usize {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|tx| tx.from == from)
            .count()
    }

    /// Current administrator set.
    pub fn managers(&self) -> Vec<Address> {
        self.state.lock().managers.clone()
    }

    /// Check if the custody contract marked `tx_key` completed.
    pub fn is_completed(&self, tx_key: &str) -> bool {
        self.state.lock().completed.contains(tx_key)
    }

    fn push_foreign(
        &self,
        from: Address,
        to: Address,
        value: U256,
        input: Vec<u8>,
    ) -> TxHash {
        let mut state = self.state.lock();
        let hash = state.next_foreign_hash();
        state.mempool.push(ExternalTransaction {
            hash,
            from,
            to: Some(to),
            value,
            input,
            block_number: None,
        });
        if state.auto_mine {
            state.mine(self.custody);
        }
        hash
    }

    /// Another administrator co-signs `call` from `from`.
    pub fn co_sign(&self, from: Address, call: &CustodyCall) -> TxHash {
        self.push_foreign(from, self.custody, U256::zero(), call.encode())
    }

    /// Native deposit into the custody contract (emits `DepositFunds`).
    pub fn deposit_native(&self, from: Address, value: U256) -> TxHash {
        self.push_foreign(from, self.custody, value, Vec::new())
    }

    /// Mined transaction into the custody contract with a chosen receipt,
    /// bypassing contract execution.
    pub fn push_mined(
        &self,
        from: Address,
        to: Address,
        value: U256,
        input: Vec<u8>,
        logs: Vec<LogEntry>,
    ) -> TxHash {
        let mut state = self.state.lock();
        let hash = state.next_foreign_hash();
        let height = state.blocks.len() as u64;
        state.receipts.insert(
            hash,
            TxReceipt {
                hash,
                success: true,
                block_number: height,
                gas_used: U256::from(21_000),
                logs,
            },
        );
        let tx = ExternalTransaction {
            hash,
            from,
            to: Some(to),
            value,
            input,
            block_number: None,
        };
        let salt = state.fork_salt;
        state.seal(vec![tx], salt);
        hash
    }

    /// ERC-20 transfer of `value` on `token` from `from` to `recipient`.
    pub fn transfer_token(
        &self,
        token: Address,
        from: Address,
        recipient: Address,
        value: U256,
    ) -> TxHash {
        let input = contract::encode_erc20_transfer(recipient, value);
        let log = CustodyEvent::Transfer {
            from,
            to: recipient,
            value,
        }
        .to_log(token);
        self.push_mined(from, token, U256::zero(), input, vec![log])
    }

    fn view(&self, data: &[u8]) -> DockingResult<CallOutcome> {
        let state = self.state.lock();

        if abi::has_selector(&custody::IS_COMPLETED_TX, data) {
            let key = contract::decode_key_view(&custody::IS_COMPLETED_TX, data)?;
            return Ok(CallOutcome::Success(contract::encode_bool_return(
                state.completed.contains(&key),
            )));
        }
        if abi::has_selector(&custody::PENDING_WITHDRAW_TX, data) {
            let key = contract::decode_key_view(&custody::PENDING_WITHDRAW_TX, data)?;
            let pending = match state.proposals.get(&key).map(|p| &p.call) {
                Some(CustodyCall::Withdraw(c)) => Some(PendingWithdraw {
                    to: c.to,
                    amount: c.amount,
                    erc20: c.erc20,
                }),
                _ => None,
            };
            return Ok(CallOutcome::Success(PendingWithdraw::encode_return(
                pending.as_ref(),
            )));
        }
        if abi::has_selector(&custody::PENDING_MANAGER_CHANGE_TX, data) {
            let key = contract::decode_key_view(&custody::PENDING_MANAGER_CHANGE_TX, data)?;
            let pending = match state.proposals.get(&key).map(|p| &p.call) {
                Some(CustodyCall::ManagerChange(c)) => Some(PendingManagerChange {
                    adds: c.adds.clone(),
                    removes: c.removes.clone(),
                    count: c.count,
                }),
                _ => None,
            };
            return Ok(CallOutcome::Success(PendingManagerChange::encode_return(
                pending.as_ref(),
            )));
        }
        if abi::has_selector(&custody::ALL_MANAGERS, data) {
            return Ok(CallOutcome::Success(contract::encode_managers_return(
                &state.managers,
            )));
        }
        Ok(CallOutcome::Revert(Vec::new()))
    }

    fn dry_run(&self, from: Address, data: &[u8]) -> CallOutcome {
        let state = self.state.lock();
        if let Some(reason) = &state.forced_revert {
            return CallOutcome::Revert(abi::encode_revert_reason(reason));
        }
        let call = match CustodyCall::decode(data) {
            Ok(call) => call,
            Err(_) => return CallOutcome::Revert(Vec::new()),
        };
        match state.check_call(&from, &call) {
            Ok(()) => CallOutcome::Success(Vec::new()),
            Err(reason) => CallOutcome::Revert(abi::encode_revert_reason(&reason)),
        }
    }
}

#[async_trait]
impl ExternalChainRpc for MockExternalChain {
    async fn block_number(&self) -> DockingResult<u64> {
        Ok(self.state.lock().tip())
    }

    async fn get_block(&self, height: u64) -> DockingResult<Option<ExternalBlock>> {
        Ok(self.state.lock().blocks.get(height as usize).cloned())
    }

    async fn get_transaction(&self, hash: TxHash) -> DockingResult<Option<ExternalTransaction>> {
        let state = self.state.lock();
        Ok(state
            .transactions
            .get(&hash)
            .or_else(|| state.mempool.iter().find(|tx| tx.hash == hash))
            .cloned())
    }

    async fn get_receipt(&self, hash: TxHash) -> DockingResult<Option<TxReceipt>> {
        Ok(self.state.lock().receipts.get(&hash).cloned())
    }

    async fn gas_price(&self) -> DockingResult<U256> {
        Ok(self.state.lock().gas_price)
    }

    async fn call(&self, from: Address, to: Address, data: &[u8]) -> DockingResult<CallOutcome> {
        if to != self.custody {
            return Ok(CallOutcome::Success(Vec::new()));
        }
        if CustodyCall::category(data).is_some() {
            return Ok(self.dry_run(from, data));
        }
        self.view(data)
    }

    async fn estimate_gas(&self, _from: Address, _to: Address, _data: &[u8]) -> DockingResult<U256> {
        Ok(self.state.lock().gas_estimate)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> DockingResult<TxHash> {
        let signed = MockSignedTx::decode(raw)?;
        let hash = abi::keccak256(raw);
        let mut state = self.state.lock();
        state.sent.push(signed.tx.clone());
        state.mempool.push(ExternalTransaction {
            hash,
            from: signed.tx.from,
            to: Some(signed.tx.to),
            value: signed.tx.value,
            input: signed.tx.data,
            block_number: None,
        });
        if state.auto_mine {
            state.mine(self.custody);
        }
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ContractFunction, UpgradeCall};

    fn addr(b: u8) -> Address {
        Address::repeat_byte(b)
    }

    fn create_test_chain() -> MockExternalChain {
        MockExternalChain::new(addr(0xCC), vec![addr(1), addr(2), addr(3)], 2)
    }

    fn upgrade(key: &str) -> CustodyCall {
        CustodyCall::Upgrade(UpgradeCall {
            tx_key: key.to_string(),
        })
    }

    #[tokio::test]
    async fn test_threshold_completes_proposal() {
        let chain = create_test_chain();
        chain.co_sign(addr(1), &upgrade("u1"));
        assert!(!chain.is_completed("u1"));
        let hash = chain.co_sign(addr(2), &upgrade("u1"));
        assert!(chain.is_completed("u1"));

        let receipt = chain.get_receipt(hash).await.unwrap().unwrap();
        assert!(receipt.success);
        let event = CustodyEvent::decode(&receipt.logs[0]).unwrap().unwrap();
        assert!(matches!(event, CustodyEvent::Completed { ref signers, .. } if signers.len() == 2));
    }

    #[tokio::test]
    async fn test_duplicate_signature_dry_run() {
        let chain = create_test_chain();
        chain.co_sign(addr(1), &upgrade("u2"));
        let data = UpgradeCall {
            tx_key: "u2".to_string(),
        }
        .encode();
        let outcome = chain.call(addr(1), addr(0xCC), &data).await.unwrap();
        assert_eq!(outcome.revert_reason().as_deref(), Some(DUPLICATE_SIGNATURES));
    }

    #[tokio::test]
    async fn test_blocks_link_and_fork() {
        let chain = create_test_chain();
        chain.mine_empty_blocks(2);
        let before = chain.get_block(2).await.unwrap().unwrap();
        assert_eq!(before.parent_hash, chain.get_block(1).await.unwrap().unwrap().hash);

        chain.fork_tip();
        let after = chain.get_block(2).await.unwrap().unwrap();
        assert_ne!(before.hash, after.hash);
        assert_eq!(before.parent_hash, after.parent_hash);
    }

    #[tokio::test]
    async fn test_native_deposit_emits_event() {
        let chain = create_test_chain();
        let hash = chain.deposit_native(addr(9), U256::from(5));
        let receipt = chain.get_receipt(hash).await.unwrap().unwrap();
        assert_eq!(
            CustodyEvent::decode(&receipt.logs[0]).unwrap(),
            Some(CustodyEvent::DepositFunds {
                from: addr(9),
                amount: U256::from(5)
            })
        );
    }
}
