//! End-to-end docking flows: several signer nodes sharing one in-process
//! external chain.

use primitive_types::U256;
use qc_15_bridge_docking::adapters::{
    FailingAssetStore, InMemoryAssetStore, InMemoryBlockHeaderStore, InMemoryPendingStore,
    InMemoryTxRelationStore, MockExternalChain, MockSigner, RecordingCallback, StaticSignerSet,
};
use qc_15_bridge_docking::domain::{ContractFunction, WithdrawCall};
use qc_15_bridge_docking::{
    compute_order, Address, AssetRegistration, AssetStore, BridgeDockingApi, BridgeDockingNode,
    BridgeTxType, ChainContext, CustodyCall, DockingCollaborators, DockingConfig, DockingError,
    DockingOutcome, DockingRegistry, PendingStatus, SkipReason, TrackerEvent,
};
use std::sync::Arc;
use std::time::Duration;

const CHAIN_ID: u16 = 101;
const CUSTODY: u8 = 0xCC;
const NATIVE_ASSET: u32 = 1;

fn addr(b: u8) -> Address {
    Address::repeat_byte(b)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct TestNode {
    node: Arc<BridgeDockingNode>,
    callback: Arc<RecordingCallback>,
}

struct NodeOptions {
    bank: Vec<Address>,
    gas_price_ceiling: U256,
    asset_store: Arc<dyn AssetStore>,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            bank: vec![addr(1), addr(2), addr(3)],
            gas_price_ceiling: U256::zero(),
            asset_store: Arc::new(InMemoryAssetStore::with_max_asset_id(NATIVE_ASSET)),
        }
    }
}

/// Give spawned resubmissions time to finish their turn checks.
async fn settle_resends(n: &TestNode) {
    tokio::time::sleep(n.node.config().turn_interval() * 5).await;
}

fn create_test_chain(managers: Vec<Address>) -> Arc<MockExternalChain> {
    Arc::new(MockExternalChain::new(addr(CUSTODY), managers, 2))
}

fn create_test_node(chain: &Arc<MockExternalChain>, me: u8, options: NodeOptions) -> TestNode {
    let ctx = Arc::new(
        ChainContext::new(CHAIN_ID, addr(me), addr(CUSTODY), NATIVE_ASSET, 2)
            .with_gas_price_ceiling(options.gas_price_ceiling),
    );
    let callback = Arc::new(RecordingCallback::new());
    let node = BridgeDockingNode::new(
        ctx,
        DockingConfig::for_testing(),
        DockingCollaborators {
            rpc: chain.clone(),
            signer: Arc::new(MockSigner::new(addr(me))),
            signer_set: Arc::new(StaticSignerSet::new(options.bank)),
            callback: callback.clone(),
            pending_store: Arc::new(InMemoryPendingStore::new()),
            asset_store: options.asset_store,
            header_store: Arc::new(InMemoryBlockHeaderStore::new()),
            relation_store: Arc::new(InMemoryTxRelationStore::new()),
        },
    )
    .expect("node wiring");
    TestNode {
        node: Arc::new(node),
        callback,
    }
}

// =============================================================================
// Outbound co-signing
// =============================================================================

#[test]
fn test_worked_signer_order_example() {
    let order = compute_order(5, 3, "a").unwrap();
    assert_eq!(order.seed, 11);
    assert_eq!(order.order, 3);
    assert_eq!(
        order.wait(Duration::from_secs(60)),
        Duration::from_secs(120)
    );
}

#[tokio::test(start_paused = true)]
async fn test_three_signers_complete_withdraw_once() {
    init_tracing();
    let chain = create_test_chain(vec![addr(1), addr(2), addr(3)]);
    let n1 = create_test_node(&chain, 1, NodeOptions::default());
    let n2 = create_test_node(&chain, 2, NodeOptions::default());
    let n3 = create_test_node(&chain, 3, NodeOptions::default());

    // "a1": node 3 goes first, node 1 second, node 2 third
    let (r1, r2, r3) = tokio::join!(
        n1.node
            .create_or_sign_withdraw("a1", addr(0x77), U256::from(1000), NATIVE_ASSET),
        n2.node
            .create_or_sign_withdraw("a1", addr(0x77), U256::from(1000), NATIVE_ASSET),
        n3.node
            .create_or_sign_withdraw("a1", addr(0x77), U256::from(1000), NATIVE_ASSET),
    );

    assert!(r3.unwrap().is_submitted());
    assert!(r1.unwrap().is_submitted());
    assert_eq!(
        r2.unwrap(),
        DockingOutcome::Skipped(SkipReason::AlreadyCompleted)
    );
    assert!(chain.is_completed("a1"));
    assert_eq!(chain.sent_count_from(addr(2)), 0);

    n1.node.poll_once().await.unwrap();
    let confirmed = n1.callback.confirmed_for("a1");
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].tx_type, BridgeTxType::Withdraw);
    assert_eq!(confirmed[0].signers, vec![addr(3), addr(1)]);
    let transfer = confirmed[0].transfer.as_ref().unwrap();
    assert_eq!(transfer.to, addr(0x77));
    assert_eq!(transfer.amount, U256::from(1000));
}

#[tokio::test(start_paused = true)]
async fn test_repeat_request_returns_existing_hash() {
    let chain = create_test_chain(vec![addr(1), addr(2), addr(3)]);
    chain.set_auto_mine(false);
    let n1 = create_test_node(&chain, 1, NodeOptions::default());

    let first = n1.node.create_or_sign_upgrade("c3").await.unwrap();
    let second = n1.node.create_or_sign_upgrade("c3").await.unwrap();

    assert_eq!(second, DockingOutcome::Pending(first.tx_hash().unwrap()));
    assert_eq!(chain.sent_count_from(addr(1)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_mismatched_proposal_is_consistency_violation() {
    let chain = create_test_chain(vec![addr(1), addr(2), addr(3)]);
    chain.co_sign(
        addr(3),
        &CustodyCall::Withdraw(WithdrawCall {
            tx_key: "a1".to_string(),
            to: addr(0x77),
            amount: U256::from(1000),
            erc20: None,
        }),
    );
    let n1 = create_test_node(&chain, 1, NodeOptions::default());

    let err = n1
        .node
        .create_or_sign_withdraw("a1", addr(0x77), U256::from(999), NATIVE_ASSET)
        .await
        .unwrap_err();
    assert!(matches!(err, DockingError::ConsistencyViolation { .. }));
    assert!(err.is_fatal());
    assert_eq!(chain.sent_count_from(addr(1)), 0);
}

#[tokio::test(start_paused = true)]
async fn test_empty_manager_change_confirmed_without_call() {
    let chain = create_test_chain(vec![addr(1), addr(2), addr(3)]);
    let n1 = create_test_node(&chain, 1, NodeOptions::default());

    let outcome = n1
        .node
        .create_or_sign_manager_change("b2", vec![], vec![], 0)
        .await
        .unwrap();

    assert_eq!(outcome, DockingOutcome::Skipped(SkipReason::NoChangeRequired));
    assert!(chain.sent_transactions().is_empty());
    let confirmed = n1.callback.confirmed_for("b2");
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].tx_type, BridgeTxType::ManagerChange);
}

#[tokio::test(start_paused = true)]
async fn test_manager_change_count_mismatch_rejected() {
    let chain = create_test_chain(vec![addr(1), addr(2), addr(3)]);
    let n1 = create_test_node(&chain, 1, NodeOptions::default());

    let err = n1
        .node
        .create_or_sign_manager_change("b2", vec![addr(4)], vec![], 2)
        .await
        .unwrap_err();
    assert!(matches!(err, DockingError::Validation(_)));
}

#[tokio::test(start_paused = true)]
async fn test_manager_change_applied_by_two_signers() {
    let chain = create_test_chain(vec![addr(1), addr(2), addr(3)]);
    let n1 = create_test_node(&chain, 1, NodeOptions::default());
    let n2 = create_test_node(&chain, 2, NodeOptions::default());

    let (r1, r2) = tokio::join!(
        n1.node
            .create_or_sign_manager_change("b2", vec![addr(4)], vec![addr(3)], 2),
        n2.node
            .create_or_sign_manager_change("b2", vec![addr(4)], vec![addr(3)], 2),
    );
    assert!(r1.unwrap().is_submitted());
    assert!(r2.unwrap().is_submitted());
    assert_eq!(chain.managers(), vec![addr(1), addr(2), addr(4)]);
}

// =============================================================================
// Gas ceiling and resend
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_gas_above_ceiling_defers_withdraw() {
    let chain = create_test_chain(vec![addr(1), addr(2), addr(3)]);
    let ceiling = U256::from(1_000);
    chain.set_gas_price(ceiling + 1);
    let n1 = create_test_node(
        &chain,
        1,
        NodeOptions {
            gas_price_ceiling: ceiling,
            ..NodeOptions::default()
        },
    );

    let outcome = n1
        .node
        .create_or_sign_withdraw("a1", addr(0x77), U256::from(1000), NATIVE_ASSET)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        DockingOutcome::Skipped(SkipReason::GasPriceAboveCeiling {
            current: ceiling + 1,
            ceiling,
        })
    );
    assert!(chain.sent_transactions().is_empty());
    assert!(n1.node.pending().list_active().unwrap().is_empty());
    assert!(n1.node.tracker().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_gas_above_ceiling_but_completed() {
    let chain = create_test_chain(vec![addr(1), addr(2), addr(3)]);
    let call = CustodyCall::Withdraw(WithdrawCall {
        tx_key: "a1".to_string(),
        to: addr(0x77),
        amount: U256::from(1000),
        erc20: None,
    });
    chain.co_sign(addr(2), &call);
    chain.co_sign(addr(3), &call);
    chain.set_gas_price(U256::from(1_001));
    let n1 = create_test_node(
        &chain,
        1,
        NodeOptions {
            gas_price_ceiling: U256::from(1_000),
            ..NodeOptions::default()
        },
    );

    let outcome = n1
        .node
        .create_or_sign_withdraw("a1", addr(0x77), U256::from(1000), NATIVE_ASSET)
        .await
        .unwrap();
    assert_eq!(outcome, DockingOutcome::Skipped(SkipReason::AlreadyCompleted));
}

#[tokio::test(start_paused = true)]
async fn test_failed_receipts_bounded_by_ceiling() {
    init_tracing();
    let chain = create_test_chain(vec![addr(1), addr(2), addr(3)]);
    chain.fail_next_custody_receipts(10);
    let n1 = create_test_node(&chain, 1, NodeOptions::default());
    let ceiling = n1.node.config().resend_ceiling as usize;

    let first = n1.node.create_or_sign_upgrade("c3").await.unwrap();
    let first_hash = first.tx_hash().unwrap();

    let mut failed = None;
    for _ in 0..2 * ceiling + 2 {
        let report = n1.node.poll_once().await.unwrap();
        if let Some(event) = report
            .tracker_events
            .into_iter()
            .find(|e| matches!(e, TrackerEvent::Failed { .. }))
        {
            failed = Some(event);
            break;
        }
        settle_resends(&n1).await;
    }

    assert!(matches!(failed, Some(TrackerEvent::Failed { ref internal_id, .. }) if internal_id == "c3"));
    assert_eq!(chain.sent_count_from(addr(1)), ceiling);
    assert_eq!(
        n1.node.pending().get(&first_hash).unwrap().unwrap().status,
        PendingStatus::Failed
    );
    assert!(n1.node.tracker().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_receipt_resent_then_confirmed() {
    let chain = create_test_chain(vec![addr(1), addr(2), addr(3)]);
    chain.fail_next_custody_receipts(1);
    let n1 = create_test_node(&chain, 1, NodeOptions::default());

    let first = n1.node.create_or_sign_upgrade("c3").await.unwrap();
    let mut events = Vec::new();
    for _ in 0..4 {
        events.extend(n1.node.poll_once().await.unwrap().tracker_events);
        settle_resends(&n1).await;
    }

    let resent = events
        .iter()
        .find_map(|e| match e {
            TrackerEvent::Resent { old, new } => Some((*old, *new)),
            _ => None,
        })
        .unwrap();
    assert_eq!(resent.0, first.tx_hash().unwrap());
    assert!(events.contains(&TrackerEvent::Confirmed {
        hash: resent.1,
        internal_id: "c3".to_string()
    }));
    assert_eq!(chain.sent_count_from(addr(1)), 2);
}

#[tokio::test(start_paused = true)]
async fn test_poll_not_held_up_by_resend() {
    // node 1 is second in line for "a1", so a resend re-checks the proposal
    // for a full turn interval
    let chain = create_test_chain(vec![addr(1), addr(2), addr(3)]);
    chain.fail_next_custody_receipts(1);
    let n1 = create_test_node(&chain, 1, NodeOptions::default());
    n1.node
        .create_or_sign_withdraw("a1", addr(0x77), U256::from(1000), NATIVE_ASSET)
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    n1.node.poll_once().await.unwrap();
    assert!(started.elapsed() < n1.node.config().turn_interval());
    assert_eq!(chain.sent_count_from(addr(1)), 1);

    settle_resends(&n1).await;
    let report = n1.node.poll_once().await.unwrap();
    assert!(report
        .tracker_events
        .iter()
        .any(|e| matches!(e, TrackerEvent::Resent { .. })));
    assert_eq!(chain.sent_count_from(addr(1)), 2);
}

// =============================================================================
// Recovery
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_two_phase_recovery() {
    init_tracing();
    let chain = create_test_chain(vec![addr(1), addr(2), addr(3), addr(4)]);
    let bank = vec![addr(1), addr(2)];
    let options = || NodeOptions {
        bank: bank.clone(),
        ..NodeOptions::default()
    };
    let n1 = create_test_node(&chain, 1, options());
    let n2 = create_test_node(&chain, 2, options());
    let seed = vec![addr(1), addr(2)];
    let all = vec![addr(1), addr(2), addr(5)];

    // node 1 goes first and co-signs phase I alone
    let phase_one = n1
        .node
        .force_recovery("b7", seed.clone(), all.clone())
        .await
        .unwrap();
    assert!(phase_one.is_submitted());
    assert_eq!(chain.managers().len(), 4);

    // node 2 completes phase I and opens phase II
    let phase_two = n2
        .node
        .force_recovery("b7", seed.clone(), all.clone())
        .await
        .unwrap();
    assert!(phase_two.is_submitted());
    assert_eq!(chain.managers(), vec![addr(1), addr(2)]);

    // node 1 resumes from the on-chain state and completes phase II
    let resumed = n1
        .node
        .force_recovery("b7", seed, all)
        .await
        .unwrap();
    assert!(resumed.is_submitted());
    assert_eq!(chain.managers(), vec![addr(1), addr(2), addr(5)]);

    n1.node.poll_once().await.unwrap();
    let confirmed = n1.callback.confirmed_for("b7");
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].tx_type, BridgeTxType::Recovery);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_short_circuits_when_already_recovered() {
    let chain = create_test_chain(vec![addr(1), addr(2), addr(5)]);
    let n1 = create_test_node(&chain, 1, NodeOptions::default());

    let outcome = n1
        .node
        .force_recovery("b7", vec![addr(1), addr(2)], vec![addr(1), addr(2), addr(5)])
        .await
        .unwrap();

    assert_eq!(outcome, DockingOutcome::Skipped(SkipReason::NoChangeRequired));
    assert!(chain.sent_transactions().is_empty());
    let confirmed = n1.callback.confirmed_for("b7");
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].external_hash, None);
}

// =============================================================================
// Inbound deposits and listener bookkeeping
// =============================================================================

#[tokio::test]
async fn test_token_deposit_reported() {
    let chain = create_test_chain(vec![addr(1), addr(2), addr(3)]);
    let n1 = create_test_node(&chain, 1, NodeOptions::default());
    let bindings = n1
        .node
        .register_assets(&[AssetRegistration {
            contract: addr(0x70),
            symbol: "USDX".to_string(),
            decimals: 6,
        }])
        .unwrap();

    chain.transfer_token(addr(0x70), addr(9), addr(CUSTODY), U256::from(250));
    chain.transfer_token(addr(0x70), addr(9), addr(0x55), U256::from(250));
    n1.node.poll_once().await.unwrap();

    let confirmed = n1.callback.confirmed();
    assert_eq!(confirmed.len(), 1);
    let transfer = confirmed[0].transfer.as_ref().unwrap();
    assert_eq!(transfer.asset.asset_id, bindings[0].asset_id);
    assert_eq!(transfer.amount, U256::from(250));
}

#[tokio::test]
async fn test_spoofed_native_deposit_ignored() {
    let chain = create_test_chain(vec![addr(1), addr(2), addr(3)]);
    let n1 = create_test_node(&chain, 1, NodeOptions::default());

    chain.push_mined(addr(9), addr(CUSTODY), U256::from(500), Vec::new(), Vec::new());
    chain.deposit_native(addr(9), U256::from(700));
    n1.node.poll_once().await.unwrap();

    let confirmed = n1.callback.confirmed();
    assert_eq!(confirmed.len(), 1);
    assert_eq!(
        confirmed[0].transfer.as_ref().map(|t| t.amount),
        Some(U256::from(700))
    );
}

#[tokio::test]
async fn test_reorg_does_not_double_report_deposit() {
    let chain = create_test_chain(vec![addr(1), addr(2), addr(3)]);
    let n1 = create_test_node(&chain, 1, NodeOptions::default());

    chain.deposit_native(addr(9), U256::from(700));
    n1.node.poll_once().await.unwrap();

    chain.fork_tip();
    chain.mine_empty_blocks(1);
    let report = n1.node.poll_once().await.unwrap();
    assert_eq!(report.reorgs, 1);
    let report = n1.node.poll_once().await.unwrap();
    assert_eq!(report.blocks, 2);

    assert_eq!(n1.callback.confirmed().len(), 1);
}

#[tokio::test]
async fn test_malformed_tx_does_not_block_others() {
    let chain = create_test_chain(vec![addr(1), addr(2), addr(3)]);
    let n1 = create_test_node(&chain, 1, NodeOptions::default());
    let mut input = WithdrawCall {
        tx_key: "a1".to_string(),
        to: addr(3),
        amount: U256::from(1),
        erc20: None,
    }
    .encode();
    input.truncate(36);

    chain.push_mined(addr(2), addr(CUSTODY), U256::zero(), input, Vec::new());
    chain.deposit_native(addr(9), U256::from(700));
    n1.node.poll_once().await.unwrap();

    assert_eq!(n1.callback.confirmed().len(), 1);
}

// =============================================================================
// Home-chain confirmation callbacks
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_rollback_window() {
    let chain = create_test_chain(vec![addr(1), addr(2), addr(3)]);
    let n1 = create_test_node(&chain, 1, NodeOptions::default());
    let window = n1.node.config().rollback_window;

    let hash = n1
        .node
        .create_or_sign_upgrade("c3")
        .await
        .unwrap()
        .tx_hash()
        .unwrap();

    n1.node
        .tx_confirmed_completed(hash, 100, Some("c3"), Some("done"))
        .await
        .unwrap();
    assert_eq!(n1.node.purge_expired(100 + window - 1).unwrap(), 0);
    assert!(n1.node.pending().get(&hash).unwrap().is_some());

    assert!(n1.node.tx_confirmed_rollback(hash).await.unwrap());
    assert!(n1.node.pending().get(&hash).unwrap().unwrap().is_active());

    n1.node
        .tx_confirmed_completed(hash, 110, Some("c3"), None)
        .await
        .unwrap();
    assert_eq!(n1.node.purge_expired(110 + window).unwrap(), 1);
    assert!(n1.node.pending().get(&hash).unwrap().is_none());
    assert!(!n1.node.tx_confirmed_rollback(hash).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_tombstoned_broadcast_not_reanalyzed() {
    let chain = create_test_chain(vec![addr(1), addr(2), addr(3)]);
    let n1 = create_test_node(&chain, 1, NodeOptions::default());

    let hash = n1
        .node
        .create_or_sign_upgrade("c3")
        .await
        .unwrap()
        .tx_hash()
        .unwrap();
    n1.node
        .tx_confirmed_completed(hash, 1, Some("c3"), None)
        .await
        .unwrap();

    n1.node.reanalyze_tx(hash).await.unwrap();
    let record = n1.node.pending().get(&hash).unwrap().unwrap();
    assert!(record.tombstoned);
    assert_eq!(record.status, PendingStatus::Submitted);
}

// =============================================================================
// Wiring
// =============================================================================

#[test]
fn test_registration_batch_is_atomic() {
    let chain = create_test_chain(vec![addr(1), addr(2), addr(3)]);
    let store = Arc::new(FailingAssetStore::new(3));
    let n1 = create_test_node(
        &chain,
        1,
        NodeOptions {
            asset_store: store.clone(),
            ..NodeOptions::default()
        },
    );
    let batch: Vec<AssetRegistration> = (1..=5u8)
        .map(|b| AssetRegistration {
            contract: addr(0x40 + b),
            symbol: format!("T{}", b),
            decimals: 18,
        })
        .collect();

    assert!(n1.node.register_assets(&batch).is_err());
    assert!(store.is_empty());
    assert_eq!(store.max_asset_id().unwrap(), 0);
}

#[tokio::test]
async fn test_registry_lookup() {
    let chain = create_test_chain(vec![addr(1), addr(2), addr(3)]);
    let registry = DockingRegistry::new();
    registry.register(create_test_node(&chain, 1, NodeOptions::default()).node);

    assert_eq!(registry.chain_ids(), vec![CHAIN_ID]);
    assert!(registry.get(CHAIN_ID).is_ok());
    assert!(matches!(
        registry.get(7),
        Err(DockingError::UnknownChain(7))
    ));
}
