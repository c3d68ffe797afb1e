//! End-to-end coordination flows through the public `Coordinator` API:
//! admission screening, capacity, dispatch ordering, cancellation windows,
//! lock hygiene and stale-lock eviction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal_macros::dec;
use tokio::sync::Mutex;
use uuid::Uuid;

use baton::{
    AppConfig, CancelVerdict, Coordinator, ExecutionReceipt, ExecutionRecord, RejectReason, Side,
    SimulatedExecutor, SimulatorConfig, SubmitVerdict, TradeExecutor, TradeIntent, TradeOutcome,
};

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.queue.capacity = 32;
    config.queue.history_capacity = 64;
    config.dispatcher.workers = 4;
    config.dispatcher.poll_interval_ms = 20;
    config.dispatcher.execution_timeout_ms = 2_000;
    config.locks.acquire_timeout_ms = 500;
    config
}

struct InstantExecutor;

#[async_trait]
impl TradeExecutor for InstantExecutor {
    async fn execute(&self, intent: &TradeIntent) -> anyhow::Result<ExecutionReceipt> {
        Ok(ExecutionReceipt::filled(intent.quantity))
    }
}

struct FailingExecutor;

#[async_trait]
impl TradeExecutor for FailingExecutor {
    async fn execute(&self, intent: &TradeIntent) -> anyhow::Result<ExecutionReceipt> {
        anyhow::bail!("venue rejected {}", intent.symbol)
    }
}

/// Captures the order trades reach the venue in.
struct RecordingExecutor {
    order: Mutex<Vec<Uuid>>,
}

#[async_trait]
impl TradeExecutor for RecordingExecutor {
    async fn execute(&self, intent: &TradeIntent) -> anyhow::Result<ExecutionReceipt> {
        self.order.lock().await.push(intent.id);
        Ok(ExecutionReceipt::filled(intent.quantity))
    }
}

/// Never returns within any execution timeout; used to wedge a symbol lock.
struct WedgedExecutor;

#[async_trait]
impl TradeExecutor for WedgedExecutor {
    async fn execute(&self, intent: &TradeIntent) -> anyhow::Result<ExecutionReceipt> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(ExecutionReceipt::filled(intent.quantity))
    }
}

#[derive(Default)]
struct OverlapState {
    current_total: usize,
    max_total: usize,
    current_per_symbol: HashMap<String, usize>,
    max_per_symbol: HashMap<String, usize>,
}

/// Tracks how many executions run at once, per symbol and overall.
#[derive(Default)]
struct OverlapTracker {
    state: std::sync::Mutex<OverlapState>,
}

#[async_trait]
impl TradeExecutor for OverlapTracker {
    async fn execute(&self, intent: &TradeIntent) -> anyhow::Result<ExecutionReceipt> {
        {
            let mut state = self.state.lock().unwrap();
            state.current_total += 1;
            state.max_total = state.max_total.max(state.current_total);
            let current = {
                let entry = state
                    .current_per_symbol
                    .entry(intent.symbol.clone())
                    .or_default();
                *entry += 1;
                *entry
            };
            let max = state
                .max_per_symbol
                .entry(intent.symbol.clone())
                .or_default();
            *max = (*max).max(current);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        {
            let mut state = self.state.lock().unwrap();
            state.current_total -= 1;
            if let Some(entry) = state.current_per_symbol.get_mut(&intent.symbol) {
                *entry -= 1;
            }
        }
        Ok(ExecutionReceipt::filled(intent.quantity))
    }
}

async fn submit_ok(coordinator: &Coordinator, intent: TradeIntent) -> Uuid {
    match coordinator.submit_trade(intent).await.expect("submit failed") {
        SubmitVerdict::Accepted { trade_id, .. } => trade_id,
        SubmitVerdict::Rejected { reason, .. } => panic!("unexpected rejection: {reason}"),
    }
}

async fn reject_reason(coordinator: &Coordinator, intent: TradeIntent) -> RejectReason {
    match coordinator.submit_trade(intent).await.expect("submit failed") {
        SubmitVerdict::Rejected { reason, .. } => reason,
        SubmitVerdict::Accepted { trade_id, .. } => {
            panic!("expected a rejection, got accepted trade {trade_id}")
        }
    }
}

async fn wait_terminal(coordinator: &Coordinator, trade_id: Uuid) -> ExecutionRecord {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(record) = coordinator.record(trade_id).await {
            if record.outcome.is_terminal() {
                return record;
            }
        }
        assert!(
            Instant::now() < deadline,
            "trade {trade_id} never reached a terminal outcome"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_drained(coordinator: &Coordinator) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let stats = coordinator.stats().await;
        if stats.outstanding == 0 && stats.queue_depth == 0 {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "coordinator never drained: {stats}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn submission_storm_respects_capacity_and_resolves_everything() {
    let mut config = test_config();
    config.queue.capacity = 20;
    let coordinator =
        Coordinator::new(config, Arc::new(InstantExecutor)).expect("coordinator construction");

    // Workers are not started yet, so all 25 submissions race against a
    // queue nothing is draining. Distinct symbols keep screening out of it.
    let mut accepted = Vec::new();
    let mut overflowed = 0;
    for i in 0..25 {
        let intent = TradeIntent::new(format!("SYM{i}USDT"), Side::Buy, dec!(1), "storm-bot");
        match coordinator.submit_trade(intent).await.expect("submit") {
            SubmitVerdict::Accepted {
                trade_id,
                queue_position,
            } => {
                assert_eq!(queue_position, accepted.len() + 1);
                accepted.push(trade_id);
            }
            SubmitVerdict::Rejected { reason, .. } => {
                assert_eq!(reason, RejectReason::Overflow);
                overflowed += 1;
            }
        }
    }
    assert_eq!(accepted.len(), 20);
    assert_eq!(overflowed, 5);

    coordinator.start().await.expect("start");
    for trade_id in &accepted {
        let record = wait_terminal(&coordinator, *trade_id).await;
        assert_eq!(record.outcome, TradeOutcome::Executed);
        assert!(record.executed_at.is_some());
    }
    wait_drained(&coordinator).await;

    let stats = coordinator.stats().await;
    assert_eq!(stats.submitted, 25);
    assert_eq!(stats.accepted, 20);
    assert_eq!(stats.rejected_overflow, 5);
    assert_eq!(stats.dispatch.executed, 20);
    assert_eq!(stats.outstanding, 0);
    coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn abandoned_submissions_leave_no_partial_admission() {
    let mut config = test_config();
    config.queue.capacity = 256;
    config.queue.history_capacity = 1024;
    let coordinator =
        Arc::new(Coordinator::new(config, Arc::new(InstantExecutor)).expect("coordinator"));
    coordinator.start().await.expect("start");

    // Background bots keep the admission locks busy while the foreground
    // submissions race them.
    let mut submitters = Vec::new();
    for bot in 0..4 {
        let coordinator = coordinator.clone();
        submitters.push(tokio::spawn(async move {
            for i in 0..50 {
                let intent = TradeIntent::new(
                    format!("BG{bot}X{i}USDT"),
                    Side::Buy,
                    dec!(1),
                    format!("bg-bot-{bot}"),
                );
                let _ = coordinator.submit_trade(intent).await;
            }
        }));
    }

    // Poll each submission exactly once, then drop it. One abandoned while
    // parked on an admission lock must not keep a capacity slot or a
    // screening entry.
    let mut finished = Vec::new();
    for i in 0..200 {
        let intent = TradeIntent::new(format!("FG{i}USDT"), Side::Buy, dec!(1), "flaky-bot");
        match tokio::time::timeout(Duration::ZERO, coordinator.submit_trade(intent)).await {
            Ok(Ok(SubmitVerdict::Accepted { trade_id, .. })) => finished.push(trade_id),
            Ok(Ok(SubmitVerdict::Rejected { .. })) => {}
            Ok(Err(error)) => panic!("submission failed: {error}"),
            Err(_) => {}
        }
    }
    for submitter in submitters {
        submitter.await.expect("submitter task");
    }

    wait_drained(&coordinator).await;
    for trade_id in finished {
        let record = wait_terminal(&coordinator, trade_id).await;
        assert_eq!(record.outcome, TradeOutcome::Executed);
    }
    assert!(coordinator.queue_status().await.locked_symbols.is_empty());

    // Every submission was polled at least once, so the counter saw all
    // 400. Abandoned ones got no verdict, so accepted plus rejected may
    // fall short of it.
    let stats = coordinator.stats().await;
    assert_eq!(stats.submitted, 400);
    assert_eq!(stats.outstanding, 0);

    // The coordinator still accepts and executes after the storm.
    let follow_up = submit_ok(
        &coordinator,
        TradeIntent::new("ZZZUSDT", Side::Buy, dec!(1), "flaky-bot"),
    )
    .await;
    let record = wait_terminal(&coordinator, follow_up).await;
    assert_eq!(record.outcome, TradeOutcome::Executed);
    coordinator.shutdown().await;
}

#[tokio::test]
async fn duplicate_screening_spans_bots() {
    let coordinator =
        Coordinator::new(test_config(), Arc::new(InstantExecutor)).expect("coordinator");

    submit_ok(
        &coordinator,
        TradeIntent::new("BTCUSDT", Side::Buy, dec!(0.25), "grid-1"),
    )
    .await;

    // Identical side and size from a different bot is still a duplicate.
    let reason = reject_reason(
        &coordinator,
        TradeIntent::new("BTCUSDT", Side::Buy, dec!(0.25), "dca-9"),
    )
    .await;
    assert_eq!(reason, RejectReason::Duplicate);

    // Same side, different size is a separate trade.
    submit_ok(
        &coordinator,
        TradeIntent::new("BTCUSDT", Side::Buy, dec!(0.5), "dca-9"),
    )
    .await;

    let stats = coordinator.stats().await;
    assert_eq!(stats.rejected_duplicate, 1);
    assert_eq!(stats.accepted, 2);
}

#[tokio::test]
async fn resubmitted_trade_id_is_refused_and_the_original_still_executes() {
    let coordinator =
        Coordinator::new(test_config(), Arc::new(InstantExecutor)).expect("coordinator");

    let original = TradeIntent::new("BTCUSDT", Side::Buy, dec!(1), "grid-1");
    let trade_id = submit_ok(&coordinator, original.clone()).await;

    // Replaying the intent while the first submission is still queued must
    // not touch its stored record.
    let reason = reject_reason(&coordinator, original.clone()).await;
    assert_eq!(reason, RejectReason::Duplicate);
    let record = coordinator.record(trade_id).await.expect("record");
    assert_eq!(record.outcome, TradeOutcome::Accepted);

    coordinator.start().await.expect("start");
    let record = wait_terminal(&coordinator, trade_id).await;
    assert_eq!(record.outcome, TradeOutcome::Executed);
    wait_drained(&coordinator).await;

    let stats = coordinator.stats().await;
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.rejected_duplicate, 1);
    assert_eq!(stats.outstanding, 0);

    // The symbol screens clean again: an opposite-side trade would hit
    // Conflict if the replay had left an unresolved entry behind.
    let sell = submit_ok(
        &coordinator,
        TradeIntent::new("BTCUSDT", Side::Sell, dec!(1), "macd-1"),
    )
    .await;
    let record = wait_terminal(&coordinator, sell).await;
    assert_eq!(record.outcome, TradeOutcome::Executed);

    // Replays stay refused after the original reached its terminal outcome,
    // and the outcome stays put.
    let reason = reject_reason(&coordinator, original).await;
    assert_eq!(reason, RejectReason::Duplicate);
    let record = coordinator.record(trade_id).await.expect("record");
    assert_eq!(record.outcome, TradeOutcome::Executed);
    coordinator.shutdown().await;
}

#[tokio::test]
async fn conflict_clears_after_the_original_resolves() {
    let coordinator =
        Coordinator::new(test_config(), Arc::new(InstantExecutor)).expect("coordinator");

    let buy_id = submit_ok(
        &coordinator,
        TradeIntent::new("ETHUSDT", Side::Buy, dec!(2), "grid-1"),
    )
    .await;
    let reason = reject_reason(
        &coordinator,
        TradeIntent::new("ETHUSDT", Side::Sell, dec!(2), "macd-1"),
    )
    .await;
    assert_eq!(reason, RejectReason::Conflict);

    // Cancelling resolves the buy, which clears the way for the sell.
    assert_eq!(
        coordinator.cancel_trade(buy_id).await,
        CancelVerdict::Cancelled
    );
    let sell_id = submit_ok(
        &coordinator,
        TradeIntent::new("ETHUSDT", Side::Sell, dec!(2), "macd-1"),
    )
    .await;

    coordinator.start().await.expect("start");
    let record = wait_terminal(&coordinator, sell_id).await;
    assert_eq!(record.outcome, TradeOutcome::Executed);
    coordinator.shutdown().await;
}

#[tokio::test]
async fn cancellation_windows() {
    let coordinator =
        Coordinator::new(test_config(), Arc::new(InstantExecutor)).expect("coordinator");

    // Before dispatch: cancellable exactly once, then the record is final.
    let queued = submit_ok(
        &coordinator,
        TradeIntent::new("SOLUSDT", Side::Buy, dec!(3), "grid-1"),
    )
    .await;
    assert_eq!(
        coordinator.cancel_trade(queued).await,
        CancelVerdict::Cancelled
    );
    let record = coordinator.record(queued).await.expect("record");
    assert_eq!(record.outcome, TradeOutcome::Cancelled);
    assert_eq!(
        coordinator.cancel_trade(queued).await,
        CancelVerdict::TooLate
    );
    assert_eq!(coordinator.stats().await.outstanding, 0);

    // Unknown id.
    assert_eq!(
        coordinator.cancel_trade(Uuid::new_v4()).await,
        CancelVerdict::NotFound
    );

    // After execution the outcome is immutable.
    coordinator.start().await.expect("start");
    let executed = submit_ok(
        &coordinator,
        TradeIntent::new("SOLUSDT", Side::Buy, dec!(4), "grid-1"),
    )
    .await;
    wait_terminal(&coordinator, executed).await;
    assert_eq!(
        coordinator.cancel_trade(executed).await,
        CancelVerdict::TooLate
    );
    coordinator.shutdown().await;
}

#[tokio::test]
async fn dispatch_follows_priority_then_fifo() {
    let mut config = test_config();
    config.dispatcher.workers = 1;
    let recorder = Arc::new(RecordingExecutor {
        order: Mutex::new(Vec::new()),
    });
    let coordinator = Coordinator::new(config, recorder.clone()).expect("coordinator");

    // Queue up before starting the single worker. Distinct symbols keep the
    // collision screen quiet.
    let low_first = submit_ok(
        &coordinator,
        TradeIntent::new("AAAUSDT", Side::Buy, dec!(1), "grid-1"),
    )
    .await;
    let high_first = submit_ok(
        &coordinator,
        TradeIntent::new("BBBUSDT", Side::Buy, dec!(1), "grid-1").with_priority(5),
    )
    .await;
    let low_second = submit_ok(
        &coordinator,
        TradeIntent::new("CCCUSDT", Side::Buy, dec!(1), "grid-1"),
    )
    .await;
    let high_second = submit_ok(
        &coordinator,
        TradeIntent::new("DDDUSDT", Side::Buy, dec!(1), "grid-1").with_priority(5),
    )
    .await;

    coordinator.start().await.expect("start");
    wait_drained(&coordinator).await;

    let order = recorder.order.lock().await.clone();
    assert_eq!(
        order,
        vec![high_first, high_second, low_first, low_second],
        "expected priority desc, then submission order"
    );
    coordinator.shutdown().await;
}

#[tokio::test]
async fn lock_released_after_executor_failure() {
    let coordinator =
        Coordinator::new(test_config(), Arc::new(FailingExecutor)).expect("coordinator");
    coordinator.start().await.expect("start");

    let first = submit_ok(
        &coordinator,
        TradeIntent::new("XRPUSDT", Side::Buy, dec!(10), "grid-1"),
    )
    .await;
    let record = wait_terminal(&coordinator, first).await;
    assert_eq!(record.outcome, TradeOutcome::Failed);
    assert_eq!(record.error.as_deref(), Some("venue rejected XRPUSDT"));

    // The symbol lock must be free again and the symbol reusable.
    assert!(coordinator.queue_status().await.locked_symbols.is_empty());
    let second = submit_ok(
        &coordinator,
        TradeIntent::new("XRPUSDT", Side::Buy, dec!(20), "grid-1"),
    )
    .await;
    let record = wait_terminal(&coordinator, second).await;
    assert_eq!(record.outcome, TradeOutcome::Failed);

    let stats = coordinator.stats().await;
    assert_eq!(stats.dispatch.failed, 2);
    assert_eq!(stats.outstanding, 0);
    coordinator.shutdown().await;
}

#[tokio::test]
async fn stale_lock_eviction_fails_the_wedged_trade() {
    let mut config = test_config();
    config.locks.max_hold_ms = 100;
    config.locks.sweep_interval_ms = 25;
    config.dispatcher.execution_timeout_ms = 1_000;
    let coordinator = Coordinator::new(config, Arc::new(WedgedExecutor)).expect("coordinator");
    coordinator.start().await.expect("start");

    let trade_id = submit_ok(
        &coordinator,
        TradeIntent::new("DOGEUSDT", Side::Buy, dec!(100), "grid-1"),
    )
    .await;

    // The sweeper reclaims the lock long before the execution timeout and
    // fails the holding trade.
    let record = wait_terminal(&coordinator, trade_id).await;
    assert_eq!(record.outcome, TradeOutcome::Failed);
    let error = record.error.expect("eviction error message");
    assert!(error.contains("held for"), "unexpected error: {error}");

    let stats = coordinator.stats().await;
    assert!(stats.evicted_locks >= 1);
    assert!(coordinator.queue_status().await.locked_symbols.is_empty());
    coordinator.shutdown().await;
}

#[tokio::test]
async fn per_symbol_serialization_with_cross_symbol_parallelism() {
    let tracker = Arc::new(OverlapTracker::default());
    let coordinator = Coordinator::new(test_config(), tracker.clone()).expect("coordinator");

    // Two trades per symbol, same side with different sizes so screening
    // admits all four.
    for (symbol, qty) in [
        ("AAAUSDT", dec!(1)),
        ("AAAUSDT", dec!(2)),
        ("BBBUSDT", dec!(1)),
        ("BBBUSDT", dec!(2)),
    ] {
        submit_ok(
            &coordinator,
            TradeIntent::new(symbol, Side::Buy, qty, "grid-1"),
        )
        .await;
    }

    coordinator.start().await.expect("start");
    wait_drained(&coordinator).await;
    coordinator.shutdown().await;

    let state = tracker.state.lock().unwrap();
    assert_eq!(state.max_per_symbol["AAAUSDT"], 1);
    assert_eq!(state.max_per_symbol["BBBUSDT"], 1);
    assert!(
        state.max_total >= 2,
        "different symbols should have run in parallel (max {})",
        state.max_total
    );
}

#[tokio::test]
async fn simulated_executor_fills_test_trades_instantly() {
    // Hostile simulator settings: seconds of latency, guaranteed failures
    // and a denied symbol. The test flag bypasses all of them.
    let executor = Arc::new(SimulatedExecutor::new(SimulatorConfig {
        min_latency_ms: 2_000,
        max_latency_ms: 3_000,
        failure_rate: 1.0,
        fail_symbols: vec!["BTCUSDT".to_string()],
    }));
    let coordinator = Coordinator::new(test_config(), executor).expect("coordinator");
    coordinator.start().await.expect("start");

    let trade_id = submit_ok(
        &coordinator,
        TradeIntent::new("BTCUSDT", Side::Buy, dec!(0.1), "grid-1").with_test_flag(true),
    )
    .await;
    let record = wait_terminal(&coordinator, trade_id).await;
    assert_eq!(record.outcome, TradeOutcome::Executed);
    assert!(record.executed_at.is_some());
    coordinator.shutdown().await;
}
