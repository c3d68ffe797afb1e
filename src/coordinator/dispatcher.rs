//! Execution Dispatcher
//!
//! Worker pool draining the priority queue. Each worker pulls the next
//! intent, acquires its symbol lock, runs the executor under a timeout,
//! finalizes the record and releases the lock. Lock waits that time out
//! put the intent back in the queue a bounded number of times before the
//! trade is failed.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{DispatcherConfig, LockConfig};
use crate::domain::TradeOutcome;
use crate::error::BatonError;

use super::blotter::TradeBlotter;
use super::locks::SymbolLockManager;
use super::queue::{IntentQueue, QueuedIntent};
use super::traits::TradeExecutor;

/// Dispatch counters snapshot
#[derive(Debug, Clone, Default)]
pub struct DispatcherStats {
    /// Trades executed successfully
    pub executed: u64,
    /// Trades failed by the executor or a lock-retry exhaustion
    pub failed: u64,
    /// Executions cut off by the execution timeout
    pub timed_out: u64,
    /// Lock-acquire waits that hit the timeout
    pub lock_timeouts: u64,
    /// Intents put back in the queue after a lock timeout
    pub requeues: u64,
}

/// Pulls admitted intents off the queue and drives them to a terminal
/// outcome.
pub struct ExecutionDispatcher {
    queue: Arc<Mutex<IntentQueue>>,
    queue_notify: Arc<Notify>,
    locks: Arc<SymbolLockManager>,
    blotter: Arc<TradeBlotter>,
    executor: Arc<dyn TradeExecutor>,
    config: DispatcherConfig,
    acquire_timeout: Duration,
    executed_count: AtomicU64,
    failed_count: AtomicU64,
    timed_out_count: AtomicU64,
    lock_timeout_count: AtomicU64,
    requeue_count: AtomicU64,
}

impl ExecutionDispatcher {
    pub fn new(
        queue: Arc<Mutex<IntentQueue>>,
        queue_notify: Arc<Notify>,
        locks: Arc<SymbolLockManager>,
        blotter: Arc<TradeBlotter>,
        executor: Arc<dyn TradeExecutor>,
        config: DispatcherConfig,
        lock_config: &LockConfig,
    ) -> Self {
        Self {
            queue,
            queue_notify,
            locks,
            blotter,
            executor,
            acquire_timeout: Duration::from_millis(lock_config.acquire_timeout_ms),
            config,
            executed_count: AtomicU64::new(0),
            failed_count: AtomicU64::new(0),
            timed_out_count: AtomicU64::new(0),
            lock_timeout_count: AtomicU64::new(0),
            requeue_count: AtomicU64::new(0),
        }
    }

    /// Spawn the worker pool. Workers exit when `shutdown_rx` flips to true;
    /// an item already being processed is finished first.
    pub fn spawn_workers(
        self: &Arc<Self>,
        shutdown_rx: &watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        (0..self.config.workers)
            .map(|worker_id| {
                let dispatcher = Arc::clone(self);
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    dispatcher.worker_loop(worker_id, shutdown_rx).await;
                })
            })
            .collect()
    }

    async fn worker_loop(&self, worker_id: usize, mut shutdown_rx: watch::Receiver<bool>) {
        debug!("Dispatch worker {} started", worker_id);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let next = self.queue.lock().await.pop_next();
            match next {
                Some(entry) => self.process(entry).await,
                None => {
                    // Park until work arrives. The poll tick covers a notify
                    // that raced with the empty pop above.
                    tokio::select! {
                        _ = self.queue_notify.notified() => {}
                        _ = tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)) => {}
                        changed = shutdown_rx.changed() => {
                            // A dropped sender means the coordinator is gone
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        debug!("Dispatch worker {} stopped", worker_id);
    }

    /// Drive one intent: lock, execute, finalize, release.
    async fn process(&self, entry: QueuedIntent) {
        let symbol = entry.intent.symbol.clone();
        let trade_id = entry.intent.id;
        let holder_id = trade_id.to_string();

        let lock = match self
            .locks
            .acquire(&symbol, &holder_id, self.acquire_timeout)
            .await
        {
            Ok(lock) => lock,
            Err(BatonError::LockTimeout { waited_ms, .. }) => {
                self.on_lock_timeout(entry, waited_ms).await;
                return;
            }
            Err(e) => {
                error!("Lock acquisition error for trade {}: {}", trade_id, e);
                self.fail(trade_id, format!("lock acquisition error: {e}"))
                    .await;
                return;
            }
        };

        let intent = entry.intent;
        let execution_timeout = Duration::from_millis(self.config.execution_timeout_ms);

        // The executor runs in its own task: a panicking implementation must
        // fail this one trade, not unwind the worker and shrink the pool
        // while the symbol stays locked.
        let executor = Arc::clone(&self.executor);
        let execution_intent = intent.clone();
        let mut execution =
            tokio::spawn(async move { executor.execute(&execution_intent).await });

        let (outcome, error, executed_at) =
            match tokio::time::timeout(execution_timeout, &mut execution).await {
                Ok(Ok(Ok(receipt))) => {
                    self.executed_count.fetch_add(1, Ordering::Relaxed);
                    info!(
                        "Trade {} executed: {} {} {} (filled {})",
                        trade_id, intent.symbol, intent.side, intent.quantity, receipt.filled_quantity
                    );
                    (TradeOutcome::Executed, None, Some(Utc::now()))
                }
                Ok(Ok(Err(e))) => {
                    self.failed_count.fetch_add(1, Ordering::Relaxed);
                    let reason = format!("{e:#}");
                    error!("Trade {} failed: {}", trade_id, reason);
                    (TradeOutcome::Failed, Some(reason), None)
                }
                Ok(Err(join_error)) => {
                    self.failed_count.fetch_add(1, Ordering::Relaxed);
                    let reason = if join_error.is_panic() {
                        "executor panicked".to_string()
                    } else {
                        "executor task was cancelled".to_string()
                    };
                    error!("Trade {} on {}: {}", trade_id, intent.symbol, reason);
                    (TradeOutcome::Failed, Some(reason), None)
                }
                Err(_) => {
                    execution.abort();
                    self.timed_out_count.fetch_add(1, Ordering::Relaxed);
                    let reason = format!(
                        "execution timed out after {}ms",
                        self.config.execution_timeout_ms
                    );
                    warn!("Trade {} on {}: {}", trade_id, intent.symbol, reason);
                    (TradeOutcome::Failed, Some(reason), None)
                }
            };

        if !self
            .blotter
            .finalize(trade_id, outcome, error, executed_at)
            .await
        {
            // Lost to the stale sweep or an earlier finalizer
            debug!("Trade {} was already resolved before worker finalize", trade_id);
        }

        if self.locks.release(&lock).await.is_err() {
            // Force-released by the sweep while we were executing; the lock
            // manager already logged it loudly
            debug!("Late lock release for trade {} on {}", trade_id, symbol);
        }
    }

    async fn on_lock_timeout(&self, entry: QueuedIntent, waited_ms: u64) {
        self.lock_timeout_count.fetch_add(1, Ordering::Relaxed);
        let trade_id = entry.intent.id;

        if entry.lock_retries < self.config.max_lock_retries {
            warn!(
                "Trade {} waited {}ms for symbol {} without acquiring the lock, requeueing",
                trade_id, waited_ms, entry.intent.symbol
            );
            self.requeue_count.fetch_add(1, Ordering::Relaxed);
            self.queue.lock().await.requeue(entry);
            self.queue_notify.notify_one();
        } else {
            let reason = format!(
                "symbol lock acquisition timed out after {} attempts ({}ms wait each)",
                entry.lock_retries + 1,
                self.acquire_timeout.as_millis()
            );
            warn!("Trade {} on {}: {}", trade_id, entry.intent.symbol, reason);
            self.fail(trade_id, reason).await;
        }
    }

    async fn fail(&self, trade_id: Uuid, reason: String) {
        self.failed_count.fetch_add(1, Ordering::Relaxed);
        if !self
            .blotter
            .finalize(trade_id, TradeOutcome::Failed, Some(reason), None)
            .await
        {
            debug!("Trade {} was already resolved", trade_id);
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            executed: self.executed_count.load(Ordering::Relaxed),
            failed: self.failed_count.load(Ordering::Relaxed),
            timed_out: self.timed_out_count.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeout_count.load(Ordering::Relaxed),
            requeues: self.requeue_count.load(Ordering::Relaxed),
        }
    }
}
