//! Trade Coordinator - 多機器人交易協調核心
//!
//! 整合所有組件提供完整的交易協調：
//! - 提交 → 碰撞篩查 → 容量准入 → 優先隊列
//! - Worker pool → Symbol lock → 執行 → 終態記錄
//! - 過期鎖清掃 → 強制釋放 → 持有者交易標記失敗

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::domain::{BotHandle, BotKind, BotStatus, ExecutionRecord, TradeIntent, TradeOutcome};
use crate::error::{BatonError, Result};

use super::blotter::TradeBlotter;
use super::dispatcher::{DispatcherStats, ExecutionDispatcher};
use super::locks::{LockEvent, SymbolLockInfo, SymbolLockManager};
use super::queue::IntentQueue;
use super::registry::{BotEvent, BotRegistry};
use super::traits::TradeExecutor;

/// 提交結果
///
/// 准入失敗以值返回，不是錯誤；只有格式錯誤的意圖和停機中的
/// 協調器才走 `Err`。
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum SubmitVerdict {
    /// 已接受並排隊
    #[serde(rename_all = "camelCase")]
    Accepted {
        trade_id: Uuid,
        /// 1-based 隊列位置
        queue_position: usize,
    },
    /// 准入拒絕 (重複、衝突或溢出)
    #[serde(rename_all = "camelCase")]
    Rejected { trade_id: Uuid, reason: RejectReason },
}

impl SubmitVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitVerdict::Accepted { .. })
    }

    pub fn trade_id(&self) -> Uuid {
        match self {
            SubmitVerdict::Accepted { trade_id, .. } => *trade_id,
            SubmitVerdict::Rejected { trade_id, .. } => *trade_id,
        }
    }
}

/// 准入拒絕原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    Duplicate,
    Conflict,
    Overflow,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Duplicate => write!(f, "DUPLICATE"),
            RejectReason::Conflict => write!(f, "CONFLICT"),
            RejectReason::Overflow => write!(f, "OVERFLOW"),
        }
    }
}

/// 撤單結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelVerdict {
    /// 仍在隊列中，撤回成功
    Cancelled,
    /// 已出隊 (執行中) 或已終態，不可撤回
    TooLate,
    /// 找不到這筆交易
    NotFound,
}

impl std::fmt::Display for CancelVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelVerdict::Cancelled => write!(f, "cancelled"),
            CancelVerdict::TooLate => write!(f, "too_late"),
            CancelVerdict::NotFound => write!(f, "not_found"),
        }
    }
}

/// 隊列狀態快照
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    /// 存活隊列深度 (不含墓碑)
    pub queue_depth: usize,
    /// 最老的排隊意圖已等待的毫秒數；隊列為空時為 null
    pub oldest_wait_time: Option<u64>,
    /// 當前被持有的 symbol locks
    pub locked_symbols: Vec<SymbolLockInfo>,
}

/// 協調器統計
#[derive(Debug, Clone, Default)]
pub struct CoordinatorStats {
    pub submitted: u64,
    pub accepted: u64,
    pub rejected_duplicate: u64,
    pub rejected_conflict: u64,
    pub rejected_overflow: u64,
    pub cancelled: u64,
    pub dispatch: DispatcherStats,
    pub evicted_locks: u64,
    pub invalid_releases: u64,
    pub queue_depth: usize,
    /// 佔用容量槽的未終態交易數 (排隊中 + 執行中)
    pub outstanding: usize,
}

impl std::fmt::Display for CoordinatorStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Coordinator[submitted={}, accepted={}, dup={}, conflict={}, overflow={}, \
             cancelled={}, executed={}, failed={}, timed_out={}, evicted={}, depth={}, outstanding={}]",
            self.submitted,
            self.accepted,
            self.rejected_duplicate,
            self.rejected_conflict,
            self.rejected_overflow,
            self.cancelled,
            self.dispatch.executed,
            self.dispatch.failed,
            self.dispatch.timed_out,
            self.evicted_locks,
            self.queue_depth,
            self.outstanding
        )
    }
}

#[derive(Default)]
struct AdmissionCounters {
    submitted: AtomicU64,
    accepted: AtomicU64,
    rejected_duplicate: AtomicU64,
    rejected_conflict: AtomicU64,
    rejected_overflow: AtomicU64,
    cancelled: AtomicU64,
}

/// 交易協調器主結構
///
/// 所有依賴在建構時注入，可以在同一進程中建多個互不干擾的實例。
pub struct Coordinator {
    /// 配置
    config: AppConfig,
    /// Bot 註冊表
    registry: Arc<BotRegistry>,
    /// 執行記錄 + 篩查准入
    blotter: Arc<TradeBlotter>,
    /// 優先隊列
    queue: Arc<Mutex<IntentQueue>>,
    /// 新工作通知
    queue_notify: Arc<Notify>,
    /// Symbol lock 管理
    locks: Arc<SymbolLockManager>,
    /// 執行分發
    dispatcher: Arc<ExecutionDispatcher>,
    /// 准入統計
    counters: AdmissionCounters,
    /// 是否接受新提交
    accepting: AtomicBool,
    /// 是否已啟動
    started: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    /// 後台任務句柄
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    /// 創建協調器；配置無效時返回 `Validation` 錯誤
    pub fn new(config: AppConfig, executor: Arc<dyn TradeExecutor>) -> Result<Self> {
        if let Err(errors) = config.validate() {
            return Err(BatonError::Validation(errors.join("; ")));
        }

        let queue = Arc::new(Mutex::new(IntentQueue::new()));
        let queue_notify = Arc::new(Notify::new());
        let locks = Arc::new(SymbolLockManager::new(Duration::from_millis(
            config.locks.max_hold_ms,
        )));
        let blotter = Arc::new(TradeBlotter::new(
            config.queue.capacity,
            config.queue.history_capacity,
        ));
        let dispatcher = Arc::new(ExecutionDispatcher::new(
            queue.clone(),
            queue_notify.clone(),
            locks.clone(),
            blotter.clone(),
            executor,
            config.dispatcher.clone(),
            &config.locks,
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            registry: Arc::new(BotRegistry::new()),
            blotter,
            queue,
            queue_notify,
            locks,
            dispatcher,
            counters: AdmissionCounters::default(),
            accepting: AtomicBool::new(true),
            started: AtomicBool::new(false),
            shutdown_tx,
            shutdown_rx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    // ==================== 運行控制 ====================

    /// 啟動 worker pool 和過期鎖清掃
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Coordinator already started");
            return Ok(());
        }

        let mut tasks = self.tasks.lock().await;
        tasks.extend(self.dispatcher.spawn_workers(&self.shutdown_rx));
        tasks.push(self.spawn_housekeeping());

        info!(
            "Coordinator started: {} workers, capacity {}, lock sweep every {}ms",
            self.config.dispatcher.workers,
            self.config.queue.capacity,
            self.config.locks.sweep_interval_ms
        );
        Ok(())
    }

    /// 停機：停收新單、等 worker 結束、把沒分發的交易標記失敗
    pub async fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            warn!("Shutdown already requested, ignoring");
            return;
        }

        info!(
            "Coordinator shutting down: {} queued, {} outstanding",
            self.queue.lock().await.len(),
            self.blotter.outstanding()
        );

        let _ = self.shutdown_tx.send(true);
        self.queue_notify.notify_waiters();

        // 在執行中的那筆最多還要等一個執行超時加鎖等待
        let drain_timeout = Duration::from_millis(
            self.config.dispatcher.execution_timeout_ms
                + self.config.locks.acquire_timeout_ms
                + 500,
        );

        let mut tasks = self.tasks.lock().await;
        for mut task in tasks.drain(..) {
            if tokio::time::timeout(drain_timeout, &mut task).await.is_err() {
                warn!(
                    "Background task did not stop within {}ms, aborting",
                    drain_timeout.as_millis()
                );
                task.abort();
            }
        }
        drop(tasks);

        // 沒分發出去的交易也要到終態，否則容量槽和未終結條目會洩漏
        loop {
            let next = { self.queue.lock().await.pop_next() };
            let Some(entry) = next else { break };
            let trade_id = entry.intent.id;
            self.blotter
                .finalize(
                    trade_id,
                    TradeOutcome::Failed,
                    Some("coordinator shut down before dispatch".to_string()),
                    None,
                )
                .await;
            debug!("Trade {} failed, never dispatched before shutdown", trade_id);
        }

        info!("Coordinator stopped");
    }

    /// 過期鎖清掃循環
    fn spawn_housekeeping(&self) -> JoinHandle<()> {
        let locks = self.locks.clone();
        let blotter = self.blotter.clone();
        let sweep_interval = Duration::from_millis(self.config.locks.sweep_interval_ms);
        let max_hold_ms = self.config.locks.max_hold_ms;
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut sweep = interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = sweep.tick() => {
                        for evicted in locks.evict_stale().await {
                            // Holder id is the trade id of the in-flight trade
                            match Uuid::parse_str(&evicted.holder_id) {
                                Ok(trade_id) => {
                                    let failed = blotter
                                        .finalize(
                                            trade_id,
                                            TradeOutcome::Failed,
                                            Some(format!(
                                                "symbol lock on {} held for {}ms, beyond the {}ms maximum",
                                                evicted.symbol, evicted.held_ms, max_hold_ms
                                            )),
                                            None,
                                        )
                                        .await;
                                    if failed {
                                        warn!(
                                            "Trade {} failed by stale lock eviction on {}",
                                            trade_id, evicted.symbol
                                        );
                                    }
                                }
                                Err(_) => warn!(
                                    "Evicted lock on {} had non-trade holder {}",
                                    evicted.symbol, evicted.holder_id
                                ),
                            }
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Housekeeping loop stopped");
        })
    }

    // ==================== 提交與撤回 ====================

    /// 提交交易意圖
    ///
    /// 篩查、容量檢查和入隊在 symbol 的准入臨界區內原子完成；
    /// 整段期間持有隊列鎖，沿用 queue -> lane -> records 的鎖序。
    pub async fn submit_trade(&self, intent: TradeIntent) -> Result<SubmitVerdict> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(BatonError::ShuttingDown);
        }
        if let Err(reason) = intent.validate() {
            return Err(BatonError::Validation(reason));
        }

        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        let trade_id = intent.id;

        // 先拿隊列鎖再准入。准入成功到 push 之間沒有 await 點，
        // 呼叫方中途丟掉 future 也不會留下已佔容量卻不在隊列裡的交易。
        let mut queue = self.queue.lock().await;
        let record = self.blotter.screen_and_admit(&intent).await;

        match record.outcome {
            TradeOutcome::Accepted => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                let queue_position = queue.push(intent);
                drop(queue);
                self.queue_notify.notify_one();

                debug!(
                    "Trade {} accepted at queue position {}",
                    trade_id, queue_position
                );
                Ok(SubmitVerdict::Accepted {
                    trade_id,
                    queue_position,
                })
            }
            TradeOutcome::RejectedDuplicate => {
                self.counters
                    .rejected_duplicate
                    .fetch_add(1, Ordering::Relaxed);
                info!(
                    "Trade {} rejected as duplicate: {}",
                    trade_id,
                    record.error.as_deref().unwrap_or("-")
                );
                Ok(SubmitVerdict::Rejected {
                    trade_id,
                    reason: RejectReason::Duplicate,
                })
            }
            TradeOutcome::RejectedConflict => {
                self.counters
                    .rejected_conflict
                    .fetch_add(1, Ordering::Relaxed);
                info!(
                    "Trade {} rejected as conflicting: {}",
                    trade_id,
                    record.error.as_deref().unwrap_or("-")
                );
                Ok(SubmitVerdict::Rejected {
                    trade_id,
                    reason: RejectReason::Conflict,
                })
            }
            TradeOutcome::RejectedOverflow => {
                self.counters
                    .rejected_overflow
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Trade {} rejected, coordination capacity exhausted ({})",
                    trade_id,
                    self.blotter.capacity()
                );
                Ok(SubmitVerdict::Rejected {
                    trade_id,
                    reason: RejectReason::Overflow,
                })
            }
            other => Err(BatonError::Internal(format!(
                "unexpected admission outcome {other} for trade {trade_id}"
            ))),
        }
    }

    /// 撤回仍在隊列中的交易
    pub async fn cancel_trade(&self, trade_id: Uuid) -> CancelVerdict {
        let cancelled = { self.queue.lock().await.cancel(trade_id) };
        if cancelled {
            self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            if !self
                .blotter
                .finalize(trade_id, TradeOutcome::Cancelled, None, None)
                .await
            {
                warn!("Cancelled trade {} had no unresolved record", trade_id);
            }
            info!("Trade {} cancelled while queued", trade_id);
            return CancelVerdict::Cancelled;
        }

        match self.blotter.record(trade_id).await {
            Some(_) => CancelVerdict::TooLate,
            None => CancelVerdict::NotFound,
        }
    }

    // ==================== Bot 管理 ====================

    /// 註冊 bot，返回分配的 handle
    pub async fn register_bot(
        &self,
        bot_type: BotKind,
        trading_pair: &str,
        owner: Option<&str>,
        config: serde_json::Value,
    ) -> Result<BotHandle> {
        self.registry
            .register(bot_type, trading_pair, owner, config)
            .await
    }

    /// 更新 bot 狀態
    pub async fn update_bot_status(
        &self,
        bot_id: &str,
        status: BotStatus,
        detail: Option<&str>,
    ) -> Result<()> {
        self.registry.update_status(bot_id, status, detail).await
    }

    /// 註銷 bot，釋放它的 (type, pair, owner) 槽位
    pub async fn retire_bot(&self, bot_id: &str) -> Result<()> {
        self.registry.retire(bot_id).await
    }

    pub async fn bot(&self, bot_id: &str) -> Option<BotHandle> {
        self.registry.get(bot_id).await
    }

    pub async fn bots(&self) -> Vec<BotHandle> {
        self.registry.list().await
    }

    pub async fn bot_config(&self, bot_id: &str) -> Option<serde_json::Value> {
        self.registry.config(bot_id).await
    }

    // ==================== 查詢方法 ====================

    /// 隊列狀態：深度、最老等待時間、被鎖定的 symbols
    pub async fn queue_status(&self) -> QueueStatus {
        let (queue_depth, oldest) = {
            let queue = self.queue.lock().await;
            (queue.len(), queue.oldest_submitted_at())
        };
        let oldest_wait_time = oldest.map(|t| (Utc::now() - t).num_milliseconds().max(0) as u64);
        let locked_symbols = self.locks.locked().await;

        QueueStatus {
            queue_depth,
            oldest_wait_time,
            locked_symbols,
        }
    }

    pub async fn record(&self, trade_id: Uuid) -> Option<ExecutionRecord> {
        self.blotter.record(trade_id).await
    }

    /// 最近的執行記錄，新的在前
    pub async fn recent_records(&self, limit: usize) -> Vec<ExecutionRecord> {
        self.blotter.recent(limit).await
    }

    pub async fn stats(&self) -> CoordinatorStats {
        let queue_depth = { self.queue.lock().await.len() };
        CoordinatorStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            rejected_duplicate: self.counters.rejected_duplicate.load(Ordering::Relaxed),
            rejected_conflict: self.counters.rejected_conflict.load(Ordering::Relaxed),
            rejected_overflow: self.counters.rejected_overflow.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            dispatch: self.dispatcher.stats(),
            evicted_locks: self.locks.evicted_total(),
            invalid_releases: self.locks.invalid_release_total(),
            queue_depth,
            outstanding: self.blotter.outstanding(),
        }
    }

    // ==================== 訂閱 ====================

    /// 訂閱執行記錄流 (每次准入和終態轉換各一條)
    pub fn subscribe_records(&self) -> broadcast::Receiver<ExecutionRecord> {
        self.blotter.subscribe()
    }

    /// 訂閱 bot 生命週期事件
    pub fn subscribe_bot_events(&self) -> broadcast::Receiver<BotEvent> {
        self.registry.subscribe()
    }

    /// 訂閱 lock 生命週期事件
    pub fn subscribe_lock_events(&self) -> broadcast::Receiver<LockEvent> {
        self.locks.subscribe()
    }
}
