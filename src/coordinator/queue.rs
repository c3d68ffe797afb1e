//! Intent Queue - 優先級意圖隊列

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::TradeIntent;

/// 包裝 TradeIntent 以支持優先級排序
#[derive(Debug)]
pub struct QueuedIntent {
    pub intent: TradeIntent,
    /// 用於相同優先級時的 FIFO 排序
    pub sequence: u64,
    /// 鎖超時後的重新入隊次數
    pub lock_retries: u32,
}

impl PartialEq for QueuedIntent {
    fn eq(&self, other: &Self) -> bool {
        self.intent.priority == other.intent.priority && self.sequence == other.sequence
    }
}

impl Eq for QueuedIntent {}

impl PartialOrd for QueuedIntent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedIntent {
    fn cmp(&self, other: &Self) -> Ordering {
        // 優先級數字越大越優先
        match self.intent.priority.cmp(&other.intent.priority) {
            Ordering::Equal => {
                // 相同優先級，先進先出 (sequence 越小越早)
                other.sequence.cmp(&self.sequence)
            }
            ord => ord,
        }
    }
}

/// 意圖隊列 - 基於優先級的待執行交易排隊系統
///
/// 撤單以墓碑方式處理：被取消的條目留在堆中，出隊時跳過。
pub struct IntentQueue {
    /// 優先級堆
    heap: BinaryHeap<QueuedIntent>,
    /// 序列號計數器
    sequence_counter: u64,
    /// 仍在隊列中的 ID
    queued_ids: HashSet<Uuid>,
    /// 已取消、等待出隊時跳過的 ID
    cancelled_ids: HashSet<Uuid>,
    /// 統計：已入隊數量
    enqueued_count: u64,
    /// 統計：已出隊數量
    dequeued_count: u64,
    /// 統計：已取消數量
    cancelled_count: u64,
    /// 統計：重新入隊數量
    requeued_count: u64,
}

impl IntentQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            sequence_counter: 0,
            queued_ids: HashSet::new(),
            cancelled_ids: HashSet::new(),
            enqueued_count: 0,
            dequeued_count: 0,
            cancelled_count: 0,
            requeued_count: 0,
        }
    }

    /// 入隊並返回 1-based 隊列位置
    ///
    /// 容量由 [`CapacityGate`] 在准入時把關，隊列本身不拒絕。
    pub fn push(&mut self, intent: TradeIntent) -> usize {
        let sequence = self.sequence_counter;
        self.sequence_counter += 1;

        debug!(
            "Enqueuing trade intent {} from bot {} with priority {}",
            intent.id, intent.source_bot_id, intent.priority
        );

        let position = 1 + self.live_ahead_of(intent.priority, sequence);
        self.queued_ids.insert(intent.id);
        self.heap.push(QueuedIntent {
            intent,
            sequence,
            lock_retries: 0,
        });
        self.enqueued_count += 1;

        position
    }

    /// 鎖超時後放回隊列，保留原 sequence 以維持 FIFO 位置
    pub fn requeue(&mut self, mut entry: QueuedIntent) {
        entry.lock_retries += 1;
        debug!(
            "Requeuing trade intent {} after lock timeout (attempt {})",
            entry.intent.id, entry.lock_retries
        );
        self.queued_ids.insert(entry.intent.id);
        self.heap.push(entry);
        self.requeued_count += 1;
    }

    /// 取出下一個要執行的意圖
    pub fn pop_next(&mut self) -> Option<QueuedIntent> {
        // 跳過已取消的墓碑條目
        while let Some(entry) = self.heap.pop() {
            if self.cancelled_ids.remove(&entry.intent.id) {
                debug!("Skipping cancelled trade intent {}", entry.intent.id);
                continue;
            }

            self.queued_ids.remove(&entry.intent.id);
            self.dequeued_count += 1;
            return Some(entry);
        }

        None
    }

    /// 撤回仍在隊列中的意圖；已出隊的返回 false
    pub fn cancel(&mut self, intent_id: Uuid) -> bool {
        if self.queued_ids.remove(&intent_id) {
            self.cancelled_ids.insert(intent_id);
            self.cancelled_count += 1;
            true
        } else {
            false
        }
    }

    /// 查看隊列頭部 (不移除)
    pub fn peek(&self) -> Option<&TradeIntent> {
        // 頭部可能是墓碑，線性掃描找最優的存活條目
        self.heap
            .iter()
            .filter(|e| !self.cancelled_ids.contains(&e.intent.id))
            .max()
            .map(|e| &e.intent)
    }

    /// 存活隊列長度 (不含墓碑)
    pub fn len(&self) -> usize {
        self.queued_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued_ids.is_empty()
    }

    /// 最早提交的存活意圖的提交時間
    pub fn oldest_submitted_at(&self) -> Option<DateTime<Utc>> {
        self.heap
            .iter()
            .filter(|e| !self.cancelled_ids.contains(&e.intent.id))
            .map(|e| e.intent.submitted_at)
            .min()
    }

    fn live_ahead_of(&self, priority: i32, sequence: u64) -> usize {
        self.heap
            .iter()
            .filter(|e| !self.cancelled_ids.contains(&e.intent.id))
            .filter(|e| {
                e.intent.priority > priority
                    || (e.intent.priority == priority && e.sequence < sequence)
            })
            .count()
    }

    /// 獲取隊列統計
    pub fn stats(&self) -> IntentQueueStats {
        IntentQueueStats {
            depth: self.queued_ids.len(),
            tombstones: self.cancelled_ids.len(),
            enqueued_total: self.enqueued_count,
            dequeued_total: self.dequeued_count,
            cancelled_total: self.cancelled_count,
            requeued_total: self.requeued_count,
        }
    }
}

impl Default for IntentQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// 隊列統計
#[derive(Debug, Clone)]
pub struct IntentQueueStats {
    pub depth: usize,
    pub tombstones: usize,
    pub enqueued_total: u64,
    pub dequeued_total: u64,
    pub cancelled_total: u64,
    pub requeued_total: u64,
}

impl std::fmt::Display for IntentQueueStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Queue[depth={}, tomb={}, enq={}, deq={}, cancel={}, requeue={}]",
            self.depth,
            self.tombstones,
            self.enqueued_total,
            self.dequeued_total,
            self.cancelled_total,
            self.requeued_total
        )
    }
}

/// Bounds outstanding (queued + in-flight) intents.
///
/// Reserved at admission, released exactly once when the record reaches a
/// terminal outcome.
pub struct CapacityGate {
    capacity: usize,
    used: AtomicUsize,
}

impl CapacityGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: AtomicUsize::new(0),
        }
    }

    /// Take one slot; false means the gate is full (overflow rejection).
    pub fn try_reserve(&self) -> bool {
        let mut current = self.used.load(AtomicOrdering::SeqCst);
        loop {
            if current >= self.capacity {
                return false;
            }
            match self.used.compare_exchange(
                current,
                current + 1,
                AtomicOrdering::SeqCst,
                AtomicOrdering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Give one slot back.
    pub fn release(&self) {
        let mut current = self.used.load(AtomicOrdering::SeqCst);
        loop {
            if current == 0 {
                warn!("Capacity gate released below zero; ignoring");
                return;
            }
            match self.used.compare_exchange(
                current,
                current - 1,
                AtomicOrdering::SeqCst,
                AtomicOrdering::SeqCst,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn used(&self) -> usize {
        self.used.load(AtomicOrdering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.used())
    }
}
