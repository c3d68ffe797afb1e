//! Trade Blotter
//!
//! Execution record store. Each symbol has an admission lane whose mutex is
//! the screening critical section, so two conflicting intents can never both
//! pass screening. Records live in a bounded recent-history window and every
//! transition is broadcast to subscribers (the results channel).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use super::queue::CapacityGate;
use super::screen::{CollisionDetector, UnresolvedTrade};
use crate::domain::{ExecutionRecord, TradeIntent, TradeOutcome};

struct SymbolLane {
    unresolved: Vec<UnresolvedTrade>,
}

struct RecordWindow {
    capacity: usize,
    by_id: HashMap<Uuid, ExecutionRecord>,
    order: VecDeque<Uuid>,
}

impl RecordWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            by_id: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn insert(&mut self, record: ExecutionRecord) {
        if self.by_id.len() >= self.capacity {
            self.evict_one_terminal();
        }
        self.order.push_back(record.trade_intent_id);
        self.by_id.insert(record.trade_intent_id, record);
    }

    /// Drop the oldest terminal record. Unresolved records are pinned; they
    /// rotate to the back and the window may briefly exceed capacity when
    /// everything outstanding is unresolved.
    fn evict_one_terminal(&mut self) {
        for _ in 0..self.order.len() {
            let Some(id) = self.order.pop_front() else {
                return;
            };
            match self.by_id.get(&id) {
                Some(record) if record.is_resolved() => {
                    self.by_id.remove(&id);
                    return;
                }
                Some(_) => self.order.push_back(id),
                None => return,
            }
        }
        debug!("Record window over capacity with nothing terminal to evict");
    }
}

/// Record store plus admission screening for the coordination core
pub struct TradeBlotter {
    lanes: DashMap<String, Arc<Mutex<SymbolLane>>>,
    records: RwLock<RecordWindow>,
    slots: CapacityGate,
    record_tx: broadcast::Sender<ExecutionRecord>,
}

impl TradeBlotter {
    pub fn new(capacity: usize, history_capacity: usize) -> Self {
        let (record_tx, _) = broadcast::channel(256);
        Self {
            lanes: DashMap::new(),
            records: RwLock::new(RecordWindow::new(history_capacity)),
            slots: CapacityGate::new(capacity),
            record_tx,
        }
    }

    /// Subscribe to execution record transitions
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionRecord> {
        self.record_tx.subscribe()
    }

    /// Screen an intent and, if clear and capacity allows, admit it.
    ///
    /// Screening, the capacity check, and the unresolved-set insert happen
    /// under the symbol's lane mutex as one atomic admission step. Both
    /// guards are taken before any state changes, so the admission writes
    /// run without an await point in between and a caller that drops the
    /// future mid-call leaves no partial admission behind. The returned
    /// record's outcome tells the caller what happened; rejections are
    /// terminal on arrival and reserve no capacity.
    ///
    /// An intent whose id already has a record in the window is the same
    /// trade submitted again (identity is the id). The resubmission is
    /// rejected as a duplicate and the stored record stays untouched.
    pub async fn screen_and_admit(&self, intent: &TradeIntent) -> ExecutionRecord {
        let lane = self.lane(&intent.symbol);
        let mut lane = lane.lock().await;
        let mut records = self.records.write().await;

        if let Some(existing) = records.by_id.get(&intent.id) {
            debug!(
                "Trade {} resubmitted while its record is {}, rejecting the replay",
                intent.id, existing.outcome
            );
            return ExecutionRecord::rejected(
                intent,
                TradeOutcome::RejectedDuplicate,
                format!("trade {} was already submitted", intent.id),
            );
        }

        let verdict = CollisionDetector::screen(intent, &lane.unresolved);
        if let Some(outcome) = verdict.rejection() {
            let reason = verdict
                .rejection_reason()
                .unwrap_or_else(|| "screening rejection".to_string());
            let record = ExecutionRecord::rejected(intent, outcome, reason);
            return self.publish(&mut records, record);
        }

        if !self.slots.try_reserve() {
            let record = ExecutionRecord::rejected(
                intent,
                TradeOutcome::RejectedOverflow,
                format!("queue at capacity ({})", self.slots.capacity()),
            );
            return self.publish(&mut records, record);
        }

        lane.unresolved.push(UnresolvedTrade::of(intent));
        let record = ExecutionRecord::accepted(intent);
        self.publish(&mut records, record)
    }

    /// Move an admitted record to a terminal outcome.
    ///
    /// First write wins: returns false when the record is unknown or already
    /// terminal. A win removes the unresolved entry and releases the
    /// capacity slot exactly once.
    pub async fn finalize(
        &self,
        trade_intent_id: Uuid,
        outcome: TradeOutcome,
        error: Option<String>,
        executed_at: Option<DateTime<Utc>>,
    ) -> bool {
        debug_assert!(outcome.is_terminal());

        // Cheap read to locate the symbol and skip records already resolved.
        let symbol = {
            let records = self.records.read().await;
            match records.by_id.get(&trade_intent_id) {
                Some(record) if !record.is_resolved() => record.symbol.clone(),
                _ => return false,
            }
        };

        let lane = self.lane(&symbol);
        let mut lane = lane.lock().await;

        let updated = {
            let mut records = self.records.write().await;
            match records.by_id.get_mut(&trade_intent_id) {
                Some(record) if !record.is_resolved() => {
                    record.outcome = outcome;
                    record.error = error;
                    record.executed_at = executed_at;
                    Some(record.clone())
                }
                _ => None,
            }
        };
        let Some(record) = updated else {
            // Lost the race with another finalizer
            return false;
        };

        lane.unresolved
            .retain(|entry| entry.trade_intent_id != trade_intent_id);
        drop(lane);

        self.slots.release();
        let _ = self.record_tx.send(record);
        true
    }

    pub async fn record(&self, trade_intent_id: Uuid) -> Option<ExecutionRecord> {
        let records = self.records.read().await;
        records.by_id.get(&trade_intent_id).cloned()
    }

    /// Most recent records, newest first
    pub async fn recent(&self, limit: usize) -> Vec<ExecutionRecord> {
        let records = self.records.read().await;
        records
            .order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| records.by_id.get(id).cloned())
            .collect()
    }

    /// Unresolved trades currently admitted for a symbol
    pub async fn unresolved(&self, symbol: &str) -> Vec<UnresolvedTrade> {
        // Clone the lane handle out before awaiting; a map guard held across
        // the lock await would block admissions on other symbols.
        let lane = self.lanes.get(symbol).map(|entry| entry.value().clone());
        match lane {
            Some(lane) => lane.lock().await.unresolved.clone(),
            None => Vec::new(),
        }
    }

    /// Outstanding (queued + in-flight) intents holding capacity slots
    pub fn outstanding(&self) -> usize {
        self.slots.used()
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    fn lane(&self, symbol: &str) -> Arc<Mutex<SymbolLane>> {
        self.lanes
            .entry(symbol.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(SymbolLane {
                    unresolved: Vec::new(),
                }))
            })
            .value()
            .clone()
    }

    /// Store a fresh record under the held window guard and publish it.
    fn publish(&self, records: &mut RecordWindow, record: ExecutionRecord) -> ExecutionRecord {
        records.insert(record.clone());
        let _ = self.record_tx.send(record.clone());
        record
    }
}
