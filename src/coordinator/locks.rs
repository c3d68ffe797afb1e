//! Symbol Lock Manager
//!
//! Exclusive per-symbol execution rights. Workers wait up to a timeout for
//! the symbol to come free; releases are validated by lock id so a foreign
//! or repeated release is detected instead of silently corrupting state.
//! A periodic sweep force-releases locks held past the configured maximum.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex, Notify};
use tracing::{debug, error, warn};

use crate::error::{BatonError, Result};

/// Lock token handed to the acquiring worker.
///
/// Deliberately not `Clone`: there is exactly one token per live lock and
/// release consumes its validity.
#[derive(Debug)]
pub struct SymbolLock {
    pub symbol: String,
    pub holder_id: String,
    pub lock_id: u64,
    pub acquired_at: DateTime<Utc>,
}

/// Snapshot of a held lock, surfaced through queue status
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolLockInfo {
    pub symbol: String,
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
}

/// A lock force-released by the stale sweep
#[derive(Debug, Clone)]
pub struct EvictedLock {
    pub symbol: String,
    pub holder_id: String,
    pub lock_id: u64,
    pub held_ms: u64,
}

/// Lock lifecycle events for observability collaborators
#[derive(Debug, Clone)]
pub enum LockEvent {
    Acquired {
        symbol: String,
        holder_id: String,
        lock_id: u64,
    },
    Released {
        symbol: String,
        holder_id: String,
        lock_id: u64,
        held_ms: u64,
    },
    Evicted {
        symbol: String,
        holder_id: String,
        lock_id: u64,
        held_ms: u64,
    },
    InvalidRelease {
        symbol: String,
        lock_id: u64,
    },
}

#[derive(Debug)]
struct HolderInfo {
    holder_id: String,
    lock_id: u64,
    acquired_at: DateTime<Utc>,
    acquired_mono: Instant,
}

struct SymbolSlot {
    state: Mutex<Option<HolderInfo>>,
    notify: Notify,
}

impl SymbolSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(None),
            notify: Notify::new(),
        }
    }
}

/// Per-symbol lock table. Acquiring one symbol never contends with another.
pub struct SymbolLockManager {
    slots: DashMap<String, Arc<SymbolSlot>>,
    next_lock_id: AtomicU64,
    max_hold: Duration,
    event_tx: broadcast::Sender<LockEvent>,
    evicted_count: AtomicU64,
    invalid_release_count: AtomicU64,
}

impl SymbolLockManager {
    pub fn new(max_hold: Duration) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            slots: DashMap::new(),
            // Lock ids start at 1 so 0 can never match a live lock
            next_lock_id: AtomicU64::new(1),
            max_hold,
            event_tx,
            evicted_count: AtomicU64::new(0),
            invalid_release_count: AtomicU64::new(0),
        }
    }

    /// Subscribe to lock lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<LockEvent> {
        self.event_tx.subscribe()
    }

    /// Wait up to `timeout` for exclusive rights on `symbol`.
    pub async fn acquire(
        &self,
        symbol: &str,
        holder_id: &str,
        timeout: Duration,
    ) -> Result<SymbolLock> {
        let slot = self.slot(symbol);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before inspecting state so a release landing
            // between the check and the await cannot be missed.
            let notified = slot.notify.notified();

            {
                let mut state = slot.state.lock().await;
                if state.is_none() {
                    let lock_id = self.next_lock_id.fetch_add(1, Ordering::SeqCst);
                    let acquired_at = Utc::now();
                    *state = Some(HolderInfo {
                        holder_id: holder_id.to_string(),
                        lock_id,
                        acquired_at,
                        acquired_mono: Instant::now(),
                    });
                    drop(state);

                    debug!(
                        "Symbol lock acquired: {} by {} (lock id {})",
                        symbol, holder_id, lock_id
                    );
                    let _ = self.event_tx.send(LockEvent::Acquired {
                        symbol: symbol.to_string(),
                        holder_id: holder_id.to_string(),
                        lock_id,
                    });

                    return Ok(SymbolLock {
                        symbol: symbol.to_string(),
                        holder_id: holder_id.to_string(),
                        lock_id,
                        acquired_at,
                    });
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(BatonError::LockTimeout {
                    symbol: symbol.to_string(),
                    waited_ms: timeout.as_millis() as u64,
                });
            }
        }
    }

    /// Release a previously acquired lock.
    ///
    /// Releasing a lock that is no longer held (or was never held by this
    /// token) returns `InvalidRelease`; callers log and continue.
    pub async fn release(&self, lock: &SymbolLock) -> Result<()> {
        let slot = self.slots.get(&lock.symbol).map(|e| e.value().clone());
        let Some(slot) = slot else {
            return Err(self.note_invalid_release(&lock.symbol, lock.lock_id));
        };

        let mut state = slot.state.lock().await;
        let held_by_token = state
            .as_ref()
            .map_or(false, |holder| holder.lock_id == lock.lock_id);

        if !held_by_token {
            drop(state);
            return Err(self.note_invalid_release(&lock.symbol, lock.lock_id));
        }

        if let Some(holder) = state.take() {
            let held_ms = holder.acquired_mono.elapsed().as_millis() as u64;
            drop(state);
            slot.notify.notify_one();

            debug!(
                "Symbol lock released: {} by {} after {}ms",
                lock.symbol, holder.holder_id, held_ms
            );
            let _ = self.event_tx.send(LockEvent::Released {
                symbol: lock.symbol.clone(),
                holder_id: holder.holder_id,
                lock_id: holder.lock_id,
                held_ms,
            });
        }

        Ok(())
    }

    /// Force-release every lock held past `max_hold`.
    ///
    /// Returns the evicted holders so the caller can fail their in-flight
    /// trades.
    pub async fn evict_stale(&self) -> Vec<EvictedLock> {
        // Clone the slot handles first; holding a map guard across an await
        // would block unrelated symbols.
        let slots: Vec<(String, Arc<SymbolSlot>)> = self
            .slots
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut evicted = Vec::new();
        for (symbol, slot) in slots {
            let mut state = slot.state.lock().await;
            let stale = state
                .as_ref()
                .map_or(false, |holder| holder.acquired_mono.elapsed() >= self.max_hold);
            if !stale {
                continue;
            }

            if let Some(holder) = state.take() {
                let held_ms = holder.acquired_mono.elapsed().as_millis() as u64;
                drop(state);
                slot.notify.notify_one();

                warn!(
                    "Evicting stale symbol lock: {} held by {} for {}ms (max {}ms)",
                    symbol,
                    holder.holder_id,
                    held_ms,
                    self.max_hold.as_millis()
                );
                self.evicted_count.fetch_add(1, Ordering::Relaxed);
                let _ = self.event_tx.send(LockEvent::Evicted {
                    symbol: symbol.clone(),
                    holder_id: holder.holder_id.clone(),
                    lock_id: holder.lock_id,
                    held_ms,
                });

                evicted.push(EvictedLock {
                    symbol,
                    holder_id: holder.holder_id,
                    lock_id: holder.lock_id,
                    held_ms,
                });
            }
        }

        evicted
    }

    /// Snapshot of currently held locks
    pub async fn locked(&self) -> Vec<SymbolLockInfo> {
        let slots: Vec<(String, Arc<SymbolSlot>)> = self
            .slots
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut held = Vec::new();
        for (symbol, slot) in slots {
            let state = slot.state.lock().await;
            if let Some(holder) = state.as_ref() {
                held.push(SymbolLockInfo {
                    symbol,
                    holder_id: holder.holder_id.clone(),
                    acquired_at: holder.acquired_at,
                });
            }
        }
        held
    }

    pub async fn is_locked(&self, symbol: &str) -> bool {
        // Bind first so the map guard drops before the await.
        let slot = self.slots.get(symbol).map(|e| e.value().clone());
        match slot {
            Some(slot) => slot.state.lock().await.is_some(),
            None => false,
        }
    }

    pub fn evicted_total(&self) -> u64 {
        self.evicted_count.load(Ordering::Relaxed)
    }

    pub fn invalid_release_total(&self) -> u64 {
        self.invalid_release_count.load(Ordering::Relaxed)
    }

    fn slot(&self, symbol: &str) -> Arc<SymbolSlot> {
        self.slots
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(SymbolSlot::new()))
            .value()
            .clone()
    }

    fn note_invalid_release(&self, symbol: &str, lock_id: u64) -> BatonError {
        self.invalid_release_count.fetch_add(1, Ordering::Relaxed);
        error!(
            "Invalid release for symbol {} (lock id {}): lock not held by this token",
            symbol, lock_id
        );
        let _ = self.event_tx.send(LockEvent::InvalidRelease {
            symbol: symbol.to_string(),
            lock_id,
        });
        BatonError::InvalidRelease {
            symbol: symbol.to_string(),
            lock_id,
        }
    }
}
