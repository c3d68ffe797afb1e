//! Bot Registry
//!
//! Tracks registered bot instances and their lifecycle status. Status
//! changes are broadcast so observability collaborators can follow along.

use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{BotHandle, BotKind, BotStatus};
use crate::error::{BatonError, Result};

/// Registry events broadcast to listeners
#[derive(Debug, Clone)]
pub enum BotEvent {
    Registered {
        bot_id: String,
    },
    StatusChanged {
        bot_id: String,
        from: BotStatus,
        to: BotStatus,
        detail: Option<String>,
    },
    Retired {
        bot_id: String,
    },
}

#[derive(Debug, Clone)]
struct RegisteredBot {
    handle: BotHandle,
    /// Opaque per-bot configuration supplied at registration
    config: serde_json::Value,
}

/// Registry of known bot instances
pub struct BotRegistry {
    bots: RwLock<HashMap<String, RegisteredBot>>,
    event_tx: broadcast::Sender<BotEvent>,
}

impl BotRegistry {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            bots: RwLock::new(HashMap::new()),
            event_tx,
        }
    }

    /// Subscribe to registry events
    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.event_tx.subscribe()
    }

    /// Register a new bot instance in `IDLE` state.
    ///
    /// Fails with `DuplicateRegistration` when an active handle already
    /// exists for the same (type, pair, owner) triple.
    pub async fn register(
        &self,
        bot_type: BotKind,
        trading_pair: &str,
        owner: Option<&str>,
        config: serde_json::Value,
    ) -> Result<BotHandle> {
        let mut bots = self.bots.write().await;

        let already_active = bots.values().any(|bot| {
            bot.handle.active
                && bot.handle.bot_type == bot_type
                && bot.handle.trading_pair == trading_pair
                && bot.handle.owner.as_deref() == owner
        });
        if already_active {
            return Err(BatonError::DuplicateRegistration {
                bot_type: bot_type.to_string(),
                trading_pair: trading_pair.to_string(),
            });
        }

        let handle = BotHandle {
            id: Uuid::new_v4().to_string(),
            bot_type,
            trading_pair: trading_pair.to_string(),
            owner: owner.map(String::from),
            status: BotStatus::Idle,
            status_detail: None,
            last_updated: Utc::now(),
            active: true,
        };

        info!(
            "Registered bot {} ({} on {})",
            handle.id, handle.bot_type, handle.trading_pair
        );
        bots.insert(
            handle.id.clone(),
            RegisteredBot {
                handle: handle.clone(),
                config,
            },
        );
        let _ = self.event_tx.send(BotEvent::Registered {
            bot_id: handle.id.clone(),
        });

        Ok(handle)
    }

    /// Overwrite a bot's status, detail, and timestamp.
    pub async fn update_status(
        &self,
        bot_id: &str,
        status: BotStatus,
        detail: Option<&str>,
    ) -> Result<()> {
        let mut bots = self.bots.write().await;
        let Some(bot) = bots.get_mut(bot_id) else {
            return Err(BatonError::UnknownBot {
                bot_id: bot_id.to_string(),
            });
        };

        let from = bot.handle.status;
        bot.handle.status = status;
        bot.handle.status_detail = detail.map(String::from);
        bot.handle.last_updated = Utc::now();

        info!(
            "Bot {} status: {} -> {}{}",
            bot_id,
            from,
            status,
            detail.map(|d| format!(" ({})", d)).unwrap_or_default()
        );
        let _ = self.event_tx.send(BotEvent::StatusChanged {
            bot_id: bot_id.to_string(),
            from,
            to: status,
            detail: detail.map(String::from),
        });

        Ok(())
    }

    /// Mark a bot inactive. The handle stays queryable for attribution.
    pub async fn retire(&self, bot_id: &str) -> Result<()> {
        let mut bots = self.bots.write().await;
        let Some(bot) = bots.get_mut(bot_id) else {
            return Err(BatonError::UnknownBot {
                bot_id: bot_id.to_string(),
            });
        };

        if !bot.handle.active {
            debug!("Bot {} already retired", bot_id);
            return Ok(());
        }

        bot.handle.active = false;
        bot.handle.last_updated = Utc::now();
        info!("Retired bot {}", bot_id);
        let _ = self.event_tx.send(BotEvent::Retired {
            bot_id: bot_id.to_string(),
        });

        Ok(())
    }

    pub async fn get(&self, bot_id: &str) -> Option<BotHandle> {
        let bots = self.bots.read().await;
        bots.get(bot_id).map(|bot| bot.handle.clone())
    }

    /// The configuration blob supplied at registration
    pub async fn config(&self, bot_id: &str) -> Option<serde_json::Value> {
        let bots = self.bots.read().await;
        bots.get(bot_id).map(|bot| bot.config.clone())
    }

    pub async fn list(&self) -> Vec<BotHandle> {
        let bots = self.bots.read().await;
        bots.values().map(|bot| bot.handle.clone()).collect()
    }

    pub async fn active_count(&self) -> usize {
        let bots = self.bots.read().await;
        bots.values().filter(|bot| bot.handle.active).count()
    }
}

impl Default for BotRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn register_allocates_idle_handle() {
        let registry = BotRegistry::new();

        let handle = registry
            .register(BotKind::Grid, "BTCUSDT", None, json!({"grids": 12}))
            .await
            .unwrap();
        assert_eq!(handle.status, BotStatus::Idle);
        assert!(handle.active);

        let fetched = registry.get(&handle.id).await.unwrap();
        assert_eq!(fetched.trading_pair, "BTCUSDT");
        assert_eq!(registry.active_count().await, 1);
        assert_eq!(
            registry.config(&handle.id).await.unwrap(),
            json!({"grids": 12})
        );
    }

    #[tokio::test]
    async fn duplicate_active_registration_is_rejected() {
        let registry = BotRegistry::new();

        registry
            .register(BotKind::Dca, "ETHUSDT", Some("alice"), json!({}))
            .await
            .unwrap();

        let duplicate = registry
            .register(BotKind::Dca, "ETHUSDT", Some("alice"), json!({}))
            .await;
        assert!(matches!(
            duplicate,
            Err(BatonError::DuplicateRegistration { .. })
        ));

        // Same strategy and pair under a different owner is allowed
        registry
            .register(BotKind::Dca, "ETHUSDT", Some("bob"), json!({}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn retired_bot_frees_registration_slot() {
        let registry = BotRegistry::new();

        let first = registry
            .register(BotKind::Macd, "BTCUSDT", None, json!({}))
            .await
            .unwrap();
        registry.retire(&first.id).await.unwrap();
        assert!(!registry.get(&first.id).await.unwrap().active);

        // Retire is idempotent
        registry.retire(&first.id).await.unwrap();

        registry
            .register(BotKind::Macd, "BTCUSDT", None, json!({}))
            .await
            .unwrap();
        assert_eq!(registry.active_count().await, 1);
        assert_eq!(registry.list().await.len(), 2);
    }

    #[tokio::test]
    async fn update_status_emits_event() {
        let registry = BotRegistry::new();
        let handle = registry
            .register(BotKind::Grid, "BTCUSDT", None, json!({}))
            .await
            .unwrap();

        let mut events = registry.subscribe();
        registry
            .update_status(&handle.id, BotStatus::Running, Some("warmup done"))
            .await
            .unwrap();

        let updated = registry.get(&handle.id).await.unwrap();
        assert_eq!(updated.status, BotStatus::Running);
        assert_eq!(updated.status_detail.as_deref(), Some("warmup done"));

        let event = events.recv().await.unwrap();
        match event {
            BotEvent::StatusChanged { bot_id, from, to, .. } => {
                assert_eq!(bot_id, handle.id);
                assert_eq!(from, BotStatus::Idle);
                assert_eq!(to, BotStatus::Running);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_bot_is_an_error() {
        let registry = BotRegistry::new();
        assert!(matches!(
            registry
                .update_status("missing", BotStatus::Running, None)
                .await,
            Err(BatonError::UnknownBot { .. })
        ));
        assert!(registry.get("missing").await.is_none());
    }
}
