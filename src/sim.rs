//! Simulated trade execution
//!
//! Executor used by the stress binary and integration tests: random latency
//! inside a configured band, a configurable failure rate, and a deny-list of
//! symbols that always fail. Intents carrying `test_flag` fill instantly and
//! bypass both latency and failure injection.

use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::coordinator::{ExecutionReceipt, TradeExecutor};
use crate::domain::TradeIntent;

/// Tuning for the simulated executor
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    /// Probability in [0, 1] that an execution fails
    pub failure_rate: f64,
    /// Symbols whose executions always fail
    pub fail_symbols: Vec<String>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            min_latency_ms: 5,
            max_latency_ms: 50,
            failure_rate: 0.0,
            fail_symbols: Vec::new(),
        }
    }
}

/// Fills everything it is asked to, modulo the configured failures
pub struct SimulatedExecutor {
    config: SimulatorConfig,
    order_seq: AtomicU64,
}

impl SimulatedExecutor {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            order_seq: AtomicU64::new(1),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(SimulatorConfig::default())
    }

    fn next_order_id(&self) -> String {
        format!("SIM-{:08}", self.order_seq.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl TradeExecutor for SimulatedExecutor {
    async fn execute(&self, intent: &TradeIntent) -> anyhow::Result<ExecutionReceipt> {
        if intent.test_flag {
            return Ok(ExecutionReceipt {
                exchange_order_id: Some(self.next_order_id()),
                filled_quantity: intent.quantity,
                avg_fill_price: intent.price,
            });
        }

        // ThreadRng is not Send; draw everything before sleeping
        let (latency_ms, inject_failure) = {
            let mut rng = rand::thread_rng();
            let latency_ms = if self.config.max_latency_ms > self.config.min_latency_ms {
                rng.gen_range(self.config.min_latency_ms..=self.config.max_latency_ms)
            } else {
                self.config.min_latency_ms
            };
            let inject_failure =
                self.config.failure_rate > 0.0 && rng.gen::<f64>() < self.config.failure_rate;
            (latency_ms, inject_failure)
        };

        tokio::time::sleep(Duration::from_millis(latency_ms)).await;

        if self
            .config
            .fail_symbols
            .iter()
            .any(|symbol| symbol == &intent.symbol)
        {
            anyhow::bail!("venue rejected {}: symbol unavailable", intent.symbol);
        }
        if inject_failure {
            anyhow::bail!("simulated venue failure for {}", intent.symbol);
        }

        let order_id = self.next_order_id();
        debug!(
            "Simulated fill {} for trade {} after {}ms",
            order_id, intent.id, latency_ms
        );
        Ok(ExecutionReceipt {
            exchange_order_id: Some(order_id),
            filled_quantity: intent.quantity,
            avg_fill_price: intent.price,
        })
    }
}
