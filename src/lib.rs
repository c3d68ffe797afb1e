pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod logging;
pub mod sim;

pub use config::AppConfig;
pub use coordinator::{
    CancelVerdict, Coordinator, CoordinatorStats, ExecutionReceipt, QueueStatus, RejectReason,
    SubmitVerdict, TradeExecutor,
};
pub use domain::{BotHandle, BotKind, BotStatus, ExecutionRecord, Side, TradeIntent, TradeOutcome};
pub use error::{BatonError, Result};
pub use sim::{SimulatedExecutor, SimulatorConfig};
