//! Execution Coordination - 交易執行協調
//!
//! 提供多 bot 共用的碰撞篩查、容量准入、優先隊列、symbol 互斥
//! 和執行分發。所有交易意圖透過 [`Coordinator`] 提交。

mod blotter;
mod coordinator;
mod dispatcher;
mod locks;
mod queue;
mod registry;
mod screen;
mod traits;

pub use blotter::TradeBlotter;
pub use coordinator::{
    CancelVerdict, Coordinator, CoordinatorStats, QueueStatus, RejectReason, SubmitVerdict,
};
pub use dispatcher::{DispatcherStats, ExecutionDispatcher};
pub use locks::{EvictedLock, LockEvent, SymbolLock, SymbolLockInfo, SymbolLockManager};
pub use queue::{CapacityGate, IntentQueue, IntentQueueStats, QueuedIntent};
pub use registry::{BotEvent, BotRegistry};
pub use screen::{CollisionDetector, ScreenVerdict, UnresolvedTrade};
pub use traits::{ExecutionReceipt, TradeExecutor};
