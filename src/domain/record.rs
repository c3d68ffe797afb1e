//! Execution records - 執行記錄

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::intent::{Side, TradeIntent};

/// 意圖的最終裁決
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeOutcome {
    /// 已入隊，等待執行
    Accepted,
    /// 拒絕：重複交易
    RejectedDuplicate,
    /// 拒絕：方向衝突
    RejectedConflict,
    /// 拒絕：隊列已滿
    RejectedOverflow,
    /// 出隊前被撤回
    Cancelled,
    /// 執行成功
    Executed,
    /// 執行失敗
    Failed,
}

impl TradeOutcome {
    /// Terminal outcomes never change again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TradeOutcome::Accepted)
    }

    /// Admission-time rejections (never reach the queue)
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            TradeOutcome::RejectedDuplicate
                | TradeOutcome::RejectedConflict
                | TradeOutcome::RejectedOverflow
        )
    }
}

impl std::fmt::Display for TradeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeOutcome::Accepted => write!(f, "ACCEPTED"),
            TradeOutcome::RejectedDuplicate => write!(f, "REJECTED_DUPLICATE"),
            TradeOutcome::RejectedConflict => write!(f, "REJECTED_CONFLICT"),
            TradeOutcome::RejectedOverflow => write!(f, "REJECTED_OVERFLOW"),
            TradeOutcome::Cancelled => write!(f, "CANCELLED"),
            TradeOutcome::Executed => write!(f, "EXECUTED"),
            TradeOutcome::Failed => write!(f, "FAILED"),
        }
    }
}

/// 執行記錄 - 協調核心返回給外部協作者的裁決
///
/// 在意圖被篩查時創建；`Accepted` 記錄之後恰好被終結一次。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    /// 原始意圖 ID
    pub trade_intent_id: Uuid,
    /// 交易對
    pub symbol: String,
    /// 買/賣方向
    pub side: Side,
    /// 數量
    pub quantity: Decimal,
    /// 提交的 Bot ID
    pub source_bot_id: String,
    /// 裁決時間
    pub decided_at: DateTime<Utc>,
    /// 裁決結果
    pub outcome: TradeOutcome,
    /// 執行完成時間
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    /// 錯誤信息 (原樣記錄外部執行器的報錯)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionRecord {
    /// Record for an intent admitted into the queue
    pub fn accepted(intent: &TradeIntent) -> Self {
        Self::with_outcome(intent, TradeOutcome::Accepted, None)
    }

    /// Record for an intent turned away at screening
    pub fn rejected(intent: &TradeIntent, outcome: TradeOutcome, reason: impl Into<String>) -> Self {
        debug_assert!(outcome.is_rejection());
        Self::with_outcome(intent, outcome, Some(reason.into()))
    }

    fn with_outcome(intent: &TradeIntent, outcome: TradeOutcome, error: Option<String>) -> Self {
        Self {
            trade_intent_id: intent.id,
            symbol: intent.symbol.clone(),
            side: intent.side,
            quantity: intent.quantity,
            source_bot_id: intent.source_bot_id.clone(),
            decided_at: Utc::now(),
            outcome,
            executed_at: None,
            error,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome.is_terminal()
    }
}
