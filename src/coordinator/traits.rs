//! Core traits for the execution coordination core

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::TradeIntent;

/// 成交回報
///
/// 執行端完成一筆交易後回傳的摘要。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReceipt {
    /// 交易所訂單 ID (模擬執行時可為空)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_order_id: Option<String>,
    /// 實際成交數量
    pub filled_quantity: Decimal,
    /// 平均成交價
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_fill_price: Option<Decimal>,
}

impl ExecutionReceipt {
    /// 全數成交、無價格資訊的回報
    pub fn filled(quantity: Decimal) -> Self {
        Self {
            exchange_order_id: None,
            filled_quantity: quantity,
            avg_fill_price: None,
        }
    }
}

/// 交易執行端 trait
///
/// Dispatcher 透過這個 trait 把已取得 symbol lock 的交易意圖
/// 送往實際的執行端 (交易所 adapter、模擬器等)。實作必須:
/// - Send + Sync (worker pool 之間共享)
/// - 以 Err 回報失敗, 不可 panic
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    /// 執行一筆交易意圖
    ///
    /// Ok(receipt) 表示成交。Err 表示執行失敗,
    /// 錯誤訊息會一字不改寫入 ExecutionRecord.error。
    async fn execute(&self, intent: &TradeIntent) -> anyhow::Result<ExecutionReceipt>;
}
