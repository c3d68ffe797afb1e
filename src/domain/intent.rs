//! Trade intent types - 交易意圖

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Trade side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The opposing side, used for conflict screening
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// 交易意圖 - Bot 提交給協調核心的下單請求
///
/// 創建後不可變，以 `id` 作為唯一身份。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeIntent {
    /// 意圖 ID (用於追蹤)
    pub id: Uuid,
    /// 交易對 (e.g., "BTCUSDT")
    pub symbol: String,
    /// 買/賣方向
    pub side: Side,
    /// 數量 (必須 > 0)
    pub quantity: Decimal,
    /// 參考價格 (可選)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    /// 優先級 (數字越大越優先)
    #[serde(default)]
    pub priority: i32,
    /// 提交的 Bot ID
    pub source_bot_id: String,
    /// 提交時間
    pub submitted_at: DateTime<Utc>,
    /// 測試標記 (模擬執行，不觸及真實交易所)
    #[serde(default)]
    pub test_flag: bool,
}

impl TradeIntent {
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        source_bot_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            side,
            quantity,
            price: None,
            priority: 0,
            source_bot_id: source_bot_id.into(),
            submitted_at: Utc::now(),
            test_flag: false,
        }
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_test_flag(mut self, test_flag: bool) -> Self {
        self.test_flag = test_flag;
        self
    }

    /// Basic field validation before admission
    pub fn validate(&self) -> Result<(), String> {
        if self.symbol.trim().is_empty() {
            return Err("symbol must not be empty".to_string());
        }
        if self.quantity <= Decimal::ZERO {
            return Err(format!("quantity must be positive, got {}", self.quantity));
        }
        if let Some(price) = self.price {
            if price <= Decimal::ZERO {
                return Err(format!("price must be positive, got {price}"));
            }
        }
        if self.source_bot_id.trim().is_empty() {
            return Err("sourceBotId must not be empty".to_string());
        }
        Ok(())
    }

    /// 訂單價值 (報價幣種)，無參考價時為 None
    pub fn notional_value(&self) -> Option<Decimal> {
        self.price.map(|p| p * self.quantity)
    }
}
