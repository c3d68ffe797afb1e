//! Bot registry types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// Strategy family a bot instance belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BotKind {
    Grid,
    Dca,
    Macd,
    AiGrid,
    /// Strategy types this core does not know by name
    Custom(String),
}

impl std::fmt::Display for BotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotKind::Grid => write!(f, "GRID"),
            BotKind::Dca => write!(f, "DCA"),
            BotKind::Macd => write!(f, "MACD"),
            BotKind::AiGrid => write!(f, "AI_GRID"),
            BotKind::Custom(name) => write!(f, "{}", name),
        }
    }
}

impl FromStr for BotKind {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("bot type is empty");
        }

        match trimmed.to_ascii_uppercase().replace('-', "_").as_str() {
            "GRID" => Ok(BotKind::Grid),
            "DCA" => Ok(BotKind::Dca),
            "MACD" => Ok(BotKind::Macd),
            "AI_GRID" => Ok(BotKind::AiGrid),
            _ => Ok(BotKind::Custom(trimmed.to_string())),
        }
    }
}

// Wire format is a plain string (e.g. "GRID"), not an enum object.
impl Serialize for BotKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BotKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Bot lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BotStatus {
    /// Registered but not trading
    Idle,
    /// Actively producing trade intents
    Running,
    /// Temporarily suspended by its owner
    Paused,
    /// Stopped on an error condition
    Error,
}

impl BotStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, BotStatus::Running)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, BotStatus::Error)
    }
}

impl std::fmt::Display for BotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotStatus::Idle => write!(f, "idle"),
            BotStatus::Running => write!(f, "running"),
            BotStatus::Paused => write!(f, "paused"),
            BotStatus::Error => write!(f, "error"),
        }
    }
}

/// Handle for a registered bot instance
///
/// Handles are never deleted during the process lifetime; retirement only
/// flips `active` so historical attribution stays intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotHandle {
    pub id: String,
    pub bot_type: BotKind,
    pub trading_pair: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub status: BotStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_detail: Option<String>,
    pub last_updated: DateTime<Utc>,
    pub active: bool,
}
