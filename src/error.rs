use thiserror::Error;

/// Main error type for the coordination core
#[derive(Error, Debug)]
pub enum BatonError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    Validation(String),

    // Bot registry errors
    #[error("Duplicate registration: {bot_type} on {trading_pair} already active")]
    DuplicateRegistration {
        bot_type: String,
        trading_pair: String,
    },

    #[error("Unknown bot: {bot_id}")]
    UnknownBot { bot_id: String },

    // Symbol lock errors
    #[error("Lock acquisition timed out for {symbol} after {waited_ms}ms")]
    LockTimeout { symbol: String, waited_ms: u64 },

    #[error("Invalid lock release for {symbol} (lock id {lock_id})")]
    InvalidRelease { symbol: String, lock_id: u64 },

    // Coordinator state errors
    #[error("Coordinator is shutting down")]
    ShuttingDown,

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for BatonError
pub type Result<T> = std::result::Result<T, BatonError>;
