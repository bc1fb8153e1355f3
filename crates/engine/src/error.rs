//! Error taxonomy for analysis and backtest requests

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No data for ticker {ticker} ({range})")]
    NoData { ticker: String, range: String },

    #[error("Not enough data for {operation}: need at least {required} candles, got {actual}")]
    InsufficientHistory {
        operation: &'static str,
        required: usize,
        actual: usize,
    },

    #[error("Unsupported range '{0}' (expected one of 5m, 15m, 1h, 1d, 1w)")]
    InvalidRange(String),

    #[error("Unsupported moving-average basis '{0}' (expected 20-50 or 50-150)")]
    InvalidMaBasis(String),

    /// Upstream market-data failure, passed through with its original message
    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
