//! Stock Scope Engine — technical analysis and retracement backtesting
//!
//! Provides:
//! - RSI, CCI, ATR, moving averages, MACD and volume-flow indicators
//! - Trend classification and trade plans (ATR offsets or Fibonacci retracement)
//! - Support/resistance clustering
//! - Bar-by-bar Fibonacci retracement backtest
//! - Yahoo Finance client behind the `MarketDataProvider` trait

pub mod api;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod levels;
pub mod metrics;
pub mod plan;
pub mod service;
pub mod types;
pub mod volume;

// Re-exports for convenience
pub use api::{MarketDataProvider, TickerInfo, TickerSuggestion, YahooClient};
pub use engine::BacktestEngine;
pub use error::{EngineError, EngineResult};
pub use levels::{key_levels, support_resistance, KeyLevels, LevelKind, SrConfig, SrLevel};
pub use metrics::Metrics;
pub use plan::{build_insight, position_size, Bias, Confidence, FibLevels, Plan};
pub use service::{analyze, backtest, AnalysisOptions, AnalysisReport};
pub use types::*;
pub use volume::FlowSeries;
