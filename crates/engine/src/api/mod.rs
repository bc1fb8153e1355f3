//! Market data providers

pub mod yahoo;

pub use yahoo::YahooClient;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::{Candle, HistoryDepth, Range};

/// Company details shown next to the chart
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickerInfo {
    pub company_name: Option<String>,
    pub previous_close: Option<f64>,
}

/// One entry of a symbol lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerSuggestion {
    pub symbol: String,
    pub name: String,
    pub exchange: String,
}

/// Most suggestions returned for one lookup
pub const MAX_SUGGESTIONS: usize = 8;

/// Source of candles and company data. Implementations drop candles with
/// non-finite prices and return them in chronological order.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Candles at `range`'s interval, spanning the lookback `depth` selects
    async fn fetch_candles(
        &self,
        ticker: &str,
        range: Range,
        depth: HistoryDepth,
    ) -> Result<Vec<Candle>>;

    async fn fetch_earnings_date(&self, ticker: &str) -> Result<Option<NaiveDate>>;

    async fn fetch_ticker_info(&self, ticker: &str) -> Result<TickerInfo>;

    async fn search(&self, query: &str) -> Result<Vec<TickerSuggestion>>;
}
