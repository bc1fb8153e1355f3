//! Yahoo Finance public API client (no authentication required)

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::{MarketDataProvider, TickerInfo, TickerSuggestion, MAX_SUGGESTIONS};
use crate::types::{Candle, HistoryDepth, Range};

pub const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";
const USER_AGENT: &str = concat!("stock-scope/", env!("CARGO_PKG_VERSION"));

/// Yahoo Finance market data client
#[derive(Clone)]
pub struct YahooClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartEnvelope,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    result: Option<Vec<ChartResult>>,
    error: Option<ApiFault>,
}

#[derive(Debug, Deserialize)]
struct ApiFault {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    long_name: Option<String>,
    short_name: Option<String>,
    chart_previous_close: Option<f64>,
    previous_close: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<QuoteColumns>,
}

/// Column-oriented OHLCV; gaps come back as `null`
#[derive(Debug, Default, Deserialize)]
struct QuoteColumns {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryResponse {
    quote_summary: SummaryEnvelope,
}

#[derive(Debug, Deserialize)]
struct SummaryEnvelope {
    result: Option<Vec<SummaryResult>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryResult {
    calendar_events: Option<CalendarEvents>,
}

#[derive(Debug, Deserialize)]
struct CalendarEvents {
    earnings: Option<EarningsEvents>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EarningsEvents {
    #[serde(default)]
    earnings_date: Vec<RawTimestamp>,
}

#[derive(Debug, Deserialize)]
struct RawTimestamp {
    raw: i64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    quotes: Vec<SearchQuote>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchQuote {
    symbol: Option<String>,
    #[serde(rename = "shortname")]
    short_name: Option<String>,
    #[serde(rename = "longname")]
    long_name: Option<String>,
    exch_disp: Option<String>,
    exchange: Option<String>,
}

impl YahooClient {
    /// Create a client against the public Yahoo endpoint
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Create a client against a custom endpoint, e.g. a caching proxy
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// `{base_url}/{prefix}/{ticker}` with the ticker percent-encoded as one path segment
    fn symbol_url(&self, prefix: &[&str], ticker: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid Yahoo Finance base URL {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Yahoo Finance base URL cannot take a path"))?
            .pop_if_empty()
            .extend(prefix)
            .push(ticker);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, query: &[(&str, &str)]) -> Result<T> {
        let response = self.client.get(url).query(query).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Yahoo Finance API error {}: {}", status, body);
        }

        Ok(response.json().await?)
    }

    async fn chart(&self, ticker: &str, range: &str, interval: &str) -> Result<ChartResult> {
        let url = self.symbol_url(&["v8", "finance", "chart"], ticker)?;
        let response: ChartResponse = self
            .get_json(url, &[("range", range), ("interval", interval)])
            .await?;
        first_chart_result(response, ticker)
    }
}

fn first_chart_result(response: ChartResponse, ticker: &str) -> Result<ChartResult> {
    if let Some(fault) = response.chart.error {
        anyhow::bail!(
            "Yahoo Finance chart error for {}: {} {}",
            ticker,
            fault.code.unwrap_or_default(),
            fault.description.unwrap_or_default()
        );
    }
    response
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .with_context(|| format!("Yahoo Finance returned no chart for {}", ticker))
}

/// Zip the quote columns into candles, dropping rows with a missing or
/// non-finite price. Missing volume counts as zero.
fn chart_candles(result: &ChartResult) -> Vec<Candle> {
    let Some(q) = result.indicators.quote.first() else {
        return Vec::new();
    };
    let at = |col: &[Option<f64>], i: usize| col.get(i).copied().flatten();

    result
        .timestamp
        .iter()
        .enumerate()
        .filter_map(|(i, &timestamp)| {
            let candle = Candle {
                timestamp,
                open: at(&q.open, i)?,
                high: at(&q.high, i)?,
                low: at(&q.low, i)?,
                close: at(&q.close, i)?,
                volume: at(&q.volume, i).filter(|v| v.is_finite()).unwrap_or(0.0),
            };
            candle.is_finite().then_some(candle)
        })
        .collect()
}

#[async_trait]
impl MarketDataProvider for YahooClient {
    async fn fetch_candles(
        &self,
        ticker: &str,
        range: Range,
        depth: HistoryDepth,
    ) -> Result<Vec<Candle>> {
        let lookback = range.lookback(depth);
        debug!(ticker, range = %range, lookback, "Fetching candles from Yahoo Finance");
        let result = self
            .chart(ticker, lookback, range.provider_interval())
            .await?;
        let candles = chart_candles(&result);
        debug!(
            count = candles.len(),
            raw = result.timestamp.len(),
            "Fetched candles"
        );
        Ok(candles)
    }

    async fn fetch_earnings_date(&self, ticker: &str) -> Result<Option<NaiveDate>> {
        let url = self.symbol_url(&["v10", "finance", "quoteSummary"], ticker)?;
        let response: SummaryResponse = self.get_json(url, &[("modules", "calendarEvents")]).await?;
        Ok(earliest_earnings(response))
    }

    async fn fetch_ticker_info(&self, ticker: &str) -> Result<TickerInfo> {
        let result = self.chart(ticker, "1d", "1d").await?;
        let meta = result.meta;
        Ok(TickerInfo {
            company_name: meta.long_name.or(meta.short_name),
            previous_close: meta.previous_close.or(meta.chart_previous_close),
        })
    }

    async fn search(&self, query: &str) -> Result<Vec<TickerSuggestion>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let url = Url::parse(&format!("{}/v1/finance/search", self.base_url))?;
        let count = MAX_SUGGESTIONS.to_string();
        let response: SearchResponse = self
            .get_json(
                url,
                &[("q", query), ("quotesCount", count.as_str()), ("newsCount", "0")],
            )
            .await?;
        Ok(suggestions(response))
    }
}

fn earliest_earnings(response: SummaryResponse) -> Option<NaiveDate> {
    response
        .quote_summary
        .result?
        .into_iter()
        .next()?
        .calendar_events?
        .earnings?
        .earnings_date
        .iter()
        .map(|d| d.raw)
        .min()
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .map(|d| d.date_naive())
}

fn suggestions(response: SearchResponse) -> Vec<TickerSuggestion> {
    response
        .quotes
        .into_iter()
        .filter_map(|q| {
            let symbol = q.symbol?;
            Some(TickerSuggestion {
                name: q.long_name.or(q.short_name).unwrap_or_else(|| symbol.clone()),
                exchange: q.exch_disp.or(q.exchange).unwrap_or_default(),
                symbol,
            })
        })
        .take(MAX_SUGGESTIONS)
        .collect()
}
