//! Request orchestration: fetch from a provider, then run the pure engines

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::{MarketDataProvider, TickerInfo};
use crate::engine::BacktestEngine;
use crate::error::{EngineError, EngineResult};
use crate::levels::{key_levels, support_resistance, KeyLevels, SrConfig, SrLevel};
use crate::metrics::Metrics;
use crate::plan::{build_insight, Plan};
use crate::types::{BacktestConfig, BacktestReport, Candle, HistoryDepth, MaBasis, Range};
use crate::volume::{session_pace, FlowSeries};

/// Per-request options for [`analyze`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisOptions {
    pub ma_basis: MaBasis,
}

/// Everything the chart and summary panels render for one ticker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub ticker: String,
    pub range: Range,
    pub metrics: Metrics,
    pub plan: Plan,
    pub candles: Vec<Candle>,
    pub company_name: Option<String>,
    pub price_change: Option<f64>,
    pub price_change_percent: Option<f64>,
    pub sr_levels: Vec<SrLevel>,
    /// Candles the level clusterer saw; usually deeper than `candles`
    pub sr_history_bars: usize,
    pub key_levels: KeyLevels,
    pub flow: FlowSeries,
    pub insight: String,
}

/// Upper-cased, trimmed symbol as the provider expects it
pub fn normalize_ticker(ticker: &str) -> String {
    ticker.trim().to_uppercase()
}

async fn fetch_history(
    provider: &dyn MarketDataProvider,
    ticker: &str,
    range: Range,
    depth: HistoryDepth,
) -> EngineResult<Vec<Candle>> {
    let candles = provider.fetch_candles(ticker, range, depth).await?;
    if candles.is_empty() {
        return Err(EngineError::NoData {
            ticker: ticker.to_string(),
            range: range.to_string(),
        });
    }
    Ok(candles)
}

/// Fetch the chart candles, a deeper analysis history, company info and the
/// earnings date together, then compute metrics, plan, levels and flow series.
/// Only the chart fetch is required; the other lookups degrade, the deeper
/// history falling back to the chart candles.
pub async fn analyze(
    provider: &dyn MarketDataProvider,
    ticker: &str,
    range: Range,
    options: &AnalysisOptions,
) -> EngineResult<AnalysisReport> {
    let ticker = normalize_ticker(ticker);

    let (candles, deep, info, earnings) = tokio::join!(
        fetch_history(provider, &ticker, range, HistoryDepth::Chart),
        provider.fetch_candles(&ticker, range, HistoryDepth::Analysis),
        provider.fetch_ticker_info(&ticker),
        provider.fetch_earnings_date(&ticker),
    );
    let candles = candles?;
    let deep = deep.unwrap_or_else(|e| {
        warn!(ticker = %ticker, error = %e, "Analysis history unavailable");
        Vec::new()
    });
    let analysis_history = if deep.len() > candles.len() {
        deep.as_slice()
    } else {
        candles.as_slice()
    };
    let info = info.unwrap_or_else(|e| {
        warn!(ticker = %ticker, error = %e, "Ticker info unavailable");
        TickerInfo::default()
    });
    let earnings = earnings.unwrap_or_else(|e| {
        warn!(ticker = %ticker, error = %e, "Earnings date unavailable");
        None
    });

    let mut metrics =
        Metrics::compute(&candles, earnings, Utc::now().date_naive(), options.ma_basis)
            .ok_or_else(|| EngineError::NoData {
                ticker: ticker.clone(),
                range: range.to_string(),
            })?;
    metrics.set_session_pace(session_pace(analysis_history));
    let plan = Plan::build(&candles, &metrics);

    let history =
        &analysis_history[analysis_history.len().saturating_sub(range.sr_history_bars())..];
    let sr_history_bars = history.len();
    let sr_levels = support_resistance(history, &SrConfig::for_range(range));
    let key = key_levels(&sr_levels, metrics.last_close);

    let price_change = info.previous_close.map(|prev| metrics.last_close - prev);
    let price_change_percent = info
        .previous_close
        .filter(|prev| *prev != 0.0)
        .map(|prev| (metrics.last_close - prev) / prev * 100.0);

    info!(
        ticker = %ticker,
        range = %range,
        bars = candles.len(),
        history_bars = history.len(),
        trend = ?metrics.trend,
        levels = sr_levels.len(),
        "Analysis complete"
    );

    Ok(AnalysisReport {
        insight: build_insight(&metrics),
        flow: FlowSeries::compute(&candles),
        ticker,
        range,
        metrics,
        plan,
        candles,
        company_name: info.company_name,
        price_change,
        price_change_percent,
        sr_levels,
        sr_history_bars,
        key_levels: key,
    })
}

/// Fetch the ticker's backtest-depth history for `range` and replay the
/// retracement strategy
pub async fn backtest(
    provider: &dyn MarketDataProvider,
    ticker: &str,
    range: Range,
    config: &BacktestConfig,
) -> EngineResult<BacktestReport> {
    let ticker = normalize_ticker(ticker);
    let candles = fetch_history(provider, &ticker, range, HistoryDepth::Backtest).await?;
    BacktestEngine::run(config, &candles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TickerSuggestion;
    use crate::plan::Bias;
    use crate::types::Trend;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeProvider {
        candles: Vec<Candle>,
        /// Served for `HistoryDepth::Analysis`; falls back to `candles` when empty
        history: Vec<Candle>,
        info: Option<TickerInfo>,
        earnings: Option<NaiveDate>,
        fail_candles: bool,
        depths: Mutex<Vec<HistoryDepth>>,
    }

    #[async_trait]
    impl MarketDataProvider for FakeProvider {
        async fn fetch_candles(
            &self,
            _ticker: &str,
            _range: Range,
            depth: HistoryDepth,
        ) -> anyhow::Result<Vec<Candle>> {
            self.depths.lock().unwrap().push(depth);
            if self.fail_candles {
                anyhow::bail!("Yahoo Finance API error 500: upstream timeout");
            }
            if depth == HistoryDepth::Analysis && !self.history.is_empty() {
                return Ok(self.history.clone());
            }
            Ok(self.candles.clone())
        }

        async fn fetch_earnings_date(&self, _ticker: &str) -> anyhow::Result<Option<NaiveDate>> {
            Ok(self.earnings)
        }

        async fn fetch_ticker_info(&self, _ticker: &str) -> anyhow::Result<TickerInfo> {
            self.info
                .clone()
                .ok_or_else(|| anyhow::anyhow!("quote lookup failed"))
        }

        async fn search(&self, _query: &str) -> anyhow::Result<Vec<TickerSuggestion>> {
            Ok(Vec::new())
        }
    }

    fn rising(n: usize) -> Vec<Candle> {
        bars(n, 86_400)
    }

    fn bars(n: usize, spacing: i64) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let c = 100.0 + i as f64 * 0.5;
                Candle {
                    timestamp: 1_700_000_000 + i as i64 * spacing,
                    open: c - 0.25,
                    high: c + 1.0,
                    low: c - 1.0,
                    close: c,
                    volume: 1_000_000.0,
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_analyze_rising_series() {
        let provider = FakeProvider {
            candles: rising(300),
            info: Some(TickerInfo {
                company_name: Some("Acme Corp".to_string()),
                previous_close: Some(249.0),
            }),
            ..Default::default()
        };
        let report = analyze(&provider, " acme ", Range::OneDay, &AnalysisOptions::default())
            .await
            .unwrap();

        assert_eq!(report.ticker, "ACME");
        assert_eq!(report.metrics.trend, Trend::Uptrend);
        assert_eq!(report.plan.bias, Bias::Bullish);
        assert_eq!(report.company_name.as_deref(), Some("Acme Corp"));
        assert!((report.price_change.unwrap() - 0.5).abs() < 1e-9);
        assert!((report.price_change_percent.unwrap() - 0.5 / 249.0 * 100.0).abs() < 1e-9);
        assert_eq!(report.candles.len(), 300);
        assert_eq!(report.flow.obv.len(), 300);
        assert!(!report.sr_levels.is_empty());
        assert!(report.insight.starts_with("Overbought"));
    }

    #[tokio::test]
    async fn test_analyze_degrades_without_info() {
        let provider = FakeProvider {
            candles: rising(60),
            ..Default::default()
        };
        let report = analyze(&provider, "ACME", Range::OneHour, &AnalysisOptions::default())
            .await
            .unwrap();
        assert_eq!(report.company_name, None);
        assert_eq!(report.price_change, None);
        assert_eq!(report.metrics.earnings_str, "n/a");
    }

    #[tokio::test]
    async fn test_analyze_serializes_camel_case() {
        let provider = FakeProvider {
            candles: rising(80),
            ..Default::default()
        };
        let report = analyze(&provider, "ACME", Range::OneDay, &AnalysisOptions::default())
            .await
            .unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("companyName").is_some());
        assert!(json.get("srLevels").is_some());
        assert_eq!(json["range"], "1d");
        assert_eq!(json["metrics"]["lastClose"], 139.5);
        assert!(json["metrics"].get("last_close").is_none());
        assert!(json["plan"].get("target1").is_some());
        assert_eq!(json["srHistoryBars"], 80);
    }

    /// Hourly bars, seven per UTC day
    fn hourly(sessions: usize) -> Vec<Candle> {
        let mut out = bars(sessions * 7, 3_600);
        for (i, c) in out.iter_mut().enumerate() {
            let day = (i / 7) as i64;
            c.timestamp = 1_700_006_400 + day * 86_400 + (i % 7) as i64 * 3_600;
        }
        out
    }

    #[tokio::test]
    async fn test_levels_and_pace_use_deeper_history() {
        let chart = hourly(5);
        let provider = FakeProvider {
            candles: chart.clone(),
            history: hourly(150),
            ..Default::default()
        };
        let report = analyze(&provider, "ACME", Range::OneHour, &AnalysisOptions::default())
            .await
            .unwrap();

        assert_eq!(report.candles.len(), 35);
        assert_eq!(report.sr_history_bars, 900);
        assert!(report.sr_history_bars > report.candles.len());
        assert!(report.metrics.rel_vol_speed.is_some());
        assert_eq!(report.metrics.avg_session_volume, Some(7_000_000.0));

        let chart_only = Metrics::compute(&chart, None, Utc::now().date_naive(), MaBasis::Short).unwrap();
        assert_eq!(chart_only.rel_vol_speed, None);

        let mut depths = provider.depths.lock().unwrap().clone();
        depths.sort_by_key(|d| *d as u8);
        assert_eq!(depths, vec![HistoryDepth::Chart, HistoryDepth::Analysis]);
    }

    #[tokio::test]
    async fn test_shallow_analysis_history_falls_back_to_chart() {
        let provider = FakeProvider {
            candles: rising(120),
            history: rising(50),
            ..Default::default()
        };
        let report = analyze(&provider, "ACME", Range::OneDay, &AnalysisOptions::default())
            .await
            .unwrap();
        assert_eq!(report.sr_history_bars, 120);
    }

    #[tokio::test]
    async fn test_empty_history_is_no_data() {
        let provider = FakeProvider::default();
        let err = analyze(&provider, "NOPE", Range::OneDay, &AnalysisOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoData { .. }));
        assert_eq!(err.to_string(), "No data for ticker NOPE (1d)");
    }

    #[tokio::test]
    async fn test_provider_error_passes_through() {
        let provider = FakeProvider {
            fail_candles: true,
            ..Default::default()
        };
        let err = backtest(&provider, "ACME", Range::OneDay, &BacktestConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Provider(_)));
        assert_eq!(err.to_string(), "Yahoo Finance API error 500: upstream timeout");
    }

    #[tokio::test]
    async fn test_backtest_needs_history() {
        let provider = FakeProvider {
            candles: rising(100),
            ..Default::default()
        };
        let err = backtest(&provider, "ACME", Range::OneDay, &BacktestConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientHistory { actual: 100, .. }
        ));

        let provider = FakeProvider {
            candles: rising(200),
            ..Default::default()
        };
        let report = backtest(&provider, "ACME", Range::OneDay, &BacktestConfig::default())
            .await
            .unwrap();
        let s = report.stats;
        assert_eq!(s.wins + s.losses + s.no_exit, s.setups);
        assert_eq!(
            provider.depths.lock().unwrap().as_slice(),
            &[HistoryDepth::Backtest]
        );
    }
}
