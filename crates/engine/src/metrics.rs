//! Point-in-time metrics bundle and trend classification

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::indicators::{
    self, last_value, MacdSeries, ATR_PERIOD, CCI_PERIOD, MACD_FAST, MACD_SIGNAL, MACD_SLOW,
    RSI_PERIOD,
};
use crate::types::{Candle, MaBasis, Trend};
use crate::volume::{self, SessionPace};

/// Tolerated pullback below the fast MA that still counts as an uptrend
const PULLBACK_TOLERANCE: f64 = 0.995;
/// Tolerated bounce above the fast MA that still counts as a downtrend
const BOUNCE_TOLERANCE: f64 = 1.005;

/// Indicator snapshot at the last candle of a series. Unavailable indicators are `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub last_close: f64,
    pub rsi: Option<f64>,
    pub cci: Option<f64>,
    pub atr: Option<f64>,
    pub atr_pct: Option<f64>,
    pub vol_delta: Option<f64>,
    pub rel_vol_speed: Option<f64>,
    pub session_volume: Option<f64>,
    pub avg_session_volume: Option<f64>,
    pub ma_fast: Option<f64>,
    pub ma_slow: Option<f64>,
    pub ma_basis: MaBasis,
    pub trend: Trend,
    pub trend_emoji: String,
    pub macd: MacdSeries,
    pub earnings_str: String,
}

impl Metrics {
    /// Compute the full metrics bundle; `None` for an empty series
    pub fn compute(
        candles: &[Candle],
        next_earnings: Option<NaiveDate>,
        today: NaiveDate,
        ma_basis: MaBasis,
    ) -> Option<Self> {
        let last_close = candles.last()?.close;
        let closes = indicators::closes(candles);

        let rsi = last_value(&indicators::rsi(&closes, RSI_PERIOD));
        let cci = last_value(&indicators::cci(candles, CCI_PERIOD));
        let atr = last_value(&indicators::atr(candles, ATR_PERIOD));
        let atr_pct = atr.filter(|_| last_close != 0.0).map(|a| a / last_close * 100.0);

        let ma_fast = trailing_mean(&closes, ma_basis.fast_period());
        let ma_slow = trailing_mean(&closes, ma_basis.slow_period());
        let trend = classify_trend(last_close, ma_fast, ma_slow);

        let mut metrics = Self {
            last_close,
            rsi,
            cci,
            atr,
            atr_pct,
            vol_delta: volume::volume_delta(candles),
            rel_vol_speed: None,
            session_volume: None,
            avg_session_volume: None,
            ma_fast,
            ma_slow,
            ma_basis,
            trend,
            trend_emoji: trend.emoji().to_string(),
            macd: indicators::macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL),
            earnings_str: earnings_label(next_earnings, today),
        };
        metrics.set_session_pace(volume::session_pace(candles));
        Some(metrics)
    }

    /// Replace the volume pace fields, e.g. with a pace measured over a
    /// history deeper than the snapshot's own candles
    pub fn set_session_pace(&mut self, pace: Option<SessionPace>) {
        self.rel_vol_speed = pace.and_then(|p| p.speed);
        self.session_volume = pace.map(|p| p.session_volume);
        self.avg_session_volume = pace.and_then(|p| p.avg_session_volume);
    }
}

/// Trend of a series using only its closes, as of its last candle
pub fn compute_trend(candles: &[Candle], ma_basis: MaBasis) -> Trend {
    let Some(last) = candles.last() else {
        return Trend::Sideways;
    };
    let closes = indicators::closes(candles);
    classify_trend(
        last.close,
        trailing_mean(&closes, ma_basis.fast_period()),
        trailing_mean(&closes, ma_basis.slow_period()),
    )
}

/// Classify from last close and the fast/slow MAs. Strict alignment is tried
/// before the tolerant pullback/bounce rules; the first match wins.
pub fn classify_trend(last_close: f64, fast: Option<f64>, slow: Option<f64>) -> Trend {
    let (Some(fast), Some(slow)) = (fast, slow) else {
        return Trend::Sideways;
    };

    if last_close > fast && fast > slow {
        Trend::Uptrend
    } else if last_close < fast && fast < slow {
        Trend::Downtrend
    } else if fast > slow && last_close >= fast * PULLBACK_TOLERANCE {
        Trend::Uptrend
    } else if fast < slow && last_close <= fast * BOUNCE_TOLERANCE {
        Trend::Downtrend
    } else {
        Trend::Sideways
    }
}

/// Mean of the last `period` values
pub fn trailing_mean(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Human-readable distance to the next earnings date
pub fn earnings_label(next_earnings: Option<NaiveDate>, today: NaiveDate) -> String {
    match next_earnings {
        Some(date) => {
            let days = (date - today).num_days();
            if days >= 0 {
                format!("in {} days", days)
            } else {
                format!("{} days ago", days.abs())
            }
        }
        None => "n/a".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn make_candles(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                timestamp: (i as i64) * 86_400,
                open: c,
                high: c + 1.0,
                low: c - 1.0,
                close: c,
                volume: 1_000.0 + i as f64,
            })
            .collect()
    }

    #[test]
    fn test_strict_trends() {
        assert_eq!(classify_trend(110.0, Some(105.0), Some(100.0)), Trend::Uptrend);
        assert_eq!(classify_trend(90.0, Some(95.0), Some(100.0)), Trend::Downtrend);
    }

    #[test]
    fn test_tolerant_pullback_boundary() {
        let fast = 105.0;
        assert_eq!(
            classify_trend(fast * 0.995, Some(fast), Some(100.0)),
            Trend::Uptrend
        );
        assert_eq!(
            classify_trend(fast * 0.995 - 0.01, Some(fast), Some(100.0)),
            Trend::Sideways
        );
    }

    #[test]
    fn test_tolerant_bounce_boundary() {
        let fast = 95.0;
        assert_eq!(
            classify_trend(fast * 1.005, Some(fast), Some(100.0)),
            Trend::Downtrend
        );
        assert_eq!(
            classify_trend(fast * 1.005 + 0.01, Some(fast), Some(100.0)),
            Trend::Sideways
        );
    }

    #[test]
    fn test_tied_averages_are_sideways() {
        assert_eq!(classify_trend(120.0, Some(100.0), Some(100.0 * 1.0)), Trend::Sideways);
        assert_eq!(classify_trend(80.0, Some(100.0), Some(100.0)), Trend::Sideways);
    }

    #[test]
    fn test_missing_averages_are_sideways() {
        assert_eq!(classify_trend(120.0, None, Some(100.0)), Trend::Sideways);
        assert_eq!(classify_trend(120.0, Some(110.0), None), Trend::Sideways);
    }

    #[test]
    fn test_earnings_label() {
        let upcoming = NaiveDate::from_ymd_opt(2024, 3, 11);
        let past = NaiveDate::from_ymd_opt(2024, 2, 27);
        assert_eq!(earnings_label(upcoming, today()), "in 10 days");
        assert_eq!(earnings_label(past, today()), "3 days ago");
        assert_eq!(earnings_label(Some(today()), today()), "in 0 days");
        assert_eq!(earnings_label(None, today()), "n/a");
    }

    #[test]
    fn test_rising_series_is_uptrend() {
        let closes: Vec<f64> = (0..300).map(|i| 100.0 + i as f64 * 0.5).collect();
        let metrics = Metrics::compute(&make_candles(&closes), None, today(), MaBasis::Short).unwrap();
        assert_eq!(metrics.trend, Trend::Uptrend);
        assert_eq!(metrics.last_close, 249.5);
        assert!(metrics.rsi.unwrap() > 70.0);
        assert!((metrics.atr.unwrap() - 2.0).abs() < 1e-9);
        assert!((metrics.atr_pct.unwrap() - 2.0 / 249.5 * 100.0).abs() < 1e-9);
        assert_eq!(metrics.earnings_str, "n/a");
    }

    #[test]
    fn test_flat_series() {
        let metrics = Metrics::compute(&make_candles(&[100.0; 60]), None, today(), MaBasis::Short).unwrap();
        assert_eq!(metrics.trend, Trend::Sideways);
        assert_eq!(metrics.rsi, Some(50.0));
        assert_eq!(metrics.cci, None);
    }

    #[test]
    fn test_identical_bars_have_zero_atr() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| Candle {
                timestamp: i * 86_400,
                open: 100.0,
                high: 100.0,
                low: 100.0,
                close: 100.0,
                volume: 5_000.0,
            })
            .collect();
        let metrics = Metrics::compute(&candles, None, today(), MaBasis::Short).unwrap();
        assert_eq!(metrics.atr, Some(0.0));
        assert_eq!(metrics.atr_pct, Some(0.0));
        assert_eq!(metrics.rsi, Some(50.0));
        assert_eq!(metrics.cci, None);
        assert_eq!(metrics.ma_fast, Some(100.0));
        assert_eq!(metrics.ma_slow, Some(100.0));
        assert_eq!(metrics.trend, Trend::Sideways);
        assert_eq!(metrics.vol_delta, Some(0.0));
    }

    #[test]
    fn test_serializes_camel_case() {
        let metrics = Metrics::compute(&make_candles(&[100.0; 30]), None, today(), MaBasis::Short).unwrap();
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["lastClose"], 100.0);
        assert_eq!(json["maBasis"], "20-50");
        assert_eq!(json["earningsStr"], "n/a");
        assert!(json.get("last_close").is_none());
    }

    #[test]
    fn test_short_series_degrades_to_none() {
        let metrics = Metrics::compute(&make_candles(&[10.0, 11.0, 12.0]), None, today(), MaBasis::Short).unwrap();
        assert_eq!(metrics.rsi, None);
        assert_eq!(metrics.atr, None);
        assert_eq!(metrics.atr_pct, None);
        assert_eq!(metrics.ma_fast, None);
        assert_eq!(metrics.trend, Trend::Sideways);
        assert_eq!(metrics.macd.line.len(), 3);
        assert!(Metrics::compute(&[], None, today(), MaBasis::Short).is_none());
    }

    #[test]
    fn test_medium_basis_needs_longer_history() {
        let closes: Vec<f64> = (0..100).map(|i| 100.0 + i as f64).collect();
        let candles = make_candles(&closes);
        assert_eq!(compute_trend(&candles, MaBasis::Short), Trend::Uptrend);
        assert_eq!(compute_trend(&candles, MaBasis::Medium), Trend::Sideways);
    }
}
