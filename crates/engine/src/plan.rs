//! Trade plan builder: ATR offsets in a trend, Fibonacci retracement in a range

use serde::{Deserialize, Serialize};

use crate::metrics::Metrics;
use crate::types::{Candle, Trend};

/// Lookback of the adaptive swing; the window spans three lookbacks
pub const SWING_LOOKBACK: usize = 14;

/// ATR substituted when the series has no usable ATR
const FALLBACK_ATR: f64 = 1.0;

/// Fibonacci retracement levels of a swing, measured down from the high
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FibLevels {
    #[serde(rename = "0%")]
    pub level_0: f64,
    #[serde(rename = "23.6%")]
    pub level_236: f64,
    #[serde(rename = "38.2%")]
    pub level_382: f64,
    #[serde(rename = "50%")]
    pub level_500: f64,
    #[serde(rename = "61.8%")]
    pub level_618: f64,
    #[serde(rename = "100%")]
    pub level_1000: f64,
}

impl FibLevels {
    pub fn from_swing(low: f64, high: f64) -> Self {
        let span = high - low;
        Self {
            level_0: high,
            level_236: high - 0.236 * span,
            level_382: high - 0.382 * span,
            level_500: (low + high) / 2.0,
            level_618: high - 0.618 * span,
            level_1000: low,
        }
    }
}

/// Price extremes of a window and the bars where they occurred
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Swing {
    pub low: f64,
    pub high: f64,
    pub low_index: usize,
    pub high_index: usize,
}

impl Swing {
    pub fn span(&self) -> f64 {
        self.high - self.low
    }

    pub fn fib_levels(&self) -> FibLevels {
        FibLevels::from_swing(self.low, self.high)
    }
}

/// Absolute highest high and lowest low over the trailing `3 * lookback` bars.
///
/// The two extremes are located independently, so the low may come after the
/// high; the retracement drawn from them is a display aid rather than a
/// chronological leg.
pub fn adaptive_swing(candles: &[Candle], lookback: usize) -> Option<Swing> {
    let span = candles.len().min(lookback * 3);
    let start = candles.len() - span;
    let window = candles.get(start..)?;
    let first = window.first()?;

    let mut swing = Swing {
        low: first.low,
        high: first.high,
        low_index: start,
        high_index: start,
    };
    for (offset, c) in window.iter().enumerate().skip(1) {
        if c.high > swing.high {
            swing.high = c.high;
            swing.high_index = start + offset;
        }
        if c.low < swing.low {
            swing.low = c.low;
            swing.low_index = start + offset;
        }
    }
    Some(swing)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bias {
    Bullish,
    Bearish,
    Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
}

impl Confidence {
    pub fn stars(self) -> &'static str {
        match self {
            Confidence::High => "⭐⭐⭐",
            Confidence::Medium => "⭐⭐",
        }
    }
}

/// Entry, stop and two targets for the current snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub entry: f64,
    pub stop: f64,
    pub target1: f64,
    pub target2: f64,
    pub bias: Bias,
    pub confidence: Confidence,
    /// Retracement of the adaptive swing, attached for the chart overlay
    pub fib: FibLevels,
}

impl Plan {
    pub fn build(candles: &[Candle], metrics: &Metrics) -> Self {
        let close = metrics.last_close;
        let swing = adaptive_swing(candles, SWING_LOOKBACK).unwrap_or(Swing {
            low: close,
            high: close,
            low_index: 0,
            high_index: 0,
        });
        let fib = swing.fib_levels();
        let atr = metrics
            .atr
            .filter(|a| a.is_finite() && *a > 0.0)
            .unwrap_or(FALLBACK_ATR);

        match metrics.trend {
            Trend::Uptrend => Self {
                entry: close - atr * 0.5,
                stop: close - atr * 1.5,
                target1: close + atr * 0.5,
                target2: close + atr * 1.5,
                bias: Bias::Bullish,
                confidence: if metrics.rsi.is_some_and(|r| r < 70.0) {
                    Confidence::High
                } else {
                    Confidence::Medium
                },
                fib,
            },
            // Tighter than the long side on purpose
            Trend::Downtrend => Self {
                entry: close - atr * 0.2,
                stop: close + atr * 0.1,
                target1: close - atr * 0.3,
                target2: close - atr * 0.5,
                bias: Bias::Bearish,
                confidence: if metrics.rsi.is_some_and(|r| r > 30.0) {
                    Confidence::High
                } else {
                    Confidence::Medium
                },
                fib,
            },
            Trend::Sideways => Self {
                entry: fib.level_500,
                stop: fib.level_618,
                target1: fib.level_382,
                target2: fib.level_236,
                bias: Bias::Range,
                confidence: Confidence::Medium,
                fib,
            },
        }
    }
}

/// One-line reading of the metrics for the summary panel
pub fn build_insight(metrics: &Metrics) -> String {
    let mut parts: Vec<&str> = Vec::new();
    match metrics.trend {
        Trend::Uptrend => parts.push(if metrics.rsi.is_some_and(|r| r > 70.0) {
            "Overbought – wait for pullback (Fib 38.2 / 50)."
        } else {
            "Healthy uptrend – watch 50% retrace for entry."
        }),
        Trend::Downtrend => parts.push(if metrics.rsi.is_some_and(|r| r < 30.0) {
            "Oversold – bounce risk; target 38.2%."
        } else {
            "Downtrend – look for rally to 50% for short."
        }),
        Trend::Sideways => parts.push("Range – fade extremes near 61.8% / 38.2%."),
    }
    if metrics.vol_delta.is_some_and(|v| v > 60.0) {
        parts.push("High volume expansion.");
    }
    if metrics.atr_pct.is_some_and(|v| v > 4.0) {
        parts.push("Elevated volatility – reduce size.");
    }
    parts.join(" ")
}

/// Whole shares that keep the loss at the stop within `risk_amount`
pub fn position_size(risk_amount: f64, entry: f64, stop: f64) -> Option<u64> {
    let per_share = (entry - stop).abs();
    if !risk_amount.is_finite() || risk_amount <= 0.0 || !per_share.is_finite() || per_share <= 0.0 {
        return None;
    }
    Some((risk_amount / per_share).floor() as u64)
}
