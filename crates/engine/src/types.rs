//! Core types shared by the indicator, plan, level and backtest modules

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// A single OHLCV candle. Timestamps are Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// True when every price field is finite; volume may be missing upstream
    pub fn is_finite(&self) -> bool {
        self.open.is_finite() && self.high.is_finite() && self.low.is_finite() && self.close.is_finite()
    }
}

impl ta::Open for Candle {
    fn open(&self) -> f64 {
        self.open
    }
}

impl ta::High for Candle {
    fn high(&self) -> f64 {
        self.high
    }
}

impl ta::Low for Candle {
    fn low(&self) -> f64 {
        self.low
    }
}

impl ta::Close for Candle {
    fn close(&self) -> f64 {
        self.close
    }
}

impl ta::Volume for Candle {
    fn volume(&self) -> f64 {
        self.volume
    }
}

/// Chart timeframe selected by the user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Range {
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[default]
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1w")]
    OneWeek,
}

impl Range {
    pub const ALL: [Range; 5] = [
        Range::FiveMinutes,
        Range::FifteenMinutes,
        Range::OneHour,
        Range::OneDay,
        Range::OneWeek,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Range::FiveMinutes => "5m",
            Range::FifteenMinutes => "15m",
            Range::OneHour => "1h",
            Range::OneDay => "1d",
            Range::OneWeek => "1w",
        }
    }

    /// Bar interval requested from the provider
    pub fn provider_interval(self) -> &'static str {
        match self {
            Range::FiveMinutes => "5m",
            Range::FifteenMinutes => "15m",
            Range::OneHour => "1h",
            Range::OneDay => "1d",
            Range::OneWeek => "1wk",
        }
    }

    /// History span requested from the provider for the chart window
    pub fn provider_lookback(self) -> &'static str {
        match self {
            Range::FiveMinutes => "1d",
            Range::FifteenMinutes | Range::OneHour => "5d",
            Range::OneDay => "1y",
            Range::OneWeek => "2y",
        }
    }

    /// Deeper span feeding the level clusterer and session pace. Intraday
    /// spans stay inside the provider's per-interval history limits.
    pub fn analysis_lookback(self) -> &'static str {
        match self {
            Range::FiveMinutes => "1mo",
            Range::FifteenMinutes => "60d",
            Range::OneHour => "1y",
            Range::OneDay => "2y",
            Range::OneWeek => "5y",
        }
    }

    /// Span replayed by the backtest; every range clears the 120-bar minimum
    pub fn backtest_lookback(self) -> &'static str {
        match self {
            Range::FiveMinutes => "5d",
            Range::FifteenMinutes | Range::OneHour => "1mo",
            Range::OneDay => "1y",
            Range::OneWeek => "2y",
        }
    }

    pub fn lookback(self, depth: HistoryDepth) -> &'static str {
        match depth {
            HistoryDepth::Chart => self.provider_lookback(),
            HistoryDepth::Analysis => self.analysis_lookback(),
            HistoryDepth::Backtest => self.backtest_lookback(),
        }
    }

    pub fn is_intraday(self) -> bool {
        matches!(
            self,
            Range::FiveMinutes | Range::FifteenMinutes | Range::OneHour
        )
    }

    /// How many trailing candles the support/resistance clusterer looks at
    pub fn sr_history_bars(self) -> usize {
        if self.is_intraday() {
            900
        } else {
            260
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Range {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Range::ALL
            .into_iter()
            .find(|r| r.label() == normalized)
            .ok_or_else(|| EngineError::InvalidRange(s.to_string()))
    }
}

/// Which request a candle fetch serves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryDepth {
    /// The displayed chart window
    #[default]
    Chart,
    /// Deeper history for support/resistance and volume pace
    Analysis,
    Backtest,
}

/// Fast/slow simple moving-average pair used for trend classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaBasis {
    #[default]
    #[serde(rename = "20-50")]
    Short,
    #[serde(rename = "50-150")]
    Medium,
}

impl MaBasis {
    pub fn label(self) -> &'static str {
        match self {
            MaBasis::Short => "20-50",
            MaBasis::Medium => "50-150",
        }
    }

    pub fn fast_period(self) -> usize {
        match self {
            MaBasis::Short => 20,
            MaBasis::Medium => 50,
        }
    }

    pub fn slow_period(self) -> usize {
        match self {
            MaBasis::Short => 50,
            MaBasis::Medium => 150,
        }
    }
}

impl fmt::Display for MaBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for MaBasis {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "20-50" => Ok(MaBasis::Short),
            "50-150" => Ok(MaBasis::Medium),
            other => Err(EngineError::InvalidMaBasis(other.to_string())),
        }
    }
}

/// Trend classification derived from last close and the MA pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Uptrend,
    Downtrend,
    Sideways,
}

impl Trend {
    pub fn emoji(self) -> &'static str {
        match self {
            Trend::Uptrend => "🟢",
            Trend::Downtrend => "🔴",
            Trend::Sideways => "🟡",
        }
    }
}

// ============================================================================
// Backtest types
// ============================================================================

/// Configuration for a Fibonacci retracement backtest run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub ma_basis: MaBasis,
    /// Trailing bars searched for the directional swing (default: 20)
    pub swing_window: usize,
    /// Bars scanned after a setup for fill and resolution (default: 15)
    pub look_ahead: usize,
    /// Minimum candle count before a backtest is attempted (default: 120)
    pub min_history: usize,
    /// Number of filled setups kept as samples (default: 12)
    pub max_samples: usize,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            ma_basis: MaBasis::default(),
            swing_window: 20,
            look_ahead: 15,
            min_history: 120,
            max_samples: 12,
        }
    }
}

/// Direction of a simulated trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

/// Resolution of a filled setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Win,
    Loss,
    NoExit,
}

/// One filled setup kept for display
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestSample {
    /// Date of the setup bar (YYYY-MM-DD)
    pub date: String,
    pub entry: f64,
    pub target: f64,
    pub stop: f64,
    pub outcome: Outcome,
    pub side: Side,
    /// Bars between fill and exit; `None` when the trade never resolved
    pub bars_held: Option<usize>,
}

/// Aggregate statistics of a backtest run. Rates are percentages; R values
/// assume a symmetric 1:1 risk/reward per trade.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestStats {
    pub setups: u32,
    pub wins: u32,
    pub losses: u32,
    pub no_exit: u32,
    pub longs: u32,
    pub shorts: u32,
    pub win_rate: f64,
    pub resolved_win_rate: f64,
    pub expectancy: f64,
    #[serde(
        serialize_with = "serialize_unbounded",
        deserialize_with = "deserialize_unbounded"
    )]
    pub profit_factor: f64,
    pub max_drawdown_r: f64,
    pub final_r: f64,
    pub avg_bars_win: Option<f64>,
    pub avg_bars_loss: Option<f64>,
    pub ma_basis: MaBasis,
}

/// Result of a backtest run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub stats: BacktestStats,
    pub samples: Vec<BacktestSample>,
}

/// JSON has no infinity; an unbounded ratio is written as the string "Infinity"
fn serialize_unbounded<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_infinite() {
        serializer.serialize_str(if *value > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        serializer.serialize_f64(*value)
    }
}

fn deserialize_unbounded<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Unbounded {
        Number(f64),
        Text(String),
    }

    match Unbounded::deserialize(deserializer)? {
        Unbounded::Number(value) => Ok(value),
        Unbounded::Text(text) => match text.as_str() {
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            other => Err(de::Error::invalid_value(
                de::Unexpected::Str(other),
                &"a number or \"Infinity\"",
            )),
        },
    }
}
