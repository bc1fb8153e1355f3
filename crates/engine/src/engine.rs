//! Bar-by-bar Fibonacci retracement backtest

use chrono::DateTime;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::indicators;
use crate::metrics::{classify_trend, trailing_mean};
use crate::plan::FibLevels;
use crate::types::*;

/// A validated retracement trade derived from one swing
#[derive(Debug, Clone, Copy, PartialEq)]
struct Setup {
    side: Side,
    low: f64,
    high: f64,
    entry: f64,
    target: f64,
    stop: f64,
}

impl Setup {
    /// Long buys the 50% pullback toward 38.2%, stopped at 61.8%; short mirrors.
    /// `None` unless the prices are strictly ordered inside the swing.
    fn from_swing(side: Side, low: f64, high: f64) -> Option<Self> {
        let fib = FibLevels::from_swing(low, high);
        let entry = fib.level_500;
        let (target, stop) = match side {
            Side::Long => (fib.level_382, fib.level_618),
            Side::Short => (fib.level_618, fib.level_382),
        };
        let ordered = match side {
            Side::Long => low < stop && stop < entry && entry < target && target < high,
            Side::Short => high > stop && stop > entry && entry > target && target > low,
        };
        ordered.then_some(Self {
            side,
            low,
            high,
            entry,
            target,
            stop,
        })
    }

    fn key(&self) -> (Side, u64, u64) {
        (self.side, self.low.to_bits(), self.high.to_bits())
    }

    fn stop_hit(&self, c: &Candle) -> bool {
        match self.side {
            Side::Long => c.low <= self.stop,
            Side::Short => c.high >= self.stop,
        }
    }

    fn target_hit(&self, c: &Candle) -> bool {
        match self.side {
            Side::Long => c.high >= self.target,
            Side::Short => c.low <= self.target,
        }
    }
}

/// Lowest low of the window, then the highest high strictly after it
fn find_up_swing(window: &[Candle]) -> Option<(f64, f64)> {
    let (low_idx, low) = window
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, c)| match best {
            Some((_, l)) if c.low >= l => best,
            _ => Some((i, c.low)),
        })?;
    let high = window[low_idx + 1..]
        .iter()
        .map(|c| c.high)
        .fold(None, |best: Option<f64>, h| Some(best.map_or(h, |b| b.max(h))))?;
    (high > low).then_some((low, high))
}

/// Highest high of the window, then the lowest low strictly after it
fn find_down_swing(window: &[Candle]) -> Option<(f64, f64)> {
    let (high_idx, high) = window
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, c)| match best {
            Some((_, h)) if c.high <= h => best,
            _ => Some((i, c.high)),
        })?;
    let low = window[high_idx + 1..]
        .iter()
        .map(|c| c.low)
        .fold(None, |best: Option<f64>, l| Some(best.map_or(l, |b| b.min(l))))?;
    (high > low).then_some((low, high))
}

/// Outcome of a filled setup
#[derive(Debug, Clone, Copy, PartialEq)]
struct Fill {
    outcome: Outcome,
    bars_held: Option<usize>,
}

/// Walk the bars after a setup. The entry fills on the first bar whose range
/// contains it; exits are checked from the following bar, stop first.
/// `None` when the entry never fills.
fn simulate(setup: &Setup, bars: &[Candle]) -> Option<Fill> {
    let fill_at = bars
        .iter()
        .position(|c| c.low <= setup.entry && setup.entry <= c.high)?;

    for (offset, c) in bars[fill_at + 1..].iter().enumerate() {
        let held = Some(offset + 1);
        if setup.stop_hit(c) {
            return Some(Fill {
                outcome: Outcome::Loss,
                bars_held: held,
            });
        }
        if setup.target_hit(c) {
            return Some(Fill {
                outcome: Outcome::Win,
                bars_held: held,
            });
        }
    }
    Some(Fill {
        outcome: Outcome::NoExit,
        bars_held: None,
    })
}

/// Running counters folded into [`BacktestStats`] at the end of a run
#[derive(Debug, Default)]
struct Tally {
    setups: u32,
    wins: u32,
    losses: u32,
    no_exit: u32,
    longs: u32,
    shorts: u32,
    bars_win: usize,
    bars_loss: usize,
    equity: f64,
    peak: f64,
    max_drawdown: f64,
}

impl Tally {
    fn record(&mut self, side: Side, fill: Fill) {
        self.setups += 1;
        match side {
            Side::Long => self.longs += 1,
            Side::Short => self.shorts += 1,
        }
        match fill.outcome {
            Outcome::Win => {
                self.wins += 1;
                self.bars_win += fill.bars_held.unwrap_or(0);
                self.equity += 1.0;
            }
            Outcome::Loss => {
                self.losses += 1;
                self.bars_loss += fill.bars_held.unwrap_or(0);
                self.equity -= 1.0;
            }
            Outcome::NoExit => {
                self.no_exit += 1;
                return;
            }
        }
        self.peak = self.peak.max(self.equity);
        self.max_drawdown = self.max_drawdown.max(self.peak - self.equity);
    }

    fn finish(self, ma_basis: MaBasis) -> BacktestStats {
        let resolved = self.wins + self.losses;
        let pct = |num: u32, den: u32| {
            if den > 0 {
                num as f64 / den as f64 * 100.0
            } else {
                0.0
            }
        };
        let avg = |total: usize, count: u32| (count > 0).then(|| total as f64 / count as f64);

        let profit_factor = if self.losses > 0 {
            self.wins as f64 / self.losses as f64
        } else if self.wins > 0 {
            f64::INFINITY
        } else {
            0.0
        };

        BacktestStats {
            setups: self.setups,
            wins: self.wins,
            losses: self.losses,
            no_exit: self.no_exit,
            longs: self.longs,
            shorts: self.shorts,
            win_rate: pct(self.wins, self.setups),
            resolved_win_rate: pct(self.wins, resolved),
            expectancy: if resolved > 0 {
                (self.wins as f64 - self.losses as f64) / resolved as f64
            } else {
                0.0
            },
            profit_factor,
            max_drawdown_r: self.max_drawdown,
            final_r: self.equity,
            avg_bars_win: avg(self.bars_win, self.wins),
            avg_bars_loss: avg(self.bars_loss, self.losses),
            ma_basis,
        }
    }
}

fn format_date(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// Replays a candle history and trades the retracement implied by the trend
/// at every bar, using only data up to that bar.
pub struct BacktestEngine;

impl BacktestEngine {
    pub fn run(config: &BacktestConfig, candles: &[Candle]) -> EngineResult<BacktestReport> {
        if candles.len() < config.min_history {
            return Err(EngineError::InsufficientHistory {
                operation: "backtest",
                required: config.min_history,
                actual: candles.len(),
            });
        }

        info!(
            bars = candles.len(),
            ma_basis = %config.ma_basis,
            swing_window = config.swing_window,
            look_ahead = config.look_ahead,
            "Starting backtest"
        );

        let closes = indicators::closes(candles);
        let fast = config.ma_basis.fast_period();
        let slow = config.ma_basis.slow_period();

        let mut tally = Tally::default();
        let mut samples: Vec<BacktestSample> = Vec::new();
        let mut last_key = None;

        let end = candles.len().saturating_sub(config.look_ahead);
        for i in config.swing_window.max(1)..end {
            let history = &closes[..=i];
            let trend = classify_trend(
                closes[i],
                trailing_mean(history, fast),
                trailing_mean(history, slow),
            );
            let window = &candles[i + 1 - config.swing_window.max(1)..=i];

            let setup = match trend {
                Trend::Sideways => continue,
                Trend::Uptrend => find_up_swing(window)
                    .and_then(|(low, high)| Setup::from_swing(Side::Long, low, high)),
                Trend::Downtrend => find_down_swing(window)
                    .and_then(|(low, high)| Setup::from_swing(Side::Short, low, high)),
            };
            let Some(setup) = setup else { continue };

            if last_key == Some(setup.key()) {
                continue;
            }
            last_key = Some(setup.key());

            let ahead = &candles[i + 1..=i + config.look_ahead];
            let Some(fill) = simulate(&setup, ahead) else {
                continue;
            };

            debug!(
                bar = i,
                side = ?setup.side,
                entry = setup.entry,
                outcome = ?fill.outcome,
                "Setup filled"
            );

            tally.record(setup.side, fill);
            if samples.len() < config.max_samples {
                samples.push(BacktestSample {
                    date: format_date(candles[i].timestamp),
                    entry: setup.entry,
                    target: setup.target,
                    stop: setup.stop,
                    outcome: fill.outcome,
                    side: setup.side,
                    bars_held: fill.bars_held,
                });
            }
        }

        let stats = tally.finish(config.ma_basis);

        info!(
            setups = stats.setups,
            wins = stats.wins,
            losses = stats.losses,
            win_rate = stats.win_rate,
            final_r = stats.final_r,
            max_drawdown_r = stats.max_drawdown_r,
            "Backtest complete"
        );

        Ok(BacktestReport { stats, samples })
    }
}
