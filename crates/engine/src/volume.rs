//! Volume indicators: volume delta, session pacing and money-flow series

use serde::{Deserialize, Serialize};

use crate::indicators::{last_value, sma, Series};
use crate::types::Candle;

pub const VOLUME_MA_PERIOD: usize = 20;
pub const MFI_PERIOD: usize = 14;
pub const CMF_PERIOD: usize = 20;

/// Prior sessions needed before session pacing is reported
pub const MIN_SESSION_SAMPLES: usize = 5;
/// Most recent prior sessions averaged for session pacing
pub const MAX_SESSION_SAMPLES: usize = 20;

const SECONDS_PER_DAY: i64 = 86_400;

/// Latest volume relative to its 20-bar average, in percent
pub fn volume_delta(candles: &[Candle]) -> Option<f64> {
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
    let avg = last_value(&sma(&volumes, VOLUME_MA_PERIOD))?;
    let latest = *volumes.last()?;
    (avg > 0.0).then(|| (latest - avg) / avg * 100.0)
}

/// Cumulative volume of the current session against prior sessions at the
/// same point in the day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionPace {
    pub session_volume: f64,
    pub avg_session_volume: Option<f64>,
    /// Percent above or below the historical pace
    pub speed: Option<f64>,
}

/// Compare the volume traded so far in the latest session with the volume the
/// previous sessions had traded after the same number of bars.
///
/// Sessions are UTC calendar days. Prior sessions with fewer bars than the
/// current one are not comparable and are skipped; fewer than
/// [`MIN_SESSION_SAMPLES`] comparable sessions leaves the pace unavailable.
pub fn session_pace(candles: &[Candle]) -> Option<SessionPace> {
    let sessions = split_sessions(candles);
    let (current, prior) = sessions.split_last()?;

    let bars_so_far = current.len();
    let session_volume: f64 = current.iter().map(|c| c.volume).sum();

    let samples: Vec<f64> = prior
        .iter()
        .rev()
        .filter(|s| s.len() >= bars_so_far)
        .take(MAX_SESSION_SAMPLES)
        .map(|s| s[..bars_so_far].iter().map(|c| c.volume).sum())
        .collect();

    if samples.len() < MIN_SESSION_SAMPLES {
        return Some(SessionPace {
            session_volume,
            avg_session_volume: None,
            speed: None,
        });
    }

    let avg = samples.iter().sum::<f64>() / samples.len() as f64;
    let speed = (avg > 0.0).then(|| (session_volume - avg) / avg * 100.0);

    Some(SessionPace {
        session_volume,
        avg_session_volume: Some(avg),
        speed,
    })
}

fn split_sessions(candles: &[Candle]) -> Vec<&[Candle]> {
    let mut sessions = Vec::new();
    let mut start = 0;
    for i in 1..candles.len() {
        if session_day(&candles[i]) != session_day(&candles[i - 1]) {
            sessions.push(&candles[start..i]);
            start = i;
        }
    }
    if start < candles.len() {
        sessions.push(&candles[start..]);
    }
    sessions
}

fn session_day(candle: &Candle) -> i64 {
    candle.timestamp.div_euclid(SECONDS_PER_DAY)
}

/// On-balance volume, starting from zero on the first bar
pub fn obv(candles: &[Candle]) -> Series {
    let mut total = 0.0;
    candles
        .iter()
        .enumerate()
        .map(|(i, c)| {
            if i > 0 {
                let prev = candles[i - 1].close;
                if c.close > prev {
                    total += c.volume;
                } else if c.close < prev {
                    total -= c.volume;
                }
            }
            Some(total)
        })
        .collect()
}

/// Money Flow Index; defined from index `period`
pub fn mfi(candles: &[Candle], period: usize) -> Series {
    let tp: Vec<f64> = candles.iter().map(Candle::typical_price).collect();
    let flow: Vec<f64> = tp.iter().zip(candles).map(|(t, c)| t * c.volume).collect();

    (0..candles.len())
        .map(|i| {
            if period == 0 || i < period {
                return None;
            }
            let (mut pos, mut neg) = (0.0, 0.0);
            for j in (i + 1 - period)..=i {
                if tp[j] > tp[j - 1] {
                    pos += flow[j];
                } else if tp[j] < tp[j - 1] {
                    neg += flow[j];
                }
            }
            Some(if neg == 0.0 {
                100.0
            } else if pos == 0.0 {
                0.0
            } else {
                100.0 - 100.0 / (1.0 + pos / neg)
            })
        })
        .collect()
}

/// Chaikin Money Flow; defined from index `period`
pub fn cmf(candles: &[Candle], period: usize) -> Series {
    (0..candles.len())
        .map(|i| {
            if period == 0 || i < period {
                return None;
            }
            let window = &candles[i + 1 - period..=i];
            let (mut flow_volume, mut volume) = (0.0, 0.0);
            for c in window {
                let mut range = c.high - c.low;
                if range == 0.0 {
                    range = 1e-9;
                }
                let multiplier = ((c.close - c.low) - (c.high - c.close)) / range;
                flow_volume += multiplier * c.volume;
                volume += c.volume;
            }
            (volume > 0.0).then(|| flow_volume / volume)
        })
        .collect()
}

/// Volume-flow series shown under the price chart
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowSeries {
    pub obv: Series,
    pub mfi: Series,
    pub cmf: Series,
}

impl FlowSeries {
    pub fn compute(candles: &[Candle]) -> Self {
        Self {
            obv: obv(candles),
            mfi: mfi(candles, MFI_PERIOD),
            cmf: cmf(candles, CMF_PERIOD),
        }
    }
}
