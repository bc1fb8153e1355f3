//! Series indicators over a candle history
//!
//! Every function returns a series aligned to its input: index `i` of the
//! output describes bar `i` of the input, and bars without enough history
//! carry `None`. Nothing is shifted, so series can be combined index by index.

use serde::{Deserialize, Serialize};
use ta::indicators::{SimpleMovingAverage, TrueRange};
use ta::Next;

use crate::types::Candle;

/// Per-bar indicator values, `None` where the indicator is not yet defined
pub type Series = Vec<Option<f64>>;

pub const RSI_PERIOD: usize = 14;
pub const CCI_PERIOD: usize = 14;
pub const ATR_PERIOD: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;

const CCI_CONSTANT: f64 = 0.015;

/// Last value of a series if the final bar is defined
pub fn last_value(series: &[Option<f64>]) -> Option<f64> {
    series.last().copied().flatten()
}

pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// Simple moving average; defined from index `period - 1`
pub fn sma(values: &[f64], period: usize) -> Series {
    let Ok(mut sma) = SimpleMovingAverage::new(period) else {
        return vec![None; values.len()];
    };
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let avg = sma.next(v);
            (i + 1 >= period).then_some(avg)
        })
        .collect()
}

/// Exponential moving average seeded with the SMA of the first `period` values
pub fn ema(values: &[f64], period: usize) -> Series {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut prev = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(prev);

    for (i, &v) in values.iter().enumerate().skip(period) {
        prev = (v - prev) * k + prev;
        out[i] = Some(prev);
    }
    out
}

/// Wilder RSI; first value at index `period`
///
/// A window with neither gains nor losses reads as a neutral 50.
pub fn rsi(closes: &[f64], period: usize) -> Series {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() <= period {
        return out;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = closes[i] - closes[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = Some(rsi_value(avg_gain, avg_loss));

    let p = period as f64;
    for i in (period + 1)..closes.len() {
        let change = closes[i] - closes[i - 1];
        let (gain, loss) = if change > 0.0 { (change, 0.0) } else { (0.0, -change) };
        avg_gain = (avg_gain * (p - 1.0) + gain) / p;
        avg_loss = (avg_loss * (p - 1.0) + loss) / p;
        out[i] = Some(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// True range per bar; the first bar has no previous close and uses high - low
pub fn true_range(candles: &[Candle]) -> Vec<f64> {
    let mut tr = TrueRange::new();
    candles.iter().map(|c| tr.next(c)).collect()
}

/// Wilder ATR; first value at index `period` (mean of the first `period` true ranges
/// that have a previous close)
pub fn atr(candles: &[Candle], period: usize) -> Series {
    let mut out = vec![None; candles.len()];
    if period == 0 || candles.len() <= period {
        return out;
    }

    let tr = true_range(candles);
    let p = period as f64;
    let mut prev = tr[1..=period].iter().sum::<f64>() / p;
    out[period] = Some(prev);

    for i in (period + 1)..candles.len() {
        prev = (prev * (p - 1.0) + tr[i]) / p;
        out[i] = Some(prev);
    }
    out
}

/// Commodity Channel Index over typical price; `None` when the window has no deviation
pub fn cci(candles: &[Candle], period: usize) -> Series {
    let mut out = vec![None; candles.len()];
    if period == 0 || candles.len() < period {
        return out;
    }

    let tp: Vec<f64> = candles.iter().map(Candle::typical_price).collect();
    for i in (period - 1)..tp.len() {
        let window = &tp[i + 1 - period..=i];
        let mean = window.iter().sum::<f64>() / period as f64;
        let mean_dev = window.iter().map(|v| (v - mean).abs()).sum::<f64>() / period as f64;
        if mean_dev > 0.0 {
            out[i] = Some((tp[i] - mean) / (CCI_CONSTANT * mean_dev));
        }
    }
    out
}

/// MACD line, signal and histogram, each aligned to the input closes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MacdSeries {
    pub line: Series,
    pub signal: Series,
    pub histogram: Series,
}

/// MACD(fast, slow, signal). The line exists from index `slow - 1`; the signal is an
/// EMA over the defined line values only, mapped back onto their original indices.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> MacdSeries {
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);

    let line: Series = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect();

    let (positions, dense): (Vec<usize>, Vec<f64>) = line
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i, v)))
        .unzip();

    let mut signal = vec![None; closes.len()];
    for (pos, value) in positions.iter().zip(ema(&dense, signal_period)) {
        signal[*pos] = value;
    }

    let histogram = line
        .iter()
        .zip(&signal)
        .map(|(l, s)| match (l, s) {
            (Some(l), Some(s)) => Some(l - s),
            _ => None,
        })
        .collect();

    MacdSeries {
        line,
        signal,
        histogram,
    }
}
