//! Support/resistance levels from clustered pivot highs and lows

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

use crate::types::{Candle, Range};

/// Tuning for [`support_resistance`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SrConfig {
    /// Upper bound on returned levels, price anchor included (default: 8)
    pub max_levels: usize,
    /// Upper bound on levels above the last close (default: 4)
    pub max_resistance: usize,
    /// Slots held back for support when support candidates exist (default: 2)
    pub min_support: usize,
    /// Smallest pivot half-width; grows with history length (default: 5)
    pub base_window: usize,
    /// Cluster merge distance as a fraction of the price range (default: 0.004)
    pub tolerance_pct: f64,
    /// Minimum gap between levels as a fraction of the price range (default: 0.018)
    pub spacing_pct: f64,
    /// Distance from the close, as a fraction of it, within which a level
    /// counts as marking the current price (default: 0.01)
    pub anchor_pct: f64,
}

impl Default for SrConfig {
    fn default() -> Self {
        Self {
            max_levels: 8,
            max_resistance: 4,
            min_support: 2,
            base_window: 5,
            tolerance_pct: 0.004,
            spacing_pct: 0.018,
            anchor_pct: 0.01,
        }
    }
}

impl SrConfig {
    pub fn for_range(range: Range) -> Self {
        Self {
            base_window: if range.is_intraday() { 3 } else { 5 },
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelKind {
    Resistance,
    Support,
    /// Synthetic level marking the last close
    Price,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SrLevel {
    pub price: f64,
    pub touches: usize,
    pub score: f64,
    #[serde(rename = "type")]
    pub kind: LevelKind,
}

#[derive(Debug, Clone, Copy)]
struct Pivot {
    price: f64,
    index: usize,
    volume: f64,
    is_high: bool,
}

#[derive(Debug, Clone)]
struct Cluster {
    center: f64,
    points: usize,
    resistance_touches: usize,
    support_touches: usize,
    volume: f64,
    last_index: usize,
}

impl Cluster {
    fn new(p: &Pivot) -> Self {
        Self {
            center: p.price,
            points: 1,
            resistance_touches: usize::from(p.is_high),
            support_touches: usize::from(!p.is_high),
            volume: p.volume,
            last_index: p.index,
        }
    }

    fn absorb(&mut self, p: &Pivot) {
        self.points += 1;
        self.center += (p.price - self.center) / self.points as f64;
        if p.is_high {
            self.resistance_touches += 1;
        } else {
            self.support_touches += 1;
        }
        self.volume += p.volume;
        self.last_index = self.last_index.max(p.index);
    }
}

struct Candidate {
    price: f64,
    touches: usize,
    score: f64,
}

/// Detect, cluster, score and select support/resistance levels.
///
/// The result holds at most `max_levels` levels sorted by price descending,
/// no two closer than `spacing_pct` of the high-low range, with a synthetic
/// [`LevelKind::Price`] level when nothing else sits near the last close.
pub fn support_resistance(candles: &[Candle], config: &SrConfig) -> Vec<SrLevel> {
    let Some(last) = candles.last() else {
        return Vec::new();
    };
    let last_close = last.close;

    let (lo, hi) = candles
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), c| (lo.min(c.low), hi.max(c.high)));
    let price_range = (hi - lo).max(0.0);
    let tolerance = price_range * config.tolerance_pct;
    let min_spacing = price_range * config.spacing_pct;

    let pivots = find_pivots(candles, config.base_window);
    let clusters = cluster_pivots(pivots, tolerance);
    let candidates = score_clusters(&clusters, candles.len() - 1);

    let (mut resistance, mut support): (Vec<Candidate>, Vec<Candidate>) =
        candidates.into_iter().partition(|c| c.price > last_close);
    resistance.sort_by(by_score_desc);
    support.sort_by(by_score_desc);

    let reserved = config.min_support.min(support.len());
    let resistance_cap = config
        .max_resistance
        .min(config.max_levels.saturating_sub(reserved));

    let mut accepted: Vec<SrLevel> = Vec::new();
    take_spaced(&mut accepted, resistance, resistance_cap, min_spacing, LevelKind::Resistance);
    let support_cap = config.max_levels.saturating_sub(accepted.len());
    take_spaced(&mut accepted, support, support_cap, min_spacing, LevelKind::Support);

    let anchor_band = last_close.abs() * config.anchor_pct;
    let anchored = accepted
        .iter()
        .any(|l| (l.price - last_close).abs() <= anchor_band);
    if !anchored && config.max_levels > 0 {
        accepted.retain(|l| (l.price - last_close).abs() >= min_spacing);
        if accepted.len() >= config.max_levels {
            if let Some(weakest) = accepted
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.score.total_cmp(&b.1.score))
                .map(|(i, _)| i)
            {
                accepted.remove(weakest);
            }
        }
        accepted.push(SrLevel {
            price: last_close,
            touches: 0,
            score: 0.0,
            kind: LevelKind::Price,
        });
    }

    accepted.sort_by(|a, b| b.price.total_cmp(&a.price));
    debug!(
        bars = candles.len(),
        clusters = clusters.len(),
        levels = accepted.len(),
        "Support/resistance levels selected"
    );
    accepted
}

fn by_score_desc(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.price.total_cmp(&b.price))
}

fn take_spaced(
    accepted: &mut Vec<SrLevel>,
    candidates: Vec<Candidate>,
    cap: usize,
    min_spacing: f64,
    kind: LevelKind,
) {
    let mut taken = 0;
    for c in candidates {
        if taken >= cap {
            break;
        }
        if accepted
            .iter()
            .any(|l| (l.price - c.price).abs() < min_spacing)
        {
            continue;
        }
        accepted.push(SrLevel {
            price: c.price,
            touches: c.touches,
            score: c.score,
            kind,
        });
        taken += 1;
    }
}

/// Strict pivot highs and lows. The half-width widens to one bar per 120 on
/// long histories so pivots stay meaningful.
fn find_pivots(candles: &[Candle], base_window: usize) -> Vec<Pivot> {
    let n = candles.len();
    let window = base_window.max(n / 120).max(1);
    let mut pivots = Vec::new();
    if n <= 2 * window {
        return pivots;
    }

    for i in window..n - window {
        let c = &candles[i];
        let neighbours = (i - window..i).chain(i + 1..=i + window);
        let (mut is_high, mut is_low) = (true, true);
        for j in neighbours {
            if candles[j].high >= c.high {
                is_high = false;
            }
            if candles[j].low <= c.low {
                is_low = false;
            }
            if !is_high && !is_low {
                break;
            }
        }
        if is_high {
            pivots.push(Pivot {
                price: c.high,
                index: i,
                volume: c.volume,
                is_high: true,
            });
        }
        if is_low {
            pivots.push(Pivot {
                price: c.low,
                index: i,
                volume: c.volume,
                is_high: false,
            });
        }
    }
    pivots
}

fn cluster_pivots(mut pivots: Vec<Pivot>, tolerance: f64) -> Vec<Cluster> {
    pivots.sort_by(|a, b| a.price.total_cmp(&b.price).then(a.index.cmp(&b.index)));

    let mut clusters: Vec<Cluster> = Vec::new();
    for p in &pivots {
        let nearest = clusters
            .iter_mut()
            .map(|c| ((p.price - c.center).abs(), c))
            .filter(|(d, _)| *d <= tolerance)
            .min_by(|a, b| a.0.total_cmp(&b.0));
        match nearest {
            Some((_, cluster)) => cluster.absorb(p),
            None => clusters.push(Cluster::new(p)),
        }
    }
    clusters
}

fn score_clusters(clusters: &[Cluster], last_index: usize) -> Vec<Candidate> {
    let max_volume = clusters.iter().map(|c| c.volume).fold(0.0, f64::max);
    clusters
        .iter()
        .map(|c| {
            let volume_score = if max_volume > 0.0 {
                c.volume / max_volume * 2.0
            } else {
                0.0
            };
            let recency = if last_index > 0 {
                1.0 - (last_index - c.last_index) as f64 / last_index as f64
            } else {
                0.0
            };
            let balance = if c.resistance_touches > 0 && c.support_touches > 0 {
                1.2
            } else {
                0.0
            };
            Candidate {
                price: c.center,
                touches: c.points,
                score: c.points as f64 * 2.0 + volume_score + recency * 1.5 + balance,
            }
        })
        .collect()
}

/// Nearest resistance above and support below the last close
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyLevels {
    pub resistance: Option<f64>,
    pub support: Option<f64>,
}

/// Search bands around the close, as fractions of it, widened in order
const KEY_LEVEL_BANDS: [f64; 4] = [0.02, 0.05, 0.10, 0.20];
/// Levels this close to the close are treated as the price itself
const KEY_LEVEL_DEADBAND: f64 = 0.0005;

pub fn key_levels(levels: &[SrLevel], last_close: f64) -> KeyLevels {
    let deadband = last_close.abs() * KEY_LEVEL_DEADBAND;
    let prices: Vec<f64> = levels
        .iter()
        .map(|l| l.price)
        .filter(|p| (p - last_close).abs() > deadband)
        .collect();

    let nearest = |above: bool| {
        KEY_LEVEL_BANDS.iter().find_map(|band| {
            let reach = last_close.abs() * band;
            prices
                .iter()
                .copied()
                .filter(|p| if above { *p > last_close } else { *p < last_close })
                .filter(|p| (p - last_close).abs() <= reach)
                .min_by(|a, b| (a - last_close).abs().total_cmp(&(b - last_close).abs()))
        })
    };

    KeyLevels {
        resistance: nearest(true),
        support: nearest(false),
    }
}
