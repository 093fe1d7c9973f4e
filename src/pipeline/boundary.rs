/// Peak boundary detection
///
/// Finds the columns that delimit sub-peaks inside an intensity profile.
/// Calibration bands are already isolated, so zero-crossings of the signal
/// are enough; a mixture lane is one continuous profile whose peaks overlap,
/// so the true minima between them have to be located.

use serde::{Deserialize, Serialize};

use crate::data::chromatogram::IntensityProfile;

/// How boundaries are found
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BoundaryPolicy {
    /// Rising and falling edges of the signal around zero; each
    /// (rising, falling) pair bounds one sub-peak.
    ThresholdCrossing,
    /// Local minima of the signal whose prominence reaches `min_prominence`,
    /// anchored at the first and last column.
    Prominence { min_prominence: f64 },
    /// Threshold crossings with each gap between peaks replaced by its
    /// midpoint, anchored at the first and last column.
    GapMidpoint,
}

impl BoundaryPolicy {
    pub fn detect(&self, profile: &IntensityProfile) -> Minima {
        let gray = profile.grayscale();
        match self {
            BoundaryPolicy::ThresholdCrossing => Minima {
                indices: threshold_crossings(&gray),
                pairing: Pairing::Paired,
            },
            BoundaryPolicy::Prominence { min_prominence } => Minima {
                indices: prominent_minima(&gray, *min_prominence),
                pairing: Pairing::Adjacent,
            },
            BoundaryPolicy::GapMidpoint => Minima {
                indices: gap_midpoints(&threshold_crossings(&gray), gray.len()),
                pairing: Pairing::Adjacent,
            },
        }
    }
}

impl std::fmt::Display for BoundaryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoundaryPolicy::ThresholdCrossing => write!(f, "threshold-crossing"),
            BoundaryPolicy::Prominence { min_prominence } => {
                write!(f, "prominence (min={})", min_prominence)
            }
            BoundaryPolicy::GapMidpoint => write!(f, "gap-midpoint"),
        }
    }
}

/// How consecutive boundary columns form sub-peaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pairing {
    /// `[b0, b1]`, `[b2, b3]`, …
    Paired,
    /// `[b0, b1]`, `[b1, b2]`, …
    Adjacent,
}

/// Ordered boundary columns of one profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Minima {
    pub indices: Vec<usize>,
    pub pairing: Pairing,
}

impl Minima {
    /// Inclusive column spans of every sub-peak
    pub fn spans(&self) -> Vec<(usize, usize)> {
        match self.pairing {
            Pairing::Paired => self
                .indices
                .chunks_exact(2)
                .map(|pair| (pair[0], pair[1]))
                .collect(),
            Pairing::Adjacent => self.indices.windows(2).map(|w| (w[0], w[1])).collect(),
        }
    }
}

/// Edges of the `signal > 0` regions.
///
/// A rising edge is recorded at the last zero column before the region, a
/// falling edge at the first zero column after it. Regions touching either
/// end of the profile are closed at column 0 / the last column so the list
/// always alternates rising, falling.
pub fn threshold_crossings(signal: &[f64]) -> Vec<usize> {
    let n = signal.len();
    let mut edges = Vec::new();
    if n == 0 {
        return edges;
    }
    let on: Vec<bool> = signal.iter().map(|&v| v > 0.0).collect();

    if on[0] {
        edges.push(0);
    }
    for i in 0..n - 1 {
        if !on[i] && on[i + 1] {
            edges.push(i);
        } else if on[i] && !on[i + 1] {
            edges.push(i + 1);
        }
    }
    if on[n - 1] {
        edges.push(n - 1);
    }
    edges
}

/// Midpoints between each falling edge and the following rising edge,
/// bracketed by column 0 and `width - 1`
pub fn gap_midpoints(crossings: &[usize], width: usize) -> Vec<usize> {
    if width == 0 {
        return Vec::new();
    }
    let mut bounds = vec![0];
    if crossings.len() > 2 {
        for gap in crossings[1..crossings.len() - 1].chunks_exact(2) {
            bounds.push((gap[0] + gap[1]) / 2);
        }
    }
    bounds.push(width - 1);
    bounds.dedup();
    bounds
}

/// Local maxima of `signal`; plateaus report their middle sample.
/// The first and last samples are never peaks.
pub fn local_maxima(signal: &[f64]) -> Vec<usize> {
    let n = signal.len();
    let mut peaks = Vec::new();
    if n < 3 {
        return peaks;
    }
    let last = n - 1;
    let mut i = 1;
    while i < last {
        if signal[i - 1] < signal[i] {
            let mut ahead = i + 1;
            while ahead < last && signal[ahead] == signal[i] {
                ahead += 1;
            }
            if signal[ahead] < signal[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Height of a peak above the higher of the two lowest points reachable on
/// either side before the signal climbs above the peak again
pub fn prominence(signal: &[f64], peak: usize) -> f64 {
    let height = signal[peak];

    let mut left_min = height;
    let mut i = peak;
    loop {
        if signal[i] > height {
            break;
        }
        left_min = left_min.min(signal[i]);
        if i == 0 {
            break;
        }
        i -= 1;
    }

    let mut right_min = height;
    for &v in &signal[peak..] {
        if v > height {
            break;
        }
        right_min = right_min.min(v);
    }

    height - left_min.max(right_min)
}

/// Minima of `signal` found as prominent maxima of `255 - signal`,
/// with column 0 and the last column added as anchors
pub fn prominent_minima(signal: &[f64], min_prominence: f64) -> Vec<usize> {
    let n = signal.len();
    if n == 0 {
        return Vec::new();
    }
    let inverted: Vec<f64> = signal.iter().map(|v| 255.0 - v).collect();

    let mut bounds = vec![0];
    bounds.extend(
        local_maxima(&inverted)
            .into_iter()
            .filter(|&p| prominence(&inverted, p) >= min_prominence),
    );
    bounds.push(n - 1);
    bounds.dedup();
    bounds
}
