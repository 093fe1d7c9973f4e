use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};
use std::str::FromStr;

/// Colour channel of an RGB raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    R,
    G,
    B,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::R, Channel::G, Channel::B];

    /// Position of the channel inside an `Rgb<u8>` pixel
    pub fn index(self) -> usize {
        match self {
            Channel::R => 0,
            Channel::G => 1,
            Channel::B => 2,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::R => write!(f, "R"),
            Channel::G => write!(f, "G"),
            Channel::B => write!(f, "B"),
        }
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "r" | "red" => Ok(Channel::R),
            "g" | "green" => Ok(Channel::G),
            "b" | "blue" => Ok(Channel::B),
            other => Err(format!("unknown channel '{}' (expected R, G or B)", other)),
        }
    }
}

/// One value per colour channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerChannel<T> {
    pub r: T,
    pub g: T,
    pub b: T,
}

impl<T> PerChannel<T> {
    pub fn from_fn(mut f: impl FnMut(Channel) -> T) -> Self {
        Self {
            r: f(Channel::R),
            g: f(Channel::G),
            b: f(Channel::B),
        }
    }

    pub fn get(&self, channel: Channel) -> &T {
        match channel {
            Channel::R => &self.r,
            Channel::G => &self.g,
            Channel::B => &self.b,
        }
    }

    pub fn map<U>(&self, mut f: impl FnMut(Channel, &T) -> U) -> PerChannel<U> {
        PerChannel {
            r: f(Channel::R, &self.r),
            g: f(Channel::G, &self.g),
            b: f(Channel::B, &self.b),
        }
    }

    /// Iterate in R, G, B order
    pub fn iter(&self) -> impl Iterator<Item = (Channel, &T)> {
        [(Channel::R, &self.r), (Channel::G, &self.g), (Channel::B, &self.b)].into_iter()
    }
}

impl<T> Index<Channel> for PerChannel<T> {
    type Output = T;

    fn index(&self, channel: Channel) -> &T {
        self.get(channel)
    }
}

impl<T> IndexMut<Channel> for PerChannel<T> {
    fn index_mut(&mut self, channel: Channel) -> &mut T {
        match channel {
            Channel::R => &mut self.r,
            Channel::G => &mut self.g,
            Channel::B => &mut self.b,
        }
    }
}

/// Per-column inverted mean intensity of a peak image, one sequence per channel.
/// Higher values mean more ink in that column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntensityProfile {
    pub channels: PerChannel<Vec<u8>>,
}

impl IntensityProfile {
    /// Number of columns covered by the profile
    pub fn width(&self) -> usize {
        self.channels.r.len()
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0
    }

    pub fn channel(&self, channel: Channel) -> &[u8] {
        &self.channels[channel]
    }

    /// Perceptual grayscale signal `0.299R + 0.587G + 0.114B`
    pub fn grayscale(&self) -> Vec<f64> {
        self.channels
            .r
            .iter()
            .zip(&self.channels.g)
            .zip(&self.channels.b)
            .map(|((&r, &g), &b)| 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64)
            .collect()
    }
}

/// Integrated area of every sub-peak, one sequence per channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeakArea {
    pub channels: PerChannel<Vec<f64>>,
}

impl PeakArea {
    /// Number of sub-peaks
    pub fn len(&self) -> usize {
        self.channels.r.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel(&self, channel: Channel) -> &[f64] {
        &self.channels[channel]
    }
}

/// Least-squares line of peak area against concentration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitLine {
    pub slope: f64,
    pub intercept: f64,
    /// Coefficient of determination; `None` when every fitted area is equal
    /// (or fewer than two points were fitted) and R² is undefined.
    pub r_squared: Option<f64>,
    /// Number of (concentration, area) pairs that went into the fit
    pub points: usize,
}

impl FitLine {
    /// Slope truncated towards zero, as shown to the user
    pub fn reported_slope(&self) -> i64 {
        truncate_reported(self.slope)
    }

    /// Intercept truncated towards zero, as shown to the user
    pub fn reported_intercept(&self) -> i64 {
        truncate_reported(self.intercept)
    }

    /// R² rounded to three decimals
    pub fn reported_r_squared(&self) -> Option<f64> {
        self.r_squared.map(|r2| (r2 * 1000.0).round() / 1000.0)
    }

    /// Predicted peak area at a concentration
    pub fn predict(&self, concentration: f64) -> f64 {
        self.slope * concentration + self.intercept
    }
}

impl std::fmt::Display for FitLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}c + {}", self.reported_slope(), self.reported_intercept())?;
        match self.reported_r_squared() {
            Some(r2) => write!(f, " (R²={:.3})", r2),
            None => write!(f, " (R² undefined)"),
        }
    }
}

// Float noise from the solve (2.9999999999) must not truncate to the next integer down.
fn truncate_reported(value: f64) -> i64 {
    ((value * 1e9).round() / 1e9).trunc() as i64
}
