/// Analysis settings
///
/// Every tunable constant of the pipeline lives here so a run can be
/// described (and repeated) from a single JSON file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::boundary::BoundaryPolicy;
use super::solver::PeakSelection;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid settings file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Preprocessing constants (grayscale → blur → CLAHE → threshold → opening)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessSettings {
    /// Gaussian kernel size (odd)
    pub blur_kernel_size: u32,
    pub blur_sigma: f64,
    pub clahe_clip_limit: f64,
    /// CLAHE tile grid (columns, rows)
    pub clahe_tile_grid: (u32, u32),
    /// Subtracted from the local mean before thresholding
    pub threshold_offset: i32,
    /// Image height is divided by this to get the block size in calibration mode
    pub calibration_block_count: u32,
    /// Same, for the single continuous mixture lane
    pub mixture_block_count: u32,
    /// Diameter of the elliptical opening element
    pub opening_kernel_size: u32,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            blur_kernel_size: 5,
            blur_sigma: 0.3,
            clahe_clip_limit: 2.0,
            clahe_tile_grid: (5, 5),
            threshold_offset: 5,
            calibration_block_count: 11,
            mixture_block_count: 1,
            opening_kernel_size: 25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationSettings {
    /// Contours enclosing this many pixels or fewer are discarded
    pub min_contour_area: f64,
}

impl Default for SegmentationSettings {
    fn default() -> Self {
        Self {
            min_contour_area: 400.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundarySettings {
    pub calibration: BoundaryPolicy,
    pub mixture: BoundaryPolicy,
}

impl Default for BoundarySettings {
    fn default() -> Self {
        Self {
            calibration: BoundaryPolicy::ThresholdCrossing,
            mixture: BoundaryPolicy::Prominence { min_prominence: 2.0 },
        }
    }
}

/// Top-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub preprocess: PreprocessSettings,
    pub segmentation: SegmentationSettings,
    pub boundary: BoundarySettings,
    pub selection: PeakSelection,
    /// Process the bands of one calibration on the rayon pool
    pub parallel: bool,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            preprocess: PreprocessSettings::default(),
            segmentation: SegmentationSettings::default(),
            boundary: BoundarySettings::default(),
            selection: PeakSelection::TopN,
            parallel: true,
        }
    }
}

impl AnalysisSettings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let json = std::fs::read_to_string(path)?;
        let settings: AnalysisSettings = serde_json::from_str(&json)?;
        settings.validate()?;
        log::info!("Loaded analysis settings from {}", path.display());
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reject values the image operations cannot run with
    pub fn validate(&self) -> Result<(), SettingsError> {
        let p = &self.preprocess;
        if p.blur_kernel_size == 0 || p.blur_kernel_size % 2 == 0 {
            return Err(SettingsError::Invalid(format!(
                "blur_kernel_size must be odd, got {}",
                p.blur_kernel_size
            )));
        }
        if !(p.blur_sigma > 0.0) {
            return Err(SettingsError::Invalid("blur_sigma must be positive".into()));
        }
        if !(p.clahe_clip_limit > 0.0) || p.clahe_tile_grid.0 == 0 || p.clahe_tile_grid.1 == 0 {
            return Err(SettingsError::Invalid(
                "CLAHE needs a positive clip limit and a non-empty tile grid".into(),
            ));
        }
        if p.calibration_block_count == 0 || p.mixture_block_count == 0 {
            return Err(SettingsError::Invalid("block counts must be at least 1".into()));
        }
        if p.opening_kernel_size == 0 {
            return Err(SettingsError::Invalid("opening_kernel_size must be at least 1".into()));
        }
        if let PeakSelection::Threshold { min_r2 } = self.selection {
            if !min_r2.is_finite() {
                return Err(SettingsError::Invalid("min_r2 must be finite".into()));
            }
        }
        Ok(())
    }
}
