/// Calibration strips
///
/// A calibration is a photographed strip of standards with known
/// concentrations. Each band found by segmentation is profiled, split into
/// one sub-peak per standard and fitted against the concentration list.

use image::RgbImage;
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;

use super::boundary::{BoundaryPolicy, Minima};
use super::fit::fit_line;
use super::integrate::integrate_peaks;
use super::profile::extract_profile;
use super::segmentation::{segment_calibration, PeakImage};
use super::settings::AnalysisSettings;
use crate::data::chromatogram::{Channel, FitLine, IntensityProfile, PeakArea, PerChannel};
use crate::data::geometry::BoundingBox;
use crate::data::raster::{validate, RasterError};
use crate::log::reproducibility::{AnalysisLog, Parameter};

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("Calibration '{0}' has no concentrations")]
    NoConcentrations(String),
    #[error("Invalid calibration image: {0}")]
    Raster(#[from] RasterError),
}

/// Everything measured on one band of a calibration strip
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationPeak {
    /// Position in bottom-to-top band order
    pub index: usize,
    pub bounds: BoundingBox,
    #[serde(skip)]
    pub image: RgbImage,
    pub profile: IntensityProfile,
    pub minima: Minima,
    pub area: PeakArea,
    pub fit: PerChannel<FitLine>,
}

#[derive(Debug, Clone)]
pub struct Calibration {
    name: String,
    concentrations: Vec<f64>,
    image: RgbImage,
    annotated: RgbImage,
    peaks: Vec<CalibrationPeak>,
}

impl Calibration {
    /// Segment `image`, then profile, integrate and fit every band.
    ///
    /// A strip without detectable bands is accepted; it simply contributes
    /// no peaks to any solve.
    pub fn new(
        name: &str,
        image: RgbImage,
        concentrations: Vec<f64>,
        settings: &AnalysisSettings,
        log: &mut AnalysisLog,
    ) -> Result<Self, CalibrationError> {
        validate(&image)?;
        if concentrations.is_empty() {
            return Err(CalibrationError::NoConcentrations(name.to_string()));
        }

        let segmentation = segment_calibration(&image, settings, log);
        let policy = settings.boundary.calibration;

        let peaks: Vec<CalibrationPeak> = if settings.parallel {
            segmentation
                .peaks
                .into_par_iter()
                .enumerate()
                .map(|(index, peak)| analyze_band(index, peak, &concentrations, policy))
                .collect()
        } else {
            segmentation
                .peaks
                .into_iter()
                .enumerate()
                .map(|(index, peak)| analyze_band(index, peak, &concentrations, policy))
                .collect()
        };

        if peaks.is_empty() {
            log::warn!("Calibration '{}' produced no bands", name);
        }
        for peak in &peaks {
            log::debug!(
                "'{}' band {}: {} sub-peaks, R {}",
                name,
                peak.index + 1,
                peak.area.len(),
                peak.fit.r
            );
            log.add_entry(
                "Calibration Fit",
                &format!(
                    "'{}' band {}: {} sub-peaks; R {}; G {}; B {}",
                    name,
                    peak.index + 1,
                    peak.area.len(),
                    peak.fit.r,
                    peak.fit.g,
                    peak.fit.b
                ),
                vec![
                    Parameter::new("boundary", policy),
                    Parameter::new("points", peak.fit.r.points),
                ],
            );
        }
        log.add_entry(
            "Calibration",
            &format!("'{}': {} bands", name, peaks.len()),
            vec![Parameter::new("concentrations", format!("{:?}", concentrations))],
        );

        Ok(Self {
            name: name.to_string(),
            concentrations,
            image,
            annotated: segmentation.annotated,
            peaks,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn concentrations(&self) -> &[f64] {
        &self.concentrations
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Source image with the merged band boxes outlined
    pub fn annotated(&self) -> &RgbImage {
        &self.annotated
    }

    pub fn peaks(&self) -> &[CalibrationPeak] {
        &self.peaks
    }

    pub fn fit(&self, band: usize, channel: Channel) -> Option<&FitLine> {
        self.peaks.get(band).map(|p| &p.fit[channel])
    }
}

fn analyze_band(
    index: usize,
    peak: PeakImage,
    concentrations: &[f64],
    policy: BoundaryPolicy,
) -> CalibrationPeak {
    let profile = extract_profile(&peak.image);
    let minima = policy.detect(&profile);
    let area = integrate_peaks(&profile, &minima);
    let fit = area
        .channels
        .map(|_, areas| fit_line(concentrations, areas));

    CalibrationPeak {
        index,
        bounds: peak.bounds,
        image: peak.image,
        profile,
        minima,
        area,
        fit,
    }
}
