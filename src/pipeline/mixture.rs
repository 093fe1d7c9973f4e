/// Mixture lanes
///
/// The unknown sample is one continuous lane. It is not split into bands;
/// its peaks are separated along the profile by the mixture boundary policy.

use image::RgbImage;

use super::boundary::Minima;
use super::integrate::integrate_peaks;
use super::profile::extract_profile;
use super::segmentation::segment_mixture;
use super::settings::AnalysisSettings;
use crate::data::chromatogram::{IntensityProfile, PeakArea};
use crate::data::raster::{validate, RasterError};
use crate::log::reproducibility::{AnalysisLog, Parameter};

#[derive(Debug, Clone)]
pub struct Mixture {
    name: String,
    image: RgbImage,
    profile: IntensityProfile,
    minima: Minima,
    area: PeakArea,
}

impl Mixture {
    pub fn new(
        name: &str,
        image: RgbImage,
        settings: &AnalysisSettings,
        log: &mut AnalysisLog,
    ) -> Result<Self, RasterError> {
        validate(&image)?;

        let segmentation = segment_mixture(&image, settings, log);
        let Some(peak) = segmentation.peaks.into_iter().next() else {
            // segment_mixture always yields the whole lane
            return Err(RasterError::Empty {
                width: image.width(),
                height: image.height(),
            });
        };

        let policy = settings.boundary.mixture;
        let profile = extract_profile(&peak.image);
        let minima = policy.detect(&profile);
        let area = integrate_peaks(&profile, &minima);

        log::info!("Mixture '{}': {} peaks", name, area.len());
        log.add_entry(
            "Mixture",
            &format!(
                "'{}': {} peaks between columns {:?}",
                name,
                area.len(),
                minima.indices
            ),
            vec![Parameter::new("boundary", policy)],
        );

        Ok(Self {
            name: name.to_string(),
            image,
            profile,
            minima,
            area,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn profile(&self) -> &IntensityProfile {
        &self.profile
    }

    pub fn minima(&self) -> &Minima {
        &self.minima
    }

    pub fn area(&self) -> &PeakArea {
        &self.area
    }
}
