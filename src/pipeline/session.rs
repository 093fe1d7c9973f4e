/// Analysis session: the named calibrations and mixtures a user has loaded,
/// plus the log of everything done to them.

use image::RgbImage;
use thiserror::Error;

use super::calibration::{Calibration, CalibrationError};
use super::mixture::Mixture;
use super::settings::AnalysisSettings;
use super::solver::{solve_all_channels, solve_concentration, ChannelSolution, SolveError};
use crate::data::chromatogram::{Channel, PerChannel};
use crate::data::raster::RasterError;
use crate::log::reproducibility::{AnalysisLog, Parameter};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No calibration named '{0}'")]
    UnknownCalibration(String),
    #[error("No mixture named '{0}'")]
    UnknownMixture(String),
    #[error("The name '{0}' is already in use")]
    DuplicateName(String),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error("Invalid mixture image: {0}")]
    Raster(#[from] RasterError),
    #[error(transparent)]
    Solve(#[from] SolveError),
}

pub struct Session {
    pub settings: AnalysisSettings,
    pub log: AnalysisLog,
    calibrations: Vec<Calibration>,
    mixtures: Vec<Mixture>,
}

impl Session {
    pub fn new(settings: AnalysisSettings) -> Self {
        Self {
            settings,
            log: AnalysisLog::new(),
            calibrations: Vec::new(),
            mixtures: Vec::new(),
        }
    }

    pub fn calibrations(&self) -> &[Calibration] {
        &self.calibrations
    }

    pub fn mixtures(&self) -> &[Mixture] {
        &self.mixtures
    }

    pub fn calibration(&self, name: &str) -> Result<&Calibration, SessionError> {
        Ok(find_calibrations(&self.calibrations, &[name])?[0])
    }

    pub fn mixture(&self, name: &str) -> Result<&Mixture, SessionError> {
        find_mixture(&self.mixtures, name)
    }

    pub fn add_calibration(
        &mut self,
        name: &str,
        image: RgbImage,
        concentrations: Vec<f64>,
    ) -> Result<&Calibration, SessionError> {
        if self.calibrations.iter().any(|c| c.name() == name) {
            return Err(SessionError::DuplicateName(name.to_string()));
        }
        let calibration =
            Calibration::new(name, image, concentrations, &self.settings, &mut self.log)?;
        self.calibrations.push(calibration);
        Ok(&self.calibrations[self.calibrations.len() - 1])
    }

    pub fn add_mixture(&mut self, name: &str, image: RgbImage) -> Result<&Mixture, SessionError> {
        if self.mixtures.iter().any(|m| m.name() == name) {
            return Err(SessionError::DuplicateName(name.to_string()));
        }
        let mixture = Mixture::new(name, image, &self.settings, &mut self.log)?;
        self.mixtures.push(mixture);
        Ok(&self.mixtures[self.mixtures.len() - 1])
    }

    pub fn rename_calibration(&mut self, from: &str, to: &str) -> Result<(), SessionError> {
        if from != to && self.calibrations.iter().any(|c| c.name() == to) {
            return Err(SessionError::DuplicateName(to.to_string()));
        }
        let calibration = self
            .calibrations
            .iter_mut()
            .find(|c| c.name() == from)
            .ok_or_else(|| SessionError::UnknownCalibration(from.to_string()))?;
        calibration.rename(to);
        self.log.add_entry(
            "Rename Calibration",
            &format!("'{}' → '{}'", from, to),
            vec![Parameter::new("from", from), Parameter::new("to", to)],
        );
        Ok(())
    }

    pub fn rename_mixture(&mut self, from: &str, to: &str) -> Result<(), SessionError> {
        if from != to && self.mixtures.iter().any(|m| m.name() == to) {
            return Err(SessionError::DuplicateName(to.to_string()));
        }
        let mixture = self
            .mixtures
            .iter_mut()
            .find(|m| m.name() == from)
            .ok_or_else(|| SessionError::UnknownMixture(from.to_string()))?;
        mixture.rename(to);
        self.log.add_entry(
            "Rename Mixture",
            &format!("'{}' → '{}'", from, to),
            vec![Parameter::new("from", from), Parameter::new("to", to)],
        );
        Ok(())
    }

    pub fn remove_calibration(&mut self, name: &str) -> Result<Calibration, SessionError> {
        let pos = self
            .calibrations
            .iter()
            .position(|c| c.name() == name)
            .ok_or_else(|| SessionError::UnknownCalibration(name.to_string()))?;
        self.log.add_entry(
            "Remove Calibration",
            &format!("'{}'", name),
            vec![Parameter::new("name", name)],
        );
        Ok(self.calibrations.remove(pos))
    }

    pub fn remove_mixture(&mut self, name: &str) -> Result<Mixture, SessionError> {
        let pos = self
            .mixtures
            .iter()
            .position(|m| m.name() == name)
            .ok_or_else(|| SessionError::UnknownMixture(name.to_string()))?;
        self.log.add_entry(
            "Remove Mixture",
            &format!("'{}'", name),
            vec![Parameter::new("name", name)],
        );
        Ok(self.mixtures.remove(pos))
    }

    /// Solve one mixture against the named calibrations (in that order)
    pub fn solve(
        &mut self,
        mixture: &str,
        calibrations: &[&str],
        channel: Channel,
    ) -> Result<ChannelSolution, SessionError> {
        let mix = find_mixture(&self.mixtures, mixture)?;
        let cals = find_calibrations(&self.calibrations, calibrations)?;
        Ok(solve_concentration(
            mix,
            &cals,
            channel,
            self.settings.selection,
            &mut self.log,
        )?)
    }

    /// Solve R, G and B independently
    pub fn solve_all(
        &mut self,
        mixture: &str,
        calibrations: &[&str],
    ) -> Result<PerChannel<Result<ChannelSolution, SolveError>>, SessionError> {
        let mix = find_mixture(&self.mixtures, mixture)?;
        let cals = find_calibrations(&self.calibrations, calibrations)?;
        Ok(solve_all_channels(
            mix,
            &cals,
            self.settings.selection,
            &mut self.log,
        ))
    }
}

fn find_mixture<'a>(mixtures: &'a [Mixture], name: &str) -> Result<&'a Mixture, SessionError> {
    mixtures
        .iter()
        .find(|m| m.name() == name)
        .ok_or_else(|| SessionError::UnknownMixture(name.to_string()))
}

fn find_calibrations<'a>(
    calibrations: &'a [Calibration],
    names: &[&str],
) -> Result<Vec<&'a Calibration>, SessionError> {
    names
        .iter()
        .map(|name| {
            calibrations
                .iter()
                .find(|c| c.name() == *name)
                .ok_or_else(|| SessionError::UnknownCalibration(name.to_string()))
        })
        .collect()
}

impl Default for Session {
    fn default() -> Self {
        Self::new(AnalysisSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn blank() -> RgbImage {
        RgbImage::from_pixel(40, 30, Rgb([235, 235, 235]))
    }

    #[test]
    fn test_registry_add_rename_remove() {
        let mut session = Session::default();
        session.add_calibration("A", blank(), vec![1.0, 2.0]).unwrap();
        session.add_calibration("B", blank(), vec![1.0, 2.0]).unwrap();
        session.add_mixture("M", blank()).unwrap();

        assert!(matches!(
            session.add_calibration("A", blank(), vec![1.0]),
            Err(SessionError::DuplicateName(_))
        ));
        assert!(matches!(
            session.rename_calibration("A", "B"),
            Err(SessionError::DuplicateName(_))
        ));

        session.rename_calibration("A", "C").unwrap();
        assert!(session.calibration("A").is_err());
        assert_eq!(session.calibration("C").unwrap().name(), "C");

        session.rename_mixture("M", "N").unwrap();
        assert!(session.mixture("N").is_ok());

        let removed = session.remove_calibration("B").unwrap();
        assert_eq!(removed.name(), "B");
        assert_eq!(session.calibrations().len(), 1);
        assert!(session.remove_mixture("M").is_err());
        let renames: Vec<_> = session.log.entries_for("Rename Calibration").collect();
        assert_eq!(renames.len(), 1);
        assert_eq!(renames[0].parameter("from"), Some("A"));
        assert_eq!(renames[0].parameter("to"), Some("C"));
    }

    #[test]
    fn test_solve_reports_diagnostics() {
        let mut session = Session::default();
        session.add_calibration("A", blank(), vec![1.0, 2.0]).unwrap();
        session.add_mixture("M", blank()).unwrap();

        assert!(matches!(
            session.solve("X", &["A"], Channel::R),
            Err(SessionError::UnknownMixture(_))
        ));
        assert!(matches!(
            session.solve("M", &["Z"], Channel::R),
            Err(SessionError::UnknownCalibration(_))
        ));
        // The blank calibration has no bands, so nothing is shared
        let err = session.solve("M", &["A"], Channel::G).unwrap_err();
        assert!(matches!(err, SessionError::Solve(SolveError::NoSharedPeaks(_))));
        assert_eq!(session.log.entries_for("Solve Concentration").count(), 1);

        let all = session.solve_all("M", &["A"]).unwrap();
        assert!(all.iter().all(|(_, r)| r.is_err()));
    }
}
