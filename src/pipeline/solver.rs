/// Multi-component concentration solver
///
/// Every peak shared by a mixture and all selected calibrations gives one
/// linear equation in the unknown concentrations:
///
/// ```text
/// mixture_area[peak] = Σ slope_i[peak] · c_i + Σ intercept_i[peak]
/// ```
///
/// Peaks are ranked by how well the calibrations fit them (average R²), the
/// chosen ones are assembled into a dense matrix and solved with nalgebra.
/// Each channel is solved on its own; channels are not reconciled.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::calibration::Calibration;
use super::mixture::Mixture;
use crate::data::chromatogram::{Channel, FitLine, PerChannel};
use crate::log::reproducibility::{AnalysisLog, Parameter};

/// Selected peaks averaging below this R² trigger a data-quality warning
pub const QUALITY_WARNING_R2: f64 = 0.9;

/// Relative tolerance for rank and consistency checks
const SOLVE_TOLERANCE: f64 = 1e-9;

/// Failures surfaced to the caller as a diagnostic message
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolveError {
    #[error("No calibrations selected")]
    NoCalibrations,
    #[error("Calibration '{0}' is selected more than once")]
    DuplicateCalibration(String),
    #[error("No peaks are shared by mixture '{0}' and every selected calibration")]
    NoSharedPeaks(String),
    #[error("Only {qualifying} peaks reach R² ≥ {min_r2}, but {unknowns} concentrations are unknown")]
    TooFewPeaks {
        qualifying: usize,
        unknowns: usize,
        min_r2: f64,
    },
    #[error("No unique solution: {equations} equations of rank {rank} for {unknowns} unknowns")]
    Underdetermined {
        equations: usize,
        unknowns: usize,
        rank: usize,
    },
    #[error("No solution: the selected equations are singular")]
    Singular,
}

/// Which shared peaks go into the system
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum PeakSelection {
    /// The N best peaks by average R², N = number of calibrations
    TopN,
    /// Every peak whose average R² reaches `min_r2`
    Threshold { min_r2: f64 },
}

impl std::fmt::Display for PeakSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeakSelection::TopN => write!(f, "top-N by average R²"),
            PeakSelection::Threshold { min_r2 } => write!(f, "average R² ≥ {}", min_r2),
        }
    }
}

/// `Σ coefficients[i] · c_i + constant`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinearExpression {
    pub coefficients: Vec<f64>,
    pub constant: f64,
}

impl LinearExpression {
    /// Render with variable names, e.g. `3·[A] + 2·[B] + 9`
    pub fn format(&self, variables: &[String]) -> String {
        let mut terms: Vec<String> = self
            .coefficients
            .iter()
            .zip(variables)
            .map(|(a, name)| format!("{}·[{}]", a, name))
            .collect();
        terms.push(format!("{}", self.constant));
        terms.join(" + ")
    }
}

/// `lhs = rhs` for one peak
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Equation {
    pub peak: usize,
    /// Measured mixture area
    pub lhs: f64,
    pub rhs: LinearExpression,
    /// Average R² of the calibrations at this peak; undefined R² counts as 0
    pub score: f64,
}

/// Equations for one mixture, one channel and an ordered set of calibrations
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConcentrationSystem {
    pub mixture: String,
    pub channel: Channel,
    /// One unknown per calibration, named after it
    pub variables: Vec<String>,
    /// One per shared peak, in peak order
    pub equations: Vec<Equation>,
}

/// Solved concentrations for one channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSolution {
    pub channel: Channel,
    pub selected_peaks: Vec<usize>,
    /// Calibration name → concentration, in calibration order
    pub concentrations: Vec<(String, f64)>,
    /// Euclidean norm of the residual over the selected equations
    pub residual: f64,
    pub warning: Option<String>,
}

impl ChannelSolution {
    pub fn concentration(&self, name: &str) -> Option<f64> {
        self.concentrations
            .iter()
            .find(|(n, _)| n == name)
            .map(|&(_, c)| c)
    }
}

impl ConcentrationSystem {
    /// Gather the fit lines of every calibration at every shared peak
    pub fn build(
        mixture: &Mixture,
        calibrations: &[&Calibration],
        channel: Channel,
    ) -> Result<Self, SolveError> {
        let variables: Vec<String> = calibrations.iter().map(|c| c.name().to_string()).collect();
        let curves: Vec<Vec<FitLine>> = calibrations
            .iter()
            .map(|c| c.peaks().iter().map(|p| p.fit[channel]).collect())
            .collect();
        Self::from_curves(
            mixture.name(),
            channel,
            variables,
            mixture.area().channel(channel),
            &curves,
        )
    }

    /// `curves[i][j]` is the fit of calibration `i` at peak `j`
    pub fn from_curves(
        mixture: &str,
        channel: Channel,
        variables: Vec<String>,
        mixture_areas: &[f64],
        curves: &[Vec<FitLine>],
    ) -> Result<Self, SolveError> {
        if variables.is_empty() {
            return Err(SolveError::NoCalibrations);
        }
        for (i, name) in variables.iter().enumerate() {
            if variables[..i].contains(name) {
                return Err(SolveError::DuplicateCalibration(name.clone()));
            }
        }

        let shared = curves
            .iter()
            .map(Vec::len)
            .fold(mixture_areas.len(), usize::min);
        if shared == 0 {
            return Err(SolveError::NoSharedPeaks(mixture.to_string()));
        }

        let equations = (0..shared)
            .map(|peak| {
                let fits: Vec<&FitLine> = curves.iter().map(|c| &c[peak]).collect();
                let score = fits
                    .iter()
                    .map(|f| f.r_squared.unwrap_or(0.0))
                    .sum::<f64>()
                    / fits.len() as f64;
                Equation {
                    peak,
                    lhs: mixture_areas[peak],
                    rhs: LinearExpression {
                        coefficients: fits.iter().map(|f| f.slope).collect(),
                        constant: fits.iter().map(|f| f.intercept).sum(),
                    },
                    score,
                }
            })
            .collect();

        Ok(Self {
            mixture: mixture.to_string(),
            channel,
            variables,
            equations,
        })
    }

    pub fn unknowns(&self) -> usize {
        self.variables.len()
    }

    pub fn scores(&self) -> Vec<f64> {
        self.equations.iter().map(|e| e.score).collect()
    }

    /// Peak indices to solve with, ascending
    pub fn select(&self, selection: PeakSelection) -> Result<Vec<usize>, SolveError> {
        let scores = self.scores();
        let n = self.unknowns();
        match selection {
            PeakSelection::TopN => {
                if scores.len() < n {
                    log::warn!(
                        "Only {} shared peaks for {} unknowns on channel {}",
                        scores.len(),
                        n,
                        self.channel
                    );
                }
                Ok(select_top_n(&scores, n))
            }
            PeakSelection::Threshold { min_r2 } => {
                let chosen = select_above(&scores, min_r2);
                if chosen.len() < n {
                    return Err(SolveError::TooFewPeaks {
                        qualifying: chosen.len(),
                        unknowns: n,
                        min_r2,
                    });
                }
                Ok(chosen)
            }
        }
    }

    /// Solve the equations of the given peaks.
    ///
    /// Square systems use an LU solve. Overdetermined systems are solved in
    /// the least-squares sense and flagged when the equations disagree.
    pub fn solve(&self, selected: &[usize]) -> Result<ChannelSolution, SolveError> {
        let n = self.unknowns();
        let rows: Vec<&Equation> = selected
            .iter()
            .filter_map(|&peak| self.equations.get(peak))
            .collect();
        let m = rows.len();
        if m == 0 {
            return Err(SolveError::NoSharedPeaks(self.mixture.clone()));
        }

        let a = DMatrix::from_fn(m, n, |r, c| rows[r].rhs.coefficients[c]);
        let b = DVector::from_iterator(m, rows.iter().map(|e| e.lhs - e.rhs.constant));

        let svd = a.clone().svd(true, true);
        let largest = svd.singular_values.max();
        let eps = largest.max(1.0) * SOLVE_TOLERANCE;
        let rank = svd.rank(eps);
        if m < n || rank < n {
            return Err(SolveError::Underdetermined {
                equations: m,
                unknowns: n,
                rank,
            });
        }

        let x = if m == n {
            a.clone().lu().solve(&b).ok_or(SolveError::Singular)?
        } else {
            svd.solve(&b, eps).map_err(|_| SolveError::Singular)?
        };

        let residual = (&a * &x - &b).norm();
        let mut warnings = Vec::new();
        if residual > b.norm().max(1.0) * 1e-6 {
            warnings.push(format!(
                "equations are inconsistent; least-squares residual {:.4}",
                residual
            ));
        }
        let weak: Vec<String> = rows
            .iter()
            .filter(|e| e.score < QUALITY_WARNING_R2)
            .map(|e| format!("peak {} (R²={:.3})", e.peak + 1, e.score))
            .collect();
        if !weak.is_empty() {
            warnings.push(format!("low-quality peaks selected: {}", weak.join(", ")));
        }
        let warning = if warnings.is_empty() {
            None
        } else {
            let text = warnings.join("; ");
            log::warn!("Channel {}: {}", self.channel, text);
            Some(text)
        };

        Ok(ChannelSolution {
            channel: self.channel,
            selected_peaks: rows.iter().map(|e| e.peak).collect(),
            concentrations: self.variables.iter().cloned().zip(x.iter().copied()).collect(),
            residual,
            warning,
        })
    }
}

/// Indices of the `n` highest scores, returned ascending.
/// Ties keep the lower index.
pub fn select_top_n(scores: &[f64], n: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order.truncate(n);
    order.sort_unstable();
    order
}

/// Indices whose score reaches `min_r2`
pub fn select_above(scores: &[f64], min_r2: f64) -> Vec<usize> {
    scores
        .iter()
        .enumerate()
        .filter(|&(_, &s)| s >= min_r2)
        .map(|(i, _)| i)
        .collect()
}

/// Build, select and solve for one channel
pub fn solve_concentration(
    mixture: &Mixture,
    calibrations: &[&Calibration],
    channel: Channel,
    selection: PeakSelection,
    log: &mut AnalysisLog,
) -> Result<ChannelSolution, SolveError> {
    let result = ConcentrationSystem::build(mixture, calibrations, channel).and_then(|system| {
        for eq in &system.equations {
            log::debug!(
                "peak {}: {} = {}",
                eq.peak + 1,
                eq.lhs,
                eq.rhs.format(&system.variables)
            );
        }
        let selected = system.select(selection)?;
        system.solve(&selected)
    });

    let names: Vec<&str> = calibrations.iter().map(|c| c.name()).collect();
    let description = match &result {
        Ok(solution) => format!(
            "'{}' channel {}: {}",
            mixture.name(),
            channel,
            solution
                .concentrations
                .iter()
                .map(|(name, c)| format!("[{}]={:.4}", name, c))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Err(e) => format!("'{}' channel {}: {}", mixture.name(), channel, e),
    };
    log.add_entry(
        "Solve Concentration",
        &description,
        vec![
            Parameter::new("calibrations", names.join(",")),
            Parameter::new("selection", selection),
        ],
    );
    result
}

/// Solve every channel independently
pub fn solve_all_channels(
    mixture: &Mixture,
    calibrations: &[&Calibration],
    selection: PeakSelection,
    log: &mut AnalysisLog,
) -> PerChannel<Result<ChannelSolution, SolveError>> {
    PerChannel::from_fn(|channel| solve_concentration(mixture, calibrations, channel, selection, log))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(slope: f64, intercept: f64, r2: f64) -> FitLine {
        FitLine {
            slope,
            intercept,
            r_squared: Some(r2),
            points: 5,
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_top_n_picks_best_average_r2() {
        assert_eq!(select_top_n(&[0.95, 0.80, 0.99], 2), vec![0, 2]);
        // Ties keep the earlier peak
        assert_eq!(select_top_n(&[0.9, 0.9, 0.9], 2), vec![0, 1]);
        assert_eq!(select_top_n(&[0.5], 3), vec![0]);
    }

    #[test]
    fn test_select_above_threshold() {
        assert_eq!(select_above(&[0.95, 0.80, 0.99], 0.9), vec![0, 2]);
        assert!(select_above(&[0.5, 0.6], 0.9).is_empty());
    }

    #[test]
    fn test_recovers_two_component_mixture() {
        // Calibration A and B, three shared peaks
        let a = vec![line(3.0, 7.0, 0.99), line(1.0, 2.0, 0.98), line(0.5, 1.0, 0.70)];
        let b = vec![line(1.0, 4.0, 0.97), line(4.0, 1.0, 0.99), line(2.0, 0.0, 0.60)];
        let (ca, cb) = (2.5, 1.25);
        let areas: Vec<f64> = (0..3)
            .map(|j| a[j].predict(ca) + b[j].predict(cb))
            .collect();

        let system =
            ConcentrationSystem::from_curves("M", Channel::R, names(&["A", "B"]), &areas, &[a, b])
                .unwrap();
        assert_eq!(system.equations.len(), 3);

        let selected = system.select(PeakSelection::TopN).unwrap();
        assert_eq!(selected, vec![0, 1]);

        let solution = system.solve(&selected).unwrap();
        assert!((solution.concentration("A").unwrap() - ca).abs() < 1e-9);
        assert!((solution.concentration("B").unwrap() - cb).abs() < 1e-9);
        assert!(solution.residual < 1e-9);
        assert_eq!(solution.warning, None);
    }

    #[test]
    fn test_overdetermined_least_squares() {
        let a = vec![line(3.0, 0.0, 0.99), line(1.0, 0.0, 0.99), line(2.0, 0.0, 0.99)];
        let areas: Vec<f64> = a.iter().map(|f| f.predict(4.0)).collect();
        let system =
            ConcentrationSystem::from_curves("M", Channel::G, names(&["A"]), &areas, &[a]).unwrap();
        let selected = system
            .select(PeakSelection::Threshold { min_r2: 0.9 })
            .unwrap();
        assert_eq!(selected, vec![0, 1, 2]);
        let solution = system.solve(&selected).unwrap();
        assert!((solution.concentrations[0].1 - 4.0).abs() < 1e-9);
        assert_eq!(solution.warning, None);
    }

    #[test]
    fn test_inconsistent_system_warns() {
        let a = vec![line(1.0, 0.0, 0.99), line(1.0, 0.0, 0.99)];
        let system =
            ConcentrationSystem::from_curves("M", Channel::B, names(&["A"]), &[1.0, 3.0], &[a])
                .unwrap();
        let solution = system.solve(&[0, 1]).unwrap();
        assert!((solution.concentrations[0].1 - 2.0).abs() < 1e-9);
        assert!(solution.warning.unwrap().contains("inconsistent"));
    }

    #[test]
    fn test_threshold_too_few_peaks() {
        let a = vec![line(1.0, 0.0, 0.95), line(2.0, 0.0, 0.50)];
        let b = vec![line(2.0, 0.0, 0.95), line(1.0, 0.0, 0.50)];
        let system = ConcentrationSystem::from_curves(
            "M",
            Channel::R,
            names(&["A", "B"]),
            &[1.0, 1.0],
            &[a, b],
        )
        .unwrap();
        let err = system
            .select(PeakSelection::Threshold { min_r2: 0.9 })
            .unwrap_err();
        assert_eq!(
            err,
            SolveError::TooFewPeaks {
                qualifying: 1,
                unknowns: 2,
                min_r2: 0.9
            }
        );
        // Top-N still returns both, flagged as low quality
        let solution = system.solve(&system.select(PeakSelection::TopN).unwrap()).unwrap();
        assert!(solution.warning.unwrap().contains("peak 2"));
    }

    #[test]
    fn test_underdetermined_and_singular() {
        // Identical curves: rank 1 for 2 unknowns
        let a = vec![line(1.0, 0.0, 0.99), line(2.0, 0.0, 0.99)];
        let system = ConcentrationSystem::from_curves(
            "M",
            Channel::R,
            names(&["A", "B"]),
            &[3.0, 6.0],
            &[a.clone(), a],
        )
        .unwrap();
        let err = system.solve(&[0, 1]).unwrap_err();
        assert!(matches!(err, SolveError::Underdetermined { rank: 1, .. }));
        assert!(err.to_string().starts_with("No unique solution"));

        // One shared peak for two unknowns
        let short = ConcentrationSystem::from_curves(
            "M",
            Channel::R,
            names(&["A", "B"]),
            &[3.0],
            &[vec![line(1.0, 0.0, 0.9)], vec![line(2.0, 0.0, 0.9)]],
        )
        .unwrap();
        let selected = short.select(PeakSelection::TopN).unwrap();
        assert!(matches!(
            short.solve(&selected),
            Err(SolveError::Underdetermined { equations: 1, unknowns: 2, .. })
        ));
    }

    #[test]
    fn test_build_rejects_bad_inputs() {
        let curve = vec![line(1.0, 0.0, 0.9)];
        assert_eq!(
            ConcentrationSystem::from_curves("M", Channel::R, vec![], &[1.0], &[]).unwrap_err(),
            SolveError::NoCalibrations
        );
        assert_eq!(
            ConcentrationSystem::from_curves(
                "M",
                Channel::R,
                names(&["A", "A"]),
                &[1.0],
                &[curve.clone(), curve.clone()]
            )
            .unwrap_err(),
            SolveError::DuplicateCalibration("A".into())
        );
        assert_eq!(
            ConcentrationSystem::from_curves("M", Channel::R, names(&["A"]), &[], &[curve])
                .unwrap_err(),
            SolveError::NoSharedPeaks("M".into())
        );
    }

    #[test]
    fn test_undefined_r2_scores_zero() {
        let undefined = FitLine {
            slope: 0.0,
            intercept: 5.0,
            r_squared: None,
            points: 3,
        };
        let system = ConcentrationSystem::from_curves(
            "M",
            Channel::R,
            names(&["A", "B"]),
            &[1.0],
            &[vec![undefined], vec![line(1.0, 0.0, 0.8)]],
        )
        .unwrap();
        assert!((system.equations[0].score - 0.4).abs() < 1e-12);
        assert_eq!(
            system.equations[0].rhs.format(&system.variables),
            "0·[A] + 1·[B] + 5"
        );
    }
}
