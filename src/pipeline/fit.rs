/// Calibration curve fitting: ordinary least squares of peak area against
/// concentration, with R² as goodness of fit.

use crate::data::chromatogram::FitLine;

/// Concentrations paired with `count` peak areas.
///
/// Areas line up with the *last* concentrations, so a calibration whose
/// lowest standard left no measurable band still fits.
pub fn align_tail(concentrations: &[f64], count: usize) -> &[f64] {
    &concentrations[concentrations.len().saturating_sub(count)..]
}

/// Fit `area = slope * concentration + intercept`.
///
/// When there are more areas than concentrations only the last areas are
/// used. R² is `None` when it is undefined: all fitted areas are equal, or
/// fewer than two points (or a single distinct concentration) were available,
/// in which case the line is flat through the mean area.
pub fn fit_line(concentrations: &[f64], areas: &[f64]) -> FitLine {
    let n = concentrations.len().min(areas.len());
    if areas.len() > concentrations.len() {
        log::warn!(
            "{} peak areas but only {} concentrations; fitting the last {}",
            areas.len(),
            concentrations.len(),
            n
        );
    }
    let xs = align_tail(concentrations, n);
    let ys = &areas[areas.len() - n..];

    if n == 0 {
        return FitLine {
            slope: 0.0,
            intercept: 0.0,
            r_squared: None,
            points: 0,
        };
    }

    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;
    let sxx: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();
    let sxy: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();

    if n < 2 || sxx == 0.0 {
        return FitLine {
            slope: 0.0,
            intercept: mean_y,
            r_squared: None,
            points: n,
        };
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;

    FitLine {
        slope,
        intercept,
        r_squared: r_squared(xs, ys, slope, intercept),
        points: n,
    }
}

/// `1 - SSR/SST`, or `None` when the areas have no spread
pub fn r_squared(xs: &[f64], ys: &[f64], slope: f64, intercept: f64) -> Option<f64> {
    if ys.is_empty() {
        return None;
    }
    let mean_y = ys.iter().sum::<f64>() / ys.len() as f64;
    let sst: f64 = ys.iter().map(|y| (y - mean_y).powi(2)).sum();
    let scale: f64 = ys.iter().map(|y| y * y).sum::<f64>().max(1.0);
    if sst <= scale * 1e-15 {
        return None;
    }
    let ssr: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (y - (slope * x + intercept)).powi(2))
        .sum();
    Some(1.0 - ssr / sst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovers_exact_line() {
        let conc = [1.0, 2.0, 3.0, 4.0, 5.0];
        let areas: Vec<f64> = conc.iter().map(|c| 3.0 * c + 7.0).collect();
        let fit = fit_line(&conc, &areas);
        assert!((fit.slope - 3.0).abs() < 1e-9);
        assert!((fit.intercept - 7.0).abs() < 1e-9);
        assert_eq!(fit.reported_slope(), 3);
        assert_eq!(fit.reported_intercept(), 7);
        assert!((fit.r_squared.unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(fit.points, 5);
    }

    #[test]
    fn test_constant_areas_leave_r2_undefined() {
        let fit = fit_line(&[1.0, 2.0, 3.0], &[50.0, 50.0, 50.0]);
        assert_eq!(fit.r_squared, None);
        assert_eq!(fit.slope, 0.0);
        assert_eq!(fit.intercept, 50.0);
        assert!(fit.to_string().contains("undefined"));
    }

    #[test]
    fn test_tail_alignment() {
        // Lowest standard produced no band: areas match the last three
        let conc = [0.5, 1.0, 2.0, 3.0];
        let fit = fit_line(&conc, &[20.0, 40.0, 60.0]);
        assert_eq!(align_tail(&conc, 3), &[1.0, 2.0, 3.0]);
        assert!((fit.slope - 20.0).abs() < 1e-9);
        assert!(fit.intercept.abs() < 1e-9);
        assert_eq!(fit.points, 3);
    }

    #[test]
    fn test_more_areas_than_concentrations() {
        let fit = fit_line(&[1.0, 2.0], &[999.0, 10.0, 20.0]);
        assert_eq!(fit.points, 2);
        assert!((fit.slope - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_inputs() {
        let empty = fit_line(&[1.0, 2.0], &[]);
        assert_eq!(empty.points, 0);
        assert_eq!(empty.r_squared, None);

        let single = fit_line(&[2.0], &[14.0]);
        assert_eq!(single.intercept, 14.0);
        assert_eq!(single.r_squared, None);
    }

    #[test]
    fn test_noisy_fit_r2_below_one() {
        let conc = [1.0, 2.0, 3.0, 4.0];
        let fit = fit_line(&conc, &[10.0, 22.0, 28.0, 41.0]);
        let r2 = fit.r_squared.unwrap();
        assert!(r2 > 0.95 && r2 < 1.0);
    }
}
