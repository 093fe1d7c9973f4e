pub mod boundary;
pub mod calibration;
pub mod fit;
pub mod integrate;
pub mod mixture;
pub mod preprocess;
pub mod profile;
pub mod report;
pub mod segmentation;
pub mod session;
pub mod settings;
pub mod solver;

#[cfg(test)]
mod tests {
    use super::calibration::Calibration;
    use super::mixture::Mixture;
    use super::settings::AnalysisSettings;
    use super::solver::{solve_all_channels, solve_concentration, PeakSelection};
    use crate::data::chromatogram::Channel;
    use crate::log::reproducibility::AnalysisLog;
    use image::{Rgb, RgbImage};

    const BACKGROUND: u8 = 230;
    const SPOT_COLUMNS: [u32; 3] = [20, 100, 180];
    const SPOT_SIZE: u32 = 40;

    fn paint_spot(img: &mut RgbImage, x0: u32, y0: u32, value: u8) {
        for y in y0..y0 + SPOT_SIZE {
            for x in x0..x0 + SPOT_SIZE {
                img.put_pixel(x, y, Rgb([value, value, value]));
            }
        }
    }

    /// Two bands of three standards each. Inverted spot intensities are
    /// 60/100/140 on the bottom band and 60/90/120 on the top band.
    fn calibration_strip() -> RgbImage {
        let mut img = RgbImage::from_pixel(240, 160, Rgb([BACKGROUND; 3]));
        for (&x, value) in SPOT_COLUMNS.iter().zip([195, 155, 115]) {
            paint_spot(&mut img, x, 100, value);
        }
        for (&x, value) in SPOT_COLUMNS.iter().zip([195, 165, 135]) {
            paint_spot(&mut img, x, 20, value);
        }
        img
    }

    /// The same two bands on a strip tall enough that the default threshold
    /// window (height / 11) is wider than a spot
    fn tall_calibration_strip() -> RgbImage {
        let mut img = RgbImage::from_pixel(240, 550, Rgb([BACKGROUND; 3]));
        for (&x, value) in SPOT_COLUMNS.iter().zip([195, 155, 115]) {
            paint_spot(&mut img, x, 360, value);
        }
        for (&x, value) in SPOT_COLUMNS.iter().zip([195, 165, 135]) {
            paint_spot(&mut img, x, 120, value);
        }
        img
    }

    /// One lane with two separated peaks of inverted intensity 100 and 120
    fn mixture_lane() -> RgbImage {
        let mut img = RgbImage::from_pixel(240, 120, Rgb([BACKGROUND; 3]));
        paint_spot(&mut img, 20, 40, 155);
        paint_spot(&mut img, 100, 40, 135);
        img
    }

    fn settings() -> AnalysisSettings {
        let mut settings = AnalysisSettings::default();
        // One threshold window spanning the strip height
        settings.preprocess.calibration_block_count = 1;
        settings
    }

    fn calibrate(name: &str, settings: &AnalysisSettings) -> Calibration {
        let mut log = AnalysisLog::new();
        Calibration::new(name, calibration_strip(), vec![1.0, 2.0, 3.0], settings, &mut log)
            .unwrap()
    }

    #[test]
    fn test_bands_disjoint_and_bottom_first() {
        let cal = calibrate("A", &settings());
        let peaks = cal.peaks();
        assert_eq!(peaks.len(), 2);
        assert!(peaks[0].bounds.y > peaks[1].bounds.y);
        assert!(!peaks[0].bounds.intersects(&peaks[1].bounds));
        assert!(peaks.iter().all(|p| p.bounds.x == 0 && p.bounds.width == 240));
    }

    #[test]
    fn test_band_profiles_and_areas() {
        let cal = calibrate("A", &settings());
        let bottom = &cal.peaks()[0];

        let profile = bottom.profile.channel(Channel::G);
        assert_eq!(profile.len(), 240);
        assert_eq!(profile[10], 0);
        assert_eq!(profile[40], 60);
        assert_eq!(profile[80], 0);
        assert_eq!(profile[200], 140);

        // 40 columns of v between zero columns integrate to 40·v
        assert_eq!(bottom.area.channel(Channel::R), &[2400.0, 4000.0, 5600.0]);
        let fit = bottom.fit[Channel::R];
        assert_eq!(fit.reported_slope(), 1600);
        assert_eq!(fit.reported_intercept(), 800);
        assert_eq!(fit.reported_r_squared(), Some(1.0));

        let top = &cal.peaks()[1];
        assert_eq!(top.area.channel(Channel::B), &[2400.0, 3600.0, 4800.0]);
        assert_eq!(top.fit[Channel::B].reported_slope(), 1200);
    }

    #[test]
    fn test_rerun_is_bit_identical() {
        let first = calibrate("A", &settings());
        let second = calibrate("A", &settings());
        let mut sequential_settings = settings();
        sequential_settings.parallel = false;
        let sequential = calibrate("A", &sequential_settings);

        for other in [&second, &sequential] {
            assert_eq!(first.peaks().len(), other.peaks().len());
            for (a, b) in first.peaks().iter().zip(other.peaks()) {
                assert_eq!(a.bounds, b.bounds);
                assert_eq!(a.area, b.area);
                assert_eq!(a.fit, b.fit);
            }
        }
    }

    #[test]
    fn test_mixture_prominence_boundaries() {
        let mut log = AnalysisLog::new();
        let mix = Mixture::new("M", mixture_lane(), &settings(), &mut log).unwrap();
        assert_eq!(mix.minima().indices, vec![0, 79, 239]);
        assert_eq!(mix.area().channel(Channel::R), &[4000.0, 4800.0]);
    }

    #[test]
    fn test_solve_single_component_from_images() {
        let settings = settings();
        let cal = calibrate("dye", &settings);
        let mut log = AnalysisLog::new();
        let mix = Mixture::new("M", mixture_lane(), &settings, &mut log).unwrap();

        // Both bands fit perfectly; the tie keeps the first peak
        let solutions = solve_all_channels(&mix, &[&cal], PeakSelection::TopN, &mut log);
        for (_, result) in solutions.iter() {
            let solution = result.as_ref().unwrap();
            assert_eq!(solution.selected_peaks, vec![0]);
            assert!((solution.concentration("dye").unwrap() - 2.0).abs() < 1e-9);
        }
        assert_eq!(log.entries_for("Solve Concentration").count(), 3);

        // Both peaks: 1600c + 800 = 4000 and 1200c + 1200 = 4800 disagree
        let solution = solve_concentration(
            &mix,
            &[&cal],
            Channel::G,
            PeakSelection::Threshold { min_r2: 0.9 },
            &mut log,
        )
        .unwrap();
        assert_eq!(solution.selected_peaks, vec![0, 1]);
        assert!((solution.concentrations[0].1 - 2.36).abs() < 1e-9);
        assert!(solution.warning.unwrap().contains("inconsistent"));
    }

    #[test]
    fn test_default_settings_on_tall_strip() {
        let settings = AnalysisSettings::default();
        let mut log = AnalysisLog::new();
        let strip = tall_calibration_strip();
        let cal = Calibration::new("dye", strip.clone(), vec![1.0, 2.0, 3.0], &settings, &mut log)
            .unwrap();

        // 550 / 11 = 50, bumped to odd
        let preprocessing = log.entries_for("Preprocessing").next().unwrap();
        assert_eq!(preprocessing.parameter("block_size"), Some("51"));
        assert_eq!(preprocessing.parameter("opening_kernel_size"), Some("25"));

        let peaks = cal.peaks();
        assert_eq!(peaks.len(), 2);
        assert!(peaks[0].bounds.y > peaks[1].bounds.y);
        assert!(!peaks[0].bounds.intersects(&peaks[1].bounds));
        assert_eq!(peaks[0].area.channel(Channel::R), &[2400.0, 4000.0, 5600.0]);
        assert_eq!(peaks[1].area.channel(Channel::B), &[2400.0, 3600.0, 4800.0]);

        let mut again_log = AnalysisLog::new();
        let again =
            Calibration::new("dye", strip, vec![1.0, 2.0, 3.0], &settings, &mut again_log).unwrap();
        for (a, b) in cal.peaks().iter().zip(again.peaks()) {
            assert_eq!(a.bounds, b.bounds);
            assert_eq!(a.area, b.area);
            assert_eq!(a.fit, b.fit);
        }

        let mix = Mixture::new("M", mixture_lane(), &settings, &mut log).unwrap();
        let solution =
            solve_concentration(&mix, &[&cal], Channel::R, settings.selection, &mut log).unwrap();
        assert_eq!(solution.selected_peaks, vec![0]);
        assert!((solution.concentration("dye").unwrap() - 2.0).abs() < 1e-9);
    }
}
