/// Peak area integration (trapezoidal rule over each boundary span)

use super::boundary::Minima;
use crate::data::chromatogram::{IntensityProfile, PeakArea, PerChannel};

/// Trapezoidal integral of unit-spaced samples. Fewer than two samples integrate to 0.
pub fn trapezoid(values: &[u8]) -> f64 {
    values
        .windows(2)
        .map(|w| (w[0] as f64 + w[1] as f64) / 2.0)
        .sum()
}

/// Area of every sub-peak span `[start, end]` (inclusive) in every channel
pub fn integrate_peaks(profile: &IntensityProfile, minima: &Minima) -> PeakArea {
    let spans = minima.spans();
    let channels = PerChannel::from_fn(|channel| {
        let values = profile.channel(channel);
        spans
            .iter()
            .map(|&(start, end)| {
                if values.is_empty() || start > end {
                    return 0.0;
                }
                let end = end.min(values.len() - 1);
                if start > end {
                    return 0.0;
                }
                trapezoid(&values[start..=end])
            })
            .collect()
    });
    PeakArea { channels }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::chromatogram::Channel;
    use crate::pipeline::boundary::Pairing;

    fn profile(values: Vec<u8>) -> IntensityProfile {
        IntensityProfile {
            channels: PerChannel {
                r: values.clone(),
                g: values.iter().map(|v| v / 2).collect(),
                b: values,
            },
        }
    }

    #[test]
    fn test_trapezoid_constant_segment() {
        // v over n columns, boundary-inclusive: v * (n - 1)
        assert_eq!(trapezoid(&[7; 10]), 63.0);
        assert_eq!(trapezoid(&[7]), 0.0);
        assert_eq!(trapezoid(&[]), 0.0);
        assert_eq!(trapezoid(&[0, 10, 0]), 10.0);
    }

    #[test]
    fn test_paired_spans() {
        let p = profile(vec![0, 10, 20, 10, 0, 0, 30, 30, 0]);
        let minima = Minima {
            indices: vec![0, 4, 5, 8],
            pairing: Pairing::Paired,
        };
        let area = integrate_peaks(&p, &minima);
        assert_eq!(area.len(), 2);
        assert_eq!(area.channel(Channel::R), &[40.0, 60.0]);
        assert_eq!(area.channel(Channel::G), &[20.0, 30.0]);
    }

    #[test]
    fn test_adjacent_spans_share_boundaries() {
        let p = profile(vec![0, 10, 0, 10, 0]);
        let minima = Minima {
            indices: vec![0, 2, 4],
            pairing: Pairing::Adjacent,
        };
        let area = integrate_peaks(&p, &minima);
        assert_eq!(area.channel(Channel::B), &[10.0, 10.0]);
    }

    #[test]
    fn test_degenerate_spans() {
        let p = profile(vec![5, 5, 5]);
        let minima = Minima {
            indices: vec![1, 1, 2, 9],
            pairing: Pairing::Paired,
        };
        let area = integrate_peaks(&p, &minima);
        // zero-width span, then a span clipped to the profile end
        assert_eq!(area.channel(Channel::R), &[0.0, 0.0]);

        let empty = integrate_peaks(
            &IntensityProfile::default(),
            &Minima {
                indices: vec![],
                pairing: Pairing::Adjacent,
            },
        );
        assert!(empty.is_empty());
    }
}
