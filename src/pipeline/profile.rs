/// Intensity profile extraction
///
/// Collapses a peak image to one value per pixel column and channel:
/// `255 - mean(foreground values)`, so columns with more ink read higher.
/// Columns without foreground pixels in a channel read 0.

use image::RgbImage;

use crate::data::chromatogram::{Channel, IntensityProfile, PerChannel};

pub fn extract_profile(image: &RgbImage) -> IntensityProfile {
    let channels = PerChannel::from_fn(|channel| column_profile(image, channel));
    IntensityProfile { channels }
}

fn column_profile(image: &RgbImage, channel: Channel) -> Vec<u8> {
    let c = channel.index();
    (0..image.width())
        .map(|x| {
            let mut sum = 0u64;
            let mut count = 0u64;
            for y in 0..image.height() {
                let v = image.get_pixel(x, y)[c];
                sum += v as u64;
                if v > 0 {
                    count += 1;
                }
            }
            if count == 0 {
                0
            } else {
                (255.0 - sum as f64 / count as f64) as u8
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_empty_columns_are_zero() {
        let mut img = RgbImage::new(4, 3);
        img.put_pixel(1, 0, Rgb([100, 0, 255]));
        let profile = extract_profile(&img);
        assert_eq!(profile.width(), 4);
        assert_eq!(profile.channel(Channel::R), &[0, 155, 0, 0]);
        // Green has no foreground anywhere
        assert_eq!(profile.channel(Channel::G), &[0, 0, 0, 0]);
        // Full-intensity blue inverts to 0
        assert_eq!(profile.channel(Channel::B), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_mean_ignores_background_pixels() {
        let mut img = RgbImage::new(1, 4);
        img.put_pixel(0, 0, Rgb([50, 50, 50]));
        img.put_pixel(0, 1, Rgb([100, 100, 100]));
        let profile = extract_profile(&img);
        // mean of 50 and 100 is 75 → 180
        assert_eq!(profile.channel(Channel::G), &[180]);
    }

    #[test]
    fn test_truncates_fractional_means() {
        let mut img = RgbImage::new(1, 3);
        img.put_pixel(0, 0, Rgb([1, 1, 1]));
        img.put_pixel(0, 1, Rgb([2, 2, 2]));
        img.put_pixel(0, 2, Rgb([2, 2, 2]));
        let profile = extract_profile(&img);
        // 255 - 5/3 = 253.33
        assert_eq!(profile.channel(Channel::R), &[253]);
    }
}
