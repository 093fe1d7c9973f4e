/// Lane image preprocessing
///
/// Turns a raw lane photograph into a binary band mask and a
/// background-suppressed colour image:
/// grayscale → Gaussian blur → CLAHE → adaptive threshold → elliptical opening.

use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::filter::separable_filter_equal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::settings::PreprocessSettings;
use crate::log::reproducibility::{AnalysisLog, Parameter};

/// Which kind of strip is being processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentMode {
    /// Several distinct bands stacked vertically
    Calibration,
    /// One continuous lane
    Mixture,
}

impl SegmentMode {
    pub fn block_count(self, settings: &PreprocessSettings) -> u32 {
        match self {
            SegmentMode::Calibration => settings.calibration_block_count,
            SegmentMode::Mixture => settings.mixture_block_count,
        }
    }
}

impl std::fmt::Display for SegmentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentMode::Calibration => write!(f, "calibration"),
            SegmentMode::Mixture => write!(f, "mixture"),
        }
    }
}

/// Output of the preprocessing chain
#[derive(Debug, Clone)]
pub struct Preprocessed {
    /// 255 = band, 0 = background
    pub mask: GrayImage,
    /// Original colours where the mask is set, black elsewhere
    pub suppressed: RgbImage,
}

/// Run the full chain on one raster
pub fn preprocess(
    image: &RgbImage,
    mode: SegmentMode,
    settings: &PreprocessSettings,
    log: &mut AnalysisLog,
) -> Preprocessed {
    let gray = to_grayscale(image);
    let blurred = gaussian_blur(&gray, settings.blur_kernel_size, settings.blur_sigma);
    let equalized = clahe(&blurred, settings.clahe_clip_limit, settings.clahe_tile_grid);
    let block_size = threshold_block_size(image.height(), mode.block_count(settings));
    let thresholded = adaptive_threshold_inv(&equalized, block_size, settings.threshold_offset);
    let mask = morph_open(&thresholded, settings.opening_kernel_size);
    let suppressed = apply_mask(image, &mask);

    let foreground = mask.pixels().filter(|p| p[0] > 0).count();
    log.add_entry(
        "Preprocessing",
        &format!(
            "{} mode on {}×{} image: {} foreground pixels",
            mode,
            image.width(),
            image.height(),
            foreground
        ),
        vec![
            Parameter::new("blur_kernel_size", settings.blur_kernel_size),
            Parameter::new("blur_sigma", settings.blur_sigma),
            Parameter::new("clahe_clip_limit", settings.clahe_clip_limit),
            Parameter::new(
                "clahe_tile_grid",
                format!("{}x{}", settings.clahe_tile_grid.0, settings.clahe_tile_grid.1),
            ),
            Parameter::new("block_size", block_size),
            Parameter::new("threshold_offset", settings.threshold_offset),
            Parameter::new("opening_kernel_size", settings.opening_kernel_size),
        ],
    );

    Preprocessed { mask, suppressed }
}

// =========================================================================
//  Grayscale / Blur
// =========================================================================

/// Luma conversion with `0.299R + 0.587G + 0.114B`
pub fn to_grayscale(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        let luma = 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
        Luma([luma.round().min(255.0) as u8])
    })
}

/// Normalised 1-D Gaussian kernel of `size` taps
pub fn gaussian_kernel(size: u32, sigma: f64) -> Vec<f64> {
    let size = size.max(1) as usize;
    let center = (size - 1) as f64 / 2.0;
    let weights: Vec<f64> = (0..size)
        .map(|i| {
            let d = i as f64 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

/// Gaussian smoothing with a fixed kernel size
///
/// Filtered in `f32` so the intermediate pass is not truncated to integers;
/// borders are padded by continuity.
pub fn gaussian_blur(image: &GrayImage, kernel_size: u32, sigma: f64) -> GrayImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return image.clone();
    }
    let kernel: Vec<f32> = gaussian_kernel(kernel_size, sigma)
        .into_iter()
        .map(|weight| weight as f32)
        .collect();
    let levels: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(w, h, |x, y| Luma([image.get_pixel(x, y)[0] as f32]));
    let smoothed = separable_filter_equal(&levels, &kernel);
    GrayImage::from_fn(w, h, |x, y| {
        Luma([smoothed.get_pixel(x, y)[0].round().clamp(0.0, 255.0) as u8])
    })
}

// =========================================================================
//  Contrast-Limited Adaptive Histogram Equalisation
// =========================================================================

/// CLAHE: per-tile clipped histogram equalisation, bilinearly blended between tiles
pub fn clahe(image: &GrayImage, clip_limit: f64, tile_grid: (u32, u32)) -> GrayImage {
    let (w, h) = (image.width() as usize, image.height() as usize);
    if w == 0 || h == 0 {
        return image.clone();
    }

    let tile_w = w.div_ceil(tile_grid.0.clamp(1, w as u32) as usize);
    let tile_h = h.div_ceil(tile_grid.1.clamp(1, h as u32) as usize);
    // Recount so that no tile is empty
    let tiles_x = w.div_ceil(tile_w);
    let tiles_y = h.div_ceil(tile_h);

    let mut luts = vec![[0u8; 256]; tiles_x * tiles_y];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let (x0, x1) = (tx * tile_w, ((tx + 1) * tile_w).min(w));
            let (y0, y1) = (ty * tile_h, ((ty + 1) * tile_h).min(h));
            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[image.get_pixel(x as u32, y as u32)[0] as usize] += 1;
                }
            }
            let area = ((x1 - x0) * (y1 - y0)) as u32;
            clip_histogram(&mut hist, clip_limit, area);

            let scale = 255.0 / area as f64;
            let lut = &mut luts[ty * tiles_x + tx];
            let mut cumulative = 0u32;
            for (value, count) in hist.iter().enumerate() {
                cumulative += count;
                lut[value] = (cumulative as f64 * scale).round().min(255.0) as u8;
            }
        }
    }

    GrayImage::from_fn(w as u32, h as u32, |x, y| {
        let value = image.get_pixel(x, y)[0] as usize;
        let (tx1, tx2, xa) = tile_neighbours(x as usize, tile_w, tiles_x);
        let (ty1, ty2, ya) = tile_neighbours(y as usize, tile_h, tiles_y);
        let lut = |tx: usize, ty: usize| luts[ty * tiles_x + tx][value] as f64;
        let top = lut(tx1, ty1) * (1.0 - xa) + lut(tx2, ty1) * xa;
        let bottom = lut(tx1, ty2) * (1.0 - xa) + lut(tx2, ty2) * xa;
        let v = top * (1.0 - ya) + bottom * ya;
        Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}

/// Clip bins at `clip_limit * area / 256` and spread the excess evenly
fn clip_histogram(hist: &mut [u32; 256], clip_limit: f64, area: u32) {
    let clip = ((clip_limit * area as f64 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }

    let batch = excess / 256;
    let residual = (excess % 256) as usize;
    for bin in hist.iter_mut() {
        *bin += batch;
    }
    if residual > 0 {
        let step = (256 / residual).max(1);
        for bin in hist.iter_mut().step_by(step).take(residual) {
            *bin += 1;
        }
    }
}

/// The two tile indices whose centres bracket `pos`, plus the blend weight
fn tile_neighbours(pos: usize, tile_size: usize, tiles: usize) -> (usize, usize, f64) {
    let t = pos as f64 / tile_size as f64 - 0.5;
    let t1 = t.floor();
    let weight = t - t1;
    let first = t1.max(0.0) as usize;
    let second = ((t1 + 1.0).max(0.0) as usize).min(tiles - 1);
    (first.min(tiles - 1), second, weight)
}

// =========================================================================
//  Adaptive Threshold
// =========================================================================

/// `height / block_count`, bumped to the next odd number (minimum 3)
pub fn threshold_block_size(height: u32, block_count: u32) -> u32 {
    let base = height / block_count.max(1);
    let odd = if base % 2 == 1 { base } else { base + 1 };
    odd.max(3)
}

/// Window sums over `2 * radius + 1` samples with edge samples replicated
fn box_sums_replicate(line: &[u64], radius: usize) -> Vec<u64> {
    let n = line.len();
    let mut prefix = vec![0u64; n + 1];
    for (i, v) in line.iter().enumerate() {
        prefix[i + 1] = prefix[i] + v;
    }
    (0..n)
        .map(|i| {
            let start = i as i64 - radius as i64;
            let end = i as i64 + radius as i64;
            let left_extra = (-start).max(0) as u64;
            let right_extra = (end - (n as i64 - 1)).max(0) as u64;
            let lo = start.max(0) as usize;
            let hi = (end as usize).min(n - 1);
            prefix[hi + 1] - prefix[lo] + left_extra * line[0] + right_extra * line[n - 1]
        })
        .collect()
}

/// Inverted binary threshold against the local mean minus `offset`:
/// pixels darker than their neighbourhood become 255.
pub fn adaptive_threshold_inv(image: &GrayImage, block_size: u32, offset: i32) -> GrayImage {
    let (w, h) = (image.width() as usize, image.height() as usize);
    if w == 0 || h == 0 {
        return image.clone();
    }
    let radius = (block_size / 2) as usize;

    let mut row_sums = vec![0u64; w * h];
    for y in 0..h {
        let row: Vec<u64> = (0..w).map(|x| image.get_pixel(x as u32, y as u32)[0] as u64).collect();
        row_sums[y * w..(y + 1) * w].copy_from_slice(&box_sums_replicate(&row, radius));
    }
    let mut window_sums = vec![0u64; w * h];
    for x in 0..w {
        let column: Vec<u64> = (0..h).map(|y| row_sums[y * w + x]).collect();
        for (y, sum) in box_sums_replicate(&column, radius).into_iter().enumerate() {
            window_sums[y * w + x] = sum;
        }
    }

    let window_area = ((2 * radius + 1) * (2 * radius + 1)) as f64;
    GrayImage::from_fn(w as u32, h as u32, |x, y| {
        let mean = (window_sums[y as usize * w + x as usize] as f64 / window_area).round() as i32;
        let pixel = image.get_pixel(x, y)[0] as i32;
        if pixel - mean > -offset {
            Luma([0])
        } else {
            Luma([255])
        }
    })
}

// =========================================================================
//  Morphology
// =========================================================================

/// Rows of an elliptical structuring element as `(row offset, half width)`
pub fn elliptical_kernel(size: u32) -> Vec<(i64, i64)> {
    let r = (size / 2) as i64;
    let inv_r2 = if r > 0 { 1.0 / (r * r) as f64 } else { 0.0 };
    (0..size as i64)
        .map(|i| {
            let dy = i - r;
            let half = if dy.abs() <= r {
                (r as f64 * (((r * r - dy * dy) as f64) * inv_r2).sqrt()).round() as i64
            } else {
                0
            };
            (dy, half)
        })
        .collect()
}

/// Per-row running count of foreground pixels, `w + 1` entries per row
fn foreground_prefix(mask: &GrayImage) -> Vec<u32> {
    let (w, h) = (mask.width() as usize, mask.height() as usize);
    let mut prefix = vec![0u32; (w + 1) * h];
    for y in 0..h {
        for x in 0..w {
            let on = (mask.get_pixel(x as u32, y as u32)[0] > 0) as u32;
            prefix[y * (w + 1) + x + 1] = prefix[y * (w + 1) + x] + on;
        }
    }
    prefix
}

/// Binary erosion (`erode == true`) or dilation. Pixels outside the image are ignored.
fn morph_binary(mask: &GrayImage, kernel: &[(i64, i64)], erode: bool) -> GrayImage {
    let (w, h) = (mask.width() as i64, mask.height() as i64);
    let prefix = foreground_prefix(mask);
    let stride = (w + 1) as usize;

    let rows: Vec<Vec<u8>> = (0..h)
        .into_par_iter()
        .map(|y| {
            (0..w)
                .map(|x| {
                    let mut hit = false;
                    let mut all = true;
                    for &(dy, half) in kernel {
                        let yy = y + dy;
                        if yy < 0 || yy >= h {
                            continue;
                        }
                        let lo = (x - half).max(0) as usize;
                        let hi = (x + half).min(w - 1) as usize;
                        let row = yy as usize * stride;
                        let on = prefix[row + hi + 1] - prefix[row + lo];
                        let span = (hi + 1 - lo) as u32;
                        if on > 0 {
                            hit = true;
                        }
                        if on < span {
                            all = false;
                        }
                    }
                    let set = if erode { all } else { hit };
                    if set {
                        255
                    } else {
                        0
                    }
                })
                .collect()
        })
        .collect();

    GrayImage::from_fn(w as u32, h as u32, |x, y| Luma([rows[y as usize][x as usize]]))
}

pub fn erode(mask: &GrayImage, kernel_size: u32) -> GrayImage {
    morph_binary(mask, &elliptical_kernel(kernel_size), true)
}

pub fn dilate(mask: &GrayImage, kernel_size: u32) -> GrayImage {
    morph_binary(mask, &elliptical_kernel(kernel_size), false)
}

/// Opening (erode then dilate) with an elliptical element
pub fn morph_open(mask: &GrayImage, kernel_size: u32) -> GrayImage {
    if mask.width() == 0 || mask.height() == 0 {
        return mask.clone();
    }
    dilate(&erode(mask, kernel_size), kernel_size)
}

/// Bitwise AND of a colour image with a binary mask
pub fn apply_mask(image: &RgbImage, mask: &GrayImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        if mask.get_pixel(x, y)[0] > 0 {
            *image.get_pixel(x, y)
        } else {
            Rgb([0, 0, 0])
        }
    })
}
