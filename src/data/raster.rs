/// Raster boundary: decoding, validation, resizing and cropping of lane images.
///
/// Everything that enters the pipeline passes through here first, so shape
/// problems are rejected before any analysis starts.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

use super::geometry::BoundingBox;

#[derive(Error, Debug)]
pub enum RasterError {
    #[error("Image not found at {0}")]
    NotFound(String),
    #[error("Image not found or unreadable at {path}: {reason}")]
    Decode { path: String, reason: String },
    #[error("Scale must be a positive number, got {0}")]
    InvalidScale(f64),
    #[error("Image is empty ({width}×{height})")]
    Empty { width: u32, height: u32 },
    #[error("Invalid region '{0}': expected X,Y,WIDTH,HEIGHT")]
    InvalidRegion(String),
    #[error("Region {region} lies outside the {width}×{height} image")]
    RegionOutOfBounds {
        region: BoundingBox,
        width: u32,
        height: u32,
    },
    #[error("Invalid concentration '{0}': expected a number")]
    InvalidConcentration(String),
}

/// Decode any 8-bit colour image from disk into an RGB raster
pub fn load_image(path: &Path) -> Result<RgbImage, RasterError> {
    if !path.exists() {
        return Err(RasterError::NotFound(path.display().to_string()));
    }
    let decoded = image::open(path).map_err(|e| RasterError::Decode {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let rgb = decoded.to_rgb8();
    validate(&rgb)?;
    log::info!(
        "Loaded {} ({}×{})",
        path.display(),
        rgb.width(),
        rgb.height()
    );
    Ok(rgb)
}

/// A usable raster has at least one pixel
pub fn validate(image: &RgbImage) -> Result<(), RasterError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(RasterError::Empty {
            width: image.width(),
            height: image.height(),
        });
    }
    Ok(())
}

/// Bicubic resize by a uniform scale factor
pub fn resize_image(image: &RgbImage, scale: f64) -> Result<RgbImage, RasterError> {
    if !(scale > 0.0) || !scale.is_finite() {
        return Err(RasterError::InvalidScale(scale));
    }
    validate(image)?;
    let width = ((image.width() as f64 * scale).round() as u32).max(1);
    let height = ((image.height() as f64 * scale).round() as u32).max(1);
    Ok(imageops::resize(image, width, height, FilterType::CatmullRom))
}

/// Cut a region of interest out of a raster
pub fn crop_region(image: &RgbImage, region: BoundingBox) -> Result<RgbImage, RasterError> {
    if region.is_empty() || region.right() > image.width() || region.bottom() > image.height() {
        return Err(RasterError::RegionOutOfBounds {
            region,
            width: image.width(),
            height: image.height(),
        });
    }
    Ok(imageops::crop_imm(image, region.x, region.y, region.width, region.height).to_image())
}

/// Parse a region of interest written as `x,y,width,height`
pub fn parse_region(text: &str) -> Result<BoundingBox, RasterError> {
    let invalid = || RasterError::InvalidRegion(text.to_string());
    let values = text
        .split(',')
        .map(|token| token.trim().parse::<u32>().map_err(|_| invalid()))
        .collect::<Result<Vec<_>, _>>()?;
    match values.as_slice() {
        &[x, y, width, height] if width > 0 && height > 0 => {
            Ok(BoundingBox::new(x, y, width, height))
        }
        _ => Err(invalid()),
    }
}

/// Parse user-entered concentrations such as `"0.5 1 2 4"`
pub fn parse_concentrations(text: &str) -> Result<Vec<f64>, RasterError> {
    text.split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| RasterError::InvalidConcentration(token.to_string()))
        })
        .collect()
}
