/// Band segmentation
///
/// Finds the bands of a preprocessed lane strip and cuts the
/// background-suppressed image into one peak image per band.

use image::{GrayImage, Rgb, RgbImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use super::preprocess::{preprocess, SegmentMode};
use super::settings::AnalysisSettings;
use crate::data::geometry::{group_bounding_boxes, BoundingBox};
use crate::log::reproducibility::{AnalysisLog, Parameter};

const ANNOTATION_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const ANNOTATION_THICKNESS: u32 = 3;

/// One band cut out of the background-suppressed image
#[derive(Debug, Clone)]
pub struct PeakImage {
    /// Region of the source image this crop came from
    pub bounds: BoundingBox,
    pub image: RgbImage,
}

impl PeakImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }
}

/// Everything segmentation produces for one raster
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub mode: SegmentMode,
    pub mask: GrayImage,
    pub suppressed: RgbImage,
    /// Calibration: one per band, bottom band first. Mixture: the whole lane.
    pub peaks: Vec<PeakImage>,
    /// Source image with every band box drawn on it
    pub annotated: RgbImage,
}

/// Calibration strips: split into one peak image per band
pub fn segment_calibration(
    image: &RgbImage,
    settings: &AnalysisSettings,
    log: &mut AnalysisLog,
) -> Segmentation {
    let pre = preprocess(image, SegmentMode::Calibration, &settings.preprocess, log);

    let contours = external_contours(&pre.mask, settings.segmentation.min_contour_area);
    let boxes = band_boxes(&contours, image.width());
    let peaks: Vec<PeakImage> = boxes
        .iter()
        .map(|&bounds| PeakImage {
            bounds,
            image: crop(&pre.suppressed, bounds),
        })
        .collect();

    if peaks.is_empty() {
        log::warn!("No bands found above {} px²", settings.segmentation.min_contour_area);
    }
    log.add_entry(
        "Band Segmentation",
        &format!(
            "{} contours kept, {} bands after merging: [{}]",
            contours.len(),
            boxes.len(),
            boxes
                .iter()
                .map(|b| b.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
        vec![
            Parameter::new("min_contour_area", settings.segmentation.min_contour_area),
            Parameter::new("retrieval", "external"),
        ],
    );

    Segmentation {
        mode: SegmentMode::Calibration,
        annotated: annotate(image, &boxes),
        mask: pre.mask,
        suppressed: pre.suppressed,
        peaks,
    }
}

/// Mixture lanes: no band split, the whole suppressed image is one peak image
pub fn segment_mixture(
    image: &RgbImage,
    settings: &AnalysisSettings,
    log: &mut AnalysisLog,
) -> Segmentation {
    let pre = preprocess(image, SegmentMode::Mixture, &settings.preprocess, log);
    let bounds = BoundingBox::new(0, 0, image.width(), image.height());

    log.add_entry(
        "Lane Extraction",
        &format!("Whole {}×{} lane kept as a single peak image", image.width(), image.height()),
        Vec::new(),
    );

    Segmentation {
        mode: SegmentMode::Mixture,
        annotated: image.clone(),
        peaks: vec![PeakImage {
            bounds,
            image: pre.suppressed.clone(),
        }],
        mask: pre.mask,
        suppressed: pre.suppressed,
    }
}

/// Outermost contours of the mask whose enclosed area exceeds `min_area`
pub fn external_contours(mask: &GrayImage, min_area: f64) -> Vec<Contour<i32>> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .filter(|c| contour_area(c) > min_area)
        .collect()
}

/// Polygon area of a contour (shoelace formula)
pub fn contour_area(contour: &Contour<i32>) -> f64 {
    let points = &contour.points;
    if points.len() < 3 {
        return 0.0;
    }
    let twice_area: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum();
    twice_area.abs() as f64 / 2.0
}

/// Tight axis-aligned box around a contour
pub fn bounding_rect(contour: &Contour<i32>) -> BoundingBox {
    let (mut min_x, mut min_y) = (i32::MAX, i32::MAX);
    let (mut max_x, mut max_y) = (i32::MIN, i32::MIN);
    for p in &contour.points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    if contour.points.is_empty() {
        return BoundingBox::default();
    }
    BoundingBox::new(
        min_x.max(0) as u32,
        min_y.max(0) as u32,
        (max_x - min_x + 1) as u32,
        (max_y - min_y + 1) as u32,
    )
}

/// Full-width strips around each contour, merged and ordered bottom band first
pub fn band_boxes(contours: &[Contour<i32>], image_width: u32) -> Vec<BoundingBox> {
    let strips: Vec<BoundingBox> = contours
        .iter()
        .map(|c| bounding_rect(c).to_horizontal_strip(image_width))
        .collect();
    let mut grouped = group_bounding_boxes(&strips);
    grouped.sort_by(|a, b| b.y.cmp(&a.y));
    grouped
}

fn crop(image: &RgbImage, bounds: BoundingBox) -> RgbImage {
    image::imageops::crop_imm(image, bounds.x, bounds.y, bounds.width, bounds.height).to_image()
}

/// Copy of `image` with each box outlined
pub fn annotate(image: &RgbImage, boxes: &[BoundingBox]) -> RgbImage {
    let mut canvas = image.clone();
    for b in boxes {
        for t in 0..ANNOTATION_THICKNESS {
            if b.width <= 2 * t || b.height <= 2 * t {
                break;
            }
            let rect = Rect::at((b.x + t) as i32, (b.y + t) as i32)
                .of_size(b.width - 2 * t, b.height - 2 * t);
            draw_hollow_rect_mut(&mut canvas, rect, ANNOTATION_COLOR);
        }
    }
    canvas
}
