//! Thin-layer chromatography lane quantification.
//!
//! Lane images are segmented into bands, reduced to per-channel intensity
//! profiles and integrated into peak areas. Calibration strips of known
//! concentration give one calibration curve per band; a mixture lane is then
//! solved against several calibrations at once.

pub mod data;
pub mod log;
pub mod pipeline;
