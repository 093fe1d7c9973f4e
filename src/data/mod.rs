pub mod chromatogram;
pub mod geometry;
pub mod raster;
