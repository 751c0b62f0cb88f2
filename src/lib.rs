//! opendem: elevation tile acquisition and terrain derivation
//!
//! This library turns a templated slippy-map elevation tile source into
//! analysis-ready terrain products: it enumerates and downloads the tiles
//! covering a bounding box (with an on-disk cache), mosaics and decodes them
//! into elevation, warps the result into a metric CRS at a requested pixel
//! size, derives slope, aspect, hillshade or roughness, and writes a GeoTIFF
//! or a thresholded polygon layer. Runs are driven by [`Pipeline`] with
//! immutable [`PipelineParams`].

pub mod core;
pub mod io;
pub mod pipeline;
pub mod types;

// Re-export main types and functions for easier access
pub use pipeline::{Pipeline, PipelineParams, PipelineReport, DEFAULT_TILE_SOURCE};
pub use types::{
    BoundingBox, DemError, DemResult, ElevationRaster, GeoTransform, MaskInterval, TerrainOp,
    TileCoord, NODATA,
};
