//! Core elevation processing modules

pub mod clip;
pub mod mosaic;
pub mod resample;
pub mod terrain;
pub mod vectorize;

// Re-export main types
pub use clip::Clipper;
pub use mosaic::{decode_tile, terrarium_decode, terrarium_encode, MosaicBuilder, MosaicStats};
pub use resample::{mosaic_covers_bbox, utm_epsg_for, Resampler};
pub use terrain::TerrainProcessor;
pub use vectorize::{apply_mask, trace_polygons, MaskPolygon};
