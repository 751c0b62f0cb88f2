//! Tile acquisition and product output

pub mod cache;
pub mod fetch;
pub mod tiles;
pub mod writer;

// Re-export main types
pub use cache::TileCache;
pub use fetch::TileFetcher;
pub use tiles::{tiles_for, zoom_for_resolution, MAX_ZOOM};
pub use writer::{write_geotiff, write_mask_geotiff, write_vector_mask, OutputFormat};
