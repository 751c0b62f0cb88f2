use crate::io::cache::TileCache;
use crate::io::fetch::TileFetcher;
use crate::io::tiles::{resolution_at_zoom, tile_bounds_3857};
use crate::types::{DemError, DemResult, ElevationRaster, GeoTransform, TileCoord, NODATA, TILE_SIZE};
use ndarray::{s, Array2};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// EPSG code of the tile scheme's CRS
pub const TILE_EPSG: u32 = 3857;

/// Decode one Terrarium-encoded pixel to elevation in meters
///
/// The constants come from the tile provider's encoding:
/// `elevation = (r * 256 + g + b / 256) - 32768`.
pub fn terrarium_decode(r: u8, g: u8, b: u8) -> f32 {
    (r as f32) * 256.0 + (g as f32) + (b as f32) / 256.0 - 32768.0
}

/// Encode an elevation back into the Terrarium RGB triple
///
/// Inverse of [`terrarium_decode`] up to the encoding's 1/256 m step.
pub fn terrarium_encode(elevation: f32) -> (u8, u8, u8) {
    let v = ((elevation + 32768.0) * 256.0).round().clamp(0.0, 16_777_215.0) as u32;
    (((v >> 16) & 0xFF) as u8, ((v >> 8) & 0xFF) as u8, (v & 0xFF) as u8)
}

/// Decode a tile's PNG bytes into a 256x256 elevation grid
pub fn decode_tile(coord: TileCoord, bytes: &[u8]) -> DemResult<Array2<f32>> {
    let image = image::load_from_memory(bytes).map_err(|e| DemError::Decode {
        coord,
        reason: format!("not a decodable image: {}", e),
    })?;

    let rgb = image.to_rgb8();
    if rgb.width() as usize != TILE_SIZE || rgb.height() as usize != TILE_SIZE {
        return Err(DemError::Decode {
            coord,
            reason: format!(
                "unexpected dimensions {}x{}, expected {}x{}",
                rgb.width(),
                rgb.height(),
                TILE_SIZE,
                TILE_SIZE
            ),
        });
    }

    let mut elevations = Array2::<f32>::zeros((TILE_SIZE, TILE_SIZE));
    for (row_idx, row) in rgb.rows().enumerate() {
        for (col_idx, pixel) in row.enumerate() {
            elevations[[row_idx, col_idx]] = terrarium_decode(pixel[0], pixel[1], pixel[2]);
        }
    }
    Ok(elevations)
}

/// Acquisition statistics for one mosaic build
#[derive(Debug, Clone, Copy, Default)]
pub struct MosaicStats {
    pub cache_hits: usize,
    pub fetched: usize,
}

/// Assembles cached/fetched tiles into one native-resolution raster
///
/// Tiles are obtained cache-aside (cache read, falling back to the fetcher,
/// which writes back through the cache) on a bounded worker pool. Each tile
/// occupies a disjoint 256x256 region of the output buffer, so placement
/// needs no synchronization beyond the shared hit/fetch counters.
pub struct MosaicBuilder {
    cache: TileCache,
    fetcher: TileFetcher,
    concurrency: usize,
}

impl MosaicBuilder {
    pub fn new(cache: TileCache, fetcher: TileFetcher, concurrency: usize) -> Self {
        Self {
            cache,
            fetcher,
            concurrency: concurrency.max(1),
        }
    }

    /// Build the mosaic covering a tile set, in EPSG:3857 at native resolution
    pub fn build(&self, tiles: &[TileCoord]) -> DemResult<(ElevationRaster, MosaicStats)> {
        let first = *tiles.first().ok_or_else(|| {
            DemError::Configuration("empty tile set: nothing to mosaic".to_string())
        })?;
        let zoom = first.zoom;
        debug_assert!(tiles.iter().all(|t| t.zoom == zoom));

        let x_min = tiles.iter().map(|t| t.x).min().unwrap_or(first.x);
        let x_max = tiles.iter().map(|t| t.x).max().unwrap_or(first.x);
        let y_min = tiles.iter().map(|t| t.y).min().unwrap_or(first.y);
        let y_max = tiles.iter().map(|t| t.y).max().unwrap_or(first.y);

        let cols = (x_max - x_min + 1) as usize * TILE_SIZE;
        let rows = (y_max - y_min + 1) as usize * TILE_SIZE;
        log::info!(
            "mosaicking {} tiles at zoom {} into {}x{} cells ({} workers)",
            tiles.len(),
            zoom,
            cols,
            rows,
            self.concurrency
        );

        let cache_hits = AtomicUsize::new(0);
        let fetched = AtomicUsize::new(0);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .build()
            .map_err(|e| DemError::Configuration(format!("worker pool setup failed: {}", e)))?;

        let decoded: Vec<(TileCoord, Array2<f32>)> = pool.install(|| {
            tiles
                .par_iter()
                .map(|&coord| {
                    let bytes = match self.cache.read(coord)? {
                        Some(bytes) => {
                            cache_hits.fetch_add(1, Ordering::Relaxed);
                            bytes
                        }
                        None => {
                            fetched.fetch_add(1, Ordering::Relaxed);
                            self.fetcher.fetch(coord)?
                        }
                    };
                    Ok((coord, decode_tile(coord, &bytes)?))
                })
                .collect::<DemResult<Vec<_>>>()
        })?;

        // Placement order does not matter: every tile owns its own region.
        let mut buffer = Array2::<f32>::from_elem((rows, cols), NODATA);
        for (coord, tile_data) in decoded {
            let row0 = (coord.y - y_min) as usize * TILE_SIZE;
            let col0 = (coord.x - x_min) as usize * TILE_SIZE;
            buffer
                .slice_mut(s![row0..row0 + TILE_SIZE, col0..col0 + TILE_SIZE])
                .assign(&tile_data);
        }

        let (origin_x, _, _, origin_y) =
            tile_bounds_3857(TileCoord::new(zoom, x_min, y_min));
        let pixel = resolution_at_zoom(zoom);
        let raster = ElevationRaster {
            data: buffer,
            transform: GeoTransform::north_up(origin_x, origin_y, pixel, -pixel),
            epsg: TILE_EPSG,
            nodata: NODATA,
        };

        let stats = MosaicStats {
            cache_hits: cache_hits.into_inner(),
            fetched: fetched.into_inner(),
        };
        log::info!(
            "mosaic complete: {} cache hits, {} fetched",
            stats.cache_hits,
            stats.fetched
        );
        Ok((raster, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_terrarium_roundtrip() {
        for elevation in [-1000.0f32, -11.5, 0.0, 8.25, 148.0, 4807.8, 8848.0] {
            let (r, g, b) = terrarium_encode(elevation);
            let decoded = terrarium_decode(r, g, b);
            assert!(
                (elevation - decoded).abs() < 1.0 / 256.0 + 1e-4,
                "elevation {} decoded to {}",
                elevation,
                decoded
            );
        }
    }

    #[test]
    fn test_terrarium_known_values() {
        // Sea level encodes to (128, 0, 0)
        assert_eq!(terrarium_encode(0.0), (128, 0, 0));
        assert_relative_eq!(terrarium_decode(128, 0, 0), 0.0);
        // One meter below sea level
        assert_relative_eq!(terrarium_decode(127, 255, 0), -1.0);
    }

    #[test]
    fn test_decode_tile_rejects_garbage() {
        let coord = TileCoord::new(10, 1, 2);
        let err = decode_tile(coord, b"definitely not png bytes").unwrap_err();
        assert!(matches!(err, DemError::Decode { .. }));
    }

    #[test]
    fn test_decode_tile_rejects_wrong_dimensions() {
        let img = image::RgbImage::from_pixel(64, 64, image::Rgb([128, 0, 0]));
        let mut bytes = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();

        let err = decode_tile(TileCoord::new(4, 3, 3), &bytes).unwrap_err();
        assert!(matches!(err, DemError::Decode { .. }));
    }

    #[test]
    fn test_decode_tile_full_size() {
        let (r, g, b) = terrarium_encode(1234.5);
        let img = image::RgbImage::from_pixel(
            TILE_SIZE as u32,
            TILE_SIZE as u32,
            image::Rgb([r, g, b]),
        );
        let mut bytes = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();

        let grid = decode_tile(TileCoord::new(12, 0, 0), &bytes).unwrap();
        assert_eq!(grid.dim(), (TILE_SIZE, TILE_SIZE));
        assert!((grid[[0, 0]] - 1234.5).abs() < 0.01);
        assert!((grid[[255, 255]] - 1234.5).abs() < 0.01);
    }
}
