use crate::types::{
    BoundingBox, DemResult, TileCoord, TILE_SIZE, WEB_MERCATOR_HALF_EXTENT,
};
use std::f64::consts::PI;

/// Ground resolution at zoom 0 for 256 px tiles, meters per pixel at the equator
const ZOOM0_RESOLUTION: f64 = 2.0 * WEB_MERCATOR_HALF_EXTENT / TILE_SIZE as f64;

/// Deepest zoom level served by the supported tile sources
pub const MAX_ZOOM: u8 = 15;

/// Native ground resolution of the tile scheme at a zoom level (m/px)
pub fn resolution_at_zoom(zoom: u8) -> f64 {
    ZOOM0_RESOLUTION / (1u32 << zoom) as f64
}

/// Smallest zoom whose native resolution is at least as fine as the request
///
/// Capped at [`MAX_ZOOM`]; a request finer than the source can serve gets the
/// deepest available level rather than an error.
pub fn zoom_for_resolution(resolution_m: f64) -> u8 {
    for zoom in 0..=MAX_ZOOM {
        if resolution_at_zoom(zoom) <= resolution_m {
            return zoom;
        }
    }
    MAX_ZOOM
}

/// Fractional tile coordinates of a lon/lat point at a zoom level
///
/// Standard slippy-map projection: x grows east from the antimeridian,
/// y grows south from the Mercator top edge.
pub fn lonlat_to_tile(lon: f64, lat: f64, zoom: u8) -> (f64, f64) {
    let n = (1u32 << zoom) as f64;
    let x = (lon + 180.0) / 360.0 * n;
    let lat_rad = lat.to_radians();
    let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * n;
    (x, y)
}

/// EPSG:3857 bounds of a tile as (min_x, min_y, max_x, max_y)
pub fn tile_bounds_3857(coord: TileCoord) -> (f64, f64, f64, f64) {
    let n = (1u32 << coord.zoom) as f64;
    let edge = 2.0 * WEB_MERCATOR_HALF_EXTENT / n;

    let min_x = -WEB_MERCATOR_HALF_EXTENT + coord.x as f64 * edge;
    let max_y = WEB_MERCATOR_HALF_EXTENT - coord.y as f64 * edge;
    (min_x, max_y - edge, min_x + edge, max_y)
}

/// Lon/lat to EPSG:3857 meters
pub fn lonlat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let x = lon / 180.0 * WEB_MERCATOR_HALF_EXTENT;
    let lat_rad = lat.to_radians();
    let y = ((PI / 4.0 + lat_rad / 2.0).tan()).ln() / PI * WEB_MERCATOR_HALF_EXTENT;
    (x, y)
}

/// Tile coordinates covering a bounding box at the zoom selected for a
/// target resolution, in row-major order
///
/// Every returned tile intersects the box and the union of their footprints
/// covers it. The bounding box was validated at construction, so the tile
/// range is always inside the scheme.
pub fn tiles_for(bbox: &BoundingBox, resolution_m: f64) -> DemResult<Vec<TileCoord>> {
    let zoom = zoom_for_resolution(resolution_m);
    let n = 1u32 << zoom;

    let (x_min_f, y_min_f) = lonlat_to_tile(bbox.min_lon, bbox.max_lat, zoom);
    let (x_max_f, y_max_f) = lonlat_to_tile(bbox.max_lon, bbox.min_lat, zoom);

    let x_min = (x_min_f.floor() as i64).clamp(0, (n - 1) as i64) as u32;
    let y_min = (y_min_f.floor() as i64).clamp(0, (n - 1) as i64) as u32;
    // Points exactly on a tile edge belong to the tile on the lower side, so
    // the max corner rounds down after nudging off the boundary.
    let x_max = (x_max_f.ceil() as i64 - 1).clamp(x_min as i64, (n - 1) as i64) as u32;
    let y_max = (y_max_f.ceil() as i64 - 1).clamp(y_min as i64, (n - 1) as i64) as u32;

    let mut tiles = Vec::with_capacity(((x_max - x_min + 1) * (y_max - y_min + 1)) as usize);
    for y in y_min..=y_max {
        for x in x_min..=x_max {
            tiles.push(TileCoord::new(zoom, x, y));
        }
    }

    log::debug!(
        "bbox [{}, {}, {}, {}] at {} m/px -> zoom {} ({} tiles, x {}..={}, y {}..={})",
        bbox.min_lon,
        bbox.min_lat,
        bbox.max_lon,
        bbox.max_lat,
        resolution_m,
        zoom,
        tiles.len(),
        x_min,
        x_max,
        y_min,
        y_max
    );

    Ok(tiles)
}
