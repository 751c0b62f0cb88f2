use crate::types::{DemResult, ElevationRaster, TerrainOp};
use ndarray::Array2;

/// Sun azimuth for hillshading, degrees clockwise from north
const SUN_AZIMUTH_DEG: f64 = 315.0;

/// Sun altitude above the horizon for hillshading, degrees
const SUN_ALTITUDE_DEG: f64 = 45.0;

/// Applies a terrain derivation to an elevation raster
///
/// All operations except pass-through read a full 3x3 neighborhood, so the
/// raster border and any cell with a nodata neighbor derive to nodata. The
/// raster must already be in a metric CRS; gradients use the pixel size from
/// its geotransform directly.
pub struct TerrainProcessor;

impl TerrainProcessor {
    /// Derive `op` from `raster`, consuming it
    pub fn derive(raster: ElevationRaster, op: TerrainOp) -> DemResult<ElevationRaster> {
        if op == TerrainOp::None {
            log::info!("terrain derivation: pass-through");
            return Ok(raster);
        }
        log::info!("terrain derivation: {}", op);

        let dx = raster.transform.pixel_width.abs() as f32;
        let dy = raster.transform.pixel_height.abs() as f32;
        let nodata = raster.nodata;
        let src = &raster.data;
        let (rows, cols) = src.dim();
        let mut out = Array2::<f32>::from_elem((rows, cols), nodata);

        for row in 1..rows.saturating_sub(1) {
            for col in 1..cols.saturating_sub(1) {
                if let Some(window) = neighborhood(src, row, col, nodata) {
                    out[[row, col]] = match op {
                        TerrainOp::Slope => slope_deg(&window, dx, dy),
                        TerrainOp::Aspect => aspect_deg(&window, dx, dy, nodata),
                        TerrainOp::Hillshade => hillshade(&window, dx, dy),
                        TerrainOp::Roughness => roughness(&window),
                        TerrainOp::None => unreachable!("handled above"),
                    };
                }
            }
        }

        Ok(ElevationRaster {
            data: out,
            transform: raster.transform,
            epsg: raster.epsg,
            nodata,
        })
    }
}

/// 3x3 window around a cell, or `None` if any member is nodata
///
/// Layout:
/// ```text
/// z1 z2 z3
/// z4 z5 z6
/// z7 z8 z9
/// ```
fn neighborhood(src: &Array2<f32>, row: usize, col: usize, nodata: f32) -> Option<[f32; 9]> {
    let mut window = [0.0f32; 9];
    let mut idx = 0;
    for dr in 0..3 {
        for dc in 0..3 {
            let v = src[[row + dr - 1, col + dc - 1]];
            if v == nodata || !v.is_finite() {
                return None;
            }
            window[idx] = v;
            idx += 1;
        }
    }
    Some(window)
}

/// Horn gradients: (dz/dx eastward, dz/dy northward)
fn horn_gradients(w: &[f32; 9], dx: f32, dy: f32) -> (f32, f32) {
    let dz_dx = ((w[2] + 2.0 * w[5] + w[8]) - (w[0] + 2.0 * w[3] + w[6])) / (8.0 * dx);
    // Row index grows southward, so negate for a northward gradient
    let dz_dy = ((w[0] + 2.0 * w[1] + w[2]) - (w[6] + 2.0 * w[7] + w[8])) / (8.0 * dy);
    (dz_dx, dz_dy)
}

fn slope_deg(w: &[f32; 9], dx: f32, dy: f32) -> f32 {
    let (dz_dx, dz_dy) = horn_gradients(w, dx, dy);
    (dz_dx * dz_dx + dz_dy * dz_dy).sqrt().atan().to_degrees()
}

/// Compass aspect: 0 = north, 90 = east, in the downslope direction
///
/// Flat cells have no defined aspect and derive to nodata.
fn aspect_deg(w: &[f32; 9], dx: f32, dy: f32, nodata: f32) -> f32 {
    let (dz_dx, dz_dy) = horn_gradients(w, dx, dy);
    if dz_dx == 0.0 && dz_dy == 0.0 {
        return nodata;
    }
    let east = -dz_dx;
    let north = -dz_dy;
    let mut compass = (east as f64).atan2(north as f64).to_degrees();
    if compass < 0.0 {
        compass += 360.0;
    }
    compass as f32
}

/// Relative illumination 0-255 under the fixed sun position
fn hillshade(w: &[f32; 9], dx: f32, dy: f32) -> f32 {
    let (dz_dx, dz_dy) = horn_gradients(w, dx, dy);
    let slope = ((dz_dx * dz_dx + dz_dy * dz_dy) as f64).sqrt().atan();

    let zenith = (90.0 - SUN_ALTITUDE_DEG).to_radians();
    let azimuth = SUN_AZIMUTH_DEG.to_radians();
    // Aspect measured like the compass convention above
    let aspect = (-dz_dx as f64).atan2(-dz_dy as f64);

    let shade =
        zenith.cos() * slope.cos() + zenith.sin() * slope.sin() * (azimuth - aspect).cos();
    (255.0 * shade.max(0.0)).round() as f32
}

fn roughness(w: &[f32; 9]) -> f32 {
    let mut lo = w[0];
    let mut hi = w[0];
    for &v in w.iter().skip(1) {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    hi - lo
}
