use crate::io::tiles::lonlat_to_mercator;
use crate::types::{BoundingBox, DemResult, DemError, ElevationRaster, GeoTransform, NODATA};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use ndarray::Array2;

/// UTM zone EPSG code for a bounding box centroid
///
/// Northern hemisphere zones are 326xx, southern 327xx.
pub fn utm_epsg_for(bbox: &BoundingBox) -> u32 {
    let (lon, lat) = bbox.center();
    let zone = (((lon + 180.0) / 6.0).floor() as i32 + 1).clamp(1, 60) as u32;
    if lat >= 0.0 {
        32600 + zone
    } else {
        32700 + zone
    }
}

fn spatial_ref(epsg: u32) -> DemResult<SpatialRef> {
    let sr = SpatialRef::from_epsg(epsg)
        .map_err(|e| DemError::Reprojection(format!("cannot resolve EPSG:{}: {}", epsg, e)))?;
    // Keep lon/lat (x, y) ordering regardless of the authority definition
    sr.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
    Ok(sr)
}

/// Warps a Web Mercator mosaic into a metric CRS at the requested pixel size
///
/// Sampling is bilinear: elevation fed into neighborhood derivations must not
/// carry nearest-neighbor terracing. Target cells whose centers fall outside
/// the mosaic, or whose support touches a nodata cell, become nodata.
pub struct Resampler {
    target_epsg: u32,
}

impl Resampler {
    /// Use an explicit target CRS, or the bbox-local UTM zone when `None`
    pub fn new(bbox: &BoundingBox, target_epsg: Option<u32>) -> Self {
        let target_epsg = target_epsg.unwrap_or_else(|| utm_epsg_for(bbox));
        Self { target_epsg }
    }

    pub fn target_epsg(&self) -> u32 {
        self.target_epsg
    }

    /// Resample `mosaic` to `resolution_m`, cropped to `bbox`
    pub fn resample(
        &self,
        mosaic: ElevationRaster,
        bbox: &BoundingBox,
        resolution_m: f64,
    ) -> DemResult<ElevationRaster> {
        if resolution_m <= 0.0 {
            return Err(DemError::Configuration(format!(
                "resolution must be positive, got {}",
                resolution_m
            )));
        }

        let wgs84 = spatial_ref(4326)?;
        let target = spatial_ref(self.target_epsg)?;
        let mercator = spatial_ref(mosaic.epsg)?;

        // Output extent: bbox corners and edge midpoints in the target CRS.
        // Midpoints guard against edges that bow outward under the projection.
        let to_target = CoordTransform::new(&wgs84, &target)
            .map_err(|e| DemError::Reprojection(format!("WGS84 -> EPSG:{}: {}", self.target_epsg, e)))?;
        let mid_lon = (bbox.min_lon + bbox.max_lon) / 2.0;
        let mid_lat = (bbox.min_lat + bbox.max_lat) / 2.0;
        let mut xs = [
            bbox.min_lon, mid_lon, bbox.max_lon,
            bbox.min_lon, bbox.max_lon,
            bbox.min_lon, mid_lon, bbox.max_lon,
        ];
        let mut ys = [
            bbox.max_lat, bbox.max_lat, bbox.max_lat,
            mid_lat, mid_lat,
            bbox.min_lat, bbox.min_lat, bbox.min_lat,
        ];
        let mut zs = [0.0; 8];
        to_target
            .transform_coords(&mut xs, &mut ys, &mut zs)
            .map_err(|e| DemError::Reprojection(format!("bbox corner transform failed: {}", e)))?;

        let min_x = xs.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_x = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min_y = ys.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_y = ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        let cols = ((max_x - min_x) / resolution_m).ceil().max(1.0) as usize;
        let rows = ((max_y - min_y) / resolution_m).ceil().max(1.0) as usize;
        let transform = GeoTransform::north_up(min_x, max_y, resolution_m, -resolution_m);
        log::info!(
            "resampling to EPSG:{} at {} m/px -> {}x{} cells",
            self.target_epsg,
            resolution_m,
            cols,
            rows
        );

        // Inverse mapping: target pixel centers back into mosaic coordinates
        let to_mercator = CoordTransform::new(&target, &mercator).map_err(|e| {
            DemError::Reprojection(format!("EPSG:{} -> EPSG:{}: {}", self.target_epsg, mosaic.epsg, e))
        })?;

        let src = &mosaic.data;
        let (src_rows, src_cols) = src.dim();
        let mut output = Array2::<f32>::from_elem((rows, cols), NODATA);

        let mut row_x = vec![0.0f64; cols];
        let mut row_y = vec![0.0f64; cols];
        let mut row_z = vec![0.0f64; cols];
        for row in 0..rows {
            for col in 0..cols {
                let (x, y) = transform.pixel_center(col, row);
                row_x[col] = x;
                row_y[col] = y;
                row_z[col] = 0.0;
            }
            to_mercator
                .transform_coords(&mut row_x, &mut row_y, &mut row_z)
                .map_err(|e| DemError::Reprojection(format!("inverse warp failed: {}", e)))?;

            for col in 0..cols {
                let src_col = (row_x[col] - mosaic.transform.top_left_x)
                    / mosaic.transform.pixel_width
                    - 0.5;
                let src_row = (row_y[col] - mosaic.transform.top_left_y)
                    / mosaic.transform.pixel_height
                    - 0.5;

                output[[row, col]] = bilinear(src, src_rows, src_cols, src_col, src_row, mosaic.nodata);
            }
        }

        Ok(ElevationRaster {
            data: output,
            transform,
            epsg: self.target_epsg,
            nodata: NODATA,
        })
    }
}

/// Bilinear sample at fractional source coordinates, nodata-aware
fn bilinear(
    src: &Array2<f32>,
    src_rows: usize,
    src_cols: usize,
    col: f64,
    row: f64,
    nodata: f32,
) -> f32 {
    if col < 0.0 || row < 0.0 || col > (src_cols - 1) as f64 || row > (src_rows - 1) as f64 {
        return nodata;
    }

    let c0 = col.floor() as usize;
    let r0 = row.floor() as usize;
    let c1 = (c0 + 1).min(src_cols - 1);
    let r1 = (r0 + 1).min(src_rows - 1);
    let dc = (col - c0 as f64) as f32;
    let dr = (row - r0 as f64) as f32;

    let v00 = src[[r0, c0]];
    let v01 = src[[r0, c1]];
    let v10 = src[[r1, c0]];
    let v11 = src[[r1, c1]];
    if v00 == nodata || v01 == nodata || v10 == nodata || v11 == nodata {
        return nodata;
    }

    v00 * (1.0 - dc) * (1.0 - dr)
        + v01 * dc * (1.0 - dr)
        + v10 * (1.0 - dc) * dr
        + v11 * dc * dr
}

/// Rough sanity check that the mosaic actually covers the bbox
///
/// Used by the pipeline to fail with a clear message instead of producing an
/// all-nodata output if the tile math and the mosaic disagree.
pub fn mosaic_covers_bbox(mosaic: &ElevationRaster, bbox: &BoundingBox) -> bool {
    let (min_x, min_y) = lonlat_to_mercator(bbox.min_lon, bbox.min_lat);
    let (max_x, max_y) = lonlat_to_mercator(bbox.max_lon, bbox.max_lat);

    let left = mosaic.transform.top_left_x;
    let top = mosaic.transform.top_left_y;
    let right = left + mosaic.width() as f64 * mosaic.transform.pixel_width;
    let bottom = top + mosaic.height() as f64 * mosaic.transform.pixel_height;

    left <= min_x && right >= max_x && bottom <= min_y && top >= max_y
}
