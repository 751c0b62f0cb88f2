use crate::types::{DemError, DemResult, ElevationRaster};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::vector::{Geometry, LayerAccess};
use gdal::{Dataset, DriverManager};

/// 2.5D flag stripped, leaving the base OGR geometry type
fn flat_geometry_type(t: gdal_sys::OGRwkbGeometryType::Type) -> u32 {
    t & 0x7fff_ffff
}

/// Masks a raster to a polygon boundary read from a vector source
///
/// Cells whose centers fall outside every polygon become nodata; cells
/// inside are unchanged. The polygons are reprojected to the raster CRS when
/// they carry a different one. A missing, unparsable, or polygon-free source
/// is an error: the caller asked for a crop, so silently skipping it would
/// produce a wrong artifact.
pub struct Clipper {
    source_path: String,
}

impl Clipper {
    /// `source` may be a local path or an HTTP(S) URL
    pub fn new(source: &str) -> Self {
        // Remote sources stream through GDAL's virtual curl filesystem
        let source_path = if source.starts_with("http://") || source.starts_with("https://") {
            format!("/vsicurl/{}", source)
        } else {
            source.to_string()
        };
        Self { source_path }
    }

    fn invalid(&self, reason: impl Into<String>) -> DemError {
        DemError::InvalidClipGeometry {
            source_path: self.source_path.clone(),
            reason: reason.into(),
        }
    }

    /// Polygon geometries from every layer, reprojected into `target_epsg`
    fn load_polygons(&self, target_epsg: u32) -> DemResult<Vec<Geometry>> {
        let dataset = Dataset::open(&self.source_path)
            .map_err(|e| self.invalid(format!("cannot open: {}", e)))?;

        let target_sr = SpatialRef::from_epsg(target_epsg)
            .map_err(|e| DemError::Reprojection(format!("cannot resolve EPSG:{}: {}", target_epsg, e)))?;
        target_sr.set_axis_mapping_strategy(
            gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
        );

        let mut polygons = Vec::new();
        for mut layer in dataset.layers() {
            for feature in layer.features() {
                let Some(geom) = feature.geometry() else {
                    continue;
                };
                let flat = flat_geometry_type(geom.geometry_type());
                if flat != gdal_sys::OGRwkbGeometryType::wkbPolygon
                    && flat != gdal_sys::OGRwkbGeometryType::wkbMultiPolygon
                {
                    continue;
                }

                let mut geom = geom.clone();
                if let Some(source_sr) = geom.spatial_ref() {
                    source_sr.set_axis_mapping_strategy(
                        gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
                    );
                    let same = source_sr
                        .auth_code()
                        .map(|code| code == target_epsg as i32)
                        .unwrap_or(false);
                    if !same {
                        let transform =
                            CoordTransform::new(&source_sr, &target_sr).map_err(|e| {
                                self.invalid(format!("geometry reprojection setup failed: {}", e))
                            })?;
                        geom.transform_inplace(&transform).map_err(|e| {
                            self.invalid(format!("geometry reprojection failed: {}", e))
                        })?;
                    }
                }
                polygons.push(geom);
            }
        }

        if polygons.is_empty() {
            return Err(self.invalid("no polygon features found"));
        }
        log::info!(
            "clip boundary: {} polygon(s) from {}",
            polygons.len(),
            self.source_path
        );
        Ok(polygons)
    }

    /// Apply the clip, consuming the raster
    pub fn clip(&self, mut raster: ElevationRaster) -> DemResult<ElevationRaster> {
        let polygons = self.load_polygons(raster.epsg)?;
        let mask = rasterize_mask(&polygons, &raster)?;

        let nodata = raster.nodata;
        let (rows, cols) = raster.data.dim();
        let mut outside = 0usize;
        for row in 0..rows {
            for col in 0..cols {
                if mask[row * cols + col] == 0 {
                    raster.data[[row, col]] = nodata;
                    outside += 1;
                }
            }
        }
        log::info!(
            "clipped {} of {} cells to nodata",
            outside,
            rows * cols
        );
        Ok(raster)
    }
}

/// Burn polygons into a byte mask matching the raster grid (cell-center rule)
fn rasterize_mask(polygons: &[Geometry], raster: &ElevationRaster) -> DemResult<Vec<u8>> {
    let (rows, cols) = raster.data.dim();

    let driver = DriverManager::get_driver_by_name("MEM")?;
    let mut mask_ds = driver.create_with_band_type::<u8, _>("", cols as isize, rows as isize, 1)?;
    mask_ds.set_geo_transform(&raster.transform.to_gdal())?;
    let sr = SpatialRef::from_epsg(raster.epsg)
        .map_err(|e| DemError::Reprojection(format!("cannot resolve EPSG:{}: {}", raster.epsg, e)))?;
    mask_ds.set_spatial_ref(&sr)?;

    let burn_values = vec![1.0; polygons.len()];
    gdal::raster::rasterize(&mut mask_ds, &[1], polygons, &burn_values, None)?;

    let band = mask_ds.rasterband(1)?;
    let buffer = band.read_as::<u8>((0, 0), (cols, rows), (cols, rows), None)?;
    Ok(buffer.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoTransform, NODATA};
    use ndarray::Array2;
    use std::io::Write;
    use tempfile::TempDir;

    fn test_raster() -> ElevationRaster {
        // 10x10 cells of 10 m at a synthetic UTM origin
        ElevationRaster {
            data: Array2::from_elem((10, 10), 100.0),
            transform: GeoTransform::north_up(500_000.0, 5_200_000.0, 10.0, -10.0),
            epsg: 32632,
            nodata: NODATA,
        }
    }

    fn write_geojson(dir: &TempDir, name: &str, polygon_wkt_coords: &str) -> String {
        let path = dir.path().join(name);
        let content = format!(
            r#"{{"type": "FeatureCollection",
"crs": {{"type": "name", "properties": {{"name": "urn:ogc:def:crs:EPSG::32632"}}}},
"features": [{{"type": "Feature", "properties": {{}},
"geometry": {{"type": "Polygon", "coordinates": [[{}]]}}}}]}}"#,
            polygon_wkt_coords
        );
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path.display().to_string()
    }

    #[test]
    fn test_clip_full_extent_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = write_geojson(
            &dir,
            "full.geojson",
            "[499990, 5199910], [500110, 5199910], [500110, 5200010], [499990, 5200010], [499990, 5199910]",
        );

        let clipped = Clipper::new(&path).clip(test_raster()).unwrap();
        assert!(clipped.data.iter().all(|&v| v == 100.0));
    }

    #[test]
    fn test_clip_disjoint_geometry_all_nodata() {
        let dir = TempDir::new().unwrap();
        let path = write_geojson(
            &dir,
            "far.geojson",
            "[600000, 5300000], [600100, 5300000], [600100, 5300100], [600000, 5300100], [600000, 5300000]",
        );

        let clipped = Clipper::new(&path).clip(test_raster()).unwrap();
        assert!(clipped.data.iter().all(|&v| v == NODATA));
    }

    #[test]
    fn test_clip_half_extent() {
        // Covers the western 50 m of the 100 m wide raster
        let dir = TempDir::new().unwrap();
        let path = write_geojson(
            &dir,
            "west.geojson",
            "[499990, 5199890], [500050, 5199890], [500050, 5200010], [499990, 5200010], [499990, 5199890]",
        );

        let clipped = Clipper::new(&path).clip(test_raster()).unwrap();
        for row in 0..10 {
            for col in 0..10 {
                let v = clipped.data[[row, col]];
                if col < 5 {
                    assert_eq!(v, 100.0, "cell ({}, {}) should survive", row, col);
                } else {
                    assert_eq!(v, NODATA, "cell ({}, {}) should be masked", row, col);
                }
            }
        }
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let err = Clipper::new("/nonexistent/boundary.gpkg")
            .clip(test_raster())
            .unwrap_err();
        assert!(matches!(err, DemError::InvalidClipGeometry { .. }));
    }

    #[test]
    fn test_source_without_polygons_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("points.geojson");
        std::fs::write(
            &path,
            r#"{"type": "FeatureCollection", "features": [
{"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [500000, 5200000]}}]}"#,
        )
        .unwrap();

        let err = Clipper::new(&path.display().to_string())
            .clip(test_raster())
            .unwrap_err();
        assert!(matches!(err, DemError::InvalidClipGeometry { .. }));
    }

    #[test]
    fn test_url_sources_use_vsicurl() {
        let clipper = Clipper::new("https://example.com/boundary.gpkg");
        assert!(clipper.source_path.starts_with("/vsicurl/"));
    }
}
