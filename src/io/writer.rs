use crate::core::vectorize::MaskPolygon;
use crate::types::{DemError, DemResult, ElevationRaster, GeoTransform};
use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::vector::{FieldValue, Geometry, LayerAccess};
use gdal::LayerOptions;
use gdal::DriverManager;
use ndarray::Array2;
use std::path::Path;

/// Output container class, selected by the configured path's extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Georeferenced raster (GeoTIFF)
    Raster,
    /// Georeferenced vector layer (GeoPackage or GeoJSON)
    Vector,
}

impl OutputFormat {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        match path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("gpkg") | Some("geojson") | Some("json") => OutputFormat::Vector,
            _ => OutputFormat::Raster,
        }
    }
}

fn vector_driver_for<P: AsRef<Path>>(path: P) -> DemResult<&'static str> {
    match path
        .as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("gpkg") => Ok("GPKG"),
        Some("geojson") | Some("json") => Ok("GeoJSON"),
        other => Err(DemError::WriteFailure {
            path: path.as_ref().display().to_string(),
            reason: format!("no vector driver for extension {:?}", other),
        }),
    }
}

/// Write a continuous raster as a Float32 GeoTIFF
pub fn write_geotiff<P: AsRef<Path>>(raster: &ElevationRaster, path: P) -> DemResult<()> {
    log::info!("writing GeoTIFF: {}", path.as_ref().display());

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (height, width) = raster.data.dim();

    let mut dataset = driver.create_with_band_type::<f32, _>(
        path.as_ref(),
        width as isize,
        height as isize,
        1,
    )?;
    dataset.set_geo_transform(&raster.transform.to_gdal())?;
    dataset.set_spatial_ref(&SpatialRef::from_epsg(raster.epsg)?)?;

    let mut band = dataset.rasterband(1)?;
    let flat: Vec<f32> = raster.data.iter().cloned().collect();
    let buffer = Buffer::new((width, height), flat);
    band.write((0, 0), (width, height), &buffer)?;
    band.set_no_data_value(Some(raster.nodata as f64))?;

    Ok(())
}

/// Write a binary mask as a Byte GeoTIFF with nodata 0
pub fn write_mask_geotiff<P: AsRef<Path>>(
    mask: &Array2<u8>,
    transform: &GeoTransform,
    epsg: u32,
    path: P,
) -> DemResult<()> {
    log::info!("writing binary mask GeoTIFF: {}", path.as_ref().display());

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (height, width) = mask.dim();

    let mut dataset = driver.create_with_band_type::<u8, _>(
        path.as_ref(),
        width as isize,
        height as isize,
        1,
    )?;
    dataset.set_geo_transform(&transform.to_gdal())?;
    dataset.set_spatial_ref(&SpatialRef::from_epsg(epsg)?)?;

    let mut band = dataset.rasterband(1)?;
    let flat: Vec<u8> = mask.iter().cloned().collect();
    let buffer = Buffer::new((width, height), flat);
    band.write((0, 0), (width, height), &buffer)?;
    band.set_no_data_value(Some(0.0))?;

    Ok(())
}

/// Write traced mask polygons as a vector layer named `mask`
///
/// Each feature carries a `dn` attribute of 1, matching the classic
/// polygonize convention. An empty polygon list writes an empty layer, not
/// an error: a degenerate mask interval legitimately selects nothing.
pub fn write_vector_mask<P: AsRef<Path>>(
    polygons: &[MaskPolygon],
    epsg: u32,
    path: P,
) -> DemResult<()> {
    let driver_name = vector_driver_for(&path)?;
    log::info!(
        "writing {} feature(s) to {} ({})",
        polygons.len(),
        path.as_ref().display(),
        driver_name
    );

    // Vector drivers refuse to overwrite; the configured output replaces
    // any previous run's artifact.
    if path.as_ref().exists() {
        std::fs::remove_file(&path)?;
    }

    let driver = DriverManager::get_driver_by_name(driver_name)?;
    let mut dataset = driver.create_vector_only(path.as_ref())?;

    let srs = SpatialRef::from_epsg(epsg)?;
    let mut layer = dataset.create_layer(LayerOptions {
        name: "mask",
        srs: Some(&srs),
        ty: gdal_sys::OGRwkbGeometryType::wkbPolygon,
        options: None,
    })?;
    layer.create_defn_fields(&[("dn", gdal_sys::OGRFieldType::OFTInteger)])?;

    for polygon in polygons {
        let geometry = polygon_geometry(polygon)?;
        layer.create_feature_fields(
            geometry,
            &["dn"],
            &[FieldValue::IntegerValue(1)],
        )?;
    }

    Ok(())
}

fn polygon_geometry(polygon: &MaskPolygon) -> DemResult<Geometry> {
    let mut poly = Geometry::empty(gdal_sys::OGRwkbGeometryType::wkbPolygon)?;
    poly.add_geometry(ring_geometry(&polygon.shell)?)?;
    for hole in &polygon.holes {
        poly.add_geometry(ring_geometry(hole)?)?;
    }
    Ok(poly)
}

fn ring_geometry(ring: &[(f64, f64)]) -> DemResult<Geometry> {
    let mut geom = Geometry::empty(gdal_sys::OGRwkbGeometryType::wkbLinearRing)?;
    for &(x, y) in ring {
        geom.add_point_2d((x, y));
    }
    Ok(geom)
}
