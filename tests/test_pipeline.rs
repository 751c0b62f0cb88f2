use opendem::core::terrarium_encode;
use opendem::io::{tiles_for, TileCache};
use opendem::types::BoundingBox;
use opendem::{MaskInterval, Pipeline, PipelineParams, TerrainOp};
use std::path::PathBuf;
use tempfile::TempDir;

const BOUNDS: [f64; 4] = [8.50, 47.30, 8.52, 47.32];
const RESOLUTION_M: f64 = 30.0;

/// Never listening; any attempted download fails fast
const DEAD_SOURCE: &str = "http://127.0.0.1:1/{z}/{x}/{y}.png";

fn terrarium_png(elevation: f32) -> Vec<u8> {
    let (r, g, b) = terrarium_encode(elevation);
    let img = image::RgbImage::from_pixel(256, 256, image::Rgb([r, g, b]));
    let mut bytes = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut bytes),
        image::ImageFormat::Png,
    )
    .unwrap();
    bytes
}

/// Seed the cache with constant-elevation tiles for the test extent
fn seeded_cache(dir: &TempDir, elevation: f32) -> (PathBuf, usize) {
    let cache_dir = dir.path().join("tiles");
    let cache = TileCache::new(&cache_dir).unwrap();
    let bbox = BoundingBox::new(BOUNDS[0], BOUNDS[1], BOUNDS[2], BOUNDS[3]).unwrap();
    let tiles = tiles_for(&bbox, RESOLUTION_M).unwrap();
    let png = terrarium_png(elevation);
    for &coord in &tiles {
        cache.write(coord, &png).unwrap();
    }
    (cache_dir, tiles.len())
}

fn params(cache_dir: PathBuf, output: PathBuf) -> PipelineParams {
    PipelineParams {
        bounds: BOUNDS,
        source: DEAD_SOURCE.to_string(),
        cache_dir,
        resolution: RESOLUTION_M,
        process: TerrainOp::None,
        clipping: None,
        mask: None,
        target_epsg: None,
        fetch_concurrency: 4,
        output,
    }
}

#[test]
fn test_raster_pipeline_runs_entirely_from_cache() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let (cache_dir, tile_count) = seeded_cache(&dir, 420.0);
    let output = dir.path().join("slope.tif");

    let mut p = params(cache_dir, output.clone());
    p.process = TerrainOp::Slope;

    let report = Pipeline::new(p).run().unwrap();
    assert_eq!(report.tiles, tile_count);
    assert_eq!(report.fetched, 0);
    assert_eq!(report.cache_hits, tile_count);
    assert_eq!(report.features, None);
    // Zurich longitude falls in UTM zone 32 north
    assert_eq!(report.target_epsg, 32632);
    assert!(output.is_file());
    assert!(std::fs::metadata(&output).unwrap().len() > 0);
}

#[test]
fn test_second_run_fetches_nothing() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let (cache_dir, tile_count) = seeded_cache(&dir, 420.0);

    let first = Pipeline::new(params(cache_dir.clone(), dir.path().join("a.tif")))
        .run()
        .unwrap();
    let second = Pipeline::new(params(cache_dir, dir.path().join("b.tif")))
        .run()
        .unwrap();

    assert_eq!(first.fetched, 0);
    assert_eq!(second.fetched, 0);
    assert_eq!(second.cache_hits, tile_count);
}

#[test]
fn test_vector_pipeline_traces_one_region() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let (cache_dir, _) = seeded_cache(&dir, 200.0);
    let output = dir.path().join("mask.geojson");

    let mut p = params(cache_dir, output.clone());
    // Every cell sits at 200 m, so the whole extent is one in-mask region
    p.mask = Some(MaskInterval::new(Some(100.0), None));

    let report = Pipeline::new(p).run().unwrap();
    assert_eq!(report.features, Some(1));
    assert!(output.is_file());
}

#[test]
fn test_degenerate_interval_yields_empty_layer() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let (cache_dir, _) = seeded_cache(&dir, 200.0);
    let output = dir.path().join("empty.geojson");

    let mut p = params(cache_dir, output.clone());
    p.mask = Some(MaskInterval::new(Some(500.0), Some(100.0)));

    let report = Pipeline::new(p).run().unwrap();
    assert_eq!(report.features, Some(0));
    assert!(output.is_file());
}

#[test]
fn test_masked_raster_output_is_written() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let (cache_dir, _) = seeded_cache(&dir, 200.0);
    let output = dir.path().join("mask.tif");

    let mut p = params(cache_dir, output.clone());
    p.mask = Some(MaskInterval::new(Some(100.0), Some(300.0)));

    let report = Pipeline::new(p).run().unwrap();
    assert_eq!(report.features, None);
    assert!(output.is_file());
}

#[test]
fn test_explicit_target_epsg_is_honored() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let (cache_dir, _) = seeded_cache(&dir, 420.0);

    let mut p = params(cache_dir, dir.path().join("lv95.tif"));
    p.target_epsg = Some(2056);

    let report = Pipeline::new(p).run().unwrap();
    assert_eq!(report.target_epsg, 2056);
}
