use crate::core::{
    apply_mask, mosaic_covers_bbox, trace_polygons, Clipper, MosaicBuilder, Resampler,
    TerrainProcessor,
};
use crate::io::{
    tiles_for, write_geotiff, write_mask_geotiff, write_vector_mask, OutputFormat, TileCache,
    TileFetcher,
};
use crate::types::{BoundingBox, DemError, DemResult, MaskInterval, TerrainOp};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;

/// Terrarium-encoded elevation tiles hosted on AWS Open Data
pub const DEFAULT_TILE_SOURCE: &str =
    "https://s3.amazonaws.com/elevation-tiles-prod/terrarium/{z}/{x}/{y}.png";

fn default_source() -> String {
    DEFAULT_TILE_SOURCE.to_string()
}

fn default_process() -> TerrainOp {
    TerrainOp::None
}

fn default_concurrency() -> usize {
    4
}

/// Immutable parameters for one pipeline run
///
/// Deserializable so callers can load runs from configuration; the crate
/// itself does not prescribe a file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineParams {
    /// WGS84 extent as `[min_lon, min_lat, max_lon, max_lat]`
    pub bounds: [f64; 4],
    /// Tile URL template with `{z}`, `{x}` and `{y}` placeholders
    #[serde(default = "default_source")]
    pub source: String,
    /// Directory for the on-disk tile cache
    pub cache_dir: PathBuf,
    /// Output pixel size in meters
    pub resolution: f64,
    /// Terrain derivation to apply
    #[serde(default = "default_process")]
    pub process: TerrainOp,
    /// Optional polygon boundary (path or URL) to crop the result to
    #[serde(default)]
    pub clipping: Option<String>,
    /// Optional threshold interval; required for vector output
    #[serde(default)]
    pub mask: Option<MaskInterval>,
    /// Metric target CRS; the bbox-local UTM zone when absent
    #[serde(default)]
    pub target_epsg: Option<u32>,
    /// Worker count for tile acquisition
    #[serde(default = "default_concurrency")]
    pub fetch_concurrency: usize,
    /// Output path; `.gpkg`/`.geojson` select vector output
    pub output: PathBuf,
}

/// What a completed run produced
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub tiles: usize,
    pub cache_hits: usize,
    pub fetched: usize,
    pub target_epsg: u32,
    pub output: PathBuf,
    /// Feature count for vector output, `None` for raster output
    pub features: Option<usize>,
}

/// Sequences acquisition, resampling, derivation and output
///
/// Each stage hands its raster to the next by move and the run aborts on
/// the first error, so a failed run never leaves a partial product at the
/// output path (the cache may legitimately have grown).
pub struct Pipeline {
    params: PipelineParams,
}

impl Pipeline {
    pub fn new(params: PipelineParams) -> Self {
        Self { params }
    }

    /// Validate parameters without touching the network or filesystem
    fn validated(&self) -> DemResult<(BoundingBox, OutputFormat)> {
        let p = &self.params;
        let bbox = BoundingBox::new(p.bounds[0], p.bounds[1], p.bounds[2], p.bounds[3])?;

        let format = OutputFormat::from_path(&p.output);
        if format == OutputFormat::Vector && p.mask.is_none() {
            return Err(DemError::Configuration(format!(
                "vector output '{}' requires a mask interval",
                p.output.display()
            )));
        }
        Ok((bbox, format))
    }

    pub fn run(&self) -> DemResult<PipelineReport> {
        let started = Instant::now();
        let p = &self.params;
        let (bbox, format) = self.validated()?;

        let tile_set = tiles_for(&bbox, p.resolution)?;
        log::info!(
            "pipeline: {} tiles cover [{}, {}, {}, {}]",
            tile_set.len(),
            bbox.min_lon,
            bbox.min_lat,
            bbox.max_lon,
            bbox.max_lat
        );

        let cache = TileCache::new(&p.cache_dir)?;
        let fetcher = TileFetcher::new(&p.source, cache.clone())?;
        let builder = MosaicBuilder::new(cache, fetcher, p.fetch_concurrency);

        let stage = Instant::now();
        let (mosaic, stats) = builder.build(&tile_set)?;
        log::info!("acquisition stage took {:.1?}", stage.elapsed());
        if let Some((lo, hi)) = mosaic.value_range() {
            log::info!("mosaic elevation range: {:.1} m to {:.1} m", lo, hi);
        }
        if !mosaic_covers_bbox(&mosaic, &bbox) {
            return Err(DemError::Configuration(
                "assembled mosaic does not cover the requested bounds".to_string(),
            ));
        }

        let stage = Instant::now();
        let resampler = Resampler::new(&bbox, p.target_epsg);
        let target_epsg = resampler.target_epsg();
        let dem = resampler.resample(mosaic, &bbox, p.resolution)?;
        log::info!("resampling stage took {:.1?}", stage.elapsed());

        let stage = Instant::now();
        let mut derived = TerrainProcessor::derive(dem, p.process)?;
        log::info!("derivation stage took {:.1?}", stage.elapsed());

        if let Some(clip_source) = &p.clipping {
            let stage = Instant::now();
            derived = Clipper::new(clip_source).clip(derived)?;
            log::info!("clipping stage took {:.1?}", stage.elapsed());
        }

        let features = match (format, p.mask) {
            (OutputFormat::Vector, Some(interval)) => {
                let mask = apply_mask(&derived, interval);
                let polygons = trace_polygons(&mask, &derived.transform);
                write_vector_mask(&polygons, derived.epsg, &p.output)?;
                Some(polygons.len())
            }
            (OutputFormat::Vector, None) => unreachable!("rejected by validated()"),
            (OutputFormat::Raster, Some(interval)) => {
                let mask = apply_mask(&derived, interval);
                write_mask_geotiff(&mask, &derived.transform, derived.epsg, &p.output)?;
                None
            }
            (OutputFormat::Raster, None) => {
                write_geotiff(&derived, &p.output)?;
                None
            }
        };

        log::info!(
            "pipeline finished in {:.1?}: {} cache hits, {} fetched, output {}",
            started.elapsed(),
            stats.cache_hits,
            stats.fetched,
            p.output.display()
        );
        Ok(PipelineReport {
            tiles: tile_set.len(),
            cache_hits: stats.cache_hits,
            fetched: stats.fetched,
            target_epsg,
            output: p.output.clone(),
            features,
        })
    }
}
