use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Latitude limit of the Web Mercator tiling scheme
pub const WEB_MERCATOR_MAX_LAT: f64 = 85.051_128_78;

/// Half the earth's circumference in Web Mercator meters
pub const WEB_MERCATOR_HALF_EXTENT: f64 = 20_037_508.342_789_244;

/// Tile edge length in pixels for the supported tile sources
pub const TILE_SIZE: usize = 256;

/// Sentinel value for cells with no valid measurement
pub const NODATA: f32 = -9999.0;

/// Geographic bounding box in WGS84 degrees
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Create a validated bounding box
    ///
    /// Latitudes beyond the Web Mercator limit cannot be addressed by the
    /// tiling scheme and are rejected up front.
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> DemResult<Self> {
        if !(min_lon < max_lon && min_lat < max_lat) {
            return Err(DemError::Configuration(format!(
                "bounding box min must be strictly less than max: [{}, {}, {}, {}]",
                min_lon, min_lat, max_lon, max_lat
            )));
        }
        if min_lon < -180.0 || max_lon > 180.0 || min_lat < -90.0 || max_lat > 90.0 {
            return Err(DemError::Configuration(format!(
                "bounding box outside valid lon/lat ranges: [{}, {}, {}, {}]",
                min_lon, min_lat, max_lon, max_lat
            )));
        }
        if min_lat < -WEB_MERCATOR_MAX_LAT || max_lat > WEB_MERCATOR_MAX_LAT {
            return Err(DemError::UnsupportedRegion { min_lat, max_lat });
        }
        Ok(Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        })
    }

    /// Centroid in (lon, lat)
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lon + self.max_lon) / 2.0,
            (self.min_lat + self.max_lat) / 2.0,
        )
    }
}

/// Slippy-map tile coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(zoom: u8, x: u32, y: u32) -> Self {
        debug_assert!(x < (1u32 << zoom) && y < (1u32 << zoom));
        Self { zoom, x, y }
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Geospatial transformation parameters (GDAL six-parameter affine)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with no rotation
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height,
        }
    }

    /// World coordinates of a pixel center
    pub fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        (
            self.top_left_x + (col as f64 + 0.5) * self.pixel_width,
            self.top_left_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// World coordinates of a grid vertex (pixel corner)
    pub fn vertex(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width,
            self.top_left_y + row * self.pixel_height,
        )
    }

    /// As the GDAL array form
    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }
}

/// Single-band elevation (or derived) raster with georeferencing
///
/// Owned by exactly one pipeline stage at a time; stages consume the raster
/// by move and hand a new one to their successor.
#[derive(Debug, Clone)]
pub struct ElevationRaster {
    pub data: Array2<f32>,
    pub transform: GeoTransform,
    pub epsg: u32,
    pub nodata: f32,
}

impl ElevationRaster {
    pub fn width(&self) -> usize {
        self.data.dim().1
    }

    pub fn height(&self) -> usize {
        self.data.dim().0
    }

    /// Minimum and maximum of valid cells, if any exist
    pub fn value_range(&self) -> Option<(f32, f32)> {
        let mut range: Option<(f32, f32)> = None;
        for &v in self.data.iter() {
            if v != self.nodata && v.is_finite() {
                range = Some(match range {
                    Some((lo, hi)) => (lo.min(v), hi.max(v)),
                    None => (v, v),
                });
            }
        }
        range
    }
}

/// Terrain derivation operations (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerrainOp {
    /// Slope in degrees (Horn 3x3 gradient)
    Slope,
    /// Compass aspect in degrees, 0-360
    Aspect,
    /// Relative illumination 0-255 under a fixed sun position
    Hillshade,
    /// Max minus min elevation in a 3x3 neighborhood
    Roughness,
    /// Pass elevation through unchanged
    None,
}

impl FromStr for TerrainOp {
    type Err = DemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "slope" => Ok(TerrainOp::Slope),
            "aspect" => Ok(TerrainOp::Aspect),
            "hillshade" => Ok(TerrainOp::Hillshade),
            "roughness" => Ok(TerrainOp::Roughness),
            "none" => Ok(TerrainOp::None),
            other => Err(DemError::UnknownOperation(other.to_string())),
        }
    }
}

impl std::fmt::Display for TerrainOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerrainOp::Slope => write!(f, "slope"),
            TerrainOp::Aspect => write!(f, "aspect"),
            TerrainOp::Hillshade => write!(f, "hillshade"),
            TerrainOp::Roughness => write!(f, "roughness"),
            TerrainOp::None => write!(f, "none"),
        }
    }
}

/// Threshold interval for binary masking
///
/// Either bound may be omitted for a one-sided mask. An inverted interval
/// (`min > max`) classifies every cell as "out"; callers get an empty mask
/// rather than an error.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MaskInterval {
    pub min: Option<f32>,
    pub max: Option<f32>,
}

impl MaskInterval {
    pub fn new(min: Option<f32>, max: Option<f32>) -> Self {
        Self { min, max }
    }

    /// True when a valid cell value falls inside the interval
    pub fn contains(&self, value: f32) -> bool {
        if let Some(min) = self.min {
            if value < min {
                return false;
            }
        }
        if let Some(max) = self.max {
            if value > max {
                return false;
            }
        }
        true
    }
}

/// Error types for the elevation pipeline
#[derive(Debug, thiserror::Error)]
pub enum DemError {
    #[error("bounding box latitude range [{min_lat}, {max_lat}] exceeds the tiling scheme limit")]
    UnsupportedRegion { min_lat: f64, max_lat: f64 },

    #[error("tile {coord} unavailable: {reason}")]
    TileUnavailable { coord: TileCoord, reason: String },

    #[error("tile {coord} could not be decoded: {reason}")]
    Decode { coord: TileCoord, reason: String },

    #[error("reprojection failed: {0}")]
    Reprojection(String),

    #[error("unknown terrain operation: '{0}'")]
    UnknownOperation(String),

    #[error("invalid clip geometry '{source_path}': {reason}")]
    InvalidClipGeometry { source_path: String, reason: String },

    #[error("write failed for '{path}': {reason}")]
    WriteFailure { path: String, reason: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for pipeline operations
pub type DemResult<T> = Result<T, DemError>;
