use crate::io::cache::TileCache;
use crate::types::{DemError, DemResult, TileCoord};
use std::time::Duration;

/// Retry ceiling for transient fetch failures
const MAX_FETCH_ATTEMPTS: u32 = 4;

/// Base delay of the exponential backoff schedule
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Responses smaller than this are error pages, not tiles
const MIN_TILE_BYTES: usize = 64;

/// HTTP tile fetcher with bounded retry and cache write-through
///
/// URLs come from a template with `{z}`, `{x}` and `{y}` placeholders.
/// Transient failures (network errors, 5xx) are retried with exponential
/// backoff up to a fixed ceiling; permanent rejections (4xx, undersized
/// bodies) fail immediately. A successful fetch is persisted to the cache
/// before the bytes are returned.
#[derive(Debug)]
pub struct TileFetcher {
    client: reqwest::blocking::Client,
    url_template: String,
    cache: TileCache,
}

impl TileFetcher {
    pub fn new(url_template: &str, cache: TileCache) -> DemResult<Self> {
        if !(url_template.contains("{z}")
            && url_template.contains("{x}")
            && url_template.contains("{y}"))
        {
            return Err(DemError::Configuration(format!(
                "tile source template must contain {{z}}, {{x}} and {{y}}: '{}'",
                url_template
            )));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("opendem/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DemError::Configuration(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            client,
            url_template: url_template.to_string(),
            cache,
        })
    }

    /// Request URL for a tile coordinate
    pub fn tile_url(&self, coord: TileCoord) -> String {
        self.url_template
            .replace("{z}", &coord.zoom.to_string())
            .replace("{x}", &coord.x.to_string())
            .replace("{y}", &coord.y.to_string())
    }

    /// Fetch a tile from the remote source, writing through to the cache
    pub fn fetch(&self, coord: TileCoord) -> DemResult<Vec<u8>> {
        let url = self.tile_url(coord);
        let mut last_reason = String::new();

        for attempt in 1..=MAX_FETCH_ATTEMPTS {
            match self.try_fetch_once(&url) {
                Ok(bytes) => {
                    self.cache.write(coord, &bytes)?;
                    log::debug!("fetched tile {} ({} bytes)", coord, bytes.len());
                    return Ok(bytes);
                }
                Err(FetchFailure::Permanent(reason)) => {
                    return Err(DemError::TileUnavailable { coord, reason });
                }
                Err(FetchFailure::Transient(reason)) => {
                    log::warn!(
                        "tile {} attempt {}/{} failed: {}",
                        coord,
                        attempt,
                        MAX_FETCH_ATTEMPTS,
                        reason
                    );
                    last_reason = reason;
                    if attempt < MAX_FETCH_ATTEMPTS {
                        std::thread::sleep(BACKOFF_BASE * 2u32.pow(attempt - 1));
                    }
                }
            }
        }

        Err(DemError::TileUnavailable {
            coord,
            reason: format!(
                "{} attempts exhausted, last error: {}",
                MAX_FETCH_ATTEMPTS, last_reason
            ),
        })
    }

    fn try_fetch_once(&self, url: &str) -> Result<Vec<u8>, FetchFailure> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| FetchFailure::Transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(FetchFailure::Permanent(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(FetchFailure::Transient(format!("HTTP {}", status.as_u16())));
        }

        let bytes = response
            .bytes()
            .map_err(|e| FetchFailure::Transient(format!("body read failed: {}", e)))?;

        if bytes.len() < MIN_TILE_BYTES {
            return Err(FetchFailure::Permanent(format!(
                "response too small ({} bytes), likely an error page",
                bytes.len()
            )));
        }

        Ok(bytes.to_vec())
    }
}

enum FetchFailure {
    /// Worth retrying: network error or server-side failure
    Transient(String),
    /// Not worth retrying: client error or malformed response
    Permanent(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache() -> (TempDir, TileCache) {
        let dir = TempDir::new().unwrap();
        let cache = TileCache::new(dir.path()).unwrap();
        (dir, cache)
    }

    #[test]
    fn test_template_substitution() {
        let (_dir, cache) = cache();
        let fetcher =
            TileFetcher::new("https://tiles.example.com/{z}/{x}/{y}.png", cache).unwrap();
        assert_eq!(
            fetcher.tile_url(TileCoord::new(12, 2138, 1434)),
            "https://tiles.example.com/12/2138/1434.png"
        );
    }

    #[test]
    fn test_template_missing_placeholder_rejected() {
        let (_dir, cache) = cache();
        let err = TileFetcher::new("https://tiles.example.com/{z}/{x}.png", cache).unwrap_err();
        assert!(matches!(err, DemError::Configuration(_)));
    }
}
