use crate::types::{DemError, DemResult, TileCoord};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Content-addressed on-disk tile store
///
/// One file per tile coordinate under `<root>/<z>/<x>/<y>.png`. Entries are
/// immutable for a given source, so presence is the only freshness marker
/// and the store grows append-only with no eviction. Multiple processes may
/// share one cache directory; writes go through a temporary file in the
/// destination directory followed by a rename, so a reader never observes a
/// partially written tile.
#[derive(Debug, Clone)]
pub struct TileCache {
    root: PathBuf,
}

impl TileCache {
    /// Open (creating if necessary) a cache rooted at `root`
    pub fn new<P: AsRef<Path>>(root: P) -> DemResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        log::debug!("tile cache at {}", root.display());
        Ok(Self { root })
    }

    /// On-disk path for a tile coordinate
    pub fn entry_path(&self, coord: TileCoord) -> PathBuf {
        self.root
            .join(coord.zoom.to_string())
            .join(coord.x.to_string())
            .join(format!("{}.png", coord.y))
    }

    /// Whether a tile is present
    pub fn has(&self, coord: TileCoord) -> bool {
        self.entry_path(coord).is_file()
    }

    /// Read a cached tile, or `None` on a miss
    pub fn read(&self, coord: TileCoord) -> DemResult<Option<Vec<u8>>> {
        let path = self.entry_path(coord);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist a tile atomically
    pub fn write(&self, coord: TileCoord, bytes: &[u8]) -> DemResult<()> {
        let path = self.entry_path(coord);
        let dir = path
            .parent()
            .ok_or_else(|| DemError::WriteFailure {
                path: path.display().to_string(),
                reason: "entry path has no parent directory".to_string(),
            })?;
        std::fs::create_dir_all(dir)?;

        // Temp file in the same directory so the rename never crosses a
        // filesystem boundary.
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| DemError::WriteFailure {
            path: path.display().to_string(),
            reason: format!("temp file creation failed: {}", e),
        })?;
        tmp.write_all(bytes).map_err(|e| DemError::WriteFailure {
            path: path.display().to_string(),
            reason: format!("temp file write failed: {}", e),
        })?;
        tmp.persist(&path).map_err(|e| DemError::WriteFailure {
            path: path.display().to_string(),
            reason: format!("rename into place failed: {}", e),
        })?;

        log::debug!("cached tile {} ({} bytes)", coord, bytes.len());
        Ok(())
    }

    /// Number of entries currently present (test and logging aid)
    pub fn entry_count(&self) -> usize {
        fn walk(dir: &Path, count: &mut usize) {
            if let Ok(entries) = std::fs::read_dir(dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.is_dir() {
                        walk(&path, count);
                    } else if path.extension().is_some_and(|e| e == "png") {
                        *count += 1;
                    }
                }
            }
        }
        let mut count = 0;
        walk(&self.root, &mut count);
        count
    }
}
