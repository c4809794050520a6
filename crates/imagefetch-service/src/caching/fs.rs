use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::DynamicImage;
use tempfile::{NamedTempFile, TempDir};

use crate::codec;
use crate::config::Config;

use super::{CacheVariant, ResourceKey};

/// Entries in `tmp/` untouched for this long are leftovers of a crashed process.
const STALE_TMP_AGE: Duration = Duration::from_secs(60 * 60);

/// The persistent tier, a flat directory with two files per key.
///
/// Files are named after [`ResourceKey::cache_name`]. Entries are never expired.
/// Several instances, possibly in different processes, may share one directory.
#[derive(Debug, Clone)]
pub struct DiskCache {
    /// Directory to store cache items in.
    cache_dir: PathBuf,

    /// This instance's private directory for temporary files, inside `cache_dir/tmp`.
    ///
    /// New files are fully written into this directory first, and then atomically moved to
    /// their final location, so readers never observe a partially written image. It is
    /// removed once the last clone of this cache is dropped.
    tmp_dir: Arc<TempDir>,
}

impl DiskCache {
    /// Creates the disk tier from the configured `cache_dir`.
    ///
    /// Returns `None` if there is no `cache_dir` configured.
    pub fn from_config(config: &Config) -> io::Result<Option<Self>> {
        match config.cache_dir {
            Some(ref dir) => Self::new(dir.clone()).map(Some),
            None => Ok(None),
        }
    }

    /// Opens (and creates if necessary) the disk tier at `cache_dir`.
    ///
    /// Stale temporary files left behind by a previous process are removed.
    pub fn new(cache_dir: PathBuf) -> io::Result<Self> {
        Self::open(cache_dir, STALE_TMP_AGE)
    }

    pub(super) fn open(cache_dir: PathBuf, stale_after: Duration) -> io::Result<Self> {
        let tmp_root = cache_dir.join("tmp");
        fs::create_dir_all(&tmp_root)?;
        sweep_stale(&tmp_root, stale_after);

        let tmp_dir = tempfile::Builder::new()
            .prefix("instance-")
            .tempdir_in(&tmp_root)?;

        Ok(Self {
            cache_dir,
            tmp_dir: Arc::new(tmp_dir),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// The path where the given variant of `key` is stored.
    pub fn path(&self, key: &ResourceKey, variant: CacheVariant) -> PathBuf {
        self.cache_dir.join(key.cache_name(variant))
    }

    /// Loads and decodes the given variant.
    ///
    /// Missing, unreadable or undecodable files are all treated as a miss.
    pub fn load(&self, key: &ResourceKey, variant: CacheVariant) -> Option<DynamicImage> {
        let path = self.path(key, variant);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::trace!("No cache file for `{}` at {}", key, path.display());
                return None;
            }
            Err(err) => {
                tracing::warn!(
                    error = &err as &dyn std::error::Error,
                    "Failed to read cache file {}",
                    path.display()
                );
                return None;
            }
        };

        match codec::decode(&data) {
            Ok(image) => Some(image),
            Err(err) => {
                tracing::warn!(
                    error = &err as &dyn std::error::Error,
                    "Corrupt cache file {}",
                    path.display()
                );
                None
            }
        }
    }

    /// Encodes and persists the given variant, replacing any previous file.
    pub fn store(
        &self,
        key: &ResourceKey,
        variant: CacheVariant,
        image: &DynamicImage,
    ) -> io::Result<PathBuf> {
        let data = codec::encode(image).map_err(io::Error::other)?;

        // another instance may have swept our directory while we were idle
        fs::create_dir_all(self.tmp_dir.path())?;
        let mut temp_file = NamedTempFile::new_in(self.tmp_dir.path())?;
        temp_file.write_all(&data)?;
        temp_file.flush()?;

        let path = self.path(key, variant);
        persist_tempfile(temp_file, &path)?;

        tracing::trace!("Wrote {} bytes to {}", data.len(), path.display());
        metric!(time_raw("caches.file.size") = data.len() as u64);
        Ok(path)
    }
}

/// Removes everything in `tmp_root` that was not modified within `stale_after`.
///
/// Directories of live instances are touched by every write, so only abandoned ones qualify.
fn sweep_stale(tmp_root: &Path, stale_after: Duration) {
    let entries = match fs::read_dir(tmp_root) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(
                error = &err as &dyn std::error::Error,
                "Failed to list {}",
                tmp_root.display()
            );
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| modified.elapsed().ok());
        if !age.is_some_and(|age| age >= stale_after) {
            continue;
        }

        let result = if metadata.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => tracing::debug!("Removed stale temporary {}", path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(
                error = &err as &dyn std::error::Error,
                "Failed to remove stale temporary {}",
                path.display()
            ),
        }
    }
}

/// Moves a fully written temp file to its final location.
///
/// The cache directory may be deleted from under us by an outside party, in which case we
/// re-create it and retry.
fn persist_tempfile(mut temp_file: NamedTempFile, cache_path: &Path) -> io::Result<()> {
    let parent = cache_path
        .parent()
        .ok_or_else(|| io::Error::other("no parent directory to persist item"))?;

    const MAX_RETRIES: usize = 2;
    let mut retries = 0;
    loop {
        retries += 1;

        if let Err(e) = fs::create_dir_all(parent) {
            tracing::error!("Failed to create cache directory: {:?}", e);
            if retries > MAX_RETRIES {
                return Err(e);
            }
            continue;
        }

        match temp_file.persist(cache_path) {
            Ok(_) => return Ok(()),
            Err(e) => {
                temp_file = e.file;
                let err = e.error;
                tracing::error!("Failed to persist cache file: {:?}", err);
                if retries > MAX_RETRIES {
                    return Err(err);
                }
            }
        }
    }
}
