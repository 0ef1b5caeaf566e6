use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::SystemTime;

use engine_logging::engine_debug;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

/// Disk-backed response cache keyed by URL digest.
///
/// Entries are whole response bodies, written atomically (temp file then
/// rename) so a crash mid-store never leaves a truncated entry. The cache is
/// kept under `max_bytes` by evicting the oldest entries after each store.
/// Reads that fail for any reason degrade to a miss, never to an error.
pub struct DiskCache {
    dir: PathBuf,
    max_bytes: u64,
}

impl DiskCache {
    pub fn open(dir: impl Into<PathBuf>, max_bytes: u64) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, max_bytes })
    }

    pub fn load(&self, url: &str) -> Option<Vec<u8>> {
        fs::read(self.entry_path(url)).ok()
    }

    pub fn store(&self, url: &str, body: &[u8]) -> io::Result<()> {
        if body.len() as u64 > self.max_bytes {
            // A single oversized body would evict the whole cache.
            return Ok(());
        }
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(body)?;
        tmp.flush()?;
        tmp.persist(self.entry_path(url)).map_err(|err| err.error)?;
        self.evict_over_budget();
        Ok(())
    }

    fn entry_path(&self, url: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let digest = hasher.finalize();
        let mut name = String::with_capacity(64);
        for byte in digest {
            use std::fmt::Write as _;
            let _ = write!(&mut name, "{byte:02x}");
        }
        self.dir.join(name)
    }

    fn evict_over_budget(&self) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        let mut files: Vec<(PathBuf, u64, SystemTime)> = entries
            .flatten()
            .filter_map(|entry| {
                let meta = entry.metadata().ok()?;
                if !meta.is_file() {
                    return None;
                }
                Some((entry.path(), meta.len(), meta.modified().ok()?))
            })
            .collect();

        let mut total: u64 = files.iter().map(|(_, len, _)| len).sum();
        if total <= self.max_bytes {
            return;
        }
        files.sort_by_key(|(_, _, modified)| *modified);
        for (path, len, _) in files {
            if total <= self.max_bytes {
                break;
            }
            if fs::remove_file(&path).is_ok() {
                engine_debug!("cache evicted {} ({len} bytes)", path.display());
                total = total.saturating_sub(len);
            }
        }
    }
}
