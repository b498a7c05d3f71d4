use std::io;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tokio::fs;

const MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// On-disk cover cache. Entries expire by file mtime, so a cache shared
/// across runs needs no sidecar metadata.
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new(dir: PathBuf) -> DiskCache {
        DiskCache { dir }
    }

    pub fn default_location() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("mpdnow")
            .join("covers")
    }

    pub async fn get(&self, stem: &str) -> Option<Vec<u8>> {
        let path = self.entry_path(stem);

        let meta = fs::metadata(&path).await.ok()?;
        if expired(&meta) {
            log::debug!("expiring cached cover {}", path.display());
            if let Err(err) = fs::remove_file(&path).await {
                log::warn!("removing expired cover {}: {err}", path.display());
            }
            return None;
        }

        match fs::read(&path).await {
            Ok(data) => Some(data),
            Err(err) => {
                log::warn!("reading cached cover {}: {err}", path.display());
                None
            }
        }
    }

    pub async fn put(&self, stem: &str, data: &[u8]) {
        let path = self.entry_path(stem);

        let result = async {
            fs::create_dir_all(&self.dir).await?;
            fs::write(&path, data).await
        }
        .await;

        if let Err(err) = result {
            log::warn!("writing cached cover {}: {err}", path.display());
        }
    }

    /// Deletes every cached entry, returning the number of bytes freed.
    pub async fn clear(&self) -> io::Result<u64> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err),
        };

        let mut freed = 0;

        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_file() {
                fs::remove_file(entry.path()).await?;
                freed += meta.len();
            }
        }

        Ok(freed)
    }

    fn entry_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.img"))
    }
}

fn expired(meta: &std::fs::Metadata) -> bool {
    let Ok(modified) = meta.modified() else {
        return false;
    };

    match SystemTime::now().duration_since(modified) {
        Ok(age) => age > MAX_AGE,
        // an mtime in the future keeps the entry
        Err(_) => false,
    }
}
