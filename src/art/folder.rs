use std::path::{Path, PathBuf};

use tokio::fs;

const COVER_STEMS: &[&str] = &["cover", "folder", "albumart", "front"];
const IMAGE_EXTS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// Looks for a cover image in a song's directory. Well-known names are
/// tried exactly first, then the directory is scanned case-insensitively.
pub async fn find_cover(dir: &Path) -> Option<Vec<u8>> {
    for stem in COVER_STEMS {
        for ext in IMAGE_EXTS {
            let path = dir.join(format!("{stem}.{ext}"));
            if let Ok(data) = fs::read(&path).await {
                log::debug!("found cover file {}", path.display());
                return Some(data);
            }
        }
    }

    let path = scan(dir).await?;
    log::debug!("found cover file {}", path.display());
    fs::read(&path).await.ok()
}

async fn scan(dir: &Path) -> Option<PathBuf> {
    let mut entries = fs::read_dir(dir).await.ok()?;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let name = name.to_lowercase();

        let Some((stem, ext)) = name.rsplit_once('.') else { continue };

        if COVER_STEMS.contains(&stem) && IMAGE_EXTS.contains(&ext) {
            return Some(entry.path());
        }
    }

    None
}
