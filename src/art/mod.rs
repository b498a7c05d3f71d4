pub mod cache;
pub mod extract;
pub mod folder;
pub mod remote;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use derive_more::Display;
use tokio::sync::Mutex as AsyncMutex;
use url::Url;

use crate::mpd::types::Song;

use cache::DiskCache;
use remote::ArtClient;

#[derive(Debug, Clone)]
pub struct Config {
    /// Root the song file paths resolve under. Defaults to the platform
    /// music directory; without one the local art tiers are skipped.
    pub music_dir: Option<PathBuf>,
    pub cache_dir: PathBuf,
    pub extract_tool: String,
    pub api_url: Option<Url>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            music_dir: dirs::audio_dir(),
            cache_dir: DiskCache::default_location(),
            extract_tool: "ffmpeg".to_string(),
            api_url: None,
        }
    }
}

/// Identifies an album independently of tag capitalisation or stray
/// whitespace. Songs missing either tag have no key and no art.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display)]
#[display("{artist} - {album}")]
pub struct AlbumKey {
    artist: String,
    album: String,
}

impl AlbumKey {
    pub fn new(artist: &str, album: &str) -> Option<AlbumKey> {
        let artist = artist.trim().to_lowercase();
        let album = album.trim().to_lowercase();

        if artist.is_empty() || album.is_empty() {
            return None;
        }

        Some(AlbumKey { artist, album })
    }

    pub fn for_song(song: &Song) -> Option<AlbumKey> {
        AlbumKey::new(song.artist.as_deref()?, song.album.as_deref()?)
    }

    pub fn artist(&self) -> &str {
        &self.artist
    }

    pub fn album(&self) -> &str {
        &self.album
    }

    /// Filesystem-safe name for disk cache entries.
    pub fn file_stem(&self) -> String {
        format!("{self}")
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect()
    }
}

/// Resolves and caches album art. A lookup checks the memory and disk
/// tiers before fetching: embedded art first, then a cover file next to
/// the song, then the remote api.
#[derive(Clone)]
pub struct ArtStore {
    inner: Arc<Inner>,
}

struct Inner {
    memory: AsyncMutex<Memory>,
    music_dir: AsyncMutex<Option<PathBuf>>,
    disk: DiskCache,
    extract_tool: String,
    remote: ArtClient,
}

#[derive(Default)]
struct Memory {
    cache: HashMap<AlbumKey, Arc<Vec<u8>>>,
    in_flight: HashSet<AlbumKey>,
}

impl ArtStore {
    pub fn new(config: Config) -> ArtStore {
        let api_url = config.api_url.unwrap_or_else(ArtClient::default_endpoint);

        ArtStore {
            inner: Arc::new(Inner {
                memory: AsyncMutex::new(Memory::default()),
                music_dir: AsyncMutex::new(config.music_dir),
                disk: DiskCache::new(config.cache_dir),
                extract_tool: config.extract_tool,
                remote: ArtClient::new(api_url),
            }),
        }
    }

    /// Cover art for a song's album. Songs without album tags and albums
    /// with no art anywhere resolve to None. A lookup already running on
    /// another task also reports None rather than waiting on it. Once a
    /// lookup starts it runs to completion, caching whatever it finds,
    /// whether or not this call sticks around for the answer.
    pub async fn get(&self, song: &Song) -> Option<Arc<Vec<u8>>> {
        let key = AlbumKey::for_song(song)?;

        {
            let mut memory = self.inner.memory.lock().await;

            if let Some(art) = memory.cache.get(&key) {
                return Some(art.clone());
            }

            if !memory.in_flight.insert(key.clone()) {
                log::debug!("art lookup for {key} already in flight");
                return None;
            }
        }

        // the chain runs on its own task, so the claim is released and the
        // result cached even if this caller goes away before it finishes
        let task = tokio::task::spawn({
            let store = self.clone();
            let song = song.clone();
            async move { store.complete(key, song).await }
        });

        task.await.ok().flatten()
    }

    async fn complete(&self, key: AlbumKey, song: Song) -> Option<Arc<Vec<u8>>> {
        let art = self.resolve(&key, &song).await;

        let mut memory = self.inner.memory.lock().await;
        memory.in_flight.remove(&key);

        let art = Arc::new(art?);
        memory.cache.insert(key, art.clone());

        Some(art)
    }

    async fn resolve(&self, key: &AlbumKey, song: &Song) -> Option<Vec<u8>> {
        if let Some(art) = self.inner.disk.get(&key.file_stem()).await {
            log::debug!("disk cache hit for {key}");
            return Some(art);
        }

        let art = self.fetch(key, song).await?;
        self.inner.disk.put(&key.file_stem(), &art).await;

        log::info!("resolved art for {key} ({} bytes)", art.len());
        Some(art)
    }

    async fn fetch(&self, key: &AlbumKey, song: &Song) -> Option<Vec<u8>> {
        if let Some(path) = self.local_path(song).await {
            if let Some(art) = extract::embedded_art(&self.inner.extract_tool, &path).await {
                log::debug!("extracted embedded art for {key}");
                return Some(art);
            }

            if let Some(dir) = path.parent() {
                if let Some(art) = folder::find_cover(dir).await {
                    return Some(art);
                }
            }
        }

        self.inner.remote.find_cover(key.artist(), key.album()).await
    }

    async fn local_path(&self, song: &Song) -> Option<PathBuf> {
        // streams and other urls have no file under the music dir
        if song.file.contains("://") {
            return None;
        }

        let dir = self.inner.music_dir.lock().await;
        Some(dir.as_ref()?.join(&song.file))
    }

    /// Points the store at a different music directory. Cached art may
    /// have come from files under the old root, so both tiers are dropped.
    pub async fn set_music_dir(&self, dir: Option<PathBuf>) {
        *self.inner.music_dir.lock().await = dir;

        self.inner.memory.lock().await.cache.clear();

        match self.inner.disk.clear().await {
            Ok(freed) => log::info!("cleared art cache ({freed} bytes)"),
            Err(err) => log::warn!("clearing art cache: {err}"),
        }
    }

    /// Empties both cache tiers, returning the disk bytes freed.
    pub async fn clear(&self) -> std::io::Result<u64> {
        self.inner.memory.lock().await.cache.clear();
        self.inner.disk.clear().await
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::*;

    fn song(file: &str) -> Song {
        Song {
            file: file.to_string(),
            title: Some("Song".to_string()),
            artist: Some("Band".to_string()),
            album: Some("Record".to_string()),
            duration: None,
        }
    }

    // "band - record" sanitised for the disk cache
    const STEM: &str = "band---record";

    fn test_store(cache_dir: &Path, music_dir: Option<PathBuf>, tool: &str) -> ArtStore {
        ArtStore::new(Config {
            music_dir,
            cache_dir: cache_dir.to_path_buf(),
            extract_tool: tool.to_string(),
            api_url: Some(Url::parse("http://127.0.0.1:9/").unwrap()),
        })
    }

    #[cfg(unix)]
    fn fake_tool(dir: &Path, script: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();

        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();

        path.to_str().unwrap().to_string()
    }

    #[test]
    fn album_key_requires_both_tags() {
        let key = AlbumKey::new(" Radiohead ", "OK Computer").unwrap();
        assert_eq!(key.to_string(), "radiohead - ok computer");

        assert_eq!(AlbumKey::new("", "OK Computer"), None);
        assert_eq!(AlbumKey::new("Radiohead", "   "), None);

        let untagged = Song {
            album: None,
            ..song("a.flac")
        };
        assert_eq!(AlbumKey::for_song(&untagged), None);
    }

    #[test]
    fn file_stem_replaces_awkward_characters() {
        let key = AlbumKey::new("AC/DC", "Back in Black").unwrap();
        assert_eq!(key.file_stem(), "ac-dc---back-in-black");
    }

    #[test]
    fn default_config_detects_the_music_root() {
        assert_eq!(Config::default().music_dir, dirs::audio_dir());
    }

    #[tokio::test]
    async fn serves_memory_after_first_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path(), None, "unused-tool");

        DiskCache::new(dir.path().to_path_buf()).put(STEM, b"seeded").await;

        let art = store.get(&song("a.flac")).await.unwrap();
        assert_eq!(art.as_slice(), b"seeded");

        // another track on the same album hits memory, not the disk entry
        std::fs::remove_file(dir.path().join(format!("{STEM}.img"))).unwrap();

        let art = store.get(&song("b.flac")).await.unwrap();
        assert_eq!(art.as_slice(), b"seeded");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn concurrent_lookup_for_same_album_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("covers");
        let music_dir = dir.path().join("music");
        std::fs::create_dir_all(&music_dir).unwrap();
        std::fs::write(music_dir.join("a.flac"), b"flac").unwrap();

        let marker = dir.path().join("runs");
        let script = format!(
            "echo run >> \"{}\"\nsleep 0.3\nprintf art-bytes > \"$9\"",
            marker.display(),
        );
        let tool = fake_tool(dir.path(), &script);

        let store = test_store(&cache_dir, Some(music_dir), &tool);

        let track = song("a.flac");
        let (first, second) = tokio::join!(
            store.get(&track),
            store.get(&track),
        );

        assert_eq!(first.unwrap().as_slice(), b"art-bytes");
        assert_eq!(second, None, "concurrent lookup should report absent");

        let runs = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(runs.lines().count(), 1);

        // the finished lookup serves later calls from memory
        let third = store.get(&song("a.flac")).await.unwrap();
        assert_eq!(third.as_slice(), b"art-bytes");
        assert_eq!(std::fs::read_to_string(&marker).unwrap().lines().count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn abandoned_lookup_still_caches_the_album() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("covers");
        let music_dir = dir.path().join("music");
        std::fs::create_dir_all(&music_dir).unwrap();
        std::fs::write(music_dir.join("a.flac"), b"flac").unwrap();

        let marker = dir.path().join("runs");
        let script = format!(
            "echo run >> \"{}\"\nsleep 0.3\nprintf art-bytes > \"$9\"",
            marker.display(),
        );
        let tool = fake_tool(dir.path(), &script);

        let store = test_store(&cache_dir, Some(music_dir), &tool);

        // give up on the first lookup partway through its chain
        let track = song("a.flac");
        let first = store.get(&track);
        assert!(tokio::time::timeout(Duration::from_millis(50), first).await.is_err());

        // the chain finishes on its own and the result is served from cache
        let art = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(art) = store.get(&track).await {
                    return art;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(art.as_slice(), b"art-bytes");
        assert_eq!(std::fs::read_to_string(&marker).unwrap().lines().count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn falls_back_to_a_cover_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("covers");
        let music_dir = dir.path().join("music");
        std::fs::create_dir_all(music_dir.join("album")).unwrap();
        std::fs::write(music_dir.join("album/a.flac"), b"flac").unwrap();
        std::fs::write(music_dir.join("album/cover.jpg"), b"cover bytes").unwrap();

        let tool = fake_tool(dir.path(), "exit 1");
        let store = test_store(&cache_dir, Some(music_dir), &tool);

        let art = store.get(&song("album/a.flac")).await.unwrap();
        assert_eq!(art.as_slice(), b"cover bytes");

        // resolved art lands in the disk cache
        let entry = cache_dir.join(format!("{STEM}.img"));
        assert_eq!(std::fs::read(entry).unwrap(), b"cover bytes");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn urls_never_touch_the_extraction_tool() {
        let dir = tempfile::tempdir().unwrap();
        let music_dir = dir.path().join("music");
        std::fs::create_dir_all(&music_dir).unwrap();

        let marker = dir.path().join("runs");
        let script = format!("echo run >> \"{}\"", marker.display());
        let tool = fake_tool(dir.path(), &script);

        let store = test_store(dir.path(), Some(music_dir), &tool);

        let art = store.get(&song("http://radio.example/stream")).await;
        assert_eq!(art, None);
        assert!(!marker.exists(), "extraction tool ran for a url");
    }

    #[tokio::test]
    async fn failed_lookup_releases_the_album() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path(), None, "unused-tool");

        assert_eq!(store.get(&song("a.flac")).await, None);

        // the album must be retryable after a miss
        DiskCache::new(dir.path().to_path_buf()).put(STEM, b"late").await;

        let art = store.get(&song("a.flac")).await.unwrap();
        assert_eq!(art.as_slice(), b"late");
    }

    #[tokio::test]
    async fn set_music_dir_drops_cached_art() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path(), None, "unused-tool");

        DiskCache::new(dir.path().to_path_buf()).put(STEM, b"seeded").await;
        store.get(&song("a.flac")).await.unwrap();

        store.set_music_dir(None).await;

        assert!(!dir.path().join(format!("{STEM}.img")).exists());
        assert_eq!(store.get(&song("a.flac")).await, None);
    }

    #[tokio::test]
    async fn clear_empties_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path(), None, "unused-tool");

        DiskCache::new(dir.path().to_path_buf()).put(STEM, b"123456").await;
        store.get(&song("a.flac")).await.unwrap();

        assert_eq!(store.clear().await.unwrap(), 6);
        assert_eq!(store.get(&song("a.flac")).await, None);
    }
}
