use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Method;
use serde::Deserialize;
use url::Url;

/// Cover lookup against an itunes-style search api. Searches by artist
/// and album, then downloads the largest artwork variant on offer.
#[derive(Clone)]
pub struct ArtClient {
    inner: Arc<Inner>,
}

struct Inner {
    client: reqwest::Client,
    base_url: Url,
}

impl ArtClient {
    pub fn new(base_url: Url) -> ArtClient {
        ArtClient {
            inner: Arc::new(Inner {
                client: reqwest::Client::new(),
                base_url,
            }),
        }
    }

    pub fn default_endpoint() -> Url {
        Url::parse("https://itunes.apple.com/").expect("default art api url")
    }

    /// Returns the cover image for an album, or None. Lookup failures are
    /// logged and treated as absence.
    pub async fn find_cover(&self, artist: &str, album: &str) -> Option<Vec<u8>> {
        match self.lookup(artist, album).await {
            Ok(art) => art,
            Err(err) => {
                log::warn!("cover lookup for {artist} - {album}: {err:#}");
                None
            }
        }
    }

    async fn lookup(&self, artist: &str, album: &str) -> Result<Option<Vec<u8>>> {
        let Some(result) = self.search(artist, album).await? else {
            return Ok(None);
        };

        let Some(artwork_url) = result.artwork_url else {
            return Ok(None);
        };

        log::debug!("found cover for {artist} - {album}: {:?}", result.collection_name);

        let art = self.download(&largest_variant(&artwork_url)).await?;
        Ok(Some(art))
    }

    async fn search(&self, artist: &str, album: &str) -> Result<Option<SearchResult>> {
        let term = format!("{artist} {album}");
        let url = self.inner.base_url.join("search")?;

        let request = self.inner.client.request(Method::GET, url)
            .query(&[
                ("term", term.as_str()),
                ("entity", "album"),
                ("limit", "1"),
            ])
            .build()?;

        let response = self.inner.client.execute(request).await?;
        response.error_for_status_ref()?;

        let results: SearchResults = response.json().await
            .context("decoding search response")?;

        Ok(results.results.into_iter().next())
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.inner.client.get(url).send().await?;
        response.error_for_status_ref()?;

        Ok(response.bytes().await?.to_vec())
    }
}

/// The search api hands back a 100x100 thumbnail url; the full-size asset
/// lives at the same path with the dimensions swapped out.
fn largest_variant(artwork_url: &str) -> String {
    artwork_url.replace("100x100", "600x600")
}

#[derive(Deserialize, Debug)]
struct SearchResults {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Deserialize, Debug)]
struct SearchResult {
    #[serde(rename = "artworkUrl100")]
    artwork_url: Option<String>,
    #[serde(rename = "collectionName")]
    collection_name: Option<String>,
}
