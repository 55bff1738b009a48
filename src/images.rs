use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use reqwest::blocking::Client;
use url::Url;

use crate::epub::{EpubBook, ImageResource};

/// Extensions kept as-is; anything else is stored as `.jpg`.
pub const RECOGNIZED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "svg"];

/// Where a downloaded image lives inside the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub path: String,
    pub id: String,
}

/// Original URL to archive location, scoped to one chapter.
pub type ImageMap = HashMap<String, ImageRef>;

#[derive(Debug, Clone)]
pub struct ImageFetcher {
    client: Client,
}

impl ImageFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .context("build image http client")?;
        Ok(Self { client })
    }

    /// Downloads every URL in order and registers the successful ones in
    /// `book`. A failed download is logged and left out of the returned map.
    pub fn fetch_all(&self, urls: &[String], chapter_index: u32, book: &mut EpubBook) -> ImageMap {
        let mut images = ImageMap::new();
        for (ordinal, url) in urls.iter().enumerate() {
            let extension = image_extension(url);
            let id = format!("img_{chapter_index}_{}", ordinal + 1);
            let path = format!("images/{id}.{extension}");

            let data = match self.fetch(url) {
                Ok(data) => data,
                Err(err) => {
                    tracing::warn!(url = %url, chapter = chapter_index, ?err, "image download failed; keeping remote src");
                    continue;
                }
            };

            tracing::debug!(url = %url, path = %path, bytes = data.len(), "downloaded image");
            book.add_image(ImageResource {
                id: id.clone(),
                path: path.clone(),
                media_type: media_type_for_extension(extension),
                data,
            });
            images.insert(url.clone(), ImageRef { path, id });
        }
        images
    }

    fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?;
        let bytes = response
            .bytes()
            .with_context(|| format!("read image body: {url}"))?;
        Ok(bytes.to_vec())
    }
}

/// Lowercase extension (without the dot) taken from the URL path.
pub fn image_extension(url: &str) -> &'static str {
    let ext = Url::parse(url)
        .ok()
        .and_then(|url| {
            Path::new(url.path())
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase)
        })
        .unwrap_or_default();

    RECOGNIZED_EXTENSIONS
        .iter()
        .find(|known| **known == ext)
        .copied()
        .unwrap_or("jpg")
}

pub fn media_type_for_extension(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}
