//! Local filesystem image store
//!
//! Images are written to `<images_dir>/<panel_id>/panel_<panel_id>_<ts>.<ext>`.
//! The returned URL is `<public_image_base_url>/<panel_id>/<file>` when a base
//! URL is configured, otherwise a `file://` URL.
//!
//! Local file references are only honoured under the configured source
//! directory, and their bytes must sniff as an image like any inline body.

use super::{ImageStore, StorageError};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use url::Url;

/// Where the image bytes come from
#[derive(Debug, PartialEq)]
enum ImageSource {
    /// Already durable
    Remote(String),
    /// Decoded data URI, base64 body or vetted local file
    Inline { bytes: Vec<u8>, extension: &'static str },
}

pub struct LocalImageStore {
    images_dir: PathBuf,
    public_base_url: Option<String>,
    source_dir: Option<PathBuf>,
}

impl LocalImageStore {
    pub fn new(images_dir: impl Into<PathBuf>, public_base_url: Option<String>) -> Self {
        Self {
            images_dir: images_dir.into(),
            public_base_url: public_base_url.map(|u| u.trim_end_matches('/').to_string()),
            source_dir: None,
        }
    }

    /// Accept local file references that resolve inside `dir`
    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = Some(dir.into());
        self
    }

    async fn classify(&self, image_ref: &str) -> Result<ImageSource, StorageError> {
        let trimmed = image_ref.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return Ok(ImageSource::Remote(trimmed.to_string()));
        }
        if let Some(rest) = trimmed.strip_prefix("data:") {
            return decode_data_uri(rest);
        }
        if let Ok(meta) = fs::metadata(trimmed).await {
            if meta.is_file() {
                return self.read_local_file(Path::new(trimmed)).await;
            }
        }

        let bytes = STANDARD.decode(strip_whitespace(trimmed)).map_err(|_| {
            StorageError::InvalidImage("not a URL, readable file, or base64 image".to_string())
        })?;
        let extension = sniff_extension(&bytes).ok_or_else(|| {
            StorageError::InvalidImage("base64 content is not a recognised image".to_string())
        })?;
        Ok(ImageSource::Inline { bytes, extension })
    }

    async fn read_local_file(&self, path: &Path) -> Result<ImageSource, StorageError> {
        let Some(root) = &self.source_dir else {
            warn!(path = %path.display(), "Local image file refused, no source directory set");
            return Err(StorageError::InvalidImage(
                "local image files are not accepted".to_string(),
            ));
        };
        let root = fs::canonicalize(root).await?;
        let resolved = fs::canonicalize(path).await?;
        if !resolved.starts_with(&root) {
            warn!(path = %path.display(), "Local image file outside source directory refused");
            return Err(StorageError::InvalidImage(format!(
                "{} is outside the image source directory",
                path.display()
            )));
        }

        let bytes = fs::read(&resolved).await?;
        let extension = sniff_extension(&bytes).ok_or_else(|| {
            StorageError::InvalidImage(format!("{} is not a recognised image", path.display()))
        })?;
        Ok(ImageSource::Inline { bytes, extension })
    }

    fn public_url(&self, panel_dir: &str, file_name: &str, stored: &Path) -> Result<String, StorageError> {
        if let Some(base) = &self.public_base_url {
            return Ok(format!("{base}/{panel_dir}/{file_name}"));
        }
        Url::from_file_path(stored)
            .map(String::from)
            .map_err(|_| StorageError::InvalidImage(format!("no file URL for {}", stored.display())))
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn upload(&self, image_ref: &str, panel_id: &str) -> Result<String, StorageError> {
        let (bytes, extension) = match self.classify(image_ref).await? {
            ImageSource::Remote(url) => {
                debug!(panel_id = %panel_id, "Image reference is already a URL");
                return Ok(url);
            }
            ImageSource::Inline { bytes, extension } => (bytes, extension),
        };

        let panel_dir = sanitize_segment(panel_id);
        let dir = self.images_dir.join(&panel_dir);
        fs::create_dir_all(&dir).await?;
        let stamp = Utc::now().timestamp_micros();
        let target = dir.join(format!("panel_{panel_dir}_{stamp}.{extension}"));
        fs::write(&target, &bytes).await?;

        let stored = fs::canonicalize(&target).await?;
        let file_name = target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let url = self.public_url(&panel_dir, &file_name, &stored)?;
        info!(panel_id = %panel_id, url = %url, "Image stored");
        Ok(url)
    }
}

fn decode_data_uri(rest: &str) -> Result<ImageSource, StorageError> {
    let (header, body) = rest
        .split_once(',')
        .ok_or_else(|| StorageError::InvalidImage("data URI without body".to_string()))?;
    let (mime, encoding) = header.split_once(';').unwrap_or((header, ""));
    if encoding != "base64" {
        return Err(StorageError::InvalidImage(
            "only base64 data URIs are supported".to_string(),
        ));
    }
    let bytes = STANDARD
        .decode(strip_whitespace(body))
        .map_err(|e| StorageError::InvalidImage(format!("bad base64 in data URI: {e}")))?;
    let extension = match mime {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        other => sniff_extension(&bytes)
            .ok_or_else(|| StorageError::InvalidImage(format!("unsupported media type {other}")))?,
    };
    Ok(ImageSource::Inline { bytes, extension })
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_ascii_whitespace()).collect()
}

/// File extension from the image's magic bytes
fn sniff_extension(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some("png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("jpg")
    } else if bytes.starts_with(b"GIF8") {
        Some("gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("webp")
    } else if bytes.starts_with(b"BM") {
        Some("bmp")
    } else {
        None
    }
}

/// Panel ids come from topics; keep them to one safe path segment
fn sanitize_segment(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}
