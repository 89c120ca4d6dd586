//! Cover image uploads.
//!
//! Accepted files are written under a generated name, then normalized in place
//! to a JPEG that fits the cover bounding box. Normalization is best-effort: if
//! the image cannot be decoded the original bytes are kept.

use crate::config::UploadsConfig;
use crate::error::{AppError, Result};
use axum::body::Bytes;
use image::ImageReader;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Multipart field carrying the cover file.
pub const COVER_FIELD: &str = "coverImage";
/// URL prefix under which uploads are served.
pub const PUBLIC_PREFIX: &str = "/uploads";
/// Cover bounding box width.
pub const COVER_MAX_WIDTH: u32 = 400;
/// Cover bounding box height.
pub const COVER_MAX_HEIGHT: u32 = 600;
/// JPEG quality of normalized covers.
pub const COVER_JPEG_QUALITY: u8 = 85;

/// A file received from a client, not yet on disk.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    /// Client-side file name.
    pub file_name: Option<String>,
    /// Declared content type.
    pub content_type: Option<String>,
    /// File contents.
    pub data: Bytes,
}

/// On-disk store for uploaded covers.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
    max_bytes: u64,
}

impl UploadStore {
    /// Create the store, making sure its directory exists.
    pub fn new(config: &UploadsConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.dir)?;
        Ok(Self {
            dir: config.dir.clone(),
            max_bytes: config.max_bytes,
        })
    }

    /// Directory holding the files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Size ceiling in bytes.
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Reject content types that are not images.
    pub fn check_content_type(&self, content_type: Option<&str>) -> Result<()> {
        match content_type {
            Some(ct) if ct.trim().to_ascii_lowercase().starts_with("image/") => Ok(()),
            _ => Err(AppError::UnsupportedMediaType(
                "Only image files are allowed".to_string(),
            )),
        }
    }

    /// Reject sizes above the ceiling.
    pub fn check_size(&self, len: u64) -> Result<()> {
        if len > self.max_bytes {
            return Err(self.too_large());
        }
        Ok(())
    }

    /// The error returned for oversized uploads.
    pub fn too_large(&self) -> AppError {
        AppError::PayloadTooLarge(format!(
            "File too large (max {} bytes)",
            self.max_bytes
        ))
    }

    /// Write a file and normalize it. Returns its public path.
    pub async fn store(&self, file: IncomingFile) -> Result<String> {
        self.check_content_type(file.content_type.as_deref())?;
        self.check_size(file.data.len() as u64)?;

        tokio::fs::create_dir_all(&self.dir).await?;

        let name = generate_name(file.file_name.as_deref(), file.content_type.as_deref());
        let path = self.dir.join(&name);
        tokio::fs::write(&path, &file.data).await?;

        let target = path.clone();
        let stored = match tokio::task::spawn_blocking(move || normalize_cover(&target)).await {
            Ok(Ok(normalized)) => normalized,
            Ok(Err(e)) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Cover normalization failed, keeping original"
                );
                path
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Cover normalization task failed, keeping original"
                );
                path
            }
        };

        let name = stored
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .unwrap_or(name);
        tracing::debug!(file = %name, "Stored cover");
        Ok(format!("{}/{}", PUBLIC_PREFIX, name))
    }

    /// Delete a stored file by its public path. Returns true if a file was removed.
    ///
    /// Only the final path component is used, so paths cannot escape the
    /// upload directory. Failures are logged, never returned.
    pub async fn remove(&self, public_path: &str) -> bool {
        let Some(path) = self.resolve(public_path) else {
            return false;
        };

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Removed cover");
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove cover");
                false
            }
        }
    }

    /// Map a public path to a file inside the upload directory.
    pub fn resolve(&self, public_path: &str) -> Option<PathBuf> {
        let name = Path::new(public_path).file_name()?;
        Some(self.dir.join(name))
    }
}

/// `cover-<millis>-<random>.<ext>`
fn generate_name(file_name: Option<&str>, content_type: Option<&str>) -> String {
    let random = uuid::Uuid::new_v4().as_u128() % 1_000_000_000;
    format!(
        "cover-{}-{:09}.{}",
        chrono::Utc::now().timestamp_millis(),
        random,
        extension_for(file_name, content_type)
    )
}

fn extension_for(file_name: Option<&str>, content_type: Option<&str>) -> String {
    let from_name = file_name
        .and_then(|n| Path::new(n).extension())
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()));

    if let Some(ext) = from_name {
        return ext;
    }

    match content_type.map(|ct| ct.trim().to_ascii_lowercase()).as_deref() {
        Some("image/jpeg") | Some("image/jpg") => "jpg",
        Some("image/png") => "png",
        Some("image/webp") => "webp",
        Some("image/gif") => "gif",
        _ => "img",
    }
    .to_string()
}

/// Fit an image file inside the cover box and re-encode it as JPEG.
///
/// Smaller images keep their size. The result replaces the original under a
/// `.jpg` name, which is returned.
pub fn normalize_cover(path: &Path) -> Result<PathBuf> {
    let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;

    let img = if img.width() > COVER_MAX_WIDTH || img.height() > COVER_MAX_HEIGHT {
        img.resize(COVER_MAX_WIDTH, COVER_MAX_HEIGHT, FilterType::Lanczos3)
    } else {
        img
    };
    let rgb = img.to_rgb8();

    let tmp = path.with_extension("normalizing");
    let written = (|| -> Result<()> {
        let mut writer = BufWriter::new(std::fs::File::create(&tmp)?);
        JpegEncoder::new_with_quality(&mut writer, COVER_JPEG_QUALITY).encode_image(&rgb)?;
        writer.flush()?;
        Ok(())
    })();

    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }

    let jpg = path.with_extension("jpg");
    std::fs::rename(&tmp, &jpg)?;
    if jpg != path {
        std::fs::remove_file(path)?;
    }
    Ok(jpg)
}
