//! Attachment embedding
//!
//! Course images, documents and profile pictures are stored inline as
//! `data:` URIs so a record never points at a file that may disappear.
//!
//! Example: a PNG "logo.png" becomes "data:image/png;base64,iVBORw0...".

use crate::config::MAX_ATTACHMENT_NAME_LEN;
use crate::error::{AppError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::future::try_join_all;
use std::path::PathBuf;
use tokio::fs;

const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Where the bytes of a pending file come from
#[derive(Debug, Clone)]
pub enum FileSource {
    /// Read from disk when the file is embedded
    Path(PathBuf),
    /// Already in memory
    Bytes(Vec<u8>),
}

/// A file picked by the user but not yet embedded in a record
#[derive(Debug, Clone)]
pub struct PendingFile {
    pub name: String,
    pub mime_type: String,
    pub source: FileSource,
}

/// Result of embedding a `PendingFile`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedFile {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub url: String,
}

impl PendingFile {
    pub fn from_path(name: impl Into<String>, mime_type: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            source: FileSource::Path(path.into()),
        }
    }

    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            source: FileSource::Bytes(data),
        }
    }

    /// Read the file and encode it as a data URI
    pub async fn embed(&self) -> Result<EmbeddedFile> {
        let data = match &self.source {
            FileSource::Path(path) => fs::read(path).await.map_err(|e| {
                AppError::Attachment(format!("Failed to read {:?}: {}", path, e))
            })?,
            FileSource::Bytes(bytes) => bytes.clone(),
        };

        let mime_type = if self.mime_type.trim().is_empty() {
            FALLBACK_MIME_TYPE.to_string()
        } else {
            self.mime_type.trim().to_string()
        };

        tracing::debug!("Embedding {} ({} bytes, {})", self.name, data.len(), mime_type);

        Ok(EmbeddedFile {
            name: sanitize_filename(&self.name),
            url: to_data_url(&mime_type, &data),
            mime_type,
            size: data.len() as u64,
        })
    }
}

/// Embed every file concurrently; fails as a whole if any read fails
pub async fn embed_all(files: &[PendingFile]) -> Result<Vec<EmbeddedFile>> {
    try_join_all(files.iter().map(PendingFile::embed)).await
}

pub fn to_data_url(mime_type: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(data))
}

/// Strip path separators and NUL bytes from a display name
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .filter(|c| *c != '/' && *c != '\\' && *c != '\0')
        .take(MAX_ATTACHMENT_NAME_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Split a base64 data URI back into its mime type and bytes
    fn decode_data_url(url: &str) -> Result<(String, Vec<u8>)> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| AppError::Attachment("Not a data URL".to_string()))?;
        let (mime_type, payload) = rest
            .split_once(";base64,")
            .ok_or_else(|| AppError::Attachment("Data URL is not base64 encoded".to_string()))?;

        let data = STANDARD
            .decode(payload)
            .map_err(|e| AppError::Attachment(format!("Invalid base64 payload: {}", e)))?;

        Ok((mime_type.to_string(), data))
    }

    #[tokio::test]
    async fn test_embed_bytes() {
        let file = PendingFile::from_bytes("hello.txt", "text/plain", b"Hello".to_vec());

        let embedded = file.embed().await.unwrap();

        assert_eq!(embedded.name, "hello.txt");
        assert_eq!(embedded.size, 5);
        assert_eq!(embedded.url, "data:text/plain;base64,SGVsbG8=");
    }

    #[tokio::test]
    async fn test_embed_from_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("notes.pdf");
        fs::write(&path, b"%PDF-1.4").await.unwrap();

        let embedded = PendingFile::from_path("notes.pdf", "application/pdf", &path)
            .embed()
            .await
            .unwrap();

        let (mime, data) = decode_data_url(&embedded.url).unwrap();
        assert_eq!(mime, "application/pdf");
        assert_eq!(data, b"%PDF-1.4");
    }

    #[tokio::test]
    async fn test_missing_file_is_attachment_error() {
        let temp = TempDir::new().unwrap();
        let file = PendingFile::from_path("gone.png", "image/png", temp.path().join("gone.png"));

        let result = file.embed().await;
        assert!(matches!(result, Err(AppError::Attachment(_))));
    }

    #[tokio::test]
    async fn test_embed_all_fails_if_any_fails() {
        let temp = TempDir::new().unwrap();
        let files = vec![
            PendingFile::from_bytes("a.txt", "text/plain", b"a".to_vec()),
            PendingFile::from_path("b.txt", "text/plain", temp.path().join("missing")),
        ];

        assert!(embed_all(&files).await.is_err());
    }

    #[tokio::test]
    async fn test_blank_mime_type_falls_back() {
        let embedded = PendingFile::from_bytes("blob", " ", vec![0, 1, 2])
            .embed()
            .await
            .unwrap();
        assert_eq!(embedded.mime_type, FALLBACK_MIME_TYPE);
        assert!(embedded.url.starts_with("data:application/octet-stream;base64,"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("normal.txt"), "normal.txt");
        // Dots survive, separators do not
        assert_eq!(sanitize_filename("../../../etc/passwd"), "......etcpasswd");
        assert_eq!(sanitize_filename("file\\name.txt"), "filename.txt");
        assert_eq!(sanitize_filename(&"x".repeat(300)).len(), MAX_ATTACHMENT_NAME_LEN);
    }

    #[test]
    fn test_decode_rejects_plain_url() {
        assert!(decode_data_url("https://example.com/a.png").is_err());
        assert!(decode_data_url("data:text/plain,hello").is_err());
    }
}
