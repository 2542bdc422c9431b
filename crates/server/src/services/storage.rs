// Media storage for course images, chapter videos and attachment files.
//
// Only the returned URL is stored in the database; the bytes live under the
// storage root and are served from `/media`.

use std::path::PathBuf;

use tokio::fs;
use uuid::Uuid;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Attachment,
}

impl MediaKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "attachment" => Some(Self::Attachment),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Attachment => "attachment",
        }
    }

    /// Whether an upload's declared content type fits this kind. Attachments
    /// accept anything.
    pub fn accepts(self, content_type: Option<&str>) -> bool {
        match self {
            Self::Image => content_type.is_some_and(|ct| ct.starts_with("image/")),
            Self::Video => content_type.is_some_and(|ct| ct.starts_with("video/")),
            Self::Attachment => true,
        }
    }
}

pub struct MediaStore {
    base_path: PathBuf,
    public_url: String,
}

impl MediaStore {
    pub fn new(base_path: impl Into<PathBuf>, public_url: &str) -> Self {
        Self {
            base_path: base_path.into(),
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    pub async fn init(&self) -> Result<()> {
        for kind in [MediaKind::Image, MediaKind::Video, MediaKind::Attachment] {
            fs::create_dir_all(self.base_path.join(kind.as_str()))
                .await
                .map_err(|e| {
                    AppError::Internal(format!("Failed to create storage directory: {e}"))
                })?;
        }
        Ok(())
    }

    /// Stores `data` and returns the URL it can be fetched from.
    pub async fn store(&self, kind: MediaKind, file_name: &str, data: &[u8]) -> Result<String> {
        if data.is_empty() {
            return Err(AppError::Validation(format!("File {file_name} is empty")));
        }

        let stored_name = format!("{}-{}", Uuid::new_v4(), sanitize_file_name(file_name));
        let dir = self.base_path.join(kind.as_str());
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to create directories: {e}")))?;

        fs::write(dir.join(&stored_name), data)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to write file: {e}")))?;

        tracing::debug!(kind = kind.as_str(), file = %stored_name, bytes = data.len(), "media stored");
        Ok(format!(
            "{}/media/{}/{}",
            self.public_url,
            kind.as_str(),
            stored_name
        ))
    }
}

/// Keeps the last path component and replaces anything outside a
/// conservative character set.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}
