use std::path::Path;

use danzin_llm::ImageAttachment;
use snafu::{ResultExt, ensure};

use crate::chat::error::{
    ChatResult, EmptyImageSnafu, ImageTooLargeSnafu, ReadImageSnafu, UnsupportedImageTypeSnafu,
};

/// Upper bound for attached images unless settings say otherwise.
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

pub const SUPPORTED_IMAGE_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/gif", "image/webp"];

/// A normalized user turn, ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub text: String,
    pub image: Option<ImageAttachment>,
}

impl Submission {
    /// Trims `text`; returns `None` when there is neither text nor image.
    pub fn new(text: &str, image: Option<ImageAttachment>) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() && image.is_none() {
            return None;
        }

        Some(Self {
            text: text.to_string(),
            image,
        })
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }
}

pub fn is_supported_image_type(media_type: &str) -> bool {
    SUPPORTED_IMAGE_TYPES.contains(&media_type)
}

/// Reads an image from disk, checking its type by extension and its size.
pub async fn load_image(path: &Path, max_bytes: u64) -> ChatResult<ImageAttachment> {
    let media_type = mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_default();
    ensure!(
        is_supported_image_type(&media_type),
        UnsupportedImageTypeSnafu {
            stage: "guess-image-type",
            path: path.to_path_buf(),
            media_type,
        }
    );

    let metadata = tokio::fs::metadata(path).await.context(ReadImageSnafu {
        stage: "stat-image-file",
        path: path.to_path_buf(),
    })?;
    ensure!(
        metadata.len() <= max_bytes,
        ImageTooLargeSnafu {
            stage: "check-image-size",
            path: path.to_path_buf(),
            size: metadata.len(),
            max_bytes,
        }
    );

    let bytes = tokio::fs::read(path).await.context(ReadImageSnafu {
        stage: "read-image-file",
        path: path.to_path_buf(),
    })?;
    ensure!(
        !bytes.is_empty(),
        EmptyImageSnafu {
            stage: "read-image-file",
            path: path.to_path_buf(),
        }
    );

    tracing::debug!(path = ?path, media_type = %media_type, size = bytes.len(), "loaded image attachment");
    Ok(ImageAttachment::new(bytes, media_type))
}
