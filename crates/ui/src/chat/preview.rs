use std::collections::HashMap;

use danzin_llm::ImageAttachment;
use uuid::Uuid;

pub const PREVIEW_URI_SCHEME: &str = "preview:";

/// Attachments referenced from user messages by `preview:<uuid>` URIs.
///
/// An entry lives until the exchange that sent it completes; messages keep the URI
/// after release and render it as a missing image.
#[derive(Debug, Default)]
pub struct PreviewRegistry {
    entries: HashMap<String, ImageAttachment>,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `image` under a fresh `preview:` URI and returns the URI.
    pub fn register(&mut self, image: ImageAttachment) -> String {
        let uri = format!("{PREVIEW_URI_SCHEME}{}", Uuid::now_v7());
        self.entries.insert(uri.clone(), image);
        uri
    }

    pub fn resolve(&self, uri: &str) -> Option<&ImageAttachment> {
        self.entries.get(uri)
    }

    /// Drops the attachment; false when the URI was unknown or already released.
    pub fn release(&mut self, uri: &str) -> bool {
        let released = self.entries.remove(uri).is_some();
        if released {
            tracing::debug!(uri, "released image preview");
        }
        released
    }

    /// Number of attachments still held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
