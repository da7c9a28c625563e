//! Media attachment reference

use serde::{Deserialize, Serialize};

/// An image or video attached to a record.
///
/// Holds a local file reference until the upload is confirmed, and the remote
/// URL afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Path of the locally captured file, if still on device
    #[serde(default)]
    pub local_path: Option<String>,
    /// URL returned by the remote store after upload
    #[serde(default)]
    pub remote_url: Option<String>,
    /// Content MIME type
    pub mime_type: String,
}

impl MediaRef {
    /// Reference to a file captured on device and not yet uploaded
    pub fn local(path: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            local_path: Some(path.into()),
            remote_url: None,
            mime_type: mime_type.into(),
        }
    }

    /// Reference to already uploaded media
    pub fn remote(url: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            local_path: None,
            remote_url: Some(url.into()),
            mime_type: mime_type.into(),
        }
    }

    /// Local file exists but remote URL is not known yet
    pub const fn is_pending_upload(&self) -> bool {
        self.local_path.is_some() && self.remote_url.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_upload() {
        assert!(MediaRef::local("/tmp/a.jpg", "image/jpeg").is_pending_upload());
        assert!(!MediaRef::remote("https://x/a.jpg", "image/jpeg").is_pending_upload());
    }
}
