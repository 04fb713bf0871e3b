use async_trait::async_trait;

use crate::{
    domain::{MediaHandle, UserId},
    Result,
};

/// Binary content to upload ahead of a media message.
#[derive(Clone, Debug)]
pub struct MediaUpload {
    pub bytes: Vec<u8>,
    pub media_type: String,
    pub file_name: String,
}

/// Messaging platform port.
///
/// Media goes out in two phases: `upload_media` returns a handle, and only
/// then does `send_document` reference it. Every call is a single attempt;
/// implementations must not retry, since a retried send can deliver twice.
#[async_trait]
pub trait OutboundPort: Send + Sync {
    async fn upload_media(&self, media: MediaUpload) -> Result<MediaHandle>;

    async fn send_text(&self, recipient: &UserId, text: &str) -> Result<()>;

    async fn send_document(
        &self,
        recipient: &UserId,
        handle: &MediaHandle,
        caption: &str,
        file_name: &str,
    ) -> Result<()>;
}
