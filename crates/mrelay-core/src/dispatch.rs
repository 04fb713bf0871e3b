//! Quota-gated outbound delivery.

use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};

use crate::{
    assemble::Artifact,
    domain::UserId,
    messaging::{MediaUpload, OutboundPort},
    store::{quota::format_wait, QuotaTracker},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// Refused before any upload; nothing was sent or recorded.
    QuotaExhausted { resets_in: Option<Duration> },
    /// A platform call (or reading the artifact) failed; no quota consumed.
    Failed(String),
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, DispatchOutcome::Sent)
    }

    /// Human-readable detail for status messages.
    pub fn detail(&self) -> String {
        match self {
            DispatchOutcome::Sent => "Success".to_string(),
            DispatchOutcome::QuotaExhausted { resets_in: Some(d) } => {
                format!("Media message limit reached, resets in {}", format_wait(*d))
            }
            DispatchOutcome::QuotaExhausted { resets_in: None } => {
                "Media message limit reached".to_string()
            }
            DispatchOutcome::Failed(detail) => detail.clone(),
        }
    }
}

pub struct Dispatcher {
    port: Arc<dyn OutboundPort>,
    quota: QuotaTracker,
}

impl Dispatcher {
    pub fn new(port: Arc<dyn OutboundPort>, quota: QuotaTracker) -> Self {
        Self { port, quota }
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    /// Text is never quota-gated. Failures are logged and reported as `false`.
    pub async fn send_text(&self, to: &UserId, text: &str) -> bool {
        match self.port.send_text(to, text).await {
            Ok(()) => true,
            Err(e) => {
                warn!(user = %to, error = %e, "text message failed");
                false
            }
        }
    }

    /// Upload the artifact, then send a document message referencing the
    /// returned handle. Quota is checked before the upload and consumed only
    /// after the send succeeded.
    pub async fn send_artifact(&self, to: &UserId, artifact: &Artifact) -> DispatchOutcome {
        match self.quota.remaining(to).await {
            Ok(0) => {
                let resets_in = self.quota.resets_in(to).await.ok().flatten();
                return DispatchOutcome::QuotaExhausted { resets_in };
            }
            Ok(_) => {}
            Err(e) => return DispatchOutcome::Failed(format!("quota check failed: {e}")),
        }

        let bytes = match tokio::fs::read(&artifact.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return DispatchOutcome::Failed(format!(
                    "could not read {}: {e}",
                    artifact.file_name
                ))
            }
        };

        let upload = MediaUpload {
            bytes,
            media_type: artifact.media_type.clone(),
            file_name: artifact.file_name.clone(),
        };
        let handle = match self.port.upload_media(upload).await {
            Ok(h) if !h.0.trim().is_empty() => h,
            Ok(_) => return DispatchOutcome::Failed("upload returned no media id".to_string()),
            Err(e) => return DispatchOutcome::Failed(format!("upload failed: {e}")),
        };
        debug!(user = %to, file = %artifact.file_name, handle = %handle.0, "media uploaded");

        if let Err(e) = self
            .port
            .send_document(to, &handle, &artifact.caption, &artifact.file_name)
            .await
        {
            return DispatchOutcome::Failed(format!("send failed: {e}"));
        }

        match self.quota.try_consume(to).await {
            Ok(true) => {}
            // Another run for the same user filled the window between our
            // guard and this send.
            Ok(false) => warn!(user = %to, "media sent after quota was reached concurrently"),
            Err(e) => warn!(user = %to, error = %e, "failed to record media send"),
        }
        DispatchOutcome::Sent
    }
}
