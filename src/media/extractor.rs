use super::types::{DownloadJob, DownloadedFile, ProgressEvent, RawInfo};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

/// Every failure coming back from the external extractor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExtractionError {
    pub message: String,
}

impl ExtractionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Human-readable name of the extractor
    fn name(&self) -> &'static str;

    /// Resolve metadata and available formats without downloading
    async fn extract_info(&self, url: &str) -> Result<RawInfo, ExtractionError>;

    /// Download according to `job`, reporting progress on `progress`.
    /// The sender is dropped once the job ends.
    async fn download(
        &self,
        job: &DownloadJob,
        progress: UnboundedSender<ProgressEvent>,
    ) -> Result<DownloadedFile, ExtractionError>;

    /// Test if the extractor is usable on this system
    async fn check_availability(&self) -> bool;
}
