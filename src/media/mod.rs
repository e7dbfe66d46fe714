mod extractor;
mod ffmpeg;
mod formats;
mod types;
mod worker;
mod ytdlp;

pub use extractor::Extractor;
pub use ffmpeg::locate_ffmpeg;
use ffmpeg::check_ffmpeg;
pub use formats::resolve;
pub use types::{MediaInfo, DEFAULT_PATH};
pub use worker::{DownloadManager, DownloadRequest};
pub use ytdlp::YtDlp;

#[cfg(test)]
pub(crate) use extractor::ExtractionError;
#[cfg(test)]
pub(crate) use types::{RawFormat, RawInfo};
#[cfg(test)]
pub(crate) use worker::testing;

use std::path::Path;
use tracing::{info, warn};

/// Logs which external tools are usable. Never fails: a missing tool only
/// disables the features that need it.
pub async fn check_setup(extractor: &dyn Extractor, ffmpeg: Option<&Path>) {
    info!("Testing media tool setup...");

    let extractor_available = extractor.check_availability().await;
    let ffmpeg_available = check_ffmpeg(ffmpeg).await;

    if !extractor_available {
        warn!(
            "❌ {} is not available; fetching formats and downloads will fail",
            extractor.name()
        );
    } else if !ffmpeg_available {
        warn!(
            "⚠️  {} will work but merging and audio conversion are disabled",
            extractor.name()
        );
    } else {
        info!("✅ All media tools are available");
    }
}
