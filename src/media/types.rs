use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// Sentinel `format_id` selecting the audio-only transcode path.
pub const BEST_AUDIO: &str = "best_audio";

/// Sentinel `download_path` selecting the default download folder.
pub const DEFAULT_PATH: &str = "Default";

/// Container used when muxing a video stream with the best audio stream.
pub const MERGE_CONTAINER: &str = "mp4";

/// Codec and bitrate for audio-only downloads.
pub const AUDIO_CODEC: &str = "mp3";
pub const AUDIO_BITRATE: &str = "192K";

/// Metadata as reported by the extractor, before any filtering.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub duration_string: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub formats: Vec<RawFormat>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormat {
    pub format_id: String,
    #[serde(default)]
    pub ext: String,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub height: Option<u32>,
    #[serde(default)]
    pub abr: Option<f64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub filesize: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub filesize_approx: Option<u64>,
    #[serde(default)]
    pub format_note: Option<String>,
}

impl RawFormat {
    /// Exact size when known, the approximate one otherwise, 0 when neither is.
    pub fn size_estimate(&self) -> u64 {
        self.filesize
            .filter(|&size| size > 0)
            .or(self.filesize_approx)
            .unwrap_or(0)
    }
}

// Extractors sometimes report these counts as floats.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.filter(|v| v.is_finite() && *v >= 0.0))
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_number(deserializer)?.map(|v| v as u64))
}

fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_number(deserializer)?.map(|v| v.min(u32::MAX as f64) as u32))
}

/// One selectable stream offered to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatDescriptor {
    pub format_id: String,
    pub ext: String,
    pub quality: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub note: String,
    pub size: String,
    pub filesize_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FormatLists {
    pub video: Vec<FormatDescriptor>,
    pub audio: Vec<FormatDescriptor>,
}

/// Resolved metadata for a URL, computed fresh on every request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaInfo {
    pub id: String,
    pub title: String,
    pub thumbnail: String,
    pub duration: String,
    pub author: String,
    pub formats: FormatLists,
}

/// What the worker asks the extractor to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatSelection {
    /// Best audio stream, transcoded to [`AUDIO_CODEC`].
    BestAudio,
    /// The given format muxed with the best audio stream.
    Merged(String),
    /// The given format alone, no merge.
    Direct(String),
}

impl FormatSelection {
    pub fn selector(&self) -> String {
        match self {
            FormatSelection::BestAudio => "bestaudio/best".to_string(),
            FormatSelection::Merged(id) => format!("{id}+bestaudio"),
            FormatSelection::Direct(id) => id.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub url: String,
    pub selection: FormatSelection,
    /// Output template, e.g. `/home/me/Downloads/%(title)s.%(ext)s`.
    pub output_template: String,
}

/// Incremental progress reported by the extractor while a job runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Downloading {
        percent: String,
        filename: Option<String>,
    },
    Finished,
}

#[derive(Debug, Clone, Default)]
pub struct DownloadedFile {
    /// Final on-disk path, when the extractor reported one.
    pub path: Option<PathBuf>,
}
