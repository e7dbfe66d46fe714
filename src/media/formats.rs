use super::{
    extractor::{ExtractionError, Extractor},
    types::{FormatDescriptor, FormatLists, MediaInfo, RawFormat, RawInfo},
};
use crate::utils::{format_duration, format_size};
use std::cmp::Reverse;
use std::collections::HashMap;
use tracing::{debug, info};

/// Video streams shorter than this are storyboard/thumbnail noise.
const MIN_VIDEO_HEIGHT: u32 = 144;

fn is_codec(codec: Option<&str>) -> bool {
    matches!(codec, Some(c) if !c.is_empty() && c != "none")
}

fn is_audio_only(format: &RawFormat) -> bool {
    format.vcodec.as_deref() == Some("none") && is_codec(format.acodec.as_deref())
}

fn has_video(format: &RawFormat) -> bool {
    format.vcodec.as_deref() != Some("none")
}

fn audio_descriptor(format: &RawFormat) -> FormatDescriptor {
    let size = format.size_estimate();
    let abr = format.abr.unwrap_or(0.0);
    FormatDescriptor {
        format_id: format.format_id.clone(),
        ext: format.ext.clone(),
        quality: format!("{abr:.0}kbps"),
        height: None,
        note: format.format_note.clone().unwrap_or_default(),
        size: format_size(size),
        filesize_bytes: size,
    }
}

fn video_descriptor(format: &RawFormat, height: u32) -> FormatDescriptor {
    let size = format.size_estimate();
    FormatDescriptor {
        format_id: format.format_id.clone(),
        ext: format.ext.clone(),
        quality: format!("{height}p"),
        height: Some(height),
        note: format.format_note.clone().unwrap_or_default(),
        size: format_size(size),
        filesize_bytes: size,
    }
}

/// Splits raw formats into deduplicated, sorted video and audio lists.
///
/// Video candidates are grouped by (height, container); within a group the
/// largest size estimate wins and ties keep the first one seen. Video is
/// sorted by height and audio by size, both descending and stable.
pub fn select_formats(formats: &[RawFormat]) -> FormatLists {
    let mut audio = Vec::new();
    let mut video: Vec<FormatDescriptor> = Vec::new();
    let mut groups: HashMap<(u32, String), usize> = HashMap::new();

    for format in formats {
        if is_audio_only(format) {
            audio.push(audio_descriptor(format));
        } else if has_video(format) {
            let height = format.height.unwrap_or(0);
            if height < MIN_VIDEO_HEIGHT {
                continue;
            }

            let candidate = video_descriptor(format, height);
            match groups.get(&(height, format.ext.clone())) {
                Some(&index) => {
                    if candidate.filesize_bytes > video[index].filesize_bytes {
                        video[index] = candidate;
                    }
                }
                None => {
                    groups.insert((height, format.ext.clone()), video.len());
                    video.push(candidate);
                }
            }
        }
    }

    video.sort_by_key(|f| Reverse(f.height.unwrap_or(0)));
    audio.sort_by_key(|f| Reverse(f.filesize_bytes));

    FormatLists { video, audio }
}

pub fn build_media_info(raw: RawInfo) -> MediaInfo {
    let formats = select_formats(&raw.formats);
    let duration = raw
        .duration_string
        .clone()
        .or_else(|| raw.duration.map(|d| format_duration(d as u64)))
        .unwrap_or_default();

    MediaInfo {
        id: raw.id.unwrap_or_default(),
        title: raw.title.unwrap_or_else(|| "Unknown".to_string()),
        thumbnail: raw.thumbnail.unwrap_or_default(),
        duration,
        author: raw.uploader.unwrap_or_default(),
        formats,
    }
}

/// Resolves a URL into [`MediaInfo`]; all extractor failures come back as errors.
pub async fn resolve(extractor: &dyn Extractor, url: &str) -> Result<MediaInfo, ExtractionError> {
    info!("Fetching formats for: {}", url);
    let raw = extractor.extract_info(url).await?;
    debug!(
        "{} returned {} raw formats",
        extractor.name(),
        raw.formats.len()
    );

    let info = build_media_info(raw);
    info!(
        "Resolved \"{}\": {} video, {} audio formats",
        info.title,
        info.formats.video.len(),
        info.formats.audio.len()
    );
    Ok(info)
}
