use super::{
    extractor::{ExtractionError, Extractor},
    types::{
        DownloadJob, DownloadedFile, FormatSelection, ProgressEvent, RawInfo, AUDIO_BITRATE,
        AUDIO_CODEC, MERGE_CONTAINER,
    },
};
use crate::utils::strip_ansi;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

const PROGRESS_PREFIX: &str = "progress:";
const FILEPATH_PREFIX: &str = "filepath:";
const PROGRESS_TEMPLATE: &str =
    "download:progress:%(progress.status)s|%(progress._percent_str)s|%(progress.filename)s";
const FILEPATH_PRINT: &str = "after_move:filepath:%(filepath)s";

/// Warnings yt-dlp emits for nearly every YouTube URL; they carry no signal.
const IGNORED_WARNINGS: &[&str] = &["PO Token", "JavaScript runtime", "SABR", "missing a url"];

const POSTPROCESSOR_TAGS: &[&str] = &["[Merger]", "[ExtractAudio]", "[VideoConvertor]"];

pub struct YtDlp {
    binary: String,
    ffmpeg: Option<PathBuf>,
    fetch_timeout: Duration,
}

impl YtDlp {
    pub fn new(
        binary: impl Into<String>,
        ffmpeg: Option<PathBuf>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            binary: binary.into(),
            ffmpeg,
            fetch_timeout,
        }
    }

    fn common_args(&self) -> Vec<String> {
        let mut args = vec!["--no-playlist".to_string()];
        if let Some(ffmpeg) = &self.ffmpeg {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.display().to_string());
        }
        args
    }

    fn download_args(&self, job: &DownloadJob) -> Vec<String> {
        let mut args = self.common_args();
        args.extend([
            "--format".to_string(),
            job.selection.selector(),
            "--output".to_string(),
            job.output_template.clone(),
            "--force-overwrites".to_string(),
            "--newline".to_string(),
            "--progress".to_string(),
            "--progress-template".to_string(),
            PROGRESS_TEMPLATE.to_string(),
            "--print".to_string(),
            FILEPATH_PRINT.to_string(),
            "--no-simulate".to_string(),
        ]);

        match &job.selection {
            FormatSelection::BestAudio => {
                args.extend([
                    "--extract-audio".to_string(),
                    "--audio-format".to_string(),
                    AUDIO_CODEC.to_string(),
                    "--audio-quality".to_string(),
                    AUDIO_BITRATE.to_string(),
                ]);
            }
            FormatSelection::Merged(_) => {
                args.push("--merge-output-format".to_string());
                args.push(MERGE_CONTAINER.to_string());
            }
            FormatSelection::Direct(_) => {}
        }

        args.push("--".to_string());
        args.push(job.url.clone());
        args
    }
}

#[derive(Debug, PartialEq)]
enum OutputLine {
    Progress(ProgressEvent),
    FilePath(PathBuf),
}

fn parse_output_line(line: &str) -> Option<OutputLine> {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix(FILEPATH_PREFIX) {
        let path = rest.trim();
        if path.is_empty() {
            return None;
        }
        return Some(OutputLine::FilePath(PathBuf::from(path)));
    }

    if let Some(rest) = line.strip_prefix(PROGRESS_PREFIX) {
        let mut parts = rest.splitn(3, '|');
        let status = parts.next()?.trim();
        let percent = strip_ansi(parts.next().unwrap_or_default()).trim().to_string();
        let filename = parts
            .next()
            .map(str::trim)
            .filter(|f| !f.is_empty() && *f != "NA")
            .map(str::to_string);

        return match status {
            "downloading" => Some(OutputLine::Progress(ProgressEvent::Downloading {
                percent: if percent.is_empty() || percent == "NA" {
                    "0%".to_string()
                } else {
                    percent
                },
                filename,
            })),
            "finished" => Some(OutputLine::Progress(ProgressEvent::Finished)),
            _ => None,
        };
    }

    if POSTPROCESSOR_TAGS.iter().any(|tag| line.starts_with(tag)) {
        return Some(OutputLine::Progress(ProgressEvent::Finished));
    }

    None
}

fn is_ignored_warning(line: &str) -> bool {
    IGNORED_WARNINGS.iter().any(|k| line.contains(k))
}

/// Logs one stderr line; returns the error text when the line is an error.
fn log_stderr_line(line: &str) -> Option<String> {
    if let Some(message) = line.strip_prefix("ERROR:") {
        error!("yt-dlp: {}", message.trim());
        return Some(message.trim().to_string());
    }
    if let Some(message) = line.strip_prefix("WARNING:") {
        if !is_ignored_warning(message) {
            warn!("yt-dlp: {}", message.trim());
        }
        return None;
    }
    if !line.trim().is_empty() {
        debug!("yt-dlp: {}", line);
    }
    None
}

/// Picks the most useful failure text from yt-dlp's stderr.
fn failure_message(stderr: &str) -> Option<String> {
    let mut last_error = None;
    let mut last_line = None;

    for line in stderr.lines() {
        if let Some(message) = log_stderr_line(line) {
            last_error = Some(message);
        }
        if !line.trim().is_empty() {
            last_line = Some(line.trim().to_string());
        }
    }

    last_error.or(last_line)
}

/// Reads one line, replacing invalid UTF-8. `None` at end of stream or on a read error.
async fn next_lossy_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    match reader.read_until(b'\n', buf).await {
        Ok(0) => None,
        Ok(_) => {
            let line = String::from_utf8_lossy(buf);
            Some(line.trim_end_matches(['\n', '\r']).to_string())
        }
        Err(e) => {
            warn!("Failed to read yt-dlp output: {}", e);
            None
        }
    }
}

/// Drains stdout, forwarding progress. Returns the final path if yt-dlp printed one.
async fn read_output<R>(stdout: R, progress: UnboundedSender<ProgressEvent>) -> Option<PathBuf>
where
    R: AsyncRead + Unpin,
{
    let mut final_path = None;
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    while let Some(line) = next_lossy_line(&mut reader, &mut buf).await {
        match parse_output_line(&line) {
            Some(OutputLine::Progress(event)) => {
                // Receiver gone means nobody is watching; keep draining.
                let _ = progress.send(event);
            }
            Some(OutputLine::FilePath(path)) => final_path = Some(path),
            None => debug!("yt-dlp: {}", line),
        }
    }
    final_path
}

async fn collect_stderr<R>(stderr: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut buffer = String::new();
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    while let Some(line) = next_lossy_line(&mut reader, &mut buf).await {
        buffer.push_str(&line);
        buffer.push('\n');
    }
    buffer
}

#[async_trait]
impl Extractor for YtDlp {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn extract_info(&self, url: &str) -> Result<RawInfo, ExtractionError> {
        debug!("Extracting metadata with yt-dlp for: {}", url);

        let output = tokio::time::timeout(
            self.fetch_timeout,
            Command::new(&self.binary)
                .args(self.common_args())
                .arg("--dump-single-json")
                .arg("--no-warnings")
                .arg("--")
                .arg(url)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ExtractionError::new("Media metadata extraction timed out"))?
        .map_err(|e| ExtractionError::new(format!("Failed to run yt-dlp: {e}")))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let failure = failure_message(&stderr);

        if !output.status.success() {
            return Err(ExtractionError::new(failure.unwrap_or_else(|| {
                format!("Media metadata extraction failed ({})", output.status)
            })));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| ExtractionError::new(format!("Failed to parse media metadata: {e}")))
    }

    async fn download(
        &self,
        job: &DownloadJob,
        progress: UnboundedSender<ProgressEvent>,
    ) -> Result<DownloadedFile, ExtractionError> {
        info!(
            "Downloading with yt-dlp: {} (format {})",
            job.url,
            job.selection.selector()
        );

        let mut child = Command::new(&self.binary)
            .args(self.download_args(job))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExtractionError::new(format!("Failed to start yt-dlp: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractionError::new("Failed to get yt-dlp stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExtractionError::new("Failed to get yt-dlp stderr"))?;

        let stdout_task = tokio::spawn(read_output(stdout, progress));
        let stderr_task = tokio::spawn(collect_stderr(stderr));

        let status = child
            .wait()
            .await
            .map_err(|e| ExtractionError::new(format!("yt-dlp process failed: {e}")))?;

        let path = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let failure = failure_message(&stderr);

        if !status.success() {
            return Err(ExtractionError::new(
                failure.unwrap_or_else(|| format!("yt-dlp exited with {status}")),
            ));
        }

        Ok(DownloadedFile { path })
    }

    async fn check_availability(&self) -> bool {
        match Command::new(&self.binary).arg("--version").output().await {
            Ok(output) => {
                if output.status.success() {
                    let version = String::from_utf8_lossy(&output.stdout);
                    info!("✅ yt-dlp is available, version: {}", version.trim());
                    true
                } else {
                    warn!("❌ yt-dlp command failed");
                    false
                }
            }
            Err(e) => {
                warn!("❌ yt-dlp not found: {}", e);
                false
            }
        }
    }
}
