use super::{
    extractor::{ExtractionError, Extractor},
    types::{
        DownloadJob, DownloadedFile, FormatSelection, ProgressEvent, AUDIO_CODEC, BEST_AUDIO,
        DEFAULT_PATH,
    },
};
use crate::tasks::{TaskId, TaskRegistry, TaskState, TaskStatus};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub format_id: String,
    pub download_path: String,
}

/// Runs downloads in the background and reports through the [`TaskRegistry`].
pub struct DownloadManager {
    extractor: Arc<dyn Extractor>,
    registry: Arc<TaskRegistry>,
    default_dir: PathBuf,
    transcoder_available: bool,
}

impl DownloadManager {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        registry: Arc<TaskRegistry>,
        default_dir: PathBuf,
        transcoder_available: bool,
    ) -> Self {
        Self {
            extractor,
            registry,
            default_dir,
            transcoder_available,
        }
    }

    /// Registers a new task and spawns its worker. Cancellation is not supported.
    pub fn start(self: &Arc<Self>, request: DownloadRequest) -> TaskId {
        let task_id = TaskId::new();
        self.registry.insert(task_id, TaskStatus::starting());

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.run(task_id, request).await;
        });

        task_id
    }

    /// Performs the download and writes exactly one terminal record.
    pub async fn run(&self, task_id: TaskId, request: DownloadRequest) {
        if self.registry.get(task_id).is_none() {
            self.registry.insert(task_id, TaskStatus::starting());
        }
        info!(
            "Task {}: downloading {} (format {})",
            task_id, request.url, request.format_id
        );

        let status = match self.execute(task_id, &request).await {
            Ok(status) => {
                info!("Task {}: {}", task_id, status.message);
                status
            }
            Err(e) => {
                error!("Task {} failed: {:#}", task_id, e);
                TaskStatus::error(format!("{e:#}"))
            }
        };

        self.registry.finish(task_id, status);
    }

    async fn execute(&self, task_id: TaskId, request: &DownloadRequest) -> Result<TaskStatus> {
        let dir = resolve_download_dir(&request.download_path, &self.default_dir).await?;
        let output_template = dir.join(OUTPUT_TEMPLATE).display().to_string();
        let job = |selection| DownloadJob {
            url: request.url.clone(),
            selection,
            output_template: output_template.clone(),
        };

        if request.format_id == BEST_AUDIO {
            if !self.transcoder_available {
                anyhow::bail!(
                    "FFmpeg was not found; it is required to convert audio to {AUDIO_CODEC}"
                );
            }
            let file = self.attempt(task_id, job(FormatSelection::BestAudio)).await?;
            return Ok(completed_status(&file, Some(AUDIO_CODEC), false));
        }

        let merged = job(FormatSelection::Merged(request.format_id.clone()));
        match self.attempt(task_id, merged).await {
            Ok(file) => Ok(completed_status(&file, None, false)),
            Err(e) => {
                warn!("Task {}: merge failed, trying direct download: {}", task_id, e);
                let direct = job(FormatSelection::Direct(request.format_id.clone()));
                let file = self.attempt(task_id, direct).await?;
                Ok(completed_status(&file, None, true))
            }
        }
    }

    /// One extractor call, with its progress applied to the registry as it arrives.
    async fn attempt(
        &self,
        task_id: TaskId,
        job: DownloadJob,
    ) -> Result<DownloadedFile, ExtractionError> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let download = self.extractor.download(&job, tx);
        let forward = async {
            let mut finished = false;
            while let Some(event) = rx.recv().await {
                let is_finish = matches!(event, ProgressEvent::Finished);
                apply_progress(&self.registry, task_id, event, finished);
                finished |= is_finish;
            }
        };

        // The forwarder ends once the extractor drops its sender, so every
        // progress write lands before the terminal one.
        let (result, ()) = tokio::join!(download, forward);
        result
    }
}

/// Applies one progress event. `attempt_finished` is whether the current attempt already
/// reported its raw download as finished.
///
/// The state never moves back from `converting`. Downloads reported after this attempt's
/// own finish (the audio half of a merge) are dropped; downloads of a retry that follows
/// an earlier attempt's finish only refresh the message.
fn apply_progress(
    registry: &TaskRegistry,
    task_id: TaskId,
    event: ProgressEvent,
    attempt_finished: bool,
) {
    registry.update(task_id, |status| match event {
        ProgressEvent::Downloading { percent, filename } => {
            if status.state == TaskState::Converting {
                if attempt_finished {
                    return;
                }
                status.message = format!("Retrying: {percent}");
            } else {
                status.state = TaskState::Processing;
                status.message = format!("Downloading: {percent}");
            }
            if let Some(name) = filename.as_deref().and_then(display_name) {
                status.filename = Some(name);
            }
        }
        ProgressEvent::Finished => {
            status.state = TaskState::Converting;
            status.message = "Download complete. Processing/Converting...".to_string();
        }
    });
}

fn display_name(path: &str) -> Option<String> {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

fn completed_status(file: &DownloadedFile, force_ext: Option<&str>, degraded: bool) -> TaskStatus {
    let path = file.path.as_ref().map(|p| match force_ext {
        Some(ext) => p.with_extension(ext),
        None => p.clone(),
    });
    let filename = path
        .as_ref()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());

    TaskStatus {
        state: TaskState::Completed,
        message: if degraded { "Done (Direct)" } else { "Done!" }.to_string(),
        filename: Some(filename),
        file_path: path.map(|p| p.display().to_string()),
        degraded,
    }
}

/// Uses `requested` when it names an existing directory, else `default_dir` (created if missing).
pub async fn resolve_download_dir(requested: &str, default_dir: &Path) -> Result<PathBuf> {
    if requested != DEFAULT_PATH && !requested.trim().is_empty() {
        let path = Path::new(requested);
        if path.is_dir() {
            return Ok(path.to_path_buf());
        }
        warn!(
            "Download path {} does not exist, using {}",
            requested,
            default_dir.display()
        );
    }

    tokio::fs::create_dir_all(default_dir)
        .await
        .with_context(|| format!("Failed to create {}", default_dir.display()))?;
    Ok(default_dir.to_path_buf())
}
