use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{info, warn};

fn binary_name() -> &'static str {
    if cfg!(windows) {
        "ffmpeg.exe"
    } else {
        "ffmpeg"
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Finds ffmpeg in the project-local `bin_dir` first, then on PATH.
pub fn locate_ffmpeg(bin_dir: &Path) -> Option<PathBuf> {
    let local = bin_dir.join(binary_name());
    if is_executable(&local) {
        return Some(local);
    }

    which::which("ffmpeg").ok()
}

/// Logs whether ffmpeg is reachable; never fails.
pub async fn check_ffmpeg(ffmpeg: Option<&Path>) -> bool {
    let Some(path) = ffmpeg else {
        warn!("⚠️  FFmpeg NOT FOUND. Merging and audio conversion will fail.");
        return false;
    };

    match Command::new(path).arg("-version").output().await {
        Ok(output) if output.status.success() => {
            let version_line = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .unwrap_or("unknown")
                .to_string();
            info!("✅ ffmpeg detected at {}: {}", path.display(), version_line);
            true
        }
        Ok(_) => {
            warn!("❌ ffmpeg at {} failed to run", path.display());
            false
        }
        Err(e) => {
            warn!("❌ ffmpeg at {} not runnable: {}", path.display(), e);
            false
        }
    }
}
