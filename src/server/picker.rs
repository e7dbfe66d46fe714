use crate::media::DEFAULT_PATH;
use axum::Json;
use serde::Serialize;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize, PartialEq)]
pub struct ChosenPath {
    pub path: String,
}

/// Native directory dialogs, in order of preference.
const DIALOGS: &[(&str, &[&str])] = &[
    (
        "zenity",
        &[
            "--file-selection",
            "--directory",
            "--title=Select Download Folder",
        ],
    ),
    ("kdialog", &["--getexistingdirectory", "--title", "Select Download Folder"]),
];

fn find_dialog() -> Option<(PathBuf, &'static [&'static str])> {
    DIALOGS
        .iter()
        .find_map(|(name, args)| which::which(name).ok().map(|path| (path, *args)))
}

fn normalize(raw: &str) -> Option<String> {
    let path = raw.trim();
    if path.is_empty() {
        return None;
    }
    Some(path.replace('\\', "/"))
}

async fn pick_directory() -> Option<String> {
    let Some((program, args)) = find_dialog() else {
        debug!("No native directory dialog available");
        return None;
    };

    match Command::new(&program).args(args).output().await {
        Ok(output) if output.status.success() => {
            normalize(&String::from_utf8_lossy(&output.stdout))
        }
        Ok(output) => {
            debug!("Directory dialog closed with {}", output.status);
            None
        }
        Err(e) => {
            warn!("Failed to open {}: {}", program.display(), e);
            None
        }
    }
}

/// `GET /api/choose-path`: asks the user for a folder, or answers `Default`.
pub async fn choose_path() -> Json<ChosenPath> {
    let path = match pick_directory().await {
        Some(path) => {
            info!("Folder selected: {}", path);
            path
        }
        None => DEFAULT_PATH.to_string(),
    };
    Json(ChosenPath { path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/home/me/Videos\n"), Some("/home/me/Videos".to_string()));
        assert_eq!(
            normalize("C:\\Users\\me\\Videos"),
            Some("C:/Users/me/Videos".to_string())
        );
        assert_eq!(normalize("  \n"), None);
    }

    #[test]
    fn test_chosen_path_serialization() {
        let json = serde_json::to_value(ChosenPath {
            path: DEFAULT_PATH.to_string(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"path": "Default"}));
    }
}
