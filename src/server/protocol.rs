use crate::media::{MediaInfo, DEFAULT_PATH};
use crate::tasks::TaskStatus;
use serde::{Deserialize, Serialize};

/// One inbound frame from the browser.
#[derive(Debug, Default, Deserialize)]
pub struct ClientRequest {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub format_id: Option<String>,
    #[serde(default)]
    pub download_path: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    FetchInfo,
    Download,
}

impl ClientRequest {
    /// A missing action means `download`, as older clients never sent one.
    pub fn action(&self) -> Result<Action, String> {
        match self.action.as_deref() {
            Some("fetch_info") => Ok(Action::FetchInfo),
            None | Some("download") => Ok(Action::Download),
            Some(other) => Err(format!("Unknown action: {other}")),
        }
    }

    pub fn format_id(&self) -> String {
        self.format_id
            .clone()
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| "best".to_string())
    }

    pub fn download_path(&self) -> String {
        self.download_path
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PATH.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedReply {
    pub status: ReplyStatus,
    #[serde(flatten)]
    pub info: MediaInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedReply {
    pub status: ReplyStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub state: &'static str,
    pub message: String,
}

/// One outbound frame to the browser.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Progress(TaskStatus),
    Notice(Notice),
    Resolved(ResolvedReply),
    Failed(FailedReply),
}

impl ServerMessage {
    pub fn fetching() -> Self {
        ServerMessage::Notice(Notice {
            state: "fetching",
            message: "Analyzing URL...".to_string(),
        })
    }

    pub fn resolved(info: MediaInfo) -> Self {
        ServerMessage::Resolved(ResolvedReply {
            status: ReplyStatus::Success,
            info,
        })
    }

    pub fn failed(message: impl Into<String>) -> Self {
        ServerMessage::Failed(FailedReply {
            status: ReplyStatus::Error,
            message: message.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskState;

    #[test]
    fn test_parse_requests() {
        let req: ClientRequest =
            serde_json::from_str(r#"{"action":"fetch_info","url":"https://a.b/c"}"#).unwrap();
        assert_eq!(req.action(), Ok(Action::FetchInfo));
        assert_eq!(req.url.as_deref(), Some("https://a.b/c"));

        let req: ClientRequest = serde_json::from_str(r#"{"url":"https://a.b/c"}"#).unwrap();
        assert_eq!(req.action(), Ok(Action::Download));
        assert_eq!(req.format_id(), "best");
        assert_eq!(req.download_path(), "Default");

        let req: ClientRequest = serde_json::from_str(
            r#"{"action":"download","url":"u","format_id":"best_audio","download_path":"/tmp"}"#,
        )
        .unwrap();
        assert_eq!(req.format_id(), "best_audio");
        assert_eq!(req.download_path(), "/tmp");

        let req: ClientRequest = serde_json::from_str(r#"{"action":"cancel"}"#).unwrap();
        assert!(req.action().is_err());
    }

    #[test]
    fn test_serialize_messages() {
        assert_eq!(
            serde_json::to_value(ServerMessage::fetching()).unwrap(),
            serde_json::json!({"state": "fetching", "message": "Analyzing URL..."})
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::failed("nope")).unwrap(),
            serde_json::json!({"status": "error", "message": "nope"})
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::Progress(TaskStatus::new(
                TaskState::Processing,
                "Downloading: 5%"
            )))
            .unwrap(),
            serde_json::json!({"state": "processing", "message": "Downloading: 5%"})
        );
    }

    #[test]
    fn test_serialize_resolved() {
        let info = MediaInfo {
            id: "abc".to_string(),
            title: "T".to_string(),
            thumbnail: String::new(),
            duration: "1:00".to_string(),
            author: "A".to_string(),
            formats: Default::default(),
        };
        let json = serde_json::to_value(ServerMessage::resolved(info)).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["id"], "abc");
        assert_eq!(json["formats"]["video"], serde_json::json!([]));
        assert_eq!(json["formats"]["audio"], serde_json::json!([]));
    }
}
