use super::{
    protocol::{Action, ClientRequest, ServerMessage},
    relay::relay,
    AppState,
};
use crate::media::{self, DownloadRequest};
use crate::tasks::TaskStatus;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

const OUTBOUND_CAPACITY: usize = 64;

/// Drives one browser connection until it closes.
pub async fn run_session(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (outbound, mut queue) = mpsc::channel::<ServerMessage>(OUTBOUND_CAPACITY);

    // Single writer so resolver replies and every relay can share the socket.
    let writer = tokio::spawn(async move {
        while let Some(message) = queue.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode outbound message: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    info!("Client connected");

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_message(&state, text.as_str(), &outbound).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    info!("Client disconnected");

    // Relays still hold senders; once they notice the closed socket the writer ends too.
    drop(outbound);
    drop(writer);
}

/// Handles one inbound frame. Every failure becomes a message on `outbound`.
pub async fn handle_message(
    state: &AppState,
    text: &str,
    outbound: &mpsc::Sender<ServerMessage>,
) {
    let request: ClientRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            send(outbound, ServerMessage::failed(format!("Invalid request: {e}"))).await;
            return;
        }
    };

    match request.action() {
        Ok(Action::FetchInfo) => fetch_info(state, &request, outbound).await,
        Ok(Action::Download) => start_download(state, &request, outbound).await,
        Err(message) => send(outbound, ServerMessage::failed(message)).await,
    }
}

async fn fetch_info(
    state: &AppState,
    request: &ClientRequest,
    outbound: &mpsc::Sender<ServerMessage>,
) {
    send(outbound, ServerMessage::fetching()).await;

    let url = match validate_url(request.url.as_deref()) {
        Ok(url) => url,
        Err(message) => {
            send(outbound, ServerMessage::failed(message)).await;
            return;
        }
    };

    let reply = match media::resolve(state.extractor.as_ref(), &url).await {
        Ok(info) => ServerMessage::resolved(info),
        Err(e) => {
            warn!("Failed to fetch formats for {}: {}", url, e);
            ServerMessage::failed(e.message)
        }
    };
    send(outbound, reply).await;
}

async fn start_download(
    state: &AppState,
    request: &ClientRequest,
    outbound: &mpsc::Sender<ServerMessage>,
) {
    let url = match validate_url(request.url.as_deref()) {
        Ok(url) => url,
        Err(message) => {
            send(outbound, ServerMessage::Progress(TaskStatus::error(message))).await;
            return;
        }
    };

    let task_id = state.downloads.start(DownloadRequest {
        url,
        format_id: request.format_id(),
        download_path: request.download_path(),
    });
    info!("Started task {}", task_id);

    let registry = state.registry.clone();
    let outbound = outbound.clone();
    let every = state.poll_interval;
    tokio::spawn(async move {
        let outcome = relay(&registry, task_id, &outbound, every).await;
        debug!("Relay for task {} ended: {:?}", task_id, outcome);
    });
}

async fn send(outbound: &mpsc::Sender<ServerMessage>, message: ServerMessage) {
    if outbound.send(message).await.is_err() {
        debug!("Dropping reply for a closed connection");
    }
}

fn validate_url(url: Option<&str>) -> Result<String, String> {
    let url = url.map(str::trim).unwrap_or_default();
    if url.is_empty() {
        return Err("No URL provided".to_string());
    }

    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(url.to_string()),
        Ok(parsed) => Err(format!("Unsupported URL scheme: {}", parsed.scheme())),
        Err(e) => Err(format!("Invalid URL: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::testing::{FakeExtractor, ScriptedDownload};
    use crate::media::{DownloadManager, ExtractionError, RawFormat, RawInfo};
    use crate::tasks::{TaskRegistry, TaskState};
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    fn state(extractor: FakeExtractor, default_dir: &Path) -> AppState {
        let extractor = Arc::new(extractor);
        let registry = Arc::new(TaskRegistry::new());
        let downloads = Arc::new(DownloadManager::new(
            extractor.clone(),
            registry.clone(),
            default_dir.to_path_buf(),
            true,
        ));
        AppState {
            extractor,
            registry,
            downloads,
            poll_interval: Duration::from_millis(10),
        }
    }

    async fn next(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("channel closed")
    }

    #[test]
    fn test_validate_url() {
        assert_eq!(
            validate_url(Some(" https://youtu.be/abc ")),
            Ok("https://youtu.be/abc".to_string())
        );
        assert_eq!(validate_url(None), Err("No URL provided".to_string()));
        assert_eq!(validate_url(Some("  ")), Err("No URL provided".to_string()));
        assert!(validate_url(Some("ftp://host/file")).is_err());
        assert!(validate_url(Some("not a url")).is_err());
    }

    #[tokio::test]
    async fn test_fetch_info_replies_with_formats() {
        let dir = tempfile::tempdir().unwrap();
        let info = RawInfo {
            id: Some("abc".to_string()),
            title: Some("Clip".to_string()),
            formats: vec![RawFormat {
                format_id: "22".to_string(),
                ext: "mp4".to_string(),
                vcodec: Some("avc1".to_string()),
                height: Some(720),
                ..Default::default()
            }],
            ..Default::default()
        };
        let state = state(FakeExtractor::with_info(Ok(info)), dir.path());
        let (tx, mut rx) = mpsc::channel(8);

        handle_message(
            &state,
            r#"{"action":"fetch_info","url":"https://example.com/v"}"#,
            &tx,
        )
        .await;

        assert_eq!(next(&mut rx).await, ServerMessage::fetching());
        match next(&mut rx).await {
            ServerMessage::Resolved(reply) => {
                assert_eq!(reply.info.title, "Clip");
                assert_eq!(reply.info.formats.video.len(), 1);
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_info_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(
            FakeExtractor::with_info(Err(ExtractionError::new("Unsupported URL"))),
            dir.path(),
        );
        let (tx, mut rx) = mpsc::channel(8);

        handle_message(
            &state,
            r#"{"action":"fetch_info","url":"https://example.com/v"}"#,
            &tx,
        )
        .await;

        assert_eq!(next(&mut rx).await, ServerMessage::fetching());
        assert_eq!(
            next(&mut rx).await,
            ServerMessage::failed("Unsupported URL")
        );
    }

    #[tokio::test]
    async fn test_fetch_info_without_url() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(FakeExtractor::default(), dir.path());
        let (tx, mut rx) = mpsc::channel(8);

        handle_message(&state, r#"{"action":"fetch_info"}"#, &tx).await;

        assert_eq!(next(&mut rx).await, ServerMessage::fetching());
        assert_eq!(
            next(&mut rx).await,
            ServerMessage::failed("No URL provided")
        );
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_session() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(FakeExtractor::default(), dir.path());
        let (tx, mut rx) = mpsc::channel(8);

        handle_message(&state, "{not json", &tx).await;
        handle_message(&state, r#"{"action":"cancel"}"#, &tx).await;

        match next(&mut rx).await {
            ServerMessage::Failed(reply) => assert!(reply.message.starts_with("Invalid request")),
            other => panic!("unexpected reply {other:?}"),
        }
        assert_eq!(
            next(&mut rx).await,
            ServerMessage::failed("Unknown action: cancel")
        );
    }

    #[tokio::test]
    async fn test_download_streams_progress_until_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = FakeExtractor::with_downloads(vec![ScriptedDownload::ok(
            "/tmp/out/Clip.mp4",
        )]);
        let state = state(extractor, dir.path());
        let (tx, mut rx) = mpsc::channel(8);

        handle_message(
            &state,
            r#"{"action":"download","url":"https://example.com/v","format_id":"22","download_path":"Default"}"#,
            &tx,
        )
        .await;

        let mut terminal = Vec::new();
        loop {
            match next(&mut rx).await {
                ServerMessage::Progress(status) if status.is_terminal() => {
                    terminal.push(status);
                    break;
                }
                ServerMessage::Progress(_) => {}
                other => panic!("unexpected message {other:?}"),
            }
        }

        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].state, TaskState::Completed);
        assert_eq!(terminal[0].filename.as_deref(), Some("Clip.mp4"));

        // The relay reclaims the entry right after sending the terminal record.
        for _ in 0..50 {
            if state.registry.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(state.registry.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_download_without_url_is_terminal_error() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(FakeExtractor::default(), dir.path());
        let (tx, mut rx) = mpsc::channel(8);

        handle_message(&state, r#"{"action":"download"}"#, &tx).await;

        match next(&mut rx).await {
            ServerMessage::Progress(status) => {
                assert_eq!(status.state, TaskState::Error);
                assert_eq!(status.message, "No URL provided");
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert!(state.registry.is_empty());
    }
}
