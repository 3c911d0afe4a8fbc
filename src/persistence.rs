//! Fire-and-forget export of committed actions to an external history store.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;

use crate::layer::LayerId;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasMetadata {
    pub width: u32,
    pub height: u32,
    pub layer_count: usize,
    pub active_layer: Option<LayerId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEvent {
    pub session_id: String,
    pub action_type: String,
    pub canvas_metadata: CanvasMetadata,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

pub trait HistorySink: Send + Sync {
    fn record<'a>(&'a self, event: &'a HistoryEvent) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Appends one JSON object per line.
pub struct JsonLinesSink {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }
}

impl HistorySink for JsonLinesSink {
    fn record<'a>(&'a self, event: &'a HistoryEvent) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let mut line = serde_json::to_vec(event)?;
            line.push(b'\n');
            let _guard = self.write_lock.lock().await;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", self.path.display(), e))?;
            file.write_all(&line).await?;
            file.flush().await?;
            Ok(())
        })
    }
}

/// Hand events to the sink on a background task. Failures are logged and
/// never reach the editor.
pub fn dispatch_events(sink: Arc<dyn HistorySink>, events: Vec<HistoryEvent>) -> Option<JoinHandle<()>> {
    if events.is_empty() {
        return None;
    }
    Some(tokio::spawn(async move {
        for event in &events {
            if let Err(e) = sink.record(event).await {
                tracing::warn!("Failed to persist '{}' event: {}", event.action_type, e);
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn event(action: &str) -> HistoryEvent {
        HistoryEvent {
            session_id: "s-1".to_string(),
            action_type: action.to_string(),
            canvas_metadata: CanvasMetadata {
                width: 800,
                height: 600,
                layer_count: 2,
                active_layer: Some(LayerId(2)),
            },
            timestamp: 1,
        }
    }

    struct Recording(Mutex<Vec<String>>);

    impl HistorySink for Recording {
        fn record<'a>(&'a self, event: &'a HistoryEvent) -> BoxFuture<'a, anyhow::Result<()>> {
            Box::pin(async move {
                if event.action_type == "boom" {
                    anyhow::bail!("store unavailable");
                }
                self.0.lock().unwrap().push(event.action_type.clone());
                Ok(())
            })
        }
    }

    #[test]
    fn test_event_wire_format() {
        let json = serde_json::to_value(event("brush")).unwrap();
        assert_eq!(json["sessionId"], "s-1");
        assert_eq!(json["actionType"], "brush");
        assert_eq!(json["canvasMetadata"]["layerCount"], 2);
        assert_eq!(json["canvasMetadata"]["activeLayer"], 2);
    }

    #[tokio::test]
    async fn test_dispatch_survives_sink_failures() {
        let sink = Arc::new(Recording(Mutex::new(Vec::new())));
        let handle = dispatch_events(sink.clone(), vec![event("boom"), event("eraser")]).unwrap();
        handle.await.unwrap();
        assert_eq!(*sink.0.lock().unwrap(), vec!["eraser".to_string()]);
        assert!(dispatch_events(sink, Vec::new()).is_none());
    }

    #[tokio::test]
    async fn test_json_lines_sink_appends() {
        let path = std::env::temp_dir().join(format!("brandcanvas-{}.jsonl", uuid::Uuid::new_v4()));
        let sink = JsonLinesSink::new(&path);
        sink.record(&event("brush")).await.unwrap();
        sink.record(&event("undo")).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let actions: Vec<String> = content
            .lines()
            .map(|l| serde_json::from_str::<HistoryEvent>(l).unwrap().action_type)
            .collect();
        assert_eq!(actions, vec!["brush", "undo"]);
        let _ = tokio::fs::remove_file(&path).await;
    }
}
