use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::compositor::encode_png;
use crate::persistence::{self, HistorySink};
use crate::session::{Command, EditorSession, Outcome, SessionStatus};
use crate::viewport::ViewportState;

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_seconds: u64,
    session: SessionStatus,
    viewport: ViewportStatus,
}

#[derive(Serialize)]
struct ViewportStatus {
    width: u32,
    height: u32,
    frames_rendered: u64,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
pub struct ResizeRequest {
    pub width: u32,
    pub height: u32,
}

pub struct AppState {
    pub session: Arc<Mutex<EditorSession>>,
    pub viewport: Arc<ViewportState>,
    pub resizes: mpsc::Sender<(u32, u32)>,
    pub sink: Option<Arc<dyn HistorySink>>,
    pub start_time: Instant,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, error: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
        }),
    )
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/composite.png", get(composite_handler))
        .route("/display.png", get(display_handler))
        .route("/command", post(command_handler))
        .route("/resize", post(resize_handler))
        .with_state(state)
}

/// Serve the editor API on the given port until `cancel` fires.
pub async fn serve_http(state: Arc<AppState>, port: u16, cancel: CancellationToken) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!("Status endpoint: http://localhost:{}/status", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let session = state.session.lock().unwrap().status();
    let (width, height) = *state.viewport.container.lock().unwrap();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        session,
        viewport: ViewportStatus {
            width,
            height,
            frames_rendered: *state.viewport.frames_rendered.lock().unwrap(),
        },
    })
}

async fn composite_handler(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let png = state
        .session
        .lock()
        .unwrap()
        .export_png()
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png))
}

async fn display_handler(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let frame = state.viewport.latest_frame.lock().unwrap().clone();
    let frame = frame.ok_or_else(|| api_error(StatusCode::SERVICE_UNAVAILABLE, "no frame rendered yet"))?;
    let png = encode_png(&frame).map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png))
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(command): Json<Command>,
) -> Result<Json<Outcome>, ApiError> {
    let (result, events) = {
        let mut session = state.session.lock().unwrap();
        let result = session.apply(command);
        (result, session.take_events())
    };
    if let Some(sink) = &state.sink {
        persistence::dispatch_events(sink.clone(), events);
    }
    result
        .map(Json)
        .map_err(|e| api_error(StatusCode::UNPROCESSABLE_ENTITY, e))
}

async fn resize_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResizeRequest>,
) -> Result<StatusCode, ApiError> {
    if request.width == 0 || request.height == 0 {
        return Err(api_error(StatusCode::BAD_REQUEST, "width and height must be > 0"));
    }
    state
        .resizes
        .try_send((request.width, request.height))
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e))?;
    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PixelBuffer;
    use crate::session::SessionOptions;

    fn app_state() -> (Arc<AppState>, mpsc::Receiver<(u32, u32)>) {
        let seed = PixelBuffer::new(32, 16).unwrap();
        let session = EditorSession::from_seed(seed, SessionOptions::default()).unwrap();
        let (tx, rx) = mpsc::channel(4);
        let state = Arc::new(AppState {
            session: Arc::new(Mutex::new(session)),
            viewport: Arc::new(ViewportState::new((32, 16))),
            resizes: tx,
            sink: None,
            start_time: Instant::now(),
        });
        (state, rx)
    }

    #[tokio::test]
    async fn test_command_then_status() {
        let (state, _rx) = app_state();
        let cmd: Command = serde_json::from_str(r#"{"type":"pointer_down","x":4,"y":4}"#).unwrap();
        let Json(outcome) = command_handler(State(state.clone()), Json(cmd)).await.unwrap();
        assert_eq!(outcome, Outcome::Updated);
        command_handler(State(state.clone()), Json(Command::PointerLeave)).await.unwrap();

        let Json(status) = status_handler(State(state)).await;
        assert!(status.session.can_undo);
        assert_eq!(status.session.layers.len(), 2);
        assert_eq!((status.session.width, status.session.height), (32, 16));
    }

    #[tokio::test]
    async fn test_rejected_command_maps_to_422() {
        let (state, _rx) = app_state();
        let missing = crate::layer::LayerId(77);
        let (code, _) = command_handler(State(state), Json(Command::DeleteLayer { id: missing }))
            .await
            .unwrap_err();
        assert_eq!(code, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_resize_is_forwarded() {
        let (state, mut rx) = app_state();
        let code = resize_handler(State(state.clone()), Json(ResizeRequest { width: 10, height: 5 }))
            .await
            .unwrap();
        assert_eq!(code, StatusCode::ACCEPTED);
        assert_eq!(rx.recv().await, Some((10, 5)));

        let bad = resize_handler(State(state), Json(ResizeRequest { width: 0, height: 5 })).await;
        assert!(bad.is_err());
    }

    #[tokio::test]
    async fn test_display_unavailable_before_first_frame() {
        let (state, _rx) = app_state();
        assert!(display_handler(State(state)).await.is_err());
    }
}
