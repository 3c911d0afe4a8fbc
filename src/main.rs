use anyhow::Context;
use clap::Parser;
use image::Rgba;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use brandcanvas::buffer::PixelBuffer;
use brandcanvas::config::Config;
use brandcanvas::loader::{self, HttpFetcher, LoadOptions, SchemeFetcher};
use brandcanvas::persistence::{self, HistorySink, JsonLinesSink};
use brandcanvas::session::{Command, EditorSession, SessionOptions};
use brandcanvas::status::{self, AppState};
use brandcanvas::viewport::{self, ViewportState};

#[derive(Parser)]
#[command(
    name = "brandcanvas",
    version,
    about = "Headless layered canvas editor with undo history and PNG export"
)]
struct Cli {
    /// Path to config file (defaults are used if it does not exist)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Seed image: an http(s) URL, a path, a file:// URL or a data: URL
    #[arg(short, long)]
    image: Option<String>,

    /// JSON-lines file of commands to replay
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Write the final composite as PNG
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Serve the HTTP API until Ctrl+C
    #[arg(long)]
    serve: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::default()
    };

    // Initialize logging with level from config
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.settings.log_level)),
        )
        .init();

    tracing::info!("Brandcanvas v{} starting", env!("CARGO_PKG_VERSION"));
    if !cli.config.exists() {
        tracing::info!("No config at {}, using defaults", cli.config.display());
    }

    let seed = match cli.image.as_deref() {
        Some(url) => {
            let options = LoadOptions::from(&config.loader);
            let http = HttpFetcher::new(Duration::from_millis(config.loader.request_timeout_ms));
            let fetcher = SchemeFetcher::with_remote(Box::new(http));
            let seed = loader::load_seed(&fetcher, url, &options).await?;
            if !seed.loaded {
                tracing::warn!("Seed image unavailable, editing on placeholder");
            }
            seed.buffer
        }
        None => PixelBuffer::filled(
            config.loader.placeholder_width,
            config.loader.placeholder_height,
            Rgba([255, 255, 255, 255]),
        )?,
    };

    let mut session = EditorSession::from_seed(
        seed,
        SessionOptions {
            history_limit: config.editor.history_limit,
            tools: config.tool_state(),
        },
    )?;

    let sink: Option<Arc<dyn HistorySink>> = config
        .persistence
        .events_path
        .as_ref()
        .map(|path| Arc::new(JsonLinesSink::new(path)) as Arc<dyn HistorySink>);

    let mut pending_writes: Vec<JoinHandle<()>> = Vec::new();
    if let Some(ref script) = cli.script {
        replay_script(&mut session, script, sink.as_ref(), &mut pending_writes).await?;
    }

    let session = Arc::new(Mutex::new(session));
    if cli.serve {
        serve(session.clone(), &config, sink).await?;
    }

    if let Some(ref output) = cli.output {
        let (png, (w, h)) = {
            let session = session.lock().unwrap();
            (session.export_png()?, session.stack().dimensions())
        };
        tokio::fs::write(output, &png)
            .await
            .with_context(|| format!("Failed to write {}", output.display()))?;
        tracing::info!("Wrote {}x{} composite to {}", w, h, output.display());
    }

    for handle in pending_writes {
        handle.await.ok();
    }

    println!("Brandcanvas stopped.");
    Ok(())
}

/// Apply every command in a JSON-lines file. Blank lines and `#` comments are
/// skipped; rejected commands are logged and replay continues.
async fn replay_script(
    session: &mut EditorSession,
    path: &Path,
    sink: Option<&Arc<dyn HistorySink>>,
    pending_writes: &mut Vec<JoinHandle<()>>,
) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read script {}", path.display()))?;

    let mut applied = 0usize;
    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let command: Command = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid command", path.display(), number + 1))?;
        match session.apply(command) {
            Ok(outcome) => tracing::debug!("line {}: {:?}", number + 1, outcome),
            Err(e) => tracing::warn!("line {}: command rejected: {}", number + 1, e),
        }
        applied += 1;

        let events = session.take_events();
        if let Some(sink) = sink {
            pending_writes.extend(persistence::dispatch_events(sink.clone(), events));
        }
    }

    tracing::info!("Replayed {} commands from {}", applied, path.display());
    Ok(())
}

/// Run the frame loop and HTTP API until Ctrl+C.
async fn serve(
    session: Arc<Mutex<EditorSession>>,
    config: &Config,
    sink: Option<Arc<dyn HistorySink>>,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let container = session.lock().unwrap().stack().dimensions();
    let viewport_state = Arc::new(ViewportState::new(container));
    let (resize_tx, resize_rx) = mpsc::channel(64);

    let frame_loop = tokio::spawn(viewport::run_frame_loop(
        session.clone(),
        resize_rx,
        viewport_state.clone(),
        cancel.clone(),
    ));

    let state = Arc::new(AppState {
        session,
        viewport: viewport_state,
        resizes: resize_tx,
        sink,
        start_time: Instant::now(),
    });
    let port = config.settings.status_port;
    let http_cancel = cancel.clone();
    let http = tokio::spawn(async move {
        if let Err(e) = status::serve_http(state, port, http_cancel).await {
            tracing::error!("Status HTTP server error: {}", e);
        }
    });
    println!("Status: http://localhost:{}/status", port);

    // Ctrl+C handler
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutting down...");
        cancel_clone.cancel();
    });

    cancel.cancelled().await;
    frame_loop.await.ok();
    http.await.ok();
    Ok(())
}
