use image::imageops::{self, FilterType};
use image::RgbaImage;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::buffer::PixelBuffer;
use crate::compositor;
use crate::error::EditorError;
use crate::layer::BlendMode;
use crate::session::EditorSession;

/// Display refresh rate of the frame loop.
pub const FRAME_RATE: u64 = 60;

/// Placement of the canvas inside the container ("contain" fit, centred).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fit {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub width: u32,
    pub height: u32,
}

pub fn fit(canvas: (u32, u32), container: (u32, u32)) -> Fit {
    let scale = (container.0 as f32 / canvas.0 as f32).min(container.1 as f32 / canvas.1 as f32);
    let width = ((canvas.0 as f32 * scale).round() as u32).clamp(1, container.0);
    let height = ((canvas.1 as f32 * scale).round() as u32).clamp(1, container.1);
    Fit {
        scale,
        offset_x: (container.0 - width) / 2,
        offset_y: (container.1 - height) / 2,
        width,
        height,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Nothing changed since the last frame.
    Idle,
    /// A resize is waiting for the in-flight gesture to finish.
    Deferred,
    Rendered,
}

/// Pixels and blend parameters of one visible layer, copied out of the
/// session so the frame can be drawn without holding its lock.
struct FrameLayer {
    buffer: PixelBuffer,
    opacity: f32,
    mode: BlendMode,
}

/// Everything needed to draw one display frame.
pub struct FrameJob {
    layers: Vec<FrameLayer>,
    preview: Option<PixelBuffer>,
    canvas: (u32, u32),
    container: (u32, u32),
    version: u64,
}

impl FrameJob {
    /// Snapshot the session's visible layers and gesture preview.
    pub fn capture(session: &EditorSession, container: (u32, u32)) -> Self {
        let layers = session
            .stack()
            .ordered()
            .into_iter()
            .filter(|layer| layer.visible)
            .map(|layer| FrameLayer {
                buffer: layer.buffer().clone(),
                opacity: layer.opacity() as f32 / 100.0,
                mode: layer.blend_mode,
            })
            .collect();
        Self {
            layers,
            preview: session.preview().cloned(),
            canvas: session.stack().dimensions(),
            container,
            version: session.version(),
        }
    }

    /// Composite, scale into the container and letterbox.
    pub fn render(&self) -> Result<PixelBuffer, EditorError> {
        let mut canvas = PixelBuffer::new(self.canvas.0, self.canvas.1)?;
        for layer in &self.layers {
            compositor::blend_layer(&mut canvas, &layer.buffer, layer.opacity, layer.mode);
        }
        if let Some(preview) = &self.preview {
            compositor::overlay(&mut canvas, preview);
        }

        let placement = fit(canvas.dimensions(), self.container);
        let scaled = if (placement.width, placement.height) == canvas.dimensions() {
            canvas.into_image()
        } else {
            imageops::resize(canvas.as_image(), placement.width, placement.height, FilterType::Triangle)
        };

        let mut frame: RgbaImage = PixelBuffer::new(self.container.0, self.container.1)?.into_image();
        imageops::replace(&mut frame, &scaled, placement.offset_x as i64, placement.offset_y as i64);
        PixelBuffer::from_image(frame)
    }
}

/// What the next frame needs.
pub enum FramePlan {
    Skip(FrameOutcome),
    Render(FrameJob),
}

/// Keeps the on-screen frame in step with the container size and the
/// session content. Display pixels are always re-rendered from the layer
/// stack, never stretched from the previous frame.
pub struct ViewportController {
    container: (u32, u32),
    pending: Option<(u32, u32)>,
    rendered_version: Option<u64>,
    display: Option<PixelBuffer>,
    frames_rendered: u64,
}

impl ViewportController {
    pub fn new(container: (u32, u32)) -> Self {
        Self {
            container: (container.0.max(1), container.1.max(1)),
            pending: None,
            rendered_version: None,
            display: None,
            frames_rendered: 0,
        }
    }

    pub fn container(&self) -> (u32, u32) {
        self.container
    }

    pub fn display(&self) -> Option<&PixelBuffer> {
        self.display.as_ref()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Record a container size change. Bursts collapse into the last size
    /// and are applied on the next frame.
    pub fn request_resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            tracing::debug!("Ignoring degenerate container size {}x{}", width, height);
            return;
        }
        self.pending = Some((width, height));
    }

    /// Decide what the next frame needs. Cheap enough to call with the
    /// session locked; the returned job is drawn afterwards.
    pub fn plan(&mut self, session: &EditorSession) -> FramePlan {
        let mut deferred = false;
        if let Some(size) = self.pending {
            if session.is_gesture_active() {
                deferred = true;
            } else {
                self.pending = None;
                if size != self.container {
                    tracing::debug!(
                        "Viewport {}x{} -> {}x{}",
                        self.container.0,
                        self.container.1,
                        size.0,
                        size.1
                    );
                    self.container = size;
                    self.rendered_version = None;
                }
            }
        }

        if self.rendered_version == Some(session.version()) {
            return FramePlan::Skip(if deferred { FrameOutcome::Deferred } else { FrameOutcome::Idle });
        }
        FramePlan::Render(FrameJob::capture(session, self.container))
    }

    /// Install a frame drawn from a job returned by [`Self::plan`]. Frames
    /// drawn for a container size that has since changed are dropped.
    pub fn present(&mut self, job: &FrameJob, display: PixelBuffer) -> FrameOutcome {
        if job.container != self.container {
            return FrameOutcome::Idle;
        }
        self.display = Some(display);
        self.rendered_version = Some(job.version);
        self.frames_rendered += 1;
        FrameOutcome::Rendered
    }

    /// Plan, draw and present one frame in place.
    pub fn on_frame(&mut self, session: &EditorSession) -> Result<FrameOutcome, EditorError> {
        match self.plan(session) {
            FramePlan::Skip(outcome) => Ok(outcome),
            FramePlan::Render(job) => {
                let display = job.render()?;
                Ok(self.present(&job, display))
            }
        }
    }
}

/// Latest display frame and counters, shared with the HTTP handlers.
pub struct ViewportState {
    pub container: Mutex<(u32, u32)>,
    pub latest_frame: Mutex<Option<RgbaImage>>,
    pub frames_rendered: Mutex<u64>,
}

impl ViewportState {
    pub fn new(container: (u32, u32)) -> Self {
        Self {
            container: Mutex::new(container),
            latest_frame: Mutex::new(None),
            frames_rendered: Mutex::new(0),
        }
    }
}

/// Drive a [`ViewportController`] at [`FRAME_RATE`] until cancelled.
/// Resize events arrive on `resizes`; all events received between two ticks
/// produce at most one re-render.
pub async fn run_frame_loop(
    session: Arc<Mutex<EditorSession>>,
    mut resizes: mpsc::Receiver<(u32, u32)>,
    state: Arc<ViewportState>,
    cancel: CancellationToken,
) {
    let initial = *state.container.lock().unwrap();
    let mut viewport = ViewportController::new(initial);
    let mut interval = tokio::time::interval(Duration::from_micros(1_000_000 / FRAME_RATE));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!("Viewport loop started ({}x{}@{}fps)", initial.0, initial.1, FRAME_RATE);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                while let Ok((w, h)) = resizes.try_recv() {
                    viewport.request_resize(w, h);
                }

                // Only the snapshot happens under the lock.
                let plan = {
                    let session = session.lock().unwrap();
                    viewport.plan(&session)
                };
                let FramePlan::Render(job) = plan else {
                    continue;
                };

                let drawn = tokio::task::spawn_blocking(move || {
                    let display = job.render();
                    (job, display)
                })
                .await;

                match drawn {
                    Ok((job, Ok(display))) => {
                        if viewport.present(&job, display) == FrameOutcome::Rendered {
                            if let Some(display) = viewport.display() {
                                *state.latest_frame.lock().unwrap() = Some(display.as_image().clone());
                            }
                            *state.container.lock().unwrap() = viewport.container();
                            *state.frames_rendered.lock().unwrap() = viewport.frames_rendered();
                        }
                    }
                    Ok((_, Err(e))) => tracing::error!("Viewport render failed: {}", e),
                    Err(e) => tracing::error!("Viewport render task failed: {}", e),
                }
            }
        }
    }

    tracing::info!("Viewport loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Command, SessionOptions};
    use image::Rgba;

    fn session(w: u32, h: u32) -> EditorSession {
        let seed = PixelBuffer::filled(w, h, Rgba([255, 255, 255, 255])).unwrap();
        EditorSession::from_seed(seed, SessionOptions::default()).unwrap()
    }

    #[test]
    fn test_fit_letterboxes_and_centres() {
        let f = fit((800, 600), (400, 400));
        assert_eq!((f.width, f.height), (400, 300));
        assert_eq!((f.offset_x, f.offset_y), (0, 50));
        assert!((f.scale - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_container_resize_keeps_composite_size() {
        let s = session(800, 600);
        let mut viewport = ViewportController::new((800, 600));
        assert_eq!(viewport.on_frame(&s).unwrap(), FrameOutcome::Rendered);
        assert_eq!(viewport.display().unwrap().dimensions(), (800, 600));

        viewport.request_resize(400, 300);
        assert_eq!(viewport.on_frame(&s).unwrap(), FrameOutcome::Rendered);
        assert_eq!(viewport.display().unwrap().dimensions(), (400, 300));
        assert_eq!(viewport.display().unwrap().pixel(200, 150), Some(Rgba([255, 255, 255, 255])));
        assert_eq!(s.composite().unwrap().dimensions(), (800, 600));
        assert_eq!(s.stack().len(), 2);
    }

    #[test]
    fn test_resize_bursts_coalesce_into_one_render() {
        let s = session(100, 100);
        let mut viewport = ViewportController::new((100, 100));
        viewport.on_frame(&s).unwrap();
        let before = viewport.frames_rendered();

        for size in [(90, 90), (80, 80), (70, 50)] {
            viewport.request_resize(size.0, size.1);
        }
        viewport.on_frame(&s).unwrap();
        assert_eq!(viewport.on_frame(&s).unwrap(), FrameOutcome::Idle);
        assert_eq!(viewport.frames_rendered(), before + 1);
        assert_eq!(viewport.container(), (70, 50));
    }

    #[test]
    fn test_resize_waits_for_gesture_end() {
        let mut s = session(100, 100);
        let mut viewport = ViewportController::new((100, 100));
        viewport.on_frame(&s).unwrap();

        s.apply(Command::PointerDown { x: 10.0, y: 10.0, modifier: false }).unwrap();
        viewport.on_frame(&s).unwrap();
        viewport.request_resize(50, 50);
        assert_eq!(viewport.on_frame(&s).unwrap(), FrameOutcome::Deferred);
        assert_eq!(viewport.container(), (100, 100));

        s.apply(Command::PointerUp { x: 10.0, y: 10.0 }).unwrap();
        assert_eq!(viewport.on_frame(&s).unwrap(), FrameOutcome::Rendered);
        assert_eq!(viewport.container(), (50, 50));
    }

    #[test]
    fn test_frame_job_draws_from_its_snapshot() {
        let mut s = session(40, 40);
        let mut viewport = ViewportController::new((40, 40));
        let FramePlan::Render(job) = viewport.plan(&s) else {
            panic!("first frame must render");
        };

        // Session edits after the snapshot do not leak into the job.
        s.apply(Command::SetColor { color: "#ff0000".to_string() }).unwrap();
        s.apply(Command::PointerDown { x: 20.0, y: 20.0, modifier: false }).unwrap();
        s.apply(Command::PointerUp { x: 20.0, y: 20.0 }).unwrap();

        let display = job.render().unwrap();
        assert_eq!(display.pixel(20, 20), Some(Rgba([255, 255, 255, 255])));
        assert_eq!(viewport.present(&job, display), FrameOutcome::Rendered);

        // The newer version is picked up on the next frame.
        assert_eq!(viewport.on_frame(&s).unwrap(), FrameOutcome::Rendered);
        assert_eq!(viewport.display().unwrap().pixel(20, 20), Some(Rgba([255, 0, 0, 255])));
    }

    #[tokio::test]
    async fn test_frame_loop_publishes_resized_frame() {
        let session = Arc::new(Mutex::new(session(200, 100)));
        let state = Arc::new(ViewportState::new((200, 100)));
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_frame_loop(session.clone(), rx, state.clone(), cancel.clone()));

        tx.send((100, 100)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
        task.await.unwrap();

        let frame = state.latest_frame.lock().unwrap().clone().unwrap();
        assert_eq!(frame.dimensions(), (100, 100));
        // Letterbox bands above and below the 100x50 canvas stay transparent.
        assert_eq!(frame.get_pixel(50, 5)[3], 0);
        assert_eq!(frame.get_pixel(50, 50)[3], 255);
        assert_eq!(session.lock().unwrap().composite().unwrap().dimensions(), (200, 100));
    }
}
