//! The editor as one owned value: layers, tools and history, driven by
//! [`Command`]s.

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::buffer::{parse_hex_color, PixelBuffer, Point};
use crate::compositor;
use crate::error::EditorError;
use crate::history::{now_ms, HistoryManager, DEFAULT_HISTORY_LIMIT};
use crate::layer::{BlendMode, LayerId, LayerInfo, LayerKind};
use crate::persistence::{CanvasMetadata, HistoryEvent};
use crate::stack::LayerStack;
use crate::tools::{GestureOutcome, PointerEvent, Tool, ToolController, ToolState};

/// Everything the editor can be asked to do. JSON form is tagged by `type`,
/// e.g. `{"type":"pointer_down","x":10,"y":20}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    PointerDown {
        x: f32,
        y: f32,
        #[serde(default)]
        modifier: bool,
    },
    PointerMove {
        x: f32,
        y: f32,
    },
    PointerUp {
        x: f32,
        y: f32,
    },
    PointerLeave,

    SelectTool {
        tool: Tool,
    },
    SetBrushSize {
        size: f32,
    },
    SetOpacity {
        opacity: u8,
    },
    SetColor {
        color: String,
    },
    SetTolerance {
        tolerance: u8,
    },
    SetFeather {
        radius: f32,
    },
    ClearSelection,

    CreateLayer {
        #[serde(default)]
        kind: LayerKind,
        name: String,
    },
    DeleteLayer {
        id: LayerId,
    },
    DuplicateLayer {
        id: LayerId,
    },
    MergeLayers {
        ids: Vec<LayerId>,
    },
    ReorderLayer {
        id: LayerId,
        index: usize,
    },
    SetActiveLayer {
        id: LayerId,
    },
    RenameLayer {
        id: LayerId,
        name: String,
    },
    SetLayerVisibility {
        id: LayerId,
        visible: bool,
    },
    SetLayerLocked {
        id: LayerId,
        locked: bool,
    },
    SetLayerOpacity {
        id: LayerId,
        opacity: u8,
    },
    SetBlendMode {
        id: LayerId,
        mode: BlendMode,
    },

    Undo,
    Redo,
    ResizeCanvas {
        width: u32,
        height: u32,
    },

    /// Base64 PNG/JPEG bytes replacing the active layer's pixels.
    ReplaceActiveLayerImage {
        data: String,
    },
    /// Base64 PNG/JPEG bytes becoming a new image layer.
    CreateLayerFromImage {
        #[serde(default = "default_ai_layer_name")]
        name: String,
        data: String,
    },
}

fn default_ai_layer_name() -> String {
    "AI layer".to_string()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    /// The command was valid but had nothing to act on.
    Ignored,
    /// Transient state changed (tool settings, active layer, gesture).
    Updated,
    /// A new history entry was recorded.
    Committed { action: String },
    /// A layer was created and committed.
    Created { id: LayerId },
    Undone,
    Redone,
}

pub struct SessionOptions {
    pub history_limit: usize,
    pub tools: ToolState,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            tools: ToolState::default(),
        }
    }
}

/// JSON view of the session for the status endpoint.
#[derive(Debug, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub width: u32,
    pub height: u32,
    /// Bottom to top.
    pub layers: Vec<LayerInfo>,
    pub active_layer: Option<LayerId>,
    pub tool: ToolState,
    pub gesture_active: bool,
    pub selection_area: Option<usize>,
    pub can_undo: bool,
    pub can_redo: bool,
    pub history_len: usize,
    pub history_evicted: u64,
}

pub struct EditorSession {
    session_id: String,
    stack: LayerStack,
    tools: ToolController,
    history: HistoryManager,
    events: Vec<HistoryEvent>,
    version: u64,
}

impl EditorSession {
    /// Background image layer from `seed`, an empty drawing layer above it,
    /// and a baseline history entry.
    pub fn from_seed(seed: PixelBuffer, options: SessionOptions) -> Result<Self, EditorError> {
        let mut stack = LayerStack::with_background("Background", seed);
        stack.create_layer(LayerKind::Drawing, "Drawing")?;

        let mut history = HistoryManager::new(options.history_limit);
        history.reset(&stack, "open");

        let session_id = uuid::Uuid::new_v4().to_string();
        let (w, h) = stack.dimensions();
        tracing::info!("Editor session {} opened ({}x{})", session_id, w, h);

        Ok(Self {
            session_id,
            stack,
            tools: ToolController::new(options.tools),
            history,
            events: Vec::new(),
            version: 0,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn stack(&self) -> &LayerStack {
        &self.stack
    }

    pub fn tools(&self) -> &ToolController {
        &self.tools
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn is_gesture_active(&self) -> bool {
        self.tools.is_dragging()
    }

    /// Bumped by every applied command; lets observers skip re-rendering.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Shape / selection preview of the in-flight gesture, if any.
    pub fn preview(&self) -> Option<&PixelBuffer> {
        self.tools.preview()
    }

    /// Committed actions not yet handed to the persistence sink.
    pub fn take_events(&mut self) -> Vec<HistoryEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn composite(&self) -> Result<PixelBuffer, EditorError> {
        compositor::render(&self.stack)
    }

    pub fn export_png(&self) -> Result<Vec<u8>, EditorError> {
        let canvas = self.composite()?;
        compositor::encode_png(canvas.as_image())
    }

    pub fn status(&self) -> SessionStatus {
        let (width, height) = self.stack.dimensions();
        SessionStatus {
            session_id: self.session_id.clone(),
            width,
            height,
            layers: self.stack.ordered().into_iter().map(|l| l.info()).collect(),
            active_layer: self.stack.active_layer_id(),
            tool: self.tools.state.clone(),
            gesture_active: self.tools.is_dragging(),
            selection_area: self.tools.selection().map(|s| s.area()),
            can_undo: self.history.can_undo(),
            can_redo: self.history.can_redo(),
            history_len: self.history.len(),
            history_evicted: self.history.evicted(),
        }
    }

    pub fn apply(&mut self, command: Command) -> Result<Outcome, EditorError> {
        self.version += 1;
        match command {
            Command::PointerDown { x, y, modifier } => Ok(self.pointer(PointerEvent::Down {
                point: Point::new(x, y),
                modifier,
            })),
            Command::PointerMove { x, y } => Ok(self.pointer(PointerEvent::Move {
                point: Point::new(x, y),
            })),
            Command::PointerUp { x, y } => Ok(self.pointer(PointerEvent::Up {
                point: Point::new(x, y),
            })),
            Command::PointerLeave => Ok(self.pointer(PointerEvent::Leave)),

            Command::SelectTool { tool } => {
                self.tools.select_tool(tool);
                Ok(Outcome::Updated)
            }
            Command::SetBrushSize { size } => {
                if !(size.is_finite() && size > 0.0) {
                    return Ok(Outcome::Ignored);
                }
                self.tools.state.brush_size = size;
                Ok(Outcome::Updated)
            }
            Command::SetOpacity { opacity } => {
                self.tools.state.opacity = opacity.min(100);
                Ok(Outcome::Updated)
            }
            Command::SetColor { color } => match parse_hex_color(&color) {
                Some(rgba) => {
                    self.tools.state.color = rgba;
                    Ok(Outcome::Updated)
                }
                None => {
                    tracing::debug!("Ignoring unparseable color '{}'", color);
                    Ok(Outcome::Ignored)
                }
            },
            Command::SetTolerance { tolerance } => {
                self.tools.state.tolerance = tolerance;
                Ok(Outcome::Updated)
            }
            Command::SetFeather { radius } => {
                self.tools.state.feather_radius = radius.max(0.0);
                Ok(Outcome::Updated)
            }
            Command::ClearSelection => {
                self.tools.clear_selection();
                Ok(Outcome::Updated)
            }

            Command::CreateLayer { kind, name } => {
                self.settle_gesture();
                let id = self.stack.create_layer(kind, &name)?;
                self.commit("create-layer");
                Ok(Outcome::Created { id })
            }
            Command::DeleteLayer { id } => {
                self.settle_gesture();
                self.stack.delete_layer(id)?;
                Ok(self.commit("delete-layer"))
            }
            Command::DuplicateLayer { id } => {
                self.settle_gesture();
                let copy = self.stack.duplicate_layer(id)?;
                self.commit("duplicate-layer");
                Ok(Outcome::Created { id: copy })
            }
            Command::MergeLayers { ids } => {
                self.settle_gesture();
                let merged = self.stack.merge_layers(&ids)?;
                self.commit("merge-layers");
                Ok(Outcome::Created { id: merged })
            }
            Command::ReorderLayer { id, index } => {
                self.settle_gesture();
                let before = self.stack.ordered_ids();
                self.stack.reorder(id, index)?;
                if self.stack.ordered_ids() == before {
                    return Ok(Outcome::Ignored);
                }
                Ok(self.commit("reorder-layer"))
            }
            Command::SetActiveLayer { id } => {
                if self.is_gesture_active() {
                    tracing::debug!("Active layer change during a gesture ignored");
                    return Ok(Outcome::Ignored);
                }
                if self.stack.set_active(id) {
                    Ok(Outcome::Updated)
                } else {
                    Ok(Outcome::Ignored)
                }
            }
            Command::RenameLayer { id, name } => {
                self.edit_layer(id, "rename-layer", |layer| layer.name = name)
            }
            Command::SetLayerVisibility { id, visible } => {
                self.edit_layer(id, "layer-visibility", |layer| layer.visible = visible)
            }
            Command::SetLayerLocked { id, locked } => {
                self.edit_layer(id, "layer-lock", |layer| layer.locked = locked)
            }
            Command::SetLayerOpacity { id, opacity } => {
                self.edit_layer(id, "layer-opacity", |layer| layer.set_opacity(opacity))
            }
            Command::SetBlendMode { id, mode } => {
                self.edit_layer(id, "layer-blend-mode", |layer| layer.blend_mode = mode)
            }

            Command::Undo => {
                self.settle_gesture();
                if !self.history.undo(&mut self.stack) {
                    return Ok(Outcome::Ignored);
                }
                self.drop_stale_selection();
                self.record_event("undo");
                Ok(Outcome::Undone)
            }
            Command::Redo => {
                self.settle_gesture();
                if !self.history.redo(&mut self.stack) {
                    return Ok(Outcome::Ignored);
                }
                self.drop_stale_selection();
                self.record_event("redo");
                Ok(Outcome::Redone)
            }
            Command::ResizeCanvas { width, height } => {
                self.settle_gesture();
                if (width, height) == self.stack.dimensions() {
                    return Ok(Outcome::Ignored);
                }
                self.stack.resize_canvas(width, height)?;
                self.tools.clear_selection();
                Ok(self.commit("resize-canvas"))
            }

            Command::ReplaceActiveLayerImage { data } => {
                let bytes = decode_base64(&data)?;
                self.replace_active_layer_image(&bytes)
            }
            Command::CreateLayerFromImage { name, data } => {
                let bytes = decode_base64(&data)?;
                let id = self.create_layer_from_image(&name, &bytes)?;
                Ok(Outcome::Created { id })
            }
        }
    }

    /// Swap the active layer's pixels for an externally produced image,
    /// resampled to the canvas size. Locked layers are left alone.
    pub fn replace_active_layer_image(&mut self, bytes: &[u8]) -> Result<Outcome, EditorError> {
        self.settle_gesture();
        let Some(layer) = self.stack.active_layer() else {
            return Ok(Outcome::Ignored);
        };
        if layer.locked {
            tracing::debug!("{} is locked; image replacement ignored", layer.id());
            return Ok(Outcome::Ignored);
        }
        let id = layer.id();
        let buffer = decode_buffer(bytes)?;
        self.stack.replace_pixels(id, buffer)?;
        Ok(self.commit("replace-layer-image"))
    }

    /// Add a new image layer on top from externally produced bytes.
    pub fn create_layer_from_image(&mut self, name: &str, bytes: &[u8]) -> Result<LayerId, EditorError> {
        self.settle_gesture();
        let buffer = decode_buffer(bytes)?;
        let id = self.stack.create_layer_from_buffer(LayerKind::Image, name, buffer)?;
        self.commit("create-layer-from-image");
        Ok(id)
    }

    fn pointer(&mut self, event: PointerEvent) -> Outcome {
        match self.tools.handle(&mut self.stack, event) {
            GestureOutcome::Ignored => Outcome::Ignored,
            GestureOutcome::SourceSet | GestureOutcome::Started | GestureOutcome::InProgress => Outcome::Updated,
            GestureOutcome::Finished { tool, changed: true, .. } => self.commit(tool.name()),
            GestureOutcome::Finished { changed: false, .. } => Outcome::Updated,
        }
    }

    /// Finish an in-flight gesture before a structural change so the history
    /// entry for it reflects the pixels as they were at gesture end.
    /// A selection made at another canvas size no longer maps onto pixels.
    fn drop_stale_selection(&mut self) {
        let stale = self
            .tools
            .selection()
            .is_some_and(|selection| selection.mask().dimensions() != self.stack.dimensions());
        if stale {
            tracing::debug!("Clearing selection after canvas size changed");
            self.tools.clear_selection();
        }
    }

    fn settle_gesture(&mut self) {
        if self.tools.is_dragging() {
            tracing::debug!("Finalizing in-flight gesture before structural change");
            self.pointer(PointerEvent::Leave);
        }
    }

    fn edit_layer(
        &mut self,
        id: LayerId,
        action: &str,
        edit: impl FnOnce(&mut crate::layer::Layer),
    ) -> Result<Outcome, EditorError> {
        self.settle_gesture();
        let layer = self.stack.layer_mut(id).ok_or(EditorError::UnknownLayer(id))?;
        let before = layer.info();
        edit(layer);
        if layer.info() == before {
            return Ok(Outcome::Ignored);
        }
        Ok(self.commit(action))
    }

    fn commit(&mut self, action: &str) -> Outcome {
        self.history.snapshot(&self.stack, action);
        self.record_event(action);
        Outcome::Committed {
            action: action.to_string(),
        }
    }

    fn record_event(&mut self, action: &str) {
        let (width, height) = self.stack.dimensions();
        self.events.push(HistoryEvent {
            session_id: self.session_id.clone(),
            action_type: action.to_string(),
            canvas_metadata: CanvasMetadata {
                width,
                height,
                layer_count: self.stack.len(),
                active_layer: self.stack.active_layer_id(),
            },
            timestamp: now_ms(),
        });
    }
}

/// Command-dispatch form of [`EditorSession::apply`]: consumes the session
/// and hands it back. Rejected commands leave it unchanged.
pub fn apply_command(mut session: EditorSession, command: Command) -> EditorSession {
    if let Err(e) = session.apply(command) {
        tracing::warn!("Command rejected: {}", e);
    }
    session
}

fn decode_base64(data: &str) -> Result<Vec<u8>, EditorError> {
    let payload = data.split_once(";base64,").map(|(_, p)| p).unwrap_or(data);
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| EditorError::Decode(e.to_string()))
}

fn decode_buffer(bytes: &[u8]) -> Result<PixelBuffer, EditorError> {
    let image = image::load_from_memory(bytes).map_err(|e| EditorError::Decode(e.to_string()))?;
    PixelBuffer::from_image(image.to_rgba8())
}
