//! Pointer-driven drawing tools.
//!
//! [`ToolController`] is a two-state machine (`Idle` / `Dragging`) that turns
//! pointer events into writes on the active layer's pixels. A gesture ends on
//! pointer-up or pointer-leave; the caller snapshots history when the
//! returned [`GestureOutcome`] reports changed pixels.

pub mod clone;
pub mod fill;
pub mod selection;
pub mod shapes;

use image::Rgba;
use serde::{Deserialize, Serialize};

use crate::buffer::{Paint, PixelBuffer, Point};
use crate::layer::LayerId;
use crate::stack::LayerStack;
use selection::Selection;
use shapes::ShapeKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tool {
    #[default]
    Brush,
    Pen,
    Eraser,
    Clone,
    Healing,
    PaintBucket,
    Rectangle,
    Circle,
    Line,
    Arrow,
    Triangle,
    Select,
    Lasso,
    MagicWand,
}

impl Tool {
    pub fn shape(self) -> Option<ShapeKind> {
        match self {
            Tool::Rectangle => Some(ShapeKind::Rectangle),
            Tool::Circle => Some(ShapeKind::Circle),
            Tool::Line => Some(ShapeKind::Line),
            Tool::Arrow => Some(ShapeKind::Arrow),
            Tool::Triangle => Some(ShapeKind::Triangle),
            _ => None,
        }
    }

    pub fn is_selection(self) -> bool {
        matches!(self, Tool::Select | Tool::Lasso | Tool::MagicWand)
    }

    pub fn name(self) -> &'static str {
        match self {
            Tool::Brush => "brush",
            Tool::Pen => "pen",
            Tool::Eraser => "eraser",
            Tool::Clone => "clone",
            Tool::Healing => "healing",
            Tool::PaintBucket => "paint-bucket",
            Tool::Rectangle => "rectangle",
            Tool::Circle => "circle",
            Tool::Line => "line",
            Tool::Arrow => "arrow",
            Tool::Triangle => "triangle",
            Tool::Select => "select",
            Tool::Lasso => "lasso",
            Tool::MagicWand => "magic-wand",
        }
    }
}

/// User-facing tool parameters.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolState {
    pub selected: Tool,
    pub brush_size: f32,
    /// Percent, 0..=100.
    pub opacity: u8,
    #[serde(serialize_with = "serialize_color")]
    pub color: Rgba<u8>,
    /// Max per-channel difference for flood fill / magic wand.
    pub tolerance: u8,
    pub feather_radius: f32,
    pub clone_source: Option<Point>,
}

impl Default for ToolState {
    fn default() -> Self {
        Self {
            selected: Tool::Brush,
            brush_size: 10.0,
            opacity: 100,
            color: Rgba([0, 0, 0, 255]),
            tolerance: 32,
            feather_radius: 0.0,
            clone_source: None,
        }
    }
}

impl ToolState {
    fn alpha(&self) -> f32 {
        self.opacity.min(100) as f32 / 100.0
    }

    fn stamp_size(&self) -> u32 {
        self.brush_size.round().max(1.0) as u32
    }
}

fn serialize_color<S: serde::Serializer>(color: &Rgba<u8>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format!("#{:02x}{:02x}{:02x}", color[0], color[1], color[2]))
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointerEvent {
    /// `modifier` is the alt/option key; it sets the clone source.
    Down { point: Point, modifier: bool },
    Move { point: Point },
    Up { point: Point },
    Leave,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GestureOutcome {
    /// Nothing happened (no active/editable layer, no gesture, ...).
    Ignored,
    /// Modifier-click recorded a new clone source.
    SourceSet,
    Started,
    InProgress,
    /// Gesture finished; `changed` tells whether pixels were written.
    Finished { tool: Tool, layer: LayerId, changed: bool },
}

struct Gesture {
    tool: Tool,
    layer: LayerId,
    start: Point,
    last: Point,
    path: Vec<Point>,
    /// Layer pixels as they were at pointer-down (clone/healing read these).
    origin: Option<PixelBuffer>,
    changed: bool,
}

enum GestureState {
    Idle,
    Dragging(Gesture),
}

pub struct ToolController {
    pub state: ToolState,
    gesture: GestureState,
    preview: Option<PixelBuffer>,
    selection: Option<Selection>,
}

impl ToolController {
    pub fn new(state: ToolState) -> Self {
        Self {
            state,
            gesture: GestureState::Idle,
            preview: None,
            selection: None,
        }
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.gesture, GestureState::Dragging(_))
    }

    /// Uncommitted shape / selection outline, sized like the canvas.
    pub fn preview(&self) -> Option<&PixelBuffer> {
        self.preview.as_ref()
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    /// Switch tools. An in-flight gesture keeps the tool it started with.
    pub fn select_tool(&mut self, tool: Tool) {
        self.state.selected = tool;
    }

    /// Drop any in-flight gesture without touching pixels.
    pub fn reset(&mut self) {
        self.gesture = GestureState::Idle;
        self.preview = None;
    }

    pub fn handle(&mut self, stack: &mut LayerStack, event: PointerEvent) -> GestureOutcome {
        match event {
            PointerEvent::Down { point, modifier } => self.pointer_down(stack, point, modifier),
            PointerEvent::Move { point } => self.pointer_move(stack, point),
            PointerEvent::Up { point } => self.finish(stack, Some(point)),
            PointerEvent::Leave => self.finish(stack, None),
        }
    }

    fn pointer_down(&mut self, stack: &mut LayerStack, point: Point, modifier: bool) -> GestureOutcome {
        if self.is_dragging() {
            tracing::debug!("Pointer down while dragging; ignoring");
            return GestureOutcome::Ignored;
        }
        let tool = self.state.selected;

        let Some(layer) = stack.active_layer() else {
            tracing::debug!("No active layer; {:?} ignored", tool);
            return GestureOutcome::Ignored;
        };
        if !layer.is_editable() {
            tracing::debug!("{} is locked or hidden; {:?} ignored", layer.id(), tool);
            return GestureOutcome::Ignored;
        }
        let layer_id = layer.id();

        if matches!(tool, Tool::Clone | Tool::Healing) {
            if modifier {
                self.state.clone_source = Some(point);
                tracing::debug!("Clone source set at ({}, {})", point.x, point.y);
                return GestureOutcome::SourceSet;
            }
            if self.state.clone_source.is_none() {
                tracing::debug!("{:?} without a source; ignored", tool);
                return GestureOutcome::Ignored;
            }
        }

        let origin = matches!(tool, Tool::Clone | Tool::Healing).then(|| layer.buffer().clone());
        let mut gesture = Gesture {
            tool,
            layer: layer_id,
            start: point,
            last: point,
            path: vec![point],
            origin,
            changed: false,
        };

        let alpha = self.state.alpha();
        let seed = (point.x >= 0.0 && point.y >= 0.0).then(|| (point.x.floor() as u32, point.y.floor() as u32));

        match tool {
            Tool::Brush | Tool::Pen | Tool::Eraser => {
                let paint = if tool == Tool::Eraser {
                    Paint::erase(alpha)
                } else {
                    Paint::solid(self.state.color).with_alpha(alpha)
                };
                let mask = self.selection.as_ref().map(|s| s.mask());
                if let Some(pixels) = stack.pixels_mut(layer_id) {
                    gesture.changed |= pixels.fill_circle(point, self.state.brush_size / 2.0, paint, mask);
                }
            }
            Tool::Clone | Tool::Healing => {
                let mask = self.selection.as_ref().map(|s| s.mask());
                if let Some(pixels) = stack.pixels_mut(layer_id) {
                    let stamped = self.stamp_clone(pixels, &gesture, point, mask);
                    gesture.changed |= stamped;
                }
            }
            Tool::PaintBucket => {
                let region = seed.and_then(|(x, y)| {
                    let buffer = stack.get(layer_id)?.buffer();
                    fill::flood_region(buffer, x, y, self.state.tolerance)
                });
                let mask = self.selection.as_ref().map(|s| s.mask());
                if let Some(region) = region {
                    if let Some(pixels) = stack.pixels_mut(layer_id) {
                        let paint = Paint::solid(self.state.color).with_alpha(alpha);
                        gesture.changed |= fill::fill_region(pixels, &region, paint, mask);
                    }
                }
            }
            Tool::MagicWand => {
                let region = seed.and_then(|(x, y)| {
                    let buffer = stack.get(layer_id)?.buffer();
                    fill::flood_region(buffer, x, y, self.state.tolerance)
                });
                self.selection = region.map(|m| Selection::from_mask(m, self.state.feather_radius));
            }
            Tool::Rectangle
            | Tool::Circle
            | Tool::Line
            | Tool::Arrow
            | Tool::Triangle
            | Tool::Select
            | Tool::Lasso => {
                let (w, h) = stack.dimensions();
                self.preview = PixelBuffer::new(w, h).ok();
            }
        }

        tracing::debug!("{:?} gesture started on {}", tool, layer_id);
        self.gesture = GestureState::Dragging(gesture);
        GestureOutcome::Started
    }

    fn pointer_move(&mut self, stack: &mut LayerStack, point: Point) -> GestureOutcome {
        let GestureState::Dragging(mut gesture) = std::mem::replace(&mut self.gesture, GestureState::Idle) else {
            return GestureOutcome::Ignored;
        };
        self.apply_move(stack, &mut gesture, point);
        gesture.last = point;
        self.gesture = GestureState::Dragging(gesture);
        GestureOutcome::InProgress
    }

    fn apply_move(&mut self, stack: &mut LayerStack, gesture: &mut Gesture, point: Point) {
        let editable = stack.get(gesture.layer).map(|l| l.is_editable()).unwrap_or(false);
        if !editable {
            tracing::debug!("{} no longer editable; move ignored", gesture.layer);
            return;
        }
        let alpha = self.state.alpha();

        match gesture.tool {
            Tool::Brush | Tool::Pen | Tool::Eraser => {
                let paint = if gesture.tool == Tool::Eraser {
                    Paint::erase(alpha)
                } else {
                    Paint::solid(self.state.color).with_alpha(alpha)
                };
                let mask = self.selection.as_ref().map(|s| s.mask());
                if let Some(pixels) = stack.pixels_mut(gesture.layer) {
                    gesture.changed |= pixels.stroke_polyline(
                        &[gesture.last, point],
                        false,
                        self.state.brush_size,
                        paint,
                        None,
                        mask,
                    );
                }
            }
            Tool::Clone | Tool::Healing => {
                let mask = self.selection.as_ref().map(|s| s.mask());
                if let Some(pixels) = stack.pixels_mut(gesture.layer) {
                    let stamped = self.stamp_clone(pixels, gesture, point, mask);
                    gesture.changed |= stamped;
                }
            }
            Tool::Rectangle | Tool::Circle | Tool::Line | Tool::Arrow | Tool::Triangle => {
                if let (Some(kind), Some(preview)) = (gesture.tool.shape(), self.preview.as_mut()) {
                    preview.clear();
                    let paths = shapes::outline(kind, gesture.start, point, self.state.brush_size);
                    let paint = Paint::solid(self.state.color).with_alpha(shapes::PREVIEW_ALPHA);
                    shapes::draw(preview, &paths, self.state.brush_size, paint, Some(shapes::PREVIEW_DASH), None);
                }
            }
            Tool::Select => {
                if let Some(preview) = self.preview.as_mut() {
                    preview.clear();
                    let paths = shapes::outline(ShapeKind::Rectangle, gesture.start, point, 1.0);
                    let paint = Paint::solid(Rgba([0, 0, 0, 255])).with_alpha(shapes::PREVIEW_ALPHA);
                    shapes::draw(preview, &paths, 1.0, paint, Some(shapes::PREVIEW_DASH), None);
                }
            }
            Tool::Lasso => {
                gesture.path.push(point);
                if let Some(preview) = self.preview.as_mut() {
                    preview.clear();
                    let paint = Paint::solid(Rgba([0, 0, 0, 255])).with_alpha(shapes::PREVIEW_ALPHA);
                    preview.stroke_polyline(&gesture.path, false, 1.0, paint, Some(shapes::PREVIEW_DASH), None);
                }
            }
            Tool::PaintBucket | Tool::MagicWand => {}
        }
    }

    fn finish(&mut self, stack: &mut LayerStack, end: Option<Point>) -> GestureOutcome {
        let GestureState::Dragging(mut gesture) = std::mem::replace(&mut self.gesture, GestureState::Idle) else {
            return GestureOutcome::Ignored;
        };
        self.preview = None;
        let end = end.unwrap_or(gesture.last);
        let editable = stack.get(gesture.layer).map(|l| l.is_editable()).unwrap_or(false);
        let (w, h) = stack.dimensions();
        let feather = self.state.feather_radius;

        match gesture.tool {
            tool if tool.shape().is_some() && editable => {
                if let Some(kind) = tool.shape() {
                    let paths = shapes::outline(kind, gesture.start, end, self.state.brush_size);
                    let paint = Paint::solid(self.state.color);
                    let mask = self.selection.as_ref().map(|s| s.mask());
                    if let Some(pixels) = stack.pixels_mut(gesture.layer) {
                        gesture.changed |= shapes::draw(pixels, &paths, self.state.brush_size, paint, None, mask);
                    }
                }
            }
            Tool::Select => {
                self.selection = Selection::rectangle(w, h, gesture.start, end, feather);
            }
            Tool::Lasso => {
                if gesture.path.last() != Some(&end) {
                    gesture.path.push(end);
                }
                self.selection = Selection::lasso(w, h, &gesture.path, feather);
            }
            _ => {}
        }

        tracing::debug!(
            "{:?} gesture finished on {} (changed: {})",
            gesture.tool,
            gesture.layer,
            gesture.changed
        );
        GestureOutcome::Finished {
            tool: gesture.tool,
            layer: gesture.layer,
            changed: gesture.changed,
        }
    }

    /// Clone and healing sample at the source shifted by the pointer's
    /// movement since the drag began (`source + (current - start)`), so the
    /// source point itself lands at the drag start, not at the drag end.
    fn stamp_clone(
        &self,
        pixels: &mut PixelBuffer,
        gesture: &Gesture,
        at: Point,
        mask: Option<&image::GrayImage>,
    ) -> bool {
        let (Some(source), Some(origin)) = (self.state.clone_source, gesture.origin.as_ref()) else {
            return false;
        };
        let from = clone::source_for(source, gesture.start, at);
        let size = self.state.stamp_size();
        if gesture.tool == Tool::Healing {
            clone::heal(pixels, origin, from, at, size, mask)
        } else {
            clone::stamp(pixels, origin, from, at, size, mask)
        }
    }
}

impl Default for ToolController {
    fn default() -> Self {
        Self::new(ToolState::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerKind;

    fn canvas() -> (LayerStack, LayerId, LayerId) {
        let mut stack = LayerStack::new(200, 200);
        let bg = stack.create_layer(LayerKind::Image, "bg").unwrap();
        let ink = stack.create_layer(LayerKind::Drawing, "ink").unwrap();
        (stack, bg, ink)
    }

    fn alpha_at(stack: &LayerStack, id: LayerId, x: u32, y: u32) -> u8 {
        stack.get(id).unwrap().buffer().pixel(x, y).unwrap()[3]
    }

    fn drag(tools: &mut ToolController, stack: &mut LayerStack, pts: &[(f32, f32)]) -> GestureOutcome {
        let (x, y) = pts[0];
        tools.handle(stack, PointerEvent::Down { point: Point::new(x, y), modifier: false });
        for &(x, y) in &pts[1..] {
            tools.handle(stack, PointerEvent::Move { point: Point::new(x, y) });
        }
        let (x, y) = *pts.last().unwrap();
        tools.handle(stack, PointerEvent::Up { point: Point::new(x, y) })
    }

    #[test]
    fn test_brush_stroke_paints_along_segment() {
        let (mut stack, _, ink) = canvas();
        let mut tools = ToolController::default();
        let out = drag(&mut tools, &mut stack, &[(100.0, 100.0), (200.0, 100.0)]);
        assert!(matches!(out, GestureOutcome::Finished { changed: true, .. }));
        assert!(alpha_at(&stack, ink, 150, 100) > 0);
        assert_eq!(alpha_at(&stack, ink, 150, 150), 0);
        assert!(!tools.is_dragging());
    }

    #[test]
    fn test_locked_or_hidden_layer_is_ignored() {
        let (mut stack, _, ink) = canvas();
        let mut tools = ToolController::default();
        stack.layer_mut(ink).unwrap().locked = true;
        let down = tools.handle(&mut stack, PointerEvent::Down { point: Point::new(10.0, 10.0), modifier: false });
        assert_eq!(down, GestureOutcome::Ignored);
        assert_eq!(alpha_at(&stack, ink, 10, 10), 0);

        stack.layer_mut(ink).unwrap().locked = false;
        stack.layer_mut(ink).unwrap().visible = false;
        let down = tools.handle(&mut stack, PointerEvent::Down { point: Point::new(10.0, 10.0), modifier: false });
        assert_eq!(down, GestureOutcome::Ignored);
    }

    #[test]
    fn test_eraser_clears_to_zero_alpha() {
        let (mut stack, bg, _) = canvas();
        stack.set_active(bg);
        stack.pixels_mut(bg).unwrap().fill_rect(0, 0, 200, 200, Rgba([10, 20, 30, 255]));
        let mut tools = ToolController::default();
        tools.select_tool(Tool::Eraser);
        drag(&mut tools, &mut stack, &[(50.0, 50.0), (80.0, 50.0)]);
        assert_eq!(alpha_at(&stack, bg, 65, 50), 0);
        assert_eq!(alpha_at(&stack, bg, 65, 90), 255);
    }

    #[test]
    fn test_shape_preview_then_commit() {
        let (mut stack, _, ink) = canvas();
        let mut tools = ToolController::default();
        tools.select_tool(Tool::Line);
        tools.state.brush_size = 4.0;
        tools.handle(&mut stack, PointerEvent::Down { point: Point::new(20.0, 20.0), modifier: false });
        tools.handle(&mut stack, PointerEvent::Move { point: Point::new(120.0, 20.0) });
        assert!(tools.preview().is_some());
        assert_eq!(alpha_at(&stack, ink, 21, 20), 0, "preview must not touch the layer");

        let out = tools.handle(&mut stack, PointerEvent::Up { point: Point::new(120.0, 20.0) });
        assert!(matches!(out, GestureOutcome::Finished { changed: true, .. }));
        assert!(tools.preview().is_none());
        assert_eq!(alpha_at(&stack, ink, 70, 20), 255);
    }

    #[test]
    fn test_pointer_leave_finalizes_gesture() {
        let (mut stack, _, ink) = canvas();
        let mut tools = ToolController::default();
        tools.select_tool(Tool::Rectangle);
        tools.handle(&mut stack, PointerEvent::Down { point: Point::new(10.0, 10.0), modifier: false });
        tools.handle(&mut stack, PointerEvent::Move { point: Point::new(50.0, 50.0) });
        let out = tools.handle(&mut stack, PointerEvent::Leave);
        assert!(matches!(out, GestureOutcome::Finished { .. }));
        assert!(!tools.is_dragging());
        assert!(alpha_at(&stack, ink, 30, 10) > 0);
    }

    #[test]
    fn test_clone_copies_offset_blocks() {
        let (mut stack, bg, _) = canvas();
        stack.set_active(bg);
        {
            let px = stack.pixels_mut(bg).unwrap();
            for y in 0..200 {
                for x in 0..200 {
                    px.put_pixel(x, y, Rgba([x as u8, y as u8, 99, 255]));
                }
            }
        }
        let original = stack.get(bg).unwrap().buffer().clone();
        let mut tools = ToolController::default();
        tools.select_tool(Tool::Clone);
        tools.state.brush_size = 6.0;

        let set = tools.handle(&mut stack, PointerEvent::Down { point: Point::new(10.0, 10.0), modifier: true });
        assert_eq!(set, GestureOutcome::SourceSet);
        assert_eq!(stack.get(bg).unwrap().buffer(), &original, "modifier-click must not paint");

        // Source (10,10), drag (50,50) -> (60,60). The sample point follows
        // the drag delta, so (60,60) receives the block around (20,20) and
        // the block around (10,10) lands at (50,50).
        drag(&mut tools, &mut stack, &[(50.0, 50.0), (60.0, 60.0)]);
        let now = stack.get(bg).unwrap().buffer();
        for j in 0..6 {
            for i in 0..6 {
                // At the drag start the block around the source itself lands.
                assert_eq!(now.pixel(47 + i, 47 + j), original.pixel(7 + i, 7 + j));
                // Ten pixels later the source has moved by the same delta.
                assert_eq!(now.pixel(57 + i, 57 + j), original.pixel(17 + i, 17 + j));
            }
        }
    }

    #[test]
    fn test_clone_without_source_is_noop() {
        let (mut stack, _, _) = canvas();
        let mut tools = ToolController::default();
        tools.select_tool(Tool::Clone);
        let out = tools.handle(&mut stack, PointerEvent::Down { point: Point::new(5.0, 5.0), modifier: false });
        assert_eq!(out, GestureOutcome::Ignored);
        assert!(!tools.is_dragging());
    }

    #[test]
    fn test_selection_clips_brush() {
        let (mut stack, _, ink) = canvas();
        let mut tools = ToolController::default();
        tools.select_tool(Tool::Select);
        let out = drag(&mut tools, &mut stack, &[(0.0, 0.0), (100.0, 200.0)]);
        assert!(matches!(out, GestureOutcome::Finished { changed: false, .. }));
        assert!(tools.selection().is_some());

        tools.select_tool(Tool::Brush);
        drag(&mut tools, &mut stack, &[(50.0, 100.0), (150.0, 100.0)]);
        assert!(alpha_at(&stack, ink, 75, 100) > 0);
        assert_eq!(alpha_at(&stack, ink, 125, 100), 0);
    }

    #[test]
    fn test_paint_bucket_and_magic_wand() {
        let (mut stack, _, ink) = canvas();
        stack.pixels_mut(ink).unwrap().fill_rect(0, 0, 100, 200, Rgba([255, 255, 255, 255]));
        let mut tools = ToolController::default();
        tools.select_tool(Tool::MagicWand);
        drag(&mut tools, &mut stack, &[(10.0, 10.0)]);
        let area = tools.selection().map(|s| s.area());
        assert_eq!(area, Some(100 * 200));

        tools.clear_selection();
        tools.select_tool(Tool::PaintBucket);
        tools.state.color = Rgba([0, 128, 0, 255]);
        let out = drag(&mut tools, &mut stack, &[(150.0, 10.0)]);
        assert!(matches!(out, GestureOutcome::Finished { changed: true, .. }));
        let px = stack.get(ink).unwrap().buffer().pixel(150, 10).unwrap();
        assert_eq!(px, Rgba([0, 128, 0, 255]));
        assert_eq!(stack.get(ink).unwrap().buffer().pixel(10, 10).unwrap(), Rgba([255, 255, 255, 255]));
    }
}
