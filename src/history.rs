use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::buffer::PixelBuffer;
use crate::layer::{BlendMode, Layer, LayerId, LayerKind};
use crate::stack::LayerStack;

pub const DEFAULT_HISTORY_LIMIT: usize = 30;

/// Frozen copy of one layer. Pixels are shared between consecutive entries
/// while the layer's revision is unchanged.
#[derive(Clone)]
struct LayerSnapshot {
    id: LayerId,
    name: String,
    kind: LayerKind,
    visible: bool,
    locked: bool,
    opacity: u8,
    blend_mode: BlendMode,
    z_index: u32,
    revision: u64,
    pixels: Arc<PixelBuffer>,
}

impl LayerSnapshot {
    fn to_layer(&self) -> Layer {
        let mut layer = Layer::new(self.id, self.kind, self.name.clone(), (*self.pixels).clone());
        layer.visible = self.visible;
        layer.locked = self.locked;
        layer.set_opacity(self.opacity);
        layer.blend_mode = self.blend_mode;
        layer.z_index = self.z_index;
        layer.revision = self.revision;
        layer
    }
}

/// Whole-stack state captured after a committed action.
#[derive(Clone)]
pub struct HistoryEntry {
    layers: Vec<LayerSnapshot>,
    active: Option<LayerId>,
    dimensions: (u32, u32),
    pub action: String,
    pub timestamp_ms: u64,
}

impl HistoryEntry {
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Pixels of one layer as they were when this entry was taken.
    pub fn layer_pixels(&self, id: LayerId) -> Option<&PixelBuffer> {
        self.layers.iter().find(|l| l.id == id).map(|l| l.pixels.as_ref())
    }
}

/// Bounded undo/redo list. `entries[current]` always mirrors the live stack
/// after a snapshot, undo or redo; the oldest entry is evicted once the
/// limit is reached.
pub struct HistoryManager {
    entries: VecDeque<HistoryEntry>,
    current: usize,
    limit: usize,
    evicted: u64,
}

impl HistoryManager {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            entries: VecDeque::with_capacity(limit),
            current: 0,
            limit,
            evicted: 0,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Entries dropped so far to honour the limit.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn can_undo(&self) -> bool {
        !self.entries.is_empty() && self.current > 0
    }

    pub fn can_redo(&self) -> bool {
        self.current + 1 < self.entries.len()
    }

    pub fn current(&self) -> Option<&HistoryEntry> {
        self.entries.get(self.current)
    }

    /// Record the stack as it is now. Anything beyond the current position
    /// (the redo branch) is discarded first.
    pub fn snapshot(&mut self, stack: &LayerStack, action: &str) {
        if !self.entries.is_empty() {
            self.entries.truncate(self.current + 1);
        }

        let previous = self.entries.back();
        let mut layers: Vec<LayerSnapshot> = stack
            .layers()
            .map(|layer| {
                let reused = previous.and_then(|entry| {
                    entry
                        .layers
                        .iter()
                        .find(|s| s.id == layer.id() && s.revision == layer.revision())
                        .map(|s| Arc::clone(&s.pixels))
                });
                let info = layer.info();
                LayerSnapshot {
                    id: info.id,
                    name: info.name,
                    kind: info.kind,
                    visible: info.visible,
                    locked: info.locked,
                    opacity: info.opacity,
                    blend_mode: info.blend_mode,
                    z_index: info.z_index,
                    revision: layer.revision(),
                    pixels: reused.unwrap_or_else(|| Arc::new(layer.buffer().clone())),
                }
            })
            .collect();
        layers.sort_by_key(|l| l.z_index);

        self.entries.push_back(HistoryEntry {
            layers,
            active: stack.active_layer_id(),
            dimensions: stack.dimensions(),
            action: action.to_string(),
            timestamp_ms: now_ms(),
        });

        while self.entries.len() > self.limit {
            self.entries.pop_front();
            self.evicted += 1;
            tracing::debug!("History full, evicted oldest entry ({} total)", self.evicted);
        }
        self.current = self.entries.len() - 1;
        tracing::debug!(
            "History snapshot '{}' ({}/{})",
            action,
            self.entries.len(),
            self.limit
        );
    }

    /// Step back one entry and restore it into `stack`.
    pub fn undo(&mut self, stack: &mut LayerStack) -> bool {
        if !self.can_undo() {
            tracing::debug!("Undo: nothing to undo");
            return false;
        }
        self.current -= 1;
        self.restore_current(stack);
        true
    }

    /// Step forward one entry and restore it into `stack`.
    pub fn redo(&mut self, stack: &mut LayerStack) -> bool {
        if !self.can_redo() {
            tracing::debug!("Redo: nothing to redo");
            return false;
        }
        self.current += 1;
        self.restore_current(stack);
        true
    }

    /// Drop everything and start over from the given baseline.
    pub fn reset(&mut self, stack: &LayerStack, action: &str) {
        self.entries.clear();
        self.current = 0;
        self.snapshot(stack, action);
    }

    fn restore_current(&self, stack: &mut LayerStack) {
        let Some(entry) = self.entries.get(self.current) else {
            return;
        };
        let layers = entry.layers.iter().map(LayerSnapshot::to_layer).collect();
        stack.restore(entry.dimensions, layers, entry.active);
        tracing::debug!(
            "Restored history entry {} '{}'",
            self.current,
            entry.action
        );
    }
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn stack_with_layer() -> (LayerStack, LayerId) {
        let mut stack = LayerStack::new(4, 4);
        let id = stack.create_layer(LayerKind::Drawing, "paint").unwrap();
        (stack, id)
    }

    fn paint(stack: &mut LayerStack, id: LayerId, value: u8) {
        stack.pixels_mut(id).unwrap().put_pixel(0, 0, Rgba([value, 0, 0, 255]));
    }

    fn red(stack: &LayerStack, id: LayerId) -> u8 {
        stack.get(id).unwrap().buffer().pixel(0, 0).unwrap()[0]
    }

    #[test]
    fn test_undo_redo_round_trip() {
        let (mut stack, id) = stack_with_layer();
        let mut history = HistoryManager::new(10);
        history.snapshot(&stack, "init");
        paint(&mut stack, id, 10);
        history.snapshot(&stack, "stroke");
        let committed = stack.get(id).unwrap().buffer().clone();

        assert!(history.undo(&mut stack));
        assert_eq!(stack.get(id).unwrap().buffer().pixel(0, 0).unwrap()[3], 0);
        assert!(history.redo(&mut stack));
        assert_eq!(stack.get(id).unwrap().buffer(), &committed);
    }

    #[test]
    fn test_undo_at_start_is_noop() {
        let (mut stack, _) = stack_with_layer();
        let mut history = HistoryManager::new(10);
        assert!(!history.undo(&mut stack));
        history.snapshot(&stack, "init");
        assert!(!history.can_undo());
        assert!(!history.undo(&mut stack));
        assert!(!history.redo(&mut stack));
    }

    #[test]
    fn test_new_snapshot_truncates_redo_branch() {
        let (mut stack, id) = stack_with_layer();
        let mut history = HistoryManager::new(10);
        history.snapshot(&stack, "init");
        paint(&mut stack, id, 1);
        history.snapshot(&stack, "one");
        paint(&mut stack, id, 2);
        history.snapshot(&stack, "two");
        history.undo(&mut stack);
        assert!(history.can_redo());

        paint(&mut stack, id, 3);
        history.snapshot(&stack, "three");
        assert!(!history.can_redo());
        assert_eq!(history.len(), 3);
        history.undo(&mut stack);
        assert_eq!(red(&stack, id), 1);
    }

    #[test]
    fn test_cap_keeps_most_recent_entries() {
        let (mut stack, id) = stack_with_layer();
        let mut history = HistoryManager::new(20);
        for i in 1..=60u8 {
            paint(&mut stack, id, i);
            history.snapshot(&stack, "stroke");
        }
        assert_eq!(history.len(), 20);
        assert_eq!(history.current_index(), 19);
        assert_eq!(history.evicted(), 40);

        let mut undos = 0;
        while history.undo(&mut stack) {
            undos += 1;
        }
        assert_eq!(undos, 19);
        // Oldest reachable state is commit 41; commits 1..=40 are gone.
        assert_eq!(red(&stack, id), 41);
    }

    #[test]
    fn test_unchanged_layers_share_pixels() {
        let mut stack = LayerStack::new(4, 4);
        let still = stack.create_layer(LayerKind::Image, "still").unwrap();
        let busy = stack.create_layer(LayerKind::Drawing, "busy").unwrap();
        let mut history = HistoryManager::new(5);
        history.snapshot(&stack, "init");
        paint(&mut stack, busy, 9);
        history.snapshot(&stack, "stroke");

        let a = &history.entries[0];
        let b = &history.entries[1];
        let pick = |e: &HistoryEntry, id: LayerId| e.layers.iter().find(|l| l.id == id).unwrap().pixels.clone();
        assert!(Arc::ptr_eq(&pick(a, still), &pick(b, still)));
        assert!(!Arc::ptr_eq(&pick(a, busy), &pick(b, busy)));
    }

    #[test]
    fn test_undo_restores_deleted_layer() {
        let mut stack = LayerStack::new(4, 4);
        let a = stack.create_layer(LayerKind::Image, "a").unwrap();
        let b = stack.create_layer(LayerKind::Drawing, "b").unwrap();
        let mut history = HistoryManager::new(5);
        history.snapshot(&stack, "init");
        stack.delete_layer(b).unwrap();
        history.snapshot(&stack, "delete");
        history.undo(&mut stack);
        assert_eq!(stack.ordered_ids(), vec![a, b]);
        assert_eq!(stack.active_layer_id(), Some(b));
    }
}
