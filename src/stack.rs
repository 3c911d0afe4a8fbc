use std::collections::HashMap;

use crate::buffer::PixelBuffer;
use crate::compositor;
use crate::error::EditorError;
use crate::layer::{Layer, LayerId, LayerKind};

/// Ordered set of layers; the single source of truth for editable content.
///
/// Layers live in an id-keyed arena. Paint order is the `z_index`, which is
/// kept contiguous (`0..len`) after every structural operation.
pub struct LayerStack {
    width: u32,
    height: u32,
    layers: HashMap<LayerId, Layer>,
    active: Option<LayerId>,
    next_id: u64,
    next_revision: u64,
}

impl LayerStack {
    /// Empty stack whose layers will be `width`×`height`.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            layers: HashMap::new(),
            active: None,
            next_id: 1,
            next_revision: 1,
        }
    }

    /// Stack seeded with a background layer; its size becomes canonical.
    pub fn with_background(name: &str, buffer: PixelBuffer) -> Self {
        let (width, height) = buffer.dimensions();
        let mut stack = Self::new(width, height);
        stack.insert_layer(LayerKind::Image, name.to_string(), buffer, None);
        stack
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(&id)
    }

    /// Metadata access. Pixel writes must go through [`Self::pixels_mut`].
    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.get_mut(&id)
    }

    /// Mutable pixels of a layer; marks the layer's buffer as changed.
    pub fn pixels_mut(&mut self, id: LayerId) -> Option<&mut PixelBuffer> {
        let revision = self.bump_revision();
        let layer = self.layers.get_mut(&id)?;
        layer.revision = revision;
        Some(layer.buffer_mut())
    }

    /// Layers bottom to top.
    pub fn ordered(&self) -> Vec<&Layer> {
        let mut layers: Vec<&Layer> = self.layers.values().collect();
        layers.sort_by_key(|l| l.z_index);
        layers
    }

    pub fn ordered_ids(&self) -> Vec<LayerId> {
        self.ordered().into_iter().map(|l| l.id()).collect()
    }

    pub fn active_layer_id(&self) -> Option<LayerId> {
        self.active
    }

    pub fn active_layer(&self) -> Option<&Layer> {
        self.active.and_then(|id| self.layers.get(&id))
    }

    /// Update the active layer. Returns false (and changes nothing) for an
    /// unknown id.
    pub fn set_active(&mut self, id: LayerId) -> bool {
        if self.layers.contains_key(&id) {
            self.active = Some(id);
            true
        } else {
            false
        }
    }

    /// Allocate a transparent layer on top of the stack and make it active.
    pub fn create_layer(&mut self, kind: LayerKind, name: &str) -> Result<LayerId, EditorError> {
        let buffer = PixelBuffer::new(self.width, self.height)?;
        Ok(self.insert_layer(kind, name.to_string(), buffer, None))
    }

    /// Add a layer from existing pixels, resampled to the canonical size.
    pub fn create_layer_from_buffer(
        &mut self,
        kind: LayerKind,
        name: &str,
        buffer: PixelBuffer,
    ) -> Result<LayerId, EditorError> {
        let buffer = buffer.resized(self.width, self.height)?;
        Ok(self.insert_layer(kind, name.to_string(), buffer, None))
    }

    /// Swap a layer's pixels for new ones, resampled to the canonical size.
    pub fn replace_pixels(&mut self, id: LayerId, buffer: PixelBuffer) -> Result<(), EditorError> {
        if !self.layers.contains_key(&id) {
            return Err(EditorError::UnknownLayer(id));
        }
        let buffer = buffer.resized(self.width, self.height)?;
        let revision = self.bump_revision();
        if let Some(layer) = self.layers.get_mut(&id) {
            layer.replace_buffer(buffer);
            layer.revision = revision;
        }
        Ok(())
    }

    pub fn delete_layer(&mut self, id: LayerId) -> Result<(), EditorError> {
        if !self.layers.contains_key(&id) {
            return Err(EditorError::UnknownLayer(id));
        }
        if self.layers.len() <= 1 {
            tracing::warn!("Refusing to delete {}: it is the last layer", id);
            return Err(EditorError::LastLayer);
        }

        let mut order = self.ordered_ids();
        order.retain(|l| *l != id);
        self.layers.remove(&id);
        self.renumber(&order);

        if self.active == Some(id) {
            self.active = order.last().copied();
        }
        tracing::info!("Deleted {} ({} layers left)", id, self.layers.len());
        Ok(())
    }

    /// Deep-copy a layer and place the copy directly above the source.
    pub fn duplicate_layer(&mut self, id: LayerId) -> Result<LayerId, EditorError> {
        let source = self.layers.get(&id).ok_or(EditorError::UnknownLayer(id))?;
        let buffer = source.buffer().clone();
        let name = format!("{} copy", source.name);
        let (kind, visible, locked, opacity, blend) = (
            source.kind,
            source.visible,
            source.locked,
            source.opacity(),
            source.blend_mode,
        );
        let position = source.z_index as usize + 1;

        let copy = self.insert_layer(kind, name, buffer, Some(position));
        if let Some(layer) = self.layers.get_mut(&copy) {
            layer.visible = visible;
            layer.locked = locked;
            layer.set_opacity(opacity);
            layer.blend_mode = blend;
        }
        Ok(copy)
    }

    /// Flatten the named layers (respecting their opacity and blend modes)
    /// into one new layer at the lowest merged position.
    pub fn merge_layers(&mut self, ids: &[LayerId]) -> Result<LayerId, EditorError> {
        let mut wanted: Vec<LayerId> = Vec::with_capacity(ids.len());
        for id in ids {
            if !self.layers.contains_key(id) {
                return Err(EditorError::UnknownLayer(*id));
            }
            if !wanted.contains(id) {
                wanted.push(*id);
            }
        }
        if wanted.len() < 2 {
            return Err(EditorError::MergeTooFew(wanted.len()));
        }

        let mut merged = PixelBuffer::new(self.width, self.height)?;
        let sources: Vec<&Layer> = self
            .ordered()
            .into_iter()
            .filter(|l| wanted.contains(&l.id()))
            .collect();
        let lowest = sources[0].z_index as usize;
        let kind = sources[0].kind;
        compositor::composite_layers(sources.into_iter(), &mut merged);

        let mut order = self.ordered_ids();
        order.retain(|l| !wanted.contains(l));
        for id in &wanted {
            self.layers.remove(id);
        }
        self.renumber(&order);

        let position = lowest.min(order.len());
        let id = self.insert_layer(kind, "Merged layer".to_string(), merged, Some(position));
        tracing::info!("Merged {} layers into {}", wanted.len(), id);
        Ok(id)
    }

    /// Move a layer to `target_index` in bottom-to-top order (clamped).
    pub fn reorder(&mut self, id: LayerId, target_index: usize) -> Result<(), EditorError> {
        if !self.layers.contains_key(&id) {
            return Err(EditorError::UnknownLayer(id));
        }
        let mut order = self.ordered_ids();
        order.retain(|l| *l != id);
        let target = target_index.min(order.len());
        order.insert(target, id);
        self.renumber(&order);
        Ok(())
    }

    /// Resample every layer to a new canonical size.
    pub fn resize_canvas(&mut self, width: u32, height: u32) -> Result<(), EditorError> {
        let mut resized = Vec::with_capacity(self.layers.len());
        for (id, layer) in &self.layers {
            resized.push((*id, layer.buffer().resized(width, height)?));
        }
        for (id, buffer) in resized {
            let revision = self.bump_revision();
            if let Some(layer) = self.layers.get_mut(&id) {
                layer.replace_buffer(buffer);
                layer.revision = revision;
            }
        }
        tracing::info!(
            "Canvas resized {}x{} -> {}x{}",
            self.width,
            self.height,
            width,
            height
        );
        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Every layer, in no particular order.
    pub(crate) fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.values()
    }

    /// Replace all content with previously captured layers.
    pub(crate) fn restore(
        &mut self,
        dimensions: (u32, u32),
        layers: Vec<Layer>,
        active: Option<LayerId>,
    ) {
        self.width = dimensions.0;
        self.height = dimensions.1;
        self.layers = layers.into_iter().map(|l| (l.id(), l)).collect();
        self.active = active.filter(|id| self.layers.contains_key(id));
        if self.active.is_none() {
            self.active = self.ordered_ids().last().copied();
        }
    }

    fn insert_layer(
        &mut self,
        kind: LayerKind,
        name: String,
        buffer: PixelBuffer,
        position: Option<usize>,
    ) -> LayerId {
        let id = LayerId(self.next_id);
        self.next_id += 1;
        let mut layer = Layer::new(id, kind, name, buffer);
        layer.revision = self.bump_revision();
        self.layers.insert(id, layer);

        let mut order = self.ordered_ids();
        order.retain(|l| *l != id);
        let position = position.unwrap_or(order.len()).min(order.len());
        order.insert(position, id);
        self.renumber(&order);

        self.active = Some(id);
        tracing::debug!("Created {} at z {}", id, position);
        id
    }

    fn renumber(&mut self, order: &[LayerId]) {
        for (z, id) in order.iter().enumerate() {
            if let Some(layer) = self.layers.get_mut(id) {
                layer.z_index = z as u32;
            }
        }
    }

    fn bump_revision(&mut self) -> u64 {
        let revision = self.next_revision;
        self.next_revision += 1;
        revision
    }
}
