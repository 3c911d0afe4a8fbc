use serde::{Deserialize, Serialize};
use std::fmt;

use crate::buffer::PixelBuffer;

/// Stable layer identifier. Never reused within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(pub u64);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer-{}", self.0)
    }
}

/// Informational only; every kind stores plain RGBA pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayerKind {
    Image,
    #[default]
    Drawing,
    Text,
    Shape,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    SoftLight,
}

impl BlendMode {
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Overlay,
            BlendMode::SoftLight,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "normal",
            BlendMode::Multiply => "multiply",
            BlendMode::Screen => "screen",
            BlendMode::Overlay => "overlay",
            BlendMode::SoftLight => "soft-light",
        }
    }
}

pub struct Layer {
    id: LayerId,
    pub name: String,
    pub kind: LayerKind,
    pub visible: bool,
    pub locked: bool,
    opacity: u8,
    pub blend_mode: BlendMode,
    pub(crate) z_index: u32,
    /// Bumped from the stack's counter whenever pixels may have changed.
    pub(crate) revision: u64,
    buffer: PixelBuffer,
}

impl Layer {
    pub(crate) fn new(id: LayerId, kind: LayerKind, name: String, buffer: PixelBuffer) -> Self {
        Self {
            id,
            name,
            kind,
            visible: true,
            locked: false,
            opacity: 100,
            blend_mode: BlendMode::Normal,
            z_index: 0,
            revision: 0,
            buffer,
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn z_index(&self) -> u32 {
        self.z_index
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Opacity in percent, always 0..=100.
    pub fn opacity(&self) -> u8 {
        self.opacity
    }

    pub fn set_opacity(&mut self, opacity: u8) {
        self.opacity = opacity.min(100);
    }

    pub fn buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    /// Mutable pixel access; callers go through the stack so the revision
    /// is bumped.
    pub(crate) fn buffer_mut(&mut self) -> &mut PixelBuffer {
        &mut self.buffer
    }

    pub(crate) fn replace_buffer(&mut self, buffer: PixelBuffer) {
        self.buffer = buffer;
    }

    /// Whether tools may write into this layer.
    pub fn is_editable(&self) -> bool {
        self.visible && !self.locked
    }

    pub fn info(&self) -> LayerInfo {
        LayerInfo {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
            visible: self.visible,
            locked: self.locked,
            opacity: self.opacity,
            blend_mode: self.blend_mode,
            z_index: self.z_index,
            width: self.buffer.width(),
            height: self.buffer.height(),
        }
    }
}

/// Serializable metadata view of a layer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LayerInfo {
    pub id: LayerId,
    pub name: String,
    pub kind: LayerKind,
    pub visible: bool,
    pub locked: bool,
    pub opacity: u8,
    pub blend_mode: BlendMode,
    pub z_index: u32,
    pub width: u32,
    pub height: u32,
}
