//! Layered raster canvas editor: layer stack, blend-mode compositor, pointer
//! tools, bounded undo history and a resize-aware viewport.

pub mod buffer;
pub mod compositor;
pub mod config;
pub mod error;
pub mod history;
pub mod layer;
pub mod loader;
pub mod persistence;
pub mod session;
pub mod stack;
pub mod status;
pub mod tools;
pub mod viewport;

pub use error::{EditorError, LoadError};
pub use session::{apply_command, Command, EditorSession, Outcome};
