use thiserror::Error;

use crate::layer::LayerId;

/// Failures surfaced by layer, buffer and session operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EditorError {
    #[error("cannot delete the last remaining layer")]
    LastLayer,

    #[error("no layer with id {0}")]
    UnknownLayer(LayerId),

    #[error("failed to allocate a {width}x{height} pixel buffer")]
    Allocation { width: u32, height: u32 },

    #[error("merge needs at least two existing layers, got {0}")]
    MergeTooFew(usize),

    #[error("failed to decode image: {0}")]
    Decode(String),
}

/// Failures while fetching or decoding the seed image.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("i/o error reading {url}: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode image from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("http request for {url} failed: {reason}")]
    Http { url: String, reason: String },

    #[error("no fetcher handles url scheme of {0}")]
    UnsupportedScheme(String),

    #[error("malformed data url: {0}")]
    InvalidDataUrl(String),

    #[error("gave up on {url} after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: String,
    },
}
