//! Seed-image loading: scheme dispatch, proxy routing, bounded retry and the
//! placeholder used once retries are exhausted.

use base64::Engine as _;
use futures::future::BoxFuture;
use image::{Rgba, RgbaImage};
use std::time::Duration;

use crate::buffer::{Paint, PixelBuffer, Point};
use crate::config::LoaderConfig;
use crate::error::{EditorError, LoadError};

/// Produces the raw (still encoded) bytes behind a URL.
pub trait ImageFetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, LoadError>>;
}

/// Local paths and `file://` URLs.
pub struct FileFetcher;

impl ImageFetcher for FileFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, LoadError>> {
        Box::pin(async move {
            let path = url.strip_prefix("file://").unwrap_or(url);
            tokio::fs::read(path).await.map_err(|source| LoadError::Io {
                url: url.to_string(),
                source,
            })
        })
    }
}

/// `data:image/...;base64,<payload>` URLs.
pub struct DataUrlFetcher;

impl ImageFetcher for DataUrlFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, LoadError>> {
        Box::pin(async move { decode_data_url(url) })
    }
}

fn decode_data_url(url: &str) -> Result<Vec<u8>, LoadError> {
    let invalid = || LoadError::InvalidDataUrl(truncate(url));
    let rest = url.strip_prefix("data:").ok_or_else(invalid)?;
    let (header, payload) = rest.split_once(',').ok_or_else(invalid)?;
    if !header.ends_with(";base64") {
        return Err(invalid());
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|_| invalid())
}

fn truncate(url: &str) -> String {
    url.chars().take(48).collect()
}

/// Blocking `ureq` GETs run on the blocking pool.
#[derive(Clone)]
pub struct HttpFetcher {
    agent: ureq::Agent,
}

/// Upper bound on a downloaded seed image.
const MAX_IMAGE_BYTES: u64 = 64 * 1024 * 1024;

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self::with_agent(config.into())
    }

    pub fn with_agent(agent: ureq::Agent) -> Self {
        Self { agent }
    }
}

impl ImageFetcher for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, LoadError>> {
        let agent = self.agent.clone();
        let owned = url.to_string();
        Box::pin(async move {
            let joined = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, String> {
                let response = agent.get(&owned).call().map_err(|e| e.to_string())?;
                let mut body = response.into_body();
                body.with_config()
                    .limit(MAX_IMAGE_BYTES)
                    .read_to_vec()
                    .map_err(|e| e.to_string())
            })
            .await;
            match joined {
                Ok(Ok(bytes)) => Ok(bytes),
                Ok(Err(reason)) => Err(LoadError::Http {
                    url: truncate(url),
                    reason,
                }),
                Err(e) => Err(LoadError::Http {
                    url: truncate(url),
                    reason: e.to_string(),
                }),
            }
        })
    }
}

/// Routes a URL to the right fetcher by scheme. Without a remote fetcher
/// `http(s)` URLs are unsupported.
pub struct SchemeFetcher {
    file: FileFetcher,
    data: DataUrlFetcher,
    remote: Option<Box<dyn ImageFetcher>>,
}

impl SchemeFetcher {
    pub fn new() -> Self {
        Self {
            file: FileFetcher,
            data: DataUrlFetcher,
            remote: None,
        }
    }

    pub fn with_remote(remote: Box<dyn ImageFetcher>) -> Self {
        Self {
            remote: Some(remote),
            ..Self::new()
        }
    }
}

impl Default for SchemeFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageFetcher for SchemeFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, LoadError>> {
        if url.starts_with("data:") {
            return self.data.fetch(url);
        }
        if url.starts_with("http://") || url.starts_with("https://") {
            return match &self.remote {
                Some(remote) => remote.fetch(url),
                None => Box::pin(async move { Err(LoadError::UnsupportedScheme(url.to_string())) }),
            };
        }
        self.file.fetch(url)
    }
}

/// Origin (`scheme://host[:port]`) of an absolute http(s) URL.
fn origin_of(url: &str) -> Option<&str> {
    let scheme_end = url.find("://")? + 3;
    let scheme = &url[..scheme_end];
    if scheme != "http://" && scheme != "https://" {
        return None;
    }
    let host_end = url[scheme_end..]
        .find(['/', '?', '#'])
        .map(|i| scheme_end + i)
        .unwrap_or(url.len());
    Some(&url[..host_end])
}

/// Cross-origin http(s) images go through the proxy so the composite stays
/// exportable. Same-origin, `data:` and local URLs are returned unchanged.
pub fn route_through_proxy(url: &str, page_origin: Option<&str>, proxy_endpoint: Option<&str>) -> String {
    let (Some(page), Some(proxy)) = (page_origin, proxy_endpoint) else {
        return url.to_string();
    };
    match origin_of(url) {
        Some(origin) if !origin.eq_ignore_ascii_case(page.trim_end_matches('/')) => {
            let routed = format!("{}?url={}", resolve_endpoint(proxy, page), percent_encode(url));
            tracing::debug!("Routing {} through image proxy", origin);
            routed
        }
        _ => url.to_string(),
    }
}

/// A relative proxy endpoint lives on the page origin.
fn resolve_endpoint(endpoint: &str, page_origin: &str) -> String {
    if origin_of(endpoint).is_some() {
        return endpoint.to_string();
    }
    format!(
        "{}/{}",
        page_origin.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len() * 3);
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

pub fn decode_image(url: &str, bytes: &[u8]) -> Result<RgbaImage, LoadError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|e| LoadError::Decode {
            url: truncate(url),
            reason: e.to_string(),
        })
}

/// Fetch and decode with up to `max_retries` extra attempts, waiting `delay`
/// between them. Malformed URLs fail immediately.
pub async fn load_image_with_retry(
    fetcher: &dyn ImageFetcher,
    url: &str,
    max_retries: u32,
    delay: Duration,
) -> Result<RgbaImage, LoadError> {
    let attempts = max_retries + 1;
    let mut last = String::new();

    for attempt in 1..=attempts {
        let result = match fetcher.fetch(url).await {
            Ok(bytes) => decode_image(url, &bytes),
            Err(e) => Err(e),
        };
        match result {
            Ok(image) => {
                tracing::info!(
                    "Loaded seed image {}x{} (attempt {})",
                    image.width(),
                    image.height(),
                    attempt
                );
                return Ok(image);
            }
            Err(e @ (LoadError::UnsupportedScheme(_) | LoadError::InvalidDataUrl(_))) => return Err(e),
            Err(e) => {
                tracing::warn!("Image load attempt {}/{} failed: {}", attempt, attempts, e);
                last = e.to_string();
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(LoadError::Exhausted {
        url: truncate(url),
        attempts,
        last,
    })
}

/// Neutral gray surface with a crossed-box glyph, shown when the seed image
/// cannot be loaded.
pub fn placeholder(width: u32, height: u32) -> Result<PixelBuffer, EditorError> {
    let mut buffer = PixelBuffer::filled(width, height, Rgba([229, 229, 229, 255]))?;
    let (w, h) = (width as f32, height as f32);
    let side = w.min(h) * 0.25;
    let (x0, y0) = ((w - side) / 2.0, (h - side) / 2.0);
    let (x1, y1) = (x0 + side, y0 + side);
    let line = (side / 16.0).max(1.0);
    let ink = Paint::solid(Rgba([153, 153, 153, 255]));

    let frame = [
        Point::new(x0, y0),
        Point::new(x1, y0),
        Point::new(x1, y1),
        Point::new(x0, y1),
    ];
    buffer.stroke_polyline(&frame, true, line, ink, None, None);
    buffer.stroke_polyline(&[frame[0], frame[2]], false, line, ink, None, None);
    buffer.stroke_polyline(&[frame[1], frame[3]], false, line, ink, None, None);
    Ok(buffer)
}

/// How the seed image is obtained.
#[derive(Clone, Debug)]
pub struct LoadOptions {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub page_origin: Option<String>,
    pub proxy_endpoint: Option<String>,
    pub placeholder_size: (u32, u32),
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self::from(&LoaderConfig::default())
    }
}

impl From<&LoaderConfig> for LoadOptions {
    fn from(config: &LoaderConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            page_origin: config.page_origin.clone(),
            proxy_endpoint: config.proxy_endpoint.clone(),
            placeholder_size: (config.placeholder_width, config.placeholder_height),
        }
    }
}

/// Result of seeding: the background pixels and whether they are the real
/// image or the placeholder.
pub struct Seed {
    pub buffer: PixelBuffer,
    pub loaded: bool,
}

/// Load the seed image at its natural size, degrading to the placeholder.
/// Only fails if the placeholder itself cannot be allocated.
pub async fn load_seed(fetcher: &dyn ImageFetcher, url: &str, options: &LoadOptions) -> Result<Seed, EditorError> {
    let routed = route_through_proxy(url, options.page_origin.as_deref(), options.proxy_endpoint.as_deref());
    match load_image_with_retry(fetcher, &routed, options.max_retries, options.retry_delay).await {
        Ok(image) => match PixelBuffer::from_image(image) {
            Ok(buffer) => return Ok(Seed { buffer, loaded: true }),
            Err(e) => tracing::error!("Seed image unusable: {}", e),
        },
        Err(e) => tracing::warn!("Falling back to placeholder: {}", e),
    }
    let (w, h) = options.placeholder_size;
    Ok(Seed {
        buffer: placeholder(w, h)?,
        loaded: false,
    })
}
