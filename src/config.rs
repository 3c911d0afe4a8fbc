use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::buffer::parse_hex_color;
use crate::history::DEFAULT_HISTORY_LIMIT;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub editor: EditorConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default = "default_status_port")]
    pub status_port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            status_port: default_status_port(),
            log_level: default_log_level(),
        }
    }
}

fn default_status_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize)]
pub struct EditorConfig {
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_brush_size")]
    pub brush_size: f32,
    #[serde(default = "default_opacity")]
    pub opacity: u8,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_tolerance")]
    pub tolerance: u8,
    #[serde(default)]
    pub feather_radius: f32,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            brush_size: default_brush_size(),
            opacity: default_opacity(),
            color: default_color(),
            tolerance: default_tolerance(),
            feather_radius: 0.0,
        }
    }
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_brush_size() -> f32 {
    10.0
}

fn default_opacity() -> u8 {
    100
}

fn default_color() -> String {
    "#000000".to_string()
}

fn default_tolerance() -> u8 {
    32
}

#[derive(Debug, Deserialize)]
pub struct LoaderConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Origin of the hosting page, e.g. `https://app.example.com`.
    #[serde(default)]
    pub page_origin: Option<String>,
    /// Proxy that cross-origin images are fetched through.
    #[serde(default)]
    pub proxy_endpoint: Option<String>,
    #[serde(default = "default_placeholder_width")]
    pub placeholder_width: u32,
    #[serde(default = "default_placeholder_height")]
    pub placeholder_height: u32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            page_origin: None,
            proxy_endpoint: None,
            placeholder_width: default_placeholder_width(),
            placeholder_height: default_placeholder_height(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_placeholder_width() -> u32 {
    800
}

fn default_placeholder_height() -> u32 {
    600
}

#[derive(Debug, Default, Deserialize)]
pub struct PersistenceConfig {
    /// JSON-lines file receiving one event per committed action.
    #[serde(default)]
    pub events_path: Option<PathBuf>,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let editor = &self.editor;
        if !(1..=500).contains(&editor.history_limit) {
            anyhow::bail!("editor.history_limit must be 1–500, got {}", editor.history_limit);
        }
        if !(editor.brush_size > 0.0 && editor.brush_size <= 1000.0) {
            anyhow::bail!("editor.brush_size must be > 0 and <= 1000");
        }
        if editor.opacity > 100 {
            anyhow::bail!("editor.opacity must be 0–100, got {}", editor.opacity);
        }
        if parse_hex_color(&editor.color).is_none() {
            anyhow::bail!("editor.color '{}' is not a #rrggbb or #rgb color", editor.color);
        }
        if !(0.0..=100.0).contains(&editor.feather_radius) {
            anyhow::bail!("editor.feather_radius must be 0–100");
        }

        let loader = &self.loader;
        if loader.max_retries > 10 {
            anyhow::bail!("loader.max_retries must be <= 10, got {}", loader.max_retries);
        }
        if loader.request_timeout_ms == 0 {
            anyhow::bail!("loader.request_timeout_ms must be > 0");
        }
        if loader.placeholder_width == 0 || loader.placeholder_height == 0 {
            anyhow::bail!("loader placeholder width and height must be > 0");
        }
        if loader.proxy_endpoint.is_some() && loader.page_origin.is_none() {
            anyhow::bail!("loader.proxy_endpoint requires loader.page_origin");
        }
        Ok(())
    }

    /// Tool defaults derived from the `[editor]` section.
    pub fn tool_state(&self) -> crate::tools::ToolState {
        crate::tools::ToolState {
            brush_size: self.editor.brush_size,
            opacity: self.editor.opacity,
            color: parse_hex_color(&self.editor.color).unwrap_or(image::Rgba([0, 0, 0, 255])),
            tolerance: self.editor.tolerance,
            feather_radius: self.editor.feather_radius,
            ..Default::default()
        }
    }
}
