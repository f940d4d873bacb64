//! Configuration management for capmock

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::geometry::WindingPolicy;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8092,
        }
    }
}

/// Corner capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Width in pixels at which the base photo is shown to the user
    pub display_width: u32,
    /// Whether corner order is fixed up automatically or enforced
    pub winding: WindingPolicy,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            display_width: 600,
            winding: WindingPolicy::default(),
        }
    }
}

/// Where and how composites are written
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub file_name: String,
    /// Quality used when the output path ends in .jpg/.jpeg (1-100)
    pub jpeg_quality: u8,
    /// Write a JSON placement record next to every composite
    pub write_record: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            file_name: "preview.png".to_string(),
            jpeg_quality: 90,
            write_record: true,
        }
    }
}

impl OutputConfig {
    pub fn default_path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

/// Descriptive placement metadata carried into the placement record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    pub label: String,
    pub width_cm: f64,
    pub height_cm: f64,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            label: "Front Panel".to_string(),
            width_cm: 5.0,
            height_cm: 5.0,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub placement: PlacementConfig,
}

impl Config {
    /// Load configuration from a file, or create default if it doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!("Created default configuration at {:?}", path);
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }
}
