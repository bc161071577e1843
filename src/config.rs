//! Configuration management for QuadMap

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::geometry::{Rect, Viewport};
use crate::interaction::NudgeSteps;
use crate::media::MediaLimits;

/// Render target configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Logical viewport width in pixels
    pub width: u32,
    pub height: u32,
    pub device_pixel_ratio: f64,
    /// Render loop rate
    pub fps: u32,
    /// JPEG quality of the preview stream (1-100)
    pub preview_quality: u8,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            device_pixel_ratio: 1.0,
            fps: 30,
            preview_quality: 70,
        }
    }
}

impl OutputConfig {
    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.width as f64, self.height as f64, self.device_pixel_ratio)
    }
}

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
            host: "0.0.0.0".to_string(),
            port: 8092,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum number of snapshots kept
    pub capacity: usize,
    /// Quiet period after the last edit before a snapshot is taken
    pub debounce_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            debounce_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Minimum interval between video texture refreshes
    pub video_refresh_ms: u64,
    pub max_image_dimension: u32,
    pub max_video_dimension: u32,
    /// Playback rate of Motion-JPEG clips
    pub video_fps: u32,
    /// Largest accepted upload body
    pub max_upload_mb: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            video_refresh_ms: 33,
            max_image_dimension: 4096,
            max_video_dimension: 1920,
            max_upload_mb: 256,
            video_fps: 30,
        }
    }
}

impl MediaConfig {
    pub fn limits(&self) -> MediaLimits {
        MediaLimits {
            max_image_dimension: self.max_image_dimension,
            max_video_dimension: self.max_video_dimension,
            video_fps: self.video_fps,
        }
    }
}

/// Live camera defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionConfig {
    pub nudge_step: f64,
    /// Step with the modifier held
    pub nudge_step_coarse: f64,
    /// Hit radius of a corner handle in pixels
    pub handle_radius: f64,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            nudge_step: 1.0,
            nudge_step_coarse: 10.0,
            handle_radius: 12.0,
        }
    }
}

impl InteractionConfig {
    pub fn nudge_steps(&self) -> NudgeSteps {
        NudgeSteps {
            fine: self.nudge_step,
            coarse: self.nudge_step_coarse,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Where save/load-from-disk reads and writes the project document
    pub path: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("project.json"),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub media: MediaConfig,

    #[serde(default)]
    pub camera: CameraConfig,

    #[serde(default)]
    pub interaction: InteractionConfig,

    /// Screen area kept clear by the fullscreen and half presets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_area: Option<Rect>,

    #[serde(default)]
    pub project: ProjectConfig,
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
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory {:?}", parent))?;
            }
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.history.debounce_ms)
    }

    pub fn video_refresh(&self) -> Duration {
        Duration::from_millis(self.media.video_refresh_ms)
    }
}
