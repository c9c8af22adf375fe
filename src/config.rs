//! Configuration management for crabsurface
//!
//! Provides loading, saving and validation of the capture, render and encode
//! settings. Defaults reproduce the fixed constants the pipeline was built
//! around: a 16:9 target, 720-pixel-wide H.264 output at 3 Mbps.

use crate::errors::PipelineError;
use crate::types::{LensFacing, Rgba, Size};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Fixed 16:9 ratio of the encoder frame; also the default capture target,
/// which `capture.target_aspect_ratio` may override independently
pub const ASPECT_RATIO: f32 = 16.0 / 9.0;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub capture: CaptureConfig,
    pub render: RenderConfig,
    pub encode: EncodeConfig,
}

/// Camera selection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Only devices facing this way are considered
    pub facing: LensFacing,
    /// Desired width / height ratio of the capture size
    pub target_aspect_ratio: f32,
    /// Maximum allowed deviation from `target_aspect_ratio`
    pub aspect_tolerance: f32,
    /// Capture sizes must have fewer pixels than a square of this side
    pub max_pixels_side: u32,
}

/// Compositing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// GL ES client version requested from the host surface
    pub gl_client_version: u32,
    /// Overlay texture size as a fraction of the scene size
    pub overlay_scale: f32,
    /// Background color cleared before each composite
    pub clear_color: Rgba,
}

/// Encoder and output file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeConfig {
    /// Encoded frame width; height follows from the aspect ratio
    pub width: u32,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// Nominal frames per second
    pub frame_rate: u32,
    /// Seconds between key frames
    pub i_frame_interval_secs: u32,
    /// Per-dequeue timeout when draining encoded samples
    pub drain_timeout_us: u64,
    /// Codec MIME type requested from the encoder
    pub mime: String,
    /// Directory the recording is written to
    pub output_dir: PathBuf,
    /// File name of the recording
    pub file_name: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            facing: LensFacing::Back,
            target_aspect_ratio: ASPECT_RATIO,
            aspect_tolerance: 0.1,
            max_pixels_side: 700,
        }
    }
}

impl CaptureConfig {
    /// Exclusive upper bound on capture pixel count
    pub fn max_pixels(&self) -> u64 {
        self.max_pixels_side as u64 * self.max_pixels_side as u64
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            gl_client_version: 2,
            overlay_scale: 0.25,
            clear_color: Rgba::YELLOW,
        }
    }
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            width: 720,
            bitrate: 3_000_000,
            frame_rate: 30,
            i_frame_interval_secs: 2,
            drain_timeout_us: 10_000,
            mime: "video/avc".to_string(),
            output_dir: default_output_dir(),
            file_name: "mediacoder-record.mp4".to_string(),
        }
    }
}

impl EncodeConfig {
    /// Encoder frame size: configured width, height scaled by [`ASPECT_RATIO`]
    pub fn frame_size(&self) -> Size {
        Size::new(self.width, (self.width as f32 * ASPECT_RATIO) as u32)
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.file_name)
    }
}

/// External storage root when the platform exposes one, else the temp dir
fn default_output_dir() -> PathBuf {
    std::env::var_os("EXTERNAL_STORAGE")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}

impl PipelineConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("Failed to read config file: {}", e)))?;

        let config: PipelineConfig = toml::from_str(&contents)
            .map_err(|e| PipelineError::Config(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), PipelineError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PipelineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| PipelineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| PipelineError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("crabsurface.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if !(self.capture.target_aspect_ratio.is_finite() && self.capture.target_aspect_ratio > 0.0) {
            return Err("Target aspect ratio must be positive".to_string());
        }
        if !(0.0..1.0).contains(&self.capture.aspect_tolerance) {
            return Err("Aspect tolerance must be between 0.0 and 1.0".to_string());
        }
        if self.capture.max_pixels_side == 0 {
            return Err("Maximum capture side must be non-zero".to_string());
        }

        if self.render.gl_client_version < 2 {
            return Err("GL client version must be at least 2".to_string());
        }
        if !(self.render.overlay_scale > 0.0 && self.render.overlay_scale <= 1.0) {
            return Err("Overlay scale must be in (0.0, 1.0]".to_string());
        }

        if self.encode.width == 0 || self.encode.width % 2 != 0 {
            return Err("Encoder width must be a non-zero even number".to_string());
        }
        if self.encode.bitrate == 0 {
            return Err("Encoder bitrate must be non-zero".to_string());
        }
        if self.encode.frame_rate == 0 || self.encode.frame_rate > 240 {
            return Err("Encoder frame rate must be 1-240".to_string());
        }
        if self.encode.file_name.is_empty() {
            return Err("Output file name must not be empty".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.capture.facing, LensFacing::Back);
        assert_eq!(config.capture.max_pixels(), 490_000);
        assert_eq!(config.encode.width, 720);
        assert_eq!(config.encode.bitrate, 3_000_000);
        assert_eq!(config.encode.frame_rate, 30);
        assert_eq!(config.encode.i_frame_interval_secs, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_encoder_frame_size() {
        let encode = EncodeConfig::default();
        assert_eq!(encode.frame_size(), Size::new(720, 1280));
        assert!(encode.output_path().ends_with("mediacoder-record.mp4"));
    }

    #[test]
    fn test_capture_ratio_override_leaves_encoder_frame_alone() {
        let mut config = PipelineConfig::default();
        config.capture.target_aspect_ratio = 4.0 / 3.0;
        assert!(config.validate().is_ok());
        assert_eq!(config.encode.frame_size(), Size::new(720, 1280));
    }

    #[test]
    fn test_config_validation() {
        let mut bad = PipelineConfig::default();
        bad.capture.aspect_tolerance = 1.5;
        assert!(bad.validate().is_err());

        let mut bad = PipelineConfig::default();
        bad.render.overlay_scale = 0.0;
        assert!(bad.validate().is_err());

        let mut bad = PipelineConfig::default();
        bad.encode.width = 721;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_config_toml_format() {
        let config = PipelineConfig::default();
        let toml_string = toml::to_string_pretty(&config).unwrap();

        assert!(toml_string.contains("[capture]"));
        assert!(toml_string.contains("[render]"));
        assert!(toml_string.contains("[encode]"));
        assert!(toml_string.contains("aspect_tolerance"));
        assert!(toml_string.contains("drain_timeout_us"));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = PipelineConfig::load_from_file("nonexistent_crabsurface.toml");
        assert!(result.is_ok());
        assert_eq!(result.unwrap().encode.width, 720);
    }
}
