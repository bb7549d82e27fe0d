//! Viewer configuration (`viewer.toml`).
//!
//! Every field has a default, so an absent file or a partial file is valid.
//! The file location is taken from `VIEWER_CONFIG` when set.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Environment variable naming an alternative config file.
const CONFIG_ENV: &str = "VIEWER_CONFIG";

/// Config file looked up in the working directory otherwise.
const CONFIG_FILE: &str = "viewer.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewerConfig {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub surface: SurfaceConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

/// Preferred presentation settings. The swapchain falls back when the
/// surface does not support them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurfaceConfig {
    #[serde(default)]
    pub format: SurfaceFormat,
    #[serde(default)]
    pub color_space: ColorSpace,
    #[serde(default)]
    pub present_mode: PresentMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_clear_color")]
    pub clear_color: [f32; 4],
    #[serde(default = "default_validation")]
    pub validation: bool,
    /// Directory holding `triangle.vert.spv` / `triangle.frag.spv` that
    /// replace the embedded shaders.
    #[serde(default)]
    pub shader_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SurfaceFormat {
    #[default]
    Bgra8Unorm,
    Bgra8Srgb,
    Rgba8Unorm,
    Rgba8Srgb,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorSpace {
    #[default]
    SrgbNonlinear,
    ExtendedSrgbLinear,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresentMode {
    #[default]
    Fifo,
    FifoRelaxed,
    Mailbox,
    Immediate,
}

fn default_title() -> String {
    "3D Viewer".to_string()
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_clear_color() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}
fn default_validation() -> bool {
    cfg!(debug_assertions)
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            width: default_width(),
            height: default_height(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            clear_color: default_clear_color(),
            validation: default_validation(),
            shader_dir: None,
        }
    }
}

impl ViewerConfig {
    /// Parses a config from TOML text and validates it.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self> {
        let config: ViewerConfig = toml::from_str(text).map_err(|source| Error::ConfigParse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the config at `path`.
    ///
    /// A missing file yields the defaults; an unreadable or malformed file
    /// is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text, path)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Rejects values no window or swapchain can be built from.
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        if self
            .render
            .clear_color
            .iter()
            .any(|c| !c.is_finite() || !(0.0..=1.0).contains(c))
        {
            return Err(Error::Config(format!(
                "clear_color components must be within 0..=1, got {:?}",
                self.render.clear_color
            )));
        }
        Ok(())
    }
}

/// Resolves the config file location from `VIEWER_CONFIG` or the default
/// file name.
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
}
