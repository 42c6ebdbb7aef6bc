//! Client settings: one struct per section, persisted as TOML.
//!
//! Every section is `#[serde(default)]`, so a settings file written by an
//! older build still loads.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::playback::PlaybackTunables;

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Where the call server lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Call socket URL.
    pub ws_url: String,
    /// Base URL of the REST API (characters, assets).
    pub api_base_url: String,
    /// Seconds before a REST request is abandoned.
    pub api_timeout_secs: u64,
    /// Dial the call socket as soon as the window opens.
    pub connect_on_start: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8989/ws/call".into(),
            api_base_url: "http://127.0.0.1:8989".into(),
            api_timeout_secs: 10,
            connect_on_start: false,
        }
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Device selection.  `None` means the system default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

// ---------------------------------------------------------------------------
// AvatarConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarConfig {
    /// Character to load; `None` uses whichever the server has active.
    pub character_id: Option<String>,
    /// Hold the character still (no blink, breath or sway).
    pub reduced_motion: bool,
}

// ---------------------------------------------------------------------------
// UiConfig
// ---------------------------------------------------------------------------

/// egui window appearance and behaviour settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    /// Last saved window position `(x, y)` in screen pixels.  `None` means
    /// let the OS / window manager pick a position on first launch.
    pub window_position: Option<(f32, f32)>,
    /// Keep the window floating above all other windows.
    pub always_on_top: bool,
    /// Inner window size `(width, height)`.
    pub window_size: (f32, f32),
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            window_position: None,
            always_on_top: false,
            window_size: (720.0, 760.0),
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Everything the client reads from `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use callme_client::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    /// Local playback defaults; the server's `client.config` overrides them
    /// per call.
    pub playback: PlaybackTunables,
    pub avatar: AvatarConfig,
    pub ui: UiConfig,
}

impl AppConfig {
    /// Read `settings.toml` from the user's config dir.  A missing file is
    /// a first run and yields the defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).  Playback values are
    /// clamped the same way a peer advisory is.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.playback = config.playback.clamped();
        Ok(config)
    }

    /// Write `settings.toml` to the user's config dir.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Write to `path`, creating missing parent directories.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
