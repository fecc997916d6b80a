// ============================================================================
// ENGINE SETTINGS — persisted `key=value` configuration
// ============================================================================

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::canvas::CHUNK_SIZE;
use crate::error::SettingsError;
use crate::ops::replace::FailurePolicy;
use crate::ops::strategy::StrategyKind;

const SETTINGS_FILE: &str = "discolour_settings.cfg";

#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    /// Tile edge length of images loaded by the command line.
    pub tile_size: u32,
    pub strategy: StrategyKind,
    pub failure_policy: FailurePolicy,
    pub max_undo_steps: usize,
    /// Quality used when writing JPEG files (1-100).
    pub jpeg_quality: u8,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tile_size: CHUNK_SIZE,
            strategy: StrategyKind::TileNative,
            failure_policy: FailurePolicy::Rollback,
            max_undo_steps: 50,
            jpeg_quality: 90,
        }
    }
}

impl EngineSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/discolour/discolour_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\discolour\discolour_settings.cfg
    /// On macOS:   ~/Library/Application Support/discolour/discolour_settings.cfg
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").or_else(|_| std::env::var("USERPROFILE")).ok()?;
            return Some(PathBuf::from(appdata).join("discolour").join(SETTINGS_FILE));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("discolour")
                    .join(SETTINGS_FILE),
            );
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let config_dir = match std::env::var("XDG_CONFIG_HOME") {
                Ok(xdg) => PathBuf::from(xdg),
                Err(_) => PathBuf::from(std::env::var("HOME").ok()?).join(".config"),
            };
            Some(config_dir.join("discolour").join(SETTINGS_FILE))
        }
    }

    /// Load settings from the default location. A missing or unreadable
    /// file yields the defaults.
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else {
            return Self::default();
        };
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("ignoring settings file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            debug!("no settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())?;
        Ok(())
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "tile_size={}\n\
             strategy={}\n\
             failure_policy={}\n\
             max_undo_steps={}\n\
             jpeg_quality={}\n",
            self.tile_size, self.strategy, self.failure_policy, self.max_undo_steps, self.jpeg_quality,
        )
    }

    /// Parse `key=value` lines. Blank lines, `#` comments and unknown keys
    /// are skipped; a known key with a bad value is an error.
    pub fn parse(content: &str) -> Result<Self, SettingsError> {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            let invalid = || SettingsError::InvalidValue { key: key.to_string(), value: val.to_string() };
            match key {
                "tile_size" => {
                    s.tile_size = val.parse().ok().filter(|&n: &u32| n > 0).ok_or_else(invalid)?;
                }
                "strategy" => {
                    s.strategy = val.parse().map_err(|_| invalid())?;
                }
                "failure_policy" => {
                    s.failure_policy = val.parse().map_err(|_| invalid())?;
                }
                "max_undo_steps" => {
                    s.max_undo_steps = val.parse().map_err(|_| invalid())?;
                }
                "jpeg_quality" => {
                    s.jpeg_quality = val.parse().ok().filter(|q| (1..=100).contains(q)).ok_or_else(invalid)?;
                }
                _ => debug!("unknown settings key '{}'", key),
            }
        }
        Ok(s)
    }
}
