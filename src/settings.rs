use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::DEFAULT_BASE_URL;

const APP_DIR_NAME: &str = "usage-panel";
const SETTINGS_FILE_NAME: &str = "settings.json";
const CONFIG_PATH_ENV: &str = "USAGE_PANEL_CONFIG";

/// Poll intervals below this are raised to it.
pub const MIN_POLL_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelSettings {
    /// Show raw token counts next to the percentages.
    pub show_counts: bool,

    /// Delay between polls while usage is rising.
    pub active_interval_secs: u64,

    /// Delay between polls while usage is flat.
    pub idle_interval_secs: u64,

    /// Session-window `used` from the last successful fetch.
    pub last_session_used: u64,

    /// Weekly-window `used` from the last successful fetch.
    pub last_weekly_used: u64,

    /// API base; the account and usage endpoints hang off this.
    pub base_url: String,
}

impl Default for PanelSettings {
    fn default() -> Self {
        Self {
            show_counts: true,
            active_interval_secs: 60,
            idle_interval_secs: 300,
            last_session_used: 0,
            last_weekly_used: 0,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl PanelSettings {
    pub fn active_interval(&self) -> Duration {
        Duration::from_secs(self.active_interval_secs.max(MIN_POLL_INTERVAL_SECS))
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs.max(MIN_POLL_INTERVAL_SECS))
    }
}

/// Settings file location: `$USAGE_PANEL_CONFIG`, else
/// `<config_dir>/usage-panel/settings.json`.
pub fn default_settings_path() -> Result<PathBuf, String> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let dir = dirs::config_dir().ok_or("Could not determine config directory")?;
    Ok(dir.join(APP_DIR_NAME).join(SETTINGS_FILE_NAME))
}

pub fn load_settings(path: &Path) -> PanelSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<PanelSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                PanelSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => PanelSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            PanelSettings::default()
        }
    }
}

pub fn save_settings(path: &Path, settings: &PanelSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory {:?}: {}", parent, e))?;
    }

    let contents =
        serde_json::to_string_pretty(settings).map_err(|e| format!("Serialize settings: {}", e))?;

    // Write to a sibling temp file and rename so a crash mid-write
    // never leaves a truncated settings.json.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents)
        .map_err(|e| format!("Write temp settings {:?}: {}", tmp_path, e))?;

    // Windows rename fails if the destination exists.
    if cfg!(windows) && path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(format!("Remove existing settings file {:?}: {}", path, e));
            }
        }
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| format!("Rename temp settings {:?} to {:?}: {}", tmp_path, path, e))?;
    Ok(())
}

/// Settings bound to the file they were loaded from.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    settings: PanelSettings,
}

impl SettingsStore {
    pub fn open(path: PathBuf) -> Self {
        let settings = load_settings(&path);
        Self { path, settings }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &PanelSettings {
        &self.settings
    }

    /// Store the last-used counters and write the file.
    pub fn record_last_used(&mut self, session_used: u64, weekly_used: u64) -> Result<(), String> {
        if self.settings.last_session_used == session_used
            && self.settings.last_weekly_used == weekly_used
        {
            return Ok(());
        }
        self.settings.last_session_used = session_used;
        self.settings.last_weekly_used = weekly_used;
        save_settings(&self.path, &self.settings)
    }
}
