//! Settings-file parsing.
//!
//! A plain `KEY = VALUE` file, one option per line, `#` starting a
//! comment. The file lives at `$PERFHAUS_SETTINGS_PATH` (a file, or a
//! directory containing `PerfHaus.cfg`) or, absent that, at
//! `$HOME/VkPerfHaus/PerfHaus.cfg`. A missing or unreadable file, or any
//! invalid value, falls back to defaults; the tap never fails over
//! configuration.

use std::path::PathBuf;
use std::str::FromStr;

use crate::errors::SettingsError;

/// Environment variable naming the settings file (or its directory).
pub const SETTINGS_PATH_ENV: &str = "PERFHAUS_SETTINGS_PATH";

const SETTINGS_FILE_NAME: &str = "PerfHaus.cfg";

/// Port the HUD listener binds when the settings file names none.
pub const DEFAULT_PORT: u16 = 17771;

/// Which sinks the packet stream fans out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// Local file and network capture.
    #[default]
    Mixed,
    /// Local file only; no listener is opened.
    Local,
    /// Network capture only; no local file is written.
    Network,
}

impl FromStr for CaptureMode {
    type Err = SettingsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "mixed" => Ok(CaptureMode::Mixed),
            "local" => Ok(CaptureMode::Local),
            "network" => Ok(CaptureMode::Network),
            _ => Err(SettingsError::UnknownCaptureMode(value.to_owned())),
        }
    }
}

/// Options consumed by the tap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSettings {
    /// Log file, or directory to place the default log file in. Empty
    /// selects `$HOME/VkPerfHaus/GPUVoyeur.log`.
    pub output_path: String,
    /// Reserve the log-writer worker thread.
    pub logger_thread: bool,
    /// Port of the HUD listener.
    pub port: u16,
    pub capture_mode: CaptureMode,
}

impl Default for LayerSettings {
    fn default() -> Self {
        Self {
            output_path: String::new(),
            logger_thread: false,
            port: DEFAULT_PORT,
            capture_mode: CaptureMode::default(),
        }
    }
}

fn parse_bool(value: &str) -> Result<bool, SettingsError> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(SettingsError::InvalidBool(value.to_owned())),
    }
}

impl LayerSettings {
    /// Loads settings from the configured file, defaulting everything on
    /// absence.
    pub fn load() -> Self {
        let Some(path) = settings_file_path() else {
            return Self::default();
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                log::info!("loaded settings from {}", path.display());
                Self::parse(&text)
            }
            Err(_) => Self::default(),
        }
    }

    /// Parses settings text. Unknown keys are ignored, invalid values are
    /// logged and keep their default.
    pub fn parse(text: &str) -> Self {
        let mut settings = Self::default();

        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("");
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() || value.is_empty() {
                continue;
            }

            let result = match key {
                "outputPath" => {
                    settings.output_path = value.to_owned();
                    Ok(())
                }
                "loggerThread" => parse_bool(value).map(|flag| settings.logger_thread = flag),
                "port" => value
                    .parse::<u16>()
                    .map(|port| settings.port = port)
                    .map_err(|_| SettingsError::InvalidPort(value.to_owned())),
                "captureMode" => value
                    .parse::<CaptureMode>()
                    .map(|mode| settings.capture_mode = mode),
                _ => Ok(()),
            };

            if let Err(err) = result {
                log::warn!("ignoring settings option: {err}");
            }
        }

        settings
    }
}

pub(crate) fn home_dir() -> Option<PathBuf> {
    #[cfg(windows)]
    let var = "USERPROFILE";
    #[cfg(not(windows))]
    let var = "HOME";

    std::env::var_os(var).map(PathBuf::from)
}

fn settings_file_path() -> Option<PathBuf> {
    if let Some(env_path) = std::env::var_os(SETTINGS_PATH_ENV) {
        let mut path = PathBuf::from(env_path);
        if path.is_dir() {
            path.push(SETTINGS_FILE_NAME);
        }
        return Some(path);
    }

    let mut path = home_dir()?;
    path.push("VkPerfHaus");
    path.push(SETTINGS_FILE_NAME);
    Some(path)
}
