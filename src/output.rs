//! Local file sinks: the binary log and its textual `.debug` sibling.
//!
//! Diagnostics go through the `log` facade; at engine creation a backend
//! writing to `<outputPath>.debug` is installed (unless the host process
//! already installed one, in which case its logger wins).

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use parking_lot::Mutex;

use crate::settings::{self, CaptureMode, LayerSettings};

const DEFAULT_LOG_DIR: &str = "VkPerfHaus";
const DEFAULT_LOG_NAME: &str = "GPUVoyeur.log";

/// Resolves the binary log path: an explicit file, an explicit directory
/// (default file name appended), or `$HOME/VkPerfHaus/GPUVoyeur.log`.
pub fn resolve_output_path(settings: &LayerSettings) -> Option<PathBuf> {
    if settings.output_path.is_empty() {
        let mut path = settings::home_dir()?;
        path.push(DEFAULT_LOG_DIR);
        if let Err(err) = std::fs::create_dir_all(&path) {
            log::warn!("creating {} failed: {err}", path.display());
        }
        path.push(DEFAULT_LOG_NAME);
        Some(path)
    } else {
        let mut path = PathBuf::from(&settings.output_path);
        if path.is_dir() {
            path.push(DEFAULT_LOG_NAME);
        }
        Some(path)
    }
}

/// Opens the binary log for truncating write. `None` (degraded mode: the
/// tap keeps running, network capture still works) when the capture mode
/// is network-only or the file cannot be created.
pub fn open_log_file(path: &PathBuf, capture_mode: CaptureMode) -> Option<File> {
    if capture_mode == CaptureMode::Network {
        return None;
    }
    match File::create(path) {
        Ok(file) => Some(file),
        Err(err) => {
            log::error!("opening telemetry log {} failed: {err}", path.display());
            None
        }
    }
}

struct DebugFileLogger {
    file: Mutex<File>,
}

impl log::Log for DebugFileLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::Level::Debug
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut file = self.file.lock();
        let _ = writeln!(file, "[{}] {}", record.level(), record.args());
        let _ = file.flush();
    }

    fn flush(&self) {
        let _ = self.file.lock().flush();
    }
}

/// Installs the `.debug` sibling of the binary log as the `log` backend.
/// Quietly steps aside if the process already has a logger.
pub fn install_debug_logger(output_path: &PathBuf) {
    let mut debug_path = output_path.as_os_str().to_owned();
    debug_path.push(".debug");

    let Ok(file) = File::create(PathBuf::from(debug_path)) else {
        return;
    };

    let logger = Box::new(DebugFileLogger {
        file: Mutex::new(file),
    });
    if log::set_boxed_logger(logger).is_ok() {
        log::set_max_level(log::LevelFilter::Debug);
    }
}
