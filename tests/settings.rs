//! Settings-file parsing: defaults, comments, case handling, and the
//! rule that invalid values never break anything.

use gpu_voyeur::settings::DEFAULT_PORT;
use gpu_voyeur::{CaptureMode, LayerSettings};

#[test]
fn empty_text_yields_defaults() {
    let settings = LayerSettings::parse("");
    assert_eq!(settings, LayerSettings::default());
    assert_eq!(settings.port, DEFAULT_PORT);
    assert_eq!(settings.capture_mode, CaptureMode::Mixed);
    assert!(!settings.logger_thread);
    assert!(settings.output_path.is_empty());
}

#[test]
fn full_file_parses() {
    let text = "\
# telemetry configuration
outputPath = /tmp/traces   # trailing comment
loggerThread = true
port = 9000
captureMode = Network
";
    let settings = LayerSettings::parse(text);
    assert_eq!(settings.output_path, "/tmp/traces");
    assert!(settings.logger_thread);
    assert_eq!(settings.port, 9000);
    assert_eq!(settings.capture_mode, CaptureMode::Network);
}

#[test]
fn capture_mode_is_case_insensitive() {
    assert_eq!(
        LayerSettings::parse("captureMode = local").capture_mode,
        CaptureMode::Local
    );
    assert_eq!(
        LayerSettings::parse("captureMode = MIXED").capture_mode,
        CaptureMode::Mixed
    );
}

#[test]
fn invalid_values_keep_their_defaults() {
    let text = "\
port = not-a-number
loggerThread = yes
captureMode = remote
";
    let settings = LayerSettings::parse(text);
    assert_eq!(settings.port, DEFAULT_PORT);
    assert!(!settings.logger_thread);
    assert_eq!(settings.capture_mode, CaptureMode::Mixed);
}

#[test]
fn unknown_keys_and_noise_are_ignored() {
    let text = "\
colorDepth = 10
this line has no equals sign
 = valueWithoutKey
port = 4242
";
    let settings = LayerSettings::parse(text);
    assert_eq!(settings.port, 4242);
}
