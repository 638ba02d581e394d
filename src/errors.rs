/// Errors that can occur while interpreting a settings file.
///
/// Never fatal: an invalid value is logged and the option keeps its
/// default.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SettingsError {
    #[error("`port` must be an unsigned 16-bit integer, got \"{0}\"")]
    InvalidPort(String),

    #[error("`captureMode` must be one of Mixed, Local, Network, got \"{0}\"")]
    UnknownCaptureMode(String),

    #[error("`loggerThread` must be true or false, got \"{0}\"")]
    InvalidBool(String),
}
