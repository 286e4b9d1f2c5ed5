use crate::assessment::FrameworkLoadError;
use crate::config::ConfigError;
use crate::telemetry::TelemetryError;

/// Startup and CLI failures; request-level errors are mapped by the assessment router.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("framework error: {0}")]
    Framework(#[from] FrameworkLoadError),
}
