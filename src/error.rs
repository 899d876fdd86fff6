use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("permission to use capture device '{device}' was denied")]
    PermissionDenied { device: String },

    #[error("capture device '{device}' is unavailable: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    #[error("capture device '{device}' is busy")]
    DeviceBusy { device: String },

    #[error("invalid palette: {reason}")]
    InvalidPalette { reason: String },

    #[error("unknown color mode '{mode}'")]
    UnknownColorMode { mode: String },

    #[error("density must be in 1..={max}, got {density}")]
    InvalidDensity { density: u32, max: u32 },

    #[error("invalid config: {message}")]
    InvalidConfig { message: String },

    #[error("capture stream from '{device}' ended")]
    StreamEnded { device: String },

    #[error("capture failed: {message}")]
    Capture { message: String },

    #[error("render failed: {message}")]
    Render { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Stable machine-readable code, printed by the CLI as `error[<code>]`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied { .. } => "capture.permission_denied",
            Self::DeviceUnavailable { .. } => "capture.device_unavailable",
            Self::DeviceBusy { .. } => "capture.device_busy",
            Self::InvalidPalette { .. } => "palette.invalid",
            Self::UnknownColorMode { .. } => "color.unknown_mode",
            Self::InvalidDensity { .. } => "config.invalid_density",
            Self::InvalidConfig { .. } => "config.invalid",
            Self::StreamEnded { .. } => "capture.stream_ended",
            Self::Capture { .. } => "capture.failed",
            Self::Render { .. } => "render.failed",
            Self::Io(_) => "io",
        }
    }

    /// Acquisition failures abort `start()` and are never retried.
    pub fn is_acquisition_failure(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied { .. } | Self::DeviceUnavailable { .. } | Self::DeviceBusy { .. }
        )
    }

    pub fn invalid_palette(reason: impl Into<String>) -> Self {
        Self::InvalidPalette {
            reason: reason.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn capture(message: impl Into<String>) -> Self {
        Self::Capture {
            message: message.into(),
        }
    }

    pub fn render(message: impl Into<String>) -> Self {
        Self::Render {
            message: message.into(),
        }
    }
}

/// Walks an `anyhow` chain for the first pipeline error.
pub fn find_pipeline_error(error: &anyhow::Error) -> Option<&PipelineError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<PipelineError>())
}

#[cfg(test)]
mod tests {
    use super::{find_pipeline_error, PipelineError};
    use anyhow::Context;

    #[test]
    fn acquisition_errors_are_classified() {
        let busy = PipelineError::DeviceBusy {
            device: "/dev/video0".to_owned(),
        };
        assert!(busy.is_acquisition_failure());
        assert_eq!(busy.code(), "capture.device_busy");
        assert!(!PipelineError::invalid_palette("empty").is_acquisition_failure());
    }

    #[test]
    fn coded_error_is_found_through_context() {
        let result: anyhow::Result<()> = Err(PipelineError::PermissionDenied {
            device: "cam".to_owned(),
        })
        .context("failed to start");
        let error = result.expect_err("should fail");
        let found = find_pipeline_error(&error).expect("pipeline error in chain");
        assert_eq!(found.code(), "capture.permission_denied");
    }
}
