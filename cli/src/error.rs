use thiserror::Error;

/// Exit code for success
pub const EXIT_OK: i32 = 0;

/// Exit code for configuration errors
pub const EXIT_CONFIG: i32 = 1;

/// Exit code for unrecoverable database or queue failures at startup
pub const EXIT_STARTUP: i32 = 2;

/// CLI-specific errors with the operator exit-code contract attached.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// The database or queue could not be reached at startup
    #[error("Startup failure: {message}")]
    Startup {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Any other operational failure
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn configuration(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn startup(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Startup {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// The process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration { .. } => EXIT_CONFIG,
            Self::Startup { .. } => EXIT_STARTUP,
            Self::Other(_) => EXIT_CONFIG,
        }
    }
}
