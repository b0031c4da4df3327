use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HelioError {
    #[error("GPU device error: {0}")]
    GpuDeviceError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Pass ordering violated: {0}")]
    PassOrdering(String),
}

impl HelioError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        HelioError::InvalidConfiguration(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, HelioError>;
