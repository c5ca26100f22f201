use thiserror::Error;
use std::io;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Network capture error: {0}")]
    CaptureError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Data conversion error: {0}")]
    DataError(String),
}

impl AppError {
    /// Short machine-readable tag for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::CaptureError(_) => "capture_error",
            AppError::ConfigError(_) => "config_error",
            AppError::IoError(_) => "io_error",
            AppError::DataError(_) => "data_error",
        }
    }
}

impl From<pcap::Error> for AppError {
    fn from(err: pcap::Error) -> Self {
        AppError::CaptureError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::DataError(err.to_string())
    }
}
