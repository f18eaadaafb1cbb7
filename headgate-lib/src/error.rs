use thiserror::Error;

/// Errors that can occur in the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Exchange closed by peer")]
    ExchangeClosed,
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// A send on a departed exchange is a cancellation, not a bug; callers
/// treat this variant as a quiet teardown path.
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for GatewayError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        GatewayError::ExchangeClosed
    }
}
