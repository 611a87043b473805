use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("device error: {0}")]
    Device(String),
    #[error("connection refused: {0}")]
    Connect(String),
    #[error("operation timed out: {0}")]
    Timeout(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

pub type RelayResult<T> = Result<T, RelayError>;

impl RelayError {
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Self::Device(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, RelayError::Connect(_))
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for RelayError {
    fn from(err: anyhow::Error) -> Self {
        RelayError::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            RelayError::Connect(err.to_string())
        } else if err.is_timeout() {
            RelayError::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            RelayError::HttpStatus {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            RelayError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests;
