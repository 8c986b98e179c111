//! Error types for the Binance USDⓈ-M futures integration.

use thiserror::Error;

/// Errors that can occur when talking to the futures API.
#[derive(Debug, Error)]
pub enum BinanceError {
    /// The API answered with an error payload.
    #[error("API error {code}: {msg}")]
    Api {
        /// Binance error code, e.g. -2019 for insufficient margin.
        code: i64,
        /// Error message from the API.
        msg: String,
    },

    /// Authentication or signing failure.
    #[error("auth error: {0}")]
    Auth(String),

    /// Network-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Response body did not parse into the expected shape.
    #[error("parse error: {0}")]
    Parse(String),
}

impl BinanceError {
    /// Creates an API error from a Binance error payload.
    pub fn api(code: i64, msg: impl Into<String>) -> Self {
        Self::Api {
            code,
            msg: msg.into(),
        }
    }

    /// Whether retrying on the next cycle is reasonable.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            // -1003 is the request-weight ban, -1021 a timestamp drift
            Self::Api { code, .. } => matches!(code, -1003 | -1021),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for BinanceError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<serde_json::Error> for BinanceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Result type alias for Binance operations.
pub type Result<T> = std::result::Result<T, BinanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_display() {
        let err = BinanceError::api(-2019, "margin is insufficient");
        assert!(err.to_string().contains("-2019"));
        assert!(err.to_string().contains("margin is insufficient"));
    }

    #[test]
    fn transient_classification() {
        assert!(BinanceError::Network("reset".into()).is_transient());
        assert!(BinanceError::api(-1003, "banned").is_transient());
        assert!(!BinanceError::api(-2019, "margin").is_transient());
        assert!(!BinanceError::Auth("bad key".into()).is_transient());
        assert!(!BinanceError::Parse("eof".into()).is_transient());
    }
}
