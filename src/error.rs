//! Error types for Sarathi

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Sarathi error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file parse error
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Message could not be encoded for the wire
    #[error("Encode error: {0}")]
    Encode(String),

    /// Received bytes could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Encoded message would not fit in a single datagram
    #[error("Frame too large for one datagram: {size} > {max} bytes")]
    FrameTooLarge {
        /// Encoded payload size
        size: usize,
        /// Largest payload a datagram may carry
        max: usize,
    },

    /// Invalid configuration or call parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
