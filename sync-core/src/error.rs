use thiserror::Error;

/// Errors raised while building canonical records from raw venue fields
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid decimal '{value}': {reason}")]
    InvalidDecimal { value: String, reason: String },

    #[error("Invalid price level: expected [price, size], got {0} fields")]
    InvalidLevel(usize),

    #[error("Unknown side: {0}")]
    UnknownSide(String),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
