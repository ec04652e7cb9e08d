//! Error types for the ground station

use thiserror::Error;

/// Web relay errors
#[derive(Error, Debug)]
pub enum RelayError {
    /// Transport or encoding failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// Server answered with a non-success status
    #[error("Server returned {0}")]
    Status(u16),
}
