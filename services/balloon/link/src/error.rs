//! Link and task error types.

use std::io;

use thiserror::Error;

/// Why a task ended abnormally
#[derive(Error, Debug)]
pub enum TaskError {
    /// The underlying stream failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the stream or a channel was dropped
    #[error("closed")]
    Closed,

    /// A hook or cycle panicked
    #[error("panicked: {0}")]
    Panicked(String),
}

/// Errors raised while establishing a link
#[derive(Error, Debug)]
pub enum LinkError {
    /// Opening or configuring the transport failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The serial port could not be opened
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// Device discovery found nothing to connect to
    #[error("discovery failed: {0}")]
    Discovery(String),

    /// Bluetooth stack error
    #[cfg(feature = "bluetooth")]
    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] bluer::Error),

    /// Transport requested that this build does not support
    #[error("unsupported transport: {0}")]
    Unsupported(String),
}
