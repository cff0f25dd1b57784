//! Error types for the simulator

use ril_protocol::ParseError;
use thiserror::Error;

/// Errors that end a virtual modem task
#[derive(Debug, Error)]
pub enum SimError {
    /// Stream I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The multiplexer wrote bytes that do not frame as commands
    #[error("malformed command stream: {0}")]
    Parse(#[from] ParseError),
}
