//! Transport error taxonomy.
//!
//! None of these reach the application: every seam that produces one logs it
//! and degrades the affected transport to a no-op.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    /// The local broadcast primitive is missing in this environment.
    #[error("local transport unavailable: {0}")]
    Unavailable(String),

    /// The mesh could not be brought up (key, swarm build, listen).
    #[error("mesh connect failure: {0}")]
    ConnectFailure(String),

    #[error("payload encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
