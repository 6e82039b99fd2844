/*!
 * Error taxonomy for the replica-set membership and election controller
 */

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplSetError {
    #[error("network error talking to {host}: {reason}")]
    NetworkTransient { host: String, reason: String },

    #[error("invalid replica set configuration: {0}")]
    ConfigInvalid(String),

    #[error("self appears {count} times in the replica set configuration")]
    ConfigConflict { count: usize },

    #[error("two members ({a} and {b}) both believe they are primary")]
    TwoMasters { a: u32, b: u32 },

    #[error("election should be retried after a short sleep")]
    ElectionRetry,

    #[error("election failed irrecoverably: {0}")]
    ElectionFatal(String),

    #[error("oplog became unreadable: {0}")]
    OplogReadFatal(String),

    #[error("reconfiguration failed: {0}")]
    ReconfigFailed(String),

    #[error("bad --replSet seed string: {0}")]
    BadSeedString(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, ReplSetError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Recoverable locally (degrade health, retry). Never propagates.
    Transient,
    /// Fatal to the current attempt only; caller retries from scratch.
    AttemptFatal,
    /// Fatal to the replica set's participation; process keeps running.
    SetFatal,
}

impl ReplSetError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ReplSetError::NetworkTransient { .. } | ReplSetError::ElectionRetry => {
                ErrorSeverity::Transient
            }
            ReplSetError::ConfigInvalid(_)
            | ReplSetError::BadSeedString(_)
            | ReplSetError::TwoMasters { .. } => ErrorSeverity::AttemptFatal,
            ReplSetError::ConfigConflict { .. }
            | ReplSetError::ElectionFatal(_)
            | ReplSetError::OplogReadFatal(_)
            | ReplSetError::ReconfigFailed(_) => ErrorSeverity::SetFatal,
            ReplSetError::Io(_) | ReplSetError::Serialization(_) | ReplSetError::Toml(_) => {
                ErrorSeverity::Transient
            }
        }
    }
}
