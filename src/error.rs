/*
 * CEP Bridge - Filesystem Command Channel for Host Scripting
 * File Path: src/error.rs
 * Responsibility: Errors raised before a command reaches the shared directory
 */

use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced as `Err`. Everything that happens after a command file
/// is written comes back as a `Response` instead.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Script is {size} bytes, exceeding the size limit of {limit} bytes")]
    ScriptTooLarge { size: usize, limit: usize },

    #[error("Script contains blocked pattern `{pattern}`")]
    BlockedPattern { pattern: String },

    #[error("{context} ({path:?}): {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BridgeError {
    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BridgeError::Io {
            context,
            path: path.into(),
            source,
        }
    }

    /// True for the rejections produced by the security policy.
    pub fn is_validation(&self) -> bool {
        matches!(self, BridgeError::ScriptTooLarge { .. } | BridgeError::BlockedPattern { .. })
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
