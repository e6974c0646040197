/*
 * CEP Bridge - Filesystem Command Channel for Host Scripting
 * File Path: src/response.rs
 * Responsibility: The two-outcome response contract shared with the host
 */

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Everything a command can resolve to: success with a payload, or failure
/// with a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

const EXCERPT_CHARS: usize = 200;

impl Response {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn timed_out(timeout_ms: u64) -> Self {
        Self::failure(format!(
            "Command timed out after {}ms. Is the CEP plugin running and connected to the host application?",
            timeout_ms
        ))
    }

    pub fn superseded(slot: &str) -> Self {
        Self::failure(format!(
            "Response superseded by a newer request in slot `{}`",
            slot
        ))
    }

    /// Parses a response file body. Malformed content becomes a failure
    /// carrying the parser message and a bounded excerpt.
    pub fn parse(content: &str) -> Self {
        match serde_json::from_str::<Response>(content) {
            Ok(response) => response,
            Err(e) => {
                let excerpt: String = content.trim().chars().take(EXCERPT_CHARS).collect();
                Self::failure(format!("Failed to parse response: {} (content: {:?})", e, excerpt))
            }
        }
    }

    /// Parses the raw bytes of a response file. Bytes that are not UTF-8
    /// are a parse failure, not a missing response.
    pub fn parse_bytes(content: &[u8]) -> Self {
        match std::str::from_utf8(content) {
            Ok(text) => Self::parse(text),
            Err(e) => {
                let lossy = String::from_utf8_lossy(content);
                let excerpt: String = lossy.trim().chars().take(EXCERPT_CHARS).collect();
                Self::failure(format!(
                    "Failed to parse response: invalid UTF-8 ({}) (content: {:?})",
                    e, excerpt
                ))
            }
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }
}
