/*
 * CEP Bridge - Filesystem Command Channel for Host Scripting
 * File Path: src/security.rs
 * Responsibility: Pre-flight size and pattern checks for outgoing scripts
 */

use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};

/// 500KB ceiling applied to every script, validated or not.
pub const DEFAULT_MAX_SCRIPT_BYTES: usize = 500 * 1024;

/// Substrings granting unrestricted evaluation or shell access inside the
/// host engine. Plain substring matching: trivially defeated by obfuscation,
/// so this is a deterrent and not an isolation boundary.
pub const DEFAULT_BLOCKED_PATTERNS: &[&str] = &[
    "eval(",
    "$.evalFile",
    "system.callSystem",
    "app.system(",
    ".execute()",
    "new Function",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    #[serde(default = "default_max_script_bytes")]
    pub max_script_bytes: usize,
    #[serde(default = "default_blocked_patterns")]
    pub blocked_patterns: Vec<String>,
}

fn default_max_script_bytes() -> usize {
    DEFAULT_MAX_SCRIPT_BYTES
}

fn default_blocked_patterns() -> Vec<String> {
    DEFAULT_BLOCKED_PATTERNS.iter().map(|p| p.to_string()).collect()
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            max_script_bytes: default_max_script_bytes(),
            blocked_patterns: default_blocked_patterns(),
        }
    }
}

impl SecurityPolicy {
    /// Size check only. This is all the unchecked path gets.
    pub fn check_size(&self, script: &str) -> BridgeResult<()> {
        if script.len() > self.max_script_bytes {
            return Err(BridgeError::ScriptTooLarge {
                size: script.len(),
                limit: self.max_script_bytes,
            });
        }
        Ok(())
    }

    pub fn check_patterns(&self, script: &str) -> BridgeResult<()> {
        match self.blocked_patterns.iter().find(|p| !p.is_empty() && script.contains(p.as_str())) {
            Some(pattern) => Err(BridgeError::BlockedPattern {
                pattern: pattern.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Full validation for the regular path, size first.
    pub fn validate(&self, script: &str, check_patterns: bool) -> BridgeResult<()> {
        self.check_size(script)?;
        if check_patterns {
            self.check_patterns(script)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocked_pattern_rejected_only_when_checked() {
        let policy = SecurityPolicy::default();
        let script = "var x = eval(\"1 + 1\");";

        let err = policy.validate(script, true).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("blocked pattern"));
        assert!(policy.validate(script, false).is_ok());
    }

    #[test]
    fn test_oversized_script_rejected_on_both_paths() {
        let policy = SecurityPolicy {
            max_script_bytes: 16,
            ..SecurityPolicy::default()
        };
        let script = "x".repeat(17);

        for check_patterns in [true, false] {
            let err = policy.validate(&script, check_patterns).unwrap_err();
            assert!(err.to_string().contains("size limit"));
        }
        assert!(policy.validate(&"x".repeat(16), true).is_ok());
    }

    #[test]
    fn test_default_ceiling_is_500kb() {
        assert_eq!(SecurityPolicy::default().max_script_bytes, 512_000);
    }

    #[test]
    fn test_empty_pattern_never_matches() {
        let policy = SecurityPolicy {
            max_script_bytes: DEFAULT_MAX_SCRIPT_BYTES,
            blocked_patterns: vec![String::new()],
        };
        assert!(policy.check_patterns("anything").is_ok());
    }
}
