//! Resource limits per requester role and pre-flight code checks
//!
//! The deny-list is an early rejection for obviously runaway snippets. It is
//! trivially bypassed; containment comes from the sandbox itself.

use std::time::Duration;

use crate::error::{ClassroomError, Result};
use crate::models::Role;

/// Largest accepted source, in bytes
pub const MAX_CODE_BYTES: usize = 50_000;

/// The only supported language
pub const PYTHON: &str = "python";

/// Literal snippets rejected before anything is run (matched case-insensitively)
const DENIED_PATTERNS: &[&str] = &["while True:", "for i in range(1000000):"];

/// Limits applied to one sandboxed run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionPolicy {
    pub timeout: Duration,
    pub memory_mb: u32,
    pub cpus: f32,
    pub network: bool,
}

impl ExecutionPolicy {
    /// Student and unknown requesters
    pub const DEFAULT: ExecutionPolicy = ExecutionPolicy {
        timeout: Duration::from_secs(10),
        memory_mb: 128,
        cpus: 0.5,
        network: false,
    };

    /// Teachers get more headroom
    pub const ELEVATED: ExecutionPolicy = ExecutionPolicy {
        timeout: Duration::from_secs(30),
        memory_mb: 256,
        cpus: 1.0,
        network: false,
    };

    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Teacher => Self::ELEVATED,
            Role::Student => Self::DEFAULT,
        }
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout.as_secs()
    }
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Reject code that must never reach the sandbox
pub fn validate_code(code: &str, language: &str) -> Result<()> {
    if language != PYTHON {
        return Err(ClassroomError::InvalidInput(
            "Only Python is supported".to_string(),
        ));
    }

    if code.trim().is_empty() {
        return Err(ClassroomError::InvalidInput(
            "Code cannot be empty".to_string(),
        ));
    }

    if code.len() > MAX_CODE_BYTES {
        return Err(ClassroomError::PolicyViolation(format!(
            "code too long ({} bytes, max {})",
            code.len(),
            MAX_CODE_BYTES
        )));
    }

    let lowered = code.to_lowercase();
    if let Some(pattern) = DENIED_PATTERNS
        .iter()
        .find(|pattern| lowered.contains(&pattern.to_lowercase()))
    {
        return Err(ClassroomError::PolicyViolation(format!(
            "potentially resource-intensive code detected: {}",
            pattern
        )));
    }

    Ok(())
}
