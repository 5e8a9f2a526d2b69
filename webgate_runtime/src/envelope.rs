use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Outcome of a unit of work executed on the authoritative thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub correlation_id: u64,
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    pub fn succeeded(correlation_id: u64, output: impl Into<String>) -> Self {
        Self {
            correlation_id,
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(correlation_id: u64, error: impl Into<String>) -> Self {
        Self {
            correlation_id,
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// Error text, or an empty string for successful results.
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or_default()
    }
}

/// Kind of privileged action recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditCategory {
    CommandExecution,
    AuthorizationChange,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditCategory::CommandExecution => "command-execution",
            AuditCategory::AuthorizationChange => "authorization-change",
        }
    }
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "command-execution" => Ok(AuditCategory::CommandExecution),
            "authorization-change" => Ok(AuditCategory::AuthorizationChange),
            other => Err(format!("unknown audit category '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_result_carries_error() {
        let result = CommandResult::failed(7, "boom");
        assert!(!result.success);
        assert_eq!(result.error_message(), "boom");
        assert!(result.output.is_empty());
    }

    #[test]
    fn category_text_matches_serde_name() {
        let json = serde_json::to_string(&AuditCategory::AuthorizationChange).unwrap();
        assert_eq!(json, "\"authorization-change\"");
        assert_eq!(
            "command-execution".parse::<AuditCategory>().unwrap(),
            AuditCategory::CommandExecution
        );
    }
}
