use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Field name → list of violations, as reported by schema validation.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Error type shared by every quarry crate.
#[derive(Error, Debug)]
pub enum QuarryError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: String, id: String },

    #[error("Invalid format in {source_name}{}", render_field_errors(.errors))]
    InvalidFormat {
        source_name: String,
        errors: FieldErrors,
    },

    #[error("Invalid password: {0}")]
    InvalidPassword(String),

    #[error("Invalid value for {field} \"{value}\": {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Only one of these arguments may be provided: {}", .0.join(", "))]
    OnlyOneArgSource(Vec<String>),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QuarryError>;

fn render_field_errors(errors: &FieldErrors) -> String {
    if errors.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = errors
        .iter()
        .map(|(field, violations)| format!("{field}: {}", violations.join("; ")))
        .collect();
    format!(" ({})", parts.join(", "))
}

/// Classification of errors for exit codes and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Bad input or a request that conflicts with stored state.
    UserError,
    /// Wrong password or denied access to the secret store.
    SecurityError,
    /// Malformed configuration or data file.
    ConfigError,
    /// File system, serialization or backend failure.
    SystemError,
    /// The user aborted an interactive prompt.
    Cancelled,
}

impl QuarryError {
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn already_exists(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_format(source_name: impl Into<String>, errors: FieldErrors) -> Self {
        Self::InvalidFormat {
            source_name: source_name.into(),
            errors,
        }
    }

    /// `InvalidFormat` for a document that could not be parsed at all. The
    /// violation is reported under the root field `$`.
    pub fn malformed(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert("$".into(), vec![message.into()]);
        Self::invalid_format(source_name, errors)
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the broad error category for routing and display purposes.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. }
            | Self::AlreadyExists { .. }
            | Self::InvalidValue { .. }
            | Self::OnlyOneArgSource(_) => ErrorCategory::UserError,
            Self::InvalidPassword(_) => ErrorCategory::SecurityError,
            Self::InvalidFormat { .. } => ErrorCategory::ConfigError,
            Self::Storage(_) | Self::Io { .. } | Self::Json(_) => ErrorCategory::SystemError,
            Self::Cancelled => ErrorCategory::Cancelled,
        }
    }

    /// Whether the error is the user-initiated abort of a prompt.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Single-line message suitable for the terminal.
    pub fn user_message(&self) -> String {
        self.to_string()
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Process exit code for an unhandled error. Always non-zero.
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::UserError => 1,
            ErrorCategory::SecurityError => 2,
            ErrorCategory::ConfigError => 3,
            ErrorCategory::SystemError => 4,
            ErrorCategory::Cancelled => 130,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message() {
        let err = QuarryError::not_found("Account", "alice");
        assert_eq!(err.to_string(), "Account not found: alice");
        assert_eq!(err.category(), ErrorCategory::UserError);
    }

    #[test]
    fn invalid_format_lists_fields() {
        let mut errors = FieldErrors::new();
        errors.insert("chain-id".into(), vec!["must be a string".into()]);
        errors.insert(
            "keyring-backend".into(),
            vec!["must be one of os, file, test".into()],
        );
        let err = QuarryError::invalid_format("config.json", errors);
        let msg = err.to_string();
        assert!(msg.starts_with("Invalid format in config.json ("));
        assert!(msg.contains("chain-id: must be a string"));
        assert!(msg.contains("keyring-backend: must be one of os, file, test"));
        assert_eq!(err.category(), ErrorCategory::ConfigError);
    }

    #[test]
    fn invalid_format_without_fields() {
        let err = QuarryError::invalid_format("payload", FieldErrors::new());
        assert_eq!(err.to_string(), "Invalid format in payload");
    }

    #[test]
    fn malformed_reports_root_field() {
        let err = QuarryError::malformed("deployments/x.json", "expected value at line 1");
        assert_eq!(
            err.to_string(),
            "Invalid format in deployments/x.json ($: expected value at line 1)"
        );
    }

    #[test]
    fn only_one_arg_source_message() {
        let err = QuarryError::OnlyOneArgSource(vec!["mnemonic".into(), "ledger".into()]);
        assert_eq!(
            err.to_string(),
            "Only one of these arguments may be provided: mnemonic, ledger"
        );
    }

    #[test]
    fn user_message_is_single_line() {
        let err = QuarryError::Storage("backend said:\nsomething\n\nbad".into());
        assert_eq!(err.user_message(), "Storage error: backend said: something bad");
    }

    #[test]
    fn exit_codes_are_non_zero() {
        let errors = [
            QuarryError::not_found("Chain", "x"),
            QuarryError::InvalidPassword("nope".into()),
            QuarryError::invalid_format("f", FieldErrors::new()),
            QuarryError::Storage("s".into()),
            QuarryError::Cancelled,
        ];
        for err in &errors {
            assert_ne!(err.exit_code(), 0);
        }
        assert!(QuarryError::Cancelled.is_cancelled());
    }

    #[test]
    fn password_errors_are_security_category() {
        let err = QuarryError::InvalidPassword("access denied by user".into());
        assert_eq!(err.category(), ErrorCategory::SecurityError);
    }
}
