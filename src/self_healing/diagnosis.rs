//! Error diagnosis.
//!
//! Maps an error category to a handler that either repairs the cause (a
//! missing parent directory is created) or returns an advisory outcome.
//! Handlers can be replaced per category.

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

use super::actions::ActionOutcome;
use crate::errors::RecoveryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    MissingModule,
    FileNotFound,
    Syntax,
    Permission,
    JsonDecode,
    Other,
}

/// A reported error and what is known about where it happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub category: ErrorCategory,
    pub message: String,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    #[serde(default)]
    pub module_name: Option<String>,
    #[serde(default)]
    pub line: Option<usize>,
    #[serde(default)]
    pub column: Option<usize>,
}

impl ErrorReport {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            file_path: None,
            module_name: None,
            line: None,
            column: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn from_io(err: &std::io::Error, path: Option<&Path>) -> Self {
        let category = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorCategory::FileNotFound,
            std::io::ErrorKind::PermissionDenied => ErrorCategory::Permission,
            _ => ErrorCategory::Other,
        };
        Self {
            file_path: path.map(Path::to_path_buf),
            ..Self::new(category, err.to_string())
        }
    }

    pub fn from_json(err: &serde_json::Error, path: Option<&Path>) -> Self {
        let category = if err.is_syntax() || err.is_eof() {
            ErrorCategory::JsonDecode
        } else {
            ErrorCategory::Other
        };
        Self {
            file_path: path.map(Path::to_path_buf),
            line: Some(err.line()),
            column: Some(err.column()),
            ..Self::new(category, err.to_string())
        }
    }
}

pub trait ErrorHandler: Send + Sync {
    fn handle(&self, report: &ErrorReport) -> Result<ActionOutcome, RecoveryError>;
}

impl<F> ErrorHandler for F
where
    F: Fn(&ErrorReport) -> Result<ActionOutcome, RecoveryError> + Send + Sync,
{
    fn handle(&self, report: &ErrorReport) -> Result<ActionOutcome, RecoveryError> {
        self(report)
    }
}

fn quoted_name() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"[`'"]([^`'"]+)[`'"]"#).expect("invalid quoted-name regex"))
}

/// First quoted token in `message`, if any.
fn extract_quoted(message: &str) -> Option<String> {
    quoted_name()
        .captures(message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn report_path(report: &ErrorReport) -> Option<PathBuf> {
    report
        .file_path
        .clone()
        .or_else(|| extract_quoted(&report.message).map(PathBuf::from))
}

fn handle_missing_module(report: &ErrorReport) -> Result<ActionOutcome, RecoveryError> {
    let module = report
        .module_name
        .clone()
        .or_else(|| extract_quoted(&report.message))
        .unwrap_or_else(|| "unknown_module".to_string());
    Ok(ActionOutcome::failure(format!(
        "Module '{module}' is missing. Install it before retrying."
    ))
    .with_detail("recovery_action", "suggest_installation")
    .with_detail("module_name", module))
}

fn handle_file_not_found(report: &ErrorReport) -> Result<ActionOutcome, RecoveryError> {
    let path = report_path(report);
    let parent = path
        .as_deref()
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty());

    if let Some(dir) = parent {
        if !dir.exists() {
            return match std::fs::create_dir_all(dir) {
                Ok(()) => {
                    info!(directory = %dir.display(), "Created missing directory");
                    Ok(ActionOutcome::success(format!(
                        "Created missing directory: {}",
                        dir.display()
                    ))
                    .with_detail("recovery_action", "created_directory")
                    .with_detail("directory", dir.display().to_string()))
                }
                Err(source) => Err(RecoveryError::Io {
                    path: dir.to_path_buf(),
                    source,
                }),
            };
        }
    }

    let shown = path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    Ok(ActionOutcome::failure(format!("File not found: {shown}"))
        .with_detail("recovery_action", "report_missing_file")
        .with_detail("file_path", shown))
}

fn handle_syntax(report: &ErrorReport) -> Result<ActionOutcome, RecoveryError> {
    let location = report
        .file_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "code".to_string());
    let line = report
        .line
        .map(|l| l.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    Ok(ActionOutcome::failure(format!(
        "Syntax error in {location} at line {line}: {}",
        report.message
    ))
    .with_detail("recovery_action", "report_syntax_error")
    .with_detail("line", serde_json::json!(report.line))
    .with_detail("column", serde_json::json!(report.column)))
}

fn handle_permission(report: &ErrorReport) -> Result<ActionOutcome, RecoveryError> {
    let path = report_path(report)
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    Ok(ActionOutcome::failure(format!(
        "Permission error for {path}: {}",
        report.message
    ))
    .with_detail("recovery_action", "report_permission_error")
    .with_detail("file_path", path))
}

fn handle_json_decode(report: &ErrorReport) -> Result<ActionOutcome, RecoveryError> {
    let mut message = format!(
        "JSON decode error in {}: {}",
        report
            .file_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "data".to_string()),
        report.message
    );

    if let Some(path) = report.file_path.as_deref() {
        if let Ok(content) = std::fs::read_to_string(path) {
            let trimmed = content.trim();
            if trimmed.is_empty() {
                message.push_str(" (file is empty)");
            } else if !trimmed.starts_with('{') && !trimmed.starts_with('[') {
                message.push_str(" (not a JSON object or array)");
            }
        }
    }

    Ok(ActionOutcome::failure(message).with_detail("recovery_action", "report_json_error"))
}

fn handle_other(report: &ErrorReport) -> Result<ActionOutcome, RecoveryError> {
    Ok(
        ActionOutcome::failure(format!("Unhandled error: {}", report.message))
            .with_detail("recovery_action", "report_error"),
    )
}

/// Category-keyed handler table.
pub struct ErrorDiagnosis {
    handlers: RwLock<HashMap<ErrorCategory, Arc<dyn ErrorHandler>>>,
}

impl ErrorDiagnosis {
    pub fn new() -> Self {
        let mut handlers: HashMap<ErrorCategory, Arc<dyn ErrorHandler>> = HashMap::new();
        handlers.insert(ErrorCategory::MissingModule, Arc::new(handle_missing_module));
        handlers.insert(ErrorCategory::FileNotFound, Arc::new(handle_file_not_found));
        handlers.insert(ErrorCategory::Syntax, Arc::new(handle_syntax));
        handlers.insert(ErrorCategory::Permission, Arc::new(handle_permission));
        handlers.insert(ErrorCategory::JsonDecode, Arc::new(handle_json_decode));
        handlers.insert(ErrorCategory::Other, Arc::new(handle_other));
        Self {
            handlers: RwLock::new(handlers),
        }
    }

    /// Replace the handler for `category`.
    pub fn register(&self, category: ErrorCategory, handler: Arc<dyn ErrorHandler>) {
        self.handlers.write().insert(category, handler);
        info!(category = ?category, "Registered custom error handler");
    }

    /// Dispatch `report` to its handler. Never fails; handler faults become
    /// unsuccessful outcomes.
    pub fn handle_error(&self, report: &ErrorReport) -> ActionOutcome {
        let handler = {
            let handlers = self.handlers.read();
            handlers
                .get(&report.category)
                .or_else(|| handlers.get(&ErrorCategory::Other))
                .cloned()
        };
        let Some(handler) = handler else {
            return ActionOutcome::failure("No error handler available");
        };

        let original = format!("{:?}: {}", report.category, report.message);
        match catch_unwind(AssertUnwindSafe(|| handler.handle(report))) {
            Ok(Ok(outcome)) => {
                if outcome.success {
                    info!(category = ?report.category, "Recovered from error");
                } else {
                    warn!(category = ?report.category, message = %outcome.message, "Error not recovered");
                }
                outcome
            }
            Ok(Err(e)) => ActionOutcome::failure(format!("Recovery handler failed: {e}"))
                .with_detail("original_error", original),
            Err(_) => ActionOutcome::failure("Recovery handler panicked")
                .with_detail("original_error", original),
        }
    }
}

impl Default for ErrorDiagnosis {
    fn default() -> Self {
        Self::new()
    }
}
