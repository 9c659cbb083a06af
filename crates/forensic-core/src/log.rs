use serde::{Deserialize, Serialize};

/// Per-operation log that keeps every info line but only the first
/// `max_error_lines` error lines; the rest are counted and summarized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredLog {
    title: String,
    max_error_lines: usize,
    info: Vec<String>,
    errors: Vec<String>,
    suppressed: usize,
}

impl FilteredLog {
    pub fn new(title: impl Into<String>, max_error_lines: usize) -> Self {
        Self {
            title: title.into(),
            max_error_lines,
            info: Vec::new(),
            errors: Vec::new(),
            suppressed: 0,
        }
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.info.push(message.into());
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        if self.errors.len() < self.max_error_lines {
            self.errors.push(message.into());
        } else {
            self.suppressed += 1;
        }
    }

    pub fn log_exception(&mut self, error: &dyn std::error::Error, message: impl AsRef<str>) {
        self.log_error(format!("{}: {error}", message.as_ref()));
    }

    pub fn info_lines(&self) -> &[String] {
        &self.info
    }

    /// Retained error lines followed by the suppression summary, if any.
    pub fn error_lines(&self) -> Vec<String> {
        let mut lines = self.errors.clone();
        if self.suppressed > 0 {
            lines.push(format!(
                "  ... skipped logging of {} additional errors ...",
                self.suppressed
            ));
        }
        lines
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn suppressed(&self) -> usize {
        self.suppressed
    }

    pub fn flush(&self) {
        for line in &self.info {
            tracing::info!(log = %self.title, "{line}");
        }
        if self.errors.is_empty() {
            return;
        }
        tracing::error!(log = %self.title, "{}", self.title);
        for line in self.error_lines() {
            tracing::error!(log = %self.title, "{line}");
        }
    }
}
