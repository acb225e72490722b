// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Error types, diagnostics, and reporting for the optimizer.

use std::fmt;

/// Categories of optimizer errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptErrorKind {
    Cli,
    Io,
    RuleLoad,
    Expression,
    Engine,
    Internal,
}

/// An optimizer error with a kind and message.
#[derive(Debug, Clone)]
pub struct OptError {
    kind: OptErrorKind,
    message: String,
}

impl OptError {
    pub fn new(kind: OptErrorKind, msg: &str, param: Option<&str>) -> Self {
        Self {
            kind,
            message: format_error(msg, param),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> OptErrorKind {
        self.kind
    }
}

impl fmt::Display for OptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for OptError {}

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// A diagnostic message with location and context.
///
/// Line numbers refer to the rule file for load diagnostics and to the
/// input assembly stream for engine diagnostics.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub(crate) line: u32,
    pub(crate) code: String,
    pub(crate) severity: Severity,
    pub(crate) error: OptError,
    pub(crate) file: Option<String>,
    pub(crate) source: Option<String>,
}

impl Diagnostic {
    pub fn new(line: u32, severity: Severity, error: OptError) -> Self {
        Self {
            line,
            code: default_diagnostic_code(error.kind()).to_string(),
            severity,
            error,
            file: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_file(mut self, file: Option<String>) -> Self {
        self.file = file;
        self
    }

    pub fn with_source(mut self, source: Option<String>) -> Self {
        self.source = source;
        self
    }

    pub fn format(&self) -> String {
        let sev = match self.severity {
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        };
        match &self.file {
            Some(file) => format!(
                "{file}:{}: {sev} [{}] - {}",
                self.line,
                self.code,
                self.error.message()
            ),
            None => format!(
                "{}: {sev} [{}] - {}",
                self.line,
                self.code,
                self.error.message()
            ),
        }
    }

    pub fn format_with_context(&self, use_color: bool) -> String {
        let mut out = self.format();
        if let Some(source) = &self.source {
            out.push('\n');
            out.push_str(&crate::core::report::context_line(
                self.line, source, use_color,
            ));
        }
        out
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn code(&self) -> &str {
        self.code.as_str()
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    pub fn message(&self) -> &str {
        self.error.message()
    }
}

fn default_diagnostic_code(kind: OptErrorKind) -> &'static str {
    match kind {
        OptErrorKind::Cli => "opt101",
        OptErrorKind::Io => "opt501",
        OptErrorKind::RuleLoad => "opt201",
        OptErrorKind::Expression => "opt401",
        OptErrorKind::Engine => "opt001",
        OptErrorKind::Internal => "opt901",
    }
}

/// Format an error message with an optional parameter.
pub fn format_error(msg: &str, param: Option<&str>) -> String {
    match param {
        Some(p) => format!("{msg}: {p}"),
        None => msg.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_format_includes_line_and_severity() {
        let err = OptError::new(OptErrorKind::Engine, "Bad thing", None);
        let diag = Diagnostic::new(12, Severity::Error, err);
        assert_eq!(diag.format(), "12: ERROR [opt001] - Bad thing");
    }

    #[test]
    fn diagnostic_format_prefixes_file_when_present() {
        let err = OptError::new(OptErrorKind::RuleLoad, "duplicate OFLAG", Some("18"));
        let diag = Diagnostic::new(1, Severity::Error, err).with_file(Some("18.opt".to_string()));
        assert_eq!(diag.format(), "18.opt:1: ERROR [opt201] - duplicate OFLAG: 18");
    }

    #[test]
    fn format_error_appends_parameter() {
        assert_eq!(format_error("unknown function", Some("FOO")), "unknown function: FOO");
        assert_eq!(format_error("plain", None), "plain");
    }
}
