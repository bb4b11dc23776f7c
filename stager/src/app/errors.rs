// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;

pub mod codes {
    pub const CONNECTION_FAILURE: &str = "connection_failure";
    pub const AUTHENTICATION_FAILURE: &str = "authentication_failure";
    pub const HOST_KEY_REJECTED: &str = "host_key_rejected";
    pub const CREDENTIAL_UNUSABLE: &str = "credential_unusable";
    pub const TRANSFER_FAILED: &str = "transfer_failed";
    pub const STAGING_FAILED: &str = "staging_failed";
    pub const LAUNCH_FAILED: &str = "launch_failed";
    pub const INVALID_ARGUMENT: &str = "invalid_argument";
    pub const REMOTE_ERROR: &str = "remote_error";
    pub const LOCAL_ERROR: &str = "local_error";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorKind {
    /// The remote session could not be established (unreachable, auth rejected).
    Connection,
    /// Key material is present but unusable (missing or wrong passphrase, corrupt key).
    Credential,
    /// A specific file failed to upload.
    Transfer,
    /// A remote extraction/placement step failed.
    Staging,
    /// The workflow process could not be started or its pid was not captured.
    Launch,
    InvalidArgument,
    Local,
    Internal,
}

#[derive(Debug, Clone)]
pub struct AppError {
    kind: AppErrorKind,
    code: &'static str,
    message: String,
    context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind, code: &'static str) -> Self {
        Self {
            kind,
            code,
            message: code.to_string(),
            context: None,
        }
    }

    pub fn with_message(
        kind: AppErrorKind,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn kind(&self) -> AppErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ctx) = &self.context {
            write!(f, "{} ({})", self.message, ctx)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

pub fn invalid_argument(message: impl Into<String>) -> AppError {
    AppError::with_message(
        AppErrorKind::InvalidArgument,
        codes::INVALID_ARGUMENT,
        message,
    )
}

pub fn local_error(message: impl Into<String>) -> AppError {
    AppError::with_message(AppErrorKind::Local, codes::LOCAL_ERROR, message)
}

/// Upload failure for `file`; the file name is kept as context so operators
/// can tell which payload broke.
pub fn transfer_error(file: &str, message: impl Into<String>) -> AppError {
    AppError::with_message(AppErrorKind::Transfer, codes::TRANSFER_FAILED, message)
        .with_context(format!("file {file}"))
}

/// Remote staging failure. `diagnostic` is the remote tool's output.
pub fn staging_error(message: impl Into<String>, diagnostic: &str) -> AppError {
    let err = AppError::with_message(AppErrorKind::Staging, codes::STAGING_FAILED, message);
    let diagnostic = diagnostic.trim();
    if diagnostic.is_empty() {
        err
    } else {
        err.with_context(diagnostic.to_string())
    }
}

pub fn launch_error(message: impl Into<String>) -> AppError {
    AppError::with_message(AppErrorKind::Launch, codes::LAUNCH_FAILED, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_appends_context() {
        let err = transfer_error("sample.zip", "sftp write failed");
        assert_eq!(err.kind(), AppErrorKind::Transfer);
        assert_eq!(err.to_string(), "sftp write failed (file sample.zip)");
    }

    #[test]
    fn staging_error_omits_blank_diagnostic() {
        let err = staging_error("extraction failed", "  \n");
        assert!(err.context().is_none());
        let err = staging_error("extraction failed", "unzip: cannot find zipfile\n");
        assert_eq!(err.context(), Some("unzip: cannot find zipfile"));
    }
}
