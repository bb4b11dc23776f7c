// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::RemoteEndpoint;

#[derive(Debug, Clone)]
pub struct ExecCapture {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

impl ExecCapture {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// stderr if it has anything to say, stdout otherwise.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr_text();
        if stderr.trim().is_empty() {
            self.stdout_text()
        } else {
            stderr
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteEntryKind {
    Directory,
    File,
    Other,
}

#[async_trait]
/// One authenticated shell + file-transfer channel pair.
/// Owned by a single orchestration call; never shared between requests.
pub trait RemoteSessionPort: Send + Sync {
    /// `user@host:port`, for logs and error context.
    fn target(&self) -> &str;

    /// Runs one command. A non-zero exit is reported in the capture, not as an error.
    async fn exec_capture(&self, command: &str) -> AppResult<ExecCapture>;

    /// `None` when nothing exists at `path`.
    async fn entry_kind(&self, path: &str) -> AppResult<Option<RemoteEntryKind>>;

    /// Creates exactly one directory; fails if it already exists or the parent is missing.
    async fn create_dir(&self, path: &str) -> AppResult<()>;

    /// Entry names directly under `path`, or `None` if the directory does not exist.
    async fn list_dir(&self, path: &str) -> AppResult<Option<Vec<String>>>;

    async fn read_file(&self, path: &str) -> AppResult<Option<Vec<u8>>>;

    /// Creates or truncates `path`.
    async fn write_file(&self, path: &str, contents: &[u8]) -> AppResult<()>;

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> AppResult<()>;

    /// Releases both channels. Safe to call more than once.
    async fn close(&self);
}

#[async_trait]
/// Opens sessions for a given endpoint.
pub trait SessionConnectorPort: Send + Sync {
    async fn open(&self, endpoint: &RemoteEndpoint) -> AppResult<Box<dyn RemoteSessionPort>>;
}
