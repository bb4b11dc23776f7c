// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{ExecCapture, RemoteEntryKind, RemoteSessionPort, SessionConnectorPort};
use crate::app::types::RemoteEndpoint;

/// Runs "remote" operations on this machine through `sh` and the local
/// filesystem.
#[derive(Clone, Debug, Default)]
pub struct LocalConnector;

impl LocalConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SessionConnectorPort for LocalConnector {
    async fn open(&self, _endpoint: &RemoteEndpoint) -> AppResult<Box<dyn RemoteSessionPort>> {
        Ok(Box::new(LocalSession::new()))
    }
}

#[derive(Debug)]
pub struct LocalSession {
    target: String,
}

impl LocalSession {
    pub fn new() -> Self {
        let user = std::env::var("USER").unwrap_or_else(|_| "local".to_string());
        Self {
            target: format!("{user}@localhost"),
        }
    }
}

impl Default for LocalSession {
    fn default() -> Self {
        Self::new()
    }
}

fn io_error(op: &str, path: &str, err: std::io::Error) -> AppError {
    AppError::with_message(
        AppErrorKind::Internal,
        codes::REMOTE_ERROR,
        format!("{op} {path} failed: {err}"),
    )
}

fn missing_as_none<T>(res: std::io::Result<T>) -> std::io::Result<Option<T>> {
    match res {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

#[async_trait]
impl RemoteSessionPort for LocalSession {
    fn target(&self) -> &str {
        &self.target
    }

    #[tracing::instrument(name = "local", level = "debug", skip_all, fields(op = "exec_capture"))]
    async fn exec_capture(&self, command: &str) -> AppResult<ExecCapture> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|err| io_error("spawn", "sh", err))?;
        // Killed by a signal: report it like the shell would.
        let exit_code = output.status.code().unwrap_or(-1);
        Ok(ExecCapture {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code,
        })
    }

    async fn entry_kind(&self, path: &str) -> AppResult<Option<RemoteEntryKind>> {
        let meta = missing_as_none(tokio::fs::metadata(path).await)
            .map_err(|err| io_error("stat", path, err))?;
        Ok(meta.map(|meta| {
            if meta.is_dir() {
                RemoteEntryKind::Directory
            } else if meta.is_file() {
                RemoteEntryKind::File
            } else {
                RemoteEntryKind::Other
            }
        }))
    }

    async fn create_dir(&self, path: &str) -> AppResult<()> {
        tokio::fs::create_dir(path)
            .await
            .map_err(|err| io_error("mkdir", path, err))
    }

    async fn list_dir(&self, path: &str) -> AppResult<Option<Vec<String>>> {
        let Some(mut entries) = missing_as_none(tokio::fs::read_dir(path).await)
            .map_err(|err| io_error("readdir", path, err))?
        else {
            return Ok(None);
        };
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| io_error("readdir", path, err))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(Some(names))
    }

    async fn read_file(&self, path: &str) -> AppResult<Option<Vec<u8>>> {
        missing_as_none(tokio::fs::read(path).await).map_err(|err| io_error("read", path, err))
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> AppResult<()> {
        tokio::fs::write(path, contents)
            .await
            .map_err(|err| io_error("write", path, err))
    }

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> AppResult<()> {
        tokio::fs::copy(local_path, remote_path)
            .await
            .map(|_| ())
            .map_err(|err| {
                io_error(
                    "copy",
                    &format!("{} -> {remote_path}", local_path.display()),
                    err,
                )
            })
    }

    async fn close(&self) {}
}
