// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Component, Path};

use crate::app::errors::{AppResult, staging_error, transfer_error};
use crate::app::ports::{RemoteEntryKind, RemoteSessionPort};
use crate::app::services::shell::{RemoteStep, ShellScript};

/// Creates `path` and any missing ancestors. Walks the path over the
/// file-transfer channel first and falls back to a single `mkdir -p` when a
/// component cannot be created that way. Existing directories are a no-op.
pub async fn ensure_directory(session: &dyn RemoteSessionPort, path: &str) -> AppResult<()> {
    match ensure_directory_via_transfer(session, path).await {
        Ok(()) => Ok(()),
        Err(TransferWalkError::NotADirectory(cur)) => Err(staging_error(
            format!("remote path exists but is not a directory: {cur}"),
            "",
        )),
        Err(TransferWalkError::Primitive(reason)) => {
            tracing::debug!(
                path = %path,
                reason = %reason,
                "sftp directory walk failed; falling back to mkdir -p"
            );
            ensure_directory_via_shell(session, path).await
        }
    }
}

enum TransferWalkError {
    NotADirectory(String),
    Primitive(String),
}

async fn ensure_directory_via_transfer(
    session: &dyn RemoteSessionPort,
    path: &str,
) -> Result<(), TransferWalkError> {
    for cur in build_remote_dir_paths(path) {
        match session.entry_kind(&cur).await {
            Ok(Some(RemoteEntryKind::Directory)) => continue,
            Ok(Some(_)) => return Err(TransferWalkError::NotADirectory(cur)),
            Ok(None) => {}
            Err(err) => return Err(TransferWalkError::Primitive(err.to_string())),
        }
        if let Err(err) = session.create_dir(&cur).await {
            // Someone else may have created it in between.
            match session.entry_kind(&cur).await {
                Ok(Some(RemoteEntryKind::Directory)) => continue,
                _ => return Err(TransferWalkError::Primitive(err.to_string())),
            }
        }
    }
    Ok(())
}

async fn ensure_directory_via_shell(session: &dyn RemoteSessionPort, path: &str) -> AppResult<()> {
    let command = ShellScript::new()
        .step(RemoteStep::MakeDirs {
            path: path.to_string(),
        })
        .render()?;
    let capture = session.exec_capture(&command).await.map_err(|err| {
        staging_error(format!("failed to create remote directory {path}"), &err.to_string())
    })?;
    if !capture.success() {
        return Err(staging_error(
            format!("failed to create remote directory {path}"),
            &capture.diagnostic(),
        ));
    }
    Ok(())
}

/// Uploads exactly one file. The remote parent directory must already exist.
pub async fn upload_file(
    session: &dyn RemoteSessionPort,
    local_path: &Path,
    remote_path: &str,
) -> AppResult<()> {
    let display = local_path.display().to_string();
    let meta = tokio::fs::metadata(local_path)
        .await
        .map_err(|err| transfer_error(&display, format!("cannot read local file: {err}")))?;
    if !meta.is_file() {
        return Err(transfer_error(&display, "local path is not a regular file"));
    }
    session
        .upload_file(local_path, remote_path)
        .await
        .map_err(|err| transfer_error(&display, format!("upload to {remote_path} failed: {err}")))
}

/// Every ancestor of `remote_dir` (root excluded), shortest first.
pub fn build_remote_dir_paths(remote_dir: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut cur = String::new();
    let absolute = remote_dir.starts_with('/');
    for comp in Path::new(remote_dir).components() {
        let seg = match comp {
            Component::Normal(os) => os.to_string_lossy().to_string(),
            _ => continue,
        };
        if cur.is_empty() {
            cur = if absolute { format!("/{seg}") } else { seg };
        } else {
            cur = format!("{cur}/{seg}");
        }
        paths.push(cur.clone());
    }
    paths
}
