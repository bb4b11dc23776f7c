// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result, anyhow};
use russh_sftp::client::SftpSession;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::protocol::{FileType, StatusCode};
use std::path::Path;
use tokio::fs as tokiofs;
use tokio::io::AsyncWriteExt;

use crate::app::ports::RemoteEntryKind;

use super::SshSession;

fn is_missing(err: &SftpError) -> bool {
    matches!(
        err,
        SftpError::Status(status) if status.status_code == StatusCode::NoSuchFile
    )
}

/// Maps "no such file" to `None` and keeps every other error.
fn optional<T>(res: std::result::Result<T, SftpError>) -> std::result::Result<Option<T>, SftpError> {
    match res {
        Ok(value) => Ok(Some(value)),
        Err(err) if is_missing(&err) => Ok(None),
        Err(err) => Err(err),
    }
}

fn live(sftp: &Option<SftpSession>) -> Result<&SftpSession> {
    sftp.as_ref().ok_or_else(|| anyhow!("SFTP channel closed"))
}

impl SshSession {
    pub async fn entry_kind(&self, path: &str) -> Result<Option<RemoteEntryKind>> {
        let guard = self.sftp.lock().await;
        let sftp = live(&guard)?;
        let meta = optional(sftp.metadata(path).await).with_context(|| format!("stat {path}"))?;
        Ok(meta.map(|meta| match meta.file_type() {
            FileType::Dir => RemoteEntryKind::Directory,
            FileType::File => RemoteEntryKind::File,
            FileType::Symlink | FileType::Other => RemoteEntryKind::Other,
        }))
    }

    pub async fn create_dir(&self, path: &str) -> Result<()> {
        let guard = self.sftp.lock().await;
        let sftp = live(&guard)?;
        sftp.create_dir(path)
            .await
            .with_context(|| format!("creating path {path}"))
    }

    pub async fn list_dir(&self, path: &str) -> Result<Option<Vec<String>>> {
        let guard = self.sftp.lock().await;
        let sftp = live(&guard)?;
        let entries =
            optional(sftp.read_dir(path).await).with_context(|| format!("listing {path}"))?;
        Ok(entries.map(|entries| {
            entries
                .map(|entry| entry.file_name())
                .filter(|name| name != "." && name != "..")
                .collect()
        }))
    }

    pub async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let guard = self.sftp.lock().await;
        let sftp = live(&guard)?;
        optional(sftp.read(path).await).with_context(|| format!("reading {path}"))
    }

    /// `create` opens with CREATE|TRUNCATE|WRITE, so shorter contents never
    /// leave a stale tail behind.
    pub async fn write_file(&self, path: &str, contents: &[u8]) -> Result<()> {
        let guard = self.sftp.lock().await;
        let sftp = live(&guard)?;
        let mut file = sftp
            .create(path)
            .await
            .with_context(|| format!("open remote {path}"))?;
        file.write_all(contents).await?;
        file.flush().await?;
        file.shutdown().await?;
        Ok(())
    }

    pub async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        log::debug!(
            "Uploading file over sftp: {} -> {}",
            local_path.to_string_lossy(),
            remote_path
        );
        let guard = self.sftp.lock().await;
        let sftp = live(&guard)?;
        let mut local = tokiofs::File::open(local_path)
            .await
            .with_context(|| format!("open local {}", local_path.display()))?;
        let mut remote = sftp
            .create(remote_path)
            .await
            .with_context(|| format!("open remote {remote_path}"))?;
        tokio::io::copy(&mut local, &mut remote)
            .await
            .with_context(|| format!("copy to {remote_path}"))?;
        remote.flush().await?;
        remote.shutdown().await?;
        Ok(())
    }
}
