// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use async_trait::async_trait;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{ExecCapture, RemoteEntryKind, RemoteSessionPort, SessionConnectorPort};
use crate::app::types::RemoteEndpoint;

mod error;
mod session;

pub use error::{AuthenticationFailure, HostKeyRejected, KeyLoadFailure};
pub use session::SshSession;

/// Opens one fresh SSH session per call.
#[derive(Clone, Debug, Default)]
pub struct SshConnector;

impl SshConnector {
    pub fn new() -> Self {
        Self
    }
}

fn map_connect_error(err: anyhow::Error) -> AppError {
    let chain = || err.chain();
    let (kind, code) = if chain().any(|cause| cause.is::<KeyLoadFailure>()) {
        (AppErrorKind::Credential, codes::CREDENTIAL_UNUSABLE)
    } else if chain().any(|cause| cause.is::<AuthenticationFailure>()) {
        (AppErrorKind::Connection, codes::AUTHENTICATION_FAILURE)
    } else if chain().any(|cause| cause.is::<HostKeyRejected>()) {
        (AppErrorKind::Connection, codes::HOST_KEY_REJECTED)
    } else {
        (AppErrorKind::Connection, codes::CONNECTION_FAILURE)
    };
    AppError::with_message(kind, code, format!("ssh connect failed: {err:#}"))
}

fn map_exec_error(err: anyhow::Error) -> AppError {
    AppError::with_message(
        AppErrorKind::Internal,
        codes::REMOTE_ERROR,
        format!("ssh exec failed: {err:#}"),
    )
}

fn map_sftp_error(err: anyhow::Error) -> AppError {
    AppError::with_message(
        AppErrorKind::Internal,
        codes::REMOTE_ERROR,
        format!("sftp request failed: {err:#}"),
    )
}

#[async_trait]
impl SessionConnectorPort for SshConnector {
    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, endpoint),
        fields(op = "connect", host = %endpoint.host, user = %endpoint.username, port = endpoint.port)
    )]
    async fn open(&self, endpoint: &RemoteEndpoint) -> AppResult<Box<dyn RemoteSessionPort>> {
        let session = session::connect(endpoint).await.map_err(map_connect_error)?;
        Ok(Box::new(SshRemoteSession { inner: session }))
    }
}

/// [`SshSession`] behind the application port.
pub struct SshRemoteSession {
    inner: SshSession,
}

#[async_trait]
impl RemoteSessionPort for SshRemoteSession {
    fn target(&self) -> &str {
        self.inner.target()
    }

    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, command),
        fields(op = "exec_capture", remote = %self.inner.target())
    )]
    async fn exec_capture(&self, command: &str) -> AppResult<ExecCapture> {
        let (stdout, stderr, exit_code) = self
            .inner
            .exec_capture(command)
            .await
            .map_err(map_exec_error)?;
        Ok(ExecCapture {
            stdout,
            stderr,
            exit_code,
        })
    }

    #[tracing::instrument(name = "sftp", level = "debug", skip(self), fields(op = "stat"))]
    async fn entry_kind(&self, path: &str) -> AppResult<Option<RemoteEntryKind>> {
        self.inner.entry_kind(path).await.map_err(map_sftp_error)
    }

    #[tracing::instrument(name = "sftp", level = "debug", skip(self), fields(op = "mkdir"))]
    async fn create_dir(&self, path: &str) -> AppResult<()> {
        self.inner.create_dir(path).await.map_err(map_sftp_error)
    }

    #[tracing::instrument(name = "sftp", level = "debug", skip(self), fields(op = "readdir"))]
    async fn list_dir(&self, path: &str) -> AppResult<Option<Vec<String>>> {
        self.inner.list_dir(path).await.map_err(map_sftp_error)
    }

    #[tracing::instrument(name = "sftp", level = "debug", skip(self), fields(op = "read"))]
    async fn read_file(&self, path: &str) -> AppResult<Option<Vec<u8>>> {
        self.inner.read_file(path).await.map_err(map_sftp_error)
    }

    #[tracing::instrument(
        name = "sftp",
        level = "debug",
        skip(self, contents),
        fields(op = "write", bytes = contents.len())
    )]
    async fn write_file(&self, path: &str, contents: &[u8]) -> AppResult<()> {
        self.inner
            .write_file(path, contents)
            .await
            .map_err(map_sftp_error)
    }

    #[tracing::instrument(
        name = "sftp",
        level = "debug",
        skip(self, local_path),
        fields(op = "upload", local = %local_path.display())
    )]
    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> AppResult<()> {
        self.inner
            .upload_file(local_path, remote_path)
            .await
            .map_err(map_sftp_error)
    }

    async fn close(&self) {
        self.inner.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::types::{HostKeyPolicy, Transport};
    use anyhow::Context;
    use std::path::PathBuf;
    use std::time::Duration;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }

    fn endpoint(port: u16) -> RemoteEndpoint {
        RemoteEndpoint {
            transport: Transport::Ssh,
            host: "127.0.0.1".to_string(),
            port,
            username: "stager".to_string(),
            identity_path: None,
            passphrase: None,
            password: None,
            known_hosts_path: None,
            host_key_policy: HostKeyPolicy::Strict,
            connect_timeout: Duration::from_secs(5),
            keepalive_secs: 0,
        }
    }

    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn open_error(result: AppResult<Box<dyn RemoteSessionPort>>) -> AppError {
        match result {
            Ok(_) => panic!("expected the connection to fail"),
            Err(err) => err,
        }
    }

    #[test]
    fn connect_errors_are_classified_through_the_chain() {
        let err = map_connect_error(
            anyhow::Error::new(KeyLoadFailure {
                path: "/k".to_string(),
                reason: "bad passphrase".to_string(),
            })
            .context("loading key"),
        );
        assert_eq!(err.kind(), AppErrorKind::Credential);
        assert_eq!(err.code(), codes::CREDENTIAL_UNUSABLE);

        let err = map_connect_error(anyhow::Error::new(AuthenticationFailure));
        assert_eq!(err.kind(), AppErrorKind::Connection);
        assert_eq!(err.code(), codes::AUTHENTICATION_FAILURE);

        let rejected: anyhow::Result<()> = Err(HostKeyRejected {
            host: "h".to_string(),
            port: 22,
            reason: "changed".to_string(),
        }
        .into());
        let err = map_connect_error(rejected.context("SSH connect failed").unwrap_err());
        assert_eq!(err.code(), codes::HOST_KEY_REJECTED);
        assert!(err.message().contains("changed"));

        let err = map_connect_error(anyhow::anyhow!("connection refused"));
        assert_eq!(err.kind(), AppErrorKind::Connection);
        assert_eq!(err.code(), codes::CONNECTION_FAILURE);
    }

    #[tokio::test]
    async fn encrypted_key_without_passphrase_is_a_credential_error() {
        let mut ep = endpoint(closed_port());
        ep.identity_path = Some(fixture("encrypted_ed25519"));
        let err = open_error(SshConnector::new().open(&ep).await);
        assert_eq!(err.kind(), AppErrorKind::Credential);
    }

    #[tokio::test]
    async fn wrong_passphrase_is_a_credential_error() {
        let mut ep = endpoint(closed_port());
        ep.identity_path = Some(fixture("encrypted_ed25519"));
        ep.passphrase = Some("battery staple".to_string());
        let err = open_error(SshConnector::new().open(&ep).await);
        assert_eq!(err.kind(), AppErrorKind::Credential);
    }

    #[tokio::test]
    async fn refused_port_is_a_connection_error() {
        let mut ep = endpoint(closed_port());
        ep.identity_path = Some(fixture("plain_ed25519"));
        let err = open_error(SshConnector::new().open(&ep).await);
        assert_eq!(err.kind(), AppErrorKind::Connection);
        assert_eq!(err.code(), codes::CONNECTION_FAILURE);
    }
}
