// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::anyhow;
use russh::keys::known_hosts::{learn_known_hosts, learn_known_hosts_path};
use russh_sftp::client::SftpSession;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::app::types::HostKeyPolicy;

use super::HostKeyRejected;

mod auth;
mod exec;
mod sftp;

pub(super) use auth::connect;

/// russh client handler; only host key verification is customized.
#[derive(Clone, Debug)]
pub(super) struct ClientHandler {
    host: String,
    addr: SocketAddr,
    known_hosts_path: Option<PathBuf>,
    policy: HostKeyPolicy,
}

impl ClientHandler {
    pub(super) fn new(
        host: String,
        addr: SocketAddr,
        known_hosts_path: Option<PathBuf>,
        policy: HostKeyPolicy,
    ) -> Self {
        Self {
            host,
            addr,
            known_hosts_path,
            policy,
        }
    }
}

impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;
    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        verify_server_key(
            &self.host,
            self.addr,
            server_public_key,
            self.known_hosts_path.as_deref(),
            self.policy,
        )
    }
}

/// One authenticated connection with its shell and sftp channels.
pub struct SshSession {
    target: String,
    handle: Mutex<Option<russh::client::Handle<ClientHandler>>>,
    sftp: Mutex<Option<SftpSession>>,
}

impl SshSession {
    pub(super) fn new(
        target: String,
        handle: russh::client::Handle<ClientHandler>,
        sftp: SftpSession,
    ) -> Self {
        Self {
            target,
            handle: Mutex::new(Some(handle)),
            sftp: Mutex::new(Some(sftp)),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Closes sftp first, then the connection. Later calls are no-ops.
    pub async fn shutdown(&self) {
        if let Some(sftp) = self.sftp.lock().await.take() {
            if let Err(err) = sftp.close().await {
                log::debug!("closing sftp channel for {} failed: {err}", self.target);
            }
        }
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(err) = handle
                .disconnect(russh::Disconnect::ByApplication, "", "English")
                .await
            {
                log::debug!("disconnect from {} failed: {err}", self.target);
            }
        }
    }
}

fn check_known_hosts_for(
    host: &str,
    port: u16,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<bool, russh::keys::Error> {
    match known_hosts_path {
        Some(path) => russh::keys::check_known_hosts_path(host, port, key, path),
        None => russh::keys::check_known_hosts(host, port, key),
    }
}

fn learn_known_hosts_for(
    host: &str,
    port: u16,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<(), russh::keys::Error> {
    match known_hosts_path {
        Some(path) => learn_known_hosts_path(host, port, key, path),
        None => learn_known_hosts(host, port, key),
    }
}

/// Accepts keys already in known_hosts (by name, then by IP). Unknown keys
/// are learned only under [`HostKeyPolicy::AcceptNew`]; a changed key is
/// always rejected.
pub(super) fn verify_server_key(
    host: &str,
    addr: SocketAddr,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
    policy: HostKeyPolicy,
) -> std::result::Result<bool, anyhow::Error> {
    let port = addr.port();
    let rejected = |reason: String| {
        log::warn!("server key validation failed for {host}:{port}: {reason}");
        anyhow::Error::new(HostKeyRejected {
            host: host.to_string(),
            port,
            reason,
        })
    };

    match check_known_hosts_for(host, port, key, known_hosts_path) {
        Ok(true) => return Ok(true),
        Ok(false) => {}
        Err(err) => return Err(rejected(err.to_string())),
    }

    let ip_host = addr.ip().to_string();
    if ip_host != host {
        match check_known_hosts_for(&ip_host, port, key, known_hosts_path) {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(err) => return Err(rejected(err.to_string())),
        }
    }

    let tried = if ip_host == host {
        host.to_string()
    } else {
        format!("{host}, {ip_host}")
    };
    match policy {
        HostKeyPolicy::Strict => Err(rejected(format!(
            "not present in known_hosts (tried {tried})"
        ))),
        HostKeyPolicy::AcceptNew => {
            log::info!(
                "server key for {host}:{port} is not present in known_hosts (tried {tried}); learning"
            );
            learn_known_hosts_for(host, port, key, known_hosts_path).map_err(|err| {
                log::warn!("failed to learn server key for {host}:{port}: {err}");
                anyhow!("failed to learn server key for {host}:{port}: {err}")
            })?;
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }

    fn public_key(name: &str, passphrase: Option<&str>) -> russh::keys::ssh_key::PublicKey {
        russh::keys::load_secret_key(fixture(name), passphrase)
            .unwrap()
            .public_key()
            .clone()
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:2222".parse().unwrap()
    }

    #[test]
    fn strict_policy_rejects_unknown_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let known_hosts = tmp.path().join("known_hosts");
        std::fs::write(&known_hosts, "").unwrap();
        let key = public_key("plain_ed25519", None);

        let err = verify_server_key(
            "127.0.0.1",
            addr(),
            &key,
            Some(&known_hosts),
            HostKeyPolicy::Strict,
        )
        .unwrap_err();
        assert!(err.is::<HostKeyRejected>());
    }

    #[test]
    fn accept_new_learns_then_strict_accepts() {
        let tmp = tempfile::tempdir().unwrap();
        let known_hosts = tmp.path().join("known_hosts");
        std::fs::write(&known_hosts, "").unwrap();
        let key = public_key("plain_ed25519", None);

        assert!(
            verify_server_key(
                "127.0.0.1",
                addr(),
                &key,
                Some(&known_hosts),
                HostKeyPolicy::AcceptNew,
            )
            .unwrap()
        );
        assert!(
            verify_server_key(
                "127.0.0.1",
                addr(),
                &key,
                Some(&known_hosts),
                HostKeyPolicy::Strict,
            )
            .unwrap()
        );
    }

    #[test]
    fn changed_key_is_rejected_even_when_accepting_new() {
        let tmp = tempfile::tempdir().unwrap();
        let known_hosts = tmp.path().join("known_hosts");
        std::fs::write(&known_hosts, "").unwrap();
        let original = public_key("plain_ed25519", None);
        let imposter = public_key("encrypted_ed25519", Some("correct horse"));

        verify_server_key(
            "127.0.0.1",
            addr(),
            &original,
            Some(&known_hosts),
            HostKeyPolicy::AcceptNew,
        )
        .unwrap();
        let err = verify_server_key(
            "127.0.0.1",
            addr(),
            &imposter,
            Some(&known_hosts),
            HostKeyPolicy::AcceptNew,
        )
        .unwrap_err();
        assert!(err.is::<HostKeyRejected>());
    }
}
