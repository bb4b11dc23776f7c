// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result, anyhow};
use russh::client::{AuthResult, Config, Handle};
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg};
use russh_sftp::client::SftpSession;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::ssh::{AuthenticationFailure, KeyLoadFailure};
use crate::app::types::RemoteEndpoint;

use super::{ClientHandler, SshSession};

const DEFAULT_KEY_NAMES: [&str; 3] = ["id_ed25519", "id_ecdsa", "id_rsa"];

#[derive(Debug, PartialEq, Eq)]
enum AuthDecision {
    Success,
    TryNext,
}

fn auth_decision(result: AuthResult) -> AuthDecision {
    match result {
        AuthResult::Success => AuthDecision::Success,
        AuthResult::Failure {
            remaining_methods,
            partial_success,
        } => {
            log::debug!(
                "authentication method rejected (partial_success={}, remaining={:?})",
                partial_success,
                remaining_methods
            );
            AuthDecision::TryNext
        }
    }
}

fn load_key(path: &Path, passphrase: Option<&str>) -> Result<PrivateKey> {
    russh::keys::load_secret_key(path, passphrase).map_err(|err| {
        KeyLoadFailure {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
        .into()
    })
}

fn default_key_paths() -> Vec<PathBuf> {
    let Some(home) = dirs::home_dir() else {
        return Vec::new();
    };
    DEFAULT_KEY_NAMES
        .iter()
        .map(|name| home.join(".ssh").join(name))
        .filter(|path| path.is_file())
        .collect()
}

fn client_config(endpoint: &RemoteEndpoint) -> Config {
    let keepalive =
        (endpoint.keepalive_secs > 0).then(|| Duration::from_secs(endpoint.keepalive_secs));
    Config {
        keepalive_interval: keepalive,
        channel_buffer_size: 64,
        window_size: 1024 * 1024,
        ..Default::default()
    }
}

async fn try_key(
    handle: &mut Handle<ClientHandler>,
    username: &str,
    key: PrivateKey,
) -> Result<AuthDecision> {
    let hash = handle.best_supported_rsa_hash().await?.flatten();
    let key = PrivateKeyWithHashAlg::new(Arc::new(key), hash);
    let result = handle.authenticate_publickey(username, key).await?;
    Ok(auth_decision(result))
}

#[cfg(unix)]
async fn try_agent(handle: &mut Handle<ClientHandler>, username: &str) -> Result<AuthDecision> {
    use russh::keys::agent::client::AgentClient;

    let mut agent = match AgentClient::connect_env().await {
        Ok(agent) => agent,
        Err(err) => {
            log::debug!("no ssh agent available: {err}");
            return Ok(AuthDecision::TryNext);
        }
    };
    let identities = match agent.request_identities().await {
        Ok(identities) => identities,
        Err(err) => {
            log::debug!("ssh agent did not list identities: {err}");
            return Ok(AuthDecision::TryNext);
        }
    };
    for key in identities {
        let hash = handle.best_supported_rsa_hash().await?.flatten();
        let result = handle
            .authenticate_publickey_with(username, key, hash, &mut agent)
            .await
            .map_err(|err| anyhow!("agent signing failed: {err:?}"))?;
        if auth_decision(result) == AuthDecision::Success {
            return Ok(AuthDecision::Success);
        }
    }
    Ok(AuthDecision::TryNext)
}

#[cfg(not(unix))]
async fn try_agent(_handle: &mut Handle<ClientHandler>, _username: &str) -> Result<AuthDecision> {
    Ok(AuthDecision::TryNext)
}

/// Tries, in order: the configured key, the agent, the usual keys under
/// `~/.ssh`, then the password.
async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    endpoint: &RemoteEndpoint,
    explicit_key: Option<PrivateKey>,
) -> Result<()> {
    let username = endpoint.username.as_str();

    if let Some(key) = explicit_key {
        if try_key(handle, username, key).await? == AuthDecision::Success {
            return Ok(());
        }
    }

    if try_agent(handle, username).await? == AuthDecision::Success {
        log::debug!("authenticated {username} through the ssh agent");
        return Ok(());
    }

    for path in default_key_paths() {
        // Encrypted default keys are skipped; only the explicit key takes a passphrase.
        let key = match russh::keys::load_secret_key(&path, None) {
            Ok(key) => key,
            Err(err) => {
                log::debug!("skipping {}: {err}", path.display());
                continue;
            }
        };
        if try_key(handle, username, key).await? == AuthDecision::Success {
            log::debug!("authenticated {username} with {}", path.display());
            return Ok(());
        }
    }

    if let Some(password) = &endpoint.password {
        let result = handle.authenticate_password(username, password).await?;
        if auth_decision(result) == AuthDecision::Success {
            return Ok(());
        }
    }

    Err(AuthenticationFailure.into())
}

async fn open_sftp(handle: &Handle<ClientHandler>) -> Result<SftpSession> {
    let channel = handle
        .channel_open_session()
        .await
        .context("opening session channel")?;
    channel.request_subsystem(true, "sftp").await?;
    let sftp = SftpSession::new(channel.into_stream())
        .await
        .context("starting sftp subsystem")?;
    Ok(sftp)
}

/// Connects, authenticates and opens the sftp channel. The configured key is
/// loaded before any network traffic so unusable key material is reported as
/// such rather than as a connection problem.
pub(in crate::adapters::ssh) async fn connect(endpoint: &RemoteEndpoint) -> Result<SshSession> {
    let explicit_key = endpoint
        .identity_path
        .as_deref()
        .map(|path| load_key(path, endpoint.passphrase.as_deref()))
        .transpose()?;

    let addr = tokio::net::lookup_host((endpoint.host.as_str(), endpoint.port))
        .await
        .with_context(|| format!("resolving {}:{}", endpoint.host, endpoint.port))?
        .next()
        .ok_or_else(|| anyhow!("{}:{} did not resolve", endpoint.host, endpoint.port))?;

    let target = format!("{}@{}:{}", endpoint.username, endpoint.host, endpoint.port);
    log::info!("connecting to {target} ({addr})");

    let handler = ClientHandler::new(
        endpoint.host.clone(),
        addr,
        endpoint.known_hosts_path.clone(),
        endpoint.host_key_policy,
    );
    let config = Arc::new(client_config(endpoint));
    let mut handle = tokio::time::timeout(
        endpoint.connect_timeout,
        russh::client::connect(config, addr, handler),
    )
    .await
    .map_err(|_| anyhow!("timed out after {:?}", endpoint.connect_timeout))?
    .context("SSH connect failed")?;

    log::info!("established connection with {target}, proceeding with auth");
    authenticate(&mut handle, endpoint, explicit_key).await?;

    let sftp = match open_sftp(&handle).await {
        Ok(sftp) => sftp,
        Err(err) => {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "English")
                .await;
            return Err(err);
        }
    };
    Ok(SshSession::new(target, handle, sftp))
}
