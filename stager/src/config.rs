// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::app::types::{
    HostKeyPolicy, RemoteEndpoint, RemoteLayout, StagerSettings, Transport, WorkflowSettings,
    join_remote,
};
use crate::app::services::shell::is_valid_env_key;
use crate::app::usecases::DEFAULT_MAX_PAYLOADS;

const APP_DIR_NAME: &str = "stager";
const CONFIG_FILE_NAME: &str = "stager.toml";
const CONFIG_ENV_VAR: &str = "STAGER_CONFIG_PATH";
const DEFAULT_SSH_PORT: u16 = 22;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_KEEPALIVE_SECS: u64 = 30;
const DEFAULT_WORKFLOW_BINARY: &str = "nextflow";
const DEFAULT_WORKFLOW_ENTRY: &str = "main.nf";
const DEFAULT_RUN_NAME_PREFIX: &str = "allosmod";

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TransportValue {
    #[default]
    Ssh,
    Local,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum HostKeyPolicyValue {
    #[default]
    Strict,
    AcceptNew,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RemoteSection {
    transport: TransportValue,
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    identity_path: Option<String>,
    passphrase: Option<String>,
    password: Option<String>,
    known_hosts_path: Option<String>,
    host_key_policy: HostKeyPolicyValue,
    connect_timeout_secs: Option<u64>,
    keepalive_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LayoutSection {
    base_dir: Option<String>,
    inputs_root: Option<String>,
    outputs_root: Option<String>,
    logs_root: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WorkflowSection {
    binary: Option<String>,
    entry: Option<String>,
    extra_args: Vec<String>,
    project_dir: Option<String>,
    run_name_prefix: Option<String>,
    env: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    verbose: Option<bool>,
    max_payloads: Option<usize>,
    #[serde(default)]
    remote: RemoteSection,
    #[serde(default)]
    layout: LayoutSection,
    #[serde(default)]
    workflow: WorkflowSection,
}

#[derive(Debug)]
pub struct Config {
    pub settings: StagerSettings,
    pub verbose: bool,
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Override,
    Env,
    ConfigFile,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Override => "override",
            ConfigSource::Env => "env",
            ConfigSource::ConfigFile => "config",
            ConfigSource::Default => "default",
        }
    }
}

#[derive(Debug)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

#[derive(Debug)]
pub struct ConfigReport {
    pub config_path: Option<PathBuf>,
    pub config_path_source: Option<ConfigSource>,
    pub config_file_present: bool,
    pub verbose: ConfigValue<bool>,
    pub max_payloads: ConfigValue<usize>,
    pub port: ConfigValue<u16>,
    pub connect_timeout_secs: ConfigValue<u64>,
    pub workflow_binary: ConfigValue<String>,
}

#[derive(Debug)]
pub struct LoadResult {
    pub config: Config,
    pub report: ConfigReport,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub verbose: Option<bool>,
}

fn pick<T>(over: Option<T>, file: Option<T>, default: T) -> ConfigValue<T> {
    match (over, file) {
        (Some(value), _) => ConfigValue {
            value,
            source: ConfigSource::Override,
        },
        (None, Some(value)) => ConfigValue {
            value,
            source: ConfigSource::ConfigFile,
        },
        (None, None) => ConfigValue {
            value: default,
            source: ConfigSource::Default,
        },
    }
}

pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    Ok(load_with_report(config_path_override, overrides)?.config)
}

pub fn load_with_report(
    config_path_override: Option<PathBuf>,
    overrides: Overrides,
) -> Result<LoadResult> {
    let (config_path, config_path_source, required) = match config_path_override {
        Some(path) => (Some(expand_path(path)), Some(ConfigSource::Override), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), Some(ConfigSource::Env), true),
            None => match default_config_path().ok() {
                Some(path) => (Some(path), Some(ConfigSource::Default), false),
                None => (None, None, false),
            },
        },
    };
    let config_file_present = config_path
        .as_deref()
        .map(|path| path.exists())
        .unwrap_or(false);

    let file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };
    let base_dir = config_path.as_deref().and_then(|path| path.parent());

    let verbose = pick(overrides.verbose, file_config.verbose, false);
    let max_payloads = pick(None, file_config.max_payloads, DEFAULT_MAX_PAYLOADS);
    if max_payloads.value == 0 {
        anyhow::bail!("max_payloads must be at least 1");
    }

    let remote = file_config.remote;
    let transport = match remote.transport {
        TransportValue::Ssh => Transport::Ssh,
        TransportValue::Local => Transport::Local,
    };
    let port = pick(None, remote.port, DEFAULT_SSH_PORT);
    if port.value == 0 {
        anyhow::bail!("remote.port must be between 1 and 65535");
    }
    let connect_timeout_secs = pick(
        None,
        remote.connect_timeout_secs,
        DEFAULT_CONNECT_TIMEOUT_SECS,
    );
    if connect_timeout_secs.value == 0 {
        anyhow::bail!("remote.connect_timeout_secs must be positive");
    }
    let host = match (transport, non_empty(remote.host)) {
        (_, Some(host)) => host,
        (Transport::Local, None) => "localhost".to_string(),
        (Transport::Ssh, None) => anyhow::bail!("remote.host is required for the ssh transport"),
    };
    let username = match non_empty(remote.username) {
        Some(username) => username,
        None => std::env::var("USER")
            .ok()
            .filter(|user| !user.is_empty())
            .context("remote.username is not set and USER is unavailable")?,
    };

    let endpoint = RemoteEndpoint {
        transport,
        host,
        port: port.value,
        username,
        identity_path: non_empty(remote.identity_path).map(|raw| resolve_path(&raw, base_dir)),
        passphrase: remote.passphrase,
        password: non_empty(remote.password),
        known_hosts_path: non_empty(remote.known_hosts_path)
            .map(|raw| resolve_path(&raw, base_dir)),
        host_key_policy: match remote.host_key_policy {
            HostKeyPolicyValue::Strict => HostKeyPolicy::Strict,
            HostKeyPolicyValue::AcceptNew => HostKeyPolicy::AcceptNew,
        },
        connect_timeout: Duration::from_secs(connect_timeout_secs.value),
        keepalive_secs: remote.keepalive_secs.unwrap_or(DEFAULT_KEEPALIVE_SECS),
    };

    let layout = build_layout(file_config.layout, transport)?;

    let workflow_section = file_config.workflow;
    if let Some(key) = workflow_section
        .env
        .keys()
        .find(|key| !is_valid_env_key(key))
    {
        anyhow::bail!("workflow.env key '{key}' is not a valid shell variable name");
    }
    let workflow_binary = pick(
        None,
        non_empty(workflow_section.binary),
        DEFAULT_WORKFLOW_BINARY.to_string(),
    );
    let workflow = WorkflowSettings {
        binary: workflow_binary.value.clone(),
        entry: non_empty(workflow_section.entry)
            .unwrap_or_else(|| DEFAULT_WORKFLOW_ENTRY.to_string()),
        extra_args: workflow_section.extra_args,
        project_dir: non_empty(workflow_section.project_dir)
            .map(|dir| remote_path(&dir, transport)),
        run_name_prefix: workflow_section
            .run_name_prefix
            .unwrap_or_else(|| DEFAULT_RUN_NAME_PREFIX.to_string()),
        env: workflow_section.env,
    };

    let config = Config {
        settings: StagerSettings {
            endpoint,
            layout,
            workflow,
            max_payloads: max_payloads.value,
        },
        verbose: verbose.value,
        config_path: config_path.clone(),
    };

    let report = ConfigReport {
        config_path,
        config_path_source,
        config_file_present,
        verbose,
        max_payloads,
        port,
        connect_timeout_secs,
        workflow_binary,
    };

    Ok(LoadResult { config, report })
}

/// Explicit roots win over `<base_dir>/{inputs,outputs,logs}`. Every root
/// must be absolute: cleanup refuses to remove relative paths.
fn build_layout(section: LayoutSection, transport: Transport) -> Result<RemoteLayout> {
    let base = non_empty(section.base_dir).map(|dir| remote_path(&dir, transport));
    let root = |explicit: Option<String>, leaf: &str| -> Result<String> {
        let dir = match (non_empty(explicit), base.as_deref()) {
            (Some(dir), _) => remote_path(&dir, transport),
            (None, Some(base)) => join_remote(base, leaf),
            (None, None) => anyhow::bail!("layout.{leaf}_root or layout.base_dir must be set"),
        };
        if !dir.starts_with('/') {
            anyhow::bail!("layout.{leaf}_root must be an absolute path, got '{dir}'");
        }
        Ok(dir)
    };
    Ok(RemoteLayout {
        inputs_root: root(section.inputs_root, "inputs")?,
        outputs_root: root(section.outputs_root, "outputs")?,
        logs_root: root(section.logs_root, "logs")?,
    })
}

/// Remote paths are taken literally; with the local transport `~` is expanded.
fn remote_path(raw: &str, transport: Transport) -> String {
    match transport {
        Transport::Ssh => raw.trim_end_matches('/').to_string(),
        Transport::Local => shellexpand::tilde(raw).trim_end_matches('/').to_string(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}
