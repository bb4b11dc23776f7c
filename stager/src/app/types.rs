// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// How the "remote" side is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Ssh,
    /// Run against the local machine (login-node deployments, tests).
    Local,
}

/// Host key verification posture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// The host key must already be present in known_hosts.
    Strict,
    /// Trust on first use: unknown keys are learned, changed keys are still rejected.
    AcceptNew,
}

/// Connection parameters for the remote endpoint. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct RemoteEndpoint {
    pub transport: Transport,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub identity_path: Option<PathBuf>,
    pub passphrase: Option<String>,
    pub password: Option<String>,
    pub known_hosts_path: Option<PathBuf>,
    pub host_key_policy: HostKeyPolicy,
    pub connect_timeout: Duration,
    pub keepalive_secs: u64,
}

/// Remote directory roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    pub inputs_root: String,
    pub outputs_root: String,
    pub logs_root: String,
}

impl RemoteLayout {
    pub fn user_inputs_dir(&self, user_id: &str) -> String {
        join_remote(&self.inputs_root, user_id)
    }

    pub fn user_logs_dir(&self, user_id: &str) -> String {
        join_remote(&join_remote(&self.logs_root, user_id), "nextflow")
    }
}

/// The external workflow engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSettings {
    pub binary: String,
    pub entry: String,
    pub extra_args: Vec<String>,
    pub project_dir: Option<String>,
    pub run_name_prefix: String,
    pub env: BTreeMap<String, String>,
}

/// Everything the orchestrator needs, passed in once at construction.
#[derive(Debug, Clone)]
pub struct StagerSettings {
    pub endpoint: RemoteEndpoint,
    pub layout: RemoteLayout,
    pub workflow: WorkflowSettings,
    pub max_payloads: usize,
}

/// Who submitted the run. Always passed explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub organization: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunParameters {
    pub number_of_runs: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_radius: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct StagingRequest {
    pub identity: Identity,
    pub params: RunParameters,
    pub payloads: Vec<PathBuf>,
}

/// One allocated `folder_<n>` directory under a user's inputs directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceSlot {
    pub user_id: String,
    pub index: u32,
    pub path: String,
}

impl WorkspaceSlot {
    pub fn name(&self) -> String {
        slot_name(self.index)
    }
}

pub fn slot_name(index: u32) -> String {
    format!("folder_{index}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedPayload {
    pub local_path: PathBuf,
    pub remote_archive_path: String,
    pub target_path: String,
    pub uploaded_files: Vec<String>,
}

/// Durable reference to a launched workflow process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunHandle {
    pub run_name: String,
    pub pid: String,
    pub params_file: String,
    pub report: String,
    pub trace: String,
    pub timeline: String,
    pub stdout: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_name: String,
    pub pid: String,
    pub slot: WorkspaceSlot,
    pub placed_paths: Vec<String>,
    pub handle: RunHandle,
    pub identity: Identity,
    pub params: RunParameters,
}

/// Snapshot written next to staged data as `metadata.json`. Field names are
/// read by the workflow side and must stay stable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataRecord {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub organization: String,
    pub description: String,
    pub number_of_runs: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gef_probe_radius: Option<f64>,
    pub uploaded_files: Vec<String>,
    pub timestamp: i64,
    pub folder: String,
}

impl MetadataRecord {
    pub fn new(
        identity: &Identity,
        params: &RunParameters,
        uploaded_files: Vec<String>,
        timestamp: i64,
        folder: String,
    ) -> Self {
        Self {
            user_id: identity.user_id.clone(),
            email: identity.email.clone(),
            name: identity.name.clone(),
            organization: identity.organization.clone(),
            description: identity.description.clone(),
            number_of_runs: params.number_of_runs,
            gef_probe_radius: params.probe_radius,
            uploaded_files,
            timestamp,
            folder,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunLiveness {
    Running,
    Exited,
}

impl RunLiveness {
    pub fn as_str(self) -> &'static str {
        match self {
            RunLiveness::Running => "running",
            RunLiveness::Exited => "exited",
        }
    }
}

/// Joins remote (always `/`-separated) path segments.
pub fn join_remote(base: &str, child: &str) -> String {
    let child = child.trim_start_matches('/');
    if base.is_empty() {
        return child.to_string();
    }
    if base.ends_with('/') {
        format!("{base}{child}")
    } else {
        format!("{base}/{child}")
    }
}
