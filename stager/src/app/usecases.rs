// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use crate::app::errors::{AppResult, invalid_argument, staging_error};
use crate::app::ports::{ClockPort, RemoteSessionPort, SessionConnectorPort};
use crate::app::services::archive::{payload_stem, stage_payload, write_metadata};
use crate::app::services::config_merge::{INPUT_FILE, apply_run_parameters};
use crate::app::services::launcher::{launch, probe_liveness};
use crate::app::services::remote_fs::{ensure_directory, upload_file};
use crate::app::services::shell::{RemoteStep, ShellScript};
use crate::app::services::workspace::{SlotLocks, allocate};
use crate::app::types::{
    MetadataRecord, RunLiveness, RunRecord, StagerSettings, StagingRequest, WorkspaceSlot,
    join_remote,
};

pub const DEFAULT_MAX_PAYLOADS: usize = 10;

/// Entry point for one staging request or one liveness check. Cheap to clone;
/// clones share the per-user slot locks.
#[derive(Clone)]
pub struct UseCases {
    pub(crate) settings: Arc<StagerSettings>,
    pub(crate) connector: Arc<dyn SessionConnectorPort>,
    pub(crate) clock: Arc<dyn ClockPort>,
    pub(crate) slot_locks: Arc<SlotLocks>,
}

impl UseCases {
    pub fn new(
        settings: StagerSettings,
        connector: Arc<dyn SessionConnectorPort>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            connector,
            clock,
            slot_locks: Arc::new(SlotLocks::new()),
        }
    }

    pub fn settings(&self) -> &StagerSettings {
        &self.settings
    }

    /// Stages every payload of `request` into one fresh workspace slot and
    /// launches the workflow once. The session is closed on every path.
    #[tracing::instrument(
        name = "stage_request",
        skip_all,
        fields(user_id = %request.identity.user_id, payloads = request.payloads.len())
    )]
    pub async fn run(&self, request: StagingRequest) -> AppResult<RunRecord> {
        self.validate(&request)?;
        let session = self.connector.open(&self.settings.endpoint).await?;
        tracing::debug!(remote = session.target(), "session opened");
        let result = self.run_in_session(session.as_ref(), &request).await;
        session.close().await;
        match &result {
            Ok(record) => tracing::info!(
                run_name = %record.run_name,
                pid = %record.pid,
                slot = %record.slot.path,
                "staging request completed"
            ),
            Err(err) => tracing::warn!(code = err.code(), error = %err, "staging request failed"),
        }
        result
    }

    /// Reports whether a previously launched run is still alive.
    pub async fn probe(&self, pid: u32) -> AppResult<RunLiveness> {
        if pid == 0 {
            return Err(invalid_argument("pid must be positive"));
        }
        let session = self.connector.open(&self.settings.endpoint).await?;
        let result = probe_liveness(session.as_ref(), pid).await;
        session.close().await;
        result
    }

    fn validate(&self, request: &StagingRequest) -> AppResult<()> {
        let max = self.settings.max_payloads;
        if request.payloads.is_empty() {
            return Err(invalid_argument("at least one payload is required"));
        }
        if request.payloads.len() > max {
            return Err(invalid_argument(format!(
                "too many payloads: {} (maximum {max})",
                request.payloads.len()
            )));
        }
        if request.params.number_of_runs == 0 {
            return Err(invalid_argument("number of runs must be positive"));
        }
        if let Some(radius) = request.params.probe_radius {
            if !radius.is_finite() || radius <= 0.0 {
                return Err(invalid_argument(format!(
                    "probe radius must be a positive number, got {radius}"
                )));
            }
        }
        validate_user_id(&request.identity.user_id)?;

        let mut stems = BTreeSet::new();
        for payload in &request.payloads {
            let Some(name) = payload.file_name() else {
                return Err(invalid_argument(format!(
                    "payload has no file name: {}",
                    payload.display()
                )));
            };
            let name = name.to_string_lossy();
            // A run configuration occupies `<slot>/input.dat` itself.
            let stem = if name == INPUT_FILE {
                INPUT_FILE.to_string()
            } else {
                payload_stem(&name)
            };
            if !stems.insert(stem.clone()) {
                return Err(invalid_argument(format!(
                    "two payloads would be placed into the same directory '{stem}'"
                )));
            }
        }
        Ok(())
    }

    async fn run_in_session(
        &self,
        session: &dyn RemoteSessionPort,
        request: &StagingRequest,
    ) -> AppResult<RunRecord> {
        let layout = &self.settings.layout;
        let user_id = &request.identity.user_id;
        let user_inputs_dir = layout.user_inputs_dir(user_id);
        let user_logs_dir = layout.user_logs_dir(user_id);

        self.prepare_user_dirs(session, &user_inputs_dir, &user_logs_dir)
            .await?;

        let slot = allocate(session, &self.slot_locks, user_id, &user_inputs_dir).await?;

        let mut placed_paths = Vec::with_capacity(request.payloads.len());
        for payload in &request.payloads {
            if is_run_config(payload) {
                // Merged with the run parameters by `finish_slot`.
                let target = join_remote(&slot.path, INPUT_FILE);
                upload_file(session, payload, &target).await?;
                placed_paths.push(target);
                continue;
            }
            let staged = stage_payload(
                session,
                self.clock.as_ref(),
                payload,
                &slot,
                &request.params,
                &request.identity,
            )
            .await?;
            placed_paths.push(staged.target_path);
        }

        self.finish_slot(session, &slot, request).await?;

        let _launch_guard = self.slot_locks.acquire(user_id).await;
        let handle = launch(
            session,
            self.clock.as_ref(),
            layout,
            &self.settings.workflow,
            &user_inputs_dir,
            &request.identity,
            &request.params,
        )
        .await?;

        Ok(RunRecord {
            run_name: handle.run_name.clone(),
            pid: handle.pid.clone(),
            slot,
            placed_paths,
            handle,
            identity: request.identity.clone(),
            params: request.params.clone(),
        })
    }

    async fn prepare_user_dirs(
        &self,
        session: &dyn RemoteSessionPort,
        user_inputs_dir: &str,
        user_logs_dir: &str,
    ) -> AppResult<()> {
        let outputs_root = &self.settings.layout.outputs_root;
        let dirs = [user_inputs_dir, outputs_root.as_str(), user_logs_dir];
        let mut probe = ShellScript::new();
        for dir in dirs {
            ensure_directory(session, dir).await?;
            probe = probe.step(RemoteStep::WriteProbe {
                dir: dir.to_string(),
            });
        }
        let capture = session
            .exec_capture(&probe.render()?)
            .await
            .map_err(|err| {
                staging_error("remote directories are not writable", &err.to_string())
            })?;
        if !capture.success() {
            return Err(staging_error(
                "remote directories are not writable",
                &capture.diagnostic(),
            ));
        }
        Ok(())
    }

    /// Slot-level `input.dat` and `metadata.json` covering the whole request.
    /// An uploaded `input.dat` is already in place and keeps its other keys.
    async fn finish_slot(
        &self,
        session: &dyn RemoteSessionPort,
        slot: &WorkspaceSlot,
        request: &StagingRequest,
    ) -> AppResult<()> {
        apply_run_parameters(session, &slot.path, &request.params).await?;
        let uploaded_files = request
            .payloads
            .iter()
            .filter_map(|p| p.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        let record = MetadataRecord::new(
            &request.identity,
            &request.params,
            uploaded_files,
            self.clock.unix_seconds(),
            slot.name(),
        );
        write_metadata(session, &slot.path, &record).await
    }
}

/// A loose `input.dat` is the user's run configuration, not a payload.
fn is_run_config(payload: &Path) -> bool {
    payload.file_name().is_some_and(|name| name == INPUT_FILE)
}

/// The user id becomes a directory name, so it must be one plain path segment.
fn validate_user_id(user_id: &str) -> AppResult<()> {
    let trimmed = user_id.trim();
    if trimmed.is_empty() {
        return Err(invalid_argument("user id is required"));
    }
    if trimmed != user_id
        || user_id == "."
        || user_id == ".."
        || user_id.starts_with('.')
        || user_id.chars().any(|c| c == '/' || c == '\\' || c.is_control())
    {
        return Err(invalid_argument(format!(
            "user id cannot be used as a directory name: {user_id:?}"
        )));
    }
    Ok(())
}
