// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use crate::app::errors::{AppResult, invalid_argument, staging_error};
use crate::app::ports::{ClockPort, RemoteSessionPort};
use crate::app::services::config_merge::apply_run_parameters;
use crate::app::services::remote_fs::{ensure_directory, upload_file};
use crate::app::services::shell::{RemoteStep, ShellScript};
use crate::app::types::{
    Identity, MetadataRecord, RunParameters, StagedPayload, WorkspaceSlot, join_remote,
};

pub const METADATA_FILE: &str = "metadata.json";
pub const STAGING_DIR: &str = ".staging";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Zip,
    Tar,
    /// Anything that is not an archive; copied under `input/`.
    Loose,
}

impl PayloadKind {
    pub fn classify(file_name: &str) -> Self {
        let lower = file_name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            PayloadKind::Zip
        } else if [".tar", ".tgz", ".gz"].iter().any(|ext| lower.ends_with(ext)) {
            PayloadKind::Tar
        } else {
            PayloadKind::Loose
        }
    }
}

/// File name without its extension; `.tar.gz` is stripped as a whole.
pub fn payload_stem(file_name: &str) -> String {
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(".tar.gz") && file_name.len() > ".tar.gz".len() {
        return file_name[..file_name.len() - ".tar.gz".len()].to_string();
    }
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => file_name[..idx].to_string(),
        _ => file_name.to_string(),
    }
}

/// Remote paths used while one payload is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StagingPaths {
    root: String,
    archive: String,
    extract: String,
    target: String,
}

impl StagingPaths {
    fn new(slot: &WorkspaceSlot, epoch: i64, file_name: &str, stem: &str) -> Self {
        let user_inputs_dir = slot
            .path
            .rsplit_once('/')
            .map(|(parent, _)| parent)
            .unwrap_or_default();
        let root = join_remote(
            &join_remote(user_inputs_dir, STAGING_DIR),
            &format!("{epoch}-{}", slot.name()),
        );
        Self {
            archive: join_remote(&join_remote(&root, "archive"), file_name),
            extract: join_remote(&join_remote(&root, "extract"), stem),
            target: join_remote(&slot.path, stem),
            root,
        }
    }
}

/// Uploads one payload, unpacks it next to the workspace, merges the run
/// parameters and moves the result into `<slot>/<stem>`. The workspace is only
/// touched by the final relocation; anything earlier that fails leaves it as it
/// was and removes the staging directory.
#[tracing::instrument(
    name = "stage",
    level = "debug",
    skip_all,
    fields(slot = %slot.path, payload = %local_path.display())
)]
pub async fn stage_payload(
    session: &dyn RemoteSessionPort,
    clock: &dyn ClockPort,
    local_path: &Path,
    slot: &WorkspaceSlot,
    params: &RunParameters,
    identity: &Identity,
) -> AppResult<StagedPayload> {
    let file_name = local_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            invalid_argument(format!("payload has no file name: {}", local_path.display()))
        })?;
    let stem = payload_stem(&file_name);
    if stem.is_empty() || stem == "." || stem == ".." || stem.contains('/') {
        return Err(invalid_argument(format!(
            "payload name cannot be used as a directory: {file_name}"
        )));
    }
    let epoch = clock.unix_seconds();
    let paths = StagingPaths::new(slot, epoch, &file_name, &stem);

    match stage_inner(session, local_path, &file_name, &paths, params).await {
        Ok(()) => {}
        Err(err) => {
            discard_staging(session, &paths.root).await;
            return Err(err);
        }
    }

    let uploaded_files = vec![file_name];
    let record = MetadataRecord::new(identity, params, uploaded_files.clone(), epoch, slot.name());
    write_metadata(session, &paths.target, &record).await?;

    tracing::info!(target_path = %paths.target, "payload staged");
    Ok(StagedPayload {
        local_path: local_path.to_path_buf(),
        remote_archive_path: paths.archive,
        target_path: paths.target,
        uploaded_files,
    })
}

async fn stage_inner(
    session: &dyn RemoteSessionPort,
    local_path: &Path,
    file_name: &str,
    paths: &StagingPaths,
    params: &RunParameters,
) -> AppResult<()> {
    let archive_dir = paths
        .archive
        .rsplit_once('/')
        .map(|(parent, _)| parent.to_string())
        .unwrap_or_default();
    ensure_directory(session, &archive_dir).await?;
    upload_file(session, local_path, &paths.archive).await?;

    let extract = extraction_script(file_name, &paths.archive, &paths.extract).render()?;
    let capture = session
        .exec_capture(&extract)
        .await
        .map_err(|err| staging_error(format!("failed to unpack {file_name}"), &err.to_string()))?;
    if !capture.success() {
        return Err(staging_error(
            format!("failed to unpack {file_name}"),
            &capture.diagnostic(),
        ));
    }

    apply_run_parameters(session, &paths.extract, params).await?;

    let relocate = relocation_script(paths).render()?;
    let capture = session.exec_capture(&relocate).await.map_err(|err| {
        staging_error(
            format!("failed to place {file_name} into {}", paths.target),
            &err.to_string(),
        )
    })?;
    if !capture.success() {
        return Err(staging_error(
            format!("failed to place {file_name} into {}", paths.target),
            &capture.diagnostic(),
        ));
    }
    Ok(())
}

fn extraction_script(file_name: &str, archive: &str, extract: &str) -> ShellScript {
    let script = ShellScript::new().step(RemoteStep::MakeDirs {
        path: extract.to_string(),
    });
    match PayloadKind::classify(file_name) {
        PayloadKind::Zip => script.step(RemoteStep::Unzip {
            archive: archive.to_string(),
            dest: extract.to_string(),
        }),
        PayloadKind::Tar => script.step(RemoteStep::Untar {
            archive: archive.to_string(),
            dest: extract.to_string(),
        }),
        PayloadKind::Loose => {
            let input = join_remote(extract, "input");
            script
                .step(RemoteStep::MakeDirs {
                    path: input.clone(),
                })
                .step(RemoteStep::CopyInto {
                    file: archive.to_string(),
                    dir: input,
                })
        }
    }
}

/// Replaces any previous target, never merges into it.
fn relocation_script(paths: &StagingPaths) -> ShellScript {
    let slot_dir = paths
        .target
        .rsplit_once('/')
        .map(|(parent, _)| parent.to_string())
        .unwrap_or_default();
    ShellScript::new()
        .step(RemoteStep::MakeDirs { path: slot_dir })
        .step(RemoteStep::RemoveTree {
            path: paths.target.clone(),
        })
        .step(RemoteStep::Move {
            from: paths.extract.clone(),
            to: paths.target.clone(),
        })
        .step(RemoteStep::RemoveTree {
            path: paths.root.clone(),
        })
}

async fn discard_staging(session: &dyn RemoteSessionPort, root: &str) {
    let script = ShellScript::new().step(RemoteStep::RemoveTree {
        path: root.to_string(),
    });
    let outcome = match script.render() {
        Ok(command) => session.exec_capture(&command).await.map(|c| c.success()),
        Err(err) => Err(err),
    };
    match outcome {
        Ok(true) => tracing::debug!(root, "staging directory removed"),
        Ok(false) => tracing::warn!(root, "could not remove staging directory"),
        Err(err) => tracing::warn!(root, error = %err, "could not remove staging directory"),
    }
}

/// Pretty-printed `metadata.json` inside `dir`.
pub async fn write_metadata(
    session: &dyn RemoteSessionPort,
    dir: &str,
    record: &MetadataRecord,
) -> AppResult<()> {
    let path = join_remote(dir, METADATA_FILE);
    let body = serde_json::to_string_pretty(record)
        .map_err(|err| staging_error(format!("failed to encode {path}"), &err.to_string()))?;
    session
        .write_file(&path, body.as_bytes())
        .await
        .map_err(|err| staging_error(format!("failed to write {path}"), &err.to_string()))
}
