// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Creates or updates the flat `KEY=VALUE` run parameter file (`input.dat`).

use crate::app::errors::{AppResult, staging_error};
use crate::app::ports::RemoteSessionPort;
use crate::app::types::{RunParameters, join_remote};

pub const INPUT_FILE: &str = "input.dat";

const DEFAULTS: [(&str, &str); 4] = [
    ("DEVIATION", "4.0"),
    ("COARSE", "false"),
    ("SAMPLING", "simulation"),
    ("TEMPERATURE", "300.0"),
];

/// Keys owned by this module, in the order they are written.
fn managed_entries(params: &RunParameters) -> Vec<(&'static str, String)> {
    let mut entries = vec![("NRUNS", params.number_of_runs.to_string())];
    if let Some(radius) = params.probe_radius {
        entries.push(("GEF_PROBE_RADIUS", format_float(radius)));
    }
    entries
}

/// Always keeps a fractional part, so `3` is written as `3.0`.
fn format_float(value: f64) -> String {
    format!("{value:?}")
}

fn line_key(line: &str) -> Option<&str> {
    line.trim_start()
        .split_once('=')
        .map(|(key, _)| key.trim_end())
}

/// Pure merge over the file text. `None` means the file does not exist yet and
/// a fresh one with defaults is produced. Applying the result again with the
/// same parameters yields identical text.
pub fn merge_run_parameters(existing: Option<&str>, params: &RunParameters) -> String {
    let managed = managed_entries(params);
    let mut lines: Vec<String> = Vec::new();

    match existing {
        None => {
            lines.extend(managed.iter().map(|(key, value)| format!("{key}={value}")));
            lines.extend(DEFAULTS.iter().map(|(key, value)| format!("{key}={value}")));
        }
        Some(text) => {
            let mut written = vec![false; managed.len()];
            for line in text.lines() {
                let slot = line_key(line)
                    .and_then(|key| managed.iter().position(|(managed_key, _)| *managed_key == key));
                match slot {
                    Some(idx) if written[idx] => {}
                    Some(idx) => {
                        let (key, value) = &managed[idx];
                        lines.push(format!("{key}={value}"));
                        written[idx] = true;
                    }
                    None => lines.push(line.to_string()),
                }
            }
            for (idx, (key, value)) in managed.iter().enumerate() {
                if !written[idx] {
                    lines.push(format!("{key}={value}"));
                }
            }
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Reads `<workspace>/input.dat` if present, merges, and writes it back.
pub async fn apply_run_parameters(
    session: &dyn RemoteSessionPort,
    workspace_path: &str,
    params: &RunParameters,
) -> AppResult<()> {
    let path = join_remote(workspace_path, INPUT_FILE);
    let existing = session
        .read_file(&path)
        .await
        .map_err(|err| staging_error(format!("failed to read {path}"), &err.to_string()))?;
    let existing = existing.map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
    let merged = merge_run_parameters(existing.as_deref(), params);
    session
        .write_file(&path, merged.as_bytes())
        .await
        .map_err(|err| staging_error(format!("failed to write {path}"), &err.to_string()))?;
    tracing::debug!(path = %path, created = existing.is_none(), "run parameters applied");
    Ok(())
}
