// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use serde::Serialize;

use crate::app::errors::{AppResult, launch_error};
use crate::app::ports::{ClockPort, RemoteSessionPort};
use crate::app::services::remote_fs::ensure_directory;
use crate::app::services::shell::{RemoteStep, ShellScript};
use crate::app::types::{
    Identity, RemoteLayout, RunHandle, RunLiveness, RunParameters, WorkflowSettings, join_remote,
};

const RUN_NAME_USER_CHARS: usize = 8;
const MAX_EPOCH_BUMPS: i64 = 60;

/// `<prefix>-<first 8 safe chars of user id>-<epoch>`. Characters outside
/// `[A-Za-z0-9_-]` are dropped so the name is usable as a file name and a
/// workflow run name.
pub fn run_name(prefix: &str, user_id: &str, epoch: i64) -> String {
    let safe = |c: &char| c.is_ascii_alphanumeric() || *c == '-' || *c == '_';
    let user: String = user_id.chars().filter(safe).take(RUN_NAME_USER_CHARS).collect();
    let user = if user.is_empty() { "anon".to_string() } else { user };
    let prefix: String = prefix.chars().filter(safe).collect();
    if prefix.is_empty() {
        format!("{user}-{epoch}")
    } else {
        format!("{prefix}-{user}-{epoch}")
    }
}

/// Contents of `params-<epoch>.json`, handed to the workflow with `-params-file`.
#[derive(Debug, Serialize)]
struct ParamsDescriptor<'a> {
    user_id: &'a str,
    email: &'a str,
    name: &'a str,
    organization: &'a str,
    description: &'a str,
    number_of_runs: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    gef_probe_radius: Option<f64>,
    inputs_dir: &'a str,
}

/// Artifact paths predicted from the run name.
pub fn predict_handle(logs_dir: &str, run_name: &str, epoch: i64) -> RunHandle {
    RunHandle {
        run_name: run_name.to_string(),
        pid: String::new(),
        params_file: join_remote(logs_dir, &format!("params-{epoch}.json")),
        report: join_remote(logs_dir, &format!("{run_name}-report.html")),
        trace: join_remote(logs_dir, &format!("{run_name}-trace.txt")),
        timeline: join_remote(logs_dir, &format!("{run_name}-timeline.html")),
        stdout: join_remote(logs_dir, &format!("{run_name}.out")),
    }
}

pub fn launch_script(workflow: &WorkflowSettings, handle: &RunHandle) -> ShellScript {
    let mut script = ShellScript::new();
    for (key, value) in &workflow.env {
        script = script.env(key.clone(), value.clone());
    }
    if let Some(dir) = workflow.project_dir.as_deref().filter(|d| !d.is_empty()) {
        script = script.step(RemoteStep::ChangeDir {
            path: dir.to_string(),
        });
    }
    let mut args = vec![
        "run".to_string(),
        workflow.entry.clone(),
        "-params-file".to_string(),
        handle.params_file.clone(),
        "-name".to_string(),
        handle.run_name.clone(),
        "-with-report".to_string(),
        handle.report.clone(),
        "-with-trace".to_string(),
        handle.trace.clone(),
        "-with-timeline".to_string(),
        handle.timeline.clone(),
    ];
    args.extend(workflow.extra_args.iter().cloned());
    script.step(RemoteStep::Detached {
        program: workflow.binary.clone(),
        args,
        log: handle.stdout.clone(),
    })
}

/// The pid is the last non-empty stdout line and must be all digits.
pub fn parse_pid(stdout: &str) -> Option<String> {
    let line = stdout.lines().map(str::trim).rev().find(|l| !l.is_empty())?;
    if line.bytes().all(|b| b.is_ascii_digit()) && line.parse::<u32>().is_ok_and(|pid| pid > 0) {
        Some(line.to_string())
    } else {
        None
    }
}

/// First epoch at or after `start` whose params file and stdout log do not
/// exist yet. Callers hold the per-user lock so the answer stays valid until
/// the params file is written.
async fn free_handle(
    session: &dyn RemoteSessionPort,
    logs_dir: &str,
    workflow: &WorkflowSettings,
    user_id: &str,
    start: i64,
) -> AppResult<RunHandle> {
    for epoch in start..start.saturating_add(MAX_EPOCH_BUMPS) {
        let name = run_name(&workflow.run_name_prefix, user_id, epoch);
        let handle = predict_handle(logs_dir, &name, epoch);
        if !exists(session, &handle.params_file).await? && !exists(session, &handle.stdout).await? {
            return Ok(handle);
        }
        tracing::debug!(epoch, "run artifacts already exist; trying the next second");
    }
    Err(launch_error(format!(
        "no unused run name in {logs_dir} after {MAX_EPOCH_BUMPS} attempts"
    )))
}

async fn exists(session: &dyn RemoteSessionPort, path: &str) -> AppResult<bool> {
    session
        .entry_kind(path)
        .await
        .map(|kind| kind.is_some())
        .map_err(|err| launch_error(format!("cannot inspect {path}: {err}")))
}

/// Writes the parameter descriptor and starts the workflow detached.
#[tracing::instrument(name = "launch", level = "debug", skip_all, fields(user_id = %identity.user_id))]
pub async fn launch(
    session: &dyn RemoteSessionPort,
    clock: &dyn ClockPort,
    layout: &RemoteLayout,
    workflow: &WorkflowSettings,
    user_inputs_dir: &str,
    identity: &Identity,
    params: &RunParameters,
) -> AppResult<RunHandle> {
    let logs_dir = layout.user_logs_dir(&identity.user_id);
    ensure_directory(session, &logs_dir)
        .await
        .map_err(|err| launch_error(format!("cannot prepare log directory {logs_dir}: {err}")))?;
    let mut handle = free_handle(
        session,
        &logs_dir,
        workflow,
        &identity.user_id,
        clock.unix_seconds(),
    )
    .await?;

    let descriptor = ParamsDescriptor {
        user_id: &identity.user_id,
        email: &identity.email,
        name: &identity.name,
        organization: &identity.organization,
        description: &identity.description,
        number_of_runs: params.number_of_runs,
        gef_probe_radius: params.probe_radius,
        inputs_dir: user_inputs_dir,
    };
    let body = serde_json::to_vec_pretty(&descriptor)
        .map_err(|err| launch_error(format!("cannot encode run parameters: {err}")))?;
    session
        .write_file(&handle.params_file, &body)
        .await
        .map_err(|err| {
            launch_error(format!("cannot write {}: {err}", handle.params_file))
        })?;

    let command = launch_script(workflow, &handle).render()?;
    let capture = session
        .exec_capture(&command)
        .await
        .map_err(|err| launch_error(format!("workflow launch command failed: {err}")))?;
    if !capture.success() {
        return Err(launch_error(format!(
            "workflow launch exited with status {}",
            capture.exit_code
        ))
        .with_context(capture.diagnostic().trim().to_string()));
    }
    let stdout = capture.stdout_text();
    handle.pid = parse_pid(&stdout).ok_or_else(|| {
        launch_error("workflow launch did not report a process id")
            .with_context(stdout.trim().to_string())
    })?;

    tracing::info!(run_name = %handle.run_name, pid = %handle.pid, "workflow launched");
    Ok(handle)
}

/// Checks whether `pid` is still alive on the remote side.
pub async fn probe_liveness(session: &dyn RemoteSessionPort, pid: u32) -> AppResult<RunLiveness> {
    let command = ShellScript::new()
        .step(RemoteStep::ProcessAlive { pid })
        .render()?;
    let capture = session
        .exec_capture(&command)
        .await
        .map_err(|err| launch_error(format!("liveness check for pid {pid} failed: {err}")))?;
    if !capture.success() {
        return Err(launch_error(format!("liveness check for pid {pid} failed"))
            .with_context(capture.diagnostic().trim().to_string()));
    }
    match capture.stdout_text().trim() {
        "running" => Ok(RunLiveness::Running),
        _ => Ok(RunLiveness::Exited),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::app::errors::AppErrorKind;
    use crate::app::fakes::{FakeSession, FixedClock};

    fn layout() -> RemoteLayout {
        RemoteLayout {
            inputs_root: "/base/inputs".to_string(),
            outputs_root: "/base/outputs".to_string(),
            logs_root: "/base/logs".to_string(),
        }
    }

    fn workflow() -> WorkflowSettings {
        let mut env = BTreeMap::new();
        env.insert("SCRATCH_ROOT".to_string(), "/scratch".to_string());
        WorkflowSettings {
            binary: "nextflow".to_string(),
            entry: "main.nf".to_string(),
            extra_args: vec!["-resume".to_string()],
            project_dir: Some("/opt/pipeline".to_string()),
            run_name_prefix: "allosmod".to_string(),
            env,
        }
    }

    fn identity() -> Identity {
        Identity {
            user_id: "user-0123456789".to_string(),
            email: "ada@example.org".to_string(),
            name: "Ada".to_string(),
            organization: String::new(),
            description: String::new(),
        }
    }

    fn params() -> RunParameters {
        RunParameters {
            number_of_runs: 2,
            probe_radius: Some(3.0),
        }
    }

    #[test]
    fn run_name_is_sanitized_and_truncated() {
        assert_eq!(run_name("allosmod", "abcdef0123", 42), "allosmod-abcdef01-42");
        assert_eq!(run_name("allosmod", "a/b c;d", 1), "allosmod-abcd-1");
        assert_eq!(run_name("allosmod", "../..", 1), "allosmod-anon-1");
        assert_eq!(run_name("", "u1", 5), "u1-5");
    }

    #[test]
    fn parse_pid_takes_last_numeric_line() {
        assert_eq!(parse_pid("12345\n"), Some("12345".to_string()));
        assert_eq!(parse_pid("noise\n  678 \n\n"), Some("678".to_string()));
        assert_eq!(parse_pid(""), None);
        assert_eq!(parse_pid("abc\n"), None);
        assert_eq!(parse_pid("12a\n"), None);
        assert_eq!(parse_pid("0\n"), None);
    }

    #[test]
    fn launch_script_backgrounds_the_workflow() {
        let handle = predict_handle("/logs", "allosmod-u1-7", 7);
        let rendered = launch_script(&workflow(), &handle).render().unwrap();
        assert_eq!(
            rendered,
            "set -e\n\
             export SCRATCH_ROOT='/scratch'\n\
             cd '/opt/pipeline'\n\
             nohup 'nextflow' 'run' 'main.nf' '-params-file' '/logs/params-7.json' '-name' 'allosmod-u1-7' \
             '-with-report' '/logs/allosmod-u1-7-report.html' '-with-trace' '/logs/allosmod-u1-7-trace.txt' \
             '-with-timeline' '/logs/allosmod-u1-7-timeline.html' '-resume' > '/logs/allosmod-u1-7.out' 2>&1 < /dev/null &\n\
             echo $!"
        );
    }

    #[tokio::test]
    async fn launch_returns_echoed_pid_and_writes_params() {
        let session = FakeSession::with_dirs(&["/base"]);
        session.push_exec(0, "12345\n", "");
        let handle = launch(
            &session,
            &FixedClock(1700000000),
            &layout(),
            &workflow(),
            "/base/inputs/user-0123456789",
            &identity(),
            &params(),
        )
        .await
        .unwrap();

        assert_eq!(handle.pid, "12345");
        assert_eq!(handle.run_name, "allosmod-user-012-1700000000");
        assert_eq!(
            handle.params_file,
            "/base/logs/user-0123456789/nextflow/params-1700000000.json"
        );
        assert!(handle.report.starts_with("/base/logs/user-0123456789/nextflow/"));
        let params: serde_json::Value =
            serde_json::from_slice(&session.file(&handle.params_file).unwrap()).unwrap();
        assert_eq!(params["email"], "ada@example.org");
        assert_eq!(params["number_of_runs"], 2);
        assert_eq!(params["gef_probe_radius"], 3.0);
    }

    #[tokio::test]
    async fn launch_fails_on_nonzero_exit() {
        let session = FakeSession::new();
        session.push_exec(127, "", "nohup: failed to run command 'nextflow': No such file");
        let err = launch(
            &session,
            &FixedClock(1),
            &layout(),
            &workflow(),
            "/base/inputs/u",
            &identity(),
            &params(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::Launch);
        assert!(err.context().unwrap().contains("No such file"));
    }

    #[tokio::test]
    async fn launch_fails_without_pid() {
        for stdout in ["", "\n", "not-a-pid\n"] {
            let session = FakeSession::new();
            session.push_exec(0, stdout, "");
            let err = launch(
                &session,
                &FixedClock(1),
                &layout(),
                &workflow(),
                "/base/inputs/u",
                &identity(),
                &params(),
            )
            .await
            .unwrap_err();
            assert_eq!(err.kind(), AppErrorKind::Launch, "stdout {stdout:?}");
        }
    }

    #[tokio::test]
    async fn broken_exec_channel_is_a_launch_error() {
        let session = FakeSession::new();
        session.fail_exec_on("echo $!");
        let err = launch(
            &session,
            &FixedClock(1),
            &layout(),
            &workflow(),
            "/base/inputs/u",
            &identity(),
            &params(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::Launch);
        assert!(err.message().contains("exec channel closed"), "{}", err.message());

        session.fail_exec_on("kill -0");
        let err = probe_liveness(&session, 42).await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::Launch);
    }

    #[tokio::test]
    async fn existing_run_artifacts_push_the_epoch_forward() {
        let logs = "/base/logs/user-0123456789/nextflow";
        let session = FakeSession::new();
        session.add_file(&format!("{logs}/params-100.json"), b"{}");
        session.add_file(&format!("{logs}/allosmod-user-012-101.out"), b"");
        session.respond_to("echo $!", 0, "9\n", "");
        let handle = launch(
            &session,
            &FixedClock(100),
            &layout(),
            &workflow(),
            "/base/inputs/user-0123456789",
            &identity(),
            &params(),
        )
        .await
        .unwrap();
        assert_eq!(handle.params_file, format!("{logs}/params-102.json"));
        assert_eq!(handle.run_name, "allosmod-user-012-102");
        assert_eq!(session.file_text(&format!("{logs}/params-100.json")).unwrap(), "{}");
    }

    #[tokio::test]
    async fn probe_reads_liveness() {
        let session = FakeSession::new();
        session.push_exec(0, "running\n", "");
        session.push_exec(0, "exited\n", "");
        assert_eq!(probe_liveness(&session, 42).await.unwrap(), RunLiveness::Running);
        assert_eq!(probe_liveness(&session, 42).await.unwrap(), RunLiveness::Exited);
        assert!(session.commands()[0].contains("kill -0 42"));
    }
}
