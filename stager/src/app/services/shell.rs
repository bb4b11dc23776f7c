// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Remote operations as typed steps, rendered to `sh` text in one place.
//! Every interpolated value goes through [`sh_escape`]; nothing else in the
//! crate builds shell strings by hand.

use crate::app::errors::{AppResult, invalid_argument};

/// Very small, safe-ish shell escaper for paths.
pub fn sh_escape(p: &str) -> String {
    let mut out = String::from("'");
    out.push_str(&p.replace('\'', r"'\''"));
    out.push('\'');
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStep {
    ChangeDir { path: String },
    /// Non-recursive; fails if the directory already exists.
    MakeDir { path: String },
    MakeDirs { path: String },
    RemoveTree { path: String },
    Move { from: String, to: String },
    CopyInto { file: String, dir: String },
    Unzip { archive: String, dest: String },
    Untar { archive: String, dest: String },
    /// Creates and removes a scratch file to prove `dir` is writable.
    WriteProbe { dir: String },
    /// Prints `running` or `exited`.
    ProcessAlive { pid: u32 },
    /// Starts `program` in the background, immune to hangup, and prints its pid.
    Detached {
        program: String,
        args: Vec<String>,
        log: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellScript {
    env: Vec<(String, String)>,
    steps: Vec<RemoteStep>,
}

impl ShellScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn step(mut self, step: RemoteStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(&self) -> &[RemoteStep] {
        &self.steps
    }

    /// Renders a fail-fast script: the first failing step aborts with its exit code.
    pub fn render(&self) -> AppResult<String> {
        let mut lines = vec!["set -e".to_string()];
        for (key, value) in &self.env {
            if !is_valid_env_key(key) {
                return Err(invalid_argument(format!(
                    "invalid environment variable name '{key}'"
                )));
            }
            lines.push(format!("export {key}={}", sh_escape(value)));
        }
        for step in &self.steps {
            render_step(step, &mut lines)?;
        }
        Ok(lines.join("\n"))
    }
}

fn render_step(step: &RemoteStep, lines: &mut Vec<String>) -> AppResult<()> {
    match step {
        RemoteStep::ChangeDir { path } => lines.push(format!("cd {}", sh_escape(path))),
        RemoteStep::MakeDir { path } => lines.push(format!("mkdir {}", sh_escape(path))),
        RemoteStep::MakeDirs { path } => lines.push(format!("mkdir -p {}", sh_escape(path))),
        RemoteStep::RemoveTree { path } => {
            if is_unsafe_removal_path(path) {
                return Err(invalid_argument(format!(
                    "refusing to remove unsafe path '{path}'"
                )));
            }
            lines.push(format!("rm -rf {}", sh_escape(path)));
        }
        RemoteStep::Move { from, to } => {
            lines.push(format!("mv {} {}", sh_escape(from), sh_escape(to)))
        }
        RemoteStep::CopyInto { file, dir } => {
            let dir = format!("{}/", dir.trim_end_matches('/'));
            lines.push(format!("cp {} {}", sh_escape(file), sh_escape(&dir)));
        }
        RemoteStep::Unzip { archive, dest } => lines.push(format!(
            "unzip -o -q {} -d {}",
            sh_escape(archive),
            sh_escape(dest)
        )),
        RemoteStep::Untar { archive, dest } => lines.push(format!(
            "tar -xf {} -C {}",
            sh_escape(archive),
            sh_escape(dest)
        )),
        RemoteStep::WriteProbe { dir } => {
            let probe = format!("{}/.stager-write-probe", dir.trim_end_matches('/'));
            let probe = sh_escape(&probe);
            lines.push(format!(": > {probe}"));
            lines.push(format!("rm -f {probe}"));
        }
        RemoteStep::ProcessAlive { pid } => lines.push(format!(
            "if kill -0 {pid} 2>/dev/null; then echo running; else echo exited; fi"
        )),
        RemoteStep::Detached { program, args, log } => {
            let mut command = vec!["nohup".to_string(), sh_escape(program)];
            command.extend(args.iter().map(|arg| sh_escape(arg)));
            lines.push(format!(
                "{} > {} 2>&1 < /dev/null &",
                command.join(" "),
                sh_escape(log)
            ));
            lines.push("echo $!".to_string());
        }
    }
    Ok(())
}

/// POSIX shell variable name: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_unsafe_removal_path(path: &str) -> bool {
    let trimmed = path.trim();
    if trimmed.is_empty() || !trimmed.starts_with('/') {
        return true;
    }
    let normalized = trimmed.trim_end_matches('/');
    if normalized.is_empty() {
        return true;
    }
    normalized
        .split('/')
        .any(|segment| segment == ".." || segment == ".")
}
