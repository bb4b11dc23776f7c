// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! In-memory session used by the service tests. It keeps a small directory
//! tree, records every command and answers `exec_capture` from a queue.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{
    ClockPort, ExecCapture, RemoteEntryKind, RemoteSessionPort, SessionConnectorPort,
};
use crate::app::types::RemoteEndpoint;

#[derive(Default)]
pub(crate) struct FakeState {
    pub dirs: BTreeSet<String>,
    pub files: BTreeMap<String, Vec<u8>>,
    pub commands: Vec<String>,
    pub exec_results: VecDeque<ExecCapture>,
    pub exec_rules: Vec<(String, ExecCapture)>,
    pub exec_failures: Vec<String>,
    pub refuse_create_dir: bool,
    pub create_dir_calls: usize,
    pub close_calls: usize,
}

pub(crate) struct FakeSession {
    pub state: Mutex<FakeState>,
}

impl FakeSession {
    pub fn new() -> Self {
        let mut state = FakeState::default();
        state.dirs.insert("/".to_string());
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn with_dirs(dirs: &[&str]) -> Self {
        let session = Self::new();
        for dir in dirs {
            session.add_dir(dir);
        }
        session
    }

    pub fn add_dir(&self, path: &str) {
        let mut state = self.state.lock().expect("fake state lock");
        insert_with_ancestors(&mut state.dirs, path);
    }

    pub fn add_file(&self, path: &str, contents: &[u8]) {
        let mut state = self.state.lock().expect("fake state lock");
        if let Some(parent) = parent_of(path) {
            insert_with_ancestors(&mut state.dirs, &parent);
        }
        state.files.insert(path.to_string(), contents.to_vec());
    }

    pub fn push_exec(&self, exit_code: i32, stdout: &str, stderr: &str) {
        self.state
            .lock()
            .expect("fake state lock")
            .exec_results
            .push_back(ExecCapture {
                stdout: stdout.as_bytes().to_vec(),
                stderr: stderr.as_bytes().to_vec(),
                exit_code,
            });
    }

    /// Answers every command containing `needle` with this result, ahead of the queue.
    pub fn respond_to(&self, needle: &str, exit_code: i32, stdout: &str, stderr: &str) {
        self.state.lock().expect("fake state lock").exec_rules.push((
            needle.to_string(),
            ExecCapture {
                stdout: stdout.as_bytes().to_vec(),
                stderr: stderr.as_bytes().to_vec(),
                exit_code,
            },
        ));
    }

    /// Fails every command containing `needle` at the transport level.
    pub fn fail_exec_on(&self, needle: &str) {
        self.state
            .lock()
            .expect("fake state lock")
            .exec_failures
            .push(needle.to_string());
    }

    pub fn refuse_create_dir(&self) {
        self.state.lock().expect("fake state lock").refuse_create_dir = true;
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .expect("fake state lock")
            .files
            .get(path)
            .cloned()
    }

    pub fn file_text(&self, path: &str) -> Option<String> {
        self.file(path)
            .map(|bytes| String::from_utf8(bytes).expect("utf-8 file"))
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.state.lock().expect("fake state lock").dirs.contains(path)
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().expect("fake state lock").commands.clone()
    }

    pub fn create_dir_calls(&self) -> usize {
        self.state.lock().expect("fake state lock").create_dir_calls
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().expect("fake state lock").close_calls
    }
}

fn remote_error(message: String) -> AppError {
    AppError::with_message(AppErrorKind::Internal, codes::REMOTE_ERROR, message)
}

fn parent_of(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    if idx == 0 {
        Some("/".to_string())
    } else {
        Some(trimmed[..idx].to_string())
    }
}

fn insert_with_ancestors(dirs: &mut BTreeSet<String>, path: &str) {
    let mut cur = Some(path.trim_end_matches('/').to_string());
    while let Some(p) = cur {
        if p.is_empty() {
            break;
        }
        cur = parent_of(&p);
        dirs.insert(p);
    }
}

/// Parses `<cmd>'a' 'b'` as produced by the shell renderer for plain paths.
fn quoted_pair(line: &str, command: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix(command)?.strip_prefix('\'')?.strip_suffix('\'')?;
    let (a, b) = rest.split_once("' '")?;
    Some((a.to_string(), b.to_string()))
}

fn is_under(entry: &str, root: &str) -> bool {
    entry == root || entry.starts_with(&format!("{root}/"))
}

fn move_tree(state: &mut FakeState, from: &str, to: &str) {
    let dirs: Vec<String> = state.dirs.iter().filter(|d| is_under(d, from)).cloned().collect();
    for dir in dirs {
        state.dirs.remove(&dir);
        state.dirs.insert(format!("{to}{}", &dir[from.len()..]));
    }
    let files: Vec<String> = state.files.keys().filter(|f| is_under(f, from)).cloned().collect();
    for file in files {
        if let Some(contents) = state.files.remove(&file) {
            state.files.insert(format!("{to}{}", &file[from.len()..]), contents);
        }
    }
}

fn remove_tree(state: &mut FakeState, root: &str) {
    state.dirs.retain(|d| !is_under(d, root));
    state.files.retain(|f, _| !is_under(f, root));
}

#[async_trait]
impl RemoteSessionPort for FakeSession {
    fn target(&self) -> &str {
        "fake@remote:22"
    }

    async fn exec_capture(&self, command: &str) -> AppResult<ExecCapture> {
        let mut state = self.state.lock().expect("fake state lock");
        state.commands.push(command.to_string());
        if state
            .exec_failures
            .iter()
            .any(|needle| command.contains(needle.as_str()))
        {
            return Err(remote_error("exec channel closed by peer".to_string()));
        }
        let ruled = state
            .exec_rules
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, result)| result.clone());
        let result = ruled
            .or_else(|| state.exec_results.pop_front())
            .unwrap_or(ExecCapture {
                stdout: Vec::new(),
                stderr: Vec::new(),
                exit_code: 0,
            });
        if !result.success() {
            return Ok(result);
        }
        for line in command.lines() {
            if let Some(rest) = line.strip_prefix("mkdir -p '") {
                let path = rest.trim_end_matches('\'');
                insert_with_ancestors(&mut state.dirs, path);
            } else if let Some(rest) = line.strip_prefix("mkdir '") {
                let path = rest.trim_end_matches('\'').to_string();
                let parent_missing = parent_of(&path).is_none_or(|p| !state.dirs.contains(&p));
                if state.dirs.contains(&path) || parent_missing {
                    let reason = if parent_missing {
                        "No such file or directory"
                    } else {
                        "File exists"
                    };
                    return Ok(ExecCapture {
                        stdout: Vec::new(),
                        stderr: format!("mkdir: cannot create directory '{path}': {reason}")
                            .into_bytes(),
                        exit_code: 1,
                    });
                }
                state.dirs.insert(path);
            } else if let Some((from, to)) = quoted_pair(line, "mv ") {
                move_tree(&mut state, &from, &to);
            } else if let Some((file, dir)) = quoted_pair(line, "cp ") {
                let name = file.rsplit('/').next().unwrap_or_default().to_string();
                if let Some(contents) = state.files.get(&file).cloned() {
                    let dest = format!("{}/{name}", dir.trim_end_matches('/'));
                    state.files.insert(dest, contents);
                }
            } else if let Some(rest) = line.strip_prefix("rm -rf '") {
                let path = rest.trim_end_matches('\'').to_string();
                remove_tree(&mut state, &path);
            }
        }
        Ok(result)
    }

    async fn entry_kind(&self, path: &str) -> AppResult<Option<RemoteEntryKind>> {
        let state = self.state.lock().expect("fake state lock");
        let path = if path == "/" {
            path
        } else {
            path.trim_end_matches('/')
        };
        if state.dirs.contains(path) {
            Ok(Some(RemoteEntryKind::Directory))
        } else if state.files.contains_key(path) {
            Ok(Some(RemoteEntryKind::File))
        } else {
            Ok(None)
        }
    }

    async fn create_dir(&self, path: &str) -> AppResult<()> {
        let mut state = self.state.lock().expect("fake state lock");
        state.create_dir_calls += 1;
        if state.refuse_create_dir {
            return Err(remote_error(format!("mkdir {path}: permission denied")));
        }
        if state.dirs.contains(path) || state.files.contains_key(path) {
            return Err(remote_error(format!("mkdir {path}: file exists")));
        }
        match parent_of(path) {
            Some(parent) if state.dirs.contains(&parent) => {}
            _ => return Err(remote_error(format!("mkdir {path}: no such file"))),
        }
        state.dirs.insert(path.to_string());
        Ok(())
    }

    async fn list_dir(&self, path: &str) -> AppResult<Option<Vec<String>>> {
        let state = self.state.lock().expect("fake state lock");
        if !state.dirs.contains(path) {
            return Ok(None);
        }
        let children = state
            .dirs
            .iter()
            .chain(state.files.keys())
            .filter(|entry| parent_of(entry).as_deref() == Some(path) && entry.as_str() != "/")
            .filter_map(|entry| entry.rsplit('/').next().map(str::to_string))
            .collect();
        Ok(Some(children))
    }

    async fn read_file(&self, path: &str) -> AppResult<Option<Vec<u8>>> {
        Ok(self
            .state
            .lock()
            .expect("fake state lock")
            .files
            .get(path)
            .cloned())
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> AppResult<()> {
        let mut state = self.state.lock().expect("fake state lock");
        match parent_of(path) {
            Some(parent) if state.dirs.contains(&parent) => {}
            _ => return Err(remote_error(format!("open {path}: no such file"))),
        }
        state.files.insert(path.to_string(), contents.to_vec());
        Ok(())
    }

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> AppResult<()> {
        let contents = std::fs::read(local_path)
            .map_err(|err| remote_error(format!("read {}: {err}", local_path.display())))?;
        self.write_file(remote_path, &contents).await
    }

    async fn close(&self) {
        self.state.lock().expect("fake state lock").close_calls += 1;
    }
}

pub(crate) struct FixedClock(pub i64);

impl ClockPort for FixedClock {
    fn now_utc(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(self.0).expect("valid timestamp")
    }
}

/// Hands out boxed views of one shared [`FakeSession`] so tests can inspect it
/// after the orchestrator has closed its session.
pub(crate) struct FakeConnector {
    pub session: Arc<FakeSession>,
    pub refuse: Option<AppError>,
    pub opened: Mutex<usize>,
}

impl FakeConnector {
    pub fn new(session: Arc<FakeSession>) -> Self {
        Self {
            session,
            refuse: None,
            opened: Mutex::new(0),
        }
    }

    pub fn refusing(err: AppError) -> Self {
        Self {
            session: Arc::new(FakeSession::new()),
            refuse: Some(err),
            opened: Mutex::new(0),
        }
    }

    pub fn opened(&self) -> usize {
        *self.opened.lock().expect("fake connector lock")
    }
}

#[async_trait]
impl SessionConnectorPort for FakeConnector {
    async fn open(&self, _endpoint: &RemoteEndpoint) -> AppResult<Box<dyn RemoteSessionPort>> {
        if let Some(err) = &self.refuse {
            return Err(err.clone());
        }
        *self.opened.lock().expect("fake connector lock") += 1;
        Ok(Box::new(SharedSession(self.session.clone())))
    }
}

struct SharedSession(Arc<FakeSession>);

#[async_trait]
impl RemoteSessionPort for SharedSession {
    fn target(&self) -> &str {
        self.0.target()
    }

    async fn exec_capture(&self, command: &str) -> AppResult<ExecCapture> {
        self.0.exec_capture(command).await
    }

    async fn entry_kind(&self, path: &str) -> AppResult<Option<RemoteEntryKind>> {
        self.0.entry_kind(path).await
    }

    async fn create_dir(&self, path: &str) -> AppResult<()> {
        self.0.create_dir(path).await
    }

    async fn list_dir(&self, path: &str) -> AppResult<Option<Vec<String>>> {
        self.0.list_dir(path).await
    }

    async fn read_file(&self, path: &str) -> AppResult<Option<Vec<u8>>> {
        self.0.read_file(path).await
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> AppResult<()> {
        self.0.write_file(path, contents).await
    }

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> AppResult<()> {
        self.0.upload_file(local_path, remote_path).await
    }

    async fn close(&self) {
        self.0.close().await
    }
}
