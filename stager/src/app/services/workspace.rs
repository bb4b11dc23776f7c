// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::app::errors::{AppResult, staging_error};
use crate::app::ports::RemoteSessionPort;
use crate::app::services::shell::{RemoteStep, ShellScript};
use crate::app::types::{WorkspaceSlot, join_remote, slot_name};

const SLOT_PREFIX: &str = "folder_";
const MAX_CLAIM_ATTEMPTS: u32 = 16;

/// Index encoded in a `folder_<n>` entry name. Anything else is ignored.
pub fn parse_slot_index(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(SLOT_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Highest parseable slot index plus one; 1 when there is none. `None` when
/// the highest index is already `u32::MAX`.
pub fn next_index<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<u32> {
    match names.into_iter().filter_map(parse_slot_index).max() {
        Some(max) => max.checked_add(1),
        None => Some(1),
    }
}

/// Next free slot index under `user_inputs_dir`. A missing directory counts as empty.
pub async fn next_slot(session: &dyn RemoteSessionPort, user_inputs_dir: &str) -> AppResult<u32> {
    let entries = session.list_dir(user_inputs_dir).await.map_err(|err| {
        staging_error(format!("cannot list {user_inputs_dir}"), &err.to_string())
    })?;
    let Some(names) = entries else {
        return Ok(1);
    };
    next_index(names.iter().map(String::as_str)).ok_or_else(|| {
        staging_error(
            format!("slot index space under {user_inputs_dir} is exhausted"),
            "",
        )
    })
}

/// Per-user locks shared by every orchestration in this process. An entry
/// lives only while someone holds or waits for it.
#[derive(Default)]
pub struct SlotLocks {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Holds one user's lock; drops the map entry when nobody else wants it.
pub struct SlotGuard<'a> {
    owner: &'a SlotLocks,
    user_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SlotLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, user_id: &str) -> SlotGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        SlotGuard {
            owner: self,
            user_id: user_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self
            .owner
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Holders and waiters each keep a clone; only the map's own is left.
        if locks
            .get(&self.user_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.user_id);
        }
    }
}

/// Picks the next slot and claims it with a non-recursive mkdir. The parent
/// directory must exist. A lost claim (the directory appeared between listing
/// and creation) moves on to a higher index.
pub async fn allocate(
    session: &dyn RemoteSessionPort,
    locks: &SlotLocks,
    user_id: &str,
    user_inputs_dir: &str,
) -> AppResult<WorkspaceSlot> {
    let _guard = locks.acquire(user_id).await;
    let mut floor = 0u32;
    for attempt in 1..=MAX_CLAIM_ATTEMPTS {
        let index = next_slot(session, user_inputs_dir)
            .await?
            .max(floor.saturating_add(1));
        let path = join_remote(user_inputs_dir, &slot_name(index));
        if claim(session, &path).await? {
            tracing::debug!(user_id, index, path = %path, "claimed workspace slot");
            return Ok(WorkspaceSlot {
                user_id: user_id.to_string(),
                index,
                path,
            });
        }
        tracing::debug!(user_id, index, attempt, "workspace slot already taken; retrying");
        floor = index;
    }
    Err(staging_error(
        format!(
            "could not claim a workspace slot under {user_inputs_dir} after {MAX_CLAIM_ATTEMPTS} attempts"
        ),
        "",
    ))
}

/// `Ok(true)` when this call created `path`, `Ok(false)` when it already existed.
async fn claim(session: &dyn RemoteSessionPort, path: &str) -> AppResult<bool> {
    if session.create_dir(path).await.is_ok() {
        return Ok(true);
    }
    if exists(session, path).await? {
        return Ok(false);
    }
    let command = ShellScript::new()
        .step(RemoteStep::MakeDir {
            path: path.to_string(),
        })
        .render()?;
    let capture = session.exec_capture(&command).await.map_err(|err| {
        staging_error(format!("failed to create workspace slot {path}"), &err.to_string())
    })?;
    if capture.success() {
        return Ok(true);
    }
    if exists(session, path).await? {
        return Ok(false);
    }
    Err(staging_error(
        format!("failed to create workspace slot {path}"),
        &capture.diagnostic(),
    ))
}

async fn exists(session: &dyn RemoteSessionPort, path: &str) -> AppResult<bool> {
    session
        .entry_kind(path)
        .await
        .map(|kind| kind.is_some())
        .map_err(|err| staging_error(format!("cannot inspect {path}"), &err.to_string()))
}
