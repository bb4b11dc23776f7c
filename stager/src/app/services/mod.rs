// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod archive;
pub mod config_merge;
pub mod launcher;
pub mod remote_fs;
pub mod shell;
pub mod workspace;
