// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
#[error("authentication_failure")]
pub struct AuthenticationFailure;

/// The configured private key exists but cannot be used.
#[derive(Debug, ThisError)]
#[error("cannot load private key {path}: {reason}")]
pub struct KeyLoadFailure {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, ThisError)]
#[error("host key for {host}:{port} rejected: {reason}")]
pub struct HostKeyRejected {
    pub host: String,
    pub port: u16,
    pub reason: String,
}
