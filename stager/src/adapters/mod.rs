// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod cli;
pub mod local;
pub mod ssh;
pub mod time;

use std::sync::Arc;

use crate::app::ports::SessionConnectorPort;
use crate::app::types::Transport;

/// The session connector for the configured transport.
pub fn connector_for(transport: Transport) -> Arc<dyn SessionConnectorPort> {
    match transport {
        Transport::Ssh => Arc::new(ssh::SshConnector::new()),
        Transport::Local => Arc::new(local::LocalConnector::new()),
    }
}
