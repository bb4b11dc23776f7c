// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Stages user submissions onto a remote HPC filesystem and launches detached
//! workflow runs against them.
//!
//! [`app::usecases::UseCases`] is the entry point; the binary and any other
//! front end build one from [`config::load`] and a connector from
//! [`adapters::connector_for`].

pub mod adapters;
pub mod app;
pub mod config;
pub mod logging;
