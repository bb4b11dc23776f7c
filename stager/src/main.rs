// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use stager::adapters::{self, cli::Command};
use stager::app::types::{Identity, RunParameters, StagingRequest};
use stager::app::usecases::UseCases;
use stager::config;

fn log_config_report(report: &config::ConfigReport) {
    match (&report.config_path, report.config_path_source) {
        (Some(path), Some(source)) => {
            tracing::info!(
                "config path: {} (source={}, present={})",
                path.display(),
                source.as_str(),
                report.config_file_present
            );
        }
        (Some(path), None) => {
            tracing::info!(
                "config path: {} (present={})",
                path.display(),
                report.config_file_present
            );
        }
        (None, _) => {
            tracing::info!("config path: (none)");
        }
    }
    tracing::info!(
        "config max_payloads: {} (source={})",
        report.max_payloads.value,
        report.max_payloads.source.as_str()
    );
    tracing::info!(
        "config port: {} (source={})",
        report.port.value,
        report.port.source.as_str()
    );
    tracing::info!(
        "config connect_timeout_secs: {} (source={})",
        report.connect_timeout_secs.value,
        report.connect_timeout_secs.source.as_str()
    );
    tracing::info!(
        "config workflow binary: {} (source={})",
        report.workflow_binary.value,
        report.workflow_binary.source.as_str()
    );
    tracing::info!(
        "config verbose: {} (source={})",
        report.verbose.value,
        report.verbose.source.as_str()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = adapters::cli::parse_opts();
    let opts = parsed.opts;
    let config::LoadResult { config, report } = config::load_with_report(
        opts.config,
        config::Overrides {
            verbose: parsed.verbose_override,
        },
    )?;
    stager::logging::init(config.verbose);
    log_config_report(&report);

    let connector = adapters::connector_for(config.settings.endpoint.transport);
    let clock = Arc::new(adapters::time::SystemClock::new());
    let usecases = UseCases::new(config.settings, connector, clock);

    match opts.command {
        Command::Submit(args) => {
            let request = StagingRequest {
                identity: Identity {
                    user_id: args.user_id,
                    email: args.email,
                    name: args.name,
                    organization: args.organization,
                    description: args.description,
                },
                params: RunParameters {
                    number_of_runs: args.runs,
                    probe_radius: args.probe_radius,
                },
                payloads: args.files,
            };
            let record = usecases.run(request).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Status(args) => {
            let liveness = usecases.probe(args.pid).await?;
            println!("{}", liveness.as_str());
        }
    }
    Ok(())
}
