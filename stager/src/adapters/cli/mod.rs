// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use clap::{Args, CommandFactory, FromArgMatches, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "stager",
    version,
    about = "Stage submissions onto a remote HPC filesystem and launch workflow runs",
    long_about = None,
    after_help = "Configuration precedence: defaults < config file < command-line flags.\n\
Config path precedence: defaults < STAGER_CONFIG_PATH < command-line flags.\n\
If --config is omitted, stager tries STAGER_CONFIG_PATH, then the default config file location; missing default config is OK.\n\
Logging is controlled with STAGER_LOG, STAGER_LOG_FORMAT, STAGER_LOG_SPAN_EVENTS and STAGER_LOG_FILE."
)]
pub struct Opts {
    #[arg(
        short,
        long,
        global = true,
        value_name = "PATH",
        help = "Path to a TOML config file. When omitted, stager uses STAGER_CONFIG_PATH if set, otherwise the default config file location if available."
    )]
    pub config: Option<PathBuf>,
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::SetTrue,
        help = "Enable debug logging and include logs from dependencies. Overrides `verbose` from the config file."
    )]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stage payloads into a new workspace slot and launch the workflow.
    Submit(SubmitArgs),
    /// Report whether a launched run is still alive.
    Status(StatusArgs),
}

#[derive(Args, Debug)]
pub struct SubmitArgs {
    #[arg(long, value_name = "ID", help = "Identifier of the submitting user; becomes a directory name.")]
    pub user_id: String,
    #[arg(long)]
    pub email: String,
    #[arg(long)]
    pub name: String,
    #[arg(long, default_value = "")]
    pub organization: String,
    #[arg(long, default_value = "")]
    pub description: String,
    #[arg(long, value_name = "N", help = "Number of runs written as NRUNS.")]
    pub runs: u32,
    #[arg(long, value_name = "R", help = "Optional GEF_PROBE_RADIUS.")]
    pub probe_radius: Option<f64>,
    #[arg(required = true, value_name = "FILES")]
    pub files: Vec<PathBuf>,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[arg(long, value_name = "PID")]
    pub pid: u32,
}

pub struct ParsedOpts {
    pub opts: Opts,
    pub verbose_override: Option<bool>,
}

const HELP_TEMPLATE: &str = r#"stager {version}

{before-help}{about-with-newline}{usage-heading} {usage}
{after-help}

{all-args}
"#;

fn apply_help_template_recursively(cmd: &mut clap::Command) {
    let mut owned = std::mem::take(cmd);
    owned = owned.help_template(HELP_TEMPLATE);
    for sub in owned.get_subcommands_mut() {
        apply_help_template_recursively(sub);
    }
    *cmd = owned;
}

pub fn cli_command() -> clap::Command {
    let mut cmd = Opts::command();
    apply_help_template_recursively(&mut cmd);
    cmd
}

fn parsed_from(matches: &clap::ArgMatches) -> Result<ParsedOpts, clap::Error> {
    let verbose_override = matches.get_flag("verbose").then_some(true);
    let opts = Opts::from_arg_matches(matches)?;
    Ok(ParsedOpts {
        opts,
        verbose_override,
    })
}

pub fn parse_opts() -> ParsedOpts {
    let matches = cli_command().get_matches();
    parsed_from(&matches).unwrap_or_else(|err| err.exit())
}
