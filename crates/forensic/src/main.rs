mod cli;
mod commands;
mod logging;

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use forensic_config::{config_path, load_workspace_config, validate_config};
use forensic_core::Cancellation;

use crate::cli::{Cli, Commands, parse_cli};
use crate::commands::{
    CommandContext, run_build_command, run_init, run_mine_command, run_pipeline_command,
    run_record_command, run_resolve_command, run_stats_command,
};
use crate::logging::init_logging;

fn main() -> Result<()> {
    let cli = parse_cli();
    init_logging(cli.log_format);
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    std::fs::create_dir_all(&cli.workspace).with_context(|| {
        format!("failed to create workspace {}", cli.workspace.display())
    })?;
    let workspace = cli.workspace.canonicalize().with_context(|| {
        format!(
            "failed to resolve workspace path {}",
            cli.workspace.display()
        )
    })?;

    if matches!(cli.command, Commands::Init) {
        return run_init(&workspace);
    }

    let config = load_workspace_config(&workspace).with_context(|| {
        format!(
            "failed to load workspace config at {}",
            config_path(&workspace).display()
        )
    })?;
    for warning in validate_config(&config) {
        eprintln!(
            "forensic config warning [{}]: {}",
            warning.code, warning.message
        );
    }

    let cancellation = Cancellation::new();
    if let Some(seconds) = cli.timeout_secs {
        spawn_watchdog(cancellation.clone(), Duration::from_secs(seconds));
    }

    let context = CommandContext {
        workspace: &workspace,
        config,
        cancellation,
    };

    match cli.command {
        Commands::Init => Ok(()),
        Commands::Build(command) => run_build_command(&context, command),
        Commands::Record(args) => run_record_command(&context, args),
        Commands::Mine(args) => run_mine_command(&context, args),
        Commands::Resolve(args) => run_resolve_command(&context, args),
        Commands::Run(args) => run_pipeline_command(&context, args),
        Commands::Stats(args) => run_stats_command(&context, args),
    }
}

fn spawn_watchdog(cancellation: Cancellation, timeout: Duration) {
    thread::spawn(move || {
        thread::sleep(timeout);
        tracing::warn!(seconds = timeout.as_secs(), "timeout reached, cancelling");
        cancellation.cancel();
    });
}
