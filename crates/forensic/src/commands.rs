use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use forensic_analysis::ForensicsAnalyzer;
use forensic_config::{ForensicConfig, config_path, ensure_workspace_config};
use forensic_core::{Cancellation, GitRepository};
use forensic_store::{KeyFilter, Store};
use serde::Serialize;
use serde_json::json;

use crate::cli::{BuildArgs, BuildCommands, RecordArgs, RepositoryArgs, ResolveArgs, StatsArgs};

pub struct CommandContext<'a> {
    pub workspace: &'a Path,
    pub config: ForensicConfig,
    pub cancellation: Cancellation,
}

impl CommandContext<'_> {
    fn analyzer(&self, config: ForensicConfig) -> ForensicsAnalyzer {
        ForensicsAnalyzer::with_config(self.workspace, config)
            .with_cancellation(self.cancellation.clone())
    }
}

pub fn run_init(workspace: &Path) -> Result<()> {
    let config = ensure_workspace_config(workspace).with_context(|| {
        format!(
            "failed to create workspace config at {}",
            config_path(workspace).display()
        )
    })?;

    write_json_to_stdout(&json!({
        "config_path": config_path(workspace).display().to_string(),
        "config": config,
    }))
}

pub fn run_build_command(context: &CommandContext<'_>, command: BuildCommands) -> Result<()> {
    let store = context
        .analyzer(context.config.clone())
        .open_store()
        .context("failed to open build store")?;

    let record = match command {
        BuildCommands::Start(args) => {
            let build = args.build_id();
            store
                .register_build(&build)
                .with_context(|| format!("failed to register build {build}"))?
        }
        BuildCommands::Complete(args) => {
            let build = args.build_id();
            store
                .complete_build(&build)
                .with_context(|| format!("failed to complete build {build}"))?
        }
    };

    write_json_to_stdout(&record)
}

pub fn run_record_command(context: &CommandContext<'_>, args: RecordArgs) -> Result<()> {
    let analyzer = context.analyzer(overridden(&context.config, &args));
    let Some((repo, key)) = open_repository(context.workspace, &args.repository) else {
        return write_no_repository(&args.build);
    };

    let outcome = analyzer
        .record(&repo, &args.build.build_id(), &key)
        .context("failed to record build commits")?;
    write_json_to_stdout(&outcome)
}

pub fn run_mine_command(context: &CommandContext<'_>, args: RecordArgs) -> Result<()> {
    let analyzer = context.analyzer(overridden(&context.config, &args));
    let Some((repo, key)) = open_repository(context.workspace, &args.repository) else {
        return write_no_repository(&args.build);
    };

    let outcome = analyzer
        .mine(&repo, &args.build.build_id(), &key)
        .context("failed to mine repository statistics")?;
    write_json_to_stdout(&outcome)
}

pub fn run_resolve_command(context: &CommandContext<'_>, args: ResolveArgs) -> Result<()> {
    let mut config = context.config.clone();
    args.overrides.apply(&mut config);
    let scm_key = config.commits.scm_key.clone();

    let outcome = context
        .analyzer(config)
        .resolve(&args.build.build_id(), KeyFilter::scm_key(scm_key.as_deref()))
        .context("failed to resolve reference build")?;
    write_json_to_stdout(&outcome)
}

pub fn run_pipeline_command(context: &CommandContext<'_>, args: RecordArgs) -> Result<()> {
    let analyzer = context.analyzer(overridden(&context.config, &args));
    let build = args.build.build_id();

    let Some((repo, key)) = open_repository(context.workspace, &args.repository) else {
        let store = analyzer.open_store().context("failed to open build store")?;
        store.register_build(&build)?;
        let resolved = analyzer
            .resolve(
                &build,
                KeyFilter::scm_key(analyzer.config().commits.scm_key.as_deref()),
            )
            .context("failed to resolve reference build")?;
        let completed = store.complete_build(&build)?;
        return write_json_to_stdout(&json!({
            "git_repo_found": false,
            "build": completed,
            "reference": resolved,
        }));
    };

    let outcome = analyzer
        .run(&repo, &build, &key)
        .context("build analysis failed")?;
    write_json_to_stdout(&outcome)
}

pub fn run_stats_command(context: &CommandContext<'_>, args: StatsArgs) -> Result<()> {
    let build = args.build.build_id();
    let report = context
        .analyzer(context.config.clone())
        .statistics_report(
            &build,
            KeyFilter::scm_key(args.scm_key.as_deref()),
            args.top.clamp(1, 1000),
        )
        .context("failed to load statistics report")?;

    match report {
        Some(report) => write_json_to_stdout(&report),
        None => write_json_to_stdout(&json!({
            "build": build,
            "statistics_found": false,
        })),
    }
}

fn overridden(config: &ForensicConfig, args: &RecordArgs) -> ForensicConfig {
    let mut config = config.clone();
    args.overrides.apply(&mut config);
    config
}

/// Returns `None` with a warning when `--repository` (or the workspace) is
/// not a git checkout.
fn open_repository(workspace: &Path, args: &RepositoryArgs) -> Option<(GitRepository, String)> {
    let root = args.repository.as_deref().unwrap_or(workspace);
    let repo = match GitRepository::open(root) {
        Ok(repo) => repo,
        Err(err) => {
            tracing::warn!(path = %root.display(), error = %err, "no git repository found");
            return None;
        }
    };
    if repo.is_shallow() {
        tracing::info!(path = %root.display(), "shallow clone, history ends at the clone boundary");
    }

    let key = args
        .repository_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| repo.repository_key());
    Some((repo, key))
}

fn write_no_repository(build: &BuildArgs) -> Result<()> {
    write_json_to_stdout(&json!({
        "build": build.build_id(),
        "git_repo_found": false,
    }))
}

fn write_json_to_stdout<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let mut out = std::io::stdout();
    serde_json::to_writer_pretty(&mut out, value).context("failed to serialize JSON output")?;
    writeln!(&mut out).context("failed to write trailing newline")?;
    Ok(())
}
