use std::ffi::OsStr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use forensic_config::{CommitIdStyle, ForensicConfig};
use forensic_core::BuildId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid log format '{other}', expected one of: human, json"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct BuildArgs {
    #[arg(long, help = "Job name, folders separated by '/'")]
    pub job: String,

    #[arg(long, help = "Build number within the job")]
    pub number: u64,
}

impl BuildArgs {
    pub fn build_id(&self) -> BuildId {
        BuildId::new(self.job.trim(), self.number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct RepositoryArgs {
    #[arg(
        long,
        help = "Checkout to analyze (defaults to the workspace root)"
    )]
    pub repository: Option<PathBuf>,

    #[arg(
        long,
        help = "Key the commit record is stored under (defaults to the origin URL)"
    )]
    pub repository_key: Option<String>,
}

/// Per-invocation overrides of `.forensic/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Args, Default)]
pub struct OverrideArgs {
    #[arg(long, help = "Commit window for recording and reference search")]
    pub max_commits: Option<u32>,

    #[arg(long, help = "Substring selecting the repository of a multi-repository build")]
    pub scm_key: Option<String>,

    #[arg(long, help = "Job whose builds are searched for a reference")]
    pub target_job: Option<String>,

    #[arg(
        long,
        conflicts_with = "target_job",
        help = "Sibling job in the same folder to use as target"
    )]
    pub target_branch: Option<String>,

    #[arg(long, help = "Skip target builds containing commits unknown to this branch")]
    pub skip_unknown_commits: bool,

    #[arg(long, help = "Fall back to the latest target build when nothing matches")]
    pub latest_if_not_found: bool,

    #[arg(
        long,
        value_parser = parse_commit_id_style,
        help = "Commit id display: full or abbreviated"
    )]
    pub commit_id_format: Option<CommitIdStyle>,
}

impl OverrideArgs {
    pub fn apply(&self, config: &mut ForensicConfig) {
        if let Some(max_commits) = self.max_commits {
            config.commits.max_commits = max_commits.max(1);
        }
        if let Some(scm_key) = non_empty(self.scm_key.as_deref()) {
            config.commits.scm_key = Some(scm_key);
        }
        if let Some(target_job) = non_empty(self.target_job.as_deref()) {
            config.reference.target_job = Some(target_job);
            config.reference.target_branch = None;
        }
        if let Some(target_branch) = non_empty(self.target_branch.as_deref()) {
            config.reference.target_branch = Some(target_branch);
            config.reference.target_job = None;
        }
        if self.skip_unknown_commits {
            config.reference.skip_unknown_commits = true;
        }
        if self.latest_if_not_found {
            config.reference.latest_build_if_not_found = true;
        }
        if let Some(style) = self.commit_id_format {
            config.display.commit_id_format = style;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct RecordArgs {
    #[command(flatten)]
    pub build: BuildArgs,

    #[command(flatten)]
    pub repository: RepositoryArgs,

    #[command(flatten)]
    pub overrides: OverrideArgs,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ResolveArgs {
    #[command(flatten)]
    pub build: BuildArgs,

    #[command(flatten)]
    pub overrides: OverrideArgs,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct StatsArgs {
    #[command(flatten)]
    pub build: BuildArgs,

    #[arg(long, help = "Substring selecting the repository of a multi-repository build")]
    pub scm_key: Option<String>,

    #[arg(
        long,
        default_value_t = 20,
        help = "Number of files to report (clamped to 1..1000)"
    )]
    pub top: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum BuildCommands {
    /// Register a running build
    Start(BuildArgs),
    /// Mark a build as completed
    Complete(BuildArgs),
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Write the default .forensic/config.toml
    Init,
    /// Register or complete builds
    #[command(subcommand)]
    Build(BuildCommands),
    /// Record the commits a build introduced
    Record(RecordArgs),
    /// Update the per-file statistics snapshot for a build
    Mine(RecordArgs),
    /// Search the target job for a reference build
    Resolve(ResolveArgs),
    /// Register, record, mine, resolve and complete a build
    Run(RecordArgs),
    /// Report the statistics snapshot of a build
    Stats(StatsArgs),
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "Build commit forensics")]
pub struct Cli {
    #[arg(
        long,
        global = true,
        default_value = ".",
        help = "Workspace root holding .forensic/"
    )]
    pub workspace: PathBuf,

    #[arg(
        long,
        global = true,
        default_value = "human",
        value_parser = parse_log_format,
        help = "Log format: human or json"
    )]
    pub log_format: LogFormat,

    #[arg(
        long,
        global = true,
        help = "Cancel the running operation after this many seconds"
    )]
    pub timeout_secs: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

pub fn parse_cli() -> Cli {
    let mut args: Vec<_> = std::env::args_os().collect();
    if args.get(1).is_some_and(|arg| arg == OsStr::new("--")) {
        args.remove(1);
    }

    Cli::parse_from(args)
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse()
}

fn parse_commit_id_style(value: &str) -> Result<CommitIdStyle, String> {
    value.parse()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn run_subcommand_parses_build_repository_and_overrides() {
        let cli = Cli::try_parse_from([
            "forensic",
            "--workspace",
            "/tmp/ci",
            "run",
            "--job",
            "project/feature",
            "--number",
            "42",
            "--repository",
            "/tmp/checkout",
            "--target-branch",
            "main",
            "--max-commits",
            "50",
            "--skip-unknown-commits",
        ])
        .expect("run flags should parse");

        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.build.build_id(), BuildId::new("project/feature", 42));
        assert_eq!(args.repository.repository, Some(PathBuf::from("/tmp/checkout")));
        assert_eq!(args.overrides.target_branch.as_deref(), Some("main"));
        assert!(args.overrides.skip_unknown_commits);
        assert!(!args.overrides.latest_if_not_found);
        assert_eq!(cli.log_format, LogFormat::Human);
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "forensic",
            "stats",
            "--job",
            "main",
            "--number",
            "3",
            "--log-format",
            "json",
            "--timeout-secs",
            "30",
        ])
        .expect("global flags should parse");

        assert_eq!(cli.log_format.as_str(), "json");
        assert_eq!(cli.timeout_secs, Some(30));
        let Commands::Stats(args) = cli.command else {
            panic!("expected stats command");
        };
        assert_eq!(args.top, 20);
    }

    #[test]
    fn build_subcommands_parse() {
        let cli = Cli::try_parse_from([
            "forensic", "build", "complete", "--job", "main", "--number", "7",
        ])
        .expect("build complete should parse");
        assert_eq!(
            cli.command,
            Commands::Build(BuildCommands::Complete(BuildArgs {
                job: "main".to_owned(),
                number: 7,
            }))
        );
    }

    #[test]
    fn target_job_conflicts_with_target_branch() {
        let result = Cli::try_parse_from([
            "forensic",
            "resolve",
            "--job",
            "feature",
            "--number",
            "1",
            "--target-job",
            "main",
            "--target-branch",
            "develop",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn invalid_log_format_is_rejected() {
        assert!(Cli::try_parse_from(["forensic", "--log-format", "xml", "init"]).is_err());
    }

    #[test]
    fn overrides_replace_config_values() {
        let mut config = ForensicConfig::default();
        config.reference.target_branch = Some("develop".to_owned());

        let overrides = OverrideArgs {
            max_commits: Some(0),
            target_job: Some(" mainline ".to_owned()),
            latest_if_not_found: true,
            commit_id_format: Some(CommitIdStyle::Full),
            ..OverrideArgs::default()
        };
        overrides.apply(&mut config);

        assert_eq!(config.commits.max_commits, 1);
        assert_eq!(config.reference.target_job.as_deref(), Some("mainline"));
        assert_eq!(config.reference.target_branch, None);
        assert!(config.reference.latest_build_if_not_found);
        assert!(!config.reference.skip_unknown_commits);
        assert_eq!(config.display.commit_id_format, CommitIdStyle::Full);
    }
}
