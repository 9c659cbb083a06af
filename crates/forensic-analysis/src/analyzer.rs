use std::path::{Path, PathBuf};

use forensic_config::{CommitIdStyle, ConfigError, ForensicConfig, load_workspace_config};
use forensic_core::{
    BuildCommitRecord, BuildId, Cancellation, CommitId, CommitIdFormat, FilteredLog,
    ReferenceSearchResult, Repository, RepositoryError, format_commit_id,
};
use forensic_store::{BuildRecord, KeyFilter, SqliteStore, Store, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::miner::RepositoryStatisticsMiner;
use crate::recorder::BuildCommitRecorder;
use crate::resolver::{ReferenceResolver, ReferenceSearchOptions};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
    #[error("operation cancelled")]
    Cancelled,
    #[error("{0}")]
    Message(String),
}

impl From<RepositoryError> for AnalysisError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Cancelled => Self::Cancelled,
            other => Self::Repository(other),
        }
    }
}

impl From<forensic_core::Cancelled> for AnalysisError {
    fn from(_: forensic_core::Cancelled) -> Self {
        Self::Cancelled
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOutcome {
    pub build: BuildId,
    pub recorded: bool,
    pub previous_build: Option<BuildId>,
    pub record: Option<BuildCommitRecord>,
    pub display_commits: Vec<String>,
    pub log: FilteredLog,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningOutcome {
    pub build: BuildId,
    pub mined: bool,
    pub previous_build: Option<BuildId>,
    pub latest_commit: Option<String>,
    pub commits_mined: usize,
    pub files_tracked: usize,
    pub files_evicted: usize,
    pub log: FilteredLog,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveOutcome {
    pub build: BuildId,
    pub target_job: Option<String>,
    pub result: ReferenceSearchResult,
    pub log: FilteredLog,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub build: BuildRecord,
    pub record: RecordOutcome,
    pub mining: MiningOutcome,
    pub reference: ResolveOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatisticsEntry {
    pub path: String,
    pub commits: usize,
    pub authors: usize,
    pub loc: i64,
    pub churn: u64,
    pub total_churn: u64,
    pub first_commit_at: Option<i64>,
    pub last_commit_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsReport {
    pub build: BuildId,
    pub latest_commit: Option<String>,
    pub files_tracked: usize,
    pub files: Vec<FileStatisticsEntry>,
}

/// Per-build entry point: owns the workspace configuration and turns
/// repository failures into neutral outcomes while letting cancellation and
/// store failures through.
#[derive(Debug, Clone)]
pub struct ForensicsAnalyzer {
    workspace: PathBuf,
    config: ForensicConfig,
    cancellation: Cancellation,
}

impl ForensicsAnalyzer {
    pub fn new(workspace: impl AsRef<Path>) -> Result<Self, AnalysisError> {
        let workspace = workspace.as_ref().to_path_buf();
        let config = load_workspace_config(&workspace)?;
        Ok(Self::with_config(workspace, config))
    }

    pub fn with_config(workspace: impl AsRef<Path>, config: ForensicConfig) -> Self {
        Self {
            workspace: workspace.as_ref().to_path_buf(),
            config,
            cancellation: Cancellation::new(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn config(&self) -> &ForensicConfig {
        &self.config
    }

    pub fn commit_id_format(&self) -> CommitIdFormat {
        match self.config.display.commit_id_format {
            CommitIdStyle::Full => CommitIdFormat::Full,
            CommitIdStyle::Abbreviated => {
                CommitIdFormat::Abbreviated(self.config.display.abbreviation_length)
            }
        }
    }

    pub fn open_store(&self) -> Result<SqliteStore, AnalysisError> {
        Ok(SqliteStore::open(&self.workspace)?)
    }

    pub fn record<R: Repository + ?Sized>(
        &self,
        repo: &R,
        build: &BuildId,
        repository_key: &str,
    ) -> Result<RecordOutcome, AnalysisError> {
        validate_repository_key(repository_key)?;
        let store = self.open_store()?;
        store.register_build(build)?;
        let mut log = self.operation_log("Errors while recording commits");

        if let Some(existing) = store.commit_record(build, KeyFilter::Exact(repository_key))? {
            log.log_info(format!("commits of {build} are already recorded"));
            return Ok(self.record_outcome(build, false, None, Some(existing), log));
        }

        let previous = store.latest_commit_record_before(build, KeyFilter::Exact(repository_key))?;
        let (previous_build, previous_record) = match previous {
            Some((previous_build, record)) => (Some(previous_build), Some(record)),
            None => (None, None),
        };

        let recorder = BuildCommitRecorder::new(
            self.config.commits.max_commits,
            self.cancellation.clone(),
        );
        let record = match recorder.record(repo, repository_key, previous_record.as_ref()) {
            Ok(record) => record,
            Err(RepositoryError::Cancelled) => return Err(AnalysisError::Cancelled),
            Err(err) => {
                log.log_exception(&err, "Could not record commits");
                log.flush();
                return Ok(self.record_outcome(build, false, previous_build, None, log));
            }
        };

        store.put_commit_record(build, &record)?;
        log.log_info(format!(
            "Recorded {} new commits for {build} (head {})",
            record.commits.len(),
            format_commit_id(&record.head, self.commit_id_format())
        ));
        log.flush();

        Ok(self.record_outcome(build, true, previous_build, Some(record), log))
    }

    pub fn mine<R: Repository + ?Sized>(
        &self,
        repo: &R,
        build: &BuildId,
        repository_key: &str,
    ) -> Result<MiningOutcome, AnalysisError> {
        validate_repository_key(repository_key)?;
        let store = self.open_store()?;
        store.register_build(build)?;
        let mut log = self.operation_log("Errors while mining repository statistics");

        if !self.config.statistics.enabled {
            log.log_info("statistics mining is disabled");
            return Ok(self.mining_outcome(build, false, None, None, log));
        }

        if let Some(existing) = store.statistics(build, KeyFilter::Exact(repository_key))? {
            log.log_info(format!("statistics of {build} are already mined"));
            let mut outcome =
                self.mining_outcome(build, false, None, existing.latest_commit.as_ref(), log);
            outcome.files_tracked = existing.files.len();
            return Ok(outcome);
        }

        let previous = store.latest_statistics_before(build, KeyFilter::Exact(repository_key))?;
        let (previous_build, previous_snapshot) = match previous {
            Some((previous_build, snapshot)) => (Some(previous_build), snapshot),
            None => (None, Default::default()),
        };

        let miner = RepositoryStatisticsMiner::new(self.cancellation.clone());
        let run = match miner.mine(repo, &previous_snapshot) {
            Ok(run) => run,
            Err(RepositoryError::Cancelled) => return Err(AnalysisError::Cancelled),
            Err(err) => {
                log.log_exception(&err, "Could not mine repository statistics");
                log.flush();
                return Ok(self.mining_outcome(
                    build,
                    false,
                    previous_build,
                    previous_snapshot.latest_commit.as_ref(),
                    log,
                ));
            }
        };

        store.put_statistics(build, repository_key, &run.snapshot)?;
        log.log_info(format!(
            "Mined {} commits, tracking {} files",
            run.commits_mined,
            run.snapshot.files.len()
        ));
        log.flush();

        let mut outcome = self.mining_outcome(
            build,
            true,
            previous_build,
            run.snapshot.latest_commit.as_ref(),
            log,
        );
        outcome.commits_mined = run.commits_mined;
        outcome.files_tracked = run.snapshot.files.len();
        outcome.files_evicted = run.evicted.len();
        Ok(outcome)
    }

    pub fn resolve(
        &self,
        build: &BuildId,
        filter: KeyFilter<'_>,
    ) -> Result<ResolveOutcome, AnalysisError> {
        let store = self.open_store()?;
        let mut log = self.operation_log("Errors while resolving the reference build");
        let target_job = self.config.target_job_for(&build.job);

        let outcome = |log: FilteredLog, result: ReferenceSearchResult| ResolveOutcome {
            build: build.clone(),
            target_job: target_job.clone(),
            result,
            log,
        };

        if !self.config.reference.enabled {
            log.log_info("reference search is disabled");
            return Ok(outcome(log, ReferenceSearchResult::not_found()));
        }
        let Some(job) = target_job.as_deref() else {
            log.log_info("no target job configured, skipping reference search");
            return Ok(outcome(log, ReferenceSearchResult::not_found()));
        };

        let Some(current) = store.commit_record(build, filter)? else {
            log.log_error(format!("no commit record for {build}, cannot search for a reference"));
            log.flush();
            return Ok(outcome(log, ReferenceSearchResult::not_found()));
        };

        let resolver = ReferenceResolver::new(
            ReferenceSearchOptions {
                max_commits: self.config.commits.max_commits as usize,
                skip_unknown_commits: self.config.reference.skip_unknown_commits,
                latest_build_if_not_found: self.config.reference.latest_build_if_not_found,
            },
            self.cancellation.clone(),
        );
        let result = resolver.resolve(
            &current,
            store.history(build, filter),
            store.completed_history(job, filter),
        )?;

        store.put_reference(build, &current.repository_key, &result)?;
        match (&result.reference, &result.matching_commit) {
            (Some(reference), Some(commit)) => log.log_info(format!(
                "Found reference build {reference} sharing commit {}",
                format_commit_id(commit, self.commit_id_format())
            )),
            (Some(reference), None) => log.log_info(format!(
                "No common commit with '{job}', using latest build {reference}"
            )),
            (None, _) => log.log_info(format!("No reference build found in '{job}'")),
        }
        log.flush();

        Ok(outcome(log, result))
    }

    /// Registers the build, records, mines, resolves and completes it.
    pub fn run<R: Repository + ?Sized>(
        &self,
        repo: &R,
        build: &BuildId,
        repository_key: &str,
    ) -> Result<RunOutcome, AnalysisError> {
        let store = self.open_store()?;
        store.register_build(build)?;
        tracing::info!(build = %build, repository = repository_key, "running build analysis");

        let record = self.record(repo, build, repository_key)?;
        let mining = self.mine(repo, build, repository_key)?;
        let reference = self.resolve(build, KeyFilter::Exact(repository_key))?;
        let build = store.complete_build(build)?;

        Ok(RunOutcome {
            build,
            record,
            mining,
            reference,
        })
    }

    /// Files of the build's snapshot ordered by churn of the producing run,
    /// then by number of commits.
    pub fn statistics_report(
        &self,
        build: &BuildId,
        filter: KeyFilter<'_>,
        top: usize,
    ) -> Result<Option<StatisticsReport>, AnalysisError> {
        let store = self.open_store()?;
        let Some(snapshot) = store.statistics(build, filter)? else {
            return Ok(None);
        };

        let mut files = snapshot
            .files
            .values()
            .map(|stats| FileStatisticsEntry {
                path: stats.path.clone(),
                commits: stats.commit_count(),
                authors: stats.author_count(),
                loc: stats.loc,
                churn: stats.churn,
                total_churn: stats.total_churn(),
                first_commit_at: stats.first_commit_time(),
                last_commit_at: stats.last_commit_time(),
            })
            .collect::<Vec<_>>();
        files.sort_by(|left, right| {
            right
                .churn
                .cmp(&left.churn)
                .then_with(|| right.commits.cmp(&left.commits))
                .then_with(|| left.path.cmp(&right.path))
        });
        files.truncate(top);

        Ok(Some(StatisticsReport {
            build: build.clone(),
            latest_commit: snapshot
                .latest_commit
                .as_ref()
                .map(|commit| format_commit_id(commit, self.commit_id_format())),
            files_tracked: snapshot.files.len(),
            files,
        }))
    }

    fn operation_log(&self, title: &str) -> FilteredLog {
        FilteredLog::new(title, self.config.logging.max_error_lines)
    }

    fn record_outcome(
        &self,
        build: &BuildId,
        recorded: bool,
        previous_build: Option<BuildId>,
        record: Option<BuildCommitRecord>,
        log: FilteredLog,
    ) -> RecordOutcome {
        let format = self.commit_id_format();
        let display_commits = record
            .as_ref()
            .map(|record| {
                record
                    .commits
                    .iter()
                    .map(|commit| format_commit_id(commit, format))
                    .collect()
            })
            .unwrap_or_default();

        RecordOutcome {
            build: build.clone(),
            recorded,
            previous_build,
            record,
            display_commits,
            log,
        }
    }

    fn mining_outcome(
        &self,
        build: &BuildId,
        mined: bool,
        previous_build: Option<BuildId>,
        latest_commit: Option<&CommitId>,
        log: FilteredLog,
    ) -> MiningOutcome {
        MiningOutcome {
            build: build.clone(),
            mined,
            previous_build,
            latest_commit: latest_commit
                .map(|commit| format_commit_id(commit, self.commit_id_format())),
            commits_mined: 0,
            files_tracked: 0,
            files_evicted: 0,
            log,
        }
    }
}

fn validate_repository_key(repository_key: &str) -> Result<(), AnalysisError> {
    if repository_key.trim().is_empty() {
        return Err(AnalysisError::Message(
            "repository key must not be empty".to_owned(),
        ));
    }

    Ok(())
}
