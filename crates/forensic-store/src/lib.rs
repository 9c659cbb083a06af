mod filter;
mod history;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use forensic_config::forensic_dir;
use forensic_core::{
    BuildCommitRecord, BuildId, CommitId, ReferenceSearchResult, RepositoryStatisticsSnapshot,
};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use filter::KeyFilter;
pub use history::BuildHistory;

pub const DATABASE_FILE_NAME: &str = "builds.sqlite";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{kind} for build {build} and repository '{repository_key}' already exists")]
    DuplicateRecord {
        kind: &'static str,
        build: BuildId,
        repository_key: String,
    },
    #[error("unknown build {0}")]
    UnknownBuild(BuildId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Running,
    Completed,
}

impl BuildStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
        }
    }

    fn from_column(value: &str) -> Self {
        match value {
            "completed" => Self::Completed,
            _ => Self::Running,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub id: BuildId,
    pub status: BuildStatus,
    pub started_at: i64,
    pub completed_at: Option<i64>,
}

pub trait Store {
    fn register_build(&self, build: &BuildId) -> Result<BuildRecord, StoreError>;
    fn complete_build(&self, build: &BuildId) -> Result<BuildRecord, StoreError>;
    fn build_status(&self, build: &BuildId) -> Result<Option<BuildRecord>, StoreError>;

    fn put_commit_record(
        &self,
        build: &BuildId,
        record: &BuildCommitRecord,
    ) -> Result<(), StoreError>;
    fn commit_record(
        &self,
        build: &BuildId,
        filter: KeyFilter<'_>,
    ) -> Result<Option<BuildCommitRecord>, StoreError>;

    fn put_statistics(
        &self,
        build: &BuildId,
        repository_key: &str,
        snapshot: &RepositoryStatisticsSnapshot,
    ) -> Result<(), StoreError>;
    fn statistics(
        &self,
        build: &BuildId,
        filter: KeyFilter<'_>,
    ) -> Result<Option<RepositoryStatisticsSnapshot>, StoreError>;

    fn put_reference(
        &self,
        build: &BuildId,
        repository_key: &str,
        result: &ReferenceSearchResult,
    ) -> Result<(), StoreError>;
    fn reference(
        &self,
        build: &BuildId,
        filter: KeyFilter<'_>,
    ) -> Result<Option<ReferenceSearchResult>, StoreError>;
}

pub struct SqliteStore {
    conn: Connection,
    forensic_dir: PathBuf,
}

impl SqliteStore {
    pub fn open(workspace_root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let forensic_dir = forensic_dir(workspace_root);
        let sqlite_path = forensic_dir.join(DATABASE_FILE_NAME);

        fs::create_dir_all(&forensic_dir)?;

        let conn = Connection::open(sqlite_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        run_migrations(&conn)?;

        Ok(Self { conn, forensic_dir })
    }

    pub fn forensic_dir(&self) -> &Path {
        &self.forensic_dir
    }

    /// Closest earlier build of the same job, whatever its status.
    pub fn previous_build(&self, build: &BuildId) -> Result<Option<BuildId>, StoreError> {
        self.build_before(&build.job, Some(build.number), false)
    }

    pub fn previous_completed_build(
        &self,
        build: &BuildId,
    ) -> Result<Option<BuildId>, StoreError> {
        self.build_before(&build.job, Some(build.number), true)
    }

    pub fn last_completed_build(&self, job: &str) -> Result<Option<BuildId>, StoreError> {
        self.build_before(job, None, true)
    }

    /// Earlier builds of `build.job`, newest first, each with the commit
    /// record selected by `filter` if one was stored.
    pub fn history<'s>(&'s self, build: &BuildId, filter: KeyFilter<'s>) -> BuildHistory<'s> {
        BuildHistory::new(self, &build.job, Some(build.number), false, filter)
    }

    /// Completed builds of `job`, newest first, starting with the last
    /// completed one.
    pub fn completed_history<'s>(
        &'s self,
        job: &str,
        filter: KeyFilter<'s>,
    ) -> BuildHistory<'s> {
        BuildHistory::new(self, job, None, true, filter)
    }

    pub fn latest_commit_record_before(
        &self,
        build: &BuildId,
        filter: KeyFilter<'_>,
    ) -> Result<Option<(BuildId, BuildCommitRecord)>, StoreError> {
        for entry in self.history(build, filter) {
            if let (previous, Some(record)) = entry? {
                return Ok(Some((previous, record)));
            }
        }

        Ok(None)
    }

    pub fn latest_statistics_before(
        &self,
        build: &BuildId,
        filter: KeyFilter<'_>,
    ) -> Result<Option<(BuildId, RepositoryStatisticsSnapshot)>, StoreError> {
        let mut cursor = self.previous_build(build)?;
        while let Some(previous) = cursor {
            if let Some(snapshot) = self.statistics(&previous, filter)? {
                return Ok(Some((previous, snapshot)));
            }
            cursor = self.previous_build(&previous)?;
        }

        Ok(None)
    }

    fn build_before(
        &self,
        job: &str,
        before: Option<u64>,
        completed_only: bool,
    ) -> Result<Option<BuildId>, StoreError> {
        let upper = before.map(to_column).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(
            r#"
            SELECT number
            FROM builds
            WHERE job = ?1 AND number < ?2 AND (?3 = 0 OR status = 'completed')
            ORDER BY number DESC
            LIMIT 1
            "#,
        )?;

        let number = stmt
            .query_row(params![job, upper, completed_only], |row| row.get::<_, i64>(0))
            .optional()?;

        Ok(number.map(|number| BuildId::new(job, from_column(number))))
    }

    fn ensure_build(&self, build: &BuildId) -> Result<(), StoreError> {
        if self.build_status(build)?.is_none() {
            return Err(StoreError::UnknownBuild(build.clone()));
        }

        Ok(())
    }

    fn payloads(
        &self,
        table: &str,
        build: &BuildId,
    ) -> Result<Vec<(String, String)>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT repository_key, payload FROM {table} WHERE job = ?1 AND number = ?2 ORDER BY repository_key"
        ))?;
        let rows = stmt.query_map(params![build.job, to_column(build.number)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut payloads = Vec::new();
        for row in rows {
            payloads.push(row?);
        }

        Ok(payloads)
    }

    fn insert_payload(
        &self,
        table: &str,
        kind: &'static str,
        build: &BuildId,
        repository_key: &str,
        payload: &str,
    ) -> Result<(), StoreError> {
        self.ensure_build(build)?;

        let result = self.conn.execute(
            &format!(
                "INSERT INTO {table} (job, number, repository_key, payload) VALUES (?1, ?2, ?3, ?4)"
            ),
            params![build.job, to_column(build.number), repository_key, payload],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateRecord {
                    kind,
                    build: build.clone(),
                    repository_key: repository_key.to_owned(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl Store for SqliteStore {
    fn register_build(&self, build: &BuildId) -> Result<BuildRecord, StoreError> {
        self.conn.execute(
            r#"
            INSERT INTO builds (job, number, status, started_at, completed_at)
            VALUES (?1, ?2, 'running', ?3, NULL)
            ON CONFLICT(job, number) DO NOTHING
            "#,
            params![build.job, to_column(build.number), unix_now()],
        )?;

        self.build_status(build)?
            .ok_or_else(|| StoreError::UnknownBuild(build.clone()))
    }

    fn complete_build(&self, build: &BuildId) -> Result<BuildRecord, StoreError> {
        let updated = self.conn.execute(
            r#"
            UPDATE builds
            SET status = 'completed', completed_at = COALESCE(completed_at, ?3)
            WHERE job = ?1 AND number = ?2
            "#,
            params![build.job, to_column(build.number), unix_now()],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownBuild(build.clone()));
        }

        self.build_status(build)?
            .ok_or_else(|| StoreError::UnknownBuild(build.clone()))
    }

    fn build_status(&self, build: &BuildId) -> Result<Option<BuildRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT status, started_at, completed_at
            FROM builds
            WHERE job = ?1 AND number = ?2
            "#,
        )?;

        let record = stmt
            .query_row(params![build.job, to_column(build.number)], |row| {
                let status: String = row.get(0)?;
                Ok(BuildRecord {
                    id: build.clone(),
                    status: BuildStatus::from_column(&status),
                    started_at: row.get(1)?,
                    completed_at: row.get(2)?,
                })
            })
            .optional()?;

        Ok(record)
    }

    fn put_commit_record(
        &self,
        build: &BuildId,
        record: &BuildCommitRecord,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(record)?;
        self.insert_payload(
            "commit_records",
            "commit record",
            build,
            &record.repository_key,
            &payload,
        )?;

        tracing::debug!(
            build = %build,
            repository = %record.repository_key,
            commits = record.commits.len(),
            "stored commit record"
        );
        Ok(())
    }

    fn commit_record(
        &self,
        build: &BuildId,
        filter: KeyFilter<'_>,
    ) -> Result<Option<BuildCommitRecord>, StoreError> {
        match select_payload(self.payloads("commit_records", build)?, filter) {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    fn put_statistics(
        &self,
        build: &BuildId,
        repository_key: &str,
        snapshot: &RepositoryStatisticsSnapshot,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(snapshot)?;
        self.insert_payload(
            "statistics_snapshots",
            "statistics snapshot",
            build,
            repository_key,
            &payload,
        )?;

        tracing::debug!(
            build = %build,
            repository = repository_key,
            files = snapshot.files.len(),
            "stored statistics snapshot"
        );
        Ok(())
    }

    fn statistics(
        &self,
        build: &BuildId,
        filter: KeyFilter<'_>,
    ) -> Result<Option<RepositoryStatisticsSnapshot>, StoreError> {
        match select_payload(self.payloads("statistics_snapshots", build)?, filter) {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    fn put_reference(
        &self,
        build: &BuildId,
        repository_key: &str,
        result: &ReferenceSearchResult,
    ) -> Result<(), StoreError> {
        self.ensure_build(build)?;

        let (reference_job, reference_number) = match &result.reference {
            Some(reference) => (Some(reference.job.as_str()), Some(to_column(reference.number))),
            None => (None, None),
        };
        self.conn.execute(
            r#"
            INSERT INTO reference_builds (
                job, number, repository_key, reference_job, reference_number, matching_commit, fallback
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(job, number, repository_key) DO UPDATE SET
                reference_job = excluded.reference_job,
                reference_number = excluded.reference_number,
                matching_commit = excluded.matching_commit,
                fallback = excluded.fallback
            "#,
            params![
                build.job,
                to_column(build.number),
                repository_key,
                reference_job,
                reference_number,
                result.matching_commit.as_ref().map(CommitId::as_str),
                result.fallback,
            ],
        )?;

        Ok(())
    }

    fn reference(
        &self,
        build: &BuildId,
        filter: KeyFilter<'_>,
    ) -> Result<Option<ReferenceSearchResult>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT repository_key, reference_job, reference_number, matching_commit, fallback
            FROM reference_builds
            WHERE job = ?1 AND number = ?2
            ORDER BY repository_key
            "#,
        )?;
        let rows = stmt.query_map(params![build.job, to_column(build.number)], |row| {
            let repository_key: String = row.get(0)?;
            let reference_job: Option<String> = row.get(1)?;
            let reference_number: Option<i64> = row.get(2)?;
            let matching_commit: Option<String> = row.get(3)?;
            let fallback: bool = row.get(4)?;

            let reference = match (reference_job, reference_number) {
                (Some(job), Some(number)) => Some(BuildId::new(job, from_column(number))),
                _ => None,
            };
            Ok((
                repository_key,
                ReferenceSearchResult {
                    reference,
                    matching_commit: matching_commit.map(CommitId::new),
                    fallback,
                },
            ))
        })?;

        for row in rows {
            let (repository_key, result) = row?;
            if filter.matches(&repository_key) {
                return Ok(Some(result));
            }
        }

        Ok(None)
    }
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS builds (
            job TEXT NOT NULL,
            number INTEGER NOT NULL,
            status TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            PRIMARY KEY (job, number)
        );

        CREATE TABLE IF NOT EXISTS commit_records (
            job TEXT NOT NULL,
            number INTEGER NOT NULL,
            repository_key TEXT NOT NULL,
            payload TEXT NOT NULL,
            PRIMARY KEY (job, number, repository_key)
        );

        CREATE TABLE IF NOT EXISTS statistics_snapshots (
            job TEXT NOT NULL,
            number INTEGER NOT NULL,
            repository_key TEXT NOT NULL,
            payload TEXT NOT NULL,
            PRIMARY KEY (job, number, repository_key)
        );

        CREATE TABLE IF NOT EXISTS reference_builds (
            job TEXT NOT NULL,
            number INTEGER NOT NULL,
            repository_key TEXT NOT NULL,
            reference_job TEXT,
            reference_number INTEGER,
            matching_commit TEXT,
            fallback INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (job, number, repository_key)
        );

        CREATE INDEX IF NOT EXISTS idx_builds_job_status
            ON builds(job, status, number);
        "#,
    )?;

    Ok(())
}

fn select_payload(payloads: Vec<(String, String)>, filter: KeyFilter<'_>) -> Option<String> {
    payloads
        .into_iter()
        .find(|(repository_key, _)| filter.matches(repository_key))
        .map(|(_, payload)| payload)
}

fn to_column(number: u64) -> i64 {
    i64::try_from(number).unwrap_or(i64::MAX)
}

fn from_column(number: i64) -> u64 {
    u64::try_from(number).unwrap_or_default()
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use forensic_core::{HeadKind, RecordingType};
    use tempfile::tempdir;

    use super::*;

    fn record(key: &str, commits: &[&str]) -> BuildCommitRecord {
        let commits = commits.iter().map(|id| CommitId::new(*id)).collect::<Vec<_>>();
        BuildCommitRecord {
            repository_key: key.to_owned(),
            head: commits.first().cloned().unwrap_or_else(CommitId::zero),
            commits,
            target_parent: None,
            merge: None,
            recording_type: RecordingType::Start,
            head_kind: HeadKind::Plain,
        }
    }

    #[test]
    fn register_and_complete_build_track_status() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");
        let build = BuildId::new("project/main", 1);

        let registered = store.register_build(&build).expect("register build");
        assert_eq!(registered.status, BuildStatus::Running);
        assert_eq!(registered.completed_at, None);

        let again = store.register_build(&build).expect("register twice");
        assert_eq!(again.started_at, registered.started_at);

        let completed = store.complete_build(&build).expect("complete build");
        assert_eq!(completed.status, BuildStatus::Completed);
        assert!(completed.completed_at.is_some());

        let missing = store.complete_build(&BuildId::new("project/main", 9));
        assert!(matches!(missing, Err(StoreError::UnknownBuild(_))));
    }

    #[test]
    fn commit_records_are_write_once() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");
        let build = BuildId::new("job", 1);
        store.register_build(&build).expect("register build");

        store
            .put_commit_record(&build, &record("git@example.com:repo.git", &["c2", "c1"]))
            .expect("first put");
        let duplicate =
            store.put_commit_record(&build, &record("git@example.com:repo.git", &["c3"]));
        assert!(matches!(duplicate, Err(StoreError::DuplicateRecord { .. })));

        let stored = store
            .commit_record(&build, KeyFilter::Any)
            .expect("load record")
            .expect("record exists");
        assert_eq!(stored.commits, vec![CommitId::new("c2"), CommitId::new("c1")]);
    }

    #[test]
    fn commit_record_requires_registered_build() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");

        let result = store.put_commit_record(&BuildId::new("job", 4), &record("repo", &["c1"]));
        assert!(matches!(result, Err(StoreError::UnknownBuild(_))));
    }

    #[test]
    fn scm_key_selects_first_matching_repository_by_key_order() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");
        let build = BuildId::new("job", 1);
        store.register_build(&build).expect("register build");

        store
            .put_commit_record(&build, &record("https://example.com/tools.git", &["t1"]))
            .expect("put tools");
        store
            .put_commit_record(&build, &record("https://example.com/app.git", &["a1"]))
            .expect("put app");

        let first = store
            .commit_record(&build, KeyFilter::Any)
            .expect("load")
            .expect("exists");
        assert_eq!(first.repository_key, "https://example.com/app.git");

        let tools = store
            .commit_record(&build, KeyFilter::Contains("tools"))
            .expect("load")
            .expect("exists");
        assert_eq!(tools.commits, vec![CommitId::new("t1")]);

        assert!(store
            .commit_record(&build, KeyFilter::Contains("missing"))
            .expect("load")
            .is_none());
    }

    #[test]
    fn exact_filter_ignores_keys_containing_the_repository_key() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");
        let build = BuildId::new("job", 1);
        store.register_build(&build).expect("register build");

        store
            .put_commit_record(&build, &record("app-tools", &["t1"]))
            .expect("put app-tools");
        store
            .put_commit_record(&build, &record("app", &["a1"]))
            .expect("put app");
        store
            .put_statistics(&build, "app-tools", &RepositoryStatisticsSnapshot::default())
            .expect("put app-tools statistics");

        let contains = store
            .commit_record(&build, KeyFilter::Contains("app"))
            .expect("load")
            .expect("exists");
        assert_eq!(contains.repository_key, "app");

        let exact = store
            .commit_record(&build, KeyFilter::Exact("app-tools"))
            .expect("load")
            .expect("exists");
        assert_eq!(exact.commits, vec![CommitId::new("t1")]);

        assert!(store
            .statistics(&build, KeyFilter::Exact("app"))
            .expect("load")
            .is_none());
        assert!(store
            .statistics(&build, KeyFilter::Contains("app"))
            .expect("load")
            .is_some());
    }

    #[test]
    fn previous_builds_skip_running_builds_when_completed_only() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");
        for number in 1..=4 {
            store
                .register_build(&BuildId::new("job", number))
                .expect("register");
        }
        store
            .complete_build(&BuildId::new("job", 1))
            .expect("complete 1");
        store
            .complete_build(&BuildId::new("job", 2))
            .expect("complete 2");

        let current = BuildId::new("job", 4);
        assert_eq!(
            store.previous_build(&current).expect("previous"),
            Some(BuildId::new("job", 3))
        );
        assert_eq!(
            store.previous_completed_build(&current).expect("previous completed"),
            Some(BuildId::new("job", 2))
        );
        assert_eq!(
            store.last_completed_build("job").expect("last completed"),
            Some(BuildId::new("job", 2))
        );
        assert_eq!(store.last_completed_build("other").expect("none"), None);
    }

    #[test]
    fn latest_record_and_statistics_skip_builds_without_data() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");
        for number in 1..=3 {
            store
                .register_build(&BuildId::new("job", number))
                .expect("register");
        }
        store
            .put_commit_record(&BuildId::new("job", 1), &record("repo", &["c1"]))
            .expect("put record");
        let snapshot = RepositoryStatisticsSnapshot {
            latest_commit: Some(CommitId::new("c1")),
            ..RepositoryStatisticsSnapshot::default()
        };
        store
            .put_statistics(&BuildId::new("job", 1), "repo", &snapshot)
            .expect("put statistics");

        let current = BuildId::new("job", 3);
        let (build, previous) = store
            .latest_commit_record_before(&current, KeyFilter::Any)
            .expect("lookup")
            .expect("found");
        assert_eq!(build, BuildId::new("job", 1));
        assert_eq!(previous.head, CommitId::new("c1"));

        let (build, stats) = store
            .latest_statistics_before(&current, KeyFilter::Exact("repo"))
            .expect("lookup")
            .expect("found");
        assert_eq!(build, BuildId::new("job", 1));
        assert_eq!(stats, snapshot);

        assert!(store
            .latest_commit_record_before(&BuildId::new("job", 1), KeyFilter::Any)
            .expect("lookup")
            .is_none());
    }

    #[test]
    fn reference_results_round_trip_and_overwrite() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");
        let build = BuildId::new("project/feature", 7);
        store.register_build(&build).expect("register");

        assert!(store.reference(&build, KeyFilter::Any).expect("load").is_none());

        store
            .put_reference(&build, "repo", &ReferenceSearchResult::not_found())
            .expect("put not found");
        let found = ReferenceSearchResult {
            reference: Some(BuildId::new("project/main", 12)),
            matching_commit: Some(CommitId::new("a".repeat(40))),
            fallback: false,
        };
        store
            .put_reference(&build, "repo", &found)
            .expect("put found");

        assert_eq!(store.reference(&build, KeyFilter::Any).expect("load"), Some(found));
    }

    #[test]
    fn data_survives_reopen() {
        let temp = tempdir().expect("tempdir");
        let build = BuildId::new("job", 1);
        {
            let store = SqliteStore::open(temp.path()).expect("open store");
            store.register_build(&build).expect("register");
            store
                .put_commit_record(&build, &record("repo", &["c1"]))
                .expect("put record");
        }

        let reopened = SqliteStore::open(temp.path()).expect("reopen store");
        assert!(reopened.forensic_dir().join(DATABASE_FILE_NAME).exists());
        assert!(reopened
            .commit_record(&build, KeyFilter::Exact("repo"))
            .expect("load")
            .is_some());
    }
}
