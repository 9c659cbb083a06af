use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{CommitId, zero_sentinel};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuildId {
    pub job: String,
    pub number: u64,
}

impl BuildId {
    pub fn new(job: impl Into<String>, number: u64) -> Self {
        Self {
            job: job.into(),
            number,
        }
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.job, self.number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingType {
    Start,
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HeadKind {
    #[default]
    Plain,
    FastForward,
    Merge,
}

/// Commits a build introduced since the previous recorded build of the same
/// job, newest first. When the checkout produced a local merge, `head` is the
/// merge's first parent, `target_parent` its second parent and `merge` the
/// merge commit itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildCommitRecord {
    pub repository_key: String,
    pub commits: Vec<CommitId>,
    pub head: CommitId,
    #[serde(with = "zero_sentinel", default)]
    pub target_parent: Option<CommitId>,
    #[serde(with = "zero_sentinel", default)]
    pub merge: Option<CommitId>,
    pub recording_type: RecordingType,
    #[serde(default)]
    pub head_kind: HeadKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDelta {
    pub hash: CommitId,
    pub author: String,
    pub time: i64,
    pub added: u64,
    pub deleted: u64,
}

/// Statistics of one file. `loc` is cumulative over all recorded deltas while
/// `churn` only covers the mining run that produced the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatistics {
    pub path: String,
    pub authors: BTreeSet<String>,
    pub commits: Vec<CommitDelta>,
    pub loc: i64,
    pub churn: u64,
}

impl FileStatistics {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            authors: BTreeSet::new(),
            commits: Vec::new(),
            loc: 0,
            churn: 0,
        }
    }

    pub fn apply(&mut self, delta: CommitDelta) {
        self.authors.insert(delta.author.clone());
        self.loc += delta.added as i64 - delta.deleted as i64;
        self.churn += delta.added + delta.deleted;
        self.commits.push(delta);
    }

    pub fn reset_churn(&mut self) {
        self.churn = 0;
    }

    pub fn commit_count(&self) -> usize {
        self.commits.len()
    }

    pub fn author_count(&self) -> usize {
        self.authors.len()
    }

    /// Churn over every recorded delta, across all mining runs.
    pub fn total_churn(&self) -> u64 {
        self.commits
            .iter()
            .map(|delta| delta.added + delta.deleted)
            .sum()
    }

    pub fn recomputed_loc(&self) -> i64 {
        self.commits
            .iter()
            .map(|delta| delta.added as i64 - delta.deleted as i64)
            .sum()
    }

    pub fn first_commit_time(&self) -> Option<i64> {
        self.commits.iter().map(|delta| delta.time).min()
    }

    pub fn last_commit_time(&self) -> Option<i64> {
        self.commits.iter().map(|delta| delta.time).max()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryStatisticsSnapshot {
    #[serde(with = "zero_sentinel", default)]
    pub latest_commit: Option<CommitId>,
    pub files: BTreeMap<String, FileStatistics>,
}

impl RepositoryStatisticsSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn file(&self, path: &str) -> Option<&FileStatistics> {
        self.files.get(path)
    }
}

/// Outcome of a reference search. `fallback` is set when no build of the
/// target job shared a commit with the current branch and the most recent
/// target build was chosen instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReferenceSearchResult {
    pub reference: Option<BuildId>,
    pub matching_commit: Option<CommitId>,
    pub fallback: bool,
}

impl ReferenceSearchResult {
    pub fn not_found() -> Self {
        Self::default()
    }

    pub fn is_found(&self) -> bool {
        self.reference.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(hash: &str, author: &str, added: u64, deleted: u64) -> CommitDelta {
        CommitDelta {
            hash: CommitId::new(hash),
            author: author.to_owned(),
            time: 1_700_000_000,
            added,
            deleted,
        }
    }

    #[test]
    fn apply_accumulates_loc_churn_and_authors() {
        let mut stats = FileStatistics::new("src/lib.rs");
        stats.apply(delta("c1", "alice@example.com", 10, 0));
        stats.apply(delta("c2", "bob@example.com", 3, 5));
        stats.apply(delta("c3", "alice@example.com", 1, 1));

        assert_eq!(stats.loc, 8);
        assert_eq!(stats.loc, stats.recomputed_loc());
        assert_eq!(stats.churn, 20);
        assert_eq!(stats.total_churn(), 20);
        assert_eq!(stats.author_count(), 2);
        assert_eq!(stats.commit_count(), 3);

        stats.reset_churn();
        assert_eq!(stats.churn, 0);
        assert_eq!(stats.total_churn(), 20);
    }

    #[test]
    fn record_serializes_in_persisted_shape() {
        let record = BuildCommitRecord {
            repository_key: "https://example.com/repo.git".to_owned(),
            commits: vec![CommitId::new("b".repeat(40))],
            head: CommitId::new("b".repeat(40)),
            target_parent: None,
            merge: None,
            recording_type: RecordingType::Start,
            head_kind: HeadKind::Plain,
        };

        let value = serde_json::to_value(&record).expect("serialize record");
        assert_eq!(value["repositoryKey"], "https://example.com/repo.git");
        assert_eq!(value["recordingType"], "START");
        assert_eq!(value["merge"], "0".repeat(40));
        assert_eq!(value["targetParent"], "0".repeat(40));

        let back: BuildCommitRecord = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, record);
    }
}
