mod cancel;
mod format;
mod git;
mod log;
#[cfg(any(test, feature = "test-support"))]
mod memory;
mod model;
mod walk;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cancel::{Cancellation, Cancelled};
pub use format::{CommitIdFormat, format_commit_id};
pub use git::{EMPTY_TREE_ID, GitRepository, parse_diff_tree_output};
pub use log::FilteredLog;
#[cfg(any(test, feature = "test-support"))]
pub use memory::{Edit, MemoryRepository};
pub use model::{
    BuildCommitRecord, BuildId, CommitDelta, FileStatistics, HeadKind, RecordingType,
    ReferenceSearchResult, RepositoryStatisticsSnapshot,
};
pub use walk::{CommitGraphWalker, WalkBoundary, walk};

const ZERO_COMMIT_HEX: &str = "0000000000000000000000000000000000000000";

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("repository access error: {0}")]
    Access(String),
    #[error("no resolvable HEAD commit: {0}")]
    NoHead(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl From<Cancelled> for RepositoryError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_ascii_lowercase())
    }

    /// Accepts only full 40 character hexadecimal object names.
    pub fn parse(value: &str) -> Result<Self, RepositoryError> {
        let value = value.trim();
        if value.len() != 40 || !value.bytes().all(|byte| byte.is_ascii_hexdigit()) {
            return Err(RepositoryError::Access(format!(
                "'{value}' is not a full commit id"
            )));
        }

        Ok(Self::new(value))
    }

    pub fn zero() -> Self {
        Self(ZERO_COMMIT_HEX.to_owned())
    }

    pub fn is_zero(&self) -> bool {
        !self.0.is_empty() && self.0.bytes().all(|byte| byte == b'0')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serializes `Option<CommitId>` with the all-zero id standing in for `None`.
pub mod zero_sentinel {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::CommitId;

    pub fn serialize<S>(value: &Option<CommitId>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(id) if !id.is_zero() => serializer.serialize_str(id.as_str()),
            _ => serializer.serialize_str(super::ZERO_COMMIT_HEX),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<CommitId>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw
            .map(CommitId::new)
            .filter(|id| !id.as_str().is_empty() && !id.is_zero()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Identity used for distinct-author counting.
    pub fn identity(&self) -> String {
        if self.email.trim().is_empty() {
            self.name.trim().to_owned()
        } else {
            self.email.trim().to_ascii_lowercase()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    pub parents: Vec<CommitId>,
    pub author: Signature,
    pub committer: Signature,
    pub author_time: i64,
    pub commit_time: i64,
}

impl Commit {
    pub fn is_merge(&self) -> bool {
        self.parents.len() == 2
    }

    pub fn first_parent(&self) -> Option<&CommitId> {
        self.parents.first()
    }

    pub fn second_parent(&self) -> Option<&CommitId> {
        self.parents.get(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed { from: String },
    Copied { from: String },
}

/// One file touched by a tree diff. `path` is the live path after the change,
/// except for deletions where it is the removed path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub kind: ChangeKind,
    pub added_lines: u64,
    pub deleted_lines: u64,
}

pub trait Repository {
    fn head(&self) -> Result<CommitId, RepositoryError>;
    fn find_commit(&self, id: &CommitId) -> Result<Commit, RepositoryError>;
    /// Tree diff with rename detection; `old = None` diffs against the empty tree.
    fn diff(
        &self,
        old: Option<&CommitId>,
        new: &CommitId,
    ) -> Result<Vec<FileChange>, RepositoryError>;
    fn tree_paths(&self, commit: &CommitId) -> Result<BTreeSet<String>, RepositoryError>;
}

impl<R: Repository + ?Sized> Repository for &R {
    fn head(&self) -> Result<CommitId, RepositoryError> {
        (**self).head()
    }

    fn find_commit(&self, id: &CommitId) -> Result<Commit, RepositoryError> {
        (**self).find_commit(id)
    }

    fn diff(
        &self,
        old: Option<&CommitId>,
        new: &CommitId,
    ) -> Result<Vec<FileChange>, RepositoryError> {
        (**self).diff(old, new)
    }

    fn tree_paths(&self, commit: &CommitId) -> Result<BTreeSet<String>, RepositoryError> {
        (**self).tree_paths(commit)
    }
}

pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}
