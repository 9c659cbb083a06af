use std::collections::BTreeMap;

use forensic_core::{
    Cancellation, ChangeKind, Commit, CommitDelta, CommitId, FileChange, FileStatistics,
    Repository, RepositoryError, RepositoryStatisticsSnapshot, WalkBoundary, walk,
};
use serde::{Deserialize, Serialize};

use crate::recorder::resolve_build_head;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningRun {
    pub snapshot: RepositoryStatisticsSnapshot,
    pub commits_mined: usize,
    pub evicted: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RepositoryStatisticsMiner {
    cancellation: Cancellation,
}

impl RepositoryStatisticsMiner {
    pub fn new(cancellation: Cancellation) -> Self {
        Self { cancellation }
    }

    /// Mines from the same head the recorder uses, so a local merge
    /// checkout is mined as its first parent.
    pub fn mine<R: Repository + ?Sized>(
        &self,
        repo: &R,
        previous: &RepositoryStatisticsSnapshot,
    ) -> Result<MiningRun, RepositoryError> {
        let build_head = resolve_build_head(repo)?;
        self.mine_from(repo, &build_head.head, previous)
    }

    /// Applies every commit between `previous.latest_commit` and `head` to a
    /// copy of the previous snapshot. The previous snapshot is never modified.
    ///
    /// Only the first-parent line is replayed: a merge contributes the changes
    /// of its side branch as one diff against its first parent, so the result
    /// does not depend on where earlier runs checkpointed.
    pub fn mine_from<R: Repository + ?Sized>(
        &self,
        repo: &R,
        head: &CommitId,
        previous: &RepositoryStatisticsSnapshot,
    ) -> Result<MiningRun, RepositoryError> {
        let mut files = previous.files.clone();
        for stats in files.values_mut() {
            stats.reset_churn();
        }

        let boundary = previous
            .latest_commit
            .clone()
            .map(WalkBoundary::until)
            .unwrap_or_default()
            .first_parent_only();
        let mut commits = walk(repo, head, boundary, &self.cancellation)?
            .collect::<Result<Vec<_>, _>>()?;
        commits.reverse();

        let mut base = previous.latest_commit.clone();
        for commit in &commits {
            self.cancellation.check()?;

            let changes = repo.diff(base.as_ref(), &commit.id)?;
            for change in changes {
                apply_change(&mut files, change, commit);
            }
            base = Some(commit.id.clone());
        }

        let live_paths = repo.tree_paths(head)?;
        let evicted = files
            .keys()
            .filter(|path| !live_paths.contains(path.as_str()))
            .cloned()
            .collect::<Vec<_>>();
        for path in &evicted {
            files.remove(path);
        }

        tracing::debug!(
            head = %head,
            commits = commits.len(),
            files = files.len(),
            evicted = evicted.len(),
            "mined repository statistics"
        );

        Ok(MiningRun {
            snapshot: RepositoryStatisticsSnapshot {
                latest_commit: Some(head.clone()),
                files,
            },
            commits_mined: commits.len(),
            evicted,
        })
    }
}

/// A rename moves the existing statistics to the new path; a copy starts a
/// fresh history for the copy. A deletion drops the history, so a later
/// re-add of the same path starts over.
fn apply_change(
    files: &mut BTreeMap<String, FileStatistics>,
    change: FileChange,
    commit: &Commit,
) {
    let existing = match &change.kind {
        ChangeKind::Deleted => {
            files.remove(&change.path);
            return;
        }
        ChangeKind::Renamed { from } => files.remove(from),
        ChangeKind::Copied { .. } => None,
        ChangeKind::Added | ChangeKind::Modified => files.remove(&change.path),
    };

    let mut stats = existing.unwrap_or_else(|| FileStatistics::new(change.path.as_str()));
    stats.path = change.path.clone();
    stats.apply(CommitDelta {
        hash: commit.id.clone(),
        author: commit.author.identity(),
        time: commit.author_time,
        added: change.added_lines,
        deleted: change.deleted_lines,
    });
    files.insert(change.path, stats);
}
