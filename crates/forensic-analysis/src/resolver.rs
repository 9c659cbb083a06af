use std::collections::HashSet;

use forensic_core::{BuildCommitRecord, BuildId, Cancellation, CommitId, ReferenceSearchResult};
use forensic_store::StoreError;

use crate::AnalysisError;

pub type HistoryEntry = Result<(BuildId, Option<BuildCommitRecord>), StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceSearchOptions {
    pub max_commits: usize,
    pub skip_unknown_commits: bool,
    pub latest_build_if_not_found: bool,
}

#[derive(Debug, Clone)]
pub struct ReferenceResolver {
    options: ReferenceSearchOptions,
    cancellation: Cancellation,
}

/// Insertion-ordered commit window that stops growing at `capacity`.
struct CommitWindow {
    order: Vec<CommitId>,
    members: HashSet<CommitId>,
    capacity: usize,
}

impl CommitWindow {
    fn new(capacity: usize) -> Self {
        Self {
            order: Vec::new(),
            members: HashSet::new(),
            capacity,
        }
    }

    fn is_full(&self) -> bool {
        self.members.len() >= self.capacity
    }

    fn extend(&mut self, commits: &[CommitId]) {
        for commit in commits {
            if self.is_full() {
                break;
            }
            if self.members.insert(commit.clone()) {
                self.order.push(commit.clone());
            }
        }
    }

    fn contains(&self, commit: &CommitId) -> bool {
        self.members.contains(commit)
    }

    fn contains_all(&self, commits: &[CommitId]) -> bool {
        commits.iter().all(|commit| self.contains(commit))
    }
}

impl ReferenceResolver {
    pub fn new(options: ReferenceSearchOptions, cancellation: Cancellation) -> Self {
        let options = ReferenceSearchOptions {
            max_commits: options.max_commits.max(1),
            ..options
        };
        Self {
            options,
            cancellation,
        }
    }

    pub fn options(&self) -> ReferenceSearchOptions {
        self.options
    }

    /// Searches the target job's builds, newest first, for the first build
    /// whose accumulated commits share a commit with the current branch.
    /// `own_history` is the current job's earlier builds and `target_history`
    /// the target job's completed builds, both newest first.
    pub fn resolve<O, T>(
        &self,
        current: &BuildCommitRecord,
        own_history: O,
        target_history: T,
    ) -> Result<ReferenceSearchResult, AnalysisError>
    where
        O: IntoIterator<Item = HistoryEntry>,
        T: IntoIterator<Item = HistoryEntry>,
    {
        let capacity = self.options.max_commits;

        let mut branch = CommitWindow::new(capacity);
        branch.extend(&current.commits);
        for entry in own_history {
            self.cancellation.check()?;
            if branch.is_full() {
                break;
            }
            if let (_, Some(record)) = entry? {
                branch.extend(&record.commits);
            }
        }

        let mut target = CommitWindow::new(capacity);
        let mut latest = None;
        for entry in target_history {
            self.cancellation.check()?;
            if target.is_full() {
                break;
            }

            let (build, record) = entry?;
            if latest.is_none() {
                latest = Some(build.clone());
            }
            let Some(record) = record else {
                continue;
            };

            if self.options.skip_unknown_commits && !branch.contains_all(&record.commits) {
                tracing::debug!(build = %build, "skipping target build with unknown commits");
                continue;
            }

            target.extend(&record.commits);
            if let Some(matching) = branch.order.iter().find(|commit| target.contains(commit)) {
                tracing::debug!(build = %build, commit = %matching, "found reference build");
                return Ok(ReferenceSearchResult {
                    reference: Some(build),
                    matching_commit: Some(matching.clone()),
                    fallback: false,
                });
            }
        }

        match latest {
            Some(build) if self.options.latest_build_if_not_found => {
                tracing::debug!(build = %build, "no common commit, falling back to latest build");
                Ok(ReferenceSearchResult {
                    reference: Some(build),
                    matching_commit: None,
                    fallback: true,
                })
            }
            _ => Ok(ReferenceSearchResult::not_found()),
        }
    }
}
