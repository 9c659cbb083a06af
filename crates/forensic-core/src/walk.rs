use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use crate::{Cancellation, Commit, CommitId, Repository, RepositoryError};

/// Where a walk stops. `stop_at` is exclusive: the walk ends as soon as that
/// commit would be emitted. `limit` caps the number of emitted commits.
/// `first_parent` follows only the first parent of every merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkBoundary {
    pub stop_at: Option<CommitId>,
    pub limit: Option<usize>,
    pub first_parent: bool,
}

impl WalkBoundary {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn until(commit: CommitId) -> Self {
        Self {
            stop_at: Some(commit),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn first_parent_only(mut self) -> Self {
        self.first_parent = true;
        self
    }
}

struct QueuedCommit {
    commit: Commit,
    sequence: Reverse<u64>,
}

impl QueuedCommit {
    fn key(&self) -> (i64, Reverse<u64>) {
        (self.commit.commit_time, self.sequence)
    }
}

impl PartialEq for QueuedCommit {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedCommit {}

impl PartialOrd for QueuedCommit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedCommit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Lazy newest-first traversal over every parent edge, the same order a plain
/// `git log` produces. Parents are queued in parent order, so ties on commit
/// time favour the first parent. A commit without parents ends its line,
/// which is also how the boundary of a shallow clone is reported.
pub struct CommitGraphWalker<'r, R: Repository + ?Sized> {
    repo: &'r R,
    queue: BinaryHeap<QueuedCommit>,
    seen: HashSet<CommitId>,
    boundary: WalkBoundary,
    cancellation: Cancellation,
    sequence: u64,
    emitted: usize,
    boundary_reached: bool,
    finished: bool,
}

pub fn walk<'r, R: Repository + ?Sized>(
    repo: &'r R,
    start: &CommitId,
    boundary: WalkBoundary,
    cancellation: &Cancellation,
) -> Result<CommitGraphWalker<'r, R>, RepositoryError> {
    cancellation.check()?;
    let first = repo.find_commit(start)?;

    let mut walker = CommitGraphWalker {
        repo,
        queue: BinaryHeap::new(),
        seen: HashSet::new(),
        boundary,
        cancellation: cancellation.clone(),
        sequence: 0,
        emitted: 0,
        boundary_reached: false,
        finished: false,
    };
    walker.seen.insert(first.id.clone());
    walker.enqueue(first);
    Ok(walker)
}

impl<R: Repository + ?Sized> CommitGraphWalker<'_, R> {
    /// True once the walk hit the `stop_at` commit.
    pub fn boundary_reached(&self) -> bool {
        self.boundary_reached
    }

    fn enqueue(&mut self, commit: Commit) {
        self.queue.push(QueuedCommit {
            commit,
            sequence: Reverse(self.sequence),
        });
        self.sequence += 1;
    }

    fn advance(&mut self) -> Result<Option<Commit>, RepositoryError> {
        self.cancellation.check()?;

        if self
            .boundary
            .limit
            .is_some_and(|limit| self.emitted >= limit)
        {
            return Ok(None);
        }

        let Some(next) = self.queue.pop() else {
            return Ok(None);
        };
        let commit = next.commit;

        if self.boundary.stop_at.as_ref() == Some(&commit.id) {
            self.boundary_reached = true;
            return Ok(None);
        }

        let parents = if self.boundary.first_parent {
            &commit.parents[..commit.parents.len().min(1)]
        } else {
            &commit.parents[..]
        };
        for parent in parents {
            if self.seen.insert(parent.clone()) {
                let parent_commit = self.repo.find_commit(parent)?;
                self.enqueue(parent_commit);
            }
        }

        self.emitted += 1;
        Ok(Some(commit))
    }
}

impl<R: Repository + ?Sized> Iterator for CommitGraphWalker<'_, R> {
    type Item = Result<Commit, RepositoryError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.advance() {
            Ok(Some(commit)) => Some(Ok(commit)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}
