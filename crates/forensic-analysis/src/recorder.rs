use forensic_config::RECORDED_COMMITS_CEILING;
use forensic_core::{
    BuildCommitRecord, Cancellation, CommitId, HeadKind, RecordingType, Repository,
    RepositoryError, WalkBoundary, walk,
};

/// The commit a build is considered to have built. For a checkout that ended
/// in a local merge this is the merge's first parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildHead {
    pub head: CommitId,
    pub target_parent: Option<CommitId>,
    pub merge: Option<CommitId>,
}

pub fn resolve_build_head<R: Repository + ?Sized>(repo: &R) -> Result<BuildHead, RepositoryError> {
    let head = repo.head()?;
    let commit = repo.find_commit(&head)?;

    match (commit.is_merge(), commit.first_parent(), commit.second_parent()) {
        (true, Some(first), Some(second)) => Ok(BuildHead {
            head: first.clone(),
            target_parent: Some(second.clone()),
            merge: Some(head),
        }),
        _ => Ok(BuildHead {
            head,
            target_parent: None,
            merge: None,
        }),
    }
}

#[derive(Debug, Clone)]
pub struct BuildCommitRecorder {
    max_commits: usize,
    cancellation: Cancellation,
}

impl BuildCommitRecorder {
    pub fn new(max_commits: u32, cancellation: Cancellation) -> Self {
        let max_commits = max_commits.clamp(1, RECORDED_COMMITS_CEILING) as usize;
        Self {
            max_commits,
            cancellation,
        }
    }

    pub fn max_commits(&self) -> usize {
        self.max_commits
    }

    /// Collects the commits reachable from the build head that the previous
    /// record of the job has not seen yet, newest first.
    pub fn record<R: Repository + ?Sized>(
        &self,
        repo: &R,
        repository_key: &str,
        previous: Option<&BuildCommitRecord>,
    ) -> Result<BuildCommitRecord, RepositoryError> {
        let build_head = resolve_build_head(repo)?;

        let boundary = match previous {
            Some(previous) => WalkBoundary::until(previous.head.clone()),
            None => WalkBoundary::root(),
        }
        .with_limit(self.max_commits);

        let mut walker = walk(repo, &build_head.head, boundary, &self.cancellation)?;
        let mut commits = Vec::new();
        for commit in walker.by_ref() {
            commits.push(commit?.id);
        }

        let head_kind = if build_head.merge.is_some() {
            HeadKind::Merge
        } else if previous.is_some() && walker.boundary_reached() {
            HeadKind::FastForward
        } else {
            HeadKind::Plain
        };
        let recording_type = if previous.is_some() {
            RecordingType::Incremental
        } else {
            RecordingType::Start
        };

        tracing::debug!(
            repository = repository_key,
            head = %build_head.head,
            commits = commits.len(),
            truncated = commits.len() >= self.max_commits,
            "recorded build commits"
        );

        Ok(BuildCommitRecord {
            repository_key: repository_key.to_owned(),
            commits,
            head: build_head.head,
            target_parent: build_head.target_parent,
            merge: build_head.merge,
            recording_type,
            head_kind,
        })
    }
}
