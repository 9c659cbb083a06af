use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::{
    ChangeKind, Commit, CommitId, FileChange, Repository, RepositoryError, Signature,
    normalize_path,
};

const FIRST_COMMIT_TIME: i64 = 1_700_000_000;
const COMMIT_INTERVAL_SECS: i64 = 60;
const RENAME_SIMILARITY_PERCENT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edit<'a> {
    Write(&'a str, &'a str),
    Delete(&'a str),
    Move(&'a str, &'a str),
}

#[derive(Debug, Clone)]
struct StoredCommit {
    commit: Commit,
    tree: BTreeMap<String, String>,
}

/// In-memory commit graph for exercising the walkers, miners and recorders
/// without a checkout. Every commit is one minute newer than the previous one.
#[derive(Debug, Clone)]
pub struct MemoryRepository {
    commits: HashMap<CommitId, StoredCommit>,
    head: Option<CommitId>,
    next_time: i64,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            commits: HashMap::new(),
            head: None,
            next_time: FIRST_COMMIT_TIME,
        }
    }

    /// Adds a commit whose tree is its first parent's tree with `edits`
    /// applied, and moves HEAD to it.
    pub fn commit(
        &mut self,
        id: &str,
        parents: &[&str],
        author: &str,
        edits: &[Edit<'_>],
    ) -> CommitId {
        let id = CommitId::new(id);
        let parents = parents.iter().map(|parent| CommitId::new(*parent)).collect::<Vec<_>>();

        let mut tree = parents
            .first()
            .and_then(|parent| self.commits.get(parent))
            .map(|stored| stored.tree.clone())
            .unwrap_or_default();
        for edit in edits {
            match *edit {
                Edit::Write(path, content) => {
                    tree.insert(normalize_path(path), content.to_owned());
                }
                Edit::Delete(path) => {
                    tree.remove(&normalize_path(path));
                }
                Edit::Move(from, to) => {
                    if let Some(content) = tree.remove(&normalize_path(from)) {
                        tree.insert(normalize_path(to), content);
                    }
                }
            }
        }

        let signature = Signature::new(author, format!("{author}@example.com"));
        let time = self.next_time;
        self.next_time += COMMIT_INTERVAL_SECS;

        let commit = Commit {
            id: id.clone(),
            parents,
            author: signature.clone(),
            committer: signature,
            author_time: time,
            commit_time: time,
        };
        self.commits.insert(id.clone(), StoredCommit { commit, tree });
        self.head = Some(id.clone());
        id
    }

    fn stored(&self, id: &CommitId) -> Result<&StoredCommit, RepositoryError> {
        self.commits
            .get(id)
            .ok_or_else(|| RepositoryError::Access(format!("commit {id} not found")))
    }
}

impl Repository for MemoryRepository {
    fn head(&self) -> Result<CommitId, RepositoryError> {
        self.head
            .clone()
            .ok_or_else(|| RepositoryError::NoHead("repository has no commits".to_owned()))
    }

    fn find_commit(&self, id: &CommitId) -> Result<Commit, RepositoryError> {
        self.stored(id).map(|stored| stored.commit.clone())
    }

    fn diff(
        &self,
        old: Option<&CommitId>,
        new: &CommitId,
    ) -> Result<Vec<FileChange>, RepositoryError> {
        let empty = BTreeMap::new();
        let old_tree = match old {
            Some(id) => &self.stored(id)?.tree,
            None => &empty,
        };
        let new_tree = &self.stored(new)?.tree;

        let mut added = new_tree
            .keys()
            .filter(|path| !old_tree.contains_key(*path))
            .cloned()
            .collect::<Vec<_>>();
        let mut deleted = old_tree
            .keys()
            .filter(|path| !new_tree.contains_key(*path))
            .cloned()
            .collect::<Vec<_>>();

        let mut changes = Vec::new();
        for (path, content) in new_tree {
            if let Some(previous) = old_tree.get(path) {
                if previous != content {
                    let (added_lines, deleted_lines) = line_delta(previous, content);
                    changes.push(FileChange {
                        path: path.clone(),
                        kind: ChangeKind::Modified,
                        added_lines,
                        deleted_lines,
                    });
                }
            }
        }

        let mut renamed_targets = BTreeSet::new();
        deleted.retain(|from| {
            let source = &old_tree[from];
            let best = added
                .iter()
                .filter(|to| !renamed_targets.contains(*to))
                .map(|to| (similarity(source, &new_tree[to]), to))
                .filter(|(score, _)| *score >= RENAME_SIMILARITY_PERCENT)
                .max_by_key(|(score, _)| *score);
            let Some((_, to)) = best else {
                return true;
            };

            let (added_lines, deleted_lines) = line_delta(source, &new_tree[to]);
            changes.push(FileChange {
                path: to.clone(),
                kind: ChangeKind::Renamed { from: from.clone() },
                added_lines,
                deleted_lines,
            });
            renamed_targets.insert(to.clone());
            false
        });
        added.retain(|path| !renamed_targets.contains(path));

        for path in added {
            changes.push(FileChange {
                added_lines: line_count(&new_tree[&path]),
                deleted_lines: 0,
                kind: ChangeKind::Added,
                path,
            });
        }
        for path in deleted {
            changes.push(FileChange {
                added_lines: 0,
                deleted_lines: line_count(&old_tree[&path]),
                kind: ChangeKind::Deleted,
                path,
            });
        }

        changes.sort_by(|left, right| left.path.cmp(&right.path));
        Ok(changes)
    }

    fn tree_paths(&self, commit: &CommitId) -> Result<BTreeSet<String>, RepositoryError> {
        Ok(self.stored(commit)?.tree.keys().cloned().collect())
    }
}

fn line_count(content: &str) -> u64 {
    content.lines().count() as u64
}

fn line_delta(old: &str, new: &str) -> (u64, u64) {
    let old_lines = old.lines().collect::<Vec<_>>();
    let new_lines = new.lines().collect::<Vec<_>>();
    let common = longest_common_subsequence(&old_lines, &new_lines);
    (
        (new_lines.len() - common) as u64,
        (old_lines.len() - common) as u64,
    )
}

fn similarity(old: &str, new: &str) -> usize {
    let old_lines = old.lines().collect::<Vec<_>>();
    let new_lines = new.lines().collect::<Vec<_>>();
    let total = old_lines.len() + new_lines.len();
    if total == 0 {
        return 100;
    }
    longest_common_subsequence(&old_lines, &new_lines) * 200 / total
}

fn longest_common_subsequence(left: &[&str], right: &[&str]) -> usize {
    let mut previous = vec![0usize; right.len() + 1];
    let mut current = vec![0usize; right.len() + 1];
    for left_line in left {
        for (index, right_line) in right.iter().enumerate() {
            current[index + 1] = if left_line == right_line {
                previous[index] + 1
            } else {
                current[index].max(previous[index + 1])
            };
        }
        std::mem::swap(&mut previous, &mut current);
        current.fill(0);
    }
    previous[right.len()]
}
