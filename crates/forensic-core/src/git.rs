use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::{
    ChangeKind, Commit, CommitId, FileChange, Repository, RepositoryError, Signature,
    normalize_path,
};

/// Object name of the empty tree; `git diff-tree` accepts it without the
/// object being present in the store.
pub const EMPTY_TREE_ID: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

pub struct GitRepository {
    repo: gix::Repository,
    command_dir: PathBuf,
    shallow: HashSet<gix::ObjectId>,
}

impl GitRepository {
    pub fn open(workspace: &Path) -> Result<Self, RepositoryError> {
        let repo = gix::discover(workspace).map_err(|err| {
            RepositoryError::Access(format!(
                "no git repository at {}: {err}",
                workspace.display()
            ))
        })?;
        let command_dir = repo
            .workdir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| repo.git_dir().to_path_buf());
        let shallow = repo
            .shallow_commits()
            .map_err(|err| RepositoryError::Access(format!("failed to read shallow file: {err}")))?
            .map(|commits| commits.iter().copied().collect())
            .unwrap_or_default();

        Ok(Self {
            repo,
            command_dir,
            shallow,
        })
    }

    /// True when the checkout is a shallow clone. Boundary commits of a
    /// shallow clone are reported without parents.
    pub fn is_shallow(&self) -> bool {
        !self.shallow.is_empty()
    }

    pub fn root(&self) -> &Path {
        &self.command_dir
    }

    /// The `origin` fetch URL, or the checkout path when no such remote is
    /// configured.
    pub fn repository_key(&self) -> String {
        self.run_git(&["config", "--get", "remote.origin.url"])
            .ok()
            .map(|output| String::from_utf8_lossy(&output).trim().to_owned())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| self.command_dir.display().to_string())
    }

    fn run_git(&self, args: &[&str]) -> Result<Vec<u8>, RepositoryError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.command_dir)
            .args(args)
            .output()
            .map_err(|err| RepositoryError::Access(format!("failed to run git: {err}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RepositoryError::Access(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }

        Ok(output.stdout)
    }
}

impl Repository for GitRepository {
    fn head(&self) -> Result<CommitId, RepositoryError> {
        let head_id = self
            .repo
            .head_id()
            .map_err(|err| RepositoryError::NoHead(format!("failed to resolve HEAD: {err}")))?
            .detach();
        Ok(CommitId::new(head_id.to_string()))
    }

    fn find_commit(&self, id: &CommitId) -> Result<Commit, RepositoryError> {
        let object_id = gix::ObjectId::from_hex(id.as_str().as_bytes())
            .map_err(|err| RepositoryError::Access(format!("invalid commit id {id}: {err}")))?;
        let commit = self
            .repo
            .find_commit(object_id)
            .map_err(|err| RepositoryError::Access(format!("commit {id} not found: {err}")))?;

        let parents = if self.shallow.contains(&object_id) {
            Vec::new()
        } else {
            commit
                .parent_ids()
                .map(|parent| CommitId::new(parent.detach().to_string()))
                .collect()
        };

        let author_signature = commit
            .author()
            .map_err(|err| RepositoryError::Access(format!("bad author in {id}: {err}")))?;
        let author = Signature::new(
            decode_text(author_signature.name.as_ref()),
            decode_text(author_signature.email.as_ref()),
        );
        let author_time = author_signature.time().ok().map(|time| time.seconds);

        let committer = commit
            .committer()
            .map(|signature| {
                Signature::new(
                    decode_text(signature.name.as_ref()),
                    decode_text(signature.email.as_ref()),
                )
            })
            .map_err(|err| RepositoryError::Access(format!("bad committer in {id}: {err}")))?;
        let commit_time = commit.time().ok().map(|time| time.seconds).unwrap_or(0);

        Ok(Commit {
            id: id.clone(),
            parents,
            author,
            committer,
            author_time: author_time.unwrap_or(commit_time),
            commit_time,
        })
    }

    fn diff(
        &self,
        old: Option<&CommitId>,
        new: &CommitId,
    ) -> Result<Vec<FileChange>, RepositoryError> {
        let old = old.map(CommitId::as_str).unwrap_or(EMPTY_TREE_ID);
        let output = self.run_git(&[
            "diff-tree",
            "-r",
            "-M",
            "-C",
            "--raw",
            "--numstat",
            "-z",
            "--no-commit-id",
            old,
            new.as_str(),
        ])?;
        Ok(parse_diff_tree_output(&output))
    }

    fn tree_paths(&self, commit: &CommitId) -> Result<BTreeSet<String>, RepositoryError> {
        let output = self.run_git(&["ls-tree", "-r", "-z", "--name-only", commit.as_str()])?;
        Ok(output
            .split(|byte| *byte == 0)
            .filter(|entry| !entry.is_empty())
            .map(|entry| normalize_path(&String::from_utf8_lossy(entry)))
            .collect())
    }
}

struct RawEntry {
    status: u8,
    from: String,
    to: String,
}

/// Parses `git diff-tree --raw --numstat -z` output. Raw records carry the
/// change status and paths; numstat records carry line counts keyed by the
/// destination path. Binary files report `-` and count as zero lines.
pub fn parse_diff_tree_output(output: &[u8]) -> Vec<FileChange> {
    let mut tokens = output
        .split(|byte| *byte == 0)
        .map(|token| String::from_utf8_lossy(token).into_owned());
    let mut entries = Vec::new();
    let mut counts = HashMap::<String, (u64, u64)>::new();

    while let Some(token) = tokens.next() {
        let token = token.trim_start_matches('\n');
        if token.is_empty() {
            continue;
        }

        if let Some(meta) = token.strip_prefix(':') {
            let status = meta
                .split_whitespace()
                .nth(4)
                .and_then(|value| value.bytes().next())
                .unwrap_or(b'M');
            let from = normalize_path(&tokens.next().unwrap_or_default());
            let to = if matches!(status, b'R' | b'C') {
                normalize_path(&tokens.next().unwrap_or_default())
            } else {
                from.clone()
            };
            entries.push(RawEntry { status, from, to });
            continue;
        }

        let mut fields = token.splitn(3, '\t');
        let added = parse_count(fields.next());
        let deleted = parse_count(fields.next());
        let path = fields.next().unwrap_or_default();
        let key = if path.is_empty() {
            let _from = tokens.next();
            normalize_path(&tokens.next().unwrap_or_default())
        } else {
            normalize_path(path)
        };
        counts.insert(key, (added, deleted));
    }

    entries
        .into_iter()
        .filter(|entry| !entry.to.is_empty())
        .map(|entry| {
            let (added_lines, deleted_lines) = counts.get(&entry.to).copied().unwrap_or((0, 0));
            let kind = match entry.status {
                b'A' => ChangeKind::Added,
                b'D' => ChangeKind::Deleted,
                b'R' => ChangeKind::Renamed { from: entry.from },
                b'C' => ChangeKind::Copied { from: entry.from },
                _ => ChangeKind::Modified,
            };
            FileChange {
                path: entry.to,
                kind,
                added_lines,
                deleted_lines,
            }
        })
        .collect()
}

fn parse_count(value: Option<&str>) -> u64 {
    value
        .map(str::trim)
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

fn decode_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_owned()
}
