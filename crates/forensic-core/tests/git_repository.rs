use std::error::Error;
use std::fs;
use std::path::Path;
use std::process::Command;

use forensic_core::{
    Cancellation, ChangeKind, CommitId, GitRepository, Repository, RepositoryError, WalkBoundary,
    walk,
};
use tempfile::tempdir;

#[test]
fn head_commit_matches_rev_parse() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let workspace = temp.path();
    init_git_repo(workspace)?;

    fs::write(workspace.join("README.md"), "hello\n")?;
    let expected = commit_all(workspace, "initial")?;

    let repo = GitRepository::open(workspace)?;
    assert_eq!(repo.head()?.as_str(), expected);
    Ok(())
}

#[test]
fn repository_key_prefers_origin_url() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let workspace = temp.path();
    init_git_repo(workspace)?;

    let repo = GitRepository::open(workspace)?;
    assert_eq!(repo.repository_key(), repo.root().display().to_string());

    run_git(
        workspace,
        &["remote", "add", "origin", "https://example.com/forensic.git"],
    )?;
    assert_eq!(repo.repository_key(), "https://example.com/forensic.git");
    Ok(())
}

#[test]
fn empty_repository_has_no_head() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    init_git_repo(temp.path())?;

    let repo = GitRepository::open(temp.path())?;
    assert!(matches!(repo.head(), Err(RepositoryError::NoHead(_))));
    Ok(())
}

#[test]
fn non_git_workspace_is_an_access_error() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    assert!(matches!(
        GitRepository::open(temp.path()),
        Err(RepositoryError::Access(_))
    ));
    Ok(())
}

#[test]
fn find_commit_reads_parents_identity_and_author_time() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let workspace = temp.path();
    init_git_repo(workspace)?;

    fs::write(workspace.join("a.txt"), "a\n")?;
    let base = commit_all(workspace, "base")?;

    run_git(workspace, &["checkout", "-q", "-b", "feature"])?;
    fs::write(workspace.join("b.txt"), "b\n")?;
    let feature = commit_all(workspace, "feature work")?;

    run_git(workspace, &["checkout", "-q", "-"])?;
    fs::write(workspace.join("a.txt"), "a\nmore\n")?;
    let mainline = commit_all(workspace, "mainline work")?;

    run_git(workspace, &["merge", "--no-ff", "-q", "-m", "merge feature", "feature"])?;
    let merge = run_git(workspace, &["rev-parse", "--verify", "HEAD"])?;

    let repo = GitRepository::open(workspace)?;
    let commit = repo.find_commit(&CommitId::new(merge.as_str()))?;
    assert!(commit.is_merge());
    assert_eq!(commit.first_parent().map(CommitId::as_str), Some(mainline.as_str()));
    assert_eq!(commit.second_parent().map(CommitId::as_str), Some(feature.as_str()));
    assert_eq!(commit.author.name, "Forensic Test");
    assert_eq!(commit.author.email, "forensic-test@example.com");

    let root = repo.find_commit(&CommitId::new(base.as_str()))?;
    assert!(root.parents.is_empty());
    assert_eq!(root.author_time, 1_700_000_000);
    Ok(())
}

#[test]
fn diff_reports_line_counts_and_renames() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let workspace = temp.path();
    init_git_repo(workspace)?;

    fs::create_dir_all(workspace.join("src"))?;
    fs::write(
        workspace.join("src/old.rs"),
        "fn one() {}\nfn two() {}\nfn three() {}\nfn four() {}\n",
    )?;
    fs::write(workspace.join("notes.txt"), "first\nsecond\n")?;
    let first = commit_all(workspace, "initial")?;

    run_git(workspace, &["mv", "src/old.rs", "src/new.rs"])?;
    fs::write(workspace.join("notes.txt"), "first\nchanged\nthird\n")?;
    fs::write(workspace.join("added.txt"), "x\n")?;
    let second = commit_all(workspace, "rename and edit")?;

    let repo = GitRepository::open(workspace)?;
    let initial = repo.diff(None, &CommitId::new(first.as_str()))?;
    assert_eq!(initial.len(), 2);
    assert!(initial.iter().all(|change| change.kind == ChangeKind::Added));
    let old_rs = initial
        .iter()
        .find(|change| change.path == "src/old.rs")
        .ok_or("missing src/old.rs")?;
    assert_eq!(old_rs.added_lines, 4);

    let changes = repo.diff(
        Some(&CommitId::new(first.as_str())),
        &CommitId::new(second.as_str()),
    )?;
    let renamed = changes
        .iter()
        .find(|change| change.path == "src/new.rs")
        .ok_or("missing rename")?;
    assert_eq!(
        renamed.kind,
        ChangeKind::Renamed {
            from: "src/old.rs".to_owned()
        }
    );

    let notes = changes
        .iter()
        .find(|change| change.path == "notes.txt")
        .ok_or("missing notes")?;
    assert_eq!(notes.kind, ChangeKind::Modified);
    assert_eq!((notes.added_lines, notes.deleted_lines), (2, 1));

    let added = changes
        .iter()
        .find(|change| change.path == "added.txt")
        .ok_or("missing added file")?;
    assert_eq!(added.kind, ChangeKind::Added);

    let paths = repo.tree_paths(&CommitId::new(second.as_str()))?;
    assert_eq!(
        paths.into_iter().collect::<Vec<_>>(),
        vec!["added.txt", "notes.txt", "src/new.rs"]
    );
    Ok(())
}

#[test]
fn walker_stops_at_previous_commit() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let workspace = temp.path();
    init_git_repo(workspace)?;

    let mut hashes = Vec::new();
    for index in 0..4 {
        fs::write(workspace.join("counter.txt"), format!("{index}\n"))?;
        hashes.push(commit_all(workspace, &format!("commit {index}"))?);
    }

    let repo = GitRepository::open(workspace)?;
    let walked = walk(
        &repo,
        &repo.head()?,
        WalkBoundary::until(CommitId::new(hashes[1].as_str())),
        &Cancellation::new(),
    )?
    .map(|commit| commit.map(|commit| commit.id.as_str().to_owned()))
    .collect::<Result<Vec<_>, _>>()?;

    assert_eq!(walked, vec![hashes[3].clone(), hashes[2].clone()]);
    Ok(())
}

#[test]
fn author_time_comes_from_author_signature() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let workspace = temp.path();
    init_git_repo(workspace)?;

    fs::write(workspace.join("a.txt"), "a\n")?;
    run_git(workspace, &["add", "-A"])?;
    run_git(
        workspace,
        &["commit", "-q", "-m", "dated", "--date", "@1600000000 +0200"],
    )?;

    let repo = GitRepository::open(workspace)?;
    let commit = repo.find_commit(&repo.head()?)?;
    assert_eq!(commit.author_time, 1_600_000_000);
    assert_eq!(commit.commit_time, 1_700_000_000);
    Ok(())
}

#[test]
fn shallow_clone_walk_ends_at_boundary() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let origin = temp.path().join("origin");
    fs::create_dir_all(&origin)?;
    init_git_repo(&origin)?;

    let mut hashes = Vec::new();
    for index in 0..5 {
        fs::write(origin.join("counter.txt"), format!("{index}\n"))?;
        hashes.push(commit_all(&origin, &format!("commit {index}"))?);
    }

    let url = format!("file://{}", origin.display());
    run_git(temp.path(), &["clone", "-q", "--depth", "2", &url, "shallow"])?;

    let repo = GitRepository::open(&temp.path().join("shallow"))?;
    assert!(repo.is_shallow());

    let boundary = repo.find_commit(&CommitId::new(hashes[3].as_str()))?;
    assert!(boundary.parents.is_empty());

    let walked = walk(&repo, &repo.head()?, WalkBoundary::root(), &Cancellation::new())?
        .map(|commit| commit.map(|commit| commit.id.as_str().to_owned()))
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(walked, vec![hashes[4].clone(), hashes[3].clone()]);

    let initial = repo.diff(None, &CommitId::new(hashes[3].as_str()))?;
    assert_eq!(initial.len(), 1);
    assert_eq!(initial[0].kind, ChangeKind::Added);
    Ok(())
}

fn run_git(workspace: &Path, args: &[&str]) -> Result<String, Box<dyn Error>> {
    let output = Command::new("git")
        .args(args)
        .current_dir(workspace)
        .env("GIT_AUTHOR_DATE", "@1700000000 +0000")
        .env("GIT_COMMITTER_DATE", "@1700000000 +0000")
        .output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("git {:?} failed: {}", args, stderr.trim()).into());
    }

    Ok(String::from_utf8(output.stdout)?.trim().to_owned())
}

fn init_git_repo(workspace: &Path) -> Result<(), Box<dyn Error>> {
    run_git(workspace, &["init", "-q"])?;
    run_git(workspace, &["config", "user.name", "Forensic Test"])?;
    run_git(workspace, &["config", "user.email", "forensic-test@example.com"])?;
    run_git(workspace, &["config", "commit.gpgsign", "false"])?;
    Ok(())
}

fn commit_all(workspace: &Path, message: &str) -> Result<String, Box<dyn Error>> {
    run_git(workspace, &["add", "-A"])?;
    run_git(workspace, &["commit", "-q", "-m", message])?;
    run_git(workspace, &["rev-parse", "--verify", "HEAD"])
}
