// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

//! The abstract git capability set the sync engine is written against.
//!
//! One implementation wraps the `git` executable ([`cli::GitCli`]); the
//! GitHub REST backend maps the subset it needs onto tree/commit/ref
//! endpoints and no-ops the rebase surface.

use std::path::PathBuf;

use thiserror::Error;

pub mod cli;
pub use cli::GitCli;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("git executable not found or not runnable")]
    NotAvailable,

    #[error("not inside a git repository: {0}")]
    NotARepository(PathBuf),

    #[error("git {args} failed: {stderr}")]
    Command { args: String, stderr: String },

    #[error("git produced non-utf8 output")]
    Utf8,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// `pull --rebase` failures that do not indicate divergence: nothing
    /// fetched, nothing tracked, nowhere to pull from.
    pub fn is_benign_pull_failure(&self) -> bool {
        match self {
            Self::Command { stderr, .. } => {
                let s = stderr.to_lowercase();
                s.contains("no tracking information")
                    || s.contains("does not appear to be a git repository")
                    || s.contains("couldn't find remote ref")
                    || s.contains("no such remote")
            },
            _ => false,
        }
    }

    /// `push` failures tolerated when the project has no reachable remote.
    pub fn is_missing_remote(&self) -> bool {
        match self {
            Self::Command { stderr, .. } => {
                let s = stderr.to_lowercase();
                s.contains("no such remote")
                    || s.contains("does not appear to be a git repository")
                    || s.contains("could not read from remote repository")
            },
            _ => false,
        }
    }
}

/// Change status of one file between two trees.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
}

impl ChangeStatus {
    pub fn as_letter(&self) -> char {
        match self {
            Self::Added => 'A',
            Self::Modified => 'M',
            Self::Deleted => 'D',
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileChange {
    pub status: ChangeStatus,
    pub file: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitInfo {
    pub hash: String,
    pub author: String,
    pub date: String,
    pub message: String,
}

/// Everything the engine asks of a repository.
///
/// The trait is deliberately flat: each method is one conceptual git
/// operation, and the engine composes them into pipelines. Implementations
/// must be safe to call repeatedly; none of the operations hold state
/// between calls.
pub trait GitAdapter {
    // pre-flight
    fn current_branch(&self) -> Result<String, Error>;
    /// The branch checked out before the current one (`@{-1}`), if any.
    fn previous_branch(&self) -> Result<Option<String>, Error>;
    fn repo_root(&self) -> Result<PathBuf, Error>;
    fn is_remote_configured(&self, remote: &str) -> Result<bool, Error>;
    fn has_commits(&self, branch: &str) -> Result<bool, Error>;
    fn head(&self) -> Result<String, Error>;
    fn is_dirty(&self) -> Result<bool, Error>;
    /// Dirty, counting only tracked files; untracked files do not block a
    /// branch switch.
    fn has_tracked_changes(&self) -> Result<bool, Error>;

    // branch topology
    fn branch_exists(&self, name: &str) -> Result<bool, Error>;
    fn list_remote_branches(&self, remote: &str) -> Result<Vec<String>, Error>;
    fn create_branch(&self, name: &str, start_point: Option<&str>) -> Result<(), Error>;
    fn checkout_branch(&self, name: &str) -> Result<(), Error>;
    fn checkout_branch_force(&self, name: &str) -> Result<(), Error>;
    fn checkout_orphan_branch(&self, name: &str) -> Result<(), Error>;
    fn set_upstream(&self, branch: &str, upstream: &str) -> Result<(), Error>;
    fn upstream_of(&self, branch: &str) -> Result<Option<String>, Error>;

    // transport
    fn fetch(&self, remote: &str) -> Result<(), Error>;
    fn push(&self, remote: &str, branch: &str) -> Result<(), Error>;
    fn push_with_upstream(&self, remote: &str, branch: &str) -> Result<(), Error>;
    fn pull_rebase(&self, remote: &str, branch: &str) -> Result<(), Error>;

    // mutation
    fn add(&self, paths: &[&str], force: bool) -> Result<(), Error>;
    fn commit(&self, message: &str) -> Result<String, Error>;
    fn commit_allow_empty(&self, message: &str) -> Result<String, Error>;
    fn remove_force(&self, paths: &[&str]) -> Result<(), Error>;
    fn unstage(&self, paths: &[&str]) -> Result<(), Error>;
    fn remove_index(&self) -> Result<(), Error>;
    fn stash(&self, label: &str) -> Result<Option<String>, Error>;
    fn stash_pop(&self) -> Result<(), Error>;
    /// Stash entry messages, newest first.
    fn stash_list(&self) -> Result<Vec<String>, Error>;

    // reconciliation
    fn rebase(&self, onto: &str) -> Result<(), Error>;
    fn rebase_continue(&self) -> Result<(), Error>;
    fn rebase_abort(&self) -> Result<(), Error>;
    fn is_rebase_in_progress(&self) -> Result<bool, Error>;
    fn conflicted_files(&self) -> Result<Vec<String>, Error>;
    fn staged_files(&self) -> Result<Vec<String>, Error>;
    /// The staged diff with statuses; what a commit made now would contain.
    fn staged_changes(&self) -> Result<Vec<FileChange>, Error>;

    // analysis
    fn changed_files(
        &self,
        from: &str,
        to: &str,
        path_filter: Option<&str>,
    ) -> Result<Vec<FileChange>, Error>;
    fn commit_history(&self, reference: &str, max: usize) -> Result<Vec<CommitInfo>, Error>;
    fn ls_tree(&self, reference: &str, path_prefix: &str) -> Result<Vec<String>, Error>;
    fn show_file(&self, reference: &str, path: &str) -> Result<Option<Vec<u8>>, Error>;

    // selective restore
    fn checkout_files_from_branch(&self, branch: &str, paths: &[&str]) -> Result<(), Error>;

    // plumbing: build commits without touching the working tree
    fn hash_object(&self, content: &[u8]) -> Result<String, Error>;
    fn mktree(&self, entries: &[TreeEntry]) -> Result<String, Error>;
    fn commit_tree(&self, tree: &str, parents: &[&str], message: &str) -> Result<String, Error>;
}

/// One `git mktree` input line.
#[derive(Clone, Debug)]
pub struct TreeEntry {
    pub mode: &'static str,
    pub kind: &'static str,
    pub oid: String,
    pub name: String,
}

impl TreeEntry {
    pub fn blob(oid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mode: "100644",
            kind: "blob",
            oid: oid.into(),
            name: name.into(),
        }
    }

    pub fn tree(oid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mode: "040000",
            kind: "tree",
            oid: oid.into(),
            name: name.into(),
        }
    }
}
