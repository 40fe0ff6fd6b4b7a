// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

//! The local-git backend: the full reconciliation pipeline over a working
//! clone, driven through the [`GitAdapter`].

use std::path::{Path, PathBuf};

use crate::{
    collab::{Identity, LintOptions, Linter, Projector},
    config::{ProjectConfig, REMOTE},
    git::{FileChange, GitAdapter, GitCli, TreeEntry},
    paths::{self, GITGOV_DIR},
};

use super::{audit, AuditOptions, AuditReport, Error, SyncBackend};

mod pull;
mod push;
mod resolve;

pub struct LocalGitBackend<G = GitCli> {
    git: G,
    repo_root: PathBuf,
    state_branch: String,
    identity: Box<dyn Identity>,
    projector: Box<dyn Projector>,
    linter: Box<dyn Linter>,
}

impl LocalGitBackend<GitCli> {
    /// Bind to the repository at `repo_root`, reading the state branch name
    /// from the project config.
    pub fn open(
        repo_root: impl Into<PathBuf>,
        identity: Box<dyn Identity>,
        projector: Box<dyn Projector>,
        linter: Box<dyn Linter>,
    ) -> Result<Self, Error> {
        let repo_root = repo_root.into();
        let git = GitCli::open(&repo_root)?;
        let config = ProjectConfig::load(&repo_root)?;
        Ok(Self::new(git, repo_root, config, identity, projector, linter))
    }
}

impl<G: GitAdapter> LocalGitBackend<G> {
    pub fn new(
        git: G,
        repo_root: PathBuf,
        config: ProjectConfig,
        identity: Box<dyn Identity>,
        projector: Box<dyn Projector>,
        linter: Box<dyn Linter>,
    ) -> Self {
        Self {
            git,
            repo_root,
            state_branch: config.state_branch,
            identity,
            projector,
            linter,
        }
    }

    pub fn state_branch(&self) -> &str {
        &self.state_branch
    }

    fn gitgov_dir(&self) -> PathBuf {
        self.repo_root.join(GITGOV_DIR)
    }

    fn remote_state_ref(&self) -> String {
        format!("{}/{}", REMOTE, self.state_branch)
    }

    /// Whether the remote publishes the state branch. Unreachable remotes
    /// count as "no": setup paths are best-effort about transport.
    fn remote_state_exists(&self) -> bool {
        match self.git.list_remote_branches(REMOTE) {
            Ok(branches) => branches.iter().any(|b| b == &self.state_branch),
            Err(err) => {
                tracing::debug!(%err, "could not list remote branches");
                false
            },
        }
    }

    /// Syncable files present in `reference`'s `.gitgov/` tree.
    fn state_files(&self, reference: &str) -> Result<Vec<String>, Error> {
        Ok(self
            .git
            .ls_tree(reference, GITGOV_DIR)?
            .into_iter()
            .filter(|f| paths::should_sync(Path::new(f)))
            .collect())
    }

    fn checkout_back(&self, branch: &str) -> Result<(), Error> {
        match self.git.checkout_branch(branch) {
            Ok(()) => Ok(()),
            Err(_) => self.git.checkout_branch_force(branch).map_err(Error::from),
        }
    }

    fn run_projector(&self) -> bool {
        match self.projector.generate_index() {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%err, "projector failed; derived indices are stale");
                false
            },
        }
    }

    /// Create the initial orphan state commit without touching the working
    /// tree: blob, tree and commit are built directly in the object
    /// database and the branch ref is pointed at the result.
    fn init_orphan_state_branch(&self) -> Result<(), Error> {
        let blob = self
            .git
            .hash_object(paths::state_branch_gitignore().as_bytes())?;
        let gitgov_tree = self.git.mktree(&[TreeEntry::blob(blob, ".gitignore")])?;
        let root_tree = self.git.mktree(&[TreeEntry::tree(gitgov_tree, GITGOV_DIR)])?;
        let commit = self
            .git
            .commit_tree(&root_tree, &[], "Initialize state branch with .gitignore")?;
        self.git.create_branch(&self.state_branch, Some(&commit))?;

        match self.git.push_with_upstream(REMOTE, &self.state_branch) {
            Ok(()) => {},
            Err(err) if err.is_missing_remote() => {
                tracing::warn!(%err, "state branch created locally; remote unreachable");
            },
            Err(err) => {
                tracing::warn!(%err, "could not publish fresh state branch");
            },
        }
        Ok(())
    }

    fn ensure_state_branch_impl(&self) -> Result<(), Error> {
        let original = self.git.current_branch()?;
        if !self.git.has_commits("HEAD")? {
            return Err(Error::NoCommitsOnBranch(original));
        }

        let local = self.git.branch_exists(&self.state_branch)?;
        let remote = self.remote_state_exists();
        tracing::debug!(%local, %remote, branch = %self.state_branch, "ensuring state branch");

        match (local, remote) {
            (false, false) => self
                .init_orphan_state_branch()
                .map_err(|err| Error::StateBranchSetup(err.to_string())),
            (false, true) => {
                self.git.fetch(REMOTE)?;
                self.git
                    .create_branch(&self.state_branch, Some(&self.remote_state_ref()))?;
                Ok(())
            },
            (true, false) => {
                if self.git.is_remote_configured(REMOTE)? {
                    match self.git.push_with_upstream(REMOTE, &self.state_branch) {
                        Ok(()) => {},
                        Err(err) if err.is_missing_remote() => {
                            tracing::warn!(%err, "remote unreachable; state branch stays local");
                        },
                        Err(err) => return Err(Error::StateBranchSetup(err.to_string())),
                    }
                }
                Ok(())
            },
            (true, true) => {
                if self.git.upstream_of(&self.state_branch)?.is_none() {
                    self.git
                        .set_upstream(&self.state_branch, &self.remote_state_ref())?;
                }
                Ok(())
            },
        }
    }

    fn calculate_state_delta_impl(&self, source_branch: &str) -> Result<Vec<FileChange>, Error> {
        Ok(self
            .git
            .changed_files(&self.state_branch, source_branch, Some(GITGOV_DIR))?
            .into_iter()
            .filter(|change| paths::should_sync(Path::new(&change.file)))
            .collect())
    }

    fn audit_impl(&self, options: AuditOptions) -> Result<AuditReport, Error> {
        let commits = if self.git.branch_exists(&self.state_branch)? {
            self.git
                .commit_history(&self.state_branch, audit::MAX_AUDIT_COMMITS)?
        } else {
            Vec::new()
        };
        let scan = audit::scan_history(&commits);

        let lint = self
            .linter
            .lint(LintOptions {
                validate_checksums: options.verify_checksums,
                validate_signatures: options.verify_signatures,
                validate_references: true,
                concurrent: true,
                verify_expected_files: options.verify_expected_files,
            })
            .map_err(|err| Error::Collaborator(err.to_string()))?;

        Ok(audit::build_report(options.scope, scan, Some(lint)))
    }
}

impl<G: GitAdapter> SyncBackend for LocalGitBackend<G> {
    #[tracing::instrument(skip(self))]
    fn ensure_state_branch(&self) -> Result<(), Error> {
        self.ensure_state_branch_impl()
    }

    fn calculate_state_delta(&self, source_branch: &str) -> Result<Vec<FileChange>, Error> {
        self.calculate_state_delta_impl(source_branch)
    }

    #[tracing::instrument(skip(self, options), fields(actor = %actor_id))]
    fn push(
        &self,
        actor_id: &str,
        options: super::PushOptions,
    ) -> Result<super::PushResult, Error> {
        self.push_impl(actor_id, options)
    }

    #[tracing::instrument(skip(self, options))]
    fn pull(&self, options: super::PullOptions) -> Result<super::PullResult, Error> {
        self.pull_impl(options)
    }

    #[tracing::instrument(skip(self), fields(actor = %actor_id))]
    fn resolve(&self, actor_id: &str, reason: &str) -> Result<super::ResolveResult, Error> {
        self.resolve_impl(actor_id, reason)
    }

    fn audit(&self, options: AuditOptions) -> Result<AuditReport, Error> {
        self.audit_impl(options)
    }

    fn is_rebase_in_progress(&self) -> Result<bool, Error> {
        self.git.is_rebase_in_progress().map_err(Error::from)
    }
}
