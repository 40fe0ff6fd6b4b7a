// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

//! Pull: bring remote state into the working tree without clobbering
//! local edits, then rebuild derived indices.

use std::{collections::BTreeMap, fs, path::Path};

use crate::{
    config::REMOTE,
    git::{ChangeStatus, GitAdapter},
    paths::{self, GITGOV_DIR, SYNC_DIRECTORIES, SYNC_ROOT_FILES},
    sync::{session, ConflictInfo, ConflictType, Error, PullOptions, PullResult},
};

use super::LocalGitBackend;

type Snapshot = BTreeMap<String, Vec<u8>>;

impl<G: GitAdapter> LocalGitBackend<G> {
    pub(super) fn pull_impl(&self, options: PullOptions) -> Result<PullResult, Error> {
        if !self.git.is_remote_configured(REMOTE)? {
            return Err(Error::NoRemoteConfigured);
        }

        let local = self.git.branch_exists(&self.state_branch)?;
        let remote = self.remote_state_exists();
        let gitgov = self.gitgov_dir();

        if !local && !remote {
            let mut result = PullResult::empty();
            result.error = Some(if gitgov.exists() {
                "no state branch exists yet; publish your local records first with `gitgov push`"
                    .to_string()
            } else {
                "no governance state found; initialise the project with `gitgov init`".to_string()
            });
            return Ok(result);
        }
        if !local && remote {
            self.git.fetch(REMOTE)?;
            self.git
                .create_branch(&self.state_branch, Some(&self.remote_state_ref()))?;
        }
        if local && !remote {
            // Nothing upstream to reconcile with.
            let mut result = PullResult::empty();
            result.success = true;
            return Ok(result);
        }

        // Snapshot the local record set and the machine-local files before
        // any branch switch; the conflict path and the restore path both
        // replay from these.
        let saved_syncable = session::snapshot(&gitgov, |rel| paths::should_sync(rel))?;
        let saved_local = session::snapshot(&gitgov, |rel| paths::is_preserved(rel))?;
        let source = self.git.current_branch()?;

        let pipeline = self.pull_reconcile(&options, &source, &saved_syncable, &saved_local);

        match pipeline {
            Ok(result) => Ok(result),
            Err(err) => {
                let mut errors = vec![err.to_string()];
                if let Err(restore_err) = self.pull_restore_on_error(&source, &saved_syncable, &saved_local)
                {
                    errors.push(format!("cleanup: {}", restore_err));
                }
                let mut result = PullResult::empty();
                result.error = Some(errors.join("; "));
                Ok(result)
            },
        }
    }

    fn pull_reconcile(
        &self,
        options: &PullOptions,
        source: &str,
        saved_syncable: &Snapshot,
        saved_local: &Snapshot,
    ) -> Result<PullResult, Error> {
        // The work branch may hold `.gitgov/` untracked; a plain checkout
        // refuses to continue then, so fall back to force. Tracked
        // modifications are a different matter: force would destroy them.
        if self.git.checkout_branch(&self.state_branch).is_err() {
            if self.git.has_tracked_changes()? {
                return Err(Error::UncommittedChanges);
            }
            self.git.checkout_branch_force(&self.state_branch)?;
        }
        self.git.fetch(REMOTE)?;

        let remote_changed: Vec<_> = self
            .git
            .changed_files(&self.state_branch, &self.remote_state_ref(), Some(GITGOV_DIR))?
            .into_iter()
            .filter(|change| paths::should_sync(Path::new(&change.file)))
            .collect();

        // Local-change detection, with git-pull semantics: a file the
        // remote touched whose local content differs from the last synced
        // state would lose the local edit.
        let mut overlaps = Vec::new();
        for change in &remote_changed {
            let last_synced = self.git.show_file("HEAD", &change.file)?;
            let local = saved_syncable.get(&change.file);
            let locally_edited = match (local, last_synced) {
                (Some(local), Some(synced)) => local != &synced,
                (None, None) => false,
                // Created locally, or deleted locally: either way an edit.
                _ => true,
            };
            if locally_edited {
                overlaps.push(change.file.clone());
            }
        }

        if !overlaps.is_empty() && !options.force {
            self.checkout_back(source)?;
            session::restore_snapshot(&self.repo_root, saved_syncable)?;
            session::restore_snapshot(&self.repo_root, saved_local)?;
            self.git.unstage(&[GITGOV_DIR])?;

            let mut result = PullResult::empty();
            result.conflict_detected = true;
            result.conflict_info = Some(local_changes_conflict(overlaps));
            return Ok(result);
        }
        let forced_overwrites = if options.force { overlaps } else { Vec::new() };

        let head_before = self.git.head()?;
        match self.git.pull_rebase(REMOTE, &self.state_branch) {
            Ok(()) => {},
            Err(err) => {
                let conflicted = self.git.conflicted_files()?;
                if self.git.is_rebase_in_progress()? || !conflicted.is_empty() {
                    // Stay paused for `resolve`; keys must be reachable on
                    // this worktree for the re-signing step.
                    session::restore_snapshot(&self.repo_root, saved_local)?;
                    let mut result = PullResult::empty();
                    result.conflict_detected = true;
                    result.conflict_info = Some(rebase_conflict(conflicted));
                    return Ok(result);
                } else if err.is_benign_pull_failure() {
                    tracing::debug!(%err, "nothing to pull");
                } else {
                    return Err(err.into());
                }
            },
        }
        let has_changes = self.git.head()? != head_before;

        self.checkout_back(source)?;
        self.restore_worktree(&remote_changed, saved_syncable, saved_local)?;

        // Reindex on changes, on request, and on the bootstrap case of a
        // fresh clone that has no derived index yet.
        let need_reindex =
            has_changes || options.force_reindex || !self.gitgov_dir().join("index.json").exists();
        let reindexed = need_reindex && self.run_projector();

        Ok(PullResult {
            success: true,
            has_changes,
            files_updated: if has_changes { remote_changed.len() } else { 0 },
            reindexed,
            conflict_detected: false,
            conflict_info: None,
            forced_overwrites,
            error: None,
        })
    }

    /// Rebuild the working tree's `.gitgov/` after the state branch moved:
    /// synced content from the state branch, locally edited but untouched
    /// records from the snapshot, machine-local files on top.
    fn restore_worktree(
        &self,
        remote_changed: &[crate::git::FileChange],
        saved_syncable: &Snapshot,
        saved_local: &Snapshot,
    ) -> Result<(), Error> {
        let mut restore_paths = Vec::new();
        for dir in &SYNC_DIRECTORIES {
            let path = format!("{}/{}", GITGOV_DIR, dir);
            if !self.git.ls_tree(&self.state_branch, &path)?.is_empty() {
                restore_paths.push(path);
            }
        }
        for file in &SYNC_ROOT_FILES {
            let path = format!("{}/{}", GITGOV_DIR, file);
            if !self.git.ls_tree(&self.state_branch, &path)?.is_empty() {
                restore_paths.push(path);
            }
        }
        if !restore_paths.is_empty() {
            let refs: Vec<&str> = restore_paths.iter().map(String::as_str).collect();
            self.git
                .checkout_files_from_branch(&self.state_branch, &refs)?;
            self.git.unstage(&[GITGOV_DIR])?;
        }

        // Remote deletions do not fall out of a selective checkout.
        for change in remote_changed {
            if change.status == ChangeStatus::Deleted {
                let target = self.repo_root.join(&change.file);
                if target.exists() {
                    fs::remove_file(target)?;
                }
            }
        }

        // Local edits to records the remote did not touch survive the
        // round trip.
        let remote_set: std::collections::BTreeSet<&str> =
            remote_changed.iter().map(|c| c.file.as_str()).collect();
        let untouched: Snapshot = saved_syncable
            .iter()
            .filter(|(file, _)| !remote_set.contains(file.as_str()))
            .map(|(file, bytes)| (file.clone(), bytes.clone()))
            .collect();
        session::restore_snapshot(&self.repo_root, &untouched)?;

        session::restore_snapshot(&self.repo_root, saved_local)?;
        Ok(())
    }

    fn pull_restore_on_error(
        &self,
        source: &str,
        saved_syncable: &Snapshot,
        saved_local: &Snapshot,
    ) -> Result<(), Error> {
        // A paused rebase is not an error path; this only runs when the
        // pipeline bailed out mid-flight.
        if self.git.is_rebase_in_progress()? {
            return Ok(());
        }
        self.checkout_back(source)?;
        session::restore_snapshot(&self.repo_root, saved_syncable)?;
        session::restore_snapshot(&self.repo_root, saved_local)?;
        self.git.unstage(&[GITGOV_DIR])?;
        Ok(())
    }
}

fn local_changes_conflict(affected_files: Vec<String>) -> ConflictInfo {
    ConflictInfo {
        conflict_type: ConflictType::LocalChangesConflict,
        message: "local edits would be overwritten by remote changes".to_string(),
        affected_files,
        resolution_steps: vec![
            "push your local records first with `gitgov push` (rebase-based resolution)"
                .to_string(),
            "or discard them with `gitgov pull --force`".to_string(),
        ],
    }
}

fn rebase_conflict(affected_files: Vec<String>) -> ConflictInfo {
    ConflictInfo {
        conflict_type: ConflictType::RebaseConflict,
        message: "the state branch diverged; the rebase is paused".to_string(),
        affected_files,
        resolution_steps: vec![
            "edit the conflicted files and remove the conflict markers".to_string(),
            "stage them with `git add <file>`".to_string(),
            "run `gitgov resolve --reason \"<why>\"` to sign and publish the resolution"
                .to_string(),
        ],
    }
}
