// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

//! Push: publish the local record set to the state branch, rebasing onto
//! the remote tip before the final push.

use std::{collections::BTreeSet, fs, path::Path};

use chrono::Utc;
use tempfile::TempDir;

use crate::{
    config::REMOTE,
    git::{FileChange, GitAdapter},
    paths::{self, GITGOV_DIR},
    sync::{
        message,
        session::{self, STASH_LABEL},
        AuditOptions, AuditReport, ConflictInfo, ConflictType, Error, ImplicitPull, PushOptions,
        PushResult,
    },
};

use super::LocalGitBackend;

impl<G: GitAdapter> LocalGitBackend<G> {
    pub(super) fn push_impl(
        &self,
        actor_id: &str,
        options: PushOptions,
    ) -> Result<PushResult, Error> {
        // Pre-flight: each failure is typed and nothing has been mutated.
        let source = match options.source_branch.clone() {
            Some(branch) => branch,
            None => self.git.current_branch()?,
        };
        if source == self.state_branch {
            return Err(Error::PushFromStateBranch(self.state_branch.clone()));
        }
        let authenticated = self.identity.actor_id().to_string();
        if authenticated != actor_id {
            return Err(Error::ActorIdentityMismatch {
                authenticated,
                requested: actor_id.to_string(),
            });
        }
        if !self.git.is_remote_configured(REMOTE)? {
            return Err(Error::NoRemoteConfigured);
        }
        if !self.git.has_commits(&source)? {
            return Err(Error::NoCommitsOnBranch(source));
        }

        let audit = self.audit_impl(AuditOptions::default())?;
        if !audit.passed {
            return Ok(integrity_conflict(&source, &audit));
        }

        self.ensure_state_branch_impl()?;

        // Critical section: everything below must restore the working tree
        // on its way out, so failures are folded into the result after
        // cleanup instead of being thrown.
        let temp = session::preserve_gitgov(&self.repo_root)?;
        let mut stash = None;

        let pipeline = self.push_publish(actor_id, &options, &source, temp.as_ref(), &mut stash);

        let paused_on_conflict = matches!(
            &pipeline,
            Ok(result) if matches!(
                result.conflict_info.as_ref().map(|c| c.conflict_type),
                Some(ConflictType::RebaseConflict)
            )
        );
        let implicit_pull = matches!(&pipeline, Ok(result) if result.implicit_pull.is_some());

        let (cleanup_error, reindexed) =
            self.push_cleanup(&source, temp.as_ref(), stash, paused_on_conflict, implicit_pull);

        let mut result = match pipeline {
            Ok(result) => result,
            Err(err) => {
                let mut result = PushResult::empty(source.as_str());
                result.error = Some(err.to_string());
                result
            },
        };
        if let Some(cleanup) = cleanup_error {
            result.error = Some(match result.error.take() {
                Some(err) => format!("{}; cleanup: {}", err, cleanup),
                None => format!("cleanup: {}", cleanup),
            });
        }
        if let Some(implicit) = result.implicit_pull.as_mut() {
            implicit.reindexed = reindexed;
        }
        Ok(result)
    }

    /// Steps run on (or en route to) the state branch. Any `Err` is folded
    /// into the result by the caller once cleanup has run.
    fn push_publish(
        &self,
        actor_id: &str,
        options: &PushOptions,
        source: &str,
        temp: Option<&TempDir>,
        stash: &mut Option<String>,
    ) -> Result<PushResult, Error> {
        if self.git.is_dirty()? {
            *stash = self.git.stash(STASH_LABEL)?;
        }
        let files_before = self.state_files(&self.state_branch)?;
        self.git.checkout_branch(&self.state_branch)?;

        let first_push = files_before.is_empty();
        let delta = if first_push {
            Vec::new()
        } else {
            self.calculate_state_delta_impl(source)?
        };

        let mut result = PushResult::empty(source);
        if !first_push && delta.is_empty() {
            result.success = true;
            return Ok(result);
        }

        // Bring the syncable set into the state worktree: from the scratch
        // copy when the working tree had one, otherwise straight out of the
        // source branch.
        let gitgov = self.gitgov_dir();
        let local_set: BTreeSet<String> = match temp {
            Some(temp) => {
                let mut set = BTreeSet::new();
                for rel in session::list_files(temp.path())? {
                    if !paths::should_sync(&rel) {
                        continue;
                    }
                    let target = gitgov.join(&rel);
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::copy(temp.path().join(&rel), target)?;
                    set.insert(
                        Path::new(GITGOV_DIR)
                            .join(&rel)
                            .to_string_lossy()
                            .into_owned(),
                    );
                }
                set
            },
            None => {
                let files = self.state_files(source)?;
                if !files.is_empty() {
                    let refs: Vec<&str> = files.iter().map(String::as_str).collect();
                    self.git.checkout_files_from_branch(source, &refs)?;
                }
                files.into_iter().collect()
            },
        };

        // No local records at all means there is nothing to publish; it
        // does not mean the state branch should be emptied.
        if !gitgov.exists() || (temp.is_none() && local_set.is_empty()) {
            result.success = true;
            return Ok(result);
        }
        self.git.add(&[GITGOV_DIR], true)?;

        // Staging hygiene: anything force-added that must not live on the
        // state branch is removed again (legacy files, keys, backups). The
        // branch's own `.gitignore` is infrastructure, not a stray.
        let staged = self.git.staged_files()?;
        let strays: Vec<&str> = staged
            .iter()
            .filter(|f| {
                f.starts_with(GITGOV_DIR)
                    && !f.ends_with(".gitignore")
                    && !paths::should_sync(Path::new(f))
            })
            .map(String::as_str)
            .collect();
        if !strays.is_empty() {
            tracing::debug!(count = strays.len(), "removing non-syncable staged files");
            self.git.remove_force(&strays)?;
        }

        // Deletion propagation: whatever the state branch had that the
        // local set no longer does is removed.
        let deletions: Vec<&str> = files_before
            .iter()
            .filter(|f| !local_set.contains(*f))
            .map(String::as_str)
            .collect();
        if !deletions.is_empty() {
            self.git.remove_force(&deletions)?;
        }

        if self.git.staged_files()?.is_empty() {
            result.success = true;
            return Ok(result);
        }
        // What the sync commit will actually contain.
        let changes: Vec<FileChange> = self
            .git
            .staged_changes()?
            .into_iter()
            .filter(|change| paths::should_sync(Path::new(&change.file)))
            .collect();

        let commit_message =
            message::sync_commit_message(first_push, source, actor_id, Utc::now(), &changes);

        if options.dry_run {
            result.success = true;
            result.files_synced = changes.len();
            result.commit_message = Some(commit_message);
            return Ok(result);
        }

        self.git.commit(&commit_message)?;

        // Reconcile: rebase our sync commit atop the remote tip before
        // publishing, so state history stays linear.
        let hash_before_pull = self.git.head()?;
        let mut implicit = None;
        match self.git.pull_rebase(REMOTE, &self.state_branch) {
            Ok(()) => {
                let head = self.git.head()?;
                if head != hash_before_pull {
                    let files_updated = self
                        .git
                        .changed_files(&hash_before_pull, &head, Some(GITGOV_DIR))?
                        .into_iter()
                        .filter(|c| paths::should_sync(Path::new(&c.file)))
                        .count();
                    tracing::debug!(files_updated, "picked up remote changes during push");
                    implicit = Some(ImplicitPull {
                        has_changes: true,
                        files_updated,
                        reindexed: false,
                    });
                }
            },
            Err(err) => {
                let conflicted = self.git.conflicted_files()?;
                if self.git.is_rebase_in_progress()? || !conflicted.is_empty() {
                    // Leave the rebase paused for `resolve`; make sure key
                    // material is present on this worktree for re-signing.
                    if let Some(temp) = temp {
                        session::overlay_preserved(temp.path(), &gitgov)?;
                    }
                    result.conflict_detected = true;
                    result.conflict_info = Some(rebase_conflict(conflicted));
                    result.files_synced = changes.len();
                    result.commit_message = Some(commit_message);
                    return Ok(result);
                } else if err.is_benign_pull_failure() {
                    tracing::debug!(%err, "nothing to reconcile");
                } else {
                    return Err(err.into());
                }
            },
        }

        match self.git.push(REMOTE, &self.state_branch) {
            Ok(()) => {},
            Err(err) if err.is_missing_remote() => {
                tracing::warn!(%err, "remote unreachable; sync commit stays local");
            },
            Err(err) => return Err(err.into()),
        }

        result.success = true;
        result.files_synced = changes.len();
        result.commit_hash = Some(self.git.head()?);
        result.commit_message = Some(commit_message);
        result.implicit_pull = implicit;
        Ok(result)
    }

    /// Restore the working tree on the way out of a push. Failures are
    /// reported, never thrown: the result they are appended to is already
    /// on its way to the caller.
    fn push_cleanup(
        &self,
        source: &str,
        temp: Option<&TempDir>,
        stash: Option<String>,
        paused_on_conflict: bool,
        implicit_pull: bool,
    ) -> (Option<String>, bool) {
        // A paused rebase must survive: `resolve` picks it up from here.
        if paused_on_conflict {
            return (None, false);
        }

        let mut errors = Vec::new();
        let mut reindexed = false;

        if let Err(err) = self.checkout_back(source) {
            errors.push(format!("restore branch {}: {}", source, err));
        }
        if stash.is_some() {
            if let Err(err) = self.git.stash_pop() {
                errors.push(format!("stash pop: {}", err));
            }
        }

        if let Some(temp) = temp {
            let gitgov = self.gitgov_dir();
            if implicit_pull {
                // Lift the freshly pulled records into the working tree,
                // then lay the machine-local files over them.
                if let Err(err) = self
                    .git
                    .checkout_files_from_branch(&self.state_branch, &[GITGOV_DIR])
                {
                    errors.push(format!("restore pulled records: {}", err));
                }
                if let Err(err) = session::overlay_preserved(temp.path(), &gitgov) {
                    errors.push(format!("restore local files: {}", err));
                }
            } else if let Err(err) = session::overlay_all(temp.path(), &gitgov) {
                errors.push(format!("restore {}: {}", GITGOV_DIR, err));
            }
            // Nothing from the restore may linger in the index.
            if let Err(err) = self.git.unstage(&[GITGOV_DIR]) {
                errors.push(format!("unstage: {}", err));
            }
        }

        if implicit_pull {
            reindexed = self.run_projector();
        }

        let error = if errors.is_empty() {
            None
        } else {
            Some(errors.join("; "))
        };
        (error, reindexed)
    }
}

fn rebase_conflict(affected_files: Vec<String>) -> ConflictInfo {
    ConflictInfo {
        conflict_type: ConflictType::RebaseConflict,
        message: "remote and local changes touch the same records; the rebase is paused"
            .to_string(),
        affected_files,
        resolution_steps: vec![
            "edit the conflicted files and remove the conflict markers".to_string(),
            "stage them with `git add <file>`".to_string(),
            "run `gitgov resolve --reason \"<why>\"` to sign and publish the resolution"
                .to_string(),
        ],
    }
}

fn integrity_conflict(source: &str, audit: &AuditReport) -> PushResult {
    let mut affected: Vec<String> = audit
        .lint_report
        .iter()
        .flat_map(|report| report.errors.iter().map(|issue| issue.file.clone()))
        .collect();
    affected.extend(
        audit
            .integrity_violations
            .iter()
            .map(|v| v.rebase_commit_hash.clone()),
    );

    let mut detail: Vec<String> = audit
        .lint_report
        .iter()
        .flat_map(|report| {
            report
                .errors
                .iter()
                .map(|issue| format!("{}: {} ({})", issue.file, issue.message, issue.validator))
        })
        .collect();
    detail.push("run `gitgov lint --fix` and push again".to_string());

    let mut result = PushResult::empty(source);
    result.conflict_detected = true;
    result.conflict_info = Some(ConflictInfo {
        conflict_type: ConflictType::IntegrityViolation,
        message: audit.summary.clone(),
        affected_files: affected,
        resolution_steps: detail,
    });
    result
}
