// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

//! Resolve: finish a paused rebase by re-signing the edited records and
//! publishing a signed resolution commit.

use std::{fs, path::Path};

use chrono::Utc;

use gov_records::{EmbeddedRecord, ROLE_RESOLVER};

use crate::{
    config::REMOTE,
    git::GitAdapter,
    paths::{self, GITGOV_DIR},
    sync::{
        message,
        session::{self, STASH_LABEL},
        Error, ResolveResult,
    },
};

use super::LocalGitBackend;

const CONFLICT_MARKERS: [&str; 3] = ["<<<<<<<", "=======", ">>>>>>>"];

impl<G: GitAdapter> LocalGitBackend<G> {
    pub(super) fn resolve_impl(
        &self,
        actor_id: &str,
        reason: &str,
    ) -> Result<ResolveResult, Error> {
        if !self.git.is_rebase_in_progress()? {
            return Err(Error::NoRebaseInProgress);
        }
        let authenticated = self.identity.actor_id().to_string();
        if authenticated != actor_id {
            return Err(Error::ActorIdentityMismatch {
                authenticated,
                requested: actor_id.to_string(),
            });
        }

        let staged = self.git.staged_files()?;
        let resolved_records: Vec<String> = staged
            .into_iter()
            .filter(|f| f.starts_with(GITGOV_DIR) && f.ends_with(".json"))
            .collect();

        // Half-resolved files must go back to the editor, not into history.
        let mut markered = Vec::new();
        for file in &resolved_records {
            if let Ok(content) = fs::read_to_string(self.repo_root.join(file)) {
                if CONFLICT_MARKERS.iter().any(|m| content.contains(m)) {
                    markered.push(file.clone());
                }
            }
        }
        if !markered.is_empty() {
            return Err(Error::ConflictMarkersPresent { files: markered });
        }

        let pipeline = self.resolve_finalize(actor_id, reason, resolved_records);
        match pipeline {
            Ok(result) => Ok(result),
            Err(err) => Ok(ResolveResult {
                success: false,
                conflicts_resolved: 0,
                resolution_commit: None,
                pushed: false,
                reindexed: false,
                conflict_info: None,
                error: Some(err.to_string()),
            }),
        }
    }

    fn resolve_finalize(
        &self,
        actor_id: &str,
        reason: &str,
        resolved_records: Vec<String>,
    ) -> Result<ResolveResult, Error> {
        self.git.rebase_continue()?;
        let rebase_commit = self.git.head()?;

        // The staged set is the usual source of truth; when the continue
        // consumed it, fall back to what the rebase commit actually touched.
        let records: Vec<String> = if resolved_records.is_empty() {
            self.git
                .changed_files(&format!("{}~1", rebase_commit), &rebase_commit, Some(GITGOV_DIR))?
                .into_iter()
                .map(|change| change.file)
                .filter(|f| f.ends_with(".json"))
                .collect()
        } else {
            resolved_records
        };

        let mut resigned = 0;
        for file in &records {
            let path = self.repo_root.join(file);
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(_) => continue,
            };
            // Only valid envelopes are re-signed; legacy files, `.gitkeep`
            // and malformed JSON pass through untouched.
            let mut record: EmbeddedRecord = match serde_json::from_slice(&bytes) {
                Ok(record) => record,
                Err(err) => {
                    tracing::debug!(%file, %err, "not a record envelope; skipping re-sign");
                    continue;
                },
            };
            self.identity.sign_record(
                &mut record,
                ROLE_RESOLVER,
                &format!("Conflict resolved: {}", reason),
            )?;
            fs::write(&path, serde_json::to_vec_pretty(&record)?)?;
            resigned += 1;
        }

        self.git.add(&[GITGOV_DIR], true)?;
        // The force-add sweeps up whatever sits on this worktree, including
        // the key material carried over for re-signing; none of that may
        // enter the resolution commit. Unstage rather than remove: the
        // files themselves must survive for the trip home.
        let strays: Vec<String> = self
            .git
            .staged_files()?
            .into_iter()
            .filter(|f| {
                f.starts_with(GITGOV_DIR)
                    && !f.ends_with(".gitignore")
                    && !paths::should_sync(Path::new(f))
            })
            .collect();
        if !strays.is_empty() {
            let refs: Vec<&str> = strays.iter().map(String::as_str).collect();
            self.git.unstage(&refs)?;
        }

        let resolution_commit = if self.git.staged_files()?.is_empty() {
            rebase_commit
        } else {
            self.git.commit(&message::resolution_commit_message(
                actor_id,
                reason,
                Utc::now(),
                resigned,
            ))?
        };

        let pushed = match self.git.push(REMOTE, &self.state_branch) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%err, "resolution commit stays local");
                false
            },
        };

        // Return to the work branch the sync session left, carrying the
        // resolved record set and the machine-local files with us.
        let temp = session::preserve_gitgov(&self.repo_root)?;
        if let Some(work_branch) = self.git.previous_branch()? {
            self.checkout_back(&work_branch)?;

            // The sync session that paused here may have stashed the work
            // branch; release that lock first. The worktree copy of
            // `.gitgov/` must be out of the way or popping its stashed
            // untracked files fails; the scratch copy wins afterwards.
            let ours = self
                .git
                .stash_list()?
                .first()
                .map(|entry| entry.contains(STASH_LABEL))
                .unwrap_or(false);
            if ours {
                let gitgov = self.gitgov_dir();
                if gitgov.exists() {
                    fs::remove_dir_all(&gitgov)?;
                }
                if let Err(err) = self.git.stash_pop() {
                    tracing::warn!(%err, "could not pop the session stash");
                }
            }

            if let Some(temp) = &temp {
                session::overlay_all(temp.path(), &self.gitgov_dir())?;
            }
            self.git.unstage(&[GITGOV_DIR])?;
        } else {
            tracing::warn!("no previous branch recorded; staying on the state branch");
        }

        let reindexed = self.run_projector();

        Ok(ResolveResult {
            success: true,
            conflicts_resolved: resigned,
            resolution_commit: Some(resolution_commit),
            pushed,
            reindexed,
            conflict_info: None,
            error: None,
        })
    }
}
