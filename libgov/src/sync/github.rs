// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

//! The remote-API backend: the sync contract over the GitHub REST git
//! endpoints, for projects worked on without a local clone.
//!
//! Concurrency is optimistic. The only lineage is the state ref SHA: a
//! lost `updateRef` race surfaces as a `rebase_conflict` and the caller
//! retries via `resolve` (pull, then push with the updated parent). There
//! is no rebase machinery here; the rebase-specific accessors report
//! empty/false.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::Utc;
use serde_json::{json, Value};
use sha1::{Digest, Sha1};

use crate::{
    collab::{Identity, LintReport, Linter, Projector},
    git::{ChangeStatus, CommitInfo, FileChange},
    paths::{self, GITGOV_DIR},
    sync::{audit, message},
};

use super::{
    AuditOptions, AuditReport, ConflictInfo, ConflictType, Error, PullOptions, PullResult,
    PushOptions, PushResult, ResolveResult, SyncBackend,
};

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "gitgov-sync";

#[derive(Clone, Debug)]
pub struct GithubOptions {
    pub owner: String,
    pub repo: String,
    pub token: String,
    /// Override for tests and GitHub Enterprise installations.
    pub api_base: Option<String>,
    pub state_branch: String,
    /// The branch the state branch is rooted from on first creation.
    pub default_branch: String,
    /// Where the local `.gitgov/` mirror lives.
    pub repo_root: PathBuf,
}

pub struct GithubBackend {
    client: reqwest::blocking::Client,
    options: GithubOptions,
    last_known_sha: Mutex<Option<String>>,
    identity: Box<dyn Identity>,
    projector: Box<dyn Projector>,
    linter: Box<dyn Linter>,
}

/// The SHA-1 git assigns a blob of `content`; used to diff local files
/// against remote tree entries without shipping the bytes.
fn git_blob_sha(content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("blob {}\0", content.len()).as_bytes());
    hasher.update(content);
    hex::encode(hasher.finalize())
}

impl GithubBackend {
    pub fn new(
        options: GithubOptions,
        identity: Box<dyn Identity>,
        projector: Box<dyn Projector>,
        linter: Box<dyn Linter>,
    ) -> Result<Self, Error> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            options,
            last_known_sha: Mutex::new(None),
            identity,
            projector,
            linter,
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.options.api_base.as_deref().unwrap_or(API_BASE),
            self.options.owner,
            self.options.repo,
            path
        )
    }

    fn request(
        &self,
        req: reqwest::blocking::RequestBuilder,
    ) -> Result<(u16, Value), Error> {
        let response = req
            .header("Authorization", format!("Bearer {}", self.options.token))
            .header("Accept", "application/vnd.github+json")
            .send()?;
        let status = response.status().as_u16();
        let body: Value = response.json().unwrap_or(Value::Null);
        Ok((status, body))
    }

    fn get(&self, path: &str) -> Result<(u16, Value), Error> {
        self.request(self.client.get(self.url(path)))
    }

    fn post(&self, path: &str, body: Value) -> Result<(u16, Value), Error> {
        self.request(self.client.post(self.url(path)).json(&body))
    }

    fn patch(&self, path: &str, body: Value) -> Result<(u16, Value), Error> {
        self.request(self.client.patch(self.url(path)).json(&body))
    }

    fn expect_ok(&self, (status, body): (u16, Value)) -> Result<Value, Error> {
        if (200..300).contains(&status) {
            Ok(body)
        } else {
            Err(Error::Api {
                status,
                message: body["message"]
                    .as_str()
                    .unwrap_or("unexpected response")
                    .to_string(),
            })
        }
    }

    /// The SHA of `refs/heads/<branch>`, or `None` on 404.
    fn get_ref(&self, branch: &str) -> Result<Option<String>, Error> {
        let (status, body) = self.get(&format!("git/ref/heads/{}", branch))?;
        if status == 404 {
            return Ok(None);
        }
        let body = self.expect_ok((status, body))?;
        Ok(body["object"]["sha"].as_str().map(|s| s.to_string()))
    }

    fn create_ref(&self, branch: &str, sha: &str) -> Result<(), Error> {
        let (status, body) = self.post(
            "git/refs",
            json!({ "ref": format!("refs/heads/{}", branch), "sha": sha }),
        )?;
        // 422 "already exists" keeps this idempotent under races.
        if status == 422 {
            return Ok(());
        }
        self.expect_ok((status, body)).map(drop)
    }

    /// Fast-forward the branch ref. `Ok(false)` is the optimistic-
    /// concurrency failure: someone advanced the ref underneath us.
    fn update_ref(&self, branch: &str, sha: &str) -> Result<bool, Error> {
        let (status, body) = self.patch(
            &format!("git/refs/heads/{}", branch),
            json!({ "sha": sha, "force": false }),
        )?;
        if status == 409 || status == 422 {
            return Ok(false);
        }
        self.expect_ok((status, body)).map(|_| true)
    }

    fn commit_tree_sha(&self, commit_sha: &str) -> Result<String, Error> {
        let body = self.expect_ok(self.get(&format!("git/commits/{}", commit_sha))?)?;
        body["tree"]["sha"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or(Error::Api {
                status: 200,
                message: "commit without a tree".to_string(),
            })
    }

    /// Recursive tree listing: syncable blob path → blob sha. State-branch
    /// layout strips the `.gitgov/` prefix, so entries are classified bare.
    fn state_tree(&self, commit_sha: &str) -> Result<BTreeMap<String, String>, Error> {
        let tree_sha = self.commit_tree_sha(commit_sha)?;
        let body =
            self.expect_ok(self.get(&format!("git/trees/{}?recursive=1", tree_sha))?)?;
        let mut out = BTreeMap::new();
        for entry in body["tree"].as_array().into_iter().flatten() {
            if entry["type"].as_str() != Some("blob") {
                continue;
            }
            if let (Some(path), Some(sha)) = (entry["path"].as_str(), entry["sha"].as_str()) {
                if paths::should_sync(Path::new(path)) {
                    out.insert(path.to_string(), sha.to_string());
                }
            }
        }
        Ok(out)
    }

    fn blob_content(&self, sha: &str) -> Result<Vec<u8>, Error> {
        let body = self.expect_ok(self.get(&format!("git/blobs/{}", sha))?)?;
        let content = body["content"].as_str().unwrap_or("");
        base64::decode(content.replace('\n', "")).map_err(|err| Error::Api {
            status: 200,
            message: format!("undecodable blob {}: {}", sha, err),
        })
    }

    fn list_commits(&self, branch: &str, max: usize) -> Result<Vec<CommitInfo>, Error> {
        let mut out = Vec::new();
        let mut page = 1;
        while out.len() < max {
            let (status, body) = self.get(&format!(
                "commits?sha={}&per_page=100&page={}",
                branch, page
            ))?;
            if status == 404 || status == 409 {
                // Missing branch or empty repository.
                break;
            }
            let body = self.expect_ok((status, body))?;
            let commits = match body.as_array() {
                Some(list) if !list.is_empty() => list.clone(),
                _ => break,
            };
            for commit in &commits {
                out.push(CommitInfo {
                    hash: commit["sha"].as_str().unwrap_or_default().to_string(),
                    author: commit["commit"]["author"]["name"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                    date: commit["commit"]["author"]["date"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                    message: commit["commit"]["message"]
                        .as_str()
                        .unwrap_or_default()
                        .lines()
                        .next()
                        .unwrap_or_default()
                        .to_string(),
                });
            }
            if commits.len() < 100 {
                break;
            }
            page += 1;
        }
        out.truncate(max);
        Ok(out)
    }

    /// Local syncable files, keyed by state-branch layout (no `.gitgov/`
    /// prefix).
    fn local_files(&self) -> Result<BTreeMap<String, Vec<u8>>, Error> {
        let gitgov = self.options.repo_root.join(GITGOV_DIR);
        let mut out = BTreeMap::new();
        if !gitgov.exists() {
            return Ok(out);
        }
        for rel in super::session::list_files(&gitgov)? {
            if paths::should_sync(&rel) {
                out.insert(
                    rel.to_string_lossy().replace('\\', "/"),
                    fs::read(gitgov.join(&rel))?,
                );
            }
        }
        Ok(out)
    }

    fn remember_sha(&self, sha: Option<String>) {
        *self.last_known_sha.lock().expect("sha lock poisoned") = sha;
    }

    fn recall_sha(&self) -> Option<String> {
        self.last_known_sha.lock().expect("sha lock poisoned").clone()
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
}

impl SyncBackend for GithubBackend {
    fn ensure_state_branch(&self) -> Result<(), Error> {
        if self.get_ref(&self.options.state_branch)?.is_some() {
            return Ok(());
        }
        let base = self
            .get_ref(&self.options.default_branch)?
            .ok_or_else(|| {
                Error::StateBranchSetup(format!(
                    "default branch {:?} not found",
                    self.options.default_branch
                ))
            })?;
        self.create_ref(&self.options.state_branch, &base)
            .map_err(|err| Error::StateBranchSetup(err.to_string()))
    }

    fn calculate_state_delta(&self, _source_branch: &str) -> Result<Vec<FileChange>, Error> {
        let current = match self.get_ref(&self.options.state_branch)? {
            Some(sha) => sha,
            None => return Ok(Vec::new()),
        };
        match self.recall_sha() {
            None => {
                // No lineage yet: the full tree is the delta.
                Ok(self
                    .state_tree(&current)?
                    .into_keys()
                    .map(|file| FileChange {
                        status: ChangeStatus::Added,
                        file,
                    })
                    .collect())
            },
            Some(base) if base == current => Ok(Vec::new()),
            Some(base) => {
                let body =
                    self.expect_ok(self.get(&format!("compare/{}...{}", base, current))?)?;
                Ok(body["files"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(|f| {
                        let file = f["filename"].as_str()?.to_string();
                        if !paths::should_sync(Path::new(&file)) {
                            return None;
                        }
                        let status = match f["status"].as_str()? {
                            "added" => ChangeStatus::Added,
                            "removed" => ChangeStatus::Deleted,
                            _ => ChangeStatus::Modified,
                        };
                        Some(FileChange { status, file })
                    })
                    .collect())
            },
        }
    }

    #[tracing::instrument(skip(self, options), fields(actor = %actor_id))]
    fn push(&self, actor_id: &str, options: PushOptions) -> Result<PushResult, Error> {
        let authenticated = self.identity.actor_id().to_string();
        if authenticated != actor_id {
            return Err(Error::ActorIdentityMismatch {
                authenticated,
                requested: actor_id.to_string(),
            });
        }
        let source = options
            .source_branch
            .clone()
            .unwrap_or_else(|| self.options.default_branch.clone());

        self.ensure_state_branch()?;
        let current_sha = self
            .get_ref(&self.options.state_branch)?
            .ok_or_else(|| Error::StateBranchSetup("state ref vanished".to_string()))?;

        let remote = self.state_tree(&current_sha)?;
        let local = self.local_files()?;
        let first_push = remote.is_empty();

        let mut entries = Vec::new();
        let mut changes = Vec::new();
        for (path, bytes) in &local {
            let blob_sha = git_blob_sha(bytes);
            match remote.get(path) {
                Some(existing) if existing == &blob_sha => continue,
                existing => {
                    changes.push(FileChange {
                        status: if existing.is_some() {
                            ChangeStatus::Modified
                        } else {
                            ChangeStatus::Added
                        },
                        file: path.clone(),
                    });
                    entries.push(json!({
                        "path": path,
                        "mode": "100644",
                        "type": "blob",
                        "content": String::from_utf8_lossy(bytes),
                    }));
                },
            }
        }
        for path in remote.keys() {
            if !local.contains_key(path) {
                changes.push(FileChange {
                    status: ChangeStatus::Deleted,
                    file: path.clone(),
                });
                entries.push(json!({
                    "path": path,
                    "mode": "100644",
                    "type": "blob",
                    "sha": Value::Null,
                }));
            }
        }

        let mut result = PushResult::empty(source.as_str());
        if entries.is_empty() {
            self.remember_sha(Some(current_sha));
            result.success = true;
            return Ok(result);
        }

        let commit_message =
            message::sync_commit_message(first_push, &source, actor_id, Utc::now(), &changes);
        if options.dry_run {
            result.success = true;
            result.files_synced = changes.len();
            result.commit_message = Some(commit_message);
            return Ok(result);
        }

        let base_tree = self.commit_tree_sha(&current_sha)?;
        let tree = self.expect_ok(self.post(
            "git/trees",
            json!({ "base_tree": base_tree, "tree": entries }),
        )?)?;
        let tree_sha = tree["sha"].as_str().unwrap_or_default().to_string();

        let commit = self.expect_ok(self.post(
            "git/commits",
            json!({
                "message": commit_message,
                "tree": tree_sha,
                "parents": [current_sha],
            }),
        )?)?;
        let commit_sha = commit["sha"].as_str().unwrap_or_default().to_string();

        if !self.update_ref(&self.options.state_branch, &commit_sha)? {
            // Someone advanced the ref while we built the commit.
            result.conflict_detected = true;
            result.conflict_info = Some(ConflictInfo {
                conflict_type: ConflictType::RebaseConflict,
                message: "the state branch advanced while publishing".to_string(),
                affected_files: changes.iter().map(|c| c.file.clone()).collect(),
                resolution_steps: vec![
                    "run `gitgov pull` to pick up the new state".to_string(),
                    "push again, or run `gitgov resolve` to retry automatically".to_string(),
                ],
            });
            return Ok(result);
        }

        self.remember_sha(Some(commit_sha.clone()));
        result.success = true;
        result.files_synced = changes.len();
        result.commit_hash = Some(commit_sha);
        result.commit_message = Some(commit_message);
        Ok(result)
    }

    #[tracing::instrument(skip(self, options))]
    fn pull(&self, options: PullOptions) -> Result<PullResult, Error> {
        let mut result = PullResult::empty();
        let sha = match self.get_ref(&self.options.state_branch)? {
            Some(sha) => sha,
            None => {
                result.error = Some(
                    "no state branch exists yet; publish local records first with `gitgov push`"
                        .to_string(),
                );
                return Ok(result);
            },
        };

        // Single-SHA memoization: nothing moved, nothing to fetch.
        if self.recall_sha().as_deref() == Some(sha.as_str()) && !options.force_reindex {
            result.success = true;
            return Ok(result);
        }

        let tree = self.state_tree(&sha)?;
        let gitgov = self.options.repo_root.join(GITGOV_DIR);
        let local = self.local_files()?;

        let mut files_updated = 0;
        for (path, blob_sha) in &tree {
            let existing = local.get(path);
            if existing.map(|bytes| git_blob_sha(bytes)).as_deref() == Some(blob_sha.as_str()) {
                continue;
            }
            let content = self.blob_content(blob_sha)?;
            let target = gitgov.join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(target, content)?;
            files_updated += 1;
        }
        for path in local.keys() {
            if !tree.contains_key(path) {
                let target = gitgov.join(path);
                if target.exists() {
                    fs::remove_file(target)?;
                }
                files_updated += 1;
            }
        }

        let has_changes = files_updated > 0;
        self.remember_sha(Some(sha));

        let need_reindex =
            has_changes || options.force_reindex || !gitgov.join("index.json").exists();
        result.success = true;
        result.has_changes = has_changes;
        result.files_updated = files_updated;
        result.reindexed = need_reindex && self.run_projector();
        Ok(result)
    }

    /// Pull-then-retry-push. A second lost race means both sides are
    /// editing the same records at the same time; that needs a human.
    #[tracing::instrument(skip(self), fields(actor = %actor_id))]
    fn resolve(&self, actor_id: &str, _reason: &str) -> Result<ResolveResult, Error> {
        let authenticated = self.identity.actor_id().to_string();
        if authenticated != actor_id {
            return Err(Error::ActorIdentityMismatch {
                authenticated,
                requested: actor_id.to_string(),
            });
        }

        self.pull(PullOptions::default())?;
        let push = self.push(actor_id, PushOptions::default())?;

        if push.conflict_detected {
            return Ok(ResolveResult {
                success: false,
                conflicts_resolved: 0,
                resolution_commit: None,
                pushed: false,
                reindexed: false,
                conflict_info: Some(ConflictInfo {
                    conflict_type: ConflictType::ContentConflict,
                    message: "the state branch keeps advancing; concurrent writers detected"
                        .to_string(),
                    affected_files: push
                        .conflict_info
                        .map(|c| c.affected_files)
                        .unwrap_or_default(),
                    resolution_steps: vec![
                        "coordinate with the other writer".to_string(),
                        "pull, reconcile the records manually, then push".to_string(),
                    ],
                }),
                error: Some("content conflict: retry push lost the race again".to_string()),
            });
        }

        Ok(ResolveResult {
            success: push.success,
            conflicts_resolved: push.files_synced,
            resolution_commit: push.commit_hash,
            pushed: push.success,
            reindexed: false,
            conflict_info: None,
            error: push.error,
        })
    }

    fn audit(&self, options: AuditOptions) -> Result<AuditReport, Error> {
        let commits =
            self.list_commits(&self.options.state_branch, audit::MAX_AUDIT_COMMITS)?;
        let scan = audit::scan_history(&commits);

        // Per-blob lint: the remote tree is the record set here, not a
        // working tree a full lint run could walk.
        let lint = match self.get_ref(&self.options.state_branch)? {
            Some(sha) => {
                let mut report = LintReport::default();
                for (path, blob_sha) in self.state_tree(&sha)? {
                    let content = self.blob_content(&blob_sha)?;
                    report.errors.extend(self.linter.lint_record(&path, &content));
                }
                Some(report)
            },
            None => None,
        };

        Ok(audit::build_report(options.scope, scan, lint))
    }

    fn is_rebase_in_progress(&self) -> Result<bool, Error> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_sha_matches_git() {
        // `echo -n 'hello' | git hash-object --stdin`
        assert_eq!(
            git_blob_sha(b"hello"),
            "b6fc4c620b67d95f953a5c1c1230aaab5db5a1b0"
        );
    }

    #[test]
    fn empty_blob_sha() {
        // `git hash-object --stdin < /dev/null`
        assert_eq!(
            git_blob_sha(b""),
            "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"
        );
    }
}
