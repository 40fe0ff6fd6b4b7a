// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

//! The state synchronization engine.
//!
//! One backend contract, two implementations: [`local::LocalGitBackend`]
//! drives a working clone through the git CLI with rebase-native conflict
//! handling, [`github::GithubBackend`] drives the GitHub REST API with
//! optimistic ref updates. Pre-flight failures are returned as [`Error`];
//! failures after the pipeline has begun mutating state are folded into the
//! result structs once cleanup has run.

use serde::Serialize;
use thiserror::Error;

use crate::{collab::LintReport, git};

pub mod audit;
pub mod github;
pub mod local;
pub mod message;
pub mod session;

pub use github::GithubBackend;
pub use local::LocalGitBackend;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(
        "cannot push from the state branch {0:?}; switch to a working branch first"
    )]
    PushFromStateBranch(String),

    #[error("authenticated actor is {authenticated:?}, refusing to act as {requested:?}")]
    ActorIdentityMismatch {
        authenticated: String,
        requested: String,
    },

    #[error("no remote configured; add one with `git remote add origin <url>`")]
    NoRemoteConfigured,

    #[error("branch {0:?} has no commits; create an initial commit first")]
    NoCommitsOnBranch(String),

    #[error("uncommitted changes on the state branch")]
    UncommittedChanges,

    #[error("conflict markers still present in: {}", files.join(", "))]
    ConflictMarkersPresent { files: Vec<String> },

    #[error("no rebase in progress; nothing to resolve")]
    NoRebaseInProgress,

    #[error("state branch setup failed: {0}")]
    StateBranchSetup(String),

    #[error("collaborator failure: {0}")]
    Collaborator(String),

    #[error("GitHub API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Git(#[from] git::Error),

    #[error(transparent)]
    Config(#[from] crate::config::Error),

    #[error(transparent)]
    Identity(#[from] crate::collab::identity::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Machine-readable conflict kinds, stable across backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Git-native divergence; finish with `resolve`.
    RebaseConflict,
    /// Pull would overwrite local edits; push first or force.
    LocalChangesConflict,
    /// The audit found violated invariants; fix records before syncing.
    IntegrityViolation,
    /// Remote-API backend lost the optimistic race twice; manual merge.
    ContentConflict,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    pub message: String,
    pub affected_files: Vec<String>,
    /// The exact next commands, in order.
    pub resolution_steps: Vec<String>,
}

/// Remote changes picked up by the rebase during a push.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplicitPull {
    pub has_changes: bool,
    pub files_updated: usize,
    pub reindexed: bool,
}

#[derive(Clone, Debug, Default)]
pub struct PushOptions {
    /// Defaults to the current branch.
    pub source_branch: Option<String>,
    /// Compute and report, but do not commit, push or mutate.
    pub dry_run: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResult {
    pub success: bool,
    pub files_synced: usize,
    pub source_branch: String,
    pub commit_hash: Option<String>,
    pub commit_message: Option<String>,
    pub conflict_detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_info: Option<ConflictInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implicit_pull: Option<ImplicitPull>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PushResult {
    pub(crate) fn empty(source_branch: impl Into<String>) -> Self {
        Self {
            success: false,
            files_synced: 0,
            source_branch: source_branch.into(),
            commit_hash: None,
            commit_message: None,
            conflict_detected: false,
            conflict_info: None,
            implicit_pull: None,
            error: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PullOptions {
    /// Overwrite local edits that collide with remote changes.
    pub force: bool,
    /// Rebuild the index even when nothing changed.
    pub force_reindex: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResult {
    pub success: bool,
    pub has_changes: bool,
    pub files_updated: usize,
    pub reindexed: bool,
    pub conflict_detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_info: Option<ConflictInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub forced_overwrites: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PullResult {
    pub(crate) fn empty() -> Self {
        Self {
            success: false,
            has_changes: false,
            files_updated: 0,
            reindexed: false,
            conflict_detected: false,
            conflict_info: None,
            forced_overwrites: Vec::new(),
            error: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResult {
    pub success: bool,
    /// Records re-signed as part of the resolution.
    pub conflicts_resolved: usize,
    pub resolution_commit: Option<String>,
    pub pushed: bool,
    pub reindexed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_info: Option<ConflictInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditScope {
    Current,
    StateBranch,
    All,
}

impl Default for AuditScope {
    fn default() -> Self {
        Self::Current
    }
}

#[derive(Clone, Debug)]
pub struct AuditOptions {
    pub scope: AuditScope,
    pub verify_signatures: bool,
    pub verify_checksums: bool,
    /// Forwarded to the linter; the engine does not act on it.
    pub verify_expected_files: bool,
    pub expected_files_scope: Option<String>,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            scope: AuditScope::default(),
            verify_signatures: true,
            verify_checksums: true,
            verify_expected_files: false,
            expected_files_scope: None,
        }
    }
}

/// A rebase commit published without its mandatory resolution commit.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityViolation {
    pub rebase_commit_hash: String,
    pub commit_message: String,
    pub timestamp: String,
    pub author: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub passed: bool,
    pub scope: AuditScope,
    pub total_commits: usize,
    pub rebase_commits: usize,
    pub resolution_commits: usize,
    pub integrity_violations: Vec<IntegrityViolation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lint_report: Option<LintReport>,
    pub summary: String,
}

/// The backend contract: one reconciliation engine, two bindings.
pub trait SyncBackend {
    /// Idempotently create/track the state branch.
    fn ensure_state_branch(&self) -> Result<(), Error>;

    /// The `should_sync`-filtered A/M/D diff between the state branch and
    /// `source_branch`, scoped to `.gitgov/`.
    fn calculate_state_delta(&self, source_branch: &str) -> Result<Vec<git::FileChange>, Error>;

    fn push(&self, actor_id: &str, options: PushOptions) -> Result<PushResult, Error>;

    fn pull(&self, options: PullOptions) -> Result<PullResult, Error>;

    /// Finish a paused reconciliation: the operator edited and staged the
    /// conflicted files; the engine completes the rebase, re-signs the
    /// touched records, and publishes a resolution commit.
    fn resolve(&self, actor_id: &str, reason: &str) -> Result<ResolveResult, Error>;

    fn audit(&self, options: AuditOptions) -> Result<AuditReport, Error>;

    /// Whether a sync session is paused on a conflict. Meaningless for the
    /// remote-API backend, which reports `false`.
    fn is_rebase_in_progress(&self) -> Result<bool, Error>;
}
