// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

//! The commit message grammar of the state branch.
//!
//! Audit classifies history by the `sync:` / `resolution:` / `rebase` /
//! `pick ` lexemes in subject lines, so the builders and the predicates
//! live together: a change to one is a change to both, and a migration.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::git::FileChange;

pub const SYNC_PREFIX: &str = "sync:";
pub const RESOLUTION_PREFIX: &str = "resolution:";

/// The commit message `push` publishes.
pub fn sync_commit_message(
    initial: bool,
    source_branch: &str,
    actor_id: &str,
    timestamp: DateTime<Utc>,
    files: &[FileChange],
) -> String {
    let mut msg = format!(
        "{} {} from {}\nActor: {}\nTimestamp: {}\nFiles: {} file(s) {}\n",
        SYNC_PREFIX,
        if initial { "Initial state" } else { "Publish state" },
        source_branch,
        actor_id,
        timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        files.len(),
        if initial { "synced (initial)" } else { "changed" },
    );
    if !files.is_empty() {
        msg.push('\n');
        for change in files {
            msg.push_str(&format!("{} {}\n", change.status.as_letter(), change.file));
        }
    }
    msg
}

/// The commit message `resolve` publishes after a completed rebase.
pub fn resolution_commit_message(
    actor_id: &str,
    reason: &str,
    timestamp: DateTime<Utc>,
    files: usize,
) -> String {
    format!(
        "{} conflict resolved by {}\nActor: {}\nTimestamp: {}\nReason: {}\nFiles: {} file(s)\nSigned-off-by: {}\n",
        RESOLUTION_PREFIX,
        actor_id,
        actor_id,
        timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        reason,
        files,
        actor_id,
    )
}

pub fn is_sync_commit(subject: &str) -> bool {
    subject.trim_start().starts_with(SYNC_PREFIX)
}

pub fn is_resolution_commit(subject: &str) -> bool {
    subject.trim_start().starts_with(RESOLUTION_PREFIX)
}

/// A commit created by git's rebase machinery rather than by the engine.
///
/// Sync and resolution commits mention neither lexeme in their subjects, but
/// the guard keeps the classes disjoint even for hand-written messages.
pub fn is_rebase_commit(subject: &str) -> bool {
    let s = subject.trim_start();
    if is_sync_commit(s) || is_resolution_commit(s) {
        return false;
    }
    s.to_lowercase().contains("rebase") || s.starts_with("pick ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::ChangeStatus;
    use chrono::TimeZone;

    #[test]
    fn sync_message_shape() {
        let files = vec![
            FileChange {
                status: ChangeStatus::Added,
                file: ".gitgov/tasks/t1.json".to_string(),
            },
            FileChange {
                status: ChangeStatus::Deleted,
                file: ".gitgov/tasks/t2.json".to_string(),
            },
        ];
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let msg = sync_commit_message(false, "main", "human:ada", ts, &files);

        assert!(msg.starts_with("sync: Publish state from main\n"));
        assert!(msg.contains("Actor: human:ada\n"));
        assert!(msg.contains("Files: 2 file(s) changed\n"));
        assert!(msg.contains("\nA .gitgov/tasks/t1.json\n"));
        assert!(msg.contains("\nD .gitgov/tasks/t2.json\n"));
        assert!(is_sync_commit(&msg));
        assert!(!is_rebase_commit(&msg));
    }

    #[test]
    fn initial_sync_message() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let msg = sync_commit_message(true, "main", "human:ada", ts, &[]);
        assert!(msg.starts_with("sync: Initial state from main\n"));
        assert!(msg.contains("synced (initial)"));
    }

    #[test]
    fn resolution_message_shape() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let msg = resolution_commit_message("human:bob", "picked critical", ts, 1);
        assert!(msg.starts_with("resolution: conflict resolved by human:bob\n"));
        assert!(msg.contains("Reason: picked critical\n"));
        assert!(msg.contains("Signed-off-by: human:bob\n"));
        assert!(is_resolution_commit(&msg));
        assert!(!is_rebase_commit(&msg));
    }

    #[test]
    fn rebase_commit_classification() {
        assert!(is_rebase_commit("Rebase branch onto origin"));
        assert!(is_rebase_commit("pick 1a2b3c4 touch task"));
        assert!(!is_rebase_commit("sync: Publish state from main"));
        assert!(!is_rebase_commit("resolution: conflict resolved by x"));
        assert!(!is_rebase_commit("ordinary commit"));
    }
}
