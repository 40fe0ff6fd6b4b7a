// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

//! Resolution-history integrity, shared by both backends.
//!
//! The protocol invariant: every commit produced by git's rebase machinery
//! on the state branch is immediately followed by a signed `resolution:`
//! commit. History is walked newest-first, up to [`MAX_AUDIT_COMMITS`].

use crate::git::CommitInfo;

use super::{message, AuditReport, AuditScope, IntegrityViolation};
use crate::collab::LintReport;

pub const MAX_AUDIT_COMMITS: usize = 1000;

pub(super) struct HistoryScan {
    pub total_commits: usize,
    pub rebase_commits: usize,
    pub resolution_commits: usize,
    pub violations: Vec<IntegrityViolation>,
}

/// Classify `commits` (newest first, as `git log` yields them) and collect
/// every rebase commit whose successor is not a resolution commit.
pub(super) fn scan_history(commits: &[CommitInfo]) -> HistoryScan {
    let mut rebase_commits = 0;
    let mut resolution_commits = 0;
    let mut violations = Vec::new();

    for (i, commit) in commits.iter().enumerate() {
        if message::is_resolution_commit(&commit.message) {
            resolution_commits += 1;
            continue;
        }
        if !message::is_rebase_commit(&commit.message) {
            continue;
        }
        rebase_commits += 1;

        // Newest-first: the commit that *follows* a rebase commit in time
        // is its predecessor in the log output.
        let followed_by_resolution = i
            .checked_sub(1)
            .map(|j| message::is_resolution_commit(&commits[j].message))
            .unwrap_or(false);

        if !followed_by_resolution {
            violations.push(IntegrityViolation {
                rebase_commit_hash: commit.hash.clone(),
                commit_message: commit.message.clone(),
                timestamp: commit.date.clone(),
                author: commit.author.clone(),
            });
        }
    }

    HistoryScan {
        total_commits: commits.len(),
        rebase_commits,
        resolution_commits,
        violations,
    }
}

pub(super) fn build_report(
    scope: AuditScope,
    scan: HistoryScan,
    lint_report: Option<LintReport>,
) -> AuditReport {
    let lint_errors = lint_report
        .as_ref()
        .map(|r| r.errors.len())
        .unwrap_or(0);
    let passed = scan.violations.is_empty() && lint_errors == 0;

    let summary = if passed {
        format!(
            "audit passed: {} commit(s), {} rebase, {} resolution",
            scan.total_commits, scan.rebase_commits, scan.resolution_commits
        )
    } else {
        format!(
            "audit failed: {} unresolved rebase commit(s), {} lint error(s)",
            scan.violations.len(),
            lint_errors
        )
    };

    AuditReport {
        passed,
        scope,
        total_commits: scan.total_commits,
        rebase_commits: scan.rebase_commits,
        resolution_commits: scan.resolution_commits,
        integrity_violations: scan.violations,
        lint_report,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(hash: &str, message: &str) -> CommitInfo {
        CommitInfo {
            hash: hash.to_string(),
            author: "ada".to_string(),
            date: "2023-11-14T22:13:20Z".to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn clean_history_passes() {
        // Newest first.
        let commits = vec![
            commit("c3", "sync: Publish state from main"),
            commit("c2", "resolution: conflict resolved by human:ada"),
            commit("c1", "pick 1a2b3c4 update task"),
            commit("c0", "sync: Initial state from main"),
        ];
        let scan = scan_history(&commits);
        assert_eq!(scan.rebase_commits, 1);
        assert_eq!(scan.resolution_commits, 1);
        assert!(scan.violations.is_empty());
    }

    #[test]
    fn unresolved_rebase_is_a_violation() {
        let commits = vec![
            commit("c2", "sync: Publish state from main"),
            commit("c1", "pick 1a2b3c4 update task"),
            commit("c0", "sync: Initial state from main"),
        ];
        let scan = scan_history(&commits);
        assert_eq!(scan.violations.len(), 1);
        assert_eq!(scan.violations[0].rebase_commit_hash, "c1");
    }

    #[test]
    fn rebase_at_tip_has_no_resolution_yet() {
        let commits = vec![commit("c1", "Rebase onto origin/gitgov-state")];
        let scan = scan_history(&commits);
        assert_eq!(scan.violations.len(), 1);
    }

    #[test]
    fn lint_errors_fail_the_report() {
        let scan = scan_history(&[]);
        let mut lint = LintReport::default();
        lint.errors.push(crate::collab::LintIssue {
            file: ".gitgov/tasks/t.json".to_string(),
            validator: "checksum".to_string(),
            message: "payload checksum mismatch".to_string(),
        });
        let report = build_report(AuditScope::Current, scan, Some(lint));
        assert!(!report.passed);
        assert!(report.summary.contains("1 lint error(s)"));
    }
}
