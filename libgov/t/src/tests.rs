// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use assert_matches::assert_matches;
use tempfile::TempDir;

use gov_crypto::SecretKey;
use gov_records::{
    generate_id,
    payload::{RecordType, Task, TaskPriority, TaskStatus},
    EmbeddedRecord, RecordPayload, ROLE_AUTHOR, ROLE_RESOLVER,
};
use libgov::{
    collab::{FileIdentity, NoopProjector, PermissiveLinter},
    git::{GitAdapter, GitCli},
    sync::{ConflictType, Error, LocalGitBackend, PullOptions, PushOptions, SyncBackend},
};

const TS: i64 = 1_700_000_000;
const STATE: &str = "gitgov-state";

fn sh(dir: &Path, args: &[&str]) {
    let out = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .expect("git runs");
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
}

/// A bare repository standing in for the shared remote.
fn bare_remote() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    sh(dir.path(), &["init", "--bare", "."]);
    sh(dir.path(), &["symbolic-ref", "HEAD", "refs/heads/main"]);
    dir
}

/// One collaborator: a clone, an actor id, and that actor's signing key.
struct Machine {
    dir: TempDir,
    actor: String,
    seed: u8,
    key: SecretKey,
}

impl Machine {
    fn clone_from(remote: &Path, actor: &str, seed: u8) -> Self {
        let dir = tempfile::tempdir().unwrap();
        sh(dir.path(), &["clone", remote.to_str().unwrap(), "."]);
        sh(dir.path(), &["config", "user.name", actor]);
        sh(dir.path(), &["config", "user.email", "dev@gitgov.dev"]);

        let machine = Self {
            dir,
            actor: actor.to_string(),
            seed,
            key: SecretKey::from_seed([seed; 32]),
        };
        machine.write_key();
        machine
    }

    /// The first machine also seeds `main`, so every branch has a commit.
    fn founder(remote: &Path, actor: &str, seed: u8) -> Self {
        let machine = Self::clone_from(remote, actor, seed);
        fs::write(machine.root().join("README.md"), "# demo\n").unwrap();
        sh(machine.root(), &["add", "README.md"]);
        sh(machine.root(), &["commit", "-m", "initial commit"]);
        sh(machine.root(), &["push", "-u", "origin", "main"]);
        machine
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn git(&self) -> GitCli {
        GitCli::new(self.root())
    }

    fn backend(&self) -> LocalGitBackend {
        let identity = FileIdentity::load(self.root(), &self.actor).unwrap();
        LocalGitBackend::open(
            self.root(),
            Box::new(identity),
            Box::new(NoopProjector),
            Box::new(PermissiveLinter),
        )
        .unwrap()
    }

    fn push(&self) -> libgov::sync::PushResult {
        self.backend()
            .push(&self.actor, PushOptions::default())
            .unwrap()
    }

    fn pull(&self) -> libgov::sync::PullResult {
        self.backend().pull(PullOptions::default()).unwrap()
    }

    fn write_key(&self) {
        let actors = self.root().join(".gitgov/actors");
        fs::create_dir_all(&actors).unwrap();
        fs::write(
            actors.join(format!("{}.key", self.actor)),
            base64::encode([self.seed; 32]),
        )
        .unwrap();
    }

    fn key_path(&self) -> PathBuf {
        self.root()
            .join(".gitgov/actors")
            .join(format!("{}.key", self.actor))
    }

    fn task_path(&self, slug: &str) -> PathBuf {
        self.root()
            .join(".gitgov/tasks")
            .join(format!("{}.json", task_id(slug)))
    }

    /// Write a task record signed by this machine's actor.
    fn write_task(&self, slug: &str, title: &str, priority: TaskPriority) {
        let record = signed_task(&self.key, &self.actor, slug, title, priority);
        fs::create_dir_all(self.root().join(".gitgov/tasks")).unwrap();
        fs::write(
            self.task_path(slug),
            serde_json::to_vec_pretty(&record).unwrap(),
        )
        .unwrap();
    }

    fn read_task(&self, slug: &str) -> EmbeddedRecord {
        let bytes = fs::read(self.task_path(slug)).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}

fn task_id(slug: &str) -> String {
    generate_id(RecordType::Task, slug, TS).unwrap()
}

fn signed_task(
    key: &SecretKey,
    actor: &str,
    slug: &str,
    title: &str,
    priority: TaskPriority,
) -> EmbeddedRecord {
    let mut record = EmbeddedRecord::new(RecordPayload::Task(Task {
        id: task_id(slug),
        title: title.to_string(),
        status: TaskStatus::Active,
        priority,
        description: String::new(),
        tags: vec![],
        cycle_ids: None,
        references: None,
        notes: None,
        metadata: None,
    }))
    .unwrap();
    record
        .sign_at(key, actor, ROLE_AUTHOR, "initial", TS)
        .unwrap();
    record
}

fn state_record_path(slug: &str) -> String {
    format!(".gitgov/tasks/{}.json", task_id(slug))
}

mod state_branch {
    use super::*;

    #[test]
    fn ensure_is_idempotent_and_stays_on_the_original_branch() {
        let remote = bare_remote();
        let ada = Machine::founder(remote.path(), "human:ada", 1);
        let backend = ada.backend();

        for _ in 0..3 {
            backend.ensure_state_branch().unwrap();
        }

        let git = ada.git();
        assert_eq!(git.current_branch().unwrap(), "main");
        assert!(git.branch_exists(STATE).unwrap());
        assert!(git
            .list_remote_branches("origin")
            .unwrap()
            .contains(&STATE.to_string()));
        // Exactly one root commit carrying the .gitignore.
        let history = git.commit_history(STATE, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, "Initialize state branch with .gitignore");
    }

    #[test]
    fn ensure_requires_a_commit_on_the_current_branch() {
        let remote = bare_remote();
        let ada = Machine::clone_from(remote.path(), "human:ada", 1);
        assert_matches!(
            ada.backend().ensure_state_branch(),
            Err(Error::NoCommitsOnBranch(_))
        );
    }

    #[test]
    fn second_machine_tracks_the_remote_state_branch() {
        let remote = bare_remote();
        let ada = Machine::founder(remote.path(), "human:ada", 1);
        ada.write_task("t1", "First", TaskPriority::High);
        assert!(ada.push().success);

        let bob = Machine::clone_from(remote.path(), "human:bob", 2);
        bob.backend().ensure_state_branch().unwrap();
        let git = bob.git();
        assert!(git.branch_exists(STATE).unwrap());
        assert_eq!(git.current_branch().unwrap(), "main");
    }
}

mod push {
    use super::*;

    #[test]
    fn first_push_publishes_the_initial_state() {
        let remote = bare_remote();
        let ada = Machine::founder(remote.path(), "human:ada", 1);
        ada.write_task("t1", "First task", TaskPriority::High);

        let result = ada.push();
        assert!(result.success, "push failed: {:?}", result.error);
        assert_eq!(result.files_synced, 1);
        assert!(result
            .commit_message
            .as_deref()
            .unwrap()
            .starts_with("sync: Initial state from main"));
        assert!(result.commit_hash.is_some());

        let git = ada.git();
        let tree = git.ls_tree(STATE, ".gitgov").unwrap();
        assert!(tree.contains(&state_record_path("t1")));
        // Keys never reach the state branch.
        assert!(!tree.iter().any(|f| f.ends_with(".key")));

        // Session invariants: original branch, preserved local files, no
        // leftover stash.
        assert_eq!(git.current_branch().unwrap(), "main");
        assert!(ada.key_path().exists());
        assert!(ada.task_path("t1").exists());
        assert!(git.stash_list().unwrap().is_empty());
    }

    #[test]
    fn second_push_without_changes_is_a_noop() {
        let remote = bare_remote();
        let ada = Machine::founder(remote.path(), "human:ada", 1);
        ada.write_task("t1", "First task", TaskPriority::High);
        assert!(ada.push().success);

        let result = ada.push();
        assert!(result.success);
        assert_eq!(result.files_synced, 0);
        assert_eq!(result.commit_hash, None);
    }

    #[test]
    fn push_from_the_state_branch_is_refused() {
        let remote = bare_remote();
        let ada = Machine::founder(remote.path(), "human:ada", 1);
        ada.write_task("t1", "First task", TaskPriority::High);
        assert!(ada.push().success);

        let git = ada.git();
        git.checkout_branch_force(STATE).unwrap();
        let before = git.commit_history(STATE, 10).unwrap();

        assert_matches!(
            ada.backend().push(&ada.actor, PushOptions::default()),
            Err(Error::PushFromStateBranch(branch)) if branch == STATE
        );

        // No mutation happened.
        assert_eq!(git.commit_history(STATE, 10).unwrap(), before);
        git.checkout_branch_force("main").unwrap();
    }

    #[test]
    fn impersonation_is_refused() {
        let remote = bare_remote();
        let ada = Machine::founder(remote.path(), "human:ada", 1);
        ada.write_task("t1", "First task", TaskPriority::High);

        assert_matches!(
            ada.backend().push("human:mallory", PushOptions::default()),
            Err(Error::ActorIdentityMismatch { .. })
        );
    }

    #[test]
    fn dry_run_reports_without_committing() {
        let remote = bare_remote();
        let ada = Machine::founder(remote.path(), "human:ada", 1);
        ada.write_task("t1", "First task", TaskPriority::High);

        let result = ada
            .backend()
            .push(
                &ada.actor,
                PushOptions {
                    source_branch: None,
                    dry_run: true,
                },
            )
            .unwrap();
        assert!(result.success);
        assert_eq!(result.files_synced, 1);
        assert!(result.commit_hash.is_none());
        assert!(result.commit_message.is_some());

        // Nothing was published; a real push still has work to do.
        let git = ada.git();
        assert!(!git
            .ls_tree(STATE, ".gitgov")
            .unwrap()
            .contains(&state_record_path("t1")));
        let real = ada.push();
        assert!(real.success);
        assert_eq!(real.files_synced, 1);
    }

    #[test]
    fn deleting_a_record_locally_propagates_to_the_state_branch() {
        let remote = bare_remote();
        let ada = Machine::founder(remote.path(), "human:ada", 1);
        ada.write_task("t1", "Keep me", TaskPriority::High);
        ada.write_task("t2", "Delete me", TaskPriority::Low);
        assert!(ada.push().success);

        fs::remove_file(ada.task_path("t2")).unwrap();
        let result = ada.push();
        assert!(result.success, "push failed: {:?}", result.error);
        assert_eq!(result.files_synced, 1);

        let tree = ada.git().ls_tree(STATE, ".gitgov").unwrap();
        assert!(tree.contains(&state_record_path("t1")));
        assert!(!tree.contains(&state_record_path("t2")));
        assert!(ada.task_path("t1").exists());
    }

    #[test]
    fn unresolved_rebase_history_blocks_the_push() {
        let remote = bare_remote();
        let ada = Machine::founder(remote.path(), "human:ada", 1);
        ada.write_task("t1", "First task", TaskPriority::High);
        assert!(ada.push().success);

        // Forge a rebase-machinery commit with no resolution after it.
        let git = ada.git();
        git.checkout_branch_force(STATE).unwrap();
        git.commit_allow_empty("pick 1a2b3c4 stray rebase artifact")
            .unwrap();
        git.checkout_branch_force("main").unwrap();

        ada.write_task("t1", "First task", TaskPriority::Urgent);
        let result = ada.push();
        assert!(!result.success);
        assert!(result.conflict_detected);
        let info = result.conflict_info.unwrap();
        assert_eq!(info.conflict_type, ConflictType::IntegrityViolation);
        assert!(!info.resolution_steps.is_empty());
    }
}

mod pull {
    use super::*;

    #[test]
    fn fresh_clone_bootstraps_the_record_set() {
        let remote = bare_remote();
        let ada = Machine::founder(remote.path(), "human:ada", 1);
        ada.write_task("t1", "Shared", TaskPriority::High);
        assert!(ada.push().success);

        let bob = Machine::clone_from(remote.path(), "human:bob", 2);
        let result = bob.pull();
        assert!(result.success, "pull failed: {:?}", result.error);
        assert!(bob.task_path("t1").exists());
        // Machine-local files survive the round trip.
        assert!(bob.key_path().exists());
        assert_eq!(bob.git().current_branch().unwrap(), "main");
    }

    #[test]
    fn pull_is_idempotent_without_remote_changes() {
        let remote = bare_remote();
        let ada = Machine::founder(remote.path(), "human:ada", 1);
        ada.write_task("t1", "Shared", TaskPriority::High);
        assert!(ada.push().success);

        let bob = Machine::clone_from(remote.path(), "human:bob", 2);
        assert!(bob.pull().success);
        let second = bob.pull();
        assert!(second.success);
        assert!(!second.has_changes);
        assert_eq!(second.files_updated, 0);
    }

    #[test]
    fn local_edits_to_remotely_changed_records_conflict_unless_forced() {
        let remote = bare_remote();
        let ada = Machine::founder(remote.path(), "human:ada", 1);
        ada.write_task("t1", "Shared", TaskPriority::High);
        assert!(ada.push().success);

        let bob = Machine::clone_from(remote.path(), "human:bob", 2);
        assert!(bob.pull().success);

        // Remote advances the record while bob edits it locally.
        ada.write_task("t1", "Shared", TaskPriority::Critical);
        assert!(ada.push().success);
        bob.write_task("t1", "Shared", TaskPriority::Urgent);

        let conflicted = bob.pull();
        assert!(!conflicted.success);
        assert!(conflicted.conflict_detected);
        let info = conflicted.conflict_info.unwrap();
        assert_eq!(info.conflict_type, ConflictType::LocalChangesConflict);
        assert!(info.affected_files.contains(&state_record_path("t1")));

        // The local edit survived the refused pull.
        let record = bob.read_task("t1");
        assert_matches!(
            record.payload,
            RecordPayload::Task(Task { priority: TaskPriority::Urgent, .. })
        );
        assert_eq!(bob.git().current_branch().unwrap(), "main");

        // Forcing overwrites the local edit with the remote state.
        let forced = bob
            .backend()
            .pull(PullOptions {
                force: true,
                force_reindex: false,
            })
            .unwrap();
        assert!(forced.success, "forced pull failed: {:?}", forced.error);
        assert!(forced
            .forced_overwrites
            .contains(&state_record_path("t1")));
        let record = bob.read_task("t1");
        assert_matches!(
            record.payload,
            RecordPayload::Task(Task { priority: TaskPriority::Critical, .. })
        );
        assert_eq!(record.author().unwrap().key_id, "human:ada");
    }

    #[test]
    fn local_edits_to_untouched_records_survive_a_pull() {
        let remote = bare_remote();
        let ada = Machine::founder(remote.path(), "human:ada", 1);
        ada.write_task("t1", "Shared", TaskPriority::High);
        ada.write_task("t2", "Other", TaskPriority::Low);
        assert!(ada.push().success);

        let bob = Machine::clone_from(remote.path(), "human:bob", 2);
        assert!(bob.pull().success);

        // Remote touches t1 only; bob edits t2 only.
        ada.write_task("t1", "Shared", TaskPriority::Critical);
        assert!(ada.push().success);
        bob.write_task("t2", "Other", TaskPriority::Urgent);

        let result = bob.pull();
        assert!(result.success, "pull failed: {:?}", result.error);
        assert_matches!(
            bob.read_task("t1").payload,
            RecordPayload::Task(Task { priority: TaskPriority::Critical, .. })
        );
        assert_matches!(
            bob.read_task("t2").payload,
            RecordPayload::Task(Task { priority: TaskPriority::Urgent, .. })
        );
    }
}

mod conflict {
    use super::*;

    /// The full modify/modify story: divergent edits, a paused rebase, an
    /// operator resolution, a signed resolution commit, a passing audit.
    #[test]
    fn modify_modify_conflict_is_resolved_with_a_signed_commit() {
        let remote = bare_remote();
        let ada = Machine::founder(remote.path(), "human:ada", 1);
        ada.write_task("t1", "Contested", TaskPriority::High);
        assert!(ada.push().success);

        let bob = Machine::clone_from(remote.path(), "human:bob", 2);
        assert!(bob.pull().success);

        // Divergent edits; ada publishes first.
        ada.write_task("t1", "Contested", TaskPriority::Critical);
        assert!(ada.push().success);
        bob.write_task("t1", "Contested", TaskPriority::Urgent);

        let conflicted = bob.push();
        assert!(!conflicted.success);
        assert!(conflicted.conflict_detected);
        let info = conflicted.conflict_info.clone().unwrap();
        assert_eq!(info.conflict_type, ConflictType::RebaseConflict);
        assert!(info.affected_files.contains(&state_record_path("t1")));

        // The repository is paused mid-rebase with markers in the file.
        let backend = bob.backend();
        assert!(backend.is_rebase_in_progress().unwrap());
        let conflicted_content =
            fs::read_to_string(bob.root().join(state_record_path("t1"))).unwrap();
        assert!(conflicted_content.contains("<<<<<<<"));

        // Resolving with markers still present is refused.
        sh(bob.root(), &["add", &state_record_path("t1")]);
        assert_matches!(
            backend.resolve(&bob.actor, "picked urgent"),
            Err(Error::ConflictMarkersPresent { .. })
        );

        // The operator picks bob's version, stages it, and resolves.
        let resolved = signed_task(&bob.key, &bob.actor, "t1", "Contested", TaskPriority::Urgent);
        fs::write(
            bob.root().join(state_record_path("t1")),
            serde_json::to_vec_pretty(&resolved).unwrap(),
        )
        .unwrap();
        sh(bob.root(), &["add", &state_record_path("t1")]);

        let resolution = backend.resolve(&bob.actor, "picked urgent").unwrap();
        assert!(resolution.success, "resolve failed: {:?}", resolution.error);
        assert!(resolution.conflicts_resolved >= 1);
        assert!(resolution.resolution_commit.is_some());
        assert!(resolution.pushed);

        // State history: resolution commit on top, audit green.
        let git = bob.git();
        let history = git.commit_history(STATE, 5).unwrap();
        assert!(history[0]
            .message
            .starts_with("resolution: conflict resolved by human:bob"));
        let report = bob
            .backend()
            .audit(libgov::sync::AuditOptions::default())
            .unwrap();
        assert!(report.passed, "audit failed: {}", report.summary);

        // The record carries the resolver's signature and verifies.
        let record = bob.read_task("t1");
        let last = record.last_modifier().unwrap();
        assert_eq!(last.role, ROLE_RESOLVER);
        assert_eq!(last.key_id, "human:bob");
        assert!(last.notes.contains("picked urgent"));
        record
            .verify(|key_id| {
                (key_id == "human:bob").then(|| bob.key.public())
            })
            .unwrap();

        // Session invariants hold after the resolution.
        assert_eq!(git.current_branch().unwrap(), "main");
        assert!(bob.key_path().exists());
        assert!(git.stash_list().unwrap().is_empty());
        assert!(!backend.is_rebase_in_progress().unwrap());

        // Ada picks the resolution up cleanly.
        let pulled = ada.pull();
        assert!(pulled.success);
        assert_matches!(
            ada.read_task("t1").payload,
            RecordPayload::Task(Task { priority: TaskPriority::Urgent, .. })
        );
    }

    #[test]
    fn resolve_without_a_paused_rebase_is_refused() {
        let remote = bare_remote();
        let ada = Machine::founder(remote.path(), "human:ada", 1);
        ada.write_task("t1", "Task", TaskPriority::High);
        assert!(ada.push().success);

        assert_matches!(
            ada.backend().resolve(&ada.actor, "nothing to do"),
            Err(Error::NoRebaseInProgress)
        );
    }
}
