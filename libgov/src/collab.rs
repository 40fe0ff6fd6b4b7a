// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

//! Contracts of the engine's external collaborators.
//!
//! The sync engine does not validate record schemas, rebuild derived views
//! or hold key material itself; it is wired with implementations of these
//! three seams at construction time.

use std::{convert::TryFrom, fs, io, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use gov_crypto::{BoxedSigner, PublicKey, SecretKey, Signer};
use gov_records::{payload::Actor, EmbeddedRecord, RecordPayload};

use crate::paths::GITGOV_DIR;

/// A boxed error for collaborator failures the engine only reports.
pub type CollabError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Rebuilds derived views (`index.json`) after the record set changed.
pub trait Projector {
    fn generate_index(&self) -> Result<(), CollabError>;
}

/// A projector for setups without an indexer; pulls still succeed, they
/// just leave no `index.json` behind.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProjector;

impl Projector for NoopProjector {
    fn generate_index(&self) -> Result<(), CollabError> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LintOptions {
    pub validate_checksums: bool,
    pub validate_signatures: bool,
    pub validate_references: bool,
    pub concurrent: bool,
    /// Passed through from audit; expectation checks are the linter's call.
    pub verify_expected_files: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LintIssue {
    pub file: String,
    /// Which validator flagged it: `checksum`, `signature`, `schema`, ...
    pub validator: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LintReport {
    pub errors: Vec<LintIssue>,
    pub warnings: Vec<LintIssue>,
}

impl LintReport {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validates structural, checksum, signature and reference integrity of
/// the record set.
pub trait Linter {
    fn lint(&self, options: LintOptions) -> Result<LintReport, CollabError>;

    /// Validate a single record blob; used by the remote-API backend which
    /// audits tree blobs instead of a working tree.
    fn lint_record(&self, file: &str, content: &[u8]) -> Vec<LintIssue>;
}

/// A linter that accepts everything; for wiring up tests and read-only
/// tooling.
#[derive(Clone, Copy, Debug, Default)]
pub struct PermissiveLinter;

impl Linter for PermissiveLinter {
    fn lint(&self, _options: LintOptions) -> Result<LintReport, CollabError> {
        Ok(LintReport::default())
    }

    fn lint_record(&self, _file: &str, _content: &[u8]) -> Vec<LintIssue> {
        Vec::new()
    }
}

pub mod identity {
    use super::*;

    #[derive(Debug, Error)]
    #[non_exhaustive]
    pub enum Error {
        #[error("no key material found for {actor_id} at {path}")]
        MissingKey { actor_id: String, path: PathBuf },

        #[error("malformed key file {path}: {reason}")]
        MalformedKey { path: PathBuf, reason: String },

        #[error(transparent)]
        Sign(#[from] gov_records::envelope::error::Sign),

        #[error(transparent)]
        Io(#[from] io::Error),
    }
}

/// The identity adapter: who is acting, how to sign on their behalf, and
/// how to resolve any signer's public key.
pub trait Identity {
    /// The authenticated actor's id.
    fn actor_id(&self) -> &str;

    /// Append a signature by the authenticated actor.
    fn sign_record(
        &self,
        record: &mut EmbeddedRecord,
        role: &str,
        notes: &str,
    ) -> Result<(), identity::Error>;

    /// Resolve a signer's public key, for verification.
    fn public_key(&self, key_id: &str) -> Option<PublicKey>;
}

/// File-backed identity: the actor's Ed25519 seed lives in
/// `.gitgov/actors/<id>.key` (base64, local-only and sync-excluded), public
/// keys come from the actor records next to it.
#[derive(Debug)]
pub struct FileIdentity {
    actor_id: String,
    signer: BoxedSigner,
    actors_dir: PathBuf,
}

impl FileIdentity {
    /// Load the identity of `actor_id` from `<repo_root>/.gitgov/actors/`.
    pub fn load(repo_root: &std::path::Path, actor_id: &str) -> Result<Self, identity::Error> {
        let actors_dir = repo_root.join(GITGOV_DIR).join("actors");
        let key_path = actors_dir.join(format!("{}.key", actor_id));

        let encoded = fs::read_to_string(&key_path).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                identity::Error::MissingKey {
                    actor_id: actor_id.to_string(),
                    path: key_path.clone(),
                }
            } else {
                identity::Error::Io(err)
            }
        })?;

        let seed = base64::decode(encoded.trim()).map_err(|err| identity::Error::MalformedKey {
            path: key_path.clone(),
            reason: err.to_string(),
        })?;
        let seed: [u8; 32] =
            <[u8; 32]>::try_from(seed.as_slice()).map_err(|_| identity::Error::MalformedKey {
                path: key_path,
                reason: format!("expected 32 seed bytes, found {}", seed.len()),
            })?;

        Ok(Self {
            actor_id: actor_id.to_string(),
            signer: BoxedSigner::from(SecretKey::from_seed(seed)),
            actors_dir,
        })
    }

    /// Build an identity from in-memory key material.
    pub fn new(actor_id: impl Into<String>, signer: BoxedSigner, actors_dir: PathBuf) -> Self {
        Self {
            actor_id: actor_id.into(),
            signer,
            actors_dir,
        }
    }
}

impl Identity for FileIdentity {
    fn actor_id(&self) -> &str {
        &self.actor_id
    }

    fn sign_record(
        &self,
        record: &mut EmbeddedRecord,
        role: &str,
        notes: &str,
    ) -> Result<(), identity::Error> {
        record
            .sign(&self.signer, &self.actor_id, role, notes)
            .map(drop)
            .map_err(identity::Error::from)
    }

    fn public_key(&self, key_id: &str) -> Option<PublicKey> {
        if key_id == self.actor_id {
            return Some(self.signer.public_key());
        }

        let path = self.actors_dir.join(format!("{}.json", key_id));
        let bytes = fs::read(path).ok()?;
        let record: EmbeddedRecord = serde_json::from_slice(&bytes).ok()?;
        match record.payload {
            RecordPayload::Actor(Actor { public_key, .. }) => Some(public_key),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gov_records::{
        payload::{Task, TaskPriority, TaskStatus},
        ROLE_AUTHOR,
    };

    fn task_record() -> EmbeddedRecord {
        EmbeddedRecord::new(RecordPayload::Task(Task {
            id: "1700000000-task-wire-identity".to_string(),
            title: "Wire identity".to_string(),
            status: TaskStatus::Ready,
            priority: TaskPriority::Medium,
            description: String::new(),
            tags: vec![],
            cycle_ids: None,
            references: None,
            notes: None,
            metadata: None,
        }))
        .unwrap()
    }

    #[test]
    fn file_identity_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let actors = dir.path().join(GITGOV_DIR).join("actors");
        fs::create_dir_all(&actors).unwrap();

        let seed = [5u8; 32];
        fs::write(actors.join("human:ada.key"), base64::encode(seed)).unwrap();

        let identity = FileIdentity::load(dir.path(), "human:ada").unwrap();
        let mut record = task_record();
        identity
            .sign_record(&mut record, ROLE_AUTHOR, "initial")
            .unwrap();

        record
            .verify(|key_id| identity.public_key(key_id))
            .unwrap();
        assert_eq!(record.author().unwrap().key_id, "human:ada");
    }

    #[test]
    fn missing_key_is_a_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches::assert_matches!(
            FileIdentity::load(dir.path(), "human:ghost"),
            Err(identity::Error::MissingKey { actor_id, .. }) if actor_id == "human:ghost"
        );
    }
}
