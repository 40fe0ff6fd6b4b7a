// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

//! The record envelope: `{header, payload}`.
//!
//! The header binds the payload with a SHA-256 checksum over its canonical
//! JSON and an ordered chain of Ed25519 signatures. The first signature is
//! the author, the last the most recent modifier; every mutation recomputes
//! the checksum as part of signing.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use gov_crypto::{BoxedSignError, PublicKey, Signer};

use crate::{
    canonical::{canonical_json, CjsonError},
    payload::{RecordPayload, RecordType},
};

pub const HEADER_VERSION: &str = "1.0";

pub const ROLE_AUTHOR: &str = "author";
pub const ROLE_RESOLVER: &str = "resolver";

/// One link in a record's signature chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSignature {
    /// Actor id of the signer, resolvable to a public key.
    pub key_id: String,

    /// The signer's context: `author`, `reviewer`, `resolver`, ...
    pub role: String,

    pub notes: String,

    pub signature: gov_crypto::Signature,

    /// Unix seconds at signing time.
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedHeader {
    pub version: String,

    /// Explicit record kind. Inferred from the payload shape for legacy
    /// records written without it.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub record_type: Option<RecordType>,

    /// 64 hex chars: SHA-256 over the canonical JSON of the payload.
    pub payload_checksum: String,

    pub signatures: Vec<RecordSignature>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_checksum: Option<String>,
}

/// A governance record as stored on disk.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EmbeddedRecord {
    pub header: EmbeddedHeader,
    pub payload: RecordPayload,
}

pub mod error {
    use super::*;

    #[derive(Debug, Error)]
    #[non_exhaustive]
    pub enum Sign {
        #[error(transparent)]
        Cjson(#[from] CjsonError),

        #[error(transparent)]
        Signer(#[from] BoxedSignError),
    }

    #[derive(Debug, Error)]
    #[non_exhaustive]
    pub enum Verify {
        #[error("payload checksum mismatch: header says {header}, payload hashes to {actual}")]
        InvalidChecksum { header: String, actual: String },

        #[error("signature chain is empty")]
        MissingSignatures,

        #[error("no public key known for {key_id}")]
        UnknownKey { key_id: String },

        #[error("signature by {key_id} does not verify")]
        BadSignature { key_id: String },

        #[error(transparent)]
        Cjson(#[from] CjsonError),
    }
}

/// Outcome of [`EmbeddedRecord::verify`], flattened for callers that report
/// rather than propagate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verification {
    Ok,
    InvalidChecksum,
    BadSignature { key_id: String },
    UnknownKey { key_id: String },
}

/// SHA-256 over the canonical JSON of `payload`, rendered as lowercase hex.
pub fn payload_checksum<T: Serialize>(payload: &T) -> Result<String, CjsonError> {
    let bytes = canonical_json(payload)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// The digest a signature is produced over.
///
/// Not the in-memory object shape: the tuple
/// `(payload checksum, keyId, role, notes, timestamp)` is colon-joined and
/// hashed, so any implementation that agrees on the canonical payload bytes
/// agrees on the digest.
pub fn signing_digest(
    payload_checksum: &str,
    key_id: &str,
    role: &str,
    notes: &str,
    timestamp: i64,
) -> [u8; 32] {
    let input = format!(
        "{}:{}:{}:{}:{}",
        payload_checksum, key_id, role, notes, timestamp
    );
    Sha256::digest(input.as_bytes()).into()
}

impl EmbeddedRecord {
    /// Wrap a payload in a fresh, unsigned envelope.
    pub fn new(payload: RecordPayload) -> Result<Self, CjsonError> {
        let checksum = payload_checksum(&payload)?;
        Ok(Self {
            header: EmbeddedHeader {
                version: HEADER_VERSION.to_string(),
                record_type: Some(payload.record_type()),
                payload_checksum: checksum,
                signatures: Vec::new(),
                schema_url: None,
                schema_checksum: None,
            },
            payload,
        })
    }

    /// Append a signature stamped with the current Unix time.
    ///
    /// The payload checksum is recomputed first, so signing after a payload
    /// mutation re-binds the header to the new content.
    pub fn sign<S>(
        &mut self,
        signer: &S,
        key_id: &str,
        role: &str,
        notes: &str,
    ) -> Result<&RecordSignature, error::Sign>
    where
        S: Signer + ?Sized,
    {
        self.sign_at(signer, key_id, role, notes, chrono::Utc::now().timestamp())
    }

    /// [`Self::sign`] with an explicit timestamp.
    pub fn sign_at<S>(
        &mut self,
        signer: &S,
        key_id: &str,
        role: &str,
        notes: &str,
        timestamp: i64,
    ) -> Result<&RecordSignature, error::Sign>
    where
        S: Signer + ?Sized,
    {
        self.header.payload_checksum = payload_checksum(&self.payload)?;
        let digest = signing_digest(&self.header.payload_checksum, key_id, role, notes, timestamp);
        let signature = signer.sign(&digest)?;
        self.header.signatures.push(RecordSignature {
            key_id: key_id.to_string(),
            role: role.to_string(),
            notes: notes.to_string(),
            signature,
            timestamp,
        });
        Ok(self
            .header
            .signatures
            .last()
            .expect("signature was just pushed"))
    }

    /// Check invariants E1 (checksum binds payload) and E2 (every signature
    /// verifies under the key resolved from its `keyId`).
    pub fn verify<F>(&self, lookup: F) -> Result<(), error::Verify>
    where
        F: Fn(&str) -> Option<PublicKey>,
    {
        let actual = payload_checksum(&self.payload)?;
        if actual != self.header.payload_checksum {
            return Err(error::Verify::InvalidChecksum {
                header: self.header.payload_checksum.clone(),
                actual,
            });
        }

        if self.header.signatures.is_empty() {
            return Err(error::Verify::MissingSignatures);
        }

        for sig in &self.header.signatures {
            let key = lookup(&sig.key_id).ok_or_else(|| error::Verify::UnknownKey {
                key_id: sig.key_id.clone(),
            })?;
            let digest = signing_digest(
                &self.header.payload_checksum,
                &sig.key_id,
                &sig.role,
                &sig.notes,
                sig.timestamp,
            );
            if !key.verify(&sig.signature, &digest) {
                return Err(error::Verify::BadSignature {
                    key_id: sig.key_id.clone(),
                });
            }
        }

        Ok(())
    }

    /// [`Self::verify`] flattened to a reportable outcome.
    pub fn verification<F>(&self, lookup: F) -> Verification
    where
        F: Fn(&str) -> Option<PublicKey>,
    {
        match self.verify(lookup) {
            Ok(()) => Verification::Ok,
            Err(error::Verify::InvalidChecksum { .. }) | Err(error::Verify::Cjson(_)) => {
                Verification::InvalidChecksum
            },
            Err(error::Verify::UnknownKey { key_id }) => Verification::UnknownKey { key_id },
            Err(error::Verify::BadSignature { key_id }) => Verification::BadSignature { key_id },
            Err(error::Verify::MissingSignatures) => Verification::BadSignature {
                key_id: String::new(),
            },
        }
    }

    // Accessors over the signature chain. All of these tolerate malformed
    // or empty chains by going through `Option`.

    /// The first signature: the record's author.
    pub fn author(&self) -> Option<&RecordSignature> {
        self.header.signatures.first()
    }

    /// The last signature: the most recent modifier.
    pub fn last_modifier(&self) -> Option<&RecordSignature> {
        self.header.signatures.last()
    }

    /// Distinct signer key ids, in order of first appearance.
    pub fn contributors(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for sig in &self.header.signatures {
            if !seen.contains(&sig.key_id.as_str()) {
                seen.push(sig.key_id.as_str());
            }
        }
        seen
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.last_modifier().map(|sig| sig.timestamp)
    }

    /// Total signatures, duplicates counted.
    pub fn signature_count(&self) -> usize {
        self.header.signatures.len()
    }
}

impl<'de> Deserialize<'de> for EmbeddedRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Helper {
            header: EmbeddedHeader,
            payload: serde_json::Value,
        }

        let Helper { header, payload } = Helper::deserialize(deserializer)?;

        if header.version != HEADER_VERSION {
            return Err(serde::de::Error::custom(format!(
                "unsupported header version {:?}",
                header.version
            )));
        }

        let payload = RecordPayload::from_value(header.record_type, payload)
            .map_err(serde::de::Error::custom)?;

        // Backfill the tag for records written before it existed.
        let record_type = header.record_type.or_else(|| Some(payload.record_type()));

        Ok(EmbeddedRecord {
            header: EmbeddedHeader {
                record_type,
                ..header
            },
            payload,
        })
    }
}
