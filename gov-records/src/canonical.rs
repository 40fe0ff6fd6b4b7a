// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

//! Canonical serialisation of record payloads.
//!
//! Checksums and signing digests are computed over a deterministic byte
//! encoding of the payload, so that two implementations arrive at the same
//! digest for the same logical record. The encoding is OLPC canonical
//! JSON: object keys sorted, fixed scalar encoding, no insignificant
//! whitespace.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct CjsonError(#[from] serde_json::error::Error);

/// The canonical JSON bytes of a payload.
///
/// This is the only encoding checksums and signatures may be computed
/// over; the pretty-printed form on disk is presentation, not identity.
pub fn canonical_json<T>(value: &T) -> Result<Vec<u8>, CjsonError>
where
    T: Serialize,
{
    let mut buf = vec![];
    let mut ser =
        serde_json::Serializer::with_formatter(&mut buf, olpc_cjson::CanonicalFormatter::new());
    value.serialize(&mut ser)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{RecordPayload, Task, TaskPriority, TaskStatus};
    use serde_json::json;

    #[test]
    fn object_keys_are_sorted() {
        let val = json!({ "zebra": 1, "alpha": { "nested": true, "aardvark": null } });
        assert_eq!(
            String::from_utf8(canonical_json(&val).unwrap()).unwrap(),
            r#"{"alpha":{"aardvark":null,"nested":true},"zebra":1}"#
        );
    }

    #[test]
    fn disk_formatting_does_not_change_identity() {
        let payload = RecordPayload::Task(Task {
            id: "1700000000-task-canonical".to_string(),
            title: "Canonical form".to_string(),
            status: TaskStatus::Draft,
            priority: TaskPriority::Low,
            description: String::new(),
            tags: vec![],
            cycle_ids: None,
            references: None,
            notes: None,
            metadata: None,
        });

        // Round-trip through pretty-printed JSON, as the record store
        // writes it, and through a re-ordered value.
        let pretty = serde_json::to_string_pretty(&payload).unwrap();
        let reparsed: serde_json::Value = serde_json::from_str(&pretty).unwrap();

        assert_eq!(
            canonical_json(&payload).unwrap(),
            canonical_json(&reparsed).unwrap()
        );
    }

    #[test]
    fn unicode_strings_survive() {
        let val = json!({ "title": "Grüße, 世界" });
        let bytes = canonical_json(&val).unwrap();
        let back: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, val);
    }
}
