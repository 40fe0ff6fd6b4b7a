// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

use serde::{Deserialize, Serialize};

/// A shipped-work announcement tying together the records that produced it.
///
/// `related_tasks` is non-empty by construction at the factory; the linter
/// enforces it for records arriving over sync.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Changelog {
    pub id: String,
    pub title: String,
    pub description: String,
    pub related_tasks: Vec<String>,
    pub completed_at: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_cycles: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_executions: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commits: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}
