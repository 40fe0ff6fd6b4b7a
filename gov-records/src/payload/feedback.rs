// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Task,
    Execution,
    Feedback,
    Changelog,
    Cycle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackType {
    Blocking,
    Suggestion,
    Question,
    Approval,
    Clarification,
    Assignment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackStatus {
    Open,
    Acknowledged,
    Resolved,
    Wontfix,
}

/// Feedback attached to another record.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub id: String,
    pub entity_type: EntityType,
    pub entity_id: String,

    #[serde(rename = "type")]
    pub feedback_type: FeedbackType,

    pub status: FeedbackStatus,
    pub content: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolves_feedback_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl Feedback {
    /// Assignments are born resolved, everything else opens a conversation.
    pub fn default_status(feedback_type: FeedbackType) -> FeedbackStatus {
        match feedback_type {
            FeedbackType::Assignment => FeedbackStatus::Resolved,
            _ => FeedbackStatus::Open,
        }
    }
}

impl<'de> Deserialize<'de> for Feedback {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Helper {
            id: String,
            entity_type: EntityType,
            entity_id: String,
            #[serde(rename = "type")]
            feedback_type: FeedbackType,
            #[serde(default)]
            status: Option<FeedbackStatus>,
            content: String,
            #[serde(default)]
            assignee: Option<String>,
            #[serde(default)]
            resolves_feedback_id: Option<String>,
            #[serde(default)]
            metadata: Option<Map<String, Value>>,
        }

        let h = Helper::deserialize(deserializer)?;
        Ok(Feedback {
            status: h
                .status
                .unwrap_or_else(|| Feedback::default_status(h.feedback_type)),
            id: h.id,
            entity_type: h.entity_type,
            entity_id: h.entity_id,
            feedback_type: h.feedback_type,
            content: h.content,
            assignee: h.assignee,
            resolves_feedback_id: h.resolves_feedback_id,
            metadata: h.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_defaults_to_open() {
        let f: Feedback = serde_json::from_value(json!({
            "id": "1700000000-feedback-needs-work",
            "entityType": "task",
            "entityId": "1700000000-task-x",
            "type": "suggestion",
            "content": "tighten this up"
        }))
        .unwrap();
        assert_eq!(f.status, FeedbackStatus::Open);
    }

    #[test]
    fn assignment_defaults_to_resolved() {
        let f: Feedback = serde_json::from_value(json!({
            "id": "1700000000-feedback-take-this",
            "entityType": "task",
            "entityId": "1700000000-task-x",
            "type": "assignment",
            "content": "yours now",
            "assignee": "human:ada"
        }))
        .unwrap();
        assert_eq!(f.status, FeedbackStatus::Resolved);
    }

    #[test]
    fn explicit_status_wins() {
        let f: Feedback = serde_json::from_value(json!({
            "id": "1700000000-feedback-x",
            "entityType": "cycle",
            "entityId": "1700000000-cycle-y",
            "type": "blocking",
            "status": "acknowledged",
            "content": "hold on"
        }))
        .unwrap();
        assert_eq!(f.status, FeedbackStatus::Acknowledged);
    }
}
