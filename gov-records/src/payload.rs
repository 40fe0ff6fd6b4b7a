// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

//! Record payload variants.
//!
//! The set is closed: governance planning artifacts (tasks, cycles,
//! executions, feedback, changelogs), identity artifacts (actors, agents),
//! and an opaque escape hatch for custom records. Discrimination is by the
//! explicit `type` tag in the record header; for legacy records written
//! without the tag, [`RecordPayload::probe`] infers the variant from the
//! payload shape.

use std::{convert::TryFrom, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

mod actor;
mod agent;
mod changelog;
mod cycle;
mod execution;
mod feedback;
mod task;

pub use actor::{Actor, ActorType};
pub use agent::{Agent, AgentEngine};
pub use changelog::Changelog;
pub use cycle::{Cycle, CycleStatus};
pub use execution::Execution;
pub use feedback::{EntityType, Feedback, FeedbackStatus, FeedbackType};
pub use task::{Task, TaskPriority, TaskStatus};

/// The closed set of record kinds, as carried in `header.type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Actor,
    Agent,
    Task,
    Cycle,
    Execution,
    Feedback,
    Changelog,
    Custom,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Actor => "actor",
            Self::Agent => "agent",
            Self::Task => "task",
            Self::Cycle => "cycle",
            Self::Execution => "execution",
            Self::Feedback => "feedback",
            Self::Changelog => "changelog",
            Self::Custom => "custom",
        })
    }
}

impl FromStr for RecordType {
    type Err = UnknownRecordType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "actor" => Ok(Self::Actor),
            "agent" => Ok(Self::Agent),
            "task" => Ok(Self::Task),
            "cycle" => Ok(Self::Cycle),
            "execution" => Ok(Self::Execution),
            "feedback" => Ok(Self::Feedback),
            "changelog" => Ok(Self::Changelog),
            "custom" => Ok(Self::Custom),
            _ => Err(UnknownRecordType(s.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown record type {0:?}")]
pub struct UnknownRecordType(pub String);

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiscriminateError {
    #[error("payload does not match record type {expected}")]
    Mismatch {
        expected: RecordType,
        #[source]
        source: serde_json::Error,
    },

    #[error("payload shape matches no known record type")]
    Unrecognised,
}

/// One record payload of any kind.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RecordPayload {
    Task(Task),
    Cycle(Cycle),
    Execution(Execution),
    Feedback(Feedback),
    Changelog(Changelog),
    Actor(Actor),
    Agent(Agent),
    Custom(Value),
}

impl RecordPayload {
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Task(_) => RecordType::Task,
            Self::Cycle(_) => RecordType::Cycle,
            Self::Execution(_) => RecordType::Execution,
            Self::Feedback(_) => RecordType::Feedback,
            Self::Changelog(_) => RecordType::Changelog,
            Self::Actor(_) => RecordType::Actor,
            Self::Agent(_) => RecordType::Agent,
            Self::Custom(_) => RecordType::Custom,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Task(t) => Some(&t.id),
            Self::Cycle(c) => Some(&c.id),
            Self::Execution(e) => Some(&e.id),
            Self::Feedback(f) => Some(&f.id),
            Self::Changelog(c) => Some(&c.id),
            Self::Actor(a) => Some(&a.id),
            Self::Agent(a) => Some(&a.id),
            Self::Custom(v) => v.get("id").and_then(Value::as_str),
        }
    }

    /// Infer the record type of an untagged payload from its shape.
    ///
    /// The id prefix is authoritative where present; distinctive fields
    /// break the tie between actors and agents and cover records whose id
    /// is missing or malformed.
    pub fn probe(value: &Value) -> Option<RecordType> {
        let obj = value.as_object()?;

        if let Some(id) = obj.get("id").and_then(Value::as_str) {
            if let Ok(parsed) = crate::ids::parse_id(id) {
                return Some(match parsed.kind() {
                    RecordType::Actor if obj.contains_key("engine") => RecordType::Agent,
                    other => other,
                });
            }
        }

        if obj.contains_key("publicKey") {
            Some(RecordType::Actor)
        } else if obj.contains_key("engine") {
            Some(RecordType::Agent)
        } else if obj.contains_key("entityType") {
            Some(RecordType::Feedback)
        } else if obj.contains_key("relatedTasks") {
            Some(RecordType::Changelog)
        } else if obj.contains_key("taskIds") {
            Some(RecordType::Cycle)
        } else if obj.contains_key("taskId") {
            Some(RecordType::Execution)
        } else if obj.contains_key("priority") {
            Some(RecordType::Task)
        } else {
            None
        }
    }

    /// Deserialise a payload, preferring the header's explicit tag over
    /// shape probing.
    pub fn from_value(hint: Option<RecordType>, value: Value) -> Result<Self, DiscriminateError> {
        let ty = match hint {
            Some(ty) => ty,
            None => Self::probe(&value).ok_or(DiscriminateError::Unrecognised)?,
        };

        let mismatch = |source| DiscriminateError::Mismatch {
            expected: ty,
            source,
        };

        Ok(match ty {
            RecordType::Task => Self::Task(serde_json::from_value(value).map_err(mismatch)?),
            RecordType::Cycle => Self::Cycle(serde_json::from_value(value).map_err(mismatch)?),
            RecordType::Execution => {
                Self::Execution(serde_json::from_value(value).map_err(mismatch)?)
            },
            RecordType::Feedback => {
                Self::Feedback(serde_json::from_value(value).map_err(mismatch)?)
            },
            RecordType::Changelog => {
                Self::Changelog(serde_json::from_value(value).map_err(mismatch)?)
            },
            RecordType::Actor => Self::Actor(serde_json::from_value(value).map_err(mismatch)?),
            RecordType::Agent => Self::Agent(serde_json::from_value(value).map_err(mismatch)?),
            RecordType::Custom => Self::Custom(value),
        })
    }
}

impl TryFrom<Value> for RecordPayload {
    type Error = DiscriminateError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(None, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn probe_prefers_id_prefix() {
        let val = json!({
            "id": "1700000000-task-fix-login",
            "title": "Fix login",
            "status": "draft",
            "priority": "high",
            "description": "",
            "tags": []
        });
        assert_eq!(RecordPayload::probe(&val), Some(RecordType::Task));
    }

    #[test]
    fn probe_distinguishes_actor_from_agent() {
        let actor = json!({ "id": "human:ada", "publicKey": "x", "type": "human" });
        let agent = json!({ "id": "agent:triage", "engine": "local" });
        assert_eq!(RecordPayload::probe(&actor), Some(RecordType::Actor));
        assert_eq!(RecordPayload::probe(&agent), Some(RecordType::Agent));
    }

    #[test]
    fn probe_falls_back_to_fields() {
        let feedback = json!({ "entityType": "task", "entityId": "x", "type": "question", "content": "?" });
        assert_eq!(RecordPayload::probe(&feedback), Some(RecordType::Feedback));
        assert_eq!(RecordPayload::probe(&json!({ "whatever": 1 })), None);
    }

    #[test]
    fn from_value_respects_hint_over_shape() {
        let val = json!({ "free": "form" });
        let payload = RecordPayload::from_value(Some(RecordType::Custom), val.clone()).unwrap();
        assert_eq!(payload, RecordPayload::Custom(val));
    }
}
