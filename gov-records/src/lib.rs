// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

//! The governance record model.
//!
//! A record is an envelope `{header, payload}` stored as JSON under
//! `.gitgov/`. The header carries a checksum over the canonical form of the
//! payload and an ordered chain of Ed25519 signatures; the payload is one of
//! a closed set of variants (tasks, cycles, executions, feedback,
//! changelogs, actors, agents) plus an escape hatch for custom records.

#[macro_use]
extern crate lazy_static;

pub mod canonical;
pub use canonical::{canonical_json, CjsonError};

pub mod envelope;
pub use envelope::{
    EmbeddedHeader,
    EmbeddedRecord,
    RecordSignature,
    Verification,
    HEADER_VERSION,
    ROLE_AUTHOR,
    ROLE_RESOLVER,
};

pub mod ids;
pub use ids::{generate_actor_id, generate_id, parse_id, slugify, ParsedId};

pub mod payload;
pub use payload::{
    Actor,
    ActorType,
    Agent,
    AgentEngine,
    Changelog,
    Cycle,
    CycleStatus,
    EntityType,
    Execution,
    Feedback,
    FeedbackStatus,
    FeedbackType,
    RecordPayload,
    RecordType,
    Task,
    TaskPriority,
    TaskStatus,
};
