// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

//! Deterministic record id generation and parsing.
//!
//! Timestamped kinds produce `{timestamp}-{kind}-{slug}`, actors and agents
//! produce `{type}:{slug}`. The slug is derived from a human-readable seed
//! and is stable under re-sanitisation, so ids round-trip through
//! [`parse_id`].

use std::convert::TryFrom;

use regex::Regex;
use thiserror::Error;

use crate::payload::{ActorType, RecordType};

const SLUG_MAX: usize = 50;

lazy_static! {
    static ref TIMESTAMPED_ID: Regex =
        Regex::new(r"^(\d{10})-(task|cycle|exec|feedback|changelog)-([a-z0-9-]+)$").unwrap();
    static ref ACTOR_ID: Regex = Regex::new(r"^(human|agent):([a-z0-9-]+)$").unwrap();
}

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("seed {0:?} sanitises to an empty slug")]
    EmptySeed(String),

    #[error("record type {0} does not carry a timestamped id")]
    NotTimestamped(RecordType),

    #[error("malformed record id {0:?}")]
    Malformed(String),
}

/// The id segment naming a record's kind, e.g. `task` in
/// `1700000000-task-fix-login`.
pub fn kind_segment(kind: RecordType) -> Option<&'static str> {
    match kind {
        RecordType::Task => Some("task"),
        RecordType::Cycle => Some("cycle"),
        RecordType::Execution => Some("exec"),
        RecordType::Feedback => Some("feedback"),
        RecordType::Changelog => Some("changelog"),
        RecordType::Actor | RecordType::Agent | RecordType::Custom => None,
    }
}

/// Lowercase the seed, map spaces to `-`, drop everything outside
/// `[a-z0-9-]`, and clip to 50 characters.
pub fn slugify(seed: &str) -> String {
    let mut slug = String::with_capacity(seed.len());
    for c in seed.to_lowercase().chars() {
        match c {
            ' ' => slug.push('-'),
            'a'..='z' | '0'..='9' | '-' => slug.push(c),
            _ => (),
        }
    }
    slug.chars().take(SLUG_MAX).collect()
}

/// `{timestamp}-{kind}-{slug}` for the timestamped record kinds.
pub fn generate_id(kind: RecordType, seed: &str, timestamp: i64) -> Result<String, Error> {
    let segment = kind_segment(kind).ok_or(Error::NotTimestamped(kind))?;
    let slug = slugify(seed);
    if slug.is_empty() {
        return Err(Error::EmptySeed(seed.to_string()));
    }
    Ok(format!("{}-{}-{}", timestamp, segment, slug))
}

/// `{type}:{slug}` for actors and agents.
pub fn generate_actor_id(actor_type: ActorType, seed: &str) -> Result<String, Error> {
    let slug = slugify(seed);
    if slug.is_empty() {
        return Err(Error::EmptySeed(seed.to_string()));
    }
    Ok(format!("{}:{}", actor_type, slug))
}

/// A structurally valid record id, decomposed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsedId {
    Timestamped {
        kind: RecordType,
        timestamp: i64,
        slug: String,
    },
    Actor {
        actor_type: ActorType,
        slug: String,
    },
}

impl ParsedId {
    pub fn kind(&self) -> RecordType {
        match self {
            Self::Timestamped { kind, .. } => *kind,
            Self::Actor { .. } => RecordType::Actor,
        }
    }
}

pub fn parse_id(id: &str) -> Result<ParsedId, Error> {
    if let Some(caps) = TIMESTAMPED_ID.captures(id) {
        let timestamp = caps[1]
            .parse::<i64>()
            .map_err(|_| Error::Malformed(id.to_string()))?;
        let kind = match &caps[2] {
            "task" => RecordType::Task,
            "cycle" => RecordType::Cycle,
            "exec" => RecordType::Execution,
            "feedback" => RecordType::Feedback,
            "changelog" => RecordType::Changelog,
            _ => unreachable!("constrained by the regex"),
        };
        return Ok(ParsedId::Timestamped {
            kind,
            timestamp,
            slug: caps[3].to_string(),
        });
    }

    if let Some(caps) = ACTOR_ID.captures(id) {
        let actor_type =
            ActorType::try_from(&caps[1]).map_err(|_| Error::Malformed(id.to_string()))?;
        return Ok(ParsedId::Actor {
            actor_type,
            slug: caps[2].to_string(),
        });
    }

    Err(Error::Malformed(id.to_string()))
}

/// Whether `id` is well-formed for the given kind.
pub fn matches_kind(id: &str, kind: RecordType) -> bool {
    match parse_id(id) {
        Ok(ParsedId::Timestamped { kind: k, .. }) => k == kind,
        Ok(ParsedId::Actor { .. }) => matches!(kind, RecordType::Actor | RecordType::Agent),
        Err(_) => false,
    }
}
