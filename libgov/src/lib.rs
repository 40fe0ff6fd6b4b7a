// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

//! The gitgov state synchronization engine.
//!
//! A project's governance records live as signed JSON files under
//! `.gitgov/` on the working branch and are reconciled across machines via
//! a dedicated orphan branch (`gitgov-state` by default) using a
//! rebase-driven protocol. This crate provides:
//!
//! * the filesystem partition deciding which files sync, which stay local,
//!   and which are security-sensitive ([`paths`]),
//! * an abstract git capability set with a CLI-spawning implementation
//!   ([`git`]),
//! * the sync engine itself with its push/pull/resolve/audit pipelines and
//!   two interchangeable backends ([`sync`]),
//! * the contracts of the external collaborators the engine is wired with
//!   at construction: projector, linter and identity adapter ([`collab`]).

#[macro_use]
extern crate lazy_static;

pub extern crate gov_crypto as crypto;
pub extern crate gov_records as records;

pub mod collab;
pub mod config;
pub mod git;
pub mod paths;
pub mod sync;

pub use config::ProjectConfig;
pub use paths::{classify, should_sync, FileClass};
pub use sync::{LocalGitBackend, SyncBackend};
