// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

//! The `.gitgov/` filesystem partition.
//!
//! Every file under the governance directory falls into exactly one class:
//! syncable records and roots travel to the state branch, local-only and
//! security-sensitive files are preserved across branch switches but never
//! committed, everything else is ignored. Classification is a pure path
//! shape function: it produces the same decision for `.gitgov/`-prefixed,
//! repo-absolute, bare and temp-dir-rooted spellings of the same file.

use std::path::{Component, Path, PathBuf};

use regex::Regex;

/// The governance directory, relative to the repository root.
pub const GITGOV_DIR: &str = ".gitgov";

/// Prefix of the per-session scratch directories holding preserved copies
/// of `.gitgov/` across branch switches.
pub const TEMP_DIR_PREFIX: &str = "gitgov-sync-";

/// Record directories whose `*.json` contents sync to the state branch.
pub const SYNC_DIRECTORIES: [&str; 7] = [
    "tasks",
    "cycles",
    "executions",
    "feedback",
    "changelogs",
    "actors",
    "agents",
];

/// Files at the `.gitgov/` root that sync as-is.
pub const SYNC_ROOT_FILES: [&str; 1] = ["config.json"];

/// Machine-specific files: preserved locally, never synced.
pub const LOCAL_ONLY_FILES: [&str; 3] = [".session.json", "index.json", "gitgov"];

/// Glob spellings of the security-sensitive patterns, as published in the
/// state branch `.gitignore`.
pub const SYNC_EXCLUDED_PATTERNS: [&str; 5] = ["*.key", "*.backup", "*.backup-*", "*.tmp", "*.bak"];

const ALLOWED_EXTENSIONS: [&str; 1] = ["json"];

lazy_static! {
    static ref EXCLUDED: Vec<Regex> = vec![
        Regex::new(r"\.key$").unwrap(),
        Regex::new(r"\.backup$").unwrap(),
        Regex::new(r"\.backup-").unwrap(),
        Regex::new(r"\.tmp$").unwrap(),
        Regex::new(r"\.bak$").unwrap(),
    ];
}

/// The partition of `.gitgov/` files.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileClass {
    /// `<syncDir>/*.json`: travels to the state branch.
    SyncableRecord,
    /// A whitelisted root file, e.g. `config.json`.
    SyncableRoot,
    /// Machine-specific; preserved across branch switches, never committed.
    LocalOnly,
    /// Key material and backups; preserved locally, never synced.
    ExcludedSensitive,
    /// Anything else under `.gitgov/`; not preserved, not synced.
    Other,
}

/// Reduce any spelling of a governance path to its `.gitgov/`-relative
/// part.
///
/// Accepted spellings: `.gitgov/tasks/x.json`,
/// `/repo/root/.gitgov/tasks/x.json`, `tasks/x.json`, and
/// `/tmp/gitgov-sync-abc/tasks/x.json` (scratch copies carry the
/// [`TEMP_DIR_PREFIX`] marker).
pub fn relative_part(path: &Path) -> PathBuf {
    let comps: Vec<&str> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(os) => os.to_str(),
            _ => None,
        })
        .collect();

    let start = comps
        .iter()
        .rposition(|c| *c == GITGOV_DIR || c.starts_with(TEMP_DIR_PREFIX))
        .map(|i| i + 1)
        .unwrap_or(0);

    comps[start..].iter().collect()
}

/// Classify one file.
pub fn classify(path: &Path) -> FileClass {
    let rel = relative_part(path);
    let name = match rel.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return FileClass::Other,
    };

    if LOCAL_ONLY_FILES.contains(&name) {
        return FileClass::LocalOnly;
    }
    if EXCLUDED.iter().any(|re| re.is_match(name)) {
        return FileClass::ExcludedSensitive;
    }

    let comps: Vec<&str> = rel.iter().filter_map(|c| c.to_str()).collect();
    match comps.as_slice() {
        [root] if SYNC_ROOT_FILES.contains(root) => FileClass::SyncableRoot,
        [dir, _name] if SYNC_DIRECTORIES.contains(dir) && has_allowed_extension(&rel) => {
            FileClass::SyncableRecord
        },
        _ => FileClass::Other,
    }
}

/// Whether the file travels to the state branch.
pub fn should_sync(path: &Path) -> bool {
    matches!(
        classify(path),
        FileClass::SyncableRecord | FileClass::SyncableRoot
    )
}

/// Whether the file must be preserved across branch switches without ever
/// being committed to the state branch.
pub fn is_preserved(path: &Path) -> bool {
    matches!(
        classify(path),
        FileClass::LocalOnly | FileClass::ExcludedSensitive
    )
}

fn has_allowed_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| ALLOWED_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

/// The `.gitignore` the state branch ships, excluding everything that must
/// never be committed there.
pub fn state_branch_gitignore() -> String {
    let mut out = String::from("# Local-only and sensitive files never leave this machine.\n");
    for name in &LOCAL_ONLY_FILES {
        out.push_str(name);
        out.push('\n');
    }
    for pat in &SYNC_EXCLUDED_PATTERNS {
        out.push_str(pat);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn classification_table() {
        let cases = [
            ("tasks/1700000000-task-a.json", FileClass::SyncableRecord),
            ("cycles/1700000000-cycle-q3.json", FileClass::SyncableRecord),
            ("actors/human:ada.json", FileClass::SyncableRecord),
            ("config.json", FileClass::SyncableRoot),
            (".session.json", FileClass::LocalOnly),
            ("index.json", FileClass::LocalOnly),
            ("gitgov", FileClass::LocalOnly),
            ("actors/human:ada.key", FileClass::ExcludedSensitive),
            ("tasks/t.json.backup", FileClass::ExcludedSensitive),
            ("tasks/t.json.backup-2023", FileClass::ExcludedSensitive),
            ("tasks/t.tmp", FileClass::ExcludedSensitive),
            ("tasks/t.bak", FileClass::ExcludedSensitive),
            ("tasks/readme.md", FileClass::Other),
            ("unknown-dir/x.json", FileClass::Other),
            ("tasks/nested/too/deep.json", FileClass::Other),
        ];
        for (path, expected) in cases {
            assert_eq!(classify(Path::new(path)), expected, "path: {}", path);
        }
    }

    #[test]
    fn decision_is_prefix_invariant() {
        let spellings = |p: &str| {
            vec![
                PathBuf::from(p),
                Path::new(GITGOV_DIR).join(p),
                Path::new("/repo/root/.gitgov").join(p),
                Path::new("/tmp/gitgov-sync-ab12cd").join(p),
            ]
        };

        for p in [
            "tasks/1700000000-task-a.json",
            "config.json",
            "index.json",
            "actors/human:ada.key",
            "junk/whatever.txt",
        ] {
            let decisions: Vec<FileClass> =
                spellings(p).iter().map(|s| classify(s)).collect();
            assert!(
                decisions.windows(2).all(|w| w[0] == w[1]),
                "inconsistent decisions for {}: {:?}",
                p,
                decisions
            );
        }
    }

    #[test]
    fn local_only_wins_over_sync_root() {
        // `index.json` has the allowed extension and sits at the root, but
        // is machine output and must stay local.
        assert!(!should_sync(Path::new(".gitgov/index.json")));
    }

    #[test]
    fn gitignore_covers_every_preserved_class() {
        let ignore = state_branch_gitignore();
        for name in LOCAL_ONLY_FILES.iter() {
            assert!(ignore.contains(name), "missing {}", name);
        }
        for pat in SYNC_EXCLUDED_PATTERNS.iter() {
            assert!(ignore.contains(pat), "missing {}", pat);
        }
    }
}
