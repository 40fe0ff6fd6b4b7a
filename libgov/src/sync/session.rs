// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

//! Working-tree preservation across branch switches.
//!
//! The working tree is the critical section of a sync session. Before the
//! engine switches branches it copies `.gitgov/` out to a per-session
//! scratch directory; on every exit path it lays the preserved files back
//! over the restored working tree. The scratch directory is a scoped
//! resource: dropping the [`TempDir`] deletes it.

use std::{
    collections::BTreeMap,
    fs,
    io,
    path::{Path, PathBuf},
};

use tempfile::TempDir;

use crate::paths::{self, FileClass, GITGOV_DIR, TEMP_DIR_PREFIX};

/// Label of the stash a session takes before switching branches. The
/// session tracks the stash hash; popping is conditional on having stashed.
pub const STASH_LABEL: &str = "gitgov-sync-temp-stash";

/// Copy the entire `.gitgov/` directory into a fresh scratch directory.
///
/// Captures syncable, local-only and excluded files alike: the working
/// branch may `.gitignore` the whole directory, so nothing about it
/// survives a branch switch unless we carry it ourselves.
pub fn preserve_gitgov(repo_root: &Path) -> io::Result<Option<TempDir>> {
    let gitgov = repo_root.join(GITGOV_DIR);
    if !gitgov.exists() {
        return Ok(None);
    }
    let temp = tempfile::Builder::new().prefix(TEMP_DIR_PREFIX).tempdir()?;
    copy_dir_recursive(&gitgov, temp.path())?;
    Ok(Some(temp))
}

pub fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

/// All files under `root`, as paths relative to it.
pub fn list_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    walk(root, Path::new(""), &mut out)?;
    out.sort();
    Ok(out)
}

fn walk(root: &Path, rel: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(root.join(rel))? {
        let entry = entry?;
        let rel = rel.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            walk(root, &rel, out)?;
        } else {
            out.push(rel);
        }
    }
    Ok(())
}

/// Lay every file preserved in `temp` back over `gitgov_dir`.
pub fn overlay_all(temp: &Path, gitgov_dir: &Path) -> io::Result<usize> {
    overlay(temp, gitgov_dir, |_| true)
}

/// Lay only the local-only and excluded-sensitive files back; used when the
/// syncable set was just refreshed from the state branch and must not be
/// clobbered with the stale copies.
pub fn overlay_preserved(temp: &Path, gitgov_dir: &Path) -> io::Result<usize> {
    overlay(temp, gitgov_dir, |rel| {
        matches!(
            paths::classify(rel),
            FileClass::LocalOnly | FileClass::ExcludedSensitive
        )
    })
}

fn overlay<F>(temp: &Path, gitgov_dir: &Path, keep: F) -> io::Result<usize>
where
    F: Fn(&Path) -> bool,
{
    let mut restored = 0;
    for rel in list_files(temp)? {
        if !keep(&rel) {
            continue;
        }
        let target = gitgov_dir.join(&rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(temp.join(&rel), target)?;
        restored += 1;
    }
    Ok(restored)
}

/// Snapshot the contents of every file in `gitgov_dir` matching `keep`,
/// keyed by `.gitgov/`-prefixed repo-relative path.
pub fn snapshot<F>(gitgov_dir: &Path, keep: F) -> io::Result<BTreeMap<String, Vec<u8>>>
where
    F: Fn(&Path) -> bool,
{
    let mut out = BTreeMap::new();
    if !gitgov_dir.exists() {
        return Ok(out);
    }
    for rel in list_files(gitgov_dir)? {
        if !keep(&rel) {
            continue;
        }
        let key = Path::new(GITGOV_DIR).join(&rel);
        out.insert(
            key.to_string_lossy().into_owned(),
            fs::read(gitgov_dir.join(&rel))?,
        );
    }
    Ok(out)
}

/// Write a snapshot back to disk.
pub fn restore_snapshot(
    repo_root: &Path,
    snapshot: &BTreeMap<String, Vec<u8>>,
) -> io::Result<usize> {
    let mut restored = 0;
    for (path, bytes) in snapshot {
        let target = repo_root.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, bytes)?;
        restored += 1;
    }
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn seed_gitgov(root: &Path) {
        let gitgov = root.join(GITGOV_DIR);
        fs::create_dir_all(gitgov.join("tasks")).unwrap();
        fs::create_dir_all(gitgov.join("actors")).unwrap();
        fs::write(gitgov.join("tasks/1700000000-task-a.json"), b"{}").unwrap();
        fs::write(gitgov.join("actors/human:ada.json"), b"{}").unwrap();
        fs::write(gitgov.join("actors/human:ada.key"), b"seed").unwrap();
        fs::write(gitgov.join("config.json"), b"{}").unwrap();
        fs::write(gitgov.join("index.json"), b"{}").unwrap();
        fs::write(gitgov.join(".session.json"), b"{}").unwrap();
    }

    #[test]
    fn preserve_captures_every_class() {
        let dir = tempfile::tempdir().unwrap();
        seed_gitgov(dir.path());

        let temp = preserve_gitgov(dir.path()).unwrap().unwrap();
        let files = list_files(temp.path()).unwrap();
        assert_eq!(files.len(), 6);
        assert!(files.contains(&PathBuf::from("actors/human:ada.key")));
        assert!(files.contains(&PathBuf::from("index.json")));
    }

    #[test]
    fn preserve_without_gitgov_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(preserve_gitgov(dir.path()).unwrap().is_none());
    }

    #[test]
    fn overlay_preserved_keeps_keys_but_not_records() {
        let dir = tempfile::tempdir().unwrap();
        seed_gitgov(dir.path());
        let temp = preserve_gitgov(dir.path()).unwrap().unwrap();

        // Simulate the branch switch wiping the directory.
        let gitgov = dir.path().join(GITGOV_DIR);
        fs::remove_dir_all(&gitgov).unwrap();
        fs::create_dir_all(&gitgov).unwrap();

        let restored = overlay_preserved(temp.path(), &gitgov).unwrap();
        assert_eq!(restored, 3);
        assert!(gitgov.join("actors/human:ada.key").exists());
        assert!(gitgov.join("index.json").exists());
        assert!(gitgov.join(".session.json").exists());
        assert!(!gitgov.join("tasks/1700000000-task-a.json").exists());
        assert!(!gitgov.join("config.json").exists());
    }

    #[test]
    fn snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        seed_gitgov(dir.path());
        let gitgov = dir.path().join(GITGOV_DIR);

        let saved = snapshot(&gitgov, |rel| crate::paths::should_sync(rel)).unwrap();
        assert_eq!(saved.len(), 3);
        assert!(saved.contains_key(".gitgov/tasks/1700000000-task-a.json"));
        assert!(saved.contains_key(".gitgov/config.json"));

        fs::remove_dir_all(&gitgov).unwrap();
        let restored = restore_snapshot(dir.path(), &saved).unwrap();
        assert_eq!(restored, 3);
        assert!(gitgov.join("config.json").exists());
    }
}
