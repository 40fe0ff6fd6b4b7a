// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

//! [`GitAdapter`] bound to the `git` executable.
//!
//! The engine's mutations all touch the working tree (checkout, stash,
//! rebase), where the CLI's refusal to clobber uncommitted changes is a
//! safety net a library binding would have to re-implement. Process
//! spawning is also the natural suspension point model for this adapter:
//! one command, one await-free blocking call.

use std::{
    ffi::OsStr,
    io::Write as _,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use super::{ChangeStatus, CommitInfo, Error, FileChange, GitAdapter, TreeEntry};

#[derive(Clone, Debug)]
pub struct GitCli {
    workdir: PathBuf,
}

impl GitCli {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Bind to `workdir`, verifying it is inside a git repository.
    pub fn open(workdir: impl Into<PathBuf>) -> Result<Self, Error> {
        let this = Self::new(workdir);
        match this.run(&["rev-parse", "--git-dir"]) {
            Ok(_) => Ok(this),
            Err(Error::Command { .. }) => Err(Error::NotARepository(this.workdir)),
            Err(other) => Err(other),
        }
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(&self.workdir).args(args);
        cmd
    }

    fn run_raw<I, S>(&self, args: I) -> Result<(Vec<u8>, String), Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr> + Clone,
    {
        let mut cmd = self.command(args);
        let output = cmd.output().map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                Error::NotAvailable
            } else {
                Error::Io(err)
            }
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            let args = format!("{:?}", cmd).replace('"', "");
            tracing::trace!(%args, %stderr, "git command failed");
            return Err(Error::Command { args, stderr });
        }
        Ok((output.stdout, stderr))
    }

    fn run<I, S>(&self, args: I) -> Result<String, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr> + Clone,
    {
        let (stdout, _) = self.run_raw(args)?;
        String::from_utf8(stdout)
            .map(|s| s.trim().to_string())
            .map_err(|_| Error::Utf8)
    }

    /// Like [`Self::run`], but only reports whether the command succeeded.
    fn succeeds<I, S>(&self, args: I) -> Result<bool, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr> + Clone,
    {
        match self.run(args) {
            Ok(_) => Ok(true),
            Err(Error::Command { .. }) => Ok(false),
            Err(other) => Err(other),
        }
    }

    fn run_with_stdin<I, S>(&self, args: I, stdin: &[u8]) -> Result<String, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = self.command(args);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn().map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                Error::NotAvailable
            } else {
                Error::Io(err)
            }
        })?;
        child
            .stdin
            .as_mut()
            .expect("stdin was piped")
            .write_all(stdin)?;
        let output = child.wait_with_output()?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            let args = format!("{:?}", cmd).replace('"', "");
            return Err(Error::Command { args, stderr });
        }
        String::from_utf8(output.stdout)
            .map(|s| s.trim().to_string())
            .map_err(|_| Error::Utf8)
    }

    fn git_path(&self, name: &str) -> Result<PathBuf, Error> {
        let p = self.run(&["rev-parse", "--git-path", name])?;
        let p = Path::new(&p);
        Ok(if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.workdir.join(p)
        })
    }
}

fn parse_name_status(line: &str) -> Option<FileChange> {
    let mut fields = line.split('\t');
    let status = fields.next()?;
    let status_char = status.chars().next()?;
    // Renames and copies report `R<score>\told\tnew`; the new path is the
    // one that matters downstream.
    let file = match status_char {
        'R' | 'C' => fields.nth(1)?,
        _ => fields.next()?,
    };
    let status = match status_char {
        'A' => ChangeStatus::Added,
        'D' => ChangeStatus::Deleted,
        'M' | 'R' | 'C' | 'T' => ChangeStatus::Modified,
        _ => return None,
    };
    Some(FileChange {
        status,
        file: file.to_string(),
    })
}

impl GitAdapter for GitCli {
    fn current_branch(&self) -> Result<String, Error> {
        // `symbolic-ref` also answers on an unborn branch; `rev-parse`
        // covers detached HEAD.
        match self.run(&["symbolic-ref", "--short", "-q", "HEAD"]) {
            Ok(name) if !name.is_empty() => Ok(name),
            _ => self.run(&["rev-parse", "--abbrev-ref", "HEAD"]),
        }
    }

    fn previous_branch(&self) -> Result<Option<String>, Error> {
        match self.run(&["rev-parse", "--abbrev-ref", "@{-1}"]) {
            Ok(name) if !name.is_empty() && name != "@{-1}" => Ok(Some(name)),
            Ok(_) => Ok(None),
            Err(Error::Command { .. }) => Ok(None),
            Err(other) => Err(other),
        }
    }

    fn repo_root(&self) -> Result<PathBuf, Error> {
        self.run(&["rev-parse", "--show-toplevel"]).map(PathBuf::from)
    }

    fn is_remote_configured(&self, remote: &str) -> Result<bool, Error> {
        let remotes = self.run(&["remote"])?;
        Ok(remotes.lines().any(|r| r.trim() == remote))
    }

    fn has_commits(&self, branch: &str) -> Result<bool, Error> {
        self.succeeds(&["rev-parse", "--verify", "--quiet", branch])
    }

    fn head(&self) -> Result<String, Error> {
        self.run(&["rev-parse", "HEAD"])
    }

    fn is_dirty(&self) -> Result<bool, Error> {
        Ok(!self.run(&["status", "--porcelain"])?.is_empty())
    }

    fn has_tracked_changes(&self) -> Result<bool, Error> {
        let out = self.run(&["status", "--porcelain"])?;
        Ok(out.lines().any(|line| !line.starts_with("??")))
    }

    fn branch_exists(&self, name: &str) -> Result<bool, Error> {
        self.succeeds(&[
            "show-ref",
            "--verify",
            "--quiet",
            &format!("refs/heads/{}", name),
        ])
    }

    fn list_remote_branches(&self, remote: &str) -> Result<Vec<String>, Error> {
        let out = self.run(&["ls-remote", "--heads", remote])?;
        Ok(out
            .lines()
            .filter_map(|line| line.split('\t').nth(1))
            .filter_map(|r| r.strip_prefix("refs/heads/"))
            .map(|s| s.to_string())
            .collect())
    }

    fn create_branch(&self, name: &str, start_point: Option<&str>) -> Result<(), Error> {
        match start_point {
            Some(start) => self.run(&["branch", name, start]).map(drop),
            None => self.run(&["branch", name]).map(drop),
        }
    }

    fn checkout_branch(&self, name: &str) -> Result<(), Error> {
        self.run(&["checkout", name]).map(drop)
    }

    fn checkout_branch_force(&self, name: &str) -> Result<(), Error> {
        self.run(&["checkout", "-f", name]).map(drop)
    }

    fn checkout_orphan_branch(&self, name: &str) -> Result<(), Error> {
        self.run(&["checkout", "--orphan", name]).map(drop)
    }

    fn set_upstream(&self, branch: &str, upstream: &str) -> Result<(), Error> {
        self.run(&[
            "branch",
            &format!("--set-upstream-to={}", upstream),
            branch,
        ])
        .map(drop)
    }

    fn upstream_of(&self, branch: &str) -> Result<Option<String>, Error> {
        match self.run(&[
            "rev-parse",
            "--abbrev-ref",
            "--symbolic-full-name",
            &format!("{}@{{upstream}}", branch),
        ]) {
            Ok(upstream) => Ok(Some(upstream)),
            Err(Error::Command { .. }) => Ok(None),
            Err(other) => Err(other),
        }
    }

    fn fetch(&self, remote: &str) -> Result<(), Error> {
        self.run(&["fetch", remote]).map(drop)
    }

    fn push(&self, remote: &str, branch: &str) -> Result<(), Error> {
        self.run(&["push", remote, branch]).map(drop)
    }

    fn push_with_upstream(&self, remote: &str, branch: &str) -> Result<(), Error> {
        self.run(&["push", "-u", remote, branch]).map(drop)
    }

    fn pull_rebase(&self, remote: &str, branch: &str) -> Result<(), Error> {
        self.run(&["pull", "--rebase", remote, branch]).map(drop)
    }

    fn add(&self, paths: &[&str], force: bool) -> Result<(), Error> {
        let mut args = vec!["add"];
        if force {
            args.push("--force");
        }
        args.push("--");
        args.extend(paths);
        self.run(&args).map(drop)
    }

    fn commit(&self, message: &str) -> Result<String, Error> {
        self.run(&["commit", "-m", message])?;
        self.head()
    }

    fn commit_allow_empty(&self, message: &str) -> Result<String, Error> {
        self.run(&["commit", "--allow-empty", "-m", message])?;
        self.head()
    }

    fn remove_force(&self, paths: &[&str]) -> Result<(), Error> {
        let mut args = vec!["rm", "-f", "--ignore-unmatch", "--"];
        args.extend(paths);
        self.run(&args).map(drop)
    }

    fn unstage(&self, paths: &[&str]) -> Result<(), Error> {
        let mut args = vec!["reset", "HEAD", "--"];
        args.extend(paths);
        // `reset` exits non-zero on an unborn branch; there is nothing
        // staged against HEAD in that case anyway.
        match self.run(&args) {
            Ok(_) => Ok(()),
            Err(Error::Command { .. }) => Ok(()),
            Err(other) => Err(other),
        }
    }

    fn remove_index(&self) -> Result<(), Error> {
        self.run(&["rm", "-rf", "--ignore-unmatch", "--cached", "."])
            .map(drop)
    }

    fn stash(&self, label: &str) -> Result<Option<String>, Error> {
        let out = self.run(&["stash", "push", "--include-untracked", "-m", label])?;
        if out.contains("No local changes to save") {
            return Ok(None);
        }
        self.run(&["rev-parse", "refs/stash"]).map(Some)
    }

    fn stash_pop(&self) -> Result<(), Error> {
        self.run(&["stash", "pop"]).map(drop)
    }

    fn stash_list(&self) -> Result<Vec<String>, Error> {
        let out = self.run(&["stash", "list", "--format=%gs"])?;
        Ok(out.lines().map(|l| l.to_string()).collect())
    }

    fn rebase(&self, onto: &str) -> Result<(), Error> {
        self.run(&["rebase", onto]).map(drop)
    }

    fn rebase_continue(&self) -> Result<(), Error> {
        // `-c core.editor=true` accepts the default commit message instead
        // of waiting on an interactive editor.
        self.run(&["-c", "core.editor=true", "rebase", "--continue"])
            .map(drop)
    }

    fn rebase_abort(&self) -> Result<(), Error> {
        self.run(&["rebase", "--abort"]).map(drop)
    }

    fn is_rebase_in_progress(&self) -> Result<bool, Error> {
        Ok(self.git_path("rebase-merge")?.exists() || self.git_path("rebase-apply")?.exists())
    }

    fn conflicted_files(&self) -> Result<Vec<String>, Error> {
        let out = self.run(&["diff", "--name-only", "--diff-filter=U"])?;
        Ok(out.lines().map(|l| l.to_string()).collect())
    }

    fn staged_files(&self) -> Result<Vec<String>, Error> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(out.lines().map(|l| l.to_string()).collect())
    }

    fn staged_changes(&self) -> Result<Vec<FileChange>, Error> {
        let out = self.run(&["diff", "--cached", "--name-status"])?;
        Ok(out.lines().filter_map(parse_name_status).collect())
    }

    fn changed_files(
        &self,
        from: &str,
        to: &str,
        path_filter: Option<&str>,
    ) -> Result<Vec<FileChange>, Error> {
        let mut args = vec!["diff", "--name-status"];
        let range = format!("{}..{}", from, to);
        args.push(&range);
        if let Some(filter) = path_filter {
            args.push("--");
            args.push(filter);
        }
        let out = self.run(&args)?;
        Ok(out.lines().filter_map(parse_name_status).collect())
    }

    fn commit_history(&self, reference: &str, max: usize) -> Result<Vec<CommitInfo>, Error> {
        let max_arg = format!("--max-count={}", max);
        let out = match self.run(&[
            "log",
            &max_arg,
            "--format=%H%x09%an%x09%aI%x09%s",
            reference,
        ]) {
            Ok(out) => out,
            // Unborn or missing ref: no history.
            Err(Error::Command { .. }) => return Ok(Vec::new()),
            Err(other) => return Err(other),
        };
        Ok(out
            .lines()
            .filter_map(|line| {
                let mut fields = line.splitn(4, '\t');
                Some(CommitInfo {
                    hash: fields.next()?.to_string(),
                    author: fields.next()?.to_string(),
                    date: fields.next()?.to_string(),
                    message: fields.next()?.to_string(),
                })
            })
            .collect())
    }

    fn ls_tree(&self, reference: &str, path_prefix: &str) -> Result<Vec<String>, Error> {
        let out = match self.run(&["ls-tree", "-r", "--name-only", reference, "--", path_prefix]) {
            Ok(out) => out,
            Err(Error::Command { .. }) => return Ok(Vec::new()),
            Err(other) => return Err(other),
        };
        Ok(out.lines().map(|l| l.to_string()).collect())
    }

    fn show_file(&self, reference: &str, path: &str) -> Result<Option<Vec<u8>>, Error> {
        match self.run_raw(&["show", &format!("{}:{}", reference, path)]) {
            Ok((bytes, _)) => Ok(Some(bytes)),
            Err(Error::Command { .. }) => Ok(None),
            Err(other) => Err(other),
        }
    }

    fn checkout_files_from_branch(&self, branch: &str, paths: &[&str]) -> Result<(), Error> {
        let mut args = vec!["checkout", branch, "--"];
        args.extend(paths);
        self.run(&args).map(drop)
    }

    fn hash_object(&self, content: &[u8]) -> Result<String, Error> {
        self.run_with_stdin(&["hash-object", "-w", "--stdin"], content)
    }

    fn mktree(&self, entries: &[TreeEntry]) -> Result<String, Error> {
        let mut input = String::new();
        for entry in entries {
            input.push_str(&format!(
                "{} {} {}\t{}\n",
                entry.mode, entry.kind, entry.oid, entry.name
            ));
        }
        self.run_with_stdin(&["mktree"], input.as_bytes())
    }

    fn commit_tree(&self, tree: &str, parents: &[&str], message: &str) -> Result<String, Error> {
        let mut args = vec!["commit-tree".to_string(), tree.to_string()];
        for parent in parents {
            args.push("-p".to_string());
            args.push((*parent).to_string());
        }
        args.push("-m".to_string());
        args.push(message.to_string());
        self.run(&args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_status_lines_parse() {
        assert_eq!(
            parse_name_status("A\t.gitgov/tasks/t.json"),
            Some(FileChange {
                status: ChangeStatus::Added,
                file: ".gitgov/tasks/t.json".to_string(),
            })
        );
        assert_eq!(
            parse_name_status("R100\told.json\tnew.json"),
            Some(FileChange {
                status: ChangeStatus::Modified,
                file: "new.json".to_string(),
            })
        );
        assert_eq!(parse_name_status(""), None);
        assert_eq!(parse_name_status("U\tconflicted.json"), None);
    }
}
