//! Thin wrappers over the `git` commands the pipeline needs.  Each call goes through a
//! [`CommandRunner`] so it can be scripted in tests.

use crate::command::{Cmd, CmdOutput, CommandRunner};
use crate::err::ProvisionErr;
use crate::kind::GitRef;
use crate::source::refs::FinalRef;
use std::path::{Path, PathBuf};

pub const UPSTREAM: &'static str = "upstream";

/// one entry of `git worktree list --porcelain`
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Worktree {
    pub path: PathBuf,
    pub branch: Option<String>,
    /// commit checked out
    pub head: Option<String>,
    pub bare: bool,
    pub detached: bool,
}

pub fn parse_worktrees(porcelain: &str) -> Vec<Worktree> {
    let mut worktrees = vec![];
    let mut current: Option<Worktree> = None;
    for line in porcelain.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            if let Some(worktree) = current.take() {
                worktrees.push(worktree);
            }
            continue;
        }
        let (key, value) = match line.split_once(' ') {
            Some((key, value)) => (key, value),
            None => (line, ""),
        };
        match key {
            "worktree" => {
                if let Some(worktree) = current.take() {
                    worktrees.push(worktree);
                }
                current = Some(Worktree {
                    path: PathBuf::from(value),
                    ..Default::default()
                });
            }
            "HEAD" => {
                if let Some(worktree) = current.as_mut() {
                    worktree.head = Some(value.to_string());
                }
            }
            "branch" => {
                if let Some(worktree) = current.as_mut() {
                    let branch = value.strip_prefix("refs/heads/").unwrap_or(value);
                    worktree.branch = Some(branch.to_string());
                }
            }
            "bare" => {
                if let Some(worktree) = current.as_mut() {
                    worktree.bare = true;
                }
            }
            "detached" => {
                if let Some(worktree) = current.as_mut() {
                    worktree.detached = true;
                }
            }
            _ => {}
        }
    }
    if let Some(worktree) = current.take() {
        worktrees.push(worktree);
    }
    worktrees
}

/// `git` run against one directory (a repository or a worktree)
pub struct Git<'a> {
    runner: &'a dyn CommandRunner,
    dir: PathBuf,
}

impl<'a> Git<'a> {
    pub fn new(runner: &'a dyn CommandRunner, dir: &Path) -> Self {
        Self {
            runner,
            dir: dir.to_path_buf(),
        }
    }

    fn cmd(&self) -> Cmd {
        Cmd::new("git").cwd(&self.dir)
    }

    async fn run(&self, cmd: Cmd) -> Result<CmdOutput, ProvisionErr> {
        self.runner.run(cmd).await
    }

    /// a bare clone: it has no checkout of its own so every branch is free for worktrees
    pub async fn clone_bare(
        runner: &dyn CommandRunner,
        url: &str,
        dest: &Path,
    ) -> Result<(), ProvisionErr> {
        runner
            .run(
                Cmd::new("git")
                    .args(["clone", "--bare", url])
                    .arg(dest.display().to_string()),
            )
            .await?;
        Ok(())
    }

    pub async fn clone_repo(
        runner: &dyn CommandRunner,
        url: &str,
        dest: &Path,
    ) -> Result<(), ProvisionErr> {
        runner
            .run(
                Cmd::new("git")
                    .args(["clone", url])
                    .arg(dest.display().to_string()),
            )
            .await?;
        Ok(())
    }

    pub async fn remotes(&self) -> Result<Vec<String>, ProvisionErr> {
        let out = self.run(self.cmd().arg("remote")).await?;
        Ok(out
            .stdout
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    pub async fn add_remote(&self, name: &str, url: &str) -> Result<(), ProvisionErr> {
        self.run(self.cmd().args(["remote", "add", name, url])).await?;
        Ok(())
    }

    pub async fn fetch(&self, remote: &str) -> Result<(), ProvisionErr> {
        self.run(self.cmd().args(["fetch", remote, "--tags"])).await?;
        Ok(())
    }

    /// the commit `tag` points at, `None` when the tag is unknown
    pub async fn tag_commit(&self, tag: &str) -> Result<Option<String>, ProvisionErr> {
        let out = self
            .run(
                self.cmd()
                    .args(["rev-parse", "--verify", "--quiet"])
                    .arg(format!("refs/tags/{}^{{commit}}", tag))
                    .best_effort(),
            )
            .await?;
        let commit = out.stdout.trim();
        Ok(match out.success() && !commit.is_empty() {
            true => Some(commit.to_string()),
            false => None,
        })
    }

    pub async fn worktrees(&self) -> Result<Vec<Worktree>, ProvisionErr> {
        let out = self
            .run(self.cmd().args(["worktree", "list", "--porcelain"]))
            .await?;
        Ok(parse_worktrees(&out.stdout))
    }

    pub async fn remove_worktree(&self, path: &Path) -> Result<(), ProvisionErr> {
        self.run(
            self.cmd()
                .args(["worktree", "remove", "--force"])
                .arg(path.display().to_string())
                .best_effort(),
        )
        .await?;
        self.run(self.cmd().args(["worktree", "prune"])).await?;
        Ok(())
    }

    pub async fn local_branches(&self) -> Result<Vec<String>, ProvisionErr> {
        let out = self
            .run(
                self.cmd()
                    .args(["branch", "--list", "--format=%(refname:short)"]),
            )
            .await?;
        Ok(out
            .stdout
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    pub async fn delete_branch(&self, name: &str) -> Result<(), ProvisionErr> {
        self.run(self.cmd().args(["branch", "-D", name])).await?;
        Ok(())
    }

    /// create the worktree at `path` on `final_ref`
    pub async fn add_worktree(
        &self,
        path: &Path,
        final_ref: &FinalRef,
        local_branches: &[String],
    ) -> Result<(), ProvisionErr> {
        let path = path.display().to_string();
        let cmd = self.cmd().args(["worktree", "add"]);
        let cmd = match final_ref {
            FinalRef::Direct(GitRef::Branch(branch)) => {
                if local_branches.contains(branch) {
                    cmd.arg(path).arg(branch)
                } else {
                    cmd.args(["--track", "-b"])
                        .arg(branch)
                        .arg(path)
                        .arg(format!("{}/{}", UPSTREAM, branch))
                }
            }
            FinalRef::Direct(GitRef::Tag(tag)) => cmd
                .arg("--detach")
                .arg(path)
                .arg(format!("refs/tags/{}", tag)),
            FinalRef::Derived {
                base: GitRef::Branch(branch),
                name,
                ..
            } => cmd
                .args(["--track", "-b"])
                .arg(name)
                .arg(path)
                .arg(format!("{}/{}", UPSTREAM, branch)),
            FinalRef::Derived {
                base: GitRef::Tag(tag),
                name,
                ..
            } => cmd
                .args(["-b"])
                .arg(name)
                .arg(path)
                .arg(format!("refs/tags/{}", tag)),
        };
        self.run(cmd).await?;
        Ok(())
    }

    pub async fn checkout(&self, target: &str) -> Result<(), ProvisionErr> {
        self.run(self.cmd().args(["checkout", target])).await?;
        Ok(())
    }

    pub async fn pull(&self) -> Result<(), ProvisionErr> {
        self.run(self.cmd().arg("pull")).await?;
        Ok(())
    }

    /// fast forward a worktree branch to upstream, a diverged branch is left alone
    pub async fn pull_upstream(&self, branch: &str) -> Result<(), ProvisionErr> {
        self.run(
            self.cmd()
                .args(["pull", "--ff-only", UPSTREAM, branch])
                .best_effort(),
        )
        .await?;
        Ok(())
    }

    pub async fn am(&self, patch: &Path) -> Result<(), ProvisionErr> {
        self.run(self.cmd().arg("am").arg(patch.display().to_string()))
            .await?;
        Ok(())
    }
}
