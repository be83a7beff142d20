//! Source acquisition: every role gets its own tree under `<prefix>/source/src_<role>`,
//! either extracted from a tarball or checked out as a git worktree of one shared
//! repository.

pub mod archive;
pub mod git;
pub mod refs;

use crate::command::CommandRunner;
use crate::config::{ProvisionConfig, SourceMode};
use crate::err::ProvisionErr;
use crate::kind::{GitRef, Role};
use crate::source::git::{Git, UPSTREAM};
use crate::source::refs::{ref_state, resolve_ref, FinalRef, RefState};
use std::path::{Path, PathBuf};
use tempdir::TempDir;
use tracing::{info, warn};

/// a source tree ready to be patched and built
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SourceRef {
    Extracted { tree: PathBuf },
    Worktree { tree: PathBuf, final_ref: FinalRef },
}

impl SourceRef {
    pub fn tree(&self) -> &Path {
        match self {
            SourceRef::Extracted { tree } => tree,
            SourceRef::Worktree { tree, .. } => tree,
        }
    }
}

pub struct SourceProvider<'a> {
    config: &'a ProvisionConfig,
    runner: &'a dyn CommandRunner,
}

impl<'a> SourceProvider<'a> {
    pub fn new(config: &'a ProvisionConfig, runner: &'a dyn CommandRunner) -> Self {
        Self { config, runner }
    }

    pub async fn resolve(&self, role: Role) -> Result<SourceRef, ProvisionErr> {
        let result = match &self.config.source {
            SourceMode::Archive { archive } => self.extract(role, archive).await,
            SourceMode::Worktree { repo, upstream } => self.worktree(role, repo, upstream).await,
        };
        result.map_err(|err| match err {
            ProvisionErr::Command { .. } | ProvisionErr::Io(_) => {
                ProvisionErr::source_err(role, err)
            }
            err => err,
        })
    }

    async fn extract(&self, role: Role, archive: &Path) -> Result<SourceRef, ProvisionErr> {
        let target = self.config.layout().source_dir(role);
        if target.exists() {
            tokio::fs::remove_dir_all(&target).await?;
        }
        tokio::fs::create_dir_all(&target).await?;

        let tree = archive::extract(role, archive, &target)?;

        if let Some(git_ref) = self.config.git_ref(role) {
            if tree.join(".git").exists() {
                info!("[{}] checking out {} in {}", role, git_ref, tree.display());
                let git = Git::new(self.runner, &tree);
                git.checkout(&git_ref.checkout_target())
                    .await
                    .map_err(|err| ProvisionErr::ref_err(role, err))?;
                if !git_ref.is_tag() {
                    git.pull().await?;
                }
            } else {
                warn!(
                    "[{}] extracted tree is not a git checkout, ignoring {}",
                    role, git_ref
                );
            }
        }

        Ok(SourceRef::Extracted { tree })
    }

    async fn worktree(
        &self,
        role: Role,
        repo: &Path,
        upstream: &str,
    ) -> Result<SourceRef, ProvisionErr> {
        let requested = self
            .config
            .git_ref(role)
            .ok_or_else(|| ProvisionErr::missing_ref(role))?;

        self.ensure_repo(repo, upstream).await?;
        let git = Git::new(self.runner, repo);

        let target = self.config.layout().source_dir(role);
        git.remove_worktree(&target).await?;
        if target.exists() {
            tokio::fs::remove_dir_all(&target).await?;
        }

        let worktrees = git.worktrees().await?;
        let tag_commit = match requested {
            GitRef::Tag(tag) => git.tag_commit(tag).await?,
            GitRef::Branch(_) => None,
        };
        let state = ref_state(requested, &worktrees, &target, tag_commit.as_deref());
        if let RefState::Bound(owner) = &state {
            info!(
                "[{}] {} is checked out at {}",
                role,
                requested,
                owner.display()
            );
        }
        let local_branches = git.local_branches().await?;
        let final_ref = resolve_ref(requested, &state, role.as_str(), &local_branches);

        if let FinalRef::Derived {
            name,
            delete_stale: true,
            ..
        } = &final_ref
        {
            info!("[{}] deleting stale branch '{}'", role, name);
            git.delete_branch(name).await?;
        }

        info!(
            "[{}] creating worktree {} on '{}'",
            role,
            target.display(),
            final_ref.name()
        );
        git.add_worktree(&target, &final_ref, &local_branches)
            .await?;

        if let FinalRef::Direct(GitRef::Branch(branch)) = &final_ref {
            Git::new(self.runner, &target).pull_upstream(branch).await?;
        }

        Ok(SourceRef::Worktree {
            tree: target,
            final_ref,
        })
    }

    /// clone `upstream` into `repo` when absent, register the upstream remote and fetch it
    async fn ensure_repo(&self, repo: &Path, upstream: &str) -> Result<(), ProvisionErr> {
        if !repo.exists() {
            if let Some(parent) = repo.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            info!("Cloning {} into {}", upstream, repo.display());
            Git::clone_bare(self.runner, upstream, repo).await?;
        }

        let git = Git::new(self.runner, repo);
        if !git.remotes().await?.iter().any(|remote| remote == UPSTREAM) {
            git.add_remote(UPSTREAM, upstream).await?;
        }
        git.fetch(UPSTREAM).await
    }
}

/// Clone `upstream` into a scratch directory and pack it as `postgres/` into the
/// tarball at `dest`.
pub async fn update_tarball(
    runner: &dyn CommandRunner,
    upstream: &str,
    dest: &Path,
) -> Result<(), ProvisionErr> {
    let scratch = TempDir::new("pgdev")?;
    let checkout = scratch.path().join("postgres");
    info!("Cloning {} to refresh {}", upstream, dest.display());
    Git::clone_repo(runner, upstream, &checkout).await?;
    archive::pack(&checkout, "postgres", dest)?;
    info!("Wrote {}", dest.display());
    Ok(())
}
