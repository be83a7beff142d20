use crate::kind::GitRef;
use crate::source::git::Worktree;
use std::path::{Path, PathBuf};

/// whether a ref is already checked out by another worktree of the repository
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RefState {
    Free,
    /// bound to the worktree at this path
    Bound(PathBuf),
}

/// what the worktree for a role will actually be created on
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FinalRef {
    /// the requested ref, checked out as is
    Direct(GitRef),
    /// the requested ref is bound elsewhere: a new branch `name` starting at `base`.
    /// `delete_stale` is set when a local branch of that name is left over and must
    /// be deleted before it is recreated
    Derived {
        base: GitRef,
        name: String,
        delete_stale: bool,
    },
}

impl FinalRef {
    /// name of the ref the worktree ends up on
    pub fn name(&self) -> &str {
        match self {
            FinalRef::Direct(git_ref) => git_ref.name(),
            FinalRef::Derived { name, .. } => name.as_str(),
        }
    }
}

/// State of `requested` among `worktrees`, skipping the worktree at `target` (the one
/// about to be replaced) and the bare repository.  A branch is bound by the worktree
/// that has it checked out.  A tag is bound by a detached worktree sitting on
/// `tag_commit`, the commit the tag points at.
pub fn ref_state(
    requested: &GitRef,
    worktrees: &[Worktree],
    target: &Path,
    tag_commit: Option<&str>,
) -> RefState {
    worktrees
        .iter()
        .filter(|worktree| !worktree.bare && worktree.path != target)
        .find(|worktree| match requested {
            GitRef::Branch(branch) => worktree.branch.as_deref() == Some(branch.as_str()),
            GitRef::Tag(_) => {
                worktree.detached
                    && tag_commit.is_some()
                    && worktree.head.as_deref() == tag_commit
            }
        })
        .map_or(RefState::Free, |worktree| {
            RefState::Bound(worktree.path.clone())
        })
}

/// the branch name substituted for `requested` when it is bound elsewhere
pub fn derived_name(requested: &GitRef, suffix: &str) -> String {
    format!("{}_{}", requested.name(), suffix)
}

/// Decide which ref a worktree is created on.  Pure: the caller gathers `state` and the
/// local branch names and carries out the decision.
pub fn resolve_ref(
    requested: &GitRef,
    state: &RefState,
    suffix: &str,
    local_branches: &[String],
) -> FinalRef {
    match state {
        RefState::Free => FinalRef::Direct(requested.clone()),
        RefState::Bound(_) => {
            let name = derived_name(requested, suffix);
            let delete_stale = local_branches.iter().any(|branch| *branch == name);
            FinalRef::Derived {
                base: requested.clone(),
                name,
                delete_stale,
            }
        }
    }
}
