use crate::command::CommandRunner;
use crate::err::ProvisionErr;
use crate::source::git::Git;
use itertools::Itertools;
use std::path::{Path, PathBuf};
use tracing::info;

/// the files matched by `pattern`, sorted
pub fn matching(pattern: &str) -> Result<Vec<PathBuf>, ProvisionErr> {
    let paths = glob::glob(pattern)
        .map_err(|err| ProvisionErr::Patch(format!("invalid pattern '{}': {}", pattern, err)))?;
    let mut patches = vec![];
    for path in paths.filter_map(|entry| entry.ok()).sorted() {
        if path.is_file() {
            patches.push(std::path::absolute(&path)?);
        }
    }
    Ok(patches)
}

pub struct PatchApplier<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> PatchApplier<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Apply every patch matched by `pattern` to `tree` with `git am`, in order.  Returns
    /// the applied patches; nothing happens without a pattern, and a blank pattern
    /// matches nothing.
    pub async fn apply(
        &self,
        tree: &Path,
        pattern: Option<&str>,
    ) -> Result<Vec<PathBuf>, ProvisionErr> {
        let pattern = match pattern {
            Some(pattern) => pattern,
            None => return Ok(vec![]),
        };

        let patches = match pattern.trim().is_empty() {
            true => vec![],
            false => matching(pattern)?,
        };
        if patches.is_empty() {
            return Err(ProvisionErr::no_patches_matched(pattern));
        }

        let git = Git::new(self.runner, tree);
        for patch in &patches {
            info!("Applying patch {}", patch.display());
            git.am(patch)
                .await
                .map_err(|err| ProvisionErr::patch_failed(patch, err))?;
        }
        Ok(patches)
    }
}
