use crate::command::{process_env, Cmd, CommandRunner};
use crate::err::ProvisionErr;
use crate::kind::{BuildSystem, Role};
use std::path::Path;
use tracing::info;

/// Compiles a source tree and installs it into a role's install prefix.
pub struct Builder<'a> {
    runner: &'a dyn CommandRunner,
    system: BuildSystem,
    flags: &'a [String],
}

impl<'a> Builder<'a> {
    pub fn new(runner: &'a dyn CommandRunner, system: BuildSystem, flags: &'a [String]) -> Self {
        Self {
            runner,
            system,
            flags,
        }
    }

    /// A failed step leaves whatever was already installed into `pg_home` in place.
    pub async fn build(&self, role: Role, tree: &Path, pg_home: &Path) -> Result<(), ProvisionErr> {
        info!(
            "[{}] building {} with {} into {}",
            role,
            tree.display(),
            self.system,
            pg_home.display()
        );
        let result = match self.system {
            BuildSystem::Meson => self.meson(tree, pg_home).await,
            BuildSystem::Make => self.make(tree, pg_home).await,
        };
        result.map_err(|err| ProvisionErr::build_err(role, err))
    }

    async fn meson(&self, tree: &Path, pg_home: &Path) -> Result<(), ProvisionErr> {
        let build_dir = tree.join("build");
        if build_dir.exists() {
            tokio::fs::remove_dir_all(&build_dir).await?;
        }

        self.runner
            .run(
                Cmd::new("meson")
                    .args(["setup", "build"])
                    .arg(format!("--prefix={}", pg_home.display()))
                    .args(self.flags)
                    .cwd(tree),
            )
            .await?;
        self.runner
            .run(Cmd::new("ninja").cwd(&build_dir))
            .await?;
        self.runner
            .run(Cmd::new("ninja").arg("install").cwd(&build_dir))
            .await?;
        Ok(())
    }

    async fn make(&self, tree: &Path, pg_home: &Path) -> Result<(), ProvisionErr> {
        let mut env = process_env();
        env.insert("PREFIX".to_string(), pg_home.display().to_string());

        let jobs = std::thread::available_parallelism()
            .map(|jobs| jobs.get())
            .unwrap_or(1);

        self.runner
            .run(
                Cmd::new("./configure")
                    .arg(format!("--prefix={}", pg_home.display()))
                    .args(self.flags)
                    .cwd(tree)
                    .env(&env),
            )
            .await?;
        self.runner
            .run(Cmd::new("make").arg(format!("-j{}", jobs)).cwd(tree).env(&env))
            .await?;
        self.runner
            .run(Cmd::new("make").arg("install").cwd(tree).env(&env))
            .await?;
        Ok(())
    }
}
