use crate::command::OsCommandRunner;
use crate::config::{resolve_refs, ProvisionConfig, ProvisionConfigBuilder, Settings, SourceMode};
use crate::env::{default_prefix, DEFAULT_UPSTREAM, PGDEV_CONFIG};
use crate::err::ProvisionErr;
use crate::kind::{BuildSystem, Role};
use crate::layout::Layout;
use crate::source::update_tarball;
use crate::topology::Orchestrator;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::info;

/// Build PostgreSQL from source and provision a primary, an optional fdw peer and an
/// optional streaming replica under one prefix.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "pgdev", version, long_about = None)]
pub struct Cli {
    /// root for sources, installations, data directories and activation scripts
    #[arg(long)]
    pub prefix: Option<PathBuf>,

    /// YAML settings file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// build from this .tar.gz instead of git worktrees
    #[arg(long, conflicts_with = "repo")]
    pub source: Option<PathBuf>,

    /// shared repository the worktrees are created from [default: <prefix>/source/postgres]
    #[arg(long)]
    pub repo: Option<PathBuf>,

    /// upstream repository URL
    #[arg(long)]
    pub upstream: Option<String>,

    #[arg(long)]
    pub branch: Option<String>,
    #[arg(long)]
    pub tag: Option<String>,

    #[arg(long)]
    pub primary_branch: Option<String>,
    #[arg(long)]
    pub primary_tag: Option<String>,
    #[arg(long)]
    pub fdw_branch: Option<String>,
    #[arg(long)]
    pub fdw_tag: Option<String>,
    #[arg(long)]
    pub replica_branch: Option<String>,
    #[arg(long)]
    pub replica_tag: Option<String>,

    /// glob of patch files applied with `git am`
    #[arg(long)]
    pub patch: Option<String>,

    #[arg(long, value_enum)]
    pub build_system: Option<BuildSystem>,

    /// extra `meson setup` flags, whitespace separated
    #[arg(long, allow_hyphen_values = true)]
    pub meson_flags: Option<String>,

    /// extra `./configure` flags, whitespace separated
    #[arg(long, allow_hyphen_values = true)]
    pub configure_flags: Option<String>,

    #[arg(long)]
    pub create_fdw: bool,

    #[arg(long)]
    pub create_replica: bool,

    /// reuse the existing installations and only reset the clusters
    #[arg(long)]
    pub skip_build: bool,

    /// port of the primary, the fdw peer and the replica use +10 and +20
    #[arg(long)]
    pub port: Option<u16>,

    /// database superuser
    #[arg(long)]
    pub user: Option<String>,

    /// log the output of every command
    #[arg(long)]
    pub capture_output: bool,

    /// clone upstream and write it as a fresh source tarball to this path, then exit
    #[arg(long, exclusive = true)]
    pub update_tarball: Option<PathBuf>,
}

impl Cli {
    /// the settings file named by `--config` or `PGDEV_CONFIG`, if any
    pub fn settings(&self) -> Result<Settings, ProvisionErr> {
        match self.config.as_ref().or(PGDEV_CONFIG.as_ref()) {
            Some(path) => Settings::load(path),
            None => Ok(Settings::default()),
        }
    }

    /// Merge the command line over `settings`.  Anything neither names falls back to the
    /// environment and then to the built in defaults.
    pub fn provision_config(&self, settings: &Settings) -> Result<ProvisionConfig, ProvisionErr> {
        let prefix = match self.prefix.as_ref().or(settings.prefix.as_ref()) {
            Some(prefix) => absolute(prefix)?,
            None => default_prefix()?,
        };

        let upstream = self
            .upstream
            .clone()
            .or(settings.upstream.clone())
            .unwrap_or(DEFAULT_UPSTREAM.to_string());

        let source = match &self.source {
            Some(archive) => SourceMode::Archive {
                archive: absolute(archive)?,
            },
            None => SourceMode::Worktree {
                repo: match self.repo.as_ref().or(settings.repo.as_ref()) {
                    Some(repo) => absolute(repo)?,
                    None => Layout::new(prefix.clone()).default_repo(),
                },
                upstream,
            },
        };

        let build_system = self
            .build_system
            .or(settings.build_system)
            .unwrap_or_default();
        let flags = match build_system {
            BuildSystem::Meson => self.meson_flags.as_ref().or(settings.meson_flags.as_ref()),
            BuildSystem::Make => self
                .configure_flags
                .as_ref()
                .or(settings.configure_flags.as_ref()),
        };
        let build_flags: Vec<String> = flags
            .map(|flags| flags.split_whitespace().map(|flag| flag.to_string()).collect())
            .unwrap_or_default();

        let refs = resolve_refs(
            (self.branch.clone(), self.tag.clone()),
            vec![
                (
                    Role::Primary,
                    self.primary_branch.clone(),
                    self.primary_tag.clone(),
                ),
                (Role::Fdw, self.fdw_branch.clone(), self.fdw_tag.clone()),
                (
                    Role::Replica,
                    self.replica_branch.clone(),
                    self.replica_tag.clone(),
                ),
            ],
        )?;

        let mut builder = ProvisionConfigBuilder::default();
        builder
            .prefix(prefix)
            .source(source)
            .refs(refs)
            .patch(self.patch.clone())
            .build_system(build_system)
            .build_flags(build_flags)
            .create_fdw(self.create_fdw)
            .create_replica(self.create_replica)
            .skip_build(self.skip_build)
            .capture_output(self.capture_output);
        if let Some(port) = self.port.or(settings.port) {
            builder.port(port);
        }
        if let Some(user) = self.user.as_ref().or(settings.user.as_ref()) {
            builder.user(user.clone());
        }
        if let Some(readiness) = &settings.readiness {
            builder.readiness(readiness.clone());
        }
        builder.build()
    }
}

fn absolute(path: &Path) -> Result<PathBuf, ProvisionErr> {
    Ok(std::path::absolute(path)?)
}

/// everything the binary does once the command line is parsed
pub async fn run(cli: Cli) -> Result<(), ProvisionErr> {
    let settings = cli.settings()?;

    if let Some(dest) = &cli.update_tarball {
        let upstream = settings
            .upstream
            .clone()
            .unwrap_or(DEFAULT_UPSTREAM.to_string());
        let runner = OsCommandRunner::new(cli.capture_output);
        return update_tarball(&runner, &upstream, &absolute(dest)?).await;
    }

    let config = cli.provision_config(&settings)?;
    info!("provisioning {:?} under {}", config.roles(), config.prefix.display());

    let runner = OsCommandRunner::new(config.capture_output);
    let provisioned = Orchestrator::new(&config, &runner).run().await?;

    let layout = config.layout();
    for instance in provisioned.topology.instances() {
        info!(
            "[{}] port {}, data {}, activate with: source {}",
            instance.role,
            instance.port,
            instance.data_dir.display(),
            layout.activate_script(instance.role).display()
        );
    }
    Ok(())
}

#[cfg(test)]
pub mod test {
    use crate::cli::Cli;
    use crate::config::{Settings, SourceMode};
    use crate::err::ProvisionErr;
    use crate::kind::{BuildSystem, GitRef, Role};
    use clap::Parser;
    use std::path::PathBuf;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("pgdev").chain(args.iter().copied())).unwrap()
    }

    #[test]
    pub fn worktree_defaults() {
        let cli = parse(&["--prefix", "/opt/pg", "--tag", "v16.1", "--create-replica"]);
        let config = cli.provision_config(&Settings::default()).unwrap();
        assert_eq!(config.prefix, PathBuf::from("/opt/pg"));
        assert_eq!(
            config.source,
            SourceMode::Worktree {
                repo: PathBuf::from("/opt/pg/source/postgres"),
                upstream: "https://github.com/postgres/postgres.git".to_string(),
            }
        );
        assert_eq!(config.roles(), vec![Role::Primary, Role::Replica]);
        assert_eq!(config.git_ref(Role::Replica), Some(&GitRef::Tag("v16.1".to_string())));
        assert_eq!(config.port, 5432);
        assert_eq!(config.build_system, BuildSystem::Meson);
    }

    #[test]
    pub fn command_line_wins_over_settings() {
        let settings = Settings::parse(
            "prefix: /srv/pg\nport: 6000\nuser: admin\nbuild_system: make\nconfigure_flags: \"--enable-debug --enable-cassert\"\n",
        )
        .unwrap();

        let config = parse(&["--source", "/tmp/postgres.tar.gz"])
            .provision_config(&settings)
            .unwrap();
        assert_eq!(config.prefix, PathBuf::from("/srv/pg"));
        assert_eq!(config.port, 6000);
        assert_eq!(config.user, "admin");
        assert_eq!(config.build_system, BuildSystem::Make);
        assert_eq!(config.build_flags, vec!["--enable-debug", "--enable-cassert"]);
        assert!(matches!(config.source, SourceMode::Archive { .. }));

        let config = parse(&["--port", "7000", "--build-system", "meson", "--meson-flags", "-Dcassert=true"])
            .provision_config(&settings)
            .unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.build_system, BuildSystem::Meson);
        assert_eq!(config.build_flags, vec!["-Dcassert=true"]);
    }

    #[test]
    pub fn conflicting_refs_are_rejected() {
        let cli = parse(&["--prefix", "/opt/pg", "--branch", "master", "--tag", "v16.1"]);
        let err = cli.provision_config(&Settings::default()).unwrap_err();
        assert!(matches!(err, ProvisionErr::Config(_)));

        let cli = parse(&["--prefix", "/opt/pg", "--fdw-branch", "a", "--fdw-tag", "b"]);
        assert!(cli.provision_config(&Settings::default()).is_err());
    }

    #[test]
    pub fn update_tarball_stands_alone() {
        assert!(Cli::try_parse_from(["pgdev", "--update-tarball", "/tmp/pg.tar.gz"]).is_ok());
        assert!(
            Cli::try_parse_from(["pgdev", "--update-tarball", "/tmp/pg.tar.gz", "--create-fdw"])
                .is_err()
        );
        assert!(Cli::try_parse_from(["pgdev", "--source", "a.tar.gz", "--repo", "/r"]).is_err());
    }

    #[test]
    pub fn overflowing_port() {
        let cli = parse(&["--prefix", "/opt/pg", "--port", "65530"]);
        assert!(matches!(
            cli.provision_config(&Settings::default()),
            Err(ProvisionErr::Config(_))
        ));
    }
}
