//! Planning and assembly of the instances of one run: a primary, an optional foreign
//! data wrapper peer and an optional streaming replica of the primary.

use crate::activate::{find_bsd_indent, Activation};
use crate::builder::Builder;
use crate::cluster::status::Phase;
use crate::cluster::Cluster;
use crate::command::CommandRunner;
use crate::config::ProvisionConfig;
use crate::err::ProvisionErr;
use crate::kind::Role;
use crate::patch::PatchApplier;
use crate::source::SourceProvider;
use std::collections::BTreeMap;
use std::path::PathBuf;
use strum::IntoEnumIterator;
use tracing::{info, warn};

/// one planned server
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instance {
    pub role: Role,
    pub port: u16,
    pub pg_home: PathBuf,
    pub data_dir: PathBuf,
    pub source_dir: PathBuf,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Topology {
    instances: Vec<Instance>,
}

impl Topology {
    pub fn plan(config: &ProvisionConfig) -> Result<Self, ProvisionErr> {
        let layout = config.layout();
        let mut instances = vec![];
        for role in config.roles() {
            let port = config.port.checked_add(role.port_offset()).ok_or_else(|| {
                ProvisionErr::config_err(format!(
                    "{} port overflows: base port {} + {}",
                    role,
                    config.port,
                    role.port_offset()
                ))
            })?;
            instances.push(Instance {
                role,
                port,
                pg_home: layout.pg_home(role),
                data_dir: layout.pg_data(role),
                source_dir: layout.source_dir(role),
            });
        }
        Ok(Self { instances })
    }

    /// instances in provisioning order
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn instance(&self, role: Role) -> Option<&Instance> {
        self.instances.iter().find(|instance| instance.role == role)
    }

    /// the role `role` is cloned from, only a replica has one
    pub fn upstream_of(role: Role) -> Option<Role> {
        match role {
            Role::Replica => Some(Role::Primary),
            _ => None,
        }
    }
}

/// outcome of a successful run
#[derive(Debug)]
pub struct Provisioned {
    pub topology: Topology,
    pub phases: BTreeMap<Role, Phase>,
    /// stops that could not be completed
    pub warnings: Vec<ProvisionErr>,
}

pub struct Orchestrator<'a> {
    config: &'a ProvisionConfig,
    runner: &'a dyn CommandRunner,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a ProvisionConfig, runner: &'a dyn CommandRunner) -> Self {
        Self { config, runner }
    }

    /// Provision every requested role in order.  The first fatal error aborts the run;
    /// instances already running are left running.
    pub async fn run(&self) -> Result<Provisioned, ProvisionErr> {
        let topology = Topology::plan(self.config)?;
        let mut clusters: Vec<Cluster<'a>> = vec![];
        let mut warnings = vec![];

        if self.config.skip_build {
            self.reset_unrequested(&topology, &mut warnings).await?;
        }

        for instance in topology.instances() {
            info!(
                "[{}] provisioning on port {} into {}",
                instance.role,
                instance.port,
                instance.pg_home.display()
            );
            self.install(instance).await?;

            let mut cluster = Cluster::new(
                self.runner,
                instance.role,
                instance.port,
                &self.config.user,
                instance.pg_home.clone(),
                instance.data_dir.clone(),
            );
            keep_warnings(&mut warnings, cluster.stop().await)?;

            match Topology::upstream_of(instance.role) {
                Some(upstream) => {
                    let primary = clusters
                        .iter()
                        .find(|cluster| cluster.role() == upstream)
                        .ok_or_else(|| {
                            ProvisionErr::replica_err(format!(
                                "no {} cluster to clone {} from",
                                upstream, instance.role
                            ))
                        })?;
                    primary.wait_ready(&self.config.readiness).await?;
                    cluster.bootstrap_replica(primary).await?;
                }
                None => {
                    cluster.initialize().await?;
                    cluster
                        .configure_parameter("port", &instance.port.to_string())
                        .await?;
                    cluster
                        .configure_parameter("logging_collector", "'on'")
                        .await?;
                    cluster.start().await?;
                }
            }

            self.activate(instance).await?;
            info!("[{}] running on port {}", instance.role, instance.port);
            clusters.push(cluster);
        }

        if !warnings.is_empty() {
            warn!("{} stop warning(s) during provisioning", warnings.len());
        }
        let phases = clusters
            .iter()
            .map(|cluster| (cluster.role(), cluster.phase()))
            .collect();
        Ok(Provisioned {
            topology,
            phases,
            warnings,
        })
    }

    /// Stop the clusters of roles this run does not provision and empty their data
    /// directories, so nothing from an earlier run keeps streaming from a primary that
    /// is about to be reinitialized.
    async fn reset_unrequested(
        &self,
        topology: &Topology,
        warnings: &mut Vec<ProvisionErr>,
    ) -> Result<(), ProvisionErr> {
        let layout = self.config.layout();
        for role in Role::iter().filter(|role| topology.instance(*role).is_none()) {
            let data_dir = layout.pg_data(role);
            if !data_dir.exists() {
                continue;
            }
            let port = self
                .config
                .port
                .checked_add(role.port_offset())
                .ok_or_else(|| ProvisionErr::config_err(format!("{} port overflows", role)))?;
            let mut cluster = Cluster::new(
                self.runner,
                role,
                port,
                &self.config.user,
                layout.pg_home(role),
                data_dir,
            );
            keep_warnings(warnings, cluster.stop().await)?;
            cluster
                .reset_data_dir()
                .await
                .map_err(|err| ProvisionErr::init_err(role, err))?;
        }
        Ok(())
    }

    /// resolve, patch and build the sources of `instance`, or with `skip_build` make sure
    /// an earlier run left an installation behind
    async fn install(&self, instance: &Instance) -> Result<(), ProvisionErr> {
        if self.config.skip_build {
            if !instance.pg_home.join("bin").is_dir() {
                return Err(ProvisionErr::missing_installation(
                    instance.role,
                    instance.pg_home.clone(),
                ));
            }
            info!(
                "[{}] skipping build, using {}",
                instance.role,
                instance.pg_home.display()
            );
            return Ok(());
        }

        let source = SourceProvider::new(self.config, self.runner)
            .resolve(instance.role)
            .await?;
        PatchApplier::new(self.runner)
            .apply(source.tree(), self.config.patch.as_deref())
            .await?;
        Builder::new(
            self.runner,
            self.config.build_system,
            &self.config.build_flags,
        )
        .build(instance.role, source.tree(), &instance.pg_home)
        .await
    }

    async fn activate(&self, instance: &Instance) -> Result<(), ProvisionErr> {
        let activation = Activation {
            role: instance.role,
            pg_home: instance.pg_home.clone(),
            data_dir: instance.data_dir.clone(),
            port: instance.port,
            user: self.config.user.clone(),
            bsd_indent: find_bsd_indent(&instance.source_dir),
        };
        activation
            .write(&self.config.layout().activate_script(instance.role))
            .await?;
        Ok(())
    }
}

/// stop warnings are collected, anything else stopping a cluster produced aborts the run
fn keep_warnings(
    warnings: &mut Vec<ProvisionErr>,
    found: Vec<ProvisionErr>,
) -> Result<(), ProvisionErr> {
    for warning in found {
        if warning.is_fatal() {
            return Err(warning);
        }
        warnings.push(warning);
    }
    Ok(())
}

#[cfg(test)]
pub mod test {
    use crate::cluster::conf::parameter;
    use crate::cluster::status::Phase;
    use crate::command::CmdOutput;
    use crate::config::{ProvisionConfigBuilder, Readiness, SourceMode};
    use crate::err::ProvisionErr;
    use crate::kind::{GitRef, Role};
    use crate::test::{mode, ScriptedRunner};
    use crate::topology::{keep_warnings, Orchestrator, Topology};
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::Path;
    use tempdir::TempDir;

    fn builder(prefix: &Path) -> ProvisionConfigBuilder {
        let mut builder = ProvisionConfigBuilder::default();
        builder.prefix(prefix).source(SourceMode::Worktree {
            repo: prefix.join("source/postgres"),
            upstream: "https://example.org/postgres.git".to_string(),
        });
        builder
    }

    fn conf(data_dir: &Path) -> String {
        fs::read_to_string(data_dir.join("postgresql.conf")).unwrap()
    }

    #[test]
    pub fn ports_follow_role_offsets() {
        let config = builder(Path::new("/p"))
            .port(6000u16)
            .create_fdw(true)
            .create_replica(true)
            .build()
            .unwrap();
        let topology = Topology::plan(&config).unwrap();
        let ports: Vec<u16> = topology.instances().iter().map(|i| i.port).collect();
        assert_eq!(ports, vec![6000, 6010, 6020]);
        assert_eq!(
            topology.instance(Role::Fdw).unwrap().data_dir,
            Path::new("/p/pgdata/fdw")
        );
        assert_eq!(Topology::upstream_of(Role::Replica), Some(Role::Primary));
        assert_eq!(Topology::upstream_of(Role::Fdw), None);
    }

    #[tokio::test]
    pub async fn primary_from_a_tag() {
        let tmp = TempDir::new("pgdev-topology").unwrap();
        let config = builder(tmp.path())
            .refs(BTreeMap::from([(Role::Primary, GitRef::Tag("v16.1".to_string()))]))
            .build()
            .unwrap();
        let runner = ScriptedRunner::postgres();

        let provisioned = Orchestrator::new(&config, &runner).run().await.unwrap();
        assert_eq!(provisioned.topology.instances().len(), 1);
        assert_eq!(provisioned.phases[&Role::Primary], Phase::Running);

        let layout = config.layout();
        let text = conf(&layout.pg_data(Role::Primary));
        assert_eq!(parameter(&text, "port").as_deref(), Some("5432"));
        assert_eq!(parameter(&text, "logging_collector").as_deref(), Some("'on'"));

        let script = fs::read_to_string(layout.activate_script(Role::Primary)).unwrap();
        assert!(script.contains("export PGPORT=5432"));

        let worktree = runner
            .position(&format!(
                "git worktree add --detach {} refs/tags/v16.1",
                layout.source_dir(Role::Primary).display()
            ))
            .unwrap();
        let setup = runner.position("meson setup build").unwrap();
        let initdb = runner.position("initdb").unwrap();
        let start = runner.position("pg_ctl -D").unwrap();
        assert!(worktree < setup && setup < initdb && initdb < start);
        assert!(runner.position("git pull").is_none());
    }

    #[tokio::test]
    pub async fn replica_follows_the_running_primary() {
        let tmp = TempDir::new("pgdev-topology").unwrap();
        let master = GitRef::Branch("master".to_string());
        let config = builder(tmp.path())
            .refs(BTreeMap::from([
                (Role::Primary, master.clone()),
                (Role::Replica, master),
            ]))
            .create_replica(true)
            .build()
            .unwrap();
        let layout = config.layout();
        let porcelain = format!(
            "worktree {}\nbare\n\nworktree {}\nbranch refs/heads/master\n",
            layout.default_repo().display(),
            layout.source_dir(Role::Primary).display()
        );
        let runner = ScriptedRunner::postgres()
            .on("git", &["worktree", "list"], move |_| CmdOutput::ok(&porcelain));

        let provisioned = Orchestrator::new(&config, &runner).run().await.unwrap();
        assert_eq!(provisioned.phases[&Role::Replica], Phase::Running);

        let replica_dir = layout.pg_data(Role::Replica);
        assert_eq!(mode(&replica_dir), 0o700);
        assert_eq!(parameter(&conf(&replica_dir), "port").as_deref(), Some("5452"));
        assert!(layout.activate_script(Role::Replica).is_file());

        let primary_start = runner
            .position(&format!("pg_ctl -D {}", layout.pg_data(Role::Primary).display()))
            .unwrap();
        let ready = runner.position("pg_isready -h localhost -p 5432").unwrap();
        let backup = runner.position("pg_basebackup").unwrap();
        let replica_start = runner
            .position(&format!("pg_ctl -D {} -l", replica_dir.display()))
            .unwrap();
        assert!(primary_start < ready && ready < backup && backup < replica_start);
        assert!(runner
            .position(&format!(
                "git worktree add --track -b master_replica {}",
                layout.source_dir(Role::Replica).display()
            ))
            .is_some());
        assert!(runner.position("initdb -D ").is_some());
        let initdbs = runner.lines().iter().filter(|line| line.starts_with("initdb")).count();
        assert_eq!(initdbs, 1);
    }

    #[tokio::test]
    pub async fn skip_build_needs_an_installation() {
        let tmp = TempDir::new("pgdev-topology").unwrap();
        let config = builder(tmp.path()).skip_build(true).build().unwrap();
        let runner = ScriptedRunner::postgres();
        let err = Orchestrator::new(&config, &runner).run().await.unwrap_err();
        assert!(matches!(
            err,
            ProvisionErr::MissingInstallation {
                role: Role::Primary,
                ..
            }
        ));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    pub async fn skip_build_resets_the_cluster_only() {
        let tmp = TempDir::new("pgdev-topology").unwrap();
        let config = builder(tmp.path())
            .skip_build(true)
            .create_fdw(true)
            .build()
            .unwrap();
        let layout = config.layout();
        for role in [Role::Primary, Role::Fdw] {
            fs::create_dir_all(layout.pg_home(role).join("bin")).unwrap();
        }
        let old = layout.pg_data(Role::Fdw).join("old_wal");
        fs::create_dir_all(&old).unwrap();

        let runner = ScriptedRunner::postgres();
        let provisioned = Orchestrator::new(&config, &runner).run().await.unwrap();
        assert_eq!(provisioned.phases.len(), 2);
        assert!(!old.exists());
        assert_eq!(
            parameter(&conf(&layout.pg_data(Role::Fdw)), "port").as_deref(),
            Some("5442")
        );
        assert!(runner.position("git").is_none());
        assert!(runner.position("meson").is_none());
    }

    #[tokio::test]
    pub async fn skip_build_stops_and_empties_unrequested_roles() {
        let tmp = TempDir::new("pgdev-topology").unwrap();
        let config = builder(tmp.path()).skip_build(true).build().unwrap();
        let layout = config.layout();
        fs::create_dir_all(layout.pg_home(Role::Primary).join("bin")).unwrap();
        fs::create_dir_all(layout.pg_home(Role::Replica).join("bin")).unwrap();
        fs::write(layout.pg_home(Role::Replica).join("bin/pg_ctl"), "").unwrap();
        let replica_dir = layout.pg_data(Role::Replica);
        fs::create_dir_all(&replica_dir).unwrap();
        fs::write(replica_dir.join("standby.signal"), "").unwrap();

        let runner = ScriptedRunner::postgres();
        let provisioned = Orchestrator::new(&config, &runner).run().await.unwrap();
        assert_eq!(provisioned.phases.len(), 1);
        assert!(provisioned.warnings.is_empty());

        let stop = runner
            .position(&format!("pg_ctl -D {} stop -m fast", replica_dir.display()))
            .unwrap();
        let initdb = runner.position("initdb").unwrap();
        assert!(stop < initdb);
        assert!(replica_dir.is_dir());
        assert_eq!(fs::read_dir(&replica_dir).unwrap().count(), 0);
        assert!(!layout.pg_data(Role::Fdw).exists());
    }

    #[test]
    pub fn only_stop_warnings_are_kept() {
        let mut warnings = vec![];
        keep_warnings(
            &mut warnings,
            vec![ProvisionErr::stop_warning(Role::Fdw, "pg_ctl exited 1")],
        )
        .unwrap();
        assert_eq!(warnings.len(), 1);

        let err = keep_warnings(&mut warnings, vec![ProvisionErr::missing_ref(Role::Fdw)])
            .unwrap_err();
        assert!(matches!(err, ProvisionErr::RefResolution { .. }));
        assert_eq!(warnings.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    pub async fn unready_primary_aborts_the_replica() {
        let tmp = TempDir::new("pgdev-topology").unwrap();
        let config = builder(tmp.path())
            .refs(BTreeMap::from([
                (Role::Primary, GitRef::Tag("v16.1".to_string())),
                (Role::Replica, GitRef::Tag("v16.1".to_string())),
            ]))
            .create_replica(true)
            .readiness(Readiness {
                attempts: 3,
                interval_ms: 500,
            })
            .build()
            .unwrap();
        let runner = ScriptedRunner::postgres().fail("pg_isready", &[], 2);

        let err = Orchestrator::new(&config, &runner).run().await.unwrap_err();
        assert!(matches!(err, ProvisionErr::ReplicaBootstrap(_)));
        let checks = runner
            .lines()
            .iter()
            .filter(|line| line.starts_with("pg_isready"))
            .count();
        assert_eq!(checks, 3);
        assert!(runner.position("pg_basebackup").is_none());
    }

    #[tokio::test]
    pub async fn build_failure_stops_the_run() {
        let tmp = TempDir::new("pgdev-topology").unwrap();
        let config = builder(tmp.path())
            .refs(BTreeMap::from([(Role::Primary, GitRef::Tag("v16.1".to_string()))]))
            .build()
            .unwrap();
        let runner = ScriptedRunner::postgres().fail("meson", &["setup"], 1);
        let err = Orchestrator::new(&config, &runner).run().await.unwrap_err();
        assert!(matches!(err, ProvisionErr::Build { .. }));
        assert!(runner.position("initdb").is_none());
    }
}
