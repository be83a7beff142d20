//! Lifecycle of one PostgreSQL cluster: a data directory driven by the binaries of one
//! install prefix.

pub mod conf;
pub mod ready;
pub mod status;

use crate::cluster::status::Phase;
use crate::command::{Cmd, CommandRunner, Env};
use crate::config::Readiness;
use crate::err::ProvisionErr;
use crate::kind::Role;
use crate::layout::instance_env;
use port_check::is_local_ipv4_port_free;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub struct Cluster<'a> {
    runner: &'a dyn CommandRunner,
    role: Role,
    port: u16,
    user: String,
    pg_home: PathBuf,
    data_dir: PathBuf,
    env: Env,
    phase: Phase,
}

impl<'a> Cluster<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        role: Role,
        port: u16,
        user: &str,
        pg_home: PathBuf,
        data_dir: PathBuf,
    ) -> Self {
        let env = instance_env(&pg_home);
        Self {
            runner,
            role,
            port,
            user: user.to_string(),
            pg_home,
            data_dir,
            env,
            phase: Phase::default(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pg_home(&self) -> &Path {
        &self.pg_home
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn transition(&mut self, to: Phase) -> Result<(), ProvisionErr> {
        if !self.phase.can_become(to) {
            return Err(ProvisionErr::illegal_transition(self.role, self.phase, to));
        }
        debug!("[{}] {} -> {}", self.role, self.phase, to);
        self.phase = to;
        Ok(())
    }

    fn guard(&self, to: Phase) -> Result<(), ProvisionErr> {
        match self.phase.can_become(to) {
            true => Ok(()),
            false => Err(ProvisionErr::illegal_transition(self.role, self.phase, to)),
        }
    }

    fn pg(&self, bin: &str) -> Cmd {
        Cmd::pg_bin(&self.pg_home, bin).env(&self.env)
    }

    /// delete and recreate the data directory
    pub async fn reset_data_dir(&self) -> Result<(), std::io::Error> {
        info!("[{}] recreating {}", self.role, self.data_dir.display());
        if self.data_dir.exists() {
            tokio::fs::remove_dir_all(&self.data_dir).await?;
        }
        tokio::fs::create_dir_all(&self.data_dir).await
    }

    /// `initdb` into a freshly emptied data directory
    pub async fn initialize(&mut self) -> Result<(), ProvisionErr> {
        self.guard(Phase::Initialized)?;
        self.reset_data_dir()
            .await
            .map_err(|err| ProvisionErr::init_err(self.role, err))?;
        self.runner
            .run(
                self.pg("initdb")
                    .arg("-D")
                    .arg(self.data_dir.display().to_string())
                    .arg("-U")
                    .arg(&self.user),
            )
            .await
            .map_err(|err| ProvisionErr::init_err(self.role, err))?;
        self.transition(Phase::Initialized)
    }

    pub async fn configure_parameter(&mut self, key: &str, value: &str) -> Result<(), ProvisionErr> {
        self.guard(Phase::Configured)?;
        info!("[{}] setting {} = {}", self.role, key, value);
        conf::set_parameter(&self.data_dir, key, value)
            .await
            .map_err(|err| ProvisionErr::init_err(self.role, err))?;
        self.transition(Phase::Configured)
    }

    pub async fn start(&mut self) -> Result<(), ProvisionErr> {
        self.guard(Phase::Running)?;
        self.pg_ctl_start()
            .await
            .map_err(|err| ProvisionErr::start_err(self.role, err))?;
        self.transition(Phase::Running)
    }

    async fn pg_ctl_start(&self) -> Result<(), ProvisionErr> {
        info!(
            "[{}] starting cluster {} on port {}",
            self.role,
            self.data_dir.display(),
            self.port
        );
        self.runner
            .run(
                self.pg("pg_ctl")
                    .arg("-D")
                    .arg(self.data_dir.display().to_string())
                    .arg("-l")
                    .arg(self.data_dir.join("logfile").display().to_string())
                    .arg("start"),
            )
            .await?;
        Ok(())
    }

    /// Stop whatever runs from this data directory or still holds the port.  Never
    /// fails: anything that went wrong is returned as a
    /// [`ProvisionErr::LifecycleStopWarning`] and logged.
    pub async fn stop(&mut self) -> Vec<ProvisionErr> {
        let mut warnings = vec![];
        if !self.data_dir.exists() {
            debug!("[{}] no data directory, nothing to stop", self.role);
            return warnings;
        }

        info!(
            "[{}] stopping cluster at {} if running",
            self.role,
            self.data_dir.display()
        );
        if self.pg_home.join("bin").join("pg_ctl").is_file() {
            let stop = self
                .pg("pg_ctl")
                .arg("-D")
                .arg(self.data_dir.display().to_string())
                .args(["stop", "-m", "fast"])
                .best_effort();
            match self.runner.run(stop).await {
                Ok(out) if out.success() => {}
                Ok(out) => warnings.push(ProvisionErr::stop_warning(
                    self.role,
                    format!("pg_ctl stop exited with {:?}", out.status),
                )),
                Err(err) => warnings.push(ProvisionErr::stop_warning(self.role, err)),
            }
        }

        if !is_local_ipv4_port_free(self.port) {
            warnings.append(&mut self.kill_listeners().await);
        }

        for warning in &warnings {
            warn!("{}", warning);
        }
        if self.phase == Phase::Running {
            self.phase = Phase::Stopped;
        }
        warnings
    }

    /// `kill -9` every process listening on the cluster port
    async fn kill_listeners(&self) -> Vec<ProvisionErr> {
        let mut warnings = vec![];
        let lsof = Cmd::new("lsof")
            .args(["-t", "-i"])
            .arg(format!("tcp:{}", self.port))
            .arg("-sTCP:LISTEN")
            .best_effort();
        let pids = match self.runner.run(lsof).await {
            Ok(out) if !out.success() && out.stdout.trim().is_empty() => {
                warnings.push(ProvisionErr::stop_warning(
                    self.role,
                    format!(
                        "lsof found no listener on bound port {} (exit {:?}): {}",
                        self.port,
                        out.status,
                        out.stderr.trim()
                    ),
                ));
                return warnings;
            }
            Ok(out) => out
                .stdout
                .lines()
                .map(|pid| pid.trim().to_string())
                .filter(|pid| !pid.is_empty())
                .collect::<Vec<_>>(),
            Err(err) => {
                warnings.push(ProvisionErr::stop_warning(self.role, err));
                return warnings;
            }
        };

        for pid in pids {
            info!("[{}] killing pid {} still listening on {}", self.role, pid, self.port);
            let kill = Cmd::new("kill").arg("-9").arg(&pid).best_effort();
            match self.runner.run(kill).await {
                Ok(out) if out.success() => {}
                Ok(out) => warnings.push(ProvisionErr::stop_warning(
                    self.role,
                    format!("kill -9 {} exited with {:?}", pid, out.status),
                )),
                Err(err) => warnings.push(ProvisionErr::stop_warning(self.role, err)),
            }
        }
        warnings
    }

    /// the primary must be [`Phase::Running`] and accept connections
    pub async fn wait_ready(&self, readiness: &Readiness) -> Result<(), ProvisionErr> {
        if self.phase != Phase::Running {
            return Err(ProvisionErr::replica_err(format!(
                "{} cluster is {}, not running",
                self.role, self.phase
            )));
        }
        ready::wait_ready(self.runner, &self.pg_home, &self.env, self.port, readiness).await
    }

    /// Clone the running `primary` into this cluster with `pg_basebackup`, point the copy
    /// at this cluster's port and start it as a streaming standby.
    pub async fn bootstrap_replica(&mut self, primary: &Cluster<'_>) -> Result<(), ProvisionErr> {
        if !self.phase.can_bootstrap() {
            return Err(ProvisionErr::illegal_transition(
                self.role,
                self.phase,
                Phase::Running,
            ));
        }
        if primary.phase() != Phase::Running {
            return Err(ProvisionErr::replica_err(format!(
                "{} cluster is {}, not running",
                primary.role(),
                primary.phase()
            )));
        }

        info!(
            "[{}] taking a base backup of {} on port {}",
            self.role,
            primary.role(),
            primary.port()
        );
        self.base_backup(primary.port())
            .await
            .map_err(ProvisionErr::replica_err)?;
        debug!("[{}] {} -> {}", self.role, self.phase, Phase::Running);
        self.phase = Phase::Running;
        Ok(())
    }

    async fn base_backup(&self, primary_port: u16) -> Result<(), ProvisionErr> {
        self.reset_data_dir().await?;
        self.runner
            .run(
                self.pg("pg_basebackup")
                    .arg("-D")
                    .arg(self.data_dir.display().to_string())
                    .args(["-R", "-P", "-X", "stream", "-cfast", "-U"])
                    .arg(&self.user)
                    .args(["-h", "localhost", "-p"])
                    .arg(primary_port.to_string()),
            )
            .await?;
        tokio::fs::set_permissions(&self.data_dir, std::fs::Permissions::from_mode(0o700))
            .await?;
        conf::set_parameter(&self.data_dir, "port", &self.port.to_string()).await?;
        self.pg_ctl_start().await
    }
}
