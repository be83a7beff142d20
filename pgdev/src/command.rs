use crate::err::ProvisionErr;
use itertools::Itertools;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

/// environment handed to a collaborator, replaces the process environment entirely
pub type Env = BTreeMap<String, String>;

/// the environment of this process, variables that are not valid unicode are dropped
pub fn process_env() -> Env {
    std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

/// how a non zero exit is treated
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, strum_macros::Display)]
pub enum Policy {
    /// a failure is an error and aborts whatever step issued the command
    #[default]
    Strict,
    /// a failure is logged and the output is returned to the caller
    BestEffort,
}

/// one invocation of an external program
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cmd {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Option<Env>,
    pub policy: Policy,
}

impl Cmd {
    pub fn new<P>(program: P) -> Self
    where
        P: AsRef<str>,
    {
        Self {
            program: program.as_ref().to_string(),
            args: vec![],
            cwd: None,
            env: None,
            policy: Policy::Strict,
        }
    }

    /// shorthand for a binary that lives in `<pg_home>/bin`
    pub fn pg_bin(pg_home: &Path, bin: &str) -> Self {
        Self::new(pg_home.join("bin").join(bin).display().to_string())
    }

    pub fn arg<A>(mut self, arg: A) -> Self
    where
        A: AsRef<str>,
    {
        self.args.push(arg.as_ref().to_string());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<str>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_string()));
        self
    }

    pub fn cwd<P>(mut self, cwd: P) -> Self
    where
        P: Into<PathBuf>,
    {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, env: &Env) -> Self {
        self.env = Some(env.clone());
        self
    }

    pub fn best_effort(mut self) -> Self {
        self.policy = Policy::BestEffort;
        self
    }

    /// the final path component of the program, `/x/bin/pg_ctl` -> `pg_ctl`
    pub fn program_name(&self) -> &str {
        Path::new(&self.program)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(self.program.as_str())
    }
}

impl Display for Cmd {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            f.write_str(" ")?;
            f.write_str(arg)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CmdOutput {
    /// `None` when the process could not be spawned or was killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn ok<S>(stdout: S) -> Self
    where
        S: ToString,
    {
        Self {
            status: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn failed<S>(status: i32, stderr: S) -> Self
    where
        S: ToString,
    {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// apply `policy` to this output: strict failures become errors
    pub fn check(self, cmd: &Cmd) -> Result<CmdOutput, ProvisionErr> {
        if self.success() {
            return Ok(self);
        }
        match cmd.policy {
            Policy::Strict => Err(ProvisionErr::command_failed(
                cmd.program_name(),
                self.status,
                tail(&self.stderr, 20),
            )),
            Policy::BestEffort => {
                warn!(
                    "best effort command '{}' exited with {:?}",
                    cmd.program_name(),
                    self.status
                );
                Ok(self)
            }
        }
    }
}

/// last `lines` lines of `text`
pub fn tail(text: &str, lines: usize) -> String {
    let all = text.trim_end().lines().collect_vec();
    let skip = all.len().saturating_sub(lines);
    all.into_iter().skip(skip).join("\n")
}

/// Every external tool (git, meson, make, initdb, pg_ctl...) is driven through a
/// [`CommandRunner`].  Calls are awaited one at a time, the pipeline never has more than
/// one collaborator process in flight.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// run `cmd` to completion. A [`Policy::Strict`] command that exits non zero yields
    /// [`ProvisionErr::Command`], a [`Policy::BestEffort`] command returns its output
    /// whatever the exit status
    async fn run(&self, cmd: Cmd) -> Result<CmdOutput, ProvisionErr>;
}

/// runs commands as child processes of this one
#[derive(Clone, Debug, Default)]
pub struct OsCommandRunner {
    /// echo collaborator stdout/stderr into the log
    pub capture_output: bool,
}

impl OsCommandRunner {
    pub fn new(capture_output: bool) -> Self {
        Self { capture_output }
    }
}

#[async_trait]
impl CommandRunner for OsCommandRunner {
    async fn run(&self, cmd: Cmd) -> Result<CmdOutput, ProvisionErr> {
        info!("Running: {}", cmd);

        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);
        if let Some(cwd) = &cmd.cwd {
            command.current_dir(cwd);
        }
        if let Some(env) = &cmd.env {
            command.env_clear();
            command.envs(env);
        }
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let output = match command.output().await {
            Ok(output) => output,
            Err(err) => {
                return match cmd.policy {
                    Policy::Strict => Err(ProvisionErr::command_failed(
                        cmd.program_name(),
                        None,
                        err.to_string(),
                    )),
                    Policy::BestEffort => {
                        warn!("could not spawn '{}': {}", cmd.program_name(), err);
                        Ok(CmdOutput {
                            status: None,
                            stdout: String::new(),
                            stderr: err.to_string(),
                        })
                    }
                }
            }
        };

        let output = CmdOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if self.capture_output {
            if !output.stdout.trim().is_empty() {
                info!("{}", output.stdout.trim());
            }
            if !output.stderr.trim().is_empty() {
                warn!("{}", output.stderr.trim());
            }
        }

        output.check(&cmd)
    }
}
