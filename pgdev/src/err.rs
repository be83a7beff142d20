use std::path::{Path, PathBuf};
use thiserror::Error;
use crate::kind::Role;
use crate::cluster::status::Phase;

impl ProvisionErr {
    pub fn missing_ref(role: Role) -> Self {
        ProvisionErr::RefResolution {
            role,
            msg: "a branch or a tag is required when building from a git worktree".to_string(),
        }
    }

    pub fn conflicting_refs<W>(which: W) -> Self
    where
        W: AsRef<str>,
    {
        ProvisionErr::Config(format!(
            "cannot specify both a branch and a tag for {}",
            which.as_ref()
        ))
    }

    pub fn ref_err<MSG>(role: Role, msg: MSG) -> Self
    where
        MSG: ToString,
    {
        ProvisionErr::RefResolution {
            role,
            msg: msg.to_string(),
        }
    }

    pub fn source_err<MSG>(role: Role, msg: MSG) -> Self
    where
        MSG: ToString,
    {
        ProvisionErr::SourceAcquisition {
            role,
            msg: msg.to_string(),
        }
    }

    pub fn extraction_failed(role: Role, archive: &Path) -> Self {
        ProvisionErr::SourceAcquisition {
            role,
            msg: format!(
                "extraction of '{}' failed, no source directory found",
                archive.display()
            ),
        }
    }

    pub fn no_patches_matched<G>(glob: G) -> Self
    where
        G: AsRef<str>,
    {
        ProvisionErr::Patch(format!("no patch files matched: '{}'", glob.as_ref()))
    }

    pub fn patch_failed(patch: &Path, err: ProvisionErr) -> Self {
        ProvisionErr::Patch(format!(
            "patch '{}' failed to apply: {}",
            patch.display(),
            err
        ))
    }

    pub fn build_err<MSG>(role: Role, msg: MSG) -> Self
    where
        MSG: ToString,
    {
        ProvisionErr::Build {
            role,
            msg: msg.to_string(),
        }
    }

    pub fn init_err<MSG>(role: Role, msg: MSG) -> Self
    where
        MSG: ToString,
    {
        ProvisionErr::ClusterInit {
            role,
            msg: msg.to_string(),
        }
    }

    pub fn start_err<MSG>(role: Role, msg: MSG) -> Self
    where
        MSG: ToString,
    {
        ProvisionErr::ClusterStart {
            role,
            msg: msg.to_string(),
        }
    }

    pub fn replica_err<MSG>(msg: MSG) -> Self
    where
        MSG: ToString,
    {
        ProvisionErr::ReplicaBootstrap(msg.to_string())
    }

    pub fn stop_warning<MSG>(role: Role, msg: MSG) -> Self
    where
        MSG: ToString,
    {
        ProvisionErr::LifecycleStopWarning {
            role,
            msg: msg.to_string(),
        }
    }

    pub fn command_failed<P>(program: P, status: Option<i32>, stderr: String) -> Self
    where
        P: AsRef<str>,
    {
        ProvisionErr::Command {
            program: program.as_ref().to_string(),
            status,
            stderr,
        }
    }

    pub fn config_err<E>(err: E) -> Self
    where
        E: ToString,
    {
        ProvisionErr::Config(err.to_string())
    }

    pub fn missing_installation(role: Role, pg_home: PathBuf) -> Self {
        ProvisionErr::MissingInstallation { role, pg_home }
    }

    pub fn illegal_transition(role: Role, from: Phase, to: Phase) -> Self {
        ProvisionErr::IllegalTransition { role, from, to }
    }
}

impl ProvisionErr {
    /// every error aborts the run except a stop that could not be completed
    pub fn is_fatal(&self) -> bool {
        match self {
            ProvisionErr::LifecycleStopWarning { .. } => false,
            _ => true,
        }
    }
}

#[derive(Error, Debug)]
pub enum ProvisionErr {
    #[error("[{role}] ref resolution error: {msg}")]
    RefResolution { role: Role, msg: String },
    #[error("[{role}] source acquisition error: {msg}")]
    SourceAcquisition { role: Role, msg: String },
    #[error("patch error: {0}")]
    Patch(String),
    #[error("[{role}] build error: {msg}")]
    Build { role: Role, msg: String },
    #[error("[{role}] cluster initialization error: {msg}")]
    ClusterInit { role: Role, msg: String },
    #[error("[{role}] cluster start error: {msg}")]
    ClusterStart { role: Role, msg: String },
    #[error("replica bootstrap error: {0}")]
    ReplicaBootstrap(String),
    #[error("[{role}] could not stop cluster or it was not running: {msg}")]
    LifecycleStopWarning { role: Role, msg: String },
    #[error("command '{program}' failed with status {status:?}: {stderr}")]
    Command {
        program: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("config error: {0}")]
    Config(String),
    #[error("unsupported OS '{0}': pgdev supports only macOS and Linux")]
    UnsupportedPlatform(String),
    #[error("[{role}] installation not found at '{}'", pg_home.display())]
    MissingInstallation { role: Role, pg_home: PathBuf },
    #[error("[{role}] illegal cluster transition {from} -> {to}")]
    IllegalTransition { role: Role, from: Phase, to: Phase },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}
