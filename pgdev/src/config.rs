use crate::env::{DEFAULT_PORT, DEFAULT_USER};
use crate::err::ProvisionErr;
use crate::kind::{BuildSystem, GitRef, Role};
use crate::layout::Layout;
use derive_builder::{Builder, UninitializedFieldError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// where source trees come from
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SourceMode {
    /// a `.tar.gz` extracted once per role
    Archive { archive: PathBuf },
    /// a git worktree per role, all sharing one clone of `upstream`
    Worktree { repo: PathBuf, upstream: String },
}

/// how long to wait for the primary before taking a base backup from it
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Readiness {
    pub attempts: u32,
    pub interval_ms: u64,
}

impl Readiness {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval_ms: 1000,
        }
    }
}

/// The run-wide configuration.  Built once, then handed by reference to every
/// component of the pipeline.
#[derive(Builder, Clone, Debug)]
#[builder(
    setter(into),
    build_fn(validate = "Self::validate", error = "ProvisionErr")
)]
pub struct ProvisionConfig {
    pub prefix: PathBuf,
    pub source: SourceMode,
    /// the ref each role is built from, roles missing here have no ref
    #[builder(default)]
    pub refs: BTreeMap<Role, GitRef>,
    #[builder(default)]
    pub patch: Option<String>,
    #[builder(default)]
    pub build_system: BuildSystem,
    #[builder(default)]
    pub build_flags: Vec<String>,
    #[builder(default)]
    pub create_fdw: bool,
    #[builder(default)]
    pub create_replica: bool,
    #[builder(default)]
    pub skip_build: bool,
    #[builder(default = "DEFAULT_PORT")]
    pub port: u16,
    #[builder(default = "DEFAULT_USER.to_string()")]
    pub user: String,
    #[builder(default)]
    pub capture_output: bool,
    #[builder(default)]
    pub readiness: Readiness,
}

impl ProvisionConfigBuilder {
    fn validate(&self) -> Result<(), ProvisionErr> {
        if let Some(port) = self.port {
            if port == 0 {
                return Err(ProvisionErr::config_err("port must be greater than zero"));
            }
            if port.checked_add(Role::Replica.port_offset()).is_none() {
                return Err(ProvisionErr::config_err(format!(
                    "base port {} leaves no room for the fdw and replica ports",
                    port
                )));
            }
        }
        if let Some(readiness) = &self.readiness {
            if readiness.attempts == 0 {
                return Err(ProvisionErr::config_err(
                    "readiness attempts must be greater than zero",
                ));
            }
        }
        Ok(())
    }
}

impl From<UninitializedFieldError> for ProvisionErr {
    fn from(err: UninitializedFieldError) -> Self {
        ProvisionErr::config_err(err)
    }
}

impl ProvisionConfig {
    /// requested roles in provisioning order
    pub fn roles(&self) -> Vec<Role> {
        let mut roles = vec![Role::Primary];
        if self.create_fdw {
            roles.push(Role::Fdw);
        }
        if self.create_replica {
            roles.push(Role::Replica);
        }
        roles
    }

    pub fn git_ref(&self, role: Role) -> Option<&GitRef> {
        self.refs.get(&role)
    }

    pub fn layout(&self) -> Layout {
        Layout::new(self.prefix.clone())
    }
}

/// Combine the global `--branch`/`--tag` pair with the per role overrides.  A role
/// override wins over the global ref; a branch and a tag at the same level conflict.
pub fn resolve_refs(
    global: (Option<String>, Option<String>),
    per_role: Vec<(Role, Option<String>, Option<String>)>,
) -> Result<BTreeMap<Role, GitRef>, ProvisionErr> {
    let global = match GitRef::from_opts(global.0, global.1) {
        Some(Err(_)) => return Err(ProvisionErr::conflicting_refs("--branch and --tag")),
        Some(Ok(git_ref)) => Some(git_ref),
        None => None,
    };

    let mut refs = BTreeMap::new();
    for (role, branch, tag) in per_role {
        let git_ref = match GitRef::from_opts(branch, tag) {
            Some(Err(_)) => {
                return Err(ProvisionErr::conflicting_refs(format!(
                    "--{role}-branch and --{role}-tag"
                )))
            }
            Some(Ok(git_ref)) => Some(git_ref),
            None => global.clone(),
        };
        if let Some(git_ref) = git_ref {
            refs.insert(role, git_ref);
        }
    }
    Ok(refs)
}

/// Settings are provided by the user in an optional YAML file.  Every field is
/// optional; anything given on the command line wins.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub prefix: Option<PathBuf>,
    pub repo: Option<PathBuf>,
    pub upstream: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub build_system: Option<BuildSystem>,
    pub meson_flags: Option<String>,
    pub configure_flags: Option<String>,
    pub readiness: Option<Readiness>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ProvisionErr> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            ProvisionErr::config_err(format!(
                "cannot read settings '{}': {}",
                path.display(),
                err
            ))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ProvisionErr> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }
}

#[cfg(test)]
pub mod test {
    use crate::config::{resolve_refs, ProvisionConfigBuilder, Readiness, Settings, SourceMode};
    use crate::err::ProvisionErr;
    use crate::kind::{BuildSystem, GitRef, Role};

    fn builder() -> ProvisionConfigBuilder {
        let mut builder = ProvisionConfigBuilder::default();
        builder.prefix("/tmp/pgdev").source(SourceMode::Archive {
            archive: "postgres.tar.gz".into(),
        });
        builder
    }

    #[test]
    pub fn defaults() {
        let config = builder().build().unwrap();
        assert_eq!(config.port, 5432);
        assert_eq!(config.user, "postgres");
        assert_eq!(config.build_system, BuildSystem::Meson);
        assert_eq!(config.roles(), vec![Role::Primary]);
        assert_eq!(config.readiness, Readiness::default());
    }

    #[test]
    pub fn roles_in_order() {
        let config = builder().create_replica(true).create_fdw(true).build().unwrap();
        assert_eq!(config.roles(), vec![Role::Primary, Role::Fdw, Role::Replica]);
    }

    #[test]
    pub fn rejects_ports_without_room() {
        let err = builder().port(65530u16).build().unwrap_err();
        assert!(matches!(err, ProvisionErr::Config(_)));
        assert!(builder().port(0u16).build().is_err());
        assert!(builder().port(65515u16).build().is_ok());
    }

    #[test]
    pub fn missing_prefix() {
        let mut builder = ProvisionConfigBuilder::default();
        builder.source(SourceMode::Archive {
            archive: "x.tar.gz".into(),
        });
        assert!(matches!(builder.build(), Err(ProvisionErr::Config(_))));
    }

    #[test]
    pub fn role_refs_override_global() {
        let refs = resolve_refs(
            (Some("master".to_string()), None),
            vec![
                (Role::Primary, None, None),
                (Role::Fdw, None, Some("v16.1".to_string())),
                (Role::Replica, None, None),
            ],
        )
        .unwrap();
        assert_eq!(refs[&Role::Primary], GitRef::Branch("master".to_string()));
        assert_eq!(refs[&Role::Fdw], GitRef::Tag("v16.1".to_string()));
        assert_eq!(refs[&Role::Replica], GitRef::Branch("master".to_string()));
    }

    #[test]
    pub fn conflicting_refs() {
        let err = resolve_refs(
            (Some("master".to_string()), Some("v16.1".to_string())),
            vec![],
        )
        .unwrap_err();
        assert!(err.to_string().contains("--branch and --tag"));

        let err = resolve_refs(
            (None, None),
            vec![(Role::Replica, Some("a".to_string()), Some("b".to_string()))],
        )
        .unwrap_err();
        assert!(err.to_string().contains("--replica-branch"));

        let refs = resolve_refs((None, None), vec![(Role::Primary, None, None)]).unwrap();
        assert!(refs.is_empty());
    }

    #[test]
    pub fn settings_yaml() {
        let settings = Settings::parse(
            r#"
port: 6000
build_system: make
meson_flags: "-Ddocs=enabled -Dcassert=true"
readiness:
  attempts: 5
"#,
        )
        .unwrap();
        assert_eq!(settings.port, Some(6000));
        assert_eq!(settings.build_system, Some(BuildSystem::Make));
        let readiness = settings.readiness.unwrap();
        assert_eq!(readiness.attempts, 5);
        assert_eq!(readiness.interval_ms, 1000);

        assert_eq!(Settings::parse("").unwrap(), Settings::default());
        assert!(matches!(
            Settings::parse("port: [1, 2]"),
            Err(ProvisionErr::Yaml(_))
        ));
    }
}
