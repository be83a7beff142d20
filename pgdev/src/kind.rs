use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// the purpose of an instance within a topology
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Hash,
    Ord,
    PartialOrd,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::EnumIter,
    strum_macros::IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Fdw,
    Replica,
}

impl Role {
    /// distance of this role's port from the requested base port
    pub fn port_offset(&self) -> u16 {
        match self {
            Role::Primary => 0,
            Role::Fdw => 10,
            Role::Replica => 20,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    Hash,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum BuildSystem {
    #[default]
    Meson,
    Make,
}

/// a git ref requested for an instance
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitRef {
    Branch(String),
    Tag(String),
}

impl GitRef {
    /// picks at most one of `branch` and `tag`, supplying both is an error for the caller
    pub fn from_opts(branch: Option<String>, tag: Option<String>) -> Option<Result<Self, (String, String)>> {
        match (branch, tag) {
            (Some(branch), Some(tag)) => Some(Err((branch, tag))),
            (Some(branch), None) => Some(Ok(GitRef::Branch(branch))),
            (None, Some(tag)) => Some(Ok(GitRef::Tag(tag))),
            (None, None) => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            GitRef::Branch(name) => name.as_str(),
            GitRef::Tag(name) => name.as_str(),
        }
    }

    pub fn is_tag(&self) -> bool {
        matches!(self, GitRef::Tag(_))
    }

    /// the argument `git checkout` needs to land on this ref
    pub fn checkout_target(&self) -> String {
        match self {
            GitRef::Branch(name) => name.clone(),
            GitRef::Tag(name) => format!("tags/{}", name),
        }
    }
}

impl Display for GitRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            GitRef::Branch(name) => write!(f, "branch '{}'", name),
            GitRef::Tag(name) => write!(f, "tag '{}'", name),
        }
    }
}

#[cfg(test)]
pub mod test {
    use crate::kind::{BuildSystem, GitRef, Role};
    use itertools::Itertools;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    pub fn roles_render_lowercase() {
        let names = Role::iter().map(|role| role.to_string()).collect_vec();
        assert_eq!(names, vec!["primary", "fdw", "replica"]);
        assert_eq!(Role::from_str("replica").unwrap(), Role::Replica);
        assert_eq!(BuildSystem::from_str("make").unwrap(), BuildSystem::Make);
    }

    #[test]
    pub fn port_offsets_are_distinct() {
        let offsets = Role::iter().map(|role| role.port_offset()).unique().count();
        assert_eq!(offsets, 3);
    }

    #[test]
    pub fn git_ref_from_opts() {
        assert_eq!(GitRef::from_opts(None, None), None);
        assert_eq!(
            GitRef::from_opts(None, Some("v16.1".to_string())),
            Some(Ok(GitRef::Tag("v16.1".to_string())))
        );
        assert!(matches!(
            GitRef::from_opts(Some("master".to_string()), Some("v16.1".to_string())),
            Some(Err(_))
        ));
        assert_eq!(GitRef::Tag("v16.1".to_string()).checkout_target(), "tags/v16.1");
    }
}
