use crate::command::{process_env, Env};
use crate::kind::Role;
use std::path::{Path, PathBuf};

/// Everything a run produces lives under one prefix:
///
/// ```text
/// <prefix>/source/src_<role>      source tree of each role
/// <prefix>/source/postgres        shared repository (worktree mode)
/// <prefix>/pghome_<role>          install prefix of each role
/// <prefix>/pgdata/<role>          data directory of each role
/// <prefix>/activate_<role>.sh     shell snippet for each role
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Layout {
    prefix: PathBuf,
}

impl Layout {
    pub fn new(prefix: PathBuf) -> Self {
        Self { prefix }
    }

    pub fn source_root(&self) -> PathBuf {
        self.prefix.join("source")
    }

    pub fn source_dir(&self, role: Role) -> PathBuf {
        self.source_root().join(format!("src_{}", role))
    }

    pub fn default_repo(&self) -> PathBuf {
        self.source_root().join("postgres")
    }

    pub fn pg_home(&self, role: Role) -> PathBuf {
        self.prefix.join(format!("pghome_{}", role))
    }

    pub fn pg_data(&self, role: Role) -> PathBuf {
        self.prefix.join("pgdata").join(role.as_str())
    }

    pub fn activate_script(&self, role: Role) -> PathBuf {
        self.prefix.join(format!("activate_{}.sh", role))
    }
}

/// the process environment with `pg_home`'s binaries and libraries put first
pub fn instance_env(pg_home: &Path) -> Env {
    let mut env = process_env();
    prepend(&mut env, "PATH", pg_home.join("bin"));
    prepend(&mut env, "LD_LIBRARY_PATH", pg_home.join("lib"));
    env
}

fn prepend(env: &mut Env, key: &str, dir: PathBuf) {
    let value = match env.get(key) {
        Some(existing) if !existing.is_empty() => format!("{}:{}", dir.display(), existing),
        _ => dir.display().to_string(),
    };
    env.insert(key.to_string(), value);
}

#[cfg(test)]
pub mod test {
    use crate::kind::Role;
    use crate::layout::{instance_env, Layout};
    use std::path::{Path, PathBuf};

    #[test]
    pub fn paths_are_role_scoped() {
        let layout = Layout::new(PathBuf::from("/p"));
        assert_eq!(layout.source_dir(Role::Fdw), Path::new("/p/source/src_fdw"));
        assert_eq!(layout.pg_home(Role::Replica), Path::new("/p/pghome_replica"));
        assert_eq!(layout.pg_data(Role::Primary), Path::new("/p/pgdata/primary"));
        assert_eq!(
            layout.activate_script(Role::Primary),
            Path::new("/p/activate_primary.sh")
        );
        assert_eq!(layout.default_repo(), Path::new("/p/source/postgres"));
    }

    #[test]
    pub fn env_puts_install_first() {
        let env = instance_env(Path::new("/p/pghome_primary"));
        assert!(env["PATH"].starts_with("/p/pghome_primary/bin"));
        assert!(env["LD_LIBRARY_PATH"].starts_with("/p/pghome_primary/lib"));
    }
}
