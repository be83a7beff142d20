use crate::err::ProvisionErr;
use once_cell::sync::Lazy;
use std::path::PathBuf;

pub const DEFAULT_UPSTREAM: &'static str = "https://github.com/postgres/postgres.git";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_USER: &'static str = "postgres";

/// overrides the platform default prefix
pub static PGDEV_PREFIX: Lazy<Option<PathBuf>> =
    Lazy::new(|| std::env::var("PGDEV_PREFIX").ok().map(PathBuf::from));

/// a YAML settings file read when `--config` is not given
pub static PGDEV_CONFIG: Lazy<Option<PathBuf>> =
    Lazy::new(|| std::env::var("PGDEV_CONFIG").ok().map(PathBuf::from));

/// the prefix used when neither the command line nor the settings file names one
pub fn default_prefix() -> Result<PathBuf, ProvisionErr> {
    if let Some(prefix) = PGDEV_PREFIX.as_ref() {
        return Ok(prefix.clone());
    }
    platform_prefix(std::env::consts::OS)
}

pub fn platform_prefix(os: &str) -> Result<PathBuf, ProvisionErr> {
    let home = match dirs::home_dir() {
        None => PathBuf::from("."),
        Some(dir) => dir,
    };
    match os {
        "macos" => Ok(home.join("Documents").join("pgdev").join("installations")),
        "linux" => Ok(home.join("pgdev").join("installations")),
        other => Err(ProvisionErr::UnsupportedPlatform(other.to_string())),
    }
}
