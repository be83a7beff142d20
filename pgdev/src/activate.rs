use crate::kind::Role;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub const BSD_INDENT: &'static str = "pg_bsd_indent";

/// A shell snippet that points a terminal at one instance.  `source activate_<role>.sh`
/// sets the usual `PG*` variables and adds a few meson test helpers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Activation {
    pub role: Role,
    pub pg_home: PathBuf,
    pub data_dir: PathBuf,
    pub port: u16,
    pub user: String,
    /// directory holding the `pg_bsd_indent` built with this instance
    pub bsd_indent: Option<PathBuf>,
}

impl Activation {
    pub fn script(&self) -> String {
        let pg_home = self.pg_home.display();
        let data_dir = self.data_dir.display();
        let path = match &self.bsd_indent {
            Some(dir) => format!("{}/bin:{}:$PATH", pg_home, dir.display()),
            None => format!("{}/bin:$PATH", pg_home),
        };

        let mut lines = vec![
            format!("# {} instance", self.role),
            format!("export PGHOME={}", pg_home),
            format!("export PATH={}", path),
            format!("export LD_LIBRARY_PATH={}/lib", pg_home),
            format!("export PGDATA={}", data_dir),
            format!("export PGUSER={}", self.user),
            "export PGDATABASE=postgres".to_string(),
            format!("export PGPORT={}", self.port),
            format!("alias PG_START=\"pg_ctl -D {} -l {}/logfile start\"", data_dir, data_dir),
            format!("alias PG_STOP=\"pg_ctl -D {} stop\"", data_dir),
            String::new(),
            "# build and test helpers, run from the meson build directory".to_string(),
        ];
        for (name, body) in HELPERS {
            lines.push(format!("function {}() {{", name));
            lines.push(format!("    {}", body));
            lines.push("}".to_string());
            lines.push(String::new());
        }

        let mut script = lines.join("\n");
        script.truncate(script.trim_end().len());
        script.push('\n');
        script
    }

    pub async fn write(&self, path: &Path) -> Result<(), std::io::Error> {
        tokio::fs::write(path, self.script()).await?;
        info!("[{}] wrote activation script {}", self.role, path.display());
        Ok(())
    }
}

const HELPERS: [(&str, &str); 5] = [
    (
        "pg_check_extension",
        "meson test -q --print-errorlogs --suite setup --suite $1",
    ),
    ("pg_check_world", "meson test -q --print-errorlogs"),
    ("pg_build_docs", "ninja docs"),
    ("pg_list_tests", "meson test --list"),
    ("pg_run_suite", "meson test -v -C . --suite \"$1\""),
];

/// the directory of the first `pg_bsd_indent` executable found under `root`
pub fn find_bsd_indent(root: &Path) -> Option<PathBuf> {
    let found = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == BSD_INDENT)
        .find(|entry| {
            entry
                .metadata()
                .map(|meta| meta.permissions().mode() & 0o111 != 0)
                .unwrap_or(false)
        })
        .and_then(|entry| entry.path().parent().map(Path::to_path_buf));
    if found.is_none() {
        warn!("{} not found under {}", BSD_INDENT, root.display());
    }
    found
}
