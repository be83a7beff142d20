use crate::command::{Cmd, CommandRunner, Env};
use crate::config::Readiness;
use crate::err::ProvisionErr;
use std::path::Path;
use tracing::{debug, info};

/// Poll `pg_isready` against `port` until it answers or `readiness.attempts` run out.
pub async fn wait_ready(
    runner: &dyn CommandRunner,
    pg_home: &Path,
    env: &Env,
    port: u16,
    readiness: &Readiness,
) -> Result<(), ProvisionErr> {
    for attempt in 1..=readiness.attempts {
        let out = runner
            .run(
                Cmd::pg_bin(pg_home, "pg_isready")
                    .args(["-h", "localhost", "-p"])
                    .arg(port.to_string())
                    .env(env)
                    .best_effort(),
            )
            .await?;
        if out.success() {
            info!("server on port {} accepts connections", port);
            return Ok(());
        }
        debug!(
            "server on port {} not ready (attempt {}/{})",
            port, attempt, readiness.attempts
        );
        if attempt < readiness.attempts {
            tokio::time::sleep(readiness.interval()).await;
        }
    }
    Err(ProvisionErr::replica_err(format!(
        "primary on port {} did not accept connections after {} attempts",
        port, readiness.attempts
    )))
}
