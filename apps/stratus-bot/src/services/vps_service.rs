use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{info, warn};

use stratus_db::repositories::{user_repo::UserRepository, vps_repo::VpsRepository};

const SSH_TIMEOUT: Duration = Duration::from_secs(15);

/// Passthrough to the fleet control host over plain `ssh`. Key-based auth
/// only (`BatchMode=yes`); any prompt kills the probe instead of hanging the
/// request.
#[derive(Debug)]
pub struct VpsService {
    vps: VpsRepository,
    ledger: UserRepository,
    ssh_host: Option<String>,
    ssh_user: String,
}

#[derive(Debug)]
pub struct SshProbe {
    pub host: String,
    pub output: String,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub synced: u32,
    pub failed: u32,
}

/// State export produced on the control host: the per-server config blobs
/// and per-user usage counters.
#[derive(Debug, Deserialize)]
struct FleetState {
    #[serde(default)]
    servers: Vec<FleetServer>,
    #[serde(default)]
    users: Vec<FleetUser>,
}

#[derive(Debug, Deserialize)]
struct FleetServer {
    id: i64,
    #[serde(default)]
    configs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FleetUser {
    tg_id: i64,
    #[serde(default)]
    traffic_used_mb: i64,
    #[serde(default)]
    connection_count: i32,
}

impl VpsService {
    pub fn new(
        vps: VpsRepository,
        ledger: UserRepository,
        ssh_host: Option<String>,
        ssh_user: String,
    ) -> Self {
        Self {
            vps,
            ledger,
            ssh_host,
            ssh_user,
        }
    }

    async fn run_remote(&self, remote_cmd: &str) -> Result<String> {
        let Some(host) = self.ssh_host.as_deref() else {
            bail!("VPS_SSH_HOST is not configured");
        };
        let target = format!("{}@{}", self.ssh_user, host);

        let output = tokio::time::timeout(
            SSH_TIMEOUT,
            Command::new("ssh")
                .arg("-o")
                .arg("BatchMode=yes")
                .arg("-o")
                .arg("ConnectTimeout=5")
                .arg("-o")
                .arg("StrictHostKeyChecking=accept-new")
                .arg(&target)
                .arg(remote_cmd)
                .output(),
        )
        .await
        .with_context(|| format!("SSH to {} timed out", target))?
        .with_context(|| format!("Failed to spawn ssh for {}", target))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("SSH command failed on {}: {}", target, stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub async fn test_ssh(&self) -> Result<SshProbe> {
        let host = self
            .ssh_host
            .clone()
            .context("VPS_SSH_HOST is not configured")?;
        let output = self.run_remote("echo ok && uname -a").await?;
        Ok(SshProbe { host, output })
    }

    /// Pull the fleet state export and apply it: config blobs per server,
    /// usage counters per user. Individual row failures are counted and
    /// logged; only a failed export is an error.
    pub async fn sync_all(&self) -> Result<SyncReport> {
        let raw = self.run_remote("stratus-node export-state").await?;
        let fleet: FleetState =
            serde_json::from_str(&raw).context("Fleet state export is not valid JSON")?;

        let mut report = SyncReport::default();
        for server in &fleet.servers {
            match self.vps.set_configs(server.id, &server.configs).await {
                Ok(()) => report.synced += 1,
                Err(e) => {
                    warn!("Failed to store configs for server {}: {}", server.id, e);
                    report.failed += 1;
                }
            }
        }
        for user in &fleet.users {
            if let Err(e) = self
                .ledger
                .update_counters(user.tg_id, user.traffic_used_mb, user.connection_count)
                .await
            {
                warn!("Failed to update counters for {}: {}", user.tg_id, e);
                report.failed += 1;
            }
        }

        info!(
            "Fleet sync finished: {} applied, {} failed",
            report.synced, report.failed
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fleet_state_parses_with_missing_sections() {
        let fleet: FleetState = serde_json::from_str("{}").unwrap();
        assert!(fleet.servers.is_empty());
        assert!(fleet.users.is_empty());

        let fleet: FleetState = serde_json::from_str(
            r#"{"servers":[{"id":3,"configs":["vless://a"]}],"users":[{"tg_id":42}]}"#,
        )
        .unwrap();
        assert_eq!(fleet.servers[0].id, 3);
        assert_eq!(fleet.servers[0].configs, vec!["vless://a"]);
        assert_eq!(fleet.users[0].tg_id, 42);
        assert_eq!(fleet.users[0].traffic_used_mb, 0);
    }
}
