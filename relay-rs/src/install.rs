//! Installation workflow.
//!
//! A linear state machine:
//! NotInstalled -> PackagesInstalling -> ConfigWriting -> ServiceStarting
//! -> ReadinessPolling -> Ready. It is not resumable mid-step; a
//! crashed run starts over. Running it against an already-Ready host
//! is idempotent: configuration is reapplied and the daemon reloaded.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::backup::BackupManager;
use crate::error::{RelayError, Result};
use crate::postfix::PostfixWriter;
use crate::store::SenderProfile;
use crate::system::detect::pickup_socket_present;
use crate::system::{MailDaemon, PackageManager};

/// Automatic pre-install backups kept before the oldest is pruned.
const KEPT_BACKUPS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallState {
    NotInstalled,
    PackagesInstalling,
    ConfigWriting,
    ServiceStarting,
    ReadinessPolling,
    Ready,
}

impl std::fmt::Display for InstallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallState::NotInstalled => write!(f, "not_installed"),
            InstallState::PackagesInstalling => write!(f, "packages_installing"),
            InstallState::ConfigWriting => write!(f, "config_writing"),
            InstallState::ServiceStarting => write!(f, "service_starting"),
            InstallState::ReadinessPolling => write!(f, "readiness_polling"),
            InstallState::Ready => write!(f, "ready"),
        }
    }
}

/// What the host looks like right now. Recomputed at the start of each
/// workflow run, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallProbe {
    pub packages_present: bool,
    pub config_present: bool,
    pub socket_present: bool,
}

impl InstallProbe {
    pub fn is_ready(&self) -> bool {
        self.packages_present && self.config_present && self.socket_present
    }
}

/// Outcome of one completed workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallReport {
    pub state: InstallState,
    pub steps: Vec<String>,
    pub reapplied: bool,
}

pub struct Installer {
    packages: Arc<dyn PackageManager>,
    daemon: Arc<dyn MailDaemon>,
    writer: Arc<PostfixWriter>,
    backups: Arc<BackupManager>,
    pickup_socket: PathBuf,
    poll_interval: Duration,
    readiness_timeout: Duration,
}

impl Installer {
    pub fn new(
        packages: Arc<dyn PackageManager>,
        daemon: Arc<dyn MailDaemon>,
        writer: Arc<PostfixWriter>,
        backups: Arc<BackupManager>,
        pickup_socket: PathBuf,
        poll_interval: Duration,
        readiness_timeout: Duration,
    ) -> Self {
        Installer {
            packages,
            daemon,
            writer,
            backups,
            pickup_socket,
            poll_interval,
            readiness_timeout,
        }
    }

    /// Inspect the host without changing anything.
    pub async fn probe(&self) -> InstallProbe {
        InstallProbe {
            packages_present: self.packages.is_installed("postfix").await,
            config_present: self.writer.main_cf_path().exists(),
            socket_present: pickup_socket_present(&self.pickup_socket),
        }
    }

    /// Run the full workflow for a profile. Fatal errors abort the run
    /// and leave the host in the state already reached; there is no
    /// rollback.
    pub async fn run_install(&self, profile: &SenderProfile) -> Result<InstallReport> {
        let probe = self.probe().await;
        let mut steps = Vec::new();

        if probe.is_ready() {
            info!("Postfix already ready, reapplying configuration");
            self.writer.apply(profile).await?;
            steps.push("reapplied configuration and reloaded".to_string());
            return Ok(InstallReport {
                state: InstallState::Ready,
                steps,
                reapplied: true,
            });
        }

        // Best-effort snapshot before the first write.
        match self.backups.create_backup(None).await {
            Ok(metadata) => {
                steps.push(format!("backup '{}' created", metadata.name));
                if let Err(e) = self.backups.cleanup_old(KEPT_BACKUPS).await {
                    warn!("Backup retention cleanup failed: {}", e);
                }
            }
            Err(e) => warn!("Pre-install backup failed: {}", e),
        }

        if probe.packages_present {
            steps.push("packages already installed".to_string());
        } else {
            info!("State: {}", InstallState::PackagesInstalling);
            self.packages.install(self.packages.relay_packages()).await?;
            steps.push("packages installed".to_string());
        }

        info!("State: {}", InstallState::ConfigWriting);
        self.writer.apply(profile).await?;
        steps.push(format!("relay configured for {}", profile.relayhost()));

        info!("State: {}", InstallState::ServiceStarting);
        self.daemon.enable().await?;
        self.daemon.start().await?;
        steps.push("postfix started and enabled".to_string());

        info!("State: {}", InstallState::ReadinessPolling);
        self.wait_for_readiness().await?;
        steps.push("pickup socket present".to_string());

        info!("State: {}", InstallState::Ready);
        Ok(InstallReport {
            state: InstallState::Ready,
            steps,
            reapplied: false,
        })
    }

    /// Poll for the pickup socket at a fixed interval up to the
    /// configured timeout. The workflow fails with ReadinessTimeout
    /// but the service is left running; it may still become ready.
    async fn wait_for_readiness(&self) -> Result<()> {
        let started = Instant::now();
        loop {
            if pickup_socket_present(&self.pickup_socket) {
                return Ok(());
            }
            if started.elapsed() >= self.readiness_timeout {
                return Err(RelayError::ReadinessTimeout {
                    waited_secs: self.readiness_timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Tear the relay down: stop and disable the daemon, restore the
    /// newest backup when one exists, drop the SASL files, purge the
    /// packages.
    pub async fn run_uninstall(&self) -> Result<Vec<String>> {
        let mut steps = Vec::new();

        self.daemon.stop().await?;
        self.daemon.disable().await?;
        steps.push("postfix stopped and disabled".to_string());

        match self.backups.latest().await? {
            Some(metadata) => {
                self.backups.restore_backup(&metadata.name).await?;
                steps.push(format!("restored backup '{}'", metadata.name));
            }
            None => {
                info!("No backups found to restore from");
            }
        }

        self.writer.remove_sasl_files().await?;
        steps.push("SASL credentials removed".to_string());

        self.packages.remove(&["postfix"]).await?;
        steps.push("postfix package removed".to_string());

        Ok(steps)
    }
}
