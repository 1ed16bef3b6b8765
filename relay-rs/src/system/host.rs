//! Host implementations of the capability traits.
//!
//! Everything here shells out with `tokio::process::Command` and waits
//! for the child to exit; no invocation is cancelled mid-flight.

use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{CommandOutput, MailClient, MailDaemon, MapBuilder, PackageFlavor, PackageManager, QueueTool};
use crate::error::{RelayError, Result};

/// Run a program, capturing exit status and both output streams.
pub async fn run(program: &str, args: &[&str]) -> std::io::Result<CommandOutput> {
    debug!("Running command: {} {}", program, args.join(" "));
    let output = Command::new(program).args(args).output().await?;
    Ok(CommandOutput {
        status: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Package manager driven by the detected platform flavor.
pub struct HostPackageManager {
    flavor: PackageFlavor,
}

impl HostPackageManager {
    pub fn new(flavor: PackageFlavor) -> Self {
        HostPackageManager { flavor }
    }

    fn install_argv<'a>(&self, packages: &[&'a str]) -> (&'static str, Vec<&'a str>) {
        match self.flavor {
            PackageFlavor::Apt => {
                let mut args = vec!["install", "-y"];
                args.extend_from_slice(packages);
                ("apt-get", args)
            }
            PackageFlavor::Dnf => {
                let mut args = vec!["install", "-y"];
                args.extend_from_slice(packages);
                ("dnf", args)
            }
            PackageFlavor::Yum => {
                let mut args = vec!["install", "-y"];
                args.extend_from_slice(packages);
                ("yum", args)
            }
            PackageFlavor::Zypper => {
                let mut args = vec!["--non-interactive", "install"];
                args.extend_from_slice(packages);
                ("zypper", args)
            }
            PackageFlavor::Pacman => {
                let mut args = vec!["-S", "--noconfirm", "--needed"];
                args.extend_from_slice(packages);
                ("pacman", args)
            }
        }
    }

    fn remove_argv<'a>(&self, packages: &[&'a str]) -> (&'static str, Vec<&'a str>) {
        match self.flavor {
            PackageFlavor::Apt => {
                let mut args = vec!["remove", "--purge", "-y"];
                args.extend_from_slice(packages);
                ("apt-get", args)
            }
            PackageFlavor::Dnf => {
                let mut args = vec!["remove", "-y"];
                args.extend_from_slice(packages);
                ("dnf", args)
            }
            PackageFlavor::Yum => {
                let mut args = vec!["remove", "-y"];
                args.extend_from_slice(packages);
                ("yum", args)
            }
            PackageFlavor::Zypper => {
                let mut args = vec!["--non-interactive", "remove"];
                args.extend_from_slice(packages);
                ("zypper", args)
            }
            PackageFlavor::Pacman => {
                let mut args = vec!["-R", "--noconfirm"];
                args.extend_from_slice(packages);
                ("pacman", args)
            }
        }
    }
}

#[async_trait::async_trait]
impl PackageManager for HostPackageManager {
    async fn install(&self, packages: &[&str]) -> Result<()> {
        let (program, args) = self.install_argv(packages);
        info!("Installing packages: {}", packages.join(", "));
        let out = run(program, &args).await.map_err(RelayError::Io)?;
        if out.success() {
            Ok(())
        } else {
            Err(RelayError::Install(out.detail()))
        }
    }

    async fn remove(&self, packages: &[&str]) -> Result<()> {
        let (program, args) = self.remove_argv(packages);
        info!("Removing packages: {}", packages.join(", "));
        let out = run(program, &args).await.map_err(RelayError::Io)?;
        if out.success() {
            Ok(())
        } else {
            Err(RelayError::Install(out.detail()))
        }
    }

    async fn is_installed(&self, package: &str) -> bool {
        let probe = match self.flavor {
            PackageFlavor::Apt => run("dpkg", &["-s", package]).await,
            PackageFlavor::Dnf | PackageFlavor::Yum | PackageFlavor::Zypper => {
                run("rpm", &["-q", package]).await
            }
            PackageFlavor::Pacman => run("pacman", &["-Q", package]).await,
        };
        matches!(probe, Ok(out) if out.success())
    }

    fn relay_packages(&self) -> &'static [&'static str] {
        match self.flavor {
            PackageFlavor::Apt => &[
                "postfix",
                "mailutils",
                "libsasl2-modules",
                "sasl2-bin",
                "ca-certificates",
            ],
            PackageFlavor::Dnf | PackageFlavor::Yum => &[
                "postfix",
                "mailx",
                "cyrus-sasl",
                "cyrus-sasl-plain",
                "ca-certificates",
            ],
            PackageFlavor::Zypper => &["postfix", "mailx", "cyrus-sasl", "cyrus-sasl-plain"],
            PackageFlavor::Pacman => &["postfix", "s-nail", "cyrus-sasl"],
        }
    }
}

/// Postfix under systemd, matching the canonical startup sequence:
/// `systemctl start postfix`, reload via `postfix reload` with a
/// restart fallback.
pub struct SystemdMailDaemon;

impl SystemdMailDaemon {
    async fn systemctl(&self, verb: &str) -> Result<()> {
        let out = run("systemctl", &[verb, "postfix"])
            .await
            .map_err(RelayError::Io)?;
        if out.success() {
            Ok(())
        } else {
            Err(RelayError::Daemon(format!(
                "systemctl {} postfix: {}",
                verb,
                out.detail()
            )))
        }
    }
}

#[async_trait::async_trait]
impl MailDaemon for SystemdMailDaemon {
    async fn start(&self) -> Result<()> {
        self.systemctl("start").await
    }

    async fn stop(&self) -> Result<()> {
        self.systemctl("stop").await
    }

    async fn enable(&self) -> Result<()> {
        self.systemctl("enable").await
    }

    async fn disable(&self) -> Result<()> {
        self.systemctl("disable").await
    }

    async fn reload(&self) -> Result<()> {
        let out = run("postfix", &["reload"]).await.map_err(RelayError::Io)?;
        if out.success() {
            return Ok(());
        }
        warn!("postfix reload failed, falling back to restart: {}", out.detail());
        let restart = run("systemctl", &["restart", "postfix"])
            .await
            .map_err(RelayError::Io)?;
        if restart.success() {
            Ok(())
        } else {
            Err(RelayError::ReloadFailed(restart.detail()))
        }
    }

    async fn is_active(&self) -> bool {
        matches!(
            run("systemctl", &["is-active", "postfix"]).await,
            Ok(out) if out.success() && out.stdout.trim() == "active"
        )
    }

    async fn check_config(&self) -> bool {
        matches!(run("postfix", &["check"]).await, Ok(out) if out.success())
    }
}

/// `postmap` / `newaliases`.
pub struct PostmapBuilder;

#[async_trait::async_trait]
impl MapBuilder for PostmapBuilder {
    async fn build_map(&self, path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy();
        let out = run("postmap", &[path_str.as_ref()])
            .await
            .map_err(RelayError::Io)?;
        if out.success() {
            Ok(())
        } else {
            Err(RelayError::MapBuildFailed(out.detail()))
        }
    }

    async fn rebuild_aliases(&self) -> Result<()> {
        let out = run("newaliases", &[]).await.map_err(RelayError::Io)?;
        if out.success() {
            Ok(())
        } else {
            Err(RelayError::MapBuildFailed(out.detail()))
        }
    }
}

/// `postqueue`.
pub struct PostqueueTool;

#[async_trait::async_trait]
impl QueueTool for PostqueueTool {
    async fn list(&self) -> Result<String> {
        let out = run("postqueue", &["-p"]).await.map_err(RelayError::Io)?;
        if out.success() {
            Ok(out.stdout)
        } else {
            Err(RelayError::QueueFailed(out.detail()))
        }
    }

    async fn flush(&self) -> Result<()> {
        let out = run("postqueue", &["-f"]).await.map_err(RelayError::Io)?;
        if out.success() {
            Ok(())
        } else {
            Err(RelayError::QueueFailed(out.detail()))
        }
    }
}

/// Sends through the local `mail` client (mailutils), with the body
/// written to stdin rather than interpolated into a shell line.
pub struct MailutilsClient;

#[async_trait::async_trait]
impl MailClient for MailutilsClient {
    async fn send(
        &self,
        from_name: &str,
        from_email: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<()> {
        let from_header = format!("From: {} <{}>", from_name, from_email);
        let mut child = Command::new("mail")
            .arg("-a")
            .arg(&from_header)
            .arg("-s")
            .arg(subject)
            .arg(to)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(body.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(RelayError::Daemon(format!(
                "mail exited with {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}
