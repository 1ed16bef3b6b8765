//! Capability interfaces over the external commands this tool drives.
//!
//! Each boundary is a trait with one host implementation (subprocess
//! invocation) and a mock used by the tests. A non-zero exit is always
//! surfaced as a typed error with the captured stderr attached, never
//! silently ignored.

use crate::error::Result;

pub mod detect;
pub mod host;
pub mod mock;

pub use detect::{PackageFlavor, SystemDetector, SystemInfo};

/// Exit code and captured output of one subprocess run.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// stderr if non-empty, else stdout. Errors from mail tools often
    /// land on stdout.
    pub fn detail(&self) -> String {
        if self.stderr.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            self.stderr.trim().to_string()
        }
    }
}

/// Platform package manager.
#[async_trait::async_trait]
pub trait PackageManager: Send + Sync {
    /// Install packages. Already-installed packages count as success.
    async fn install(&self, packages: &[&str]) -> Result<()>;

    /// Remove (purge where supported) packages.
    async fn remove(&self, packages: &[&str]) -> Result<()>;

    /// Whether a single package is present.
    async fn is_installed(&self, package: &str) -> bool;

    /// The relay dependency set for this platform.
    fn relay_packages(&self) -> &'static [&'static str] {
        &["postfix", "mailutils", "libsasl2-modules", "sasl2-bin", "ca-certificates"]
    }
}

/// The Postfix daemon as seen through its service manager.
#[async_trait::async_trait]
pub trait MailDaemon: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn enable(&self) -> Result<()>;
    async fn disable(&self) -> Result<()>;

    /// Reload configuration without dropping in-flight deliveries.
    async fn reload(&self) -> Result<()>;

    async fn is_active(&self) -> bool;

    /// `postfix check`: syntax validation of the current config.
    async fn check_config(&self) -> bool;
}

/// Lookup-map and alias-database build utilities.
#[async_trait::async_trait]
pub trait MapBuilder: Send + Sync {
    /// `postmap <path>`: compile the SASL password map.
    async fn build_map(&self, path: &std::path::Path) -> Result<()>;

    /// `newaliases`: rebuild the alias database.
    async fn rebuild_aliases(&self) -> Result<()>;
}

/// Queue listing and flushing.
#[async_trait::async_trait]
pub trait QueueTool: Send + Sync {
    /// Raw `postqueue -p` output.
    async fn list(&self) -> Result<String>;

    /// `postqueue -f`: force retry of all deferred mail.
    async fn flush(&self) -> Result<()>;
}

/// Local mail submission, used by the send-test-email endpoint.
#[async_trait::async_trait]
pub trait MailClient: Send + Sync {
    async fn send(
        &self,
        from_name: &str,
        from_email: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<()>;
}
