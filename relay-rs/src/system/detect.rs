//! Host platform detection.
//!
//! Identifies the distribution from `/etc/os-release` and probes for a
//! usable package manager binary. Nothing here is persisted; callers
//! recompute at the start of each workflow run.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::host::run;

/// Which package manager family the host uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageFlavor {
    Apt,
    Dnf,
    Yum,
    Zypper,
    Pacman,
}

impl PackageFlavor {
    pub fn binary(&self) -> &'static str {
        match self {
            PackageFlavor::Apt => "apt-get",
            PackageFlavor::Dnf => "dnf",
            PackageFlavor::Yum => "yum",
            PackageFlavor::Zypper => "zypper",
            PackageFlavor::Pacman => "pacman",
        }
    }
}

/// Parsed `/etc/os-release` fields plus detection results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub distro: String,
    pub version: String,
    pub name: String,
    pub family: String,
    pub package_flavor: Option<PackageFlavor>,
    pub postfix_active: bool,
}

pub struct SystemDetector {
    os_release_path: PathBuf,
}

impl SystemDetector {
    pub fn new() -> Self {
        SystemDetector {
            os_release_path: PathBuf::from("/etc/os-release"),
        }
    }

    pub fn with_os_release<P: Into<PathBuf>>(path: P) -> Self {
        SystemDetector {
            os_release_path: path.into(),
        }
    }

    /// Parse ID/VERSION_ID/NAME out of an os-release file. Unknown or
    /// unreadable files degrade to "unknown", never an error.
    pub fn parse_os_release(&self) -> (String, String, String) {
        let mut distro = "unknown".to_string();
        let mut version = "unknown".to_string();
        let mut name = "unknown".to_string();

        if let Ok(content) = std::fs::read_to_string(&self.os_release_path) {
            for line in content.lines() {
                if let Some(value) = line.strip_prefix("ID=") {
                    distro = value.trim().trim_matches('"').to_string();
                } else if let Some(value) = line.strip_prefix("VERSION_ID=") {
                    version = value.trim().trim_matches('"').to_string();
                } else if let Some(value) = line.strip_prefix("NAME=") {
                    name = value.trim().trim_matches('"').to_string();
                }
            }
        }

        (distro, version, name)
    }

    /// Map a distro ID to its packaging family.
    pub fn family_of(distro: &str) -> &'static str {
        match distro {
            "ubuntu" | "debian" | "mint" | "kali" | "raspbian" => "debian",
            "centos" | "rhel" | "fedora" | "rocky" | "almalinux" | "amazon" => "redhat",
            "arch" | "manjaro" => "arch",
            "opensuse" | "opensuse-leap" | "opensuse-tumbleweed" | "sles" => "suse",
            _ => "unknown",
        }
    }

    /// First package manager whose binary exists on PATH.
    pub async fn detect_package_flavor(&self) -> Option<PackageFlavor> {
        for flavor in [
            PackageFlavor::Apt,
            PackageFlavor::Dnf,
            PackageFlavor::Yum,
            PackageFlavor::Zypper,
            PackageFlavor::Pacman,
        ] {
            if command_exists(flavor.binary()).await {
                return Some(flavor);
            }
        }
        None
    }

    pub async fn system_info(&self, daemon: &dyn super::MailDaemon) -> SystemInfo {
        let (distro, version, name) = self.parse_os_release();
        SystemInfo {
            family: Self::family_of(&distro).to_string(),
            distro,
            version,
            name,
            package_flavor: self.detect_package_flavor().await,
            postfix_active: daemon.is_active().await,
        }
    }
}

impl Default for SystemDetector {
    fn default() -> Self {
        Self::new()
    }
}

async fn command_exists(cmd: &str) -> bool {
    matches!(run("which", &[cmd]).await, Ok(out) if out.success())
}

/// Whether the Postfix pickup socket exists, i.e. the daemon is ready
/// to accept mail for delivery.
pub fn pickup_socket_present(path: &Path) -> bool {
    path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_os_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("os-release");
        std::fs::write(
            &path,
            "NAME=\"Ubuntu\"\nID=ubuntu\nVERSION_ID=\"22.04\"\nPRETTY_NAME=\"Ubuntu 22.04\"\n",
        )
        .unwrap();

        let detector = SystemDetector::with_os_release(&path);
        let (distro, version, name) = detector.parse_os_release();
        assert_eq!(distro, "ubuntu");
        assert_eq!(version, "22.04");
        assert_eq!(name, "Ubuntu");
    }

    #[test]
    fn test_parse_os_release_missing_file() {
        let detector = SystemDetector::with_os_release("/nonexistent/os-release");
        let (distro, version, _) = detector.parse_os_release();
        assert_eq!(distro, "unknown");
        assert_eq!(version, "unknown");
    }

    #[test]
    fn test_family_mapping() {
        assert_eq!(SystemDetector::family_of("ubuntu"), "debian");
        assert_eq!(SystemDetector::family_of("rocky"), "redhat");
        assert_eq!(SystemDetector::family_of("arch"), "arch");
        assert_eq!(SystemDetector::family_of("gentoo"), "unknown");
    }

    #[test]
    fn test_pickup_socket_present() {
        let dir = TempDir::new().unwrap();
        let sock = dir.path().join("pickup");
        assert!(!pickup_socket_present(&sock));
        std::fs::write(&sock, b"").unwrap();
        assert!(pickup_socket_present(&sock));
    }
}
