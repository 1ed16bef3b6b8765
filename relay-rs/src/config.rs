use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub postfix: PostfixConfig,
    pub install: InstallConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub listen_addr: String,
}

/// Paths of the files and sockets this tool manages or observes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PostfixConfig {
    pub main_cf_path: PathBuf,
    pub sasl_passwd_path: PathBuf,
    pub mail_log_path: PathBuf,
    pub pickup_socket_path: PathBuf,
    pub sender_store_path: PathBuf,
    pub backup_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstallConfig {
    /// Seconds to wait for the pickup socket before giving up.
    pub readiness_timeout_secs: u64,
    /// Seconds between readiness probes.
    pub readiness_poll_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::RelayError::Config(e.to_string()))?;

        toml::from_str(&content).map_err(|e| crate::error::RelayError::Config(e.to_string()))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                listen_addr: "0.0.0.0:8000".to_string(),
            },
            postfix: PostfixConfig {
                main_cf_path: PathBuf::from("/etc/postfix/main.cf"),
                sasl_passwd_path: PathBuf::from("/etc/postfix/sasl_passwd"),
                mail_log_path: PathBuf::from("/var/log/mail.log"),
                pickup_socket_path: PathBuf::from("/var/spool/postfix/public/pickup"),
                sender_store_path: PathBuf::from("sender.json"),
                backup_dir: PathBuf::from("/var/backups/relay-rs"),
            },
            install: InstallConfig {
                readiness_timeout_secs: 20,
                readiness_poll_secs: 1,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        let config = Config::default();
        assert_eq!(
            config.postfix.main_cf_path,
            PathBuf::from("/etc/postfix/main.cf")
        );
        assert_eq!(config.install.readiness_timeout_secs, 20);
        assert_eq!(config.install.readiness_poll_secs, 1);
    }

    #[test]
    fn test_from_file_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config::default();
        std::fs::write(&path, toml::to_string(&config).unwrap()).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.server.listen_addr, config.server.listen_addr);
        assert_eq!(loaded.postfix.backup_dir, config.postfix.backup_dir);
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file("/nonexistent/config.toml").unwrap_err();
        assert!(matches!(err, crate::error::RelayError::Config(_)));
    }
}
