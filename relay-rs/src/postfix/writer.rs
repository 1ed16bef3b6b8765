//! Postfix configuration writer.
//!
//! Applies the managed directive set to `main.cf`, regenerates the
//! SASL password map, and reloads the daemon. Only the managed keys
//! are ever touched; every other line keeps its place.

use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

use crate::error::{RelayError, Result};
use crate::store::SenderProfile;
use crate::system::{MailDaemon, MapBuilder};

/// Directive keys this tool owns in main.cf.
pub const MANAGED_KEYS: &[&str] = &[
    "relayhost",
    "smtp_sasl_auth_enable",
    "smtp_sasl_password_maps",
    "smtp_sasl_security_options",
    "smtp_sasl_tls_security_options",
    "smtp_tls_security_level",
    "inet_protocols",
];

/// Baseline main.cf written by reset: a loopback-only relay shell with
/// local delivery disabled.
const BASELINE_MAIN_CF: &str = "\
# Basic SMTP Relay Configuration
smtpd_banner = $myhostname ESMTP
biff = no
append_dot_mydomain = no
readme_directory = no
compatibility_level = 2
myhostname = localhost
mydomain = localhost
myorigin = $mydomain
inet_interfaces = loopback-only
mydestination = $myhostname, localhost.$mydomain, $mydomain
local_transport = error:local delivery is disabled
mynetworks = 127.0.0.0/8, [::1]/128
mailbox_size_limit = 0
recipient_delimiter = +
inet_protocols = ipv4
";

/// The managed subset of main.cf as currently on disk. Keys the file
/// does not carry are absent from the map.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConfigSnapshot {
    pub directives: BTreeMap<String, String>,
    pub sasl_map_present: bool,
}

pub struct PostfixWriter {
    main_cf: PathBuf,
    sasl_passwd: PathBuf,
    map_builder: Arc<dyn MapBuilder>,
    daemon: Arc<dyn MailDaemon>,
}

impl PostfixWriter {
    pub fn new(
        main_cf: PathBuf,
        sasl_passwd: PathBuf,
        map_builder: Arc<dyn MapBuilder>,
        daemon: Arc<dyn MailDaemon>,
    ) -> Self {
        PostfixWriter {
            main_cf,
            sasl_passwd,
            map_builder,
            daemon,
        }
    }

    /// The directive values a profile must produce in main.cf.
    pub fn managed_directives(&self, profile: &SenderProfile) -> Vec<(&'static str, String)> {
        vec![
            ("relayhost", profile.relayhost()),
            ("smtp_sasl_auth_enable", "yes".to_string()),
            (
                "smtp_sasl_password_maps",
                format!("hash:{}", self.sasl_passwd.display()),
            ),
            ("smtp_sasl_security_options", "noanonymous".to_string()),
            ("smtp_sasl_tls_security_options", "noanonymous".to_string()),
            ("smtp_tls_security_level", "encrypt".to_string()),
            ("inet_protocols", "ipv4".to_string()),
        ]
    }

    /// Apply a profile: upsert directives, rewrite the SASL map,
    /// reload. A reload failure leaves the new files in place; the old
    /// configuration stays loaded until the next successful reload.
    pub async fn apply(&self, profile: &SenderProfile) -> Result<()> {
        info!(
            "Applying relay configuration for '{}' ({})",
            profile.name,
            profile.relayhost()
        );

        let current = match fs::read_to_string(&self.main_cf).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(RelayError::from_write_io(e, &self.main_cf)),
        };

        let directives = self.managed_directives(profile);
        let updated = upsert_directives(&current, &directives);
        self.write_atomic(&self.main_cf, updated.as_bytes(), 0o644)
            .await?;

        self.write_sasl_map(profile).await?;
        self.map_builder.rebuild_aliases().await?;

        self.daemon.reload().await.map_err(|e| match e {
            RelayError::ReloadFailed(detail) => RelayError::ReloadFailed(detail),
            other => RelayError::ReloadFailed(other.to_string()),
        })?;

        info!("Relay configuration applied and Postfix reloaded");
        Ok(())
    }

    async fn write_sasl_map(&self, profile: &SenderProfile) -> Result<()> {
        let secret = profile.decoded_secret()?;
        let entry = format!("{} {}:{}\n", profile.relayhost(), profile.username, secret);
        self.write_atomic(&self.sasl_passwd, entry.as_bytes(), 0o600)
            .await?;

        self.map_builder.build_map(&self.sasl_passwd).await?;

        // postmap leaves the compiled map world-readable on some
        // platforms; clamp it like the source file.
        let db_path = compiled_map_path(&self.sasl_passwd);
        if fs::try_exists(&db_path).await.unwrap_or(false) {
            fs::set_permissions(&db_path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| RelayError::from_write_io(e, &db_path))?;
        }
        Ok(())
    }

    async fn write_atomic(&self, path: &Path, content: &[u8], mode: u32) -> Result<()> {
        let tmp = path.with_extension("relay-tmp");
        fs::write(&tmp, content)
            .await
            .map_err(|e| RelayError::from_write_io(e, &tmp))?;
        fs::set_permissions(&tmp, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|e| RelayError::from_write_io(e, &tmp))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| RelayError::from_write_io(e, path))?;
        Ok(())
    }

    /// Read the managed directives back out of main.cf.
    pub async fn snapshot(&self) -> ConfigSnapshot {
        let content = fs::read_to_string(&self.main_cf).await.unwrap_or_default();
        let mut directives = BTreeMap::new();
        for line in content.lines() {
            if let Some((key, value)) = split_directive(line) {
                if MANAGED_KEYS.contains(&key) {
                    directives.insert(key.to_string(), value.to_string());
                }
            }
        }
        let sasl_map_present = compiled_map_path(&self.sasl_passwd).exists();
        ConfigSnapshot {
            directives,
            sasl_map_present,
        }
    }

    /// Rewrite main.cf to the loopback-only baseline, drop the SASL
    /// files, and reload.
    pub async fn reset_to_defaults(&self) -> Result<()> {
        info!("Resetting Postfix configuration to baseline");
        self.write_atomic(&self.main_cf, BASELINE_MAIN_CF.as_bytes(), 0o644)
            .await?;
        self.remove_sasl_files().await?;
        self.daemon.reload().await?;
        Ok(())
    }

    pub async fn remove_sasl_files(&self) -> Result<()> {
        for path in [self.sasl_passwd.clone(), compiled_map_path(&self.sasl_passwd)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Could not remove {}: {}", path.display(), e);
                    return Err(RelayError::from_write_io(e, &path));
                }
            }
        }
        Ok(())
    }

    pub fn main_cf_path(&self) -> &Path {
        &self.main_cf
    }

    pub fn sasl_passwd_path(&self) -> &Path {
        &self.sasl_passwd
    }
}

/// Path of the compiled hash map postmap writes next to its source.
pub fn compiled_map_path(source: &Path) -> PathBuf {
    let mut os = source.as_os_str().to_owned();
    os.push(".db");
    PathBuf::from(os)
}

/// Upsert `key = value` lines into main.cf content. Existing managed
/// lines are replaced in place, missing ones appended; untouched lines
/// keep their order. Applying the same directives twice produces
/// byte-identical output.
pub fn upsert_directives(content: &str, directives: &[(&str, String)]) -> String {
    let mut lines: Vec<String> = content.lines().map(|l| l.to_string()).collect();
    let mut seen = vec![false; directives.len()];

    for line in lines.iter_mut() {
        if let Some((key, _)) = split_directive(line) {
            if let Some(idx) = directives.iter().position(|(k, _)| *k == key) {
                *line = format!("{} = {}", directives[idx].0, directives[idx].1);
                seen[idx] = true;
            }
        }
    }

    for (idx, (key, value)) in directives.iter().enumerate() {
        if !seen[idx] {
            lines.push(format!("{} = {}", key, value));
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Split a `key = value` postfix directive line. Comments and
/// continuation lines yield None.
fn split_directive(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') || line.starts_with(char::is_whitespace) {
        return None;
    }
    let (key, value) = trimmed.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key, value.trim()))
}
