//! Sender profile store
//!
//! Profiles live in a single JSON file that is read and written
//! wholesale. Writes go to a temp file in the same directory and are
//! renamed into place so a crash never leaves a truncated store.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};

use crate::error::{RelayError, Result};

/// Upstream provider presets with well-known relay endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Gmail,
    Outlook,
    Sendgrid,
    AwsSes,
    Custom,
}

impl Provider {
    /// Default relay endpoint for the provider, if it has one.
    pub fn default_endpoint(&self) -> Option<(&'static str, u16)> {
        match self {
            Provider::Gmail => Some(("smtp.gmail.com", 587)),
            Provider::Outlook => Some(("smtp-mail.outlook.com", 587)),
            Provider::Sendgrid => Some(("smtp.sendgrid.net", 587)),
            Provider::AwsSes => Some(("email-smtp.us-east-1.amazonaws.com", 587)),
            Provider::Custom => None,
        }
    }
}

/// A set of relay credentials for one upstream SMTP host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderProfile {
    /// Unique key.
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Base64-encoded, not encrypted. Documented weak point.
    pub secret: String,
    pub provider: Provider,
}

impl SenderProfile {
    /// Encode a plaintext secret for storage.
    pub fn encode_secret(plain: &str) -> String {
        general_purpose::STANDARD.encode(plain.as_bytes())
    }

    /// Decode the stored secret back to plaintext.
    pub fn decoded_secret(&self) -> Result<String> {
        let bytes = general_purpose::STANDARD
            .decode(self.secret.as_bytes())
            .map_err(|e| RelayError::Config(format!("invalid secret encoding: {}", e)))?;
        String::from_utf8(bytes)
            .map_err(|e| RelayError::Config(format!("secret is not valid UTF-8: {}", e)))
    }

    /// `[host]:port` as Postfix expects it in relayhost and the SASL map.
    pub fn relayhost(&self) -> String {
        format!("[{}]:{}", self.host, self.port)
    }
}

/// On-disk shape of the store file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreFile {
    profiles: Vec<SenderProfile>,
    active: Option<String>,
}

/// Current profile set plus the active selection, as returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreState {
    pub profiles: Vec<SenderProfile>,
    pub active: Option<String>,
}

/// File-backed store for sender profiles. All file IO for profiles
/// goes through here.
pub struct SenderStore {
    path: PathBuf,
}

impl SenderStore {
    pub fn new(path: PathBuf) -> Self {
        SenderStore { path }
    }

    async fn read_file(&self) -> StoreFile {
        match fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => StoreFile::default(),
            Ok(content) => match serde_json::from_str(&content) {
                Ok(file) => file,
                Err(e) => {
                    warn!("Corrupt sender store {}: {}", self.path.display(), e);
                    StoreFile::default()
                }
            },
            Err(_) => StoreFile::default(),
        }
    }

    async fn write_file(&self, file: &StoreFile) -> Result<()> {
        let content = serde_json::to_string_pretty(file)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content.as_bytes())
            .await
            .map_err(|e| RelayError::from_write_io(e, &tmp))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| RelayError::from_write_io(e, &self.path))?;
        Ok(())
    }

    /// Load every profile. A missing or unparsable file yields the
    /// empty set so the tool stays usable on first run.
    pub async fn load(&self) -> StoreState {
        let file = self.read_file().await;
        StoreState {
            profiles: file.profiles,
            active: file.active,
        }
    }

    pub async fn add(&self, profile: SenderProfile) -> Result<StoreState> {
        let mut file = self.read_file().await;
        if file.profiles.iter().any(|p| p.name == profile.name) {
            return Err(RelayError::Config(format!(
                "profile '{}' already exists",
                profile.name
            )));
        }
        info!("Adding sender profile '{}'", profile.name);
        file.profiles.push(profile);
        self.write_file(&file).await?;
        Ok(StoreState {
            profiles: file.profiles,
            active: file.active,
        })
    }

    pub async fn update(&self, name: &str, profile: SenderProfile) -> Result<StoreState> {
        let mut file = self.read_file().await;
        let idx = file
            .profiles
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| RelayError::NotFound(format!("profile '{}'", name)))?;
        // Renames carry the active marker along.
        if file.active.as_deref() == Some(name) {
            file.active = Some(profile.name.clone());
        }
        file.profiles[idx] = profile;
        self.write_file(&file).await?;
        Ok(StoreState {
            profiles: file.profiles,
            active: file.active,
        })
    }

    pub async fn delete(&self, name: &str) -> Result<StoreState> {
        let mut file = self.read_file().await;
        let before = file.profiles.len();
        file.profiles.retain(|p| p.name != name);
        if file.profiles.len() == before {
            return Err(RelayError::NotFound(format!("profile '{}'", name)));
        }
        if file.active.as_deref() == Some(name) {
            file.active = None;
        }
        self.write_file(&file).await?;
        Ok(StoreState {
            profiles: file.profiles,
            active: file.active,
        })
    }

    /// Mark a profile as the one main.cf generation uses. At most one
    /// profile is active at a time.
    pub async fn activate(&self, name: &str) -> Result<StoreState> {
        let mut file = self.read_file().await;
        if !file.profiles.iter().any(|p| p.name == name) {
            return Err(RelayError::NotFound(format!("profile '{}'", name)));
        }
        file.active = Some(name.to_string());
        self.write_file(&file).await?;
        Ok(StoreState {
            profiles: file.profiles,
            active: file.active,
        })
    }

    /// The profile currently selected for main.cf generation.
    pub async fn active_profile(&self) -> Result<SenderProfile> {
        let file = self.read_file().await;
        let name = file
            .active
            .ok_or_else(|| RelayError::NotFound("no active sender profile".to_string()))?;
        file.profiles
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| RelayError::NotFound(format!("profile '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn profile(name: &str) -> SenderProfile {
        SenderProfile {
            name: name.to_string(),
            host: "smtp.example.com".to_string(),
            port: 587,
            username: "user@example.com".to_string(),
            secret: SenderProfile::encode_secret("hunter2"),
            provider: Provider::Custom,
        }
    }

    fn store(dir: &TempDir) -> SenderStore {
        SenderStore::new(dir.path().join("sender.json"))
    }

    #[tokio::test]
    async fn test_load_missing_file_returns_empty() {
        let dir = TempDir::new().unwrap();
        let state = store(&dir).load().await;
        assert!(state.profiles.is_empty());
        assert!(state.active.is_none());
    }

    #[tokio::test]
    async fn test_load_corrupt_file_returns_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("sender.json"), b"{not json").unwrap();
        let state = store(&dir).load().await;
        assert!(state.profiles.is_empty());
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.add(profile("a")).await.unwrap();
        store.add(profile("b")).await.unwrap();

        let state = store.load().await;
        assert_eq!(state.profiles.len(), 2);
        let loaded = state.profiles.iter().find(|p| p.name == "a").unwrap();
        assert_eq!(loaded, &profile("a"));
        assert_eq!(loaded.decoded_secret().unwrap(), "hunter2");
    }

    #[tokio::test]
    async fn test_add_duplicate_name_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.add(profile("a")).await.unwrap();
        assert!(store.add(profile("a")).await.is_err());
    }

    #[tokio::test]
    async fn test_activate_and_active_profile() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.add(profile("a")).await.unwrap();
        let state = store.activate("a").await.unwrap();
        assert_eq!(state.active.as_deref(), Some("a"));
        assert_eq!(store.active_profile().await.unwrap().name, "a");
    }

    #[tokio::test]
    async fn test_activate_unknown_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = store(&dir).activate("nope").await.unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_active_clears_selection() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.add(profile("a")).await.unwrap();
        store.activate("a").await.unwrap();
        let state = store.delete("a").await.unwrap();
        assert!(state.profiles.is_empty());
        assert!(state.active.is_none());
        assert!(store.active_profile().await.is_err());
    }

    #[tokio::test]
    async fn test_update_renames_active_marker() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.add(profile("a")).await.unwrap();
        store.activate("a").await.unwrap();
        let state = store.update("a", profile("b")).await.unwrap();
        assert_eq!(state.active.as_deref(), Some("b"));
    }

    #[test]
    fn test_provider_endpoints() {
        assert_eq!(
            Provider::Gmail.default_endpoint(),
            Some(("smtp.gmail.com", 587))
        );
        assert!(Provider::Custom.default_endpoint().is_none());
    }

    #[test]
    fn test_relayhost_format() {
        assert_eq!(profile("a").relayhost(), "[smtp.example.com]:587");
    }
}
