//! Mock capability implementations for tests.
//!
//! These simulate the external commands without a real Postfix
//! installation: installs mutate an in-memory package set, the daemon
//! "creates" the pickup socket on start, and each mock can be armed to
//! fail so error paths stay testable.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{MailClient, MailDaemon, MapBuilder, PackageManager, QueueTool};
use crate::error::{RelayError, Result};

#[derive(Default)]
pub struct MockPackageManager {
    pub installed: Mutex<HashSet<String>>,
    pub fail_install: AtomicBool,
}

impl MockPackageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_installed(packages: &[&str]) -> Self {
        let pm = Self::default();
        let mut set = pm.installed.lock().unwrap();
        for p in packages {
            set.insert((*p).to_string());
        }
        drop(set);
        pm
    }
}

#[async_trait::async_trait]
impl PackageManager for MockPackageManager {
    async fn install(&self, packages: &[&str]) -> Result<()> {
        if self.fail_install.load(Ordering::SeqCst) {
            return Err(RelayError::Install("E: Unable to locate package".to_string()));
        }
        let mut set = self.installed.lock().unwrap();
        for p in packages {
            set.insert((*p).to_string());
        }
        Ok(())
    }

    async fn remove(&self, packages: &[&str]) -> Result<()> {
        let mut set = self.installed.lock().unwrap();
        for p in packages {
            set.remove(*p);
        }
        Ok(())
    }

    async fn is_installed(&self, package: &str) -> bool {
        self.installed.lock().unwrap().contains(package)
    }
}

/// Daemon double. When `socket_path` is set, `start` creates the file
/// there so readiness polling observes a socket appearing.
pub struct MockDaemon {
    pub socket_path: Option<PathBuf>,
    pub active: AtomicBool,
    pub fail_reload: AtomicBool,
    pub fail_start: AtomicBool,
    pub reload_count: Mutex<u32>,
}

impl MockDaemon {
    pub fn new(socket_path: Option<PathBuf>) -> Self {
        MockDaemon {
            socket_path,
            active: AtomicBool::new(false),
            fail_reload: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            reload_count: Mutex::new(0),
        }
    }
}

#[async_trait::async_trait]
impl MailDaemon for MockDaemon {
    async fn start(&self) -> Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(RelayError::Daemon("failed to start postfix.service".to_string()));
        }
        self.active.store(true, Ordering::SeqCst);
        if let Some(path) = &self.socket_path {
            std::fs::write(path, b"")?;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.active.store(false, Ordering::SeqCst);
        if let Some(path) = &self.socket_path {
            let _ = std::fs::remove_file(path);
        }
        Ok(())
    }

    async fn enable(&self) -> Result<()> {
        Ok(())
    }

    async fn disable(&self) -> Result<()> {
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        *self.reload_count.lock().unwrap() += 1;
        if self.fail_reload.load(Ordering::SeqCst) {
            return Err(RelayError::ReloadFailed("mail system is down".to_string()));
        }
        Ok(())
    }

    async fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn check_config(&self) -> bool {
        true
    }
}

#[derive(Default)]
pub struct MockMapBuilder {
    pub built: Mutex<Vec<PathBuf>>,
    pub fail: AtomicBool,
}

impl MockMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl MapBuilder for MockMapBuilder {
    async fn build_map(&self, path: &Path) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RelayError::MapBuildFailed(
                "postmap: fatal: open database failed".to_string(),
            ));
        }
        self.built.lock().unwrap().push(path.to_path_buf());
        // postmap writes <path>.db next to the source file.
        let mut db = path.as_os_str().to_owned();
        db.push(".db");
        std::fs::write(PathBuf::from(db), b"mock map")?;
        Ok(())
    }

    async fn rebuild_aliases(&self) -> Result<()> {
        Ok(())
    }
}

/// Queue double holding a canned `postqueue -p` listing. `flush`
/// empties it, matching a queue whose deferred mail all drains.
pub struct MockQueueTool {
    pub listing: Mutex<String>,
    pub fail_flush: AtomicBool,
}

impl MockQueueTool {
    pub fn empty() -> Self {
        MockQueueTool {
            listing: Mutex::new("Mail queue is empty\n".to_string()),
            fail_flush: AtomicBool::new(false),
        }
    }

    pub fn with_listing(listing: &str) -> Self {
        MockQueueTool {
            listing: Mutex::new(listing.to_string()),
            fail_flush: AtomicBool::new(false),
        }
    }
}

#[async_trait::async_trait]
impl QueueTool for MockQueueTool {
    async fn list(&self) -> Result<String> {
        Ok(self.listing.lock().unwrap().clone())
    }

    async fn flush(&self) -> Result<()> {
        if self.fail_flush.load(Ordering::SeqCst) {
            return Err(RelayError::QueueFailed(
                "postqueue: fatal: Connect to the Postfix showq service: No such file".to_string(),
            ));
        }
        *self.listing.lock().unwrap() = "Mail queue is empty\n".to_string();
        Ok(())
    }
}

#[derive(Default)]
pub struct MockMailClient {
    pub sent: Mutex<Vec<(String, String, String)>>,
}

impl MockMailClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl MailClient for MockMailClient {
    async fn send(
        &self,
        _from_name: &str,
        from_email: &str,
        to: &str,
        subject: &str,
        _body: &str,
    ) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((from_email.to_string(), to.to_string(), subject.to_string()));
        Ok(())
    }
}
