//! relay-rs: Postfix SMTP relay manager
//!
//! Installs and configures a Postfix relay on the local host, manages
//! sender credentials, and monitors deliveries, all driven over a REST
//! API.
//!
//! # Features
//!
//! - **Installation**: drives the distribution package manager and
//!   systemd to bring Postfix up, with readiness polling
//! - **Configuration**: idempotent edits to `main.cf` and the SASL
//!   password map, with provider presets
//! - **Monitoring**: mail log classification and deferred queue
//!   inspection via `postqueue`
//! - **Safety**: atomic file replacement, pre-install backups and a
//!   restore path
//!
//! # Example
//!
//! ```no_run
//! use relay_rs::config::Config;
//! use relay_rs::postfix::PostfixWriter;
//! use relay_rs::system::host::{PostmapBuilder, SystemdMailDaemon};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let writer = PostfixWriter::new(
//!         config.postfix.main_cf_path.clone(),
//!         config.postfix.sasl_passwd_path.clone(),
//!         Arc::new(PostmapBuilder),
//!         Arc::new(SystemdMailDaemon),
//!     );
//!     let snapshot = writer.snapshot().await;
//!     println!("{} managed directives set", snapshot.directives.len());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod backup;
pub mod config;
pub mod error;
pub mod install;
pub mod postfix;
pub mod store;
pub mod system;

pub use config::Config;
pub use error::{RelayError, Result};
