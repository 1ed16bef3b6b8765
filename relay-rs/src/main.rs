use clap::Parser;
use relay_rs::api::{ApiServer, AppState};
use relay_rs::backup::BackupManager;
use relay_rs::config::Config;
use relay_rs::install::Installer;
use relay_rs::postfix::{Monitor, PostfixWriter};
use relay_rs::store::SenderStore;
use relay_rs::system::host::{
    HostPackageManager, MailutilsClient, PostmapBuilder, PostqueueTool, SystemdMailDaemon,
};
use relay_rs::system::{PackageFlavor, SystemDetector};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "relay-rs")]
#[command(about = "Postfix SMTP relay manager", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listen address override (e.g. 127.0.0.1:8000)
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration before logging so the level is honored
    let config = if std::path::Path::new(&cli.config).exists() {
        Config::from_file(&cli.config)?
    } else {
        Config::default()
    };

    let level = match config.logging.level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Initialize logging
    if config.logging.format == "json" {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .pretty()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("Starting relay-rs");
    info!("  main.cf: {}", config.postfix.main_cf_path.display());
    info!("  mail log: {}", config.postfix.mail_log_path.display());
    info!("  backups: {}", config.postfix.backup_dir.display());

    let detector = SystemDetector::new();
    let flavor = match detector.detect_package_flavor().await {
        Some(flavor) => flavor,
        None => {
            warn!("No supported package manager found, assuming apt");
            PackageFlavor::Apt
        }
    };
    info!("Package manager: {}", flavor.binary());

    let daemon = Arc::new(SystemdMailDaemon);
    let writer = Arc::new(PostfixWriter::new(
        config.postfix.main_cf_path.clone(),
        config.postfix.sasl_passwd_path.clone(),
        Arc::new(PostmapBuilder),
        daemon.clone(),
    ));
    let backups = Arc::new(BackupManager::new(
        config.postfix.backup_dir.clone(),
        vec![
            config.postfix.main_cf_path.clone(),
            config.postfix.sasl_passwd_path.clone(),
            config.postfix.sender_store_path.clone(),
        ],
    ));
    let installer = Arc::new(Installer::new(
        Arc::new(HostPackageManager::new(flavor)),
        daemon.clone(),
        writer.clone(),
        backups.clone(),
        config.postfix.pickup_socket_path.clone(),
        Duration::from_secs(config.install.readiness_poll_secs),
        Duration::from_secs(config.install.readiness_timeout_secs),
    ));
    let monitor = Arc::new(Monitor::new(
        config.postfix.mail_log_path.clone(),
        Arc::new(PostqueueTool),
    ));

    let state = Arc::new(AppState {
        store: SenderStore::new(config.postfix.sender_store_path.clone()),
        writer,
        installer,
        monitor,
        detector,
        daemon,
        backups,
        mailer: Arc::new(MailutilsClient),
        config_lock: Mutex::new(()),
    });

    let addr = cli.listen.unwrap_or_else(|| config.server.listen_addr.clone());
    let server = ApiServer::new(state, addr);
    server.run().await?;

    Ok(())
}
