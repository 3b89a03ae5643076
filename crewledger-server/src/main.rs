//! crewledger - SMS receipt capture and bookkeeping server
//!
//! `serve` runs the webhook and dashboard; the other subcommands are one-shot
//! maintenance jobs against the same database and configuration.

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand, ValueEnum};
use crewledger_common::config::{AppConfig, ConfigLoader};
use crewledger_common::db::{init_database, seed_sample_projects};
use std::fs::File;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use crewledger_server::api::week_range;
use crewledger_server::services::cert_status::run_cert_status_refresh;
use crewledger_server::services::importer::{
    import_employees, import_maintenance, import_vehicles, ImportSummary,
};
use crewledger_server::services::mailer::SmtpMailer;
use crewledger_server::services::oauth::GoogleOAuth;
use crewledger_server::services::reports::send_weekly_report;
use crewledger_server::services::twilio::TwilioMediaFetcher;
use crewledger_server::services::vision::OpenAiVisionClient;
use crewledger_server::{build_router, AppState};

/// Command-line arguments for crewledger
#[derive(Parser, Debug)]
#[command(name = "crewledger")]
#[command(about = "SMS receipt capture, crew records and weekly bookkeeping reports", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    settings: SettingArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

/// Settings that override the environment and the config file
#[derive(Args, Debug)]
struct SettingArgs {
    /// TOML config file
    #[arg(long, global = true, env = "CREWLEDGER_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    database_path: Option<PathBuf>,

    #[arg(long, global = true)]
    receipt_storage_path: Option<PathBuf>,

    #[arg(long, global = true)]
    host: Option<String>,

    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Externally visible base URL, used for webhook signatures and OAuth callbacks
    #[arg(long, global = true)]
    public_base_url: Option<String>,

    #[arg(long, global = true)]
    accountant_email: Option<String>,

    #[arg(long, global = true)]
    session_hours: Option<i64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,

    /// Create or upgrade the database schema
    InitDb {
        /// Insert the sample projects as well
        #[arg(long)]
        seed: bool,
    },

    /// Email the weekly spending report
    SendWeeklyReport {
        /// YYYY-MM-DD; defaults to the last full Monday to Sunday week
        #[arg(long)]
        week_start: Option<String>,

        #[arg(long)]
        week_end: Option<String>,

        /// Defaults to the configured accountant address
        #[arg(long)]
        recipient: Option<String>,
    },

    /// Recompute certification status and record expiry alerts
    RefreshCerts,

    /// Bulk-load records from a CSV file
    Import {
        #[arg(value_enum)]
        kind: ImportKind,

        csv: PathBuf,

        /// Validate and report without committing
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ImportKind {
    Employees,
    Vehicles,
    Maintenance,
}

impl SettingArgs {
    fn load(&self) -> Result<AppConfig> {
        let config = ConfigLoader::new()
            .cli("database_path", self.database_path.as_ref().map(|p| p.display()))?
            .cli(
                "receipt_storage_path",
                self.receipt_storage_path.as_ref().map(|p| p.display()),
            )?
            .cli("host", self.host.as_ref())?
            .cli("port", self.port)?
            .cli("public_base_url", self.public_base_url.as_ref())?
            .cli("accountant_email", self.accountant_email.as_ref())?
            .cli("session_hours", self.session_hours)?
            .file(self.config.as_deref())?
            .load()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!(
        "Starting CrewLedger v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let cli = Cli::parse();
    let config = cli.settings.load().context("Failed to load configuration")?;

    info!("Database path: {}", config.database_path.display());
    let pool = init_database(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(pool, config).await,
        Command::InitDb { seed } => {
            if seed {
                let inserted = seed_sample_projects(&pool).await?;
                info!("Seeded {} sample projects", inserted);
            }
            info!("Database ready");
            Ok(())
        }
        Command::SendWeeklyReport {
            week_start,
            week_end,
            recipient,
        } => {
            let (start, end) = week_range(week_start.as_deref(), week_end.as_deref())?;
            let mailer = SmtpMailer::new(config.smtp.clone());
            let outcome = send_weekly_report(
                &pool,
                &mailer,
                start,
                end,
                recipient.as_deref(),
                &config.accountant_email,
            )
            .await
            .context("Weekly report failed")?;
            info!(%start, %end, ?outcome, "Weekly report finished");
            Ok(())
        }
        Command::RefreshCerts => {
            let summary = run_cert_status_refresh(&pool, Local::now().date_naive()).await?;
            info!(
                checked = summary.checked,
                alerts_created = summary.alerts_created,
                "Certification refresh complete"
            );
            Ok(())
        }
        Command::Import { kind, csv, dry_run } => {
            let file = File::open(&csv)
                .with_context(|| format!("Failed to open {}", csv.display()))?;
            let summary = match kind {
                ImportKind::Employees => import_employees(&pool, file, dry_run).await,
                ImportKind::Vehicles => import_vehicles(&pool, file, dry_run).await,
                ImportKind::Maintenance => import_maintenance(&pool, file, dry_run).await,
            }
            .with_context(|| format!("Import of {} failed", csv.display()))?;
            report_import(kind, &summary, dry_run);
            Ok(())
        }
    }
}

fn report_import(kind: ImportKind, summary: &ImportSummary, dry_run: bool) {
    for problem in &summary.errors {
        warn!("{:?} import: {}", kind, problem);
    }
    info!(
        inserted = summary.inserted,
        skipped = summary.skipped,
        errors = summary.errors.len(),
        dry_run,
        "{:?} import complete",
        kind
    );
}

async fn serve(pool: sqlx::SqlitePool, config: AppConfig) -> Result<()> {
    if config.twilio.auth_token.is_empty() {
        warn!("TWILIO_AUTH_TOKEN not set; webhook signatures will not be checked");
    }
    if config.openai_api_key.is_empty() {
        warn!("OPENAI_API_KEY not set; receipt images will be flagged for manual entry");
    }

    tokio::fs::create_dir_all(&config.receipt_storage_path)
        .await
        .with_context(|| {
            format!(
                "Failed to create receipt storage {}",
                config.receipt_storage_path.display()
            )
        })?;

    let vision = OpenAiVisionClient::new(config.openai_api_key.clone(), config.openai_model.clone())?;
    let media = TwilioMediaFetcher::new(
        config.twilio.account_sid.clone(),
        config.twilio.auth_token.clone(),
    )?;
    let mailer = SmtpMailer::new(config.smtp.clone());
    let oauth = GoogleOAuth::new(config.google.clone())?;

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.host, config.port))?;

    let state = AppState::new(
        pool,
        config,
        Arc::new(vision),
        Arc::new(media),
        Arc::new(mailer),
        Arc::new(oauth),
    );
    let app = build_router(state);

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to {}", addr))?;

    info!("Health check: http://{}/health", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
