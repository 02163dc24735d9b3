//! cull - entry point for the triage engine

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};

use cull::config;
use cull::domain::EntrySource;
use cull::providers::ai::GeminiBackend;
use cull::providers::mail::{GmailMailbox, MailCredentials, Mailbox};
use cull::providers::notify::{NotifyChannel, SlackChannel};
use cull::services::{
    Announcer, AuditLog, BatchRunner, ClassifierSettings, DenylistService, RetryingClassifier,
    RunnerSettings, TriageEngine, TriageSettings,
};
use cull::storage::{KeychainAccess, StorageLayer};

#[derive(Parser, Debug)]
#[command(name = "cull")]
#[command(about = "Unattended spam triage for a single Gmail inbox")]
#[command(version)]
struct Cli {
    /// Settings file path (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database path (defaults to the platform data directory)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute one triage run and print the summary
    Run,

    /// Write a default settings file if none exists
    Init,

    /// Manage the sender denylist
    Denylist {
        #[command(subcommand)]
        command: DenylistCommands,
    },

    /// Show recent triage decisions
    Audit {
        /// Most recent decisions to show
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Send any pending digest without running triage
    Announce,

    /// Store credentials in the OS keychain
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
}

#[derive(Subcommand, Debug)]
enum DenylistCommands {
    /// Block a sender
    Add { address: String },

    /// Unblock a sender
    Remove { address: String },

    /// List every blocked sender
    List,
}

#[derive(Subcommand, Debug)]
enum AuthCommands {
    /// Store the Gmail OAuth credential bundle
    Gmail {
        #[arg(long)]
        client_id: String,

        #[arg(long)]
        client_secret: String,

        #[arg(long)]
        refresh_token: String,
    },

    /// Store the Gemini API key
    Gemini {
        #[arg(long)]
        api_key: String,
    },

    /// Store the Slack bot token
    Slack {
        #[arg(long)]
        bot_token: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let settings_path = match &cli.config {
        Some(path) => path.clone(),
        None => config::default_settings_path()?,
    };
    let settings = config::load_or_default(&settings_path)?;

    let db_path = match &cli.database {
        Some(path) => path.clone(),
        None => config::default_database_path()?,
    };

    match cli.command {
        Commands::Run => run_triage(&settings, &db_path).await,
        Commands::Init => init_settings(&settings_path),
        Commands::Denylist { command } => denylist_command(command, &settings, &db_path).await,
        Commands::Audit { limit } => show_audit(limit, &db_path).await,
        Commands::Announce => announce_pending(&settings, &db_path).await,
        Commands::Auth { command } => store_credentials(command, &settings).await,
    }
}

async fn run_triage(settings: &config::Settings, db_path: &Path) -> anyhow::Result<()> {
    let storage = StorageLayer::new(db_path).await?;
    let store = Arc::new(storage.store());

    let mailbox = open_mailbox(settings, storage.keychain()).await?;
    let classifier = build_classifier(settings, storage.keychain()).await?;
    let channel = build_channel(settings, storage.keychain()).await?;

    let denylist = Arc::new(DenylistService::new(
        store.clone(),
        settings.triage.grace_period_days,
    ));
    let audit: Arc<dyn AuditLog> = store.clone();
    let engine = TriageEngine::new(
        mailbox.clone(),
        classifier,
        denylist.clone(),
        audit,
        triage_settings(settings),
    );
    let announcer = Announcer::new(
        store.clone(),
        channel,
        settings.notify.digest_filename.clone(),
    );
    let runner = BatchRunner::new(mailbox, engine, denylist, announcer, runner_settings(settings));

    let summary = runner.run_once().await;
    println!("{summary}");

    // Per-message failures are already recorded in the summary; a nonzero
    // exit lets schedulers notice them.
    if !summary.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}

fn init_settings(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        println!("settings already exist at {}", path.display());
        return Ok(());
    }
    config::save(&config::Settings::default(), path)?;
    println!("wrote default settings to {}", path.display());
    println!("edit notify.channel_id and triage.trusted_domains before the first run");
    Ok(())
}

async fn denylist_command(
    command: DenylistCommands,
    settings: &config::Settings,
    db_path: &Path,
) -> anyhow::Result<()> {
    let storage = StorageLayer::new(db_path).await?;
    let service = DenylistService::new(storage.store(), settings.triage.grace_period_days);

    match command {
        DenylistCommands::Add { address } => {
            let entry = service
                .add(&address, EntrySource::Manual, Utc::now())
                .await?;
            println!("blocked {}", entry.address);
        }
        DenylistCommands::Remove { address } => {
            if service.remove(&address).await? {
                println!("unblocked {address}");
            } else {
                println!("{address} was not on the denylist");
            }
        }
        DenylistCommands::List => {
            let entries = service.all_entries().await?;
            if entries.is_empty() {
                println!("denylist is empty");
                return Ok(());
            }
            for entry in entries {
                println!(
                    "{}  added {}  {:?}{}",
                    entry.address,
                    entry.added_at.format("%Y-%m-%d"),
                    entry.source,
                    if entry.announced {
                        ""
                    } else {
                        "  (unannounced)"
                    }
                );
            }
        }
    }
    Ok(())
}

async fn show_audit(limit: u32, db_path: &Path) -> anyhow::Result<()> {
    let storage = StorageLayer::new(db_path).await?;
    let records = storage.store().recent(limit).await?;

    if records.is_empty() {
        println!("no triage decisions recorded yet");
        return Ok(());
    }
    for record in records {
        println!(
            "{}  {:<23}  {:<10}  {}  {}",
            record.timestamp.format("%Y-%m-%d %H:%M"),
            record.action.as_str(),
            record.label.as_str(),
            record.sender,
            record.reason
        );
    }
    Ok(())
}

async fn announce_pending(settings: &config::Settings, db_path: &Path) -> anyhow::Result<()> {
    let storage = StorageLayer::new(db_path).await?;
    let channel = build_channel(settings, storage.keychain()).await?;
    let announcer = Announcer::new(
        storage.store(),
        channel,
        settings.notify.digest_filename.clone(),
    );

    let sent = announcer.announce_pending(Utc::now()).await?;
    if sent == 0 {
        println!("nothing pending");
    } else {
        println!(
            "announced {sent} blocked sender{}",
            if sent == 1 { "" } else { "s" }
        );
    }
    Ok(())
}

async fn store_credentials(
    command: AuthCommands,
    settings: &config::Settings,
) -> anyhow::Result<()> {
    let keychain = KeychainAccess::new();

    match command {
        AuthCommands::Gmail {
            client_id,
            client_secret,
            refresh_token,
        } => {
            let credentials = MailCredentials {
                client_id,
                client_secret,
                refresh_token,
            };
            let key =
                KeychainAccess::mail_credentials_key(&settings.mailbox.credentials_keychain_id);
            keychain
                .store(&key, &serde_json::to_string(&credentials)?)
                .await?;
            println!("stored mailbox credentials under {key}");
        }
        AuthCommands::Gemini { api_key } => {
            let key = KeychainAccess::ai_api_key(&settings.classifier.api_key_keychain_id);
            keychain.store(&key, &api_key).await?;
            println!("stored classifier API key under {key}");
        }
        AuthCommands::Slack { bot_token } => {
            let key = KeychainAccess::notify_token_key(&settings.notify.bot_token_keychain_id);
            keychain.store(&key, &bot_token).await?;
            println!("stored bot token under {key}");
        }
    }
    Ok(())
}

async fn open_mailbox(
    settings: &config::Settings,
    keychain: &KeychainAccess,
) -> anyhow::Result<Arc<dyn Mailbox>> {
    let key = KeychainAccess::mail_credentials_key(&settings.mailbox.credentials_keychain_id);
    let raw = keychain.retrieve(&key).await?.with_context(|| {
        format!("no mailbox credentials stored under {key}, run `cull auth gmail` first")
    })?;
    let credentials: MailCredentials =
        serde_json::from_str(&raw).context("stored mailbox credentials are not valid JSON")?;

    let mut mailbox = GmailMailbox::new(credentials, settings.mailbox.processed_label.clone());
    mailbox.authenticate().await?;
    Ok(Arc::new(mailbox))
}

async fn build_classifier(
    settings: &config::Settings,
    keychain: &KeychainAccess,
) -> anyhow::Result<RetryingClassifier> {
    let key = KeychainAccess::ai_api_key(&settings.classifier.api_key_keychain_id);
    let api_key = keychain.retrieve(&key).await?.with_context(|| {
        format!("no classifier API key stored under {key}, run `cull auth gemini` first")
    })?;

    let mut backend = GeminiBackend::new(api_key, settings.classifier.model.clone());
    if let Some(base_url) = &settings.classifier.base_url {
        backend = backend.with_base_url(base_url.clone());
    }

    Ok(RetryingClassifier::new(
        Arc::new(backend),
        classifier_settings(settings),
    ))
}

async fn build_channel(
    settings: &config::Settings,
    keychain: &KeychainAccess,
) -> anyhow::Result<Arc<dyn NotifyChannel>> {
    if settings.notify.channel_id.is_empty() {
        bail!("notify.channel_id is not configured, edit the settings file first");
    }
    let key = KeychainAccess::notify_token_key(&settings.notify.bot_token_keychain_id);
    let token = keychain.retrieve(&key).await?.with_context(|| {
        format!("no bot token stored under {key}, run `cull auth slack` first")
    })?;
    Ok(Arc::new(SlackChannel::new(
        token,
        settings.notify.channel_id.clone(),
    )))
}

fn classifier_settings(settings: &config::Settings) -> ClassifierSettings {
    ClassifierSettings {
        max_attempts: settings.classifier.max_attempts,
        retry_cooldown: Duration::from_secs(settings.classifier.retry_cooldown_seconds),
        retryable_statuses: settings.classifier.retryable_statuses.clone(),
        max_body_chars: settings.classifier.max_body_chars,
        fallback_label: settings.classifier.fallback_label,
    }
}

fn triage_settings(settings: &config::Settings) -> TriageSettings {
    TriageSettings {
        trusted_domains: settings.triage.trusted_domains.clone(),
        spam_threshold: settings.triage.spam_threshold,
        block_style: settings.triage.block_style,
        blocked_label: settings.triage.blocked_label.clone(),
        low_confidence_label: settings.triage.low_confidence_label.clone(),
        classify_delay: Duration::from_millis(settings.classifier.classify_delay_ms),
    }
}

fn runner_settings(settings: &config::Settings) -> RunnerSettings {
    RunnerSettings {
        max_messages_per_run: settings.runner.max_messages_per_run,
        time_budget: Duration::from_secs(settings.runner.time_budget_seconds),
        review_enabled: settings.runner.review_enabled,
        review_window_days: settings.runner.review_window_days,
    }
}
