//! Vinsly license maintenance tool
//!
//! Inspects and manages the license stored for a Vinsly installation:
//!   vinsly-licensectl status
//!   vinsly-licensectl check
//!   vinsly-licensectl activate <KEY> [--name studio-mac]
//!   vinsly-licensectl deactivate
//!   vinsly-licensectl reset
//!
//! State lives in `<data-dir>/license.json`.

use std::{path::PathBuf, sync::Arc};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vinsly_license::{
    ApiConfig, FileStore, HttpLicenseApi, LicenseError, LicenseOrchestrator, Notifier,
    NotifyLevel, PersistedState, ValidationConfig, ValidationState, DEFAULT_API_BASE_URL,
};

#[derive(Parser, Debug)]
#[command(name = "vinsly-licensectl")]
#[command(about = "Inspect and manage the Vinsly license on this machine")]
struct Args {
    /// Directory holding license.json [default: <platform data dir>/vinsly]
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// License service base URL
    #[arg(long, global = true, default_value = DEFAULT_API_BASE_URL)]
    api_url: String,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the stored license without contacting the service
    Status,
    /// Re-validate the stored license against the service
    Check,
    /// Activate a license key for this machine
    Activate {
        /// License key
        key: String,
        /// Instance name shown in the customer portal [default: hostname]
        #[arg(long)]
        name: Option<String>,
    },
    /// Release this machine's activation slot and forget the license
    Deactivate,
    /// Forget the stored license without contacting the service
    Reset,
}

/// Prints user-facing notices to stderr.
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, level: NotifyLevel, message: &str) {
        match level {
            NotifyLevel::Info => eprintln!("note: {message}"),
            NotifyLevel::Error => eprintln!("error: {message}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(log_level.into()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let data_dir = match args.data_dir {
        Some(dir) => dir,
        None => dirs::data_dir()
            .context("no platform data directory, pass --data-dir")?
            .join("vinsly"),
    };
    let store_path = data_dir.join("license.json");
    debug!("Using license store {}", store_path.display());

    let store = Arc::new(
        FileStore::open(&store_path)
            .await
            .with_context(|| format!("failed to open {}", store_path.display()))?,
    );

    match args.command {
        Command::Status => print_status(&PersistedState::new(store)).await?,
        Command::Reset => {
            PersistedState::new(store)
                .purge()
                .await
                .context("failed to clear license")?;
            println!("License cleared.");
        }
        Command::Check => {
            let orchestrator = connect(store, args.api_url)?;
            let state = orchestrator
                .bootstrap(&cancel_on_ctrl_c())
                .await
                .context("license check did not complete")?;
            info!("License state: {state:?}");
            println!("{}", describe(state));
        }
        Command::Activate { key, name } => {
            let name = match name {
                Some(name) => name,
                None => hostname::get()
                    .context("failed to read hostname, pass --name")?
                    .to_string_lossy()
                    .into_owned(),
            };
            let orchestrator = connect(store, args.api_url)?;
            let record = orchestrator
                .activate(&key, &name, &cancel_on_ctrl_c())
                .await?;
            println!(
                "Activated {} as {:?} ({}).",
                record.redacted_key(),
                record.instance_name.as_deref().unwrap_or(&name),
                usage(record.activation_usage, record.activation_limit)
            );
        }
        Command::Deactivate => {
            let orchestrator = connect(store, args.api_url)?;
            match orchestrator.deactivate(&cancel_on_ctrl_c()).await {
                Ok(()) => println!("Deactivated. This machine no longer holds a license."),
                Err(LicenseError::NotActivated) => println!("No license is stored."),
                Err(e) => return Err(e).context("deactivation failed"),
            }
        }
    }

    Ok(())
}

fn connect(store: Arc<FileStore>, api_url: String) -> Result<LicenseOrchestrator> {
    let api = HttpLicenseApi::new(ApiConfig {
        base_url: api_url,
        ..Default::default()
    })
    .context("failed to create license client")?;

    Ok(LicenseOrchestrator::new(
        Arc::new(api),
        store,
        Arc::new(ConsoleNotifier),
        ValidationConfig::default(),
    )?)
}

/// Token cancelled on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });
    cancel
}

async fn print_status(persisted: &PersistedState) -> Result<()> {
    let record = match persisted.load_record().await {
        Ok(Some(record)) => record,
        Ok(None) => {
            println!("No license is stored.");
            return Ok(());
        }
        Err(LicenseError::MalformedRecord(reason)) => {
            println!("Stored license is unreadable ({reason}); it will be discarded on next check.");
            return Ok(());
        }
        Err(e) => return Err(e).context("failed to read license"),
    };

    println!("  Key:            {}", record.redacted_key());
    println!("  Instance:       {}", record.instance_id);
    if let Some(name) = &record.instance_name {
        println!("  Instance name:  {name}");
    }
    println!("  Status:         {}", record.status);
    println!(
        "  Activations:    {}",
        usage(record.activation_usage, record.activation_limit)
    );
    println!("  Last checked:   {}", record.last_checked.to_rfc3339());
    match persisted.last_validated().await? {
        Some(at) => println!("  Last validated: {}", at.to_rfc3339()),
        None => println!("  Last validated: never"),
    }
    match persisted.grace_expiry().await {
        Ok(Some(at)) => println!("  Grace until:    {}", at.to_rfc3339()),
        Ok(None) => {}
        Err(e) => println!("  Grace until:    unreadable ({e})"),
    }
    Ok(())
}

fn describe(state: ValidationState) -> String {
    match state {
        ValidationState::Active => "Licensed.".to_string(),
        ValidationState::InGrace { expires_at } => {
            format!("Licensed (grace period until {}).", expires_at.to_rfc3339())
        }
        ValidationState::Expired => "License expired. Activate again to continue.".to_string(),
        ValidationState::Unknown | ValidationState::Bootstrapping => {
            "Not activated.".to_string()
        }
    }
}

fn usage(used: Option<u32>, limit: Option<u32>) -> String {
    match (used, limit) {
        (Some(used), Some(limit)) => format!("{used} of {limit} in use"),
        (Some(used), None) => format!("{used} in use"),
        _ => "unknown".to_string(),
    }
}
