use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Cell, CellAlignment, Table};
use hsm_console_core::{
    ApiClient, AuthSession, ConsoleConfig, CryptoWorkflow, HsmApi, LoginForm, Route, Session,
    SignatureAlgorithm, Slot, SlotKeyAggregator, StoreFile, WorkflowMode,
};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// HSM Console - operator console for a remote HSM service
#[derive(Parser, Debug)]
#[command(name = "hsm-console", author, version, propagate_version = true)]
struct Cli {
    /// API base URL, including the version prefix (overrides the config file).
    #[arg(long, env = "HSM_CONSOLE_ENDPOINT")]
    endpoint: Option<String>,

    /// Custom CA bundle (PEM) for HTTPS endpoints.
    #[arg(long)]
    ca_bundle: Option<PathBuf>,

    /// Request timeout in seconds.
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Configuration file path.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List HSM slots.
    Slots,
    /// List the keys of every slot.
    Keys,
    /// Sign a message with a key from a slot.
    Sign {
        /// Slot identifier in decimal form.
        #[arg(long)]
        slot: u64,
        /// Label of the signing key.
        #[arg(long)]
        key: String,
        #[arg(long, value_enum)]
        algorithm: Option<AlgorithmArg>,
        message: String,
    },
    /// Verify a base64 signature with a key from a slot.
    Verify {
        /// Slot identifier in decimal form.
        #[arg(long)]
        slot: u64,
        /// Label of the verification key.
        #[arg(long)]
        key: String,
        #[arg(long, value_enum)]
        algorithm: Option<AlgorithmArg>,
        /// Signature to check (base64).
        #[arg(long)]
        signature: String,
        message: String,
    },
    /// Authenticate against the service, then show the key dashboard.
    Login {
        #[arg(long)]
        username: String,
        #[arg(long, env = "HSM_CONSOLE_PASSWORD", hide_env_values = true, default_value = "")]
        password: String,
        /// Submit client key store and trust store (mutual TLS).
        #[arg(long)]
        mtls: bool,
        /// Client key store (.jks/.p12).
        #[arg(long)]
        key_store: Option<PathBuf>,
        #[arg(
            long,
            env = "HSM_CONSOLE_KEY_STORE_PASSWORD",
            hide_env_values = true,
            default_value = ""
        )]
        key_store_password: String,
        /// Trust store (.jks/.p12).
        #[arg(long)]
        trust_store: Option<PathBuf>,
        #[arg(
            long,
            env = "HSM_CONSOLE_TRUST_STORE_PASSWORD",
            hide_env_values = true,
            default_value = ""
        )]
        trust_store_password: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AlgorithmArg {
    #[value(name = "SHA256withRSA")]
    Sha256WithRsa,
    #[value(name = "SHA256withECDSA")]
    Sha256WithEcdsa,
}

impl From<AlgorithmArg> for SignatureAlgorithm {
    fn from(value: AlgorithmArg) -> SignatureAlgorithm {
        match value {
            AlgorithmArg::Sha256WithRsa => SignatureAlgorithm::Sha256WithRsa,
            AlgorithmArg::Sha256WithEcdsa => SignatureAlgorithm::Sha256WithEcdsa,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = load_config(&cli)?;
    let settings = config
        .client_settings()
        .context("preparing HTTP client settings")?;
    let api: Arc<dyn HsmApi> = Arc::new(ApiClient::new(&settings)?);
    debug!(endpoint = %settings.base_url, "console starting");

    match cli.command {
        Commands::Slots => show_slots(&api).await?,
        Commands::Keys => show_keys(&api).await?,
        Commands::Sign {
            slot,
            key,
            algorithm,
            message,
        } => {
            let algorithm = algorithm.map(Into::into).unwrap_or(config.default_algorithm);
            run_workflow(&api, WorkflowMode::Sign, slot, &key, algorithm, message, None).await?
        }
        Commands::Verify {
            slot,
            key,
            algorithm,
            signature,
            message,
        } => {
            let algorithm = algorithm.map(Into::into).unwrap_or(config.default_algorithm);
            run_workflow(
                &api,
                WorkflowMode::Verify,
                slot,
                &key,
                algorithm,
                message,
                Some(signature),
            )
            .await?
        }
        Commands::Login {
            username,
            password,
            mtls,
            key_store,
            key_store_password,
            trust_store,
            trust_store_password,
        } => {
            let form = LoginForm {
                username,
                password,
                use_ssl: mtls,
                key_store: key_store.as_deref().map(StoreFile::from_path).transpose()?,
                key_store_password,
                trust_store: trust_store.as_deref().map(StoreFile::from_path).transpose()?,
                trust_store_password,
            };
            login(&api, form).await?
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<ConsoleConfig> {
    let mut config = match &cli.config {
        Some(path) => ConsoleConfig::load_from(path),
        None => ConsoleConfig::load(),
    }
    .context("loading configuration")?;

    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = endpoint.clone();
    }
    if let Some(ca_bundle) = &cli.ca_bundle {
        config.ca_bundle_path = Some(ca_bundle.clone());
    }
    if let Some(timeout) = cli.timeout {
        config.timeout_secs = timeout;
    }
    Ok(config)
}

async fn show_slots(api: &Arc<dyn HsmApi>) -> anyhow::Result<()> {
    let slots = SlotKeyAggregator::new(api.clone())
        .list_slots()
        .await
        .context("listing slots")?;
    println!("{}", slot_table(&slots));
    Ok(())
}

async fn show_keys(api: &Arc<dyn HsmApi>) -> anyhow::Result<()> {
    let map = SlotKeyAggregator::new(api.clone())
        .aggregate()
        .await
        .context("listing slots")?;
    if map.is_empty() {
        println!("No slots reported by the HSM");
        return Ok(());
    }

    for entry in map.iter() {
        let slot = &entry.slot;
        println!("Keys in Slot {} ({})", slot.slot_index, slot.slot_decimal);

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["ID", "Label", "Type", "Subject", "Usage", "Access"]);
        if entry.keys.is_empty() {
            table.add_row(vec![Cell::new("No keys found in this slot")
                .set_alignment(CellAlignment::Center)]);
        }
        for key in &entry.keys {
            table.add_row(vec![
                key.id.as_str(),
                key.display_label(),
                key.key_type.as_str(),
                key.subject.as_str(),
                key.usage.as_str(),
                key.access.as_str(),
            ]);
        }
        println!("{table}");
    }
    Ok(())
}

fn slot_table(slots: &[Slot]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        "Index",
        "Hex Value",
        "Decimal Value",
        "Label",
        "Manufacturer",
        "Model",
        "Flags",
        "HW Version",
        "FW Version",
        "Serial",
        "PIN Min/Max",
        "Initialized",
    ]);
    for slot in slots {
        table.add_row(vec![
            slot.slot_index.to_string(),
            slot.slot_hex.clone(),
            slot.slot_decimal.to_string(),
            slot.label.clone(),
            slot.manufacturer.clone(),
            slot.model.clone(),
            slot.flags.clone(),
            slot.hw_version.clone(),
            slot.fw_version.clone(),
            slot.serial.clone(),
            slot.pin_min_max.clone(),
            if slot.initialized { "Yes" } else { "No" }.to_string(),
        ]);
    }
    table
}

async fn run_workflow(
    api: &Arc<dyn HsmApi>,
    mode: WorkflowMode,
    slot: u64,
    key: &str,
    algorithm: SignatureAlgorithm,
    message: String,
    signature: Option<String>,
) -> anyhow::Result<()> {
    let mut workflow = CryptoWorkflow::new(api.clone(), mode);
    let usable = workflow.load_slot(slot).await;
    if usable.is_empty() {
        bail!(
            "no labelled keys usable to {} in slot {slot}",
            mode.usage_verb()
        );
    }
    let offered: Vec<String> = usable.iter().map(|k| k.label.clone()).collect();
    workflow
        .select_key(key)
        .with_context(|| format!("available keys: {}", offered.join(", ")))?;
    workflow.set_algorithm(algorithm);
    workflow.set_message(message);
    if let Some(signature) = signature {
        workflow.set_signature(signature);
    }

    let outcome = workflow.submit().await?;
    match mode {
        WorkflowMode::Sign if !outcome.is_failure() => {
            println!("Signature (Base64): {}", outcome.display_text())
        }
        _ => println!("{}", outcome.display_text()),
    }
    if let Some(detail) = outcome.failure_detail() {
        bail!("{detail}");
    }
    Ok(())
}

async fn login(api: &Arc<dyn HsmApi>, form: LoginForm) -> anyhow::Result<()> {
    let session = Session::new();
    let mut auth = AuthSession::new(api.clone(), session.clone()).with_form(form);
    let success = auth.login().await?;
    if let Some(message) = &success.message {
        println!("{message}");
    }

    match session.guard(success.navigate_to) {
        Route::Dashboard => show_keys(api).await,
        Route::Login => bail!("session is not authenticated"),
    }
}
