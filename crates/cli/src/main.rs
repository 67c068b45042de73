use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    relay_config::{RelayConfig, discover_and_load, validate},
    relay_gateway::AppState,
    relay_metrics::{MetricsRecorderConfig, init_metrics},
};

#[derive(Parser)]
#[command(name = "relay", about = "relay — multi-tenant agent orchestration gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log filter (trace, debug, info, warn, error, or a full directive).
    #[arg(long, global = true)]
    log_filter: Option<String>,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true, env = "RELAY_BIND")]
    bind: Option<String>,
    /// MCP WebSocket port (overrides config value).
    #[arg(long, global = true, env = "RELAY_WS_PORT")]
    ws_port: Option<u16>,
    /// Webhook/management HTTP port (overrides config value).
    #[arg(long, global = true, env = "RELAY_WEBHOOK_PORT")]
    webhook_port: Option<u16>,
}

#[derive(Clone, Subcommand)]
enum Commands {
    /// Start the gateway (default when no subcommand is given).
    Serve,
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Generate a fresh base64 master key for the credential vault.
    GenerateMasterKey,
    /// Issue an API key for a tenant.
    IssueKey {
        /// Tenant id (UUID). Omit to create a new tenant id.
        #[arg(long)]
        tenant: Option<String>,
        /// Label shown in key listings.
        #[arg(long, default_value = "cli")]
        label: String,
    },
}

#[derive(Clone, Subcommand)]
enum ConfigAction {
    /// Validate the discovered config file and print diagnostics.
    Validate,
    /// Print the effective configuration as TOML.
    Show,
}

fn init_logging(cli: &Cli, config: &RelayConfig) {
    let filter = cli
        .log_filter
        .clone()
        .unwrap_or_else(|| config.logging.filter.clone());
    let env_filter = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));

    if cli.json_logs || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init();
    }
}

fn apply_cli_overrides(cli: &Cli, config: &mut RelayConfig) {
    if let Some(bind) = &cli.bind {
        config.gateway.bind = bind.clone();
    }
    if let Some(port) = cli.ws_port {
        config.gateway.ws_port = port;
    }
    if let Some(port) = cli.webhook_port {
        config.gateway.webhook_port = port;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = discover_and_load();
    apply_cli_overrides(&cli, &mut config);

    match cli.command.clone().unwrap_or(Commands::Serve) {
        Commands::Serve => {
            init_logging(&cli, &config);
            serve(config).await
        },
        Commands::Config { action } => config_command(config, action),
        Commands::GenerateMasterKey => {
            println!("{}", relay_vault::vault::generate_master_key());
            Ok(())
        },
        Commands::IssueKey { tenant, label } => {
            init_logging(&cli, &config);
            issue_key(config, tenant, &label).await
        },
    }
}

async fn serve(config: RelayConfig) -> anyhow::Result<()> {
    let validation = validate(&config);
    for diagnostic in &validation.diagnostics {
        eprintln!(
            "config {}: {}: {}",
            diagnostic.severity, diagnostic.path, diagnostic.message
        );
    }
    if validation.has_errors() {
        anyhow::bail!("configuration is invalid");
    }

    let metrics = init_metrics(MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        global_labels: vec![("service".into(), "relay".into())],
    })?;

    let state = AppState::build(config, metrics).await?;

    // Ctrl-C (or SIGTERM via the platform) starts the ordered shutdown:
    // stop accepting, stop consuming, drain, force-close.
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        shutdown.cancel();
    });

    relay_gateway::run(state).await
}

fn config_command(config: RelayConfig, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Validate => {
            let validation = validate(&config);
            if validation.diagnostics.is_empty() {
                println!("configuration ok");
                return Ok(());
            }
            for diagnostic in &validation.diagnostics {
                println!(
                    "{}: {}: {}",
                    diagnostic.severity, diagnostic.path, diagnostic.message
                );
            }
            if validation.has_errors() {
                anyhow::bail!("configuration is invalid");
            }
            Ok(())
        },
        ConfigAction::Show => {
            // Secrets are env-substituted by the loader; re-serializing would
            // print them. Blank the master key before showing.
            let mut shown = config;
            if shown.vault.master_key.is_some() {
                shown.vault.master_key = Some("<set>".into());
            }
            println!("{}", toml::to_string_pretty(&shown)?);
            Ok(())
        },
    }
}

async fn issue_key(
    config: RelayConfig,
    tenant: Option<String>,
    label: &str,
) -> anyhow::Result<()> {
    use secrecy::ExposeSecret;

    let master_key = config
        .vault
        .master_key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("vault.master_key is required to issue keys"))?;
    let pool = sqlx_pool(&config).await?;
    let vault = relay_vault::TenantVault::new(&master_key)?;
    let store = relay_vault::CredentialStore::new(pool, vault).await?;

    let tenant_id: relay_common::TenantId = match tenant {
        Some(raw) => raw.parse()?,
        None => relay_common::TenantId::new(),
    };
    let key = store.create_api_key(tenant_id, label).await?;
    println!("tenant: {tenant_id}");
    println!("api key: {}", key.expose_secret());
    println!("(store this key now; only its hash is kept)");
    Ok(())
}

async fn sqlx_pool(config: &RelayConfig) -> anyhow::Result<sqlx::SqlitePool> {
    Ok(sqlx::SqlitePool::connect(&config.database.url).await?)
}
