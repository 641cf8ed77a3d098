//! bastion-init - boot-time provisioning for SSH bastion hosts
//!
//! - `provision`: run the key provisioner on this instance
//! - `render-user-data`: produce instance user data from a bastion config
//! - `check`: validate a bastion config and print its ingress rules

use anyhow::{Context, Result};
use clap::builder::FalseyValueParser;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use bastion_init::config::loader::{load_config_file, load_validated, validate_config};
use bastion_init::config::{DEFAULT_PROXY_USER, ProvisionerConfig};
use bastion_init::paths::ProvisionPaths;
use bastion_init::secrets::agent::{AGENT_BASE_URL, AGENT_TOKEN_FILE, SecretsAgent};
use bastion_init::secrets::{BootSecretStore, SecretRef};
use bastion_init::system::SystemRunner;
use bastion_init::{Provisioner, userdata};

#[derive(Parser)]
#[command(name = "bastion-init")]
#[command(
    author,
    version,
    about = "Boot-time provisioning for SSH bastion hosts",
    long_about = None
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the proxy user, its keys and the host keys on this instance
    Provision(ProvisionArgs),
    /// Render instance user data from a bastion config
    RenderUserData {
        /// Bastion config (YAML)
        #[arg(short, long)]
        config: PathBuf,
        /// Gzip the output
        #[arg(long)]
        gzip: bool,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a bastion config and print its ingress rules
    Check {
        /// Bastion config (YAML)
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(clap::Args)]
struct ProvisionArgs {
    /// Take every setting from a bastion config instead of flags
    #[arg(long, env = "BASTION_CONFIG")]
    config: Option<PathBuf>,

    /// Proxy user name
    #[arg(long, env = "BASTION_PROXY_USER", default_value = DEFAULT_PROXY_USER)]
    proxy_user: String,

    /// Give the proxy user an interactive shell
    #[arg(long, env = "BASTION_ALLOW_SHELL", value_parser = FalseyValueParser::new())]
    allow_shell: bool,

    /// Block the metadata service for non-root processes
    #[arg(long, env = "BASTION_BLOCK_METADATA_SERVICE", value_parser = FalseyValueParser::new())]
    block_metadata_service: bool,

    /// Space-separated base64-encoded public keys
    #[arg(long, env = "BASTION_PUBLIC_KEYS", default_value = "")]
    public_keys: String,

    /// Secret reference for the Ed25519 host private key
    #[arg(long, env = "BASTION_ED25519_HOST_KEY_SECRET")]
    ed25519_host_key_secret: Option<String>,

    /// Secret reference for the ECDSA host private key
    #[arg(long, env = "BASTION_ECDSA_HOST_KEY_SECRET")]
    ecdsa_host_key_secret: Option<String>,

    /// Secrets Manager agent endpoint
    #[arg(long, env = "BASTION_SECRETS_AGENT_URL", default_value = AGENT_BASE_URL)]
    secrets_agent_url: String,

    /// Secrets Manager agent token file
    #[arg(long, env = "BASTION_SECRETS_AGENT_TOKEN_FILE", default_value = AGENT_TOKEN_FILE)]
    secrets_agent_token_file: PathBuf,

    /// Filesystem root to provision
    #[arg(long, default_value = "/", hide = true)]
    root: PathBuf,
}

impl ProvisionArgs {
    async fn provisioner_config(&self) -> Result<ProvisionerConfig> {
        if let Some(path) = &self.config {
            let config = load_config_file(path).await?;
            return Ok(config.provisioner_config()?);
        }

        let config = ProvisionerConfig {
            proxy_user: self.proxy_user.clone(),
            allow_shell: self.allow_shell,
            block_metadata_service: self.block_metadata_service,
            public_keys: ProvisionerConfig::split_public_keys(&self.public_keys),
            ed25519_host_key: SecretRef::parse_optional(self.ed25519_host_key_secret.as_deref())?,
            ecdsa_host_key: SecretRef::parse_optional(self.ecdsa_host_key_secret.as_deref())?,
        };
        config.validate()?;
        Ok(config)
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

async fn provision(args: ProvisionArgs) -> Result<()> {
    let config = args.provisioner_config().await?;

    let uses_agent = [&config.ed25519_host_key, &config.ecdsa_host_key]
        .into_iter()
        .any(|r| matches!(r, Some(SecretRef::Managed(_))));
    let agent = if uses_agent {
        SecretsAgent::from_token_file(&args.secrets_agent_url, &args.secrets_agent_token_file)
            .await?
    } else {
        SecretsAgent::new(&args.secrets_agent_url, "")?
    };

    let store = BootSecretStore::new(agent);
    let runner = SystemRunner;
    let provisioner =
        Provisioner::new(&runner, &store).with_paths(ProvisionPaths::with_root(&args.root));

    let report = provisioner.run(&config).await.context("provisioning failed")?;
    if !report.rejected.is_empty() {
        warn!("{} keys were rejected", report.rejected.len());
    }
    provisioner.write_report(&report).await;

    info!(
        "Provisioned {}: {} keys decoded, {} added",
        config.proxy_user, report.keys_decoded, report.keys_added
    );
    Ok(())
}

async fn render_user_data(config: PathBuf, gzip: bool, output: Option<PathBuf>) -> Result<()> {
    let validated = load_validated(&config)
        .await
        .with_context(|| format!("invalid bastion config {}", config.display()))?;
    let provisioner_config = validated.config.provisioner_config()?;
    let user_data = userdata::render_user_data(&provisioner_config)?;

    let bytes = if gzip {
        userdata::compress_user_data(&user_data)?
    } else {
        user_data.into_bytes()
    };

    match output {
        Some(path) => {
            tokio::fs::write(&path, &bytes)
                .await
                .with_context(|| format!("cannot write {}", path.display()))?;
            info!("Wrote {} bytes of user data to {}", bytes.len(), path.display());
        }
        None => std::io::stdout().write_all(&bytes)?,
    }
    Ok(())
}

async fn check(config: PathBuf) -> Result<()> {
    let raw = load_config_file(&config).await?;
    let validated = validate_config(raw)
        .with_context(|| format!("invalid bastion config {}", config.display()))?;

    let summary = serde_json::json!({
        "proxy_user": validated.config.proxy_user_name,
        "public_keys": validated.config.public_keys.len(),
        "ingress": validated.ingress.rules(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Provision(args) => {
            info!("Running key provisioner");
            provision(args).await
        }
        Commands::RenderUserData {
            config,
            gzip,
            output,
        } => render_user_data(config, gzip, output).await,
        Commands::Check { config } => check(config).await,
    }
}
