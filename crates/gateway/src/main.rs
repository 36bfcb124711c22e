//! Certomat - Main entry point
//!
//! HTTPS gateway that turns CSRs from whitelisted hosts into publicly trusted
//! certificates.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, ValueEnum};
use tracing::{error, info, warn};

use certomat::Gateway;
use certomat_config::validate::{agent::validate_agent, certs::validate_certificates};
use certomat_config::Config;

/// Certomat - certificates for registered hosts, from a CSR
#[derive(Parser, Debug)]
#[command(name = "certomat")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Administrative base domain; the gateway serves certomat.<domain>
    #[arg(long, env = "CERTOMAT_DOMAIN")]
    domain: Option<String>,

    /// Use the production CA instead of staging
    #[arg(long)]
    prod: bool,

    /// Certificate cache directory
    #[arg(long, env = "CERTOMAT_CACHE")]
    cache: Option<PathBuf>,

    /// Configuration file (KDL)
    #[arg(short = 'c', long = "config", env = "CERTOMAT_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (default: certomat.<domain>:443)
    #[arg(long)]
    listen: Option<String>,

    /// Directory for the issuance agent's state and result files
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Issuance agent executable
    #[arg(long)]
    agent: Option<String>,

    /// Contact email for CA account registration
    #[arg(long)]
    email: Option<String>,

    /// Upper bound on one agent run, in seconds
    #[arg(long)]
    agent_timeout_secs: Option<u64>,

    /// Check CSR names against the domain whitelist
    #[arg(long)]
    enforce_csr_policy: bool,

    /// Enable verbose logging (debug level)
    #[arg(long)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Validate configuration and exit
    #[arg(long)]
    check: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

/// Configuration file (if any) with command line overrides applied
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path).context("Failed to load configuration file")?,
        None => Config::default(),
    };

    if let Some(domain) = &cli.domain {
        config.gateway.domain = domain.clone();
    }
    if cli.prod {
        config.gateway.production = true;
    }
    if let Some(cache) = &cli.cache {
        config.acme.cache_dir = cache.clone();
    }
    if let Some(listen) = &cli.listen {
        config.gateway.listen = Some(listen.clone());
    }
    if let Some(state_dir) = &cli.state_dir {
        config.agent.state_dir = state_dir.clone();
    }
    if let Some(agent) = &cli.agent {
        config.agent.binary = agent.clone();
    }
    if let Some(email) = &cli.email {
        config.gateway.email = Some(email.clone());
    }
    if let Some(timeout) = cli.agent_timeout_secs {
        config.agent.timeout_secs = timeout;
    }
    if cli.enforce_csr_policy {
        config.gateway.enforce_csr_policy = true;
    }

    Ok(config)
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    if config.gateway.domain.trim().is_empty() {
        Cli::command()
            .error(
                ErrorKind::MissingRequiredArgument,
                "a domain is required: pass --domain, set CERTOMAT_DOMAIN or gateway.domain in the config file",
            )
            .exit();
    }

    if cli.check {
        return check_config(&config);
    }

    config.validate().context("Configuration validation failed")?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(async {
        let gateway = Gateway::bootstrap(&config)
            .await
            .context("Gateway startup failed")?;

        info!(
            version = env!("CARGO_PKG_VERSION"),
            listen = %config.gateway.listen_address(),
            "Certomat started"
        );

        gateway
            .run(certomat::server::shutdown_signal())
            .await
            .context("Gateway stopped with an error")
    })
}

/// Run every static check and report
fn check_config(config: &Config) -> Result<()> {
    let mut result = certomat_config::validate::lint::lint_config(config);
    result.merge(validate_agent(config));
    result.merge(validate_certificates(config));

    for warning in &result.warnings {
        warn!("{}", warning.message);
    }
    for err in &result.errors {
        error!("{}", err);
    }

    if !result.is_ok() {
        anyhow::bail!("configuration check failed with {} error(s)", result.errors.len());
    }

    info!(
        domain = %config.gateway.domain,
        host = %config.gateway.canonical_hostname(),
        directory = %config.directory_url(),
        "Configuration check successful"
    );
    println!("certomat: configuration check is successful");
    Ok(())
}
