use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use burrow::config::MASTER_ENV;
use burrow::{diagnostics, BurrowConfig, MasterAddress, TrustOptions, TrustSource};

/// Burrow - relay stdin/stdout to a service through a master's CONNECT proxy
#[derive(Parser, Debug)]
#[command(name = "burrow", version)]
#[command(about = "Tunnel a TCP stream through a master endpoint (e.g. as an ssh ProxyCommand)")]
struct Cli {
    /// Service to reach through the master, sent as the CONNECT target
    service: String,

    /// Master address (http[s]://host[:port]); defaults to $BURROW_MASTER or the config file
    #[arg(short, long)]
    master: Option<String>,

    /// CA bundle for the master (file path, env://, base64://)
    #[arg(long)]
    cert_file: Option<String>,

    /// Hostname to verify the master's certificate against
    #[arg(long)]
    cert_name: Option<String>,

    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Everything needed to open the tunnel, after layering CLI, env and file
struct ResolvedConfig {
    master: MasterAddress,
    trust: TrustOptions,
}

impl ResolvedConfig {
    fn resolve(cli: &Cli) -> Result<Self> {
        let file = BurrowConfig::try_load_default()?.unwrap_or_default();
        if let Err(errors) = file.validate() {
            anyhow::bail!(
                "Invalid config file {:?}:\n  {}",
                BurrowConfig::default_path(),
                errors.join("\n  ")
            );
        }

        let merged = file.resolve(
            cli.master.clone(),
            std::env::var(MASTER_ENV).ok().filter(|m| !m.trim().is_empty()),
            cli.cert_file.clone(),
            cli.cert_name.clone(),
        );

        let master = merged.master.context(format!(
            "Master address required. Use --master, set {}, or add `master` to {:?}",
            MASTER_ENV,
            BurrowConfig::default_path()
        ))?;
        let master = MasterAddress::parse(&master)?;

        let ca = merged
            .cert_file
            .as_deref()
            .map(str::parse::<TrustSource>)
            .transpose()
            .context("Invalid --cert-file")?;

        Ok(Self {
            master,
            trust: TrustOptions::new(ca, merged.cert_name),
        })
    }
}

/// `RUST_LOG` when set, otherwise a level picked by `-v`
fn log_directives(verbose: u8, rust_log: Option<String>) -> String {
    if let Some(directives) = rust_log.filter(|d| !d.trim().is_empty()) {
        return directives;
    }

    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    format!("burrow={},burrow_common={}", level, level)
}

fn init_tracing(verbose: u8) -> Result<()> {
    let directives = log_directives(verbose, std::env::var(EnvFilter::DEFAULT_ENV).ok());

    // stdout carries the tunnel; logs go to stderr only.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_new(directives)?)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() {
    // Install rustls crypto provider before any TLS operations
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("burrow: invalid log filter: {}", e);
        std::process::exit(2);
    }

    if let Err(e) = run(cli).await {
        match diagnostics::analyze(&e) {
            Some(diagnostic) => eprint!("{}", diagnostics::render(diagnostic.as_ref())),
            None => eprintln!("burrow: {:#}", e),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = ResolvedConfig::resolve(&cli).context("Configuration error")?;

    tracing::info!("Tunneling to {} via {}", cli.service, config.master);

    let tunnel = burrow::open_tunnel(&config.master, &cli.service, &config.trust)
        .await
        .with_context(|| format!("Failed to open tunnel to {} via {}", cli.service, config.master))?;

    let report = burrow::relay_stdio(tunnel).await;

    tracing::info!(
        "Relay finished: {} bytes in ({:?}), {} bytes out ({:?})",
        report.inbound.bytes,
        report.inbound.end,
        report.outbound.bytes,
        report.outbound.end
    );

    Ok(())
}
