//! upstream-guard CLI.
//!
//! Probes an HTTP dependency through the configured resilience stack and
//! prints what a caller of this service would receive.
//!
//! ```text
//! upstream-guard probe https://api.example.com/health
//! upstream-guard --config guard.toml watch https://api.example.com/health --interval-secs 5
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use url::Url;

use upstream_guard::config::{load_config, ConfigWatcher, GuardConfig};
use upstream_guard::observability::{logging, metrics};
use upstream_guard::resilience::{CircuitState, CircuitStore, InMemoryCircuitStore, ResilienceStack};
use upstream_guard::{classify, ClassifiedError, TransportMapper, UpstreamMode};

#[derive(Parser)]
#[command(name = "upstream-guard")]
#[command(about = "Probe a dependency through timeout, retry and circuit breaker", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured upstream mode.
    #[arg(short, long, value_enum)]
    mode: Option<ModeArg>,

    /// Persist circuit state to this JSON file between runs.
    #[arg(long)]
    state_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one GET and print the outcome
    Probe { url: Url },
    /// Probe repeatedly, reporting circuit changes, until Ctrl-C
    Watch {
        url: Url,

        #[arg(long, default_value_t = 5)]
        interval_secs: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Proxy,
    Integration,
}

impl From<ModeArg> for UpstreamMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Proxy => UpstreamMode::Proxy,
            ModeArg::Integration => UpstreamMode::Integration,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };
    if let Some(mode) = cli.mode {
        config.upstream.mode = mode.into();
    }

    logging::init_logging(&config.observability)?;
    tracing::info!(
        upstream = %config.upstream.name,
        mode = ?config.upstream.mode,
        "upstream-guard v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let store = match &cli.state_file {
        Some(path) => InMemoryCircuitStore::load_from_file(path)?,
        None => InMemoryCircuitStore::new(),
    };
    let client = reqwest::Client::new();

    let code = match &cli.command {
        Commands::Probe { url } => {
            let guard = Guard::build(&config, Arc::new(store.clone()));
            match guard.probe(&client, url, None).await {
                Ok(status) => {
                    println!("{}", serde_json::json!({ "upstream": guard.stack.name(), "status": status }));
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    println!("{}", serde_json::to_string_pretty(&guard.mapper.handle(err))?);
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Watch { url, interval_secs } => {
            let interval = Duration::from_secs((*interval_secs).max(1));
            watch(&cli, &config, &client, Arc::new(store.clone()), url, interval).await?;
            ExitCode::SUCCESS
        }
    };

    store.save_to_file()?;
    Ok(code)
}

/// Everything a probe needs, swapped as a unit on config reload.
struct Guard {
    stack: ResilienceStack,
    mapper: TransportMapper,
    mode: UpstreamMode,
}

impl Guard {
    fn build(config: &GuardConfig, store: Arc<dyn CircuitStore>) -> Self {
        Self {
            stack: ResilienceStack::from_config(config, store),
            mapper: TransportMapper::from_config(&config.transport),
            mode: config.upstream.mode,
        }
    }

    /// One GET through the stack. Non-2xx responses become upstream failures.
    async fn probe(
        &self,
        client: &reqwest::Client,
        url: &Url,
        shutdown: Option<&CancellationToken>,
    ) -> Result<u16, ClassifiedError> {
        let service = url.host_str().unwrap_or(self.stack.name());
        let mode = self.mode;

        self.stack
            .call_with_parent(shutdown, |token| {
                let request = client.get(url.clone());
                async move {
                    let response = tokio::select! {
                        res = request.send() => res.map_err(classify)?,
                        _ = token.cancelled() => return Err(ClassifiedError::unexpected("request cancelled")),
                    };

                    let status = response.status();
                    if status.is_success() {
                        Ok(status.as_u16())
                    } else {
                        Err(ClassifiedError::upstream_response(service, status.as_u16(), mode))
                    }
                }
            })
            .await
    }
}

async fn watch(
    cli: &Cli,
    config: &GuardConfig,
    client: &reqwest::Client,
    store: Arc<dyn CircuitStore>,
    url: &Url,
    interval: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let guard = Arc::new(ArcSwap::from_pointee(Guard::build(config, store.clone())));

    // Keep the watcher alive for the whole loop.
    let _watcher = match &cli.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let watcher = watcher.run()?;
            let guard = guard.clone();
            let mode_override = cli.mode.map(UpstreamMode::from);
            tokio::spawn(async move {
                while let Some(mut next) = updates.recv().await {
                    if let Some(mode) = mode_override {
                        next.upstream.mode = mode;
                    }
                    guard.store(Arc::new(Guard::build(&next, store.clone())));
                    tracing::info!(upstream = %next.upstream.name, "Configuration reloaded");
                }
            });
            Some(watcher)
        }
        None => None,
    };

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, stopping");
            trigger.cancel();
        }
    });

    let mut ticker = tokio::time::interval(interval);
    let mut last_state = CircuitState::Closed;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let current = guard.load_full();
        let name = current.stack.name();
        match current.probe(client, url, Some(&shutdown)).await {
            Ok(status) => println!("{} ok {}", name, status),
            Err(err) if shutdown.is_cancelled() => {
                tracing::debug!(code = %err.code(), "Probe interrupted by shutdown");
                break;
            }
            Err(err) => {
                let response = current.mapper.handle(err);
                println!("{} failed {}", name, serde_json::to_string(&response)?);
            }
        }

        if let Some(breaker) = current.stack.breaker() {
            let state = breaker.snapshot().await.state;
            if state != last_state {
                println!("{} circuit {} -> {}", name, last_state, state);
                last_state = state;
            }
        }
    }

    Ok(())
}
