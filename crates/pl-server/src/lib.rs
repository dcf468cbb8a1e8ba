use anyhow::Context;
use pl_catalog::{MemoryCatalog, StaticAuthorizer};
use pl_session::params::ParameterDef;
use pl_session::{
    ConnectionPool, MemoryParameters, MemoryQueryManager, PoolConfig, SessionConfig,
    SessionRegistry, Services,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix;

mod logging;
mod supervisor;

pub use logging::{init_logging, LogArgs, LogFormat};
pub use supervisor::{drain, runtime_exited, Supervisor};

#[derive(clap::Parser, Debug)]
#[clap(about = "Stored procedure session server.")]
pub struct Args {
    /// Path to the YAML (or JSON) configuration file.
    #[clap(long, env = "PLSD_CONFIG")]
    pub config: Option<PathBuf>,

    #[clap(flatten)]
    pub log: LogArgs,
}

/// Config is the configuration file of the server.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    pub session: SessionConfig,
    pub pool: PoolConfig,
    /// Runtime to start and supervise. If absent, the runtime
    /// is expected to be managed externally.
    pub runtime: Option<RuntimeConfig>,
    pub authorizer: StaticAuthorizer,
    pub parameters: Vec<ParameterDef>,
    /// Time allowed for running sessions to unwind on shutdown.
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct RuntimeConfig {
    pub path: PathBuf,
    pub argv: Vec<String>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    #[serde(with = "humantime_serde")]
    pub restart_backoff: Duration,
    /// Time allowed for the runtime to exit after SIGTERM.
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            argv: Vec::new(),
            stdout: None,
            stderr: None,
            restart_backoff: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(10),
        }
    }
}

impl RuntimeConfig {
    fn redirects(&self) -> pl_process::Redirects {
        pl_process::Redirects {
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let mut config: Self = serde_yaml::from_str(content)?;

        if config.drain_timeout.is_zero() {
            config.drain_timeout = Duration::from_secs(10);
        }
        if config.session.default_fetch_count <= 0 {
            anyhow::bail!("session.defaultFetchCount must be positive");
        }
        if let Some(runtime) = &config.runtime {
            if runtime.path.as_os_str().is_empty() {
                anyhow::bail!("runtime.path is required");
            }
        }
        Ok(config)
    }
}

/// Server holds the components shared by every session.
pub struct Server {
    pub registry: Arc<SessionRegistry>,
    pub catalog: Arc<MemoryCatalog>,
}

impl Server {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let services = Services {
            pool: ConnectionPool::from_config(&config.pool),
            queries: Arc::new(MemoryQueryManager::default()),
            params: Arc::new(MemoryParameters::new(config.parameters.clone())),
        };
        let registry = SessionRegistry::new(config.session.clone(), services);

        let catalog = Arc::new(MemoryCatalog::new(Arc::new(config.authorizer.clone())));
        catalog
            .install_builtins()
            .context("installing built-in stored procedures")?;

        Ok(Self { registry, catalog })
    }
}

pub async fn run(args: Args) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::parse("{}")?,
    };
    let server = Server::new(&config)?;

    // Gracefully exit on either SIGINT (ctrl-c) or SIGTERM.
    let mut sigint = unix::signal(unix::SignalKind::interrupt())?;
    let mut sigterm = unix::signal(unix::SignalKind::terminate())?;

    let signal = async move {
        tokio::select! {
            _ = sigint.recv() => (),
            _ = sigterm.recv() => (),
        }
        tracing::info!("caught signal to exit");
    };

    tracing::info!(
        runtime = %config.pool.address,
        procedures = server.catalog.procedure_names().len(),
        "plsd started"
    );

    match config.runtime.clone() {
        Some(runtime) => {
            // Drain sessions before the runtime they're using is stopped.
            let registry = server.registry.clone();
            let drain_timeout = config.drain_timeout;

            let shutdown = async move {
                signal.await;
                drain(&registry, drain_timeout).await;
            };
            Supervisor::new(runtime, server.registry.clone())
                .serve(shutdown)
                .await?;
        }
        None => {
            signal.await;
            drain(&server.registry, config.drain_timeout).await;
        }
    }

    Ok(())
}
