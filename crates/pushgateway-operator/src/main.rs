//! Pushgateway Operator - runs Prometheus Pushgateways as Kubernetes resources

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pushgateway_common::config::{DEFAULT_RECREATE_ATTEMPTS, DEFAULT_RECREATE_DELAY};
use pushgateway_common::retry::RetryConfig;
use pushgateway_common::{ControllerConfig, InjectionConfig, ResourceDefaults, DEFAULT_IMAGE};

mod controller_runner;
mod crds;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Pushgateway operator - manages Pushgateway Deployments, Services and ServiceMonitors
#[derive(Parser, Debug)]
#[command(name = "pushgateway-operator", version, about, long_about = None)]
struct Cli {
    /// Print the Pushgateway CRD and exit
    #[arg(long)]
    crd: bool,

    /// Install or update the Pushgateway CRD on startup
    #[arg(long)]
    install_crds: bool,

    /// Image used when a Pushgateway does not set one
    #[arg(long, env = "PUSHGATEWAY_DEFAULT_BASE_IMAGE", default_value = DEFAULT_IMAGE)]
    default_image: String,

    /// Only watch this namespace (all namespaces when unset)
    #[arg(long)]
    namespace: Option<String>,

    /// Limit for each Kubernetes API call, in seconds
    #[arg(long, default_value = "10")]
    api_timeout_secs: u64,

    /// Delay before re-checking an instance whose children just changed, in seconds
    #[arg(long, default_value = "5")]
    requeue_secs: u64,

    /// Steady-state resync interval, in seconds
    #[arg(long, default_value = "300")]
    resync_secs: u64,

    /// Do not inject the push address into labelled Jobs and CronJobs
    #[arg(long)]
    disable_job_injection: bool,

    /// Create attempts after deleting a workload for injection
    #[arg(long, default_value_t = DEFAULT_RECREATE_ATTEMPTS)]
    inject_retry_attempts: u32,

    /// Wait between create attempts, in seconds
    #[arg(long, default_value_t = DEFAULT_RECREATE_DELAY.as_secs())]
    inject_retry_delay_secs: u64,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Path to a kubeconfig (in-cluster or default config when unset)
    #[arg(long)]
    kubeconfig: Option<PathBuf>,
}

impl Cli {
    fn resource_defaults(&self) -> ResourceDefaults {
        ResourceDefaults::with_image(&self.default_image)
    }

    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            api_timeout: Duration::from_secs(self.api_timeout_secs),
            requeue_delay: Duration::from_secs(self.requeue_secs),
            resync_interval: Duration::from_secs(self.resync_secs),
        }
    }

    fn injection_config(&self) -> InjectionConfig {
        InjectionConfig {
            api_timeout: Duration::from_secs(self.api_timeout_secs),
            recreate_retry: RetryConfig::fixed(
                self.inject_retry_attempts,
                Duration::from_secs(self.inject_retry_delay_secs),
            ),
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

async fn create_client(kubeconfig: Option<&PathBuf>) -> anyhow::Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| anyhow::anyhow!("failed to read kubeconfig {:?}: {}", path, e))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| anyhow::anyhow!("failed to load kubeconfig: {}", e))?
        }
        None => Config::infer()
            .await
            .map_err(|e| anyhow::anyhow!("failed to infer config: {}", e))?,
    };
    config.connect_timeout = Some(CONNECT_TIMEOUT);
    config.read_timeout = Some(READ_TIMEOUT);

    Client::try_from(config).map_err(|e| anyhow::anyhow!("failed to create client: {}", e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        println!("{}", crds::crd_yaml()?);
        return Ok(());
    }

    init_tracing(cli.log_json);
    tracing::info!(
        default_image = %cli.default_image,
        namespace = ?cli.namespace,
        "Pushgateway operator starting..."
    );

    let client = create_client(cli.kubeconfig.as_ref()).await?;

    if cli.install_crds {
        crds::ensure_crds_installed(&client).await?;
    }

    let namespace = cli.namespace.as_deref();
    let defaults = cli.resource_defaults();

    tracing::info!("Starting controllers:");
    let mut controllers = vec![controller_runner::build_pushgateway_controller(
        client.clone(),
        namespace,
        defaults.clone(),
        cli.controller_config(),
    )];
    if cli.disable_job_injection {
        tracing::info!("Job injection disabled");
    } else {
        controllers.extend(controller_runner::build_injection_controllers(
            client,
            namespace,
            defaults,
            cli.injection_config(),
        ));
    }

    futures::future::join_all(controllers).await;
    tracing::info!("Pushgateway operator stopped");
    Ok(())
}
