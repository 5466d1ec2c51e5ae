use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use netaddon_apply::{ApplyReport, DeployError};
use netaddon_cilium::{deploy, desired_set, CiliumConfig};
use netaddon_core::DesiredSet;
use netaddon_kubehub::{Call, KubeCluster, MemoryCluster, DEFAULT_FIELD_MANAGER};
use tracing::{error, info, warn};

/// Exit status when every object applied but the kind cache refresh failed.
const EXIT_DEGRADED: u8 = 3;

#[derive(Parser, Debug)]
#[command(name = "netaddonctl", version, about = "Install the Cilium CNI into a cluster")]
struct Cli {
    /// Path to a single kubeconfig file (default: $KUBECONFIG, ~/.kube/config, then in-cluster)
    #[arg(long, global = true)]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use (default: current context)
    #[arg(long, global = true)]
    context: Option<String>,

    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Args, Debug, Clone)]
struct CiliumArgs {
    /// Namespace for accounts, config and workloads
    #[arg(long, default_value = netaddon_cilium::DEFAULT_NAMESPACE)]
    namespace: String,
    /// Registry host that replaces quay.io for every image
    #[arg(long)]
    registry: Option<String>,
}

impl CiliumArgs {
    fn config(&self, debug: bool) -> CiliumConfig {
        let mut cfg = CiliumConfig { debug, ..Default::default() }.with_namespace(&self.namespace);
        if let Some(r) = &self.registry {
            cfg = cfg.with_registry(r);
        }
        cfg
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or replace every Cilium object, then refresh API discovery
    Deploy {
        #[command(flatten)]
        cilium: CiliumArgs,
        /// Enable agent debug logging
        #[arg(long = "debug-agent", action = ArgAction::SetTrue)]
        debug_agent: bool,
        /// Field manager recorded on writes
        #[arg(long = "field-manager", default_value = DEFAULT_FIELD_MANAGER)]
        field_manager: String,
    },
    /// Print the objects as multi-document YAML without contacting a cluster
    Render {
        #[command(flatten)]
        cilium: CiliumArgs,
        /// Run deploy twice against an in-memory cluster and print the calls
        #[arg(long, action = ArgAction::SetTrue)]
        simulate: bool,
    },
}

fn init_tracing() {
    let env = std::env::var("NETADDON_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // Logs go to stderr so rendered YAML and JSON stay pipeable.
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

/// `$KUBECONFIG` is left to kube's loader, which merges a path list.
async fn config_for(cli: &Cli) -> Result<Config> {
    let options = KubeConfigOptions { context: cli.context.clone(), ..Default::default() };
    match &cli.kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path.display()))?;
            Config::from_custom_kubeconfig(kubeconfig, &options).await.context("loading kubeconfig")
        }
        None if cli.context.is_some() => Config::from_kubeconfig(&options).await.context("loading kubeconfig"),
        None => Config::infer().await.context("inferring cluster config"),
    }
}

async fn client_for(cli: &Cli) -> Result<Client> {
    Client::try_from(config_for(cli).await?).context("building kube client")
}

fn print_report(report: &ApplyReport, output: Output) -> Result<()> {
    match output {
        Output::Human => {
            for a in report.iter() {
                let rv = a.resource_version.as_deref().unwrap_or("-");
                println!("{:<8} {} (rv {})", format!("{:?}", a.action).to_lowercase(), a.target, rv);
            }
            println!("{} objects: {} created, {} updated", report.len(), report.created(), report.updated());
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}

/// Desired objects as a multi-document YAML stream.
fn render_yaml(set: &DesiredSet) -> Result<String> {
    let mut out = String::new();
    for desc in set {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(desc.payload()).with_context(|| format!("rendering {}", desc.target()))?);
    }
    Ok(out)
}

fn print_journal(pass: usize, calls: &[Call], output: Output) -> Result<()> {
    match output {
        Output::Human => {
            println!("# pass {pass}");
            for c in calls {
                match &c.target {
                    Some(t) => println!("{:<10} {}", format!("{:?}", c.op).to_lowercase(), t),
                    None => println!("{}", format!("{:?}", c.op).to_lowercase()),
                }
            }
        }
        Output::Json => println!("{}", serde_json::json!({ "pass": pass, "calls": calls })),
    }
    Ok(())
}

async fn run_deploy(cli: &Cli, cfg: &CiliumConfig, field_manager: &str) -> Result<ExitCode> {
    let client = client_for(cli).await?;
    let cluster = KubeCluster::new(client).with_field_manager(field_manager);
    match deploy(&cluster, cfg).await {
        Ok(report) => {
            info!(objects = report.len(), "cilium deployed");
            print_report(&report, cli.output)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(DeployError::Degraded { report, source }) => {
            warn!(error = %source, "cilium applied but API discovery refresh failed");
            print_report(&report, cli.output)?;
            eprintln!("warning: kind cache refresh failed: {source}");
            Ok(ExitCode::from(EXIT_DEGRADED))
        }
        Err(e) => Err(e).context("deploying cilium"),
    }
}

async fn run_simulate(cfg: &CiliumConfig, output: Output) -> Result<()> {
    let cluster = MemoryCluster::new();
    for pass in 1..=2 {
        deploy(&cluster, cfg).await.with_context(|| format!("simulated pass {pass}"))?;
        print_journal(pass, &cluster.take_journal(), output)?;
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match &cli.command {
        Commands::Deploy { cilium, debug_agent, field_manager } => {
            let cfg = cilium.config(*debug_agent);
            info!(namespace = %cfg.namespace, field_manager = %field_manager, "deploy invoked");
            run_deploy(&cli, &cfg, field_manager).await
        }
        Commands::Render { cilium, simulate } => {
            let cfg = cilium.config(false);
            if *simulate {
                run_simulate(&cfg, cli.output).await?;
            } else {
                let set = desired_set(&cfg).context("building cilium objects")?;
                print!("{}", render_yaml(&set)?);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = ?e, "netaddonctl failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
