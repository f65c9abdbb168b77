// ABOUTME: Entry point for the sshmux CLI application.
// ABOUTME: Loads config, builds the server registry, and runs one session.

mod cli;

use clap::Parser;
use cli::{Cli, Commands, ConnectArgs};
use sshmux::config::{Config, ForwardDirection, Registry, StaticForward, expand_tilde};
use sshmux::error::{Error, Result};
use sshmux::session::{ExitReason, Orchestrator, RuntimeOverrides, SessionOptions};
use sshmux::ssh::{EngineConfig, RusshEngine};
use sshmux::select_server;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::resolve(cli.config.as_deref())?;
    let registry = load_registry(&config);

    match cli.command {
        Commands::List => {
            for (key, server) in registry.iter() {
                if server.note.is_empty() {
                    println!("{}", key);
                } else {
                    println!("{}\t{}", key, server.note);
                }
            }
            Ok(())
        }
        Commands::Connect(args) => connect(&config, &registry, args).await,
    }
}

fn load_registry(config: &Config) -> Registry {
    let (registry, failures) = config.registry();
    for failure in &failures {
        eprintln!("Warning: {}: {}", failure.source_id, failure.error);
    }
    registry
}

async fn connect(config: &Config, registry: &Registry, args: ConnectArgs) -> Result<()> {
    let (name, server) = select_server(registry, &args.server)?;

    let options = SessionOptions {
        overrides: overrides_from_args(&args)?,
        not_execute: args.not_execute,
        log: Some(config.log.clone()),
        ..Default::default()
    };

    let engine = RusshEngine::new(EngineConfig {
        connect_timeout: config.connect_timeout,
        trust_on_first_use: config.trust_first_connection,
        known_hosts_path: config.known_hosts.as_deref().map(expand_tilde),
    });

    let outcome = Orchestrator::new(engine).run(name, server, &options).await?;
    if outcome.exit == ExitReason::Interrupted {
        eprintln!("Interrupted");
    }
    Ok(())
}

fn overrides_from_args(args: &ConnectArgs) -> Result<RuntimeOverrides> {
    let mut forwards = Vec::new();
    for spec in &args.local_forward {
        forwards.push(StaticForward::parse_cli(ForwardDirection::Local, spec).map_err(Error::InvalidForward)?);
    }
    for spec in &args.remote_forward {
        forwards.push(StaticForward::parse_cli(ForwardDirection::Remote, spec).map_err(Error::InvalidForward)?);
    }

    Ok(RuntimeOverrides {
        dynamic_forward: args.dynamic_forward.clone(),
        reverse_dynamic_forward: args.reverse_dynamic_forward.clone(),
        http_dynamic_forward: args.http_dynamic_forward.clone(),
        http_reverse_dynamic_forward: args.http_reverse_dynamic_forward.clone(),
        nfs_forward_port: args.nfs_forward_port.clone(),
        nfs_forward_path: args.nfs_forward_path.clone(),
        nfs_reverse_forward_port: args.nfs_reverse_forward_port.clone(),
        nfs_reverse_forward_path: args.nfs_reverse_forward_path.clone(),
        use_local_rc: args.local_rc,
        skip_local_rc: args.no_local_rc,
        forwards,
        forward_agent: args.forward_agent,
    })
}
