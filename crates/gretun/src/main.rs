//! gretun command line entry point

mod cli;
mod render;

use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::Parser;
use gretun::health::{probe_multiple, HealthReport, IcmpProber, ProbeContext};
use gretun::privilege::{check_net_admin, PrivilegeError};
use gretun::{IprouteKernel, TunnelConfig, TunnelError, TunnelMgr};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, CreateArgs, ProbeArgs};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            debug!(error = ?err, "Command failed");
            eprintln!("Error: {}", describe(&err));
            ExitCode::FAILURE
        }
    }
}

/// Error text for the operator, with a hint when one applies
fn describe(err: &anyhow::Error) -> String {
    if let Some(e) = err.downcast_ref::<TunnelError>() {
        e.format_with_hint()
    } else if let Some(e) = err.downcast_ref::<PrivilegeError>() {
        format!("{}\n\n{}", e, e.hint())
    } else {
        format!("{:#}", err)
    }
}

async fn run(cli: Cli) -> Result<()> {
    if matches!(cli.command, Commands::Version) {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    check_net_admin()?;

    let mgr = TunnelMgr::new(IprouteKernel::new());
    match cli.command {
        Commands::Create(args) => create(&mgr, args).await,
        Commands::Delete(args) => {
            mgr.delete(&args.name).await?;
            println!("deleted tunnel {}", args.name);
            Ok(())
        }
        Commands::List => {
            let tunnels = mgr.list().await?;
            if cli.json {
                println!("{}", render::json(&tunnels)?);
            } else if tunnels.is_empty() {
                println!("no GRE tunnels found");
            } else {
                print!("{}", render::tunnel_table(&tunnels));
            }
            Ok(())
        }
        Commands::Status(args) => {
            let status = mgr.get(&args.name).await?;
            if cli.json {
                println!("{}", render::json(&status)?);
            } else {
                print!("{}", render::tunnel_detail(&status));
            }
            Ok(())
        }
        Commands::Probe(args) => probe(args, cli.json).await,
        Commands::Version => Ok(()),
    }
}

async fn create(mgr: &TunnelMgr<IprouteKernel>, args: CreateArgs) -> Result<()> {
    let config = TunnelConfig::new(&args.name, args.local, args.remote)
        .with_key(args.key)
        .with_ttl(args.ttl);

    mgr.create(&config).await?;
    println!(
        "created tunnel {} ({} -> {})",
        args.name, args.local, args.remote
    );

    if let Some(cidr) = &args.tunnel_ip {
        if let Err(e) = mgr.assign_ip(&args.name, cidr).await {
            bail!(
                "tunnel created but failed to assign IP: {}",
                e.format_with_hint()
            );
        }
        println!("assigned {} to {}", cidr, args.name);
    }
    Ok(())
}

async fn probe(args: ProbeArgs, json: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    let ctx = ProbeContext::new(cancel.clone());

    let interrupt = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received SIGINT, cancelling probes");
                cancel.cancel();
            }
            Err(err) => error!("Failed to listen for ctrl-c: {}", err),
        }
    });

    let prober = IcmpProber::new();
    let (healthy, results) = probe_multiple(
        &prober,
        &args.target,
        args.count,
        args.timeout,
        args.threshold,
        &ctx,
    )
    .await;
    interrupt.abort();

    let report = HealthReport {
        target: args.target,
        healthy,
        threshold: args.threshold,
        count: args.count,
        results,
    };

    if json {
        println!("{}", render::json(&report)?);
    } else {
        print!("{}", render::probe_report(&report));
    }

    if !report.healthy {
        bail!(
            "probe failed: only {}/{} successful (threshold: {})",
            report.successes(),
            report.count,
            report.threshold
        );
    }
    Ok(())
}
