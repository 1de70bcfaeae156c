use std::net::IpAddr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use gretun::health::defaults;
use gretun::types::DEFAULT_TTL;

/// GRE tunnel manager
#[derive(Parser, Debug)]
#[command(name = "gretun")]
#[command(version, about = "Create and manage GRE tunnels on Linux")]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub(crate) json: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "warn")]
    pub(crate) log_level: String,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Create a new GRE tunnel
    #[command(after_help = "Examples:\n  \
        gretun create --name tun0 --local 10.0.0.1 --remote 10.0.0.2\n  \
        gretun create --name tun0 --local 10.0.0.1 --remote 10.0.0.2 --key 12345\n  \
        gretun create --name tun0 --local 10.0.0.1 --remote 10.0.0.2 --tunnel-ip 192.168.1.1/30")]
    Create(CreateArgs),

    /// Delete a GRE tunnel
    Delete(NameArgs),

    /// List all GRE tunnels
    List,

    /// Show status of a GRE tunnel
    Status(NameArgs),

    /// Probe tunnel connectivity with ICMP echo
    #[command(after_help = "Examples:\n  \
        gretun probe --target 192.168.1.2\n  \
        gretun probe --target 192.168.1.2 --count 5 --threshold 3")]
    Probe(ProbeArgs),

    /// Print version information
    Version,
}

#[derive(Args, Debug)]
pub(crate) struct CreateArgs {
    /// Tunnel interface name
    #[arg(long)]
    pub(crate) name: String,

    /// Local endpoint IP
    #[arg(long)]
    pub(crate) local: IpAddr,

    /// Remote endpoint IP
    #[arg(long)]
    pub(crate) remote: IpAddr,

    /// GRE key for tunnel identification (0 = none)
    #[arg(long, default_value_t = 0)]
    pub(crate) key: u32,

    /// TTL for tunnel packets
    #[arg(long, default_value_t = DEFAULT_TTL)]
    pub(crate) ttl: u8,

    /// Address to assign to the tunnel interface (CIDR notation)
    #[arg(long)]
    pub(crate) tunnel_ip: Option<String>,
}

#[derive(Args, Debug)]
pub(crate) struct NameArgs {
    /// Tunnel interface name
    #[arg(long)]
    pub(crate) name: String,
}

#[derive(Args, Debug)]
pub(crate) struct ProbeArgs {
    /// Target IP or hostname to probe
    #[arg(long)]
    pub(crate) target: String,

    /// Number of probes to send
    #[arg(long, default_value_t = defaults::COUNT)]
    pub(crate) count: u32,

    /// Timeout per probe (e.g. 500ms, 2s, 1m)
    #[arg(long, default_value = "2s", value_parser = parse_duration)]
    pub(crate) timeout: Duration,

    /// Minimum successful probes for healthy status
    #[arg(long, default_value_t = defaults::THRESHOLD)]
    pub(crate) threshold: u32,
}

/// Parse a duration such as `250ms`, `2s`, `1m` or bare seconds
pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (value, unit) = s.split_at(split);

    let value: f64 = value
        .parse()
        .map_err(|_| format!("invalid duration {:?}", s))?;
    let seconds = match unit {
        "ms" => value / 1000.0,
        "" | "s" => value,
        "m" => value * 60.0,
        _ => return Err(format!("unknown duration unit {:?} in {:?}", unit, s)),
    };

    Duration::try_from_secs_f64(seconds).map_err(|e| format!("invalid duration {:?}: {}", s, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("2s"), Ok(Duration::from_secs(2)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("1m"), Ok(Duration::from_secs(60)));
        assert_eq!(parse_duration("3"), Ok(Duration::from_secs(3)));
        assert_eq!(parse_duration("1.5s"), Ok(Duration::from_millis(1500)));
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("2h").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_create_defaults() {
        let cli = Cli::parse_from([
            "gretun", "create", "--name", "tun0", "--local", "10.0.0.1", "--remote", "10.0.0.2",
        ]);
        match cli.command {
            Commands::Create(args) => {
                assert_eq!(args.key, 0);
                assert_eq!(args.ttl, 64);
                assert!(args.tunnel_ip.is_none());
            }
            other => panic!("Expected Create, got {:?}", other),
        }
        assert!(!cli.json);
        assert_eq!(cli.log_level, "warn");
    }

    #[test]
    fn test_probe_defaults_and_global_json() {
        let cli = Cli::parse_from(["gretun", "probe", "--target", "192.168.1.2", "--json"]);
        assert!(cli.json);
        match cli.command {
            Commands::Probe(args) => {
                assert_eq!(args.count, 3);
                assert_eq!(args.timeout, Duration::from_secs(2));
                assert_eq!(args.threshold, 2);
            }
            other => panic!("Expected Probe, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_address_rejected() {
        let res = Cli::try_parse_from([
            "gretun", "create", "--name", "tun0", "--local", "not-an-ip", "--remote", "10.0.0.2",
        ]);
        assert!(res.is_err());
    }
}
