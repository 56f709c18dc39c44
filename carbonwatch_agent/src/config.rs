//! Command-line and environment configuration.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_COLLECT_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub collect_interval: Duration,
    /// Try the kernel probe backend before falling back to polling.
    pub kernel_probe: bool,
    /// tracefs mount override; `None` probes the usual locations.
    pub tracefs: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            collect_interval: Duration::from_secs(DEFAULT_COLLECT_SECS),
            kernel_probe: true,
            tracefs: None,
        }
    }
}

fn usage(prog: &str) -> String {
    format!(
        "Usage: {prog} [--port PORT|-p PORT] [--no-probe]\n\
         env: CARBONWATCH_BIND, CARBONWATCH_COLLECT_INTERVAL_SECS, CARBONWATCH_KERNEL_PROBE=0, CARBONWATCH_TRACEFS"
    )
}

/// `--port N`, `-p N` or `--port=N`; long form wins; anything unparsable gives the default.
pub fn parse_port<I: IntoIterator<Item = String>>(args: I, default_port: u16) -> u16 {
    let mut it = args.into_iter();
    let _ = it.next(); // program name
    let mut long: Option<String> = None;
    let mut short: Option<String> = None;
    while let Some(a) = it.next() {
        match a.as_str() {
            "--port" => long = it.next(),
            "-p" => short = it.next(),
            _ if a.starts_with("--port=") => {
                if let Some((_, v)) = a.split_once('=') {
                    long = Some(v.to_string());
                }
            }
            _ => {}
        }
    }
    long.or(short)
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(default_port)
}

impl AgentConfig {
    /// Build from process arguments and environment. `Err` carries the usage text for `--help`.
    pub fn from_env<I: IntoIterator<Item = String>>(args: I) -> Result<Self, String> {
        Self::from_lookup(args, |k| std::env::var(k).ok())
    }

    pub fn from_lookup<I, F>(args: I, env: F) -> Result<Self, String>
    where
        I: IntoIterator<Item = String>,
        F: Fn(&str) -> Option<String>,
    {
        let args: Vec<String> = args.into_iter().collect();
        let prog = args
            .first()
            .cloned()
            .unwrap_or_else(|| "carbonwatch_agent".into());
        if args.iter().skip(1).any(|a| a == "-h" || a == "--help") {
            return Err(usage(&prog));
        }

        let mut cfg = AgentConfig::default();
        cfg.port = parse_port(args.iter().cloned(), DEFAULT_PORT);
        if let Some(ip) = env("CARBONWATCH_BIND").and_then(|v| v.parse().ok()) {
            cfg.bind = ip;
        }
        if let Some(secs) = env("CARBONWATCH_COLLECT_INTERVAL_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|s| *s > 0)
        {
            cfg.collect_interval = Duration::from_secs(secs);
        }
        cfg.kernel_probe = env("CARBONWATCH_KERNEL_PROBE")
            .map(|v| v != "0")
            .unwrap_or(true)
            && !args.iter().any(|a| a == "--no-probe");
        cfg.tracefs = env("CARBONWATCH_TRACEFS")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Ok(cfg)
    }
}
