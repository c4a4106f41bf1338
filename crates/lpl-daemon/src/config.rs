//! Daemon configuration: CLI flags with environment overrides.
//!
//! Environment wins over flags, flags win over defaults. Required settings
//! are the database URL and the accrual service address; cadence and worker
//! count fall back to the engine defaults (5 s, 5 workers).

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;

use lpl_engine::EngineConfig;

pub const ENV_ACCRUAL_ADDR: &str = "LPL_ACCRUAL_ADDR";
pub const ENV_POLL_INTERVAL: &str = "LPL_POLL_INTERVAL_SECS";
pub const ENV_WORKER_COUNT: &str = "LPL_WORKER_COUNT";

#[derive(Parser, Debug, Default)]
#[command(name = "lpl-daemon", about = "Loyalty-point ledger reconciliation daemon")]
pub struct Cli {
    /// Postgres connection string.
    #[arg(short = 'd', long = "database-url")]
    pub database_url: Option<String>,

    /// Base URL of the external accrual service.
    #[arg(short = 'r', long = "accrual-addr")]
    pub accrual_addr: Option<String>,

    /// Seconds between reconciliation passes.
    #[arg(long = "poll-interval-secs")]
    pub poll_interval_secs: Option<u64>,

    /// Concurrent reconciliation workers per pass.
    #[arg(long = "workers")]
    pub workers: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub database_url: String,
    pub accrual_addr: String,
    pub engine: EngineConfig,
}

pub fn from_env_and_args() -> Result<DaemonConfig> {
    resolve(Cli::parse(), |key| std::env::var(key).ok())
}

/// Pure resolution step, separated from process state for testing.
pub fn resolve(cli: Cli, env: impl Fn(&str) -> Option<String>) -> Result<DaemonConfig> {
    let database_url = env(lpl_db::ENV_DB_URL)
        .or(cli.database_url)
        .with_context(|| format!("no database address ({} or -d)", lpl_db::ENV_DB_URL))?;

    let accrual_addr = env(ENV_ACCRUAL_ADDR)
        .or(cli.accrual_addr)
        .with_context(|| format!("no accrual service address ({ENV_ACCRUAL_ADDR} or -r)"))?;

    let defaults = EngineConfig::default();

    let poll_secs = match env(ENV_POLL_INTERVAL) {
        Some(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("invalid {ENV_POLL_INTERVAL}: {raw}"))?,
        None => cli
            .poll_interval_secs
            .unwrap_or(defaults.poll_interval.as_secs()),
    };
    if poll_secs == 0 {
        bail!("poll interval must be at least 1 second");
    }

    let worker_count = match env(ENV_WORKER_COUNT) {
        Some(raw) => raw
            .parse::<usize>()
            .with_context(|| format!("invalid {ENV_WORKER_COUNT}: {raw}"))?,
        None => cli.workers.unwrap_or(defaults.worker_count),
    };
    if worker_count == 0 {
        bail!("worker count must be at least 1");
    }

    Ok(DaemonConfig {
        database_url,
        accrual_addr,
        engine: EngineConfig {
            poll_interval: Duration::from_secs(poll_secs),
            worker_count,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn flags_apply_when_env_absent() {
        let cli = Cli {
            database_url: Some("postgres://localhost/lpl".into()),
            accrual_addr: Some("http://localhost:8081".into()),
            poll_interval_secs: Some(2),
            workers: Some(3),
        };
        let cfg = resolve(cli, no_env).unwrap();
        assert_eq!(cfg.database_url, "postgres://localhost/lpl");
        assert_eq!(cfg.engine.poll_interval, Duration::from_secs(2));
        assert_eq!(cfg.engine.worker_count, 3);
    }

    #[test]
    fn env_overrides_flags() {
        let cli = Cli {
            database_url: Some("postgres://flag/db".into()),
            accrual_addr: Some("http://flag".into()),
            ..Default::default()
        };
        let cfg = resolve(cli, |key| match key {
            lpl_db::ENV_DB_URL => Some("postgres://env/db".into()),
            ENV_ACCRUAL_ADDR => Some("http://env".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.database_url, "postgres://env/db");
        assert_eq!(cfg.accrual_addr, "http://env");
    }

    #[test]
    fn defaults_fill_cadence_and_workers() {
        let cli = Cli {
            database_url: Some("postgres://x".into()),
            accrual_addr: Some("http://x".into()),
            ..Default::default()
        };
        let cfg = resolve(cli, no_env).unwrap();
        assert_eq!(cfg.engine.poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.engine.worker_count, 5);
    }

    #[test]
    fn missing_database_is_fatal() {
        let cli = Cli {
            accrual_addr: Some("http://x".into()),
            ..Default::default()
        };
        assert!(resolve(cli, no_env).is_err());
    }

    #[test]
    fn zero_workers_rejected() {
        let cli = Cli {
            database_url: Some("postgres://x".into()),
            accrual_addr: Some("http://x".into()),
            workers: Some(0),
            ..Default::default()
        };
        assert!(resolve(cli, no_env).is_err());
    }
}
