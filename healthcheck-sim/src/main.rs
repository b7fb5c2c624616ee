//! Synthetic heartbeat producer for exercising healthcheckd.

use std::time::Duration;
use anyhow::{Context, Result};
use clap::Parser;
use futures::future::join_all;
use rand::Rng;
use shared::types::{HeartbeatRequest, IntakeResponse};

#[derive(Parser, Debug)]
#[command(name = "healthcheck-sim")]
#[command(about = "Send heartbeats for a pool of synthetic hosts")]
struct Cli {
    /// Heartbeat intake endpoint
    #[arg(long, default_value = "http://localhost:8082/healthcheck")]
    url: String,

    /// Number of synthetic hosts, addressed from 192.168.1.1 upwards
    #[arg(long, default_value_t = 100)]
    hosts: u32,

    /// Heartbeats sent per tick
    #[arg(long, default_value_t = 10)]
    per_tick: usize,

    /// Seconds between ticks, also reported as the heartbeat duration
    #[arg(long, default_value_t = 15)]
    interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("healthcheck_sim=info"))
        )
        .init();

    let cli = Cli::parse();
    anyhow::ensure!(cli.hosts >= 1, "--hosts must be at least 1");
    anyhow::ensure!(cli.interval_secs >= 1, "--interval-secs must be at least 1");

    tracing::info!(
        "Sending {} heartbeats every {}s across {} hosts to {}",
        cli.per_tick,
        cli.interval_secs,
        cli.hosts,
        cli.url
    );

    let client = reqwest::Client::new();
    let mut ticker = tokio::time::interval(Duration::from_secs(cli.interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => send_tick(&client, &cli).await,
            _ = &mut shutdown => {
                tracing::info!("Stopping");
                break;
            }
        }
    }

    Ok(())
}

async fn send_tick(client: &reqwest::Client, cli: &Cli) {
    let addresses = pick_hosts(&mut rand::rng(), cli.hosts, cli.per_tick);
    let duration = i64::try_from(cli.interval_secs).unwrap_or(i64::MAX);

    let sends = addresses.into_iter().map(|ip| async move {
        let request = HeartbeatRequest {
            ip,
            duration,
            time: None,
        };
        let result = send_heartbeat(client, &cli.url, &request).await;
        (request.ip, result)
    });

    for (ip, result) in join_all(sends).await {
        match result {
            Ok(response) => tracing::info!("{}: {} {}", ip, response.code, response.message),
            Err(e) => tracing::warn!("{}: {:#}", ip, e),
        }
    }
}

async fn send_heartbeat(client: &reqwest::Client, url: &str, request: &HeartbeatRequest) -> Result<IntakeResponse> {
    let resp = client
        .post(url)
        .json(request)
        .send()
        .await
        .context("heartbeat request failed")?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("intake returned {}: {}", status, body);
    }

    resp.json::<IntakeResponse>()
        .await
        .context("invalid intake response")
}

/// Address of the `n`th synthetic host (1-based), 254 hosts per /24
fn host_address(n: u32) -> String {
    let index = n.saturating_sub(1);
    format!("192.168.{}.{}", index / 254 + 1, index % 254 + 1)
}

fn pick_hosts(rng: &mut impl Rng, hosts: u32, count: usize) -> Vec<String> {
    (0..count)
        .map(|_| host_address(rng.random_range(1..=hosts)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_defaults() {
        Cli::command().debug_assert();
        let cli = Cli::parse_from(["healthcheck-sim"]);
        assert_eq!(cli.url, "http://localhost:8082/healthcheck");
        assert_eq!(cli.hosts, 100);
        assert_eq!(cli.per_tick, 10);
        assert_eq!(cli.interval_secs, 15);
    }

    #[test]
    fn test_host_addresses() {
        assert_eq!(host_address(1), "192.168.1.1");
        assert_eq!(host_address(100), "192.168.1.100");
        assert_eq!(host_address(254), "192.168.1.254");
        assert_eq!(host_address(255), "192.168.2.1");
    }

    #[test]
    fn test_pick_hosts_stays_in_pool() {
        let picked = pick_hosts(&mut rand::rng(), 3, 50);
        assert_eq!(picked.len(), 50);
        assert!(picked
            .iter()
            .all(|ip| ["192.168.1.1", "192.168.1.2", "192.168.1.3"].contains(&ip.as_str())));
    }
}
