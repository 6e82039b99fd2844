/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * rsctl - replica-set membership and primary-election controller
 * Built with Rust for superior performance and reliability
 *
 * @file main.rs
 * @brief rsctl process entry point
 */

use rsctl::configloader::{ConfigLoader, LoaderInstaller, LocalRecordSource, SeedList};
use rsctl::logger::{init_tracing_logger, LogLevel};
use rsctl::manager::Manager;
use rsctl::model::HostPort;
use rsctl::replset::ReplSet;
use rsctl::transport::fake::{AlwaysGrantElectionTransport, FakeHeartbeatTransport};
use rsctl::{rs_info, rs_warn, Config};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let seed_string = args.get(1).cloned().unwrap_or_else(|| "rs0/".to_string());
    let self_addr = args.get(2).cloned().unwrap_or_else(|| "127.0.0.1:27017".to_string());
    let self_host = HostPort::parse(&self_addr)
        .ok_or_else(|| anyhow::anyhow!("usage: rsctl <setname>/<host:port>,... <self host:port>"))?;

    let config = Config::load("rsctl.toml").await?;
    init_tracing_logger(match config.logging.level.as_str() {
        "debug" => LogLevel::Debug,
        "warn" => LogLevel::Warning,
        "error" => LogLevel::Error,
        _ => LogLevel::Info,
    })
    .map_err(|e| anyhow::anyhow!("failed to init logger: {e}"))?;

    rs_info!("replSet starting up, self = {}", self_host);

    let seeds = SeedList::parse(&seed_string, &self_host)?;
    if !seeds.hosts.is_empty() {
        rs_warn!(
            "replSet has {} seed host(s) configured, but no network transport is wired into this binary; only the local configuration record will be used to bootstrap",
            seeds.hosts.len()
        );
    }

    // The heartbeat/election wire responders are an external collaborator
    // (see scope notes) — this binary wires the in-memory transports as
    // the default plug point. A deployment embeds this crate as a library
    // and supplies real `HeartbeatTransport`/`ElectionTransport` impls
    // backed by its own network stack.
    let heartbeat_transport = Arc::new(FakeHeartbeatTransport::new());
    let election_transport = Arc::new(AlwaysGrantElectionTransport);

    let rs = ReplSet::new(self_host, 0, config.clone(), heartbeat_transport, election_transport);
    *rs.set_name.write() = seeds.set_name.clone();

    let (mut manager, manager_tx) = Manager::new(rs.clone());

    let loader = Arc::new(ConfigLoader {
        sources: vec![Box::new(LocalRecordSource {
            path: config.local_config_path.clone(),
        })],
        retry_sleep_min: config.loader.retry_sleep_min,
        retry_sleep_max: config.loader.retry_sleep_max,
        events: manager_tx,
    });

    {
        let rs = rs.clone();
        let loader = loader.clone();
        tokio::spawn(async move {
            if let Err(e) = loader.load_and_install(&rs).await {
                rs_warn!("replSet configuration loader exited with error: {}", e);
            }
        });
    }

    let installer = Arc::new(LoaderInstaller { loader });
    manager.run(installer).await;

    Ok(())
}
