//! Multi-node mesh simulation on the host.
//!
//! Runs several link-layer nodes over an in-memory radio channel laid out as
//! a chain (each node hears only its neighbours), so traffic from one end to
//! the other needs relaying.
//!
//! # Usage
//!
//! ```bash
//! MESH_NODES=5 MESH_ROUNDS=10 STATS_PORT=8080 cargo run --bin mesh-sim
//! ```
//!
//! Environment:
//! - `MESH_NODES`: number of nodes (default 4, minimum 2)
//! - `MESH_ROUNDS`: messages sent end to end (default 20)
//! - `STATS_PORT`: serve `/stats` on this port when set
//! - `LINK_CONFIG`: path to a JSON [`LinkConfig`] applied to every node
//! - `REGION`: `eu868`, `us915` or `as433`; sets the frequency

use log::{debug, error, info, warn};
use lora_mesh_link::link::{LoRaLink, SharedLink};
use lora_mesh_link::lora::{LinkConfig, Region, SimMedium, SimTransport, DISCOVERY_TTL};
use lora_mesh_link::mesh::MeshRouter;
#[cfg(feature = "stats-server")]
use lora_mesh_link::stats::server::StatsServer;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_NODES: usize = 4;
const DEFAULT_ROUNDS: usize = 20;

/// How often each node polls its radio.
const NODE_POLL: Duration = Duration::from_millis(10);

/// Gap between end-to-end messages.
const ROUND_GAP: Duration = Duration::from_millis(200);

fn env_usize(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            warn!("{}={} is not a number, using {}", name, value, default);
            default
        }),
        Err(_) => default,
    }
}

fn region() -> Option<Region> {
    let name = std::env::var("REGION").ok()?;
    let region = Region::from_name(&name);
    if region.is_none() {
        warn!("Unknown REGION={}, keeping configured frequency", name);
    }
    region
}

fn load_config() -> LinkConfig {
    let mut config = match std::env::var("LINK_CONFIG") {
        Ok(path) => {
            let loaded = std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|json| LinkConfig::from_json(&json).map_err(|e| e.to_string()));
            match loaded {
                Ok(config) => {
                    info!("Loaded link config from {}", path);
                    config
                }
                Err(e) => {
                    error!("Failed to load {}: {}", path, e);
                    std::process::exit(1);
                }
            }
        }
        Err(_) => LinkConfig::default(),
    };
    if let Some(region) = region() {
        config.frequency = LinkConfig::for_region(region).frequency;
        info!("Region {:?}: {} Hz", region, config.frequency);
    }
    config
}

/// Build `count` nodes on a chain topology.
fn build_chain(count: usize, base: &LinkConfig) -> Vec<LoRaLink<SimTransport>> {
    let medium = SimMedium::new();
    let radios: Vec<SimTransport> = (0..count).map(|_| medium.attach()).collect();
    for (i, a) in radios.iter().enumerate() {
        for b in radios.iter().skip(i + 2) {
            medium.set_link(a, b, false);
        }
    }

    radios
        .into_iter()
        .enumerate()
        .map(|(i, radio)| {
            let node_id = (i + 1) as u16;
            let mut link = LoRaLink::new(radio);
            if !link.init(base.clone().with_node_id(node_id)) {
                error!("Node {} failed to start", node_id);
                std::process::exit(1);
            }
            link.seed_message_ids_random();
            link.enable_mesh_mode(node_id);
            link.set_answer_discovery(true);
            link
        })
        .collect()
}

async fn run_node(link: SharedLink<SimTransport>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(NODE_POLL) => {}
        }
        let mut link = link.lock().await;
        while let Some(msg) = link.poll_mesh() {
            info!(
                "node {} <- {} [{}] {:?}",
                link.node_id(),
                msg.source_id,
                msg.kind(),
                msg.payload_str()
            );
        }
    }
}

async fn run(nodes: Vec<SharedLink<SimTransport>>, rounds: usize, cancel: CancellationToken) {
    let tasks: Vec<_> = nodes
        .iter()
        .map(|link| tokio::spawn(run_node(link.clone(), cancel.clone())))
        .collect();

    let (first, last) = match (nodes.first(), nodes.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return,
    };
    let dest = last.lock().await.node_id();
    let hops = MeshRouter::ttl_for_hops(nodes.len());

    if !first.lock().await.discover_nodes(DISCOVERY_TTL) {
        warn!("Discovery broadcast failed");
    }

    for round in 0..rounds {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(ROUND_GAP) => {}
        }
        let payload = format!("round {}", round);
        if first.lock().await.send_to_mesh(dest, payload.as_bytes(), hops) {
            debug!("sent {:?}", payload);
        } else {
            warn!("Round {} send failed", round);
        }
    }

    tokio::time::sleep(ROUND_GAP).await;
    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }

    for link in &nodes {
        let link = link.lock().await;
        info!("{}known: {:?}", link.status_string(), link.known_nodes());
        info!("stats: {}", link.stats().to_json());
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let count = env_usize("MESH_NODES", DEFAULT_NODES).max(2);
    let rounds = env_usize("MESH_ROUNDS", DEFAULT_ROUNDS);
    let base = load_config();

    info!("=== Mesh simulation: {} nodes, {} rounds ===", count, rounds);

    let links = build_chain(count, &base);

    #[cfg(feature = "stats-server")]
    let _stats_server = std::env::var("STATS_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .and_then(|port| {
            let stats = links.iter().map(|link| link.stats()).collect();
            match StatsServer::start(None, port, stats) {
                Ok(server) => Some(server),
                Err(e) => {
                    warn!("Failed to start stats server: {}", e);
                    None
                }
            }
        });

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create runtime: {}", e);
            std::process::exit(1);
        }
    };

    let nodes: Vec<SharedLink<SimTransport>> =
        links.into_iter().map(LoRaLink::into_shared).collect();

    runtime.block_on(async {
        let cancel = CancellationToken::new();
        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, shutting down");
                interrupt.cancel();
            }
        });
        run(nodes, rounds, cancel).await;
    });

    info!("=== Mesh simulation finished ===");
}
