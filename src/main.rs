//! peer-routing - Main entry point
//!
//! Builds an in-memory network of peers, bootstraps every peer and runs a
//! lookup for a key.

use anyhow::{Context, Result};
use peer_routing::dht::distance::compare_distance;
use peer_routing::{
    bootstrap_and_discover, BootstrapConfig, CliArgs, Config, DistributedRouting, Number160, Number640, PeerAddress,
    RequestKind, RoutingError, RoutingRequest, RoutingResult, SearchValues, SimulatedNetwork,
};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// First port handed out to simulated peers
const BASE_PORT: u16 = 4000;

/// Set up panic handler for unexpected errors
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();

        if let Some(location) = panic_info.location() {
            error!(
                "PANIC occurred at {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            );
        }
        let payload = panic_info.payload();
        if let Some(s) = payload.downcast_ref::<&str>() {
            error!("Panic message: {}", s);
        } else if let Some(s) = payload.downcast_ref::<String>() {
            error!("Panic message: {}", s);
        } else {
            error!("Panic message: unknown");
        }
        error!("Backtrace:\n{:?}", backtrace);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_panic_handler();

    let args = CliArgs::parse_args();
    init_logging(&args);
    info!("peer-routing starting");
    debug!("CLI arguments: {:?}", args);

    let config = Config::load(&args).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let network = Arc::new(SimulatedNetwork::new(config.peer_map.clone()));
    let nodes = build_network(&network, &config)?;
    join_network(&network, &nodes, &config).await?;

    network.set_fail_rate(config.fail_rate);
    network.clear_calls();

    let key = config.lookup_key();
    let origin = &nodes[nodes.len() - 1];
    let holder = closest_in_network(&nodes, &key)
        .ok_or_else(|| RoutingError::validation_error("network has no peers"))?;

    let request = RoutingRequest::to_location(key, config.routing.clone());
    let channel = network.channel(origin.self_address());
    let result = origin
        .route_to(&request, RequestKind::Neighbors, &channel)
        .await
        .context("Lookup failed")?;
    let lookup_calls = network.call_count();

    // store a value at the closest peer and find it again
    if let Some(node) = network.node(&holder.peer_id()) {
        node.storage
            .put(Number640::new(key, Number160::ZERO, Number160::from_seed("demo"), Number160::ZERO), b"demo".to_vec());
    }
    let search = SearchValues::for_location(key).with_domain(Number160::ZERO);
    let digest_request = RoutingRequest::new(search, config.routing.clone().with_max_direct_hits(1));
    let digest_result = origin
        .route_to(&digest_request, RequestKind::StorageDigest, &channel)
        .await
        .context("Digest lookup failed")?;

    if !config.is_quiet() {
        display_result(&config, &key, origin.self_address(), &holder, &result, lookup_calls, &digest_result);
    }

    info!("peer-routing finished");
    Ok(())
}

/// Initialize logging based on verbosity settings
fn init_logging(args: &CliArgs) {
    let level = args.log_level();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.is_verbose() {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }

    debug!("Logging initialized with level {:?}", level);
}

/// Register every peer with the network and create its routing driver
fn build_network(network: &Arc<SimulatedNetwork>, config: &Config) -> Result<Vec<DistributedRouting<SimulatedNetwork>>> {
    let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let mut nodes = Vec::with_capacity(config.peers);

    for index in 0..config.peers {
        let port = BASE_PORT.wrapping_add(index as u16);
        let address = PeerAddress::with_port(config.peer_id(index), ip, port);
        let node = network
            .add_node(address.clone())
            .with_context(|| format!("Failed to add peer {}", index))?;
        nodes.push(DistributedRouting::new(address, node.peer_map.clone(), network.clone())?);
    }

    info!("Created {} peers", nodes.len());
    Ok(nodes)
}

/// Bootstrap every peer from the first one
async fn join_network(
    network: &Arc<SimulatedNetwork>,
    nodes: &[DistributedRouting<SimulatedNetwork>],
    config: &Config,
) -> Result<()> {
    let seed = nodes[0].self_address().clone();

    for (index, node) in nodes.iter().enumerate().skip(1) {
        let bootstrap = BootstrapConfig::new(vec![seed.clone()])
            .with_params(config.routing.clone())
            .with_discovery_rounds(config.discovery_rounds);
        let channel = network.channel(node.self_address());
        let known = bootstrap_and_discover(node, &bootstrap, &channel)
            .await
            .with_context(|| format!("Peer {} failed to join", index))?;
        debug!("Peer {} joined knowing {} peers", index, known);
    }

    let total: usize = nodes.iter().map(|n| n.peer_map().size()).sum();
    info!(
        "Network ready: {} peers, {:.1} known peers on average, {} requests",
        nodes.len(),
        total as f64 / nodes.len() as f64,
        network.call_count()
    );
    Ok(())
}

/// The peer of the whole network closest to `key`
fn closest_in_network(nodes: &[DistributedRouting<SimulatedNetwork>], key: &Number160) -> Option<PeerAddress> {
    nodes
        .iter()
        .map(|n| n.self_address().clone())
        .min_by(|a, b| compare_distance(key, &a.peer_id(), &b.peer_id()))
}

/// Print the lookup results
fn display_result(
    config: &Config,
    key: &Number160,
    origin: &PeerAddress,
    holder: &PeerAddress,
    result: &RoutingResult,
    lookup_calls: usize,
    digest_result: &RoutingResult,
) {
    println!("Lookup:");
    println!("  Key: {}", key);
    println!("  From: {}", origin);
    println!("  Peers: {}", config.peers);
    println!("  Fail rate: {:.2}", config.fail_rate);
    println!();
    println!("Result:");
    println!("  Status: {}", result.status());
    println!("  Requests: {}", lookup_calls);
    println!("  Asked: {}", result.already_asked.len());
    println!("  Closest peers found:");
    for peer in result.found_peers().iter().take(config.routing.minimum_results) {
        println!("    {} (distance {})", peer.peer_id(), peer.peer_id().distance(key));
    }
    println!("  Closest peer in network: {}", holder.peer_id());

    let found_closest = result.found_peers().first().map(|p| p.peer_id()) == Some(holder.peer_id());
    if found_closest || holder == origin {
        println!("  Lookup reached the closest peer");
    } else {
        warn!("Lookup did not reach the closest peer {}", holder.peer_id().short());
        println!("  Lookup missed the closest peer");
    }
    println!();
    println!("Digest lookup:");
    println!("  Status: {}", digest_result.status());
    for (peer, digest) in &digest_result.direct_hits {
        println!("  Direct hit: {} ({} entries)", peer.peer_id(), digest.size);
    }
    if digest_result.direct_hits.is_empty() {
        println!("  No direct hits");
    }
}
