use bytes::Bytes;
use clap::Parser;
use peer_correlation::config::Config;
use peer_correlation::correlation::{CorrelationManager, PeerAddress, PendingRequest};
use peer_correlation::error::AppError;
use peer_correlation::logging::setup_logging;
use peer_correlation::reputation::ReputationManager;
use rand::Rng;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "correlationd")]
#[command(about = "Peer request correlation daemon", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "correlation.toml")]
    config: String,

    #[arg(long)]
    generate_config: bool,

    /// Override the time-to-live of both channels
    #[arg(long)]
    ttl_ms: Option<u64>,

    /// Number of simulated peers
    #[arg(long, default_value_t = 5)]
    peers: usize,

    /// Number of simulated requests
    #[arg(long, default_value_t = 200)]
    requests: usize,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), AppError> {
    if args.generate_config {
        Config::default().save_to_file(&args.config)?;
        println!("✅ Generated default config at: {}", args.config);
        return Ok(());
    }

    let config_existed = Path::new(&args.config).exists();
    let mut config = Config::load_or_create(&args.config)?;
    if let Some(ttl_ms) = args.ttl_ms {
        config.rpc.default_ttl_ms = ttl_ms;
        config.p2p.default_ttl_ms = ttl_ms;
        config.validate()?;
    }

    setup_logging(&config.logging, args.verbose);
    info!(
        "🚀 {} correlationd v{} ({})",
        config.node.name,
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH")
    );
    if !config_existed {
        info!("📝 Wrote default config to {}", args.config);
    }

    let rpc = Arc::new(CorrelationManager::new("rpc", &config.rpc));
    let p2p = Arc::new(CorrelationManager::new("p2p", &config.p2p));
    let reputation = Arc::new(ReputationManager::new(config.reputation.clone()));

    let shutdown = CancellationToken::new();
    let listeners = vec![
        reputation.spawn_change_listener(rpc.reputation_changes(), shutdown.clone()),
        reputation.spawn_change_listener(p2p.reputation_changes(), shutdown.clone()),
    ];

    let peers: Vec<PeerAddress> = (0..args.peers.max(1))
        .map(|i| PeerAddress::from(format!("peer-{}", i)))
        .collect();

    let traffic = simulate_traffic([rpc.clone(), p2p.clone()], &peers, args.requests);

    tokio::select! {
        result = traffic => result?,
        _ = tokio::signal::ctrl_c() => warn!("🛑 Shutdown signal received"),
    }

    shutdown.cancel();
    for listener in listeners {
        listener.await?;
    }

    for manager in [&rpc, &p2p] {
        let stats = manager.stats();
        info!(
            channel = manager.channel(),
            added = stats.added,
            matched = stats.matched,
            unmatched = stats.unmatched,
            expired = stats.expired,
            removed = stats.removed,
            pending = manager.pending_count(),
            "📈 Correlation summary"
        );
    }

    for (rank, (peer, score)) in reputation.snapshot().iter().enumerate() {
        info!("  {}. {} reputation={}", rank + 1, peer, score);
    }

    Ok(())
}

/// One outbound request and how (or whether) its peer answers
struct PlannedRequest {
    channel: usize,
    peer: usize,
    reply_after: Option<Duration>,
}

/// Peer `i` answers with probability `1 - i/n`, sometimes after the deadline.
fn plan_requests(
    managers: &[Arc<CorrelationManager>; 2],
    peer_count: usize,
    requests: usize,
) -> Vec<PlannedRequest> {
    let mut rng = rand::thread_rng();
    (0..requests)
        .map(|i| {
            let channel = i % managers.len();
            let peer = rng.gen_range(0..peer_count);
            let ttl_ms = managers[channel].default_ttl().as_millis() as u64;
            let answer_rate = 1.0 - peer as f64 / peer_count as f64;
            let reply_after = rng
                .gen_bool(answer_rate.clamp(0.0, 1.0))
                .then(|| Duration::from_millis(rng.gen_range(0..=ttl_ms + ttl_ms / 2)));
            PlannedRequest {
                channel,
                peer,
                reply_after,
            }
        })
        .collect()
}

async fn simulate_traffic(
    managers: [Arc<CorrelationManager>; 2],
    peers: &[PeerAddress],
    requests: usize,
) -> Result<(), AppError> {
    let plan = plan_requests(&managers, peers.len(), requests);
    let mut responders: Vec<JoinHandle<()>> = Vec::new();

    info!("📡 Sending {} requests to {} peers", plan.len(), peers.len());

    for planned in plan {
        let manager = managers[planned.channel].clone();
        let peer = peers[planned.peer].clone();
        let record = PendingRequest::new(peer.clone(), Bytes::from_static(b"PingRequest"));
        let correlation_id = record.correlation_id;

        manager.add_pending_request(record);

        if let Some(delay) = planned.reply_after {
            responders.push(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                manager.try_match_response_from(&peer, correlation_id);
            }));
        }

        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    for responder in responders {
        responder.await?;
    }

    // Let the remaining unanswered requests run out their deadlines
    let longest_ttl = managers
        .iter()
        .map(|manager| manager.default_ttl())
        .max()
        .unwrap_or_default();
    tokio::time::sleep(longest_ttl + Duration::from_millis(100)).await;

    Ok(())
}
