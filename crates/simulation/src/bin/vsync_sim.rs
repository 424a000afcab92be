//! Group membership simulator CLI
//!
//! Runs a seeded join/leave/cast workload against a simulated group and
//! prints the resulting view history.

use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};
use vsync_core::MemberStatus;
use vsync_simulation::{NetworkConfig, NodeIndex, SimulatedGroup};

#[derive(Parser)]
#[command(name = "vsync-sim")]
#[command(about = "Deterministic group membership simulator")]
#[command(version)]
struct Cli {
    /// Number of nodes
    #[arg(short, long, default_value = "5")]
    nodes: u32,

    /// Number of workload operations
    #[arg(short, long, default_value = "200")]
    steps: usize,

    /// Random seed
    #[arg(long, default_value = "12345")]
    seed: u64,

    /// Minimum number of members for a primary view
    #[arg(long)]
    quorum: Option<usize>,

    /// Fail members that end up outside a primary view
    #[arg(long)]
    primary_only: bool,

    /// Probability that a member leaves on its turn (0.0 to 1.0)
    #[arg(long, default_value = "0.1")]
    leave_ratio: f64,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    vsync_runtime::init_tracing(&cli.log_level);

    if !(0.0..=1.0).contains(&cli.leave_ratio) {
        return Err(format!("leave ratio must be within [0, 1]: {}", cli.leave_ratio).into());
    }

    let mut config = NetworkConfig::new()
        .with_seed(cli.seed)
        .with_primary_only(cli.primary_only);
    if let Some(quorum) = cli.quorum {
        config = config.with_quorum(quorum);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut group = SimulatedGroup::new(config);
    let nodes: Vec<NodeIndex> = (0..cli.nodes)
        .map(|i| group.add_node(&format!("node-{i}")))
        .collect();
    if nodes.is_empty() {
        return Err("at least one node is required".into());
    }

    info!(nodes = nodes.len(), steps = cli.steps, seed = cli.seed, "Starting simulation");

    for step in 0..cli.steps {
        let node = nodes[rng.gen_range(0..nodes.len())];
        let result = match group.member(node).status() {
            MemberStatus::Bogus | MemberStatus::Left => group.join(node),
            MemberStatus::Normal if rng.gen_bool(cli.leave_ratio) => group.leave(node),
            MemberStatus::Normal => group.cast(node, (step as u64).to_le_bytes().to_vec()),
            _ => Ok(()),
        };
        if let Err(error) = result {
            warn!(node, step, %error, "Operation rejected");
        }

        // Let a few events through between operations.
        for _ in 0..rng.gen_range(0..8) {
            if !group.step() {
                break;
            }
        }
    }
    group.run_until_idle(1_000_000);

    println!("View history:");
    for view in group.history() {
        let members: Vec<&str> = view.members.iter().map(|m| m.as_str()).collect();
        println!(
            "  ltime={:<4} primary={:<5} transfer={:<5} [{}]",
            view.ltime.0,
            view.is_primary,
            view.is_transfer_view,
            members.join(", ")
        );
    }

    let stats = group.stats();
    println!();
    println!("Events processed: {}", stats.events_processed);
    println!("Views installed:  {}", stats.views_installed);
    println!("Messages routed:  {}", stats.messages_routed);

    Ok(())
}
