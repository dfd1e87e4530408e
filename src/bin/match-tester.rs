//! Match Tester CLI Tool
//!
//! Command-line tool for exercising a running pairhouse instance over HTTP.
//!
//! Usage:
//!   # Start the service first:
//!   cargo run --bin pairhouse
//!
//!   # Then run the match tester:
//!   cargo run --bin match-tester -- --help
//!   cargo run --bin match-tester request --id "alice" --format rapid --skill 1200
//!   cargo run --bin match-tester poll --id "alice"
//!   cargo run --bin match-tester signal-status --game <uuid> --id "bob"
//!   cargo run --bin match-tester run-scenario --scenario "same-skill-pair"

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use uuid::Uuid;

#[path = "../../tests/match_tester.rs"]
mod match_tester;

use match_tester::{
    MatchTester, PollBudget, RequesterSpec, SignalStatus, TestScenarios, DEFAULT_BASE_URL,
};

#[derive(Parser)]
#[command(name = "match-tester")]
#[command(about = "Interactive testing tool for the pairhouse matchmaking and signaling API")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base URL of the pairhouse API
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a match request
    Request {
        /// Requester ID
        #[arg(short, long)]
        id: String,
        /// Game format (e.g. rapid, blitz)
        #[arg(short, long, default_value = "rapid")]
        format: String,
        /// Target skill
        #[arg(short, long, default_value = "1200.0")]
        skill: f64,
        /// Skill deviation used when sampling
        #[arg(short, long, default_value = "0.0")]
        deviation: f64,
    },
    /// Poll for a match record
    Poll {
        /// Requester ID
        #[arg(short, long)]
        id: String,
        /// Number of polls before giving up
        #[arg(short, long, default_value = "4")]
        attempts: u32,
        /// Seconds between polls
        #[arg(long, default_value = "2")]
        interval: u64,
    },
    /// Fetch the opposing negotiation payload for a game
    SignalStatus {
        /// Game ID
        #[arg(short, long)]
        game: Uuid,
        /// Requester ID asking for its opponent's payload
        #[arg(short, long)]
        id: String,
    },
    /// Run a predefined test scenario
    RunScenario {
        /// Scenario name (same-skill-pair, four-in-bucket, format-isolation)
        #[arg(short, long)]
        scenario: String,
    },
    /// Run all test scenarios
    RunAllScenarios,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let tester = MatchTester::new(cli.url)?;
    println!("🔌 Using pairhouse API at {}", tester.base_url());

    match cli.command {
        Commands::Request {
            id,
            format,
            skill,
            deviation,
        } => {
            let mut spec = RequesterSpec::new(&id, &format, skill);
            spec.deviation = deviation;
            match tester.request_match(&spec).await {
                Ok(ack) => {
                    println!("✅ Queued '{}' in {} (bucket {})", id, ack.queue_key, ack.bucket);
                    println!("💡 Use 'poll --id {}' to pick up the pairing", id);
                }
                Err(e) => {
                    eprintln!("❌ Failed to queue '{}': {}", id, e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Poll {
            id,
            attempts,
            interval,
        } => {
            let budget = PollBudget {
                attempts,
                interval: Duration::from_secs(interval),
            };
            match tester.poll(&id, budget).await? {
                Some(record) => {
                    println!("🎯 Match found for '{}'", id);
                    println!("  Game ID: {}", record.game_id);
                    println!("  Opponent: {}", record.opponent.requester_id);
                    println!("  Side: {}", record.assigned_side);
                }
                None => {
                    println!("⏳ No match for '{}' after {} polls", id, attempts);
                    std::process::exit(2);
                }
            }
        }

        Commands::SignalStatus { game, id } => match tester.signal_status(game, &id).await? {
            SignalStatus::Payload(payload) => {
                println!("📨 {} published an {}", payload.opponent, payload.sdp.sdp_type);
                println!("{}", payload.sdp.sdp);
            }
            SignalStatus::Pending(status) => match status.opponent {
                Some(opponent) => println!("⏳ {} (opponent: {})", status.status, opponent),
                None => println!("⏳ {}", status.status),
            },
        },

        Commands::RunScenario { scenario } => {
            let Some(config) = TestScenarios::by_name(&scenario) else {
                eprintln!(
                    "❌ Unknown scenario '{}'. Available: same-skill-pair, four-in-bucket, format-isolation",
                    scenario
                );
                std::process::exit(1);
            };

            println!("🧪 Running scenario: {}", config.scenario_name);
            match tester.run_scenario(&config, PollBudget::default()).await {
                Ok(report) if report.passed(config.expected_pairs) => {
                    println!(
                        "✅ Scenario completed: {} pairs in {:.1}s",
                        report.pairs,
                        report.elapsed.as_secs_f64()
                    );
                }
                Ok(report) => {
                    println!(
                        "❌ Scenario failed: {} pairs (expected {}), consistent: {}",
                        report.pairs, config.expected_pairs, report.consistent
                    );
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("❌ Error running scenario: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::RunAllScenarios => {
            let mut passed = 0;
            let mut failed = 0;

            println!("🧪 Running all test scenarios...\n");

            for config in TestScenarios::all() {
                print!("Running '{}' scenario... ", config.scenario_name);
                match tester.run_scenario(&config, PollBudget::default()).await {
                    Ok(report) if report.passed(config.expected_pairs) => {
                        println!("✅ PASSED");
                        passed += 1;
                    }
                    Ok(report) => {
                        println!(
                            "❌ FAILED ({} pairs, expected {})",
                            report.pairs, config.expected_pairs
                        );
                        failed += 1;
                    }
                    Err(e) => {
                        println!("❌ FAILED ({})", e);
                        failed += 1;
                    }
                }
            }

            println!("\n📊 Results: {} passed, {} failed", passed, failed);
            if failed > 0 {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
