use clap::{Parser, Subcommand};
use std::path::Path;

use blockfees::core::chain::Chain;
use blockfees::core::params::*;
use blockfees::regtest;
use blockfees::snapshot;
use blockfees::stats::{self, FeerateAverage, PerBlockStatsRequest, StatsConfig, StatsError};

const DEFAULT_DATA_DIR: &str = "blockfees_data";

#[derive(Parser)]
#[command(name = "blockfees", version)]
#[command(about = "Per-block fee and size statistics over a range of chain heights")]
struct Cli {
    #[arg(long, global = true, default_value = DEFAULT_DATA_DIR)]
    data_dir: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show chain info
    Info,
    /// Compute per-block statistics (getperblockstats)
    Stats {
        /// First height of the range
        #[arg(long, allow_negative_numbers = true)]
        start: Option<i64>,
        /// Last height of the range (default: start)
        #[arg(long, allow_negative_numbers = true)]
        end: Option<i64>,
        /// Comma-separated fields, e.g. minfee,maxfee (default: all)
        #[arg(long)]
        fields: Option<String>,
        /// Raw JSON params instead of the flags above: `[start, end, fields]` or an object
        #[arg(long, conflicts_with_all = ["start", "end", "fields"])]
        params: Option<String>,
        /// Worker threads (0 = one per CPU)
        #[arg(short, long, default_value_t = 1)]
        workers: usize,
        /// How avgfeerate is averaged: per-tx (mean of per-transaction feerates)
        /// or weighted (total fee over total vsize; use this to match the reference node's avgfeerate)
        #[arg(long, default_value_t = FeerateAverage::PerTransaction)]
        feerate_average: FeerateAverage,
    },
    /// Write the standard regtest scenario (height 103) into an empty data dir
    SeedRegtest,
    /// Export chain snapshot
    ExportSnapshot {
        /// Output file path
        #[arg(short, long, default_value = "snapshot.bin")]
        output: String,
    },
    /// Import chain snapshot, replacing the chain in the data dir
    ImportSnapshot {
        /// Snapshot file path
        #[arg(short, long, default_value = "snapshot.bin")]
        input: String,
    },
}

fn main() {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "blockfees=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = &cli.data_dir;

    match cli.command {
        Commands::Info => {
            let chain = open_chain(data_dir);
            println!("📊 blockfees ({})", data_dir);
            println!("  Height:   {}", chain.height());
            println!("  Tip:      {}", hex::encode(chain.tip()));
            println!("  Genesis:  {}", hex::encode(chain.genesis_hash()));
            println!("  UTXOs:    {}", chain.utxo_set.len());
            println!("  Spent:    {}", chain.spent_outputs());
            println!("  Reward:   {} base units", block_reward(chain.height() + 1));
        }

        Commands::Stats { start, end, fields, params, workers, feerate_average } => {
            let request = match (params, start) {
                (Some(raw), _) => serde_json::from_str(&raw)
                    .map_err(|e| StatsError::InvalidRequest(e.to_string()))
                    .and_then(|v| PerBlockStatsRequest::from_json(&v)),
                (None, Some(start)) => Ok(PerBlockStatsRequest::new(start, end, fields.as_deref())),
                (None, None) => Err(StatsError::InvalidRequest("--start or --params is required".into())),
            };
            let config = StatsConfig { workers, feerate_average };
            let chain = open_chain(data_dir);

            match request.and_then(|r| stats::get_per_block_stats(&chain, &r, &config)) {
                Ok(result) => match serde_json::to_string_pretty(&result) {
                    Ok(json) => println!("{}", json),
                    Err(e) => fail(&e.to_string()),
                },
                Err(e) => {
                    eprintln!("error {}: {}", e.code(), e);
                    std::process::exit(1);
                }
            }
        }

        Commands::SeedRegtest => {
            let chain = open_chain(data_dir);
            match regtest::seed_standard_scenario(chain) {
                Ok(chain) => {
                    println!("🧪 Regtest scenario written to {}", data_dir);
                    println!("  Height: {}", chain.height());
                    println!("  Tip:    {}", hex::encode(chain.tip()));
                    println!("\n  Try: blockfees stats --start 101 --end 103 --feerate-average weighted");
                }
                Err(e) => fail(&e.to_string()),
            }
        }

        Commands::ExportSnapshot { output } => {
            let chain = open_chain(data_dir);
            match snapshot::export_to_file(&chain, &output) {
                Ok(summary) => {
                    let file_size = std::fs::metadata(&output).map(|m| m.len()).unwrap_or(0);
                    println!("  ✅ Exported {} blocks (height {}) to {}", summary.blocks, summary.height, output);
                    println!("  📦 {} bytes raw → {} bytes compressed", summary.raw_bytes, file_size);
                }
                Err(e) => fail(&e.to_string()),
            }
        }

        Commands::ImportSnapshot { input } => {
            if !Path::new(&input).exists() {
                fail(&format!("snapshot file not found: {}", input));
            }

            let start = std::time::Instant::now();
            match snapshot::import_into_dir(&input, data_dir) {
                Ok(summary) => {
                    let chain = open_chain(data_dir);
                    println!("  ✅ Imported {} blocks in {:.1}s", summary.blocks, start.elapsed().as_secs_f64());
                    println!("  📊 Chain height: {} | Tip: {}", chain.height(), &hex::encode(chain.tip())[..16]);
                }
                Err(e) => fail(&e.to_string()),
            }
        }
    }
}

fn open_chain(data_dir: &str) -> Chain {
    if let Err(e) = std::fs::create_dir_all(data_dir) {
        fail(&format!("cannot create {}: {}", data_dir, e));
    }
    Chain::open(data_dir).unwrap_or_else(|e| fail(&e.to_string()))
}

fn fail(msg: &str) -> ! {
    eprintln!("❌ {}", msg);
    std::process::exit(1);
}
