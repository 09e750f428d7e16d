//! Tardigrade CLI
//!
//! Thin wrapper around tardigrade-core for command-line usage.
//!
//! ## Usage
//!
//! ```bash
//! # Record a check-in
//! tardigrade checkin --first Ada --last Lovelace --dob 1984-03-09 --water --people 3
//!
//! # Show every record on this device
//! tardigrade list
//!
//! # Write the store file somewhere a peer can pick it up
//! tardigrade export --out /media/usb/database.csv
//!
//! # Merge a store file received from another device
//! tardigrade merge /media/usb/database.csv
//!
//! # Sync with a second store over the in-process link
//! tardigrade simulate --peer-dir /tmp/phone-b --chunk-size 20
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use tardigrade_core::sync::{memory, DEFAULT_CHUNK_SIZE};
use tardigrade_core::{
    CheckIn, HopPolicy, MergeReport, PersonIdentity, Record, RecordStore, SessionConfig,
    StoreConfig, SyncEvent, SyncSession,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// How long `simulate` waits for both sides to merge
const SIMULATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Tardigrade - offline check-ins with peer-to-peer sync
#[derive(Parser)]
#[command(name = "tardigrade")]
#[command(version = "0.1.0")]
#[command(about = "Tardigrade - offline check-ins with peer-to-peer sync")]
#[command(
    long_about = "Records who checked in where and what they need, keeps every record in one local file, and merges files between devices without a network."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: ~/.tardigrade/data)
    #[arg(short, long, global = true, env = "TARDIGRADE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Which records get their hop count bumped on a store write
    #[arg(long, global = true, value_enum, default_value_t = HopPolicyArg::EveryWrite)]
    hop_policy: HopPolicyArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a check-in for one person
    Checkin {
        /// First name
        #[arg(long)]
        first: String,

        /// Middle name
        #[arg(long, default_value = "")]
        middle: String,

        /// Last name
        #[arg(long)]
        last: String,

        /// Date of birth (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        dob: NaiveDate,

        /// Needs shelter
        #[arg(long)]
        shelter: bool,

        /// Needs water
        #[arg(long)]
        water: bool,

        /// Household size
        #[arg(long, default_value_t = 1)]
        people: i64,

        /// Free text notes
        #[arg(long, default_value = "")]
        notes: String,

        /// Medical need category code
        #[arg(long, default_value_t = 0)]
        medical_need: i64,

        /// Latitude of the check-in
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,

        /// Longitude of the check-in
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
    },

    /// List every record in the store
    List,

    /// Write the store file to a path, or to stdout
    Export {
        /// Output file (default: stdout)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Merge a store file received from another device
    Merge {
        /// Peer store file
        file: PathBuf,

        /// Print the merge report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Exchange stores with a second local store over an in-process link
    Simulate {
        /// Data directory of the simulated peer
        #[arg(long)]
        peer_dir: PathBuf,

        /// Link chunk size in bytes
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        /// Print both merge reports as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum HopPolicyArg {
    EveryWrite,
    PeerTransfer,
}

impl From<HopPolicyArg> for HopPolicy {
    fn from(arg: HopPolicyArg) -> Self {
        match arg {
            HopPolicyArg::EveryWrite => HopPolicy::EveryWrite,
            HopPolicyArg::PeerTransfer => HopPolicy::PeerTransfer,
        }
    }
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

/// Get the default data directory (~/.tardigrade/data)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tardigrade")
        .join("data")
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| format!("Invalid date '{}' (expected YYYY-MM-DD): {}", s, e))
}

fn format_timestamp(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

fn print_report(label: &str, report: &MergeReport) {
    println!("{}:", label);
    println!("  Received: {}", report.received);
    println!("  Added: {}", report.added);
    println!("  Replaced: {}", report.replaced);
    println!("  Kept local: {}", report.kept_local);
    println!("  Untouched local: {}", report.untouched_local);
    println!("  Total: {}", report.total);
}

fn open_store(data_dir: &Path, hop_policy: HopPolicy) -> Result<Arc<RecordStore>> {
    let config = StoreConfig::new(data_dir).with_hop_policy(hop_policy);
    tracing::debug!(path = %config.store_path().display(), "Opening store");
    let store = RecordStore::open(&config)
        .with_context(|| format!("Failed to open store in {}", data_dir.display()))?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    let hop_policy = HopPolicy::from(cli.hop_policy);
    let store = open_store(&data_dir, hop_policy)?;

    match cli.command {
        Commands::Checkin {
            first,
            middle,
            last,
            dob,
            shelter,
            water,
            people,
            notes,
            medical_need,
            lat,
            lon,
        } => {
            let person = PersonIdentity::new(first, middle, last, dob);
            let form = CheckIn {
                shelter,
                water,
                people_count: people,
                notes,
                medical_need,
                location: lat.zip(lon),
            };
            let record = Record::check_in_now(&person, &form);
            let hash = record.hash.clone();

            tardigrade_core::store::join(store.add_in_background(record)).await?;

            println!("Checked in: {} {}", person.first_name, person.last_name);
            println!("  Hash: {}", hash);
        }

        Commands::List => {
            let records = store.list()?;
            if records.is_empty() {
                println!("No records found.");
            } else {
                println!("Records ({}):", records.len());
                println!();
                for record in records {
                    println!(
                        "  {} {} hops={} {}",
                        record.hash.short(),
                        format_timestamp(record.timestamp),
                        record.hop_count,
                        record.notes.replace('\n', " ")
                    );
                }
            }
        }

        Commands::Export { out } => {
            let bytes = store.current_file_bytes()?;
            match out {
                Some(path) => {
                    std::fs::write(&path, &bytes)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Exported {} bytes to {}", bytes.len(), path.display());
                }
                None => {
                    use std::io::Write;
                    std::io::stdout().write_all(&bytes)?;
                }
            }
        }

        Commands::Merge { file, json } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let report = store.merge(&bytes)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&format!("Merged {}", file.display()), &report);
            }
        }

        Commands::Simulate {
            peer_dir,
            chunk_size,
            json,
        } => {
            let peer = open_store(&peer_dir, hop_policy)?;
            let (ours, theirs) = simulate(store, peer, chunk_size).await?;

            if json {
                let both = serde_json::json!({ "local": ours, "peer": theirs });
                println!("{}", serde_json::to_string_pretty(&both)?);
            } else {
                print_report("Local", &ours);
                println!();
                print_report("Peer", &theirs);
            }
        }
    }

    Ok(())
}

/// Run one session per store over a loopback pair until both have merged
async fn simulate(
    local: Arc<RecordStore>,
    peer: Arc<RecordStore>,
    chunk_size: usize,
) -> Result<(MergeReport, MergeReport)> {
    let (end_local, end_peer, control) = memory::pair(("local", "peer"), chunk_size, 8);
    let config = SessionConfig::default();
    let cancel = CancellationToken::new();

    let local_session = SyncSession::new(end_local.link, local, &config)?;
    let peer_session = SyncSession::new(end_peer.link, peer, &config)?;
    let mut local_events = local_session.subscribe();
    let mut peer_events = peer_session.subscribe();

    let local_task = tokio::spawn(local_session.run(end_local.events, cancel.child_token()));
    let peer_task = tokio::spawn(peer_session.run(end_peer.events, cancel.child_token()));

    let reports = tokio::time::timeout(SIMULATE_TIMEOUT, async {
        let ours = wait_for_merge(&mut local_events).await?;
        let theirs = wait_for_merge(&mut peer_events).await?;
        Ok::<_, anyhow::Error>((ours, theirs))
    })
    .await
    .context("Timed out waiting for both stores to merge");

    control.disconnect();
    cancel.cancel();
    let _ = local_task.await;
    let _ = peer_task.await;

    reports?
}

async fn wait_for_merge(events: &mut broadcast::Receiver<SyncEvent>) -> Result<MergeReport> {
    loop {
        match events.recv().await? {
            SyncEvent::Merged { report, .. } => return Ok(report),
            SyncEvent::MergeFailed { peer_id, message } => {
                anyhow::bail!("Merge of {}'s records failed: {}", peer_id, message)
            }
            SyncEvent::TransmissionAborted { peer_id, reason } => {
                anyhow::bail!("Transmission to {} aborted: {}", peer_id, reason)
            }
            _ => {}
        }
    }
}
