// kv-stress - Load generator for the kvstore gRPC service
//
// Drives single operations, bulk writes, mixed benchmarks and concurrent
// multi-connection writes against a KeyValueStore endpoint. Writes that hit
// a locked position ("bloqueo en la posición N") are retried with
// exponential backoff, and the contention seen per position is reported.
//
// Usage:
//   cargo run --release -- --addr http://127.0.0.1:5050 \
//     concurrentWrite --num_writes 10000 --num_clients 8 --value_size 512

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::time::Instant;
use tracing::{info, warn};

use kv_stress::config::{validate_value_size, RunArgs, RunConfig};
use kv_stress::payload::PayloadGenerator;
use kv_stress::report::{write_json, BenchReport};
use kv_stress::{
    ConcurrentLoadHarness, GrpcConnector, GrpcStub, ResilientClient, RunnerOptions, StubFactory,
    WorkerCount, WorkloadRunner,
};

/// kv-stress - contention-aware load generator for the kvstore service
#[derive(Parser, Debug, Clone)]
#[clap(name = "kv-stress")]
struct Args {
    #[clap(flatten)]
    run: RunArgs,

    /// Output file for results (JSON)
    #[clap(long, global = true)]
    output: Option<String>,

    #[clap(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug, Clone)]
enum Action {
    /// Write a random value under a key
    Set {
        #[clap(long)]
        key: String,
        #[clap(long = "value_size", default_value = "512")]
        value_size: usize,
    },
    /// Read the value stored under a key
    Get {
        #[clap(long)]
        key: String,
    },
    /// List every pair whose key starts with a prefix
    #[clap(name = "getPrefix")]
    GetPrefix {
        #[clap(long)]
        prefix: String,
    },
    /// Remove every stored pair
    #[clap(name = "resetDb")]
    ResetDb,
    /// Sequential bulk write on one connection
    #[clap(name = "bulkWrite")]
    BulkWrite {
        #[clap(long = "num_writes", default_value = "10")]
        num_writes: usize,
        #[clap(long = "value_size", default_value = "512")]
        value_size: usize,
    },
    /// Bulk write, bulk read, then a mixed read/write phase
    Benchmark {
        #[clap(long = "num_operations", default_value = "100")]
        num_operations: usize,
        #[clap(long = "value_size", default_value = "512")]
        value_size: usize,
    },
    /// Bulk write split across 2, 4, 8, 16 or 32 connections
    #[clap(name = "concurrentWrite")]
    ConcurrentWrite {
        #[clap(long = "num_writes", default_value = "1000")]
        num_writes: usize,
        #[clap(long = "num_clients", default_value = "4")]
        num_clients: WorkerCount,
        #[clap(long = "value_size", default_value = "512")]
        value_size: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = RunConfig::from_args(&args.run).context("Invalid configuration")?;

    info!("╔═══════════════════════════════════════════════════════════════╗");
    info!("║  kv-stress - KeyValueStore load generator                     ║");
    info!("╚═══════════════════════════════════════════════════════════════╝");
    info!("");
    info!("Configuration:");
    info!("  Endpoint:      {}", config.addr);
    info!("  Max retries:   {}", config.policy.max_retries());
    info!("  Base delay:    {:?}", config.policy.base_delay());
    info!("  Op timeout:    {:?}", config.op_timeout);
    info!("  Seed:          {}", config.seed);
    info!("");

    // Workers check this before each operation
    let stop = Arc::new(AtomicBool::new(false));
    let stop_signal = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight operations...");
            stop_signal.store(true, Ordering::Relaxed);
        }
    });

    let connector = config.connector();

    match args.action {
        Action::Set { key, value_size } => {
            let value_size = validate_value_size(value_size)?;
            let mut client = connect(&connector, &config).await?;
            let value = PayloadGenerator::new(config.seed, config.key_len).value(value_size);
            let outcome = client.set(&key, &value).await;
            if outcome.succeeded {
                info!(
                    "Set {}: ok after {} attempt(s), message = {}",
                    key, outcome.attempts, outcome.message
                );
            } else {
                warn!("Set {}: failed after {} attempt(s): {}", key, outcome.attempts, outcome.message);
            }
        }

        Action::Get { key } => {
            let mut client = connect(&connector, &config).await?;
            let outcome = client.get(&key).await;
            match outcome.value() {
                Some(value) => info!(
                    "Get {}: {} bytes, value = {}",
                    key,
                    value.len(),
                    preview(value)
                ),
                None => warn!("Get {}: key not found ({})", key, outcome.message),
            }
        }

        Action::GetPrefix { prefix } => {
            let mut client = connect(&connector, &config).await?;
            let outcome = client.get_prefix(&prefix).await;
            match outcome.objects() {
                Some(objects) if !objects.is_empty() => {
                    info!("GetPrefix {}: {} keys", prefix, objects.len());
                    for (key, value) in objects {
                        info!("  {} ({} bytes)", key, value.len());
                    }
                }
                Some(_) => info!("GetPrefix {}: no keys with that prefix", prefix),
                None => warn!("GetPrefix {}: failed: {}", prefix, outcome.message),
            }
        }

        Action::ResetDb => {
            let mut client = connect(&connector, &config).await?;
            let outcome = client.reset_db().await;
            if outcome.succeeded {
                info!("ResetDb: {}", outcome.message);
            } else {
                warn!("ResetDb failed: {}", outcome.message);
            }
        }

        Action::BulkWrite {
            num_writes,
            value_size,
        } => {
            let value_size = validate_value_size(value_size)?;
            let client = connect(&connector, &config).await?;
            let mut runner = WorkloadRunner::new(client, runner_options(&config, &stop));

            info!("Starting bulk write of {} keys...", num_writes);
            let started = Instant::now();
            let result = runner.bulk_write(num_writes, value_size).await;
            let report = BenchReport::new("bulk write", 1, &result, started.elapsed(), config.seed);
            report.log();
            if let Some(path) = &args.output {
                write_json(path, &report)?;
            }
        }

        Action::Benchmark {
            num_operations,
            value_size,
        } => {
            let value_size = validate_value_size(value_size)?;
            let client = connect(&connector, &config).await?;
            let mut runner = WorkloadRunner::new(client, runner_options(&config, &stop));
            let mut reports = Vec::with_capacity(3);

            info!("Phase 1/3: bulk write of {} keys", num_operations);
            let started = Instant::now();
            let written = runner.bulk_write(num_operations, value_size).await;
            reports.push(BenchReport::new("bulk write", 1, &written, started.elapsed(), config.seed));

            info!("Phase 2/3: bulk read of {} keys", written.generated_keys.len());
            let started = Instant::now();
            let read = runner.bulk_read(&written.generated_keys).await;
            reports.push(BenchReport::new("bulk read", 1, &read, started.elapsed(), config.seed));

            info!("Phase 3/3: mixed workload of {} operations", num_operations);
            let mut pool = written.generated_keys.clone();
            let started = Instant::now();
            let mixed = runner.mixed(num_operations, value_size, &mut pool).await;
            reports.push(BenchReport::new("mixed", 1, &mixed, started.elapsed(), config.seed));

            for report in &reports {
                report.log();
            }
            if let Some(path) = &args.output {
                write_json(path, &reports)?;
            }
        }

        Action::ConcurrentWrite {
            num_writes,
            num_clients,
            value_size,
        } => {
            let value_size = validate_value_size(value_size)?;
            let harness = ConcurrentLoadHarness::new(connector, config.policy)
                .with_seed(config.seed)
                .with_key_len(config.key_len)
                .with_progress_every(config.progress_every)
                .with_stop_flag(stop.clone());

            info!("");
            info!("═══════════════════════════════════════════════════════════════");
            info!("  CONCURRENT WRITE STARTED ({} writes, {} clients)", num_writes, num_clients);
            info!("═══════════════════════════════════════════════════════════════");

            let started = Instant::now();
            let result = match harness.run(num_writes, num_clients, value_size).await {
                Ok(result) => result,
                Err(err) => {
                    if let Some(partial) = err.partial_result() {
                        warn!("Reporting the workers that finished before the failure");
                        BenchReport::new(
                            "partial concurrent write",
                            num_clients.get(),
                            partial,
                            started.elapsed(),
                            config.seed,
                        )
                        .log();
                    }
                    return Err(anyhow::Error::new(err).context("Concurrent write failed"));
                }
            };
            let report = BenchReport::new(
                "concurrent write",
                num_clients.get(),
                &result,
                started.elapsed(),
                config.seed,
            );
            report.log();
            if let Some(path) = &args.output {
                write_json(path, &report)?;
            }
        }
    }

    Ok(())
}

/// Open one connection and wrap it in the retrying client
async fn connect(connector: &GrpcConnector, config: &RunConfig) -> Result<ResilientClient<GrpcStub>> {
    info!("Connecting to {}...", connector.endpoint());
    let stub = connector
        .connect(0)
        .await
        .context("Failed to connect to the key-value service")?;
    info!("Connected");
    Ok(ResilientClient::new(stub, config.policy))
}

fn runner_options(config: &RunConfig, stop: &Arc<AtomicBool>) -> RunnerOptions {
    RunnerOptions {
        label: "client".to_string(),
        seed: config.seed,
        key_len: config.key_len,
        progress_every: config.progress_every,
        stop: stop.clone(),
    }
}

/// Printable prefix of a value
fn preview(value: &[u8]) -> String {
    const MAX: usize = 64;
    let shown = &value[..value.len().min(MAX)];
    let text = String::from_utf8_lossy(shown);
    if value.len() > MAX {
        format!("{}...", text)
    } else {
        text.into_owned()
    }
}
