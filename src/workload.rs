//! Sequential workloads against one resilient client.
//!
//! A [`WorkloadRunner`] owns its client and RNG and produces a
//! [`WorkloadResult`] that only it mutates. Results from several runners are
//! combined with [`WorkloadResult::merge`] after they have all finished.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tracing::info;

use crate::client::{OperationOutcome, ResilientClient};
use crate::contention::Classification;
use crate::latency::{LatencyRecorder, LatencySummary};
use crate::payload::{PayloadGenerator, DEFAULT_KEY_LEN};
use crate::stub::KvStub;

/// Occurrences of contention per locked position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContentionRecord {
    by_position: BTreeMap<i64, u64>,
    unknown: u64,
}

impl ContentionRecord {
    pub fn record(&mut self, position: Option<i64>) {
        match position {
            Some(p) => *self.by_position.entry(p).or_insert(0) += 1,
            None => self.unknown += 1,
        }
    }

    pub fn merge(&mut self, other: &ContentionRecord) {
        for (&position, &count) in &other.by_position {
            *self.by_position.entry(position).or_insert(0) += count;
        }
        self.unknown += other.unknown;
    }

    pub fn count(&self, position: i64) -> u64 {
        self.by_position.get(&position).copied().unwrap_or(0)
    }

    /// Contention whose position could not be parsed.
    pub fn unknown(&self) -> u64 {
        self.unknown
    }

    pub fn total(&self) -> u64 {
        self.by_position.values().sum::<u64>() + self.unknown
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, u64)> + '_ {
        self.by_position.iter().map(|(&p, &c)| (p, c))
    }
}

/// Counts, failures, contention and latency of one workload run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkloadResult {
    pub success_count: u64,
    pub failure_count: u64,
    pub failure_messages: Vec<String>,
    pub contention: ContentionRecord,
    /// End-to-end time of each operation, backoff included.
    pub latency: LatencyRecorder,
    /// Round-trip time of each network attempt.
    pub attempt_latency: LatencyRecorder,
    /// Keys written successfully, in write order.
    pub generated_keys: Vec<String>,
    pub reads: u64,
    pub writes: u64,
    /// Network attempts made by writes, retries included.
    pub set_attempts: u64,
}

impl WorkloadResult {
    pub fn total_operations(&self) -> u64 {
        self.success_count + self.failure_count
    }

    pub fn latency_summary(&self) -> LatencySummary {
        self.latency.summary()
    }

    pub fn latency_min(&self) -> f64 {
        self.latency_summary().min
    }

    pub fn latency_max(&self) -> f64 {
        self.latency_summary().max
    }

    pub fn latency_avg(&self) -> f64 {
        self.latency_summary().avg
    }

    /// Folds `other` into `self`: counts add, lists concatenate, contention
    /// adds per position, and latency is recomputed over both sample sets.
    pub fn merge(&mut self, other: WorkloadResult) {
        self.success_count += other.success_count;
        self.failure_count += other.failure_count;
        self.failure_messages.extend(other.failure_messages);
        self.contention.merge(&other.contention);
        self.latency.merge(&other.latency);
        self.attempt_latency.merge(&other.attempt_latency);
        self.generated_keys.extend(other.generated_keys);
        self.reads += other.reads;
        self.writes += other.writes;
        self.set_attempts += other.set_attempts;
    }

    pub fn merge_all(results: impl IntoIterator<Item = WorkloadResult>) -> WorkloadResult {
        let mut merged = WorkloadResult::default();
        for result in results {
            merged.merge(result);
        }
        merged
    }
}

/// Settings shared by every workload of one runner.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Name used in progress lines, e.g. `worker-3`.
    pub label: String,
    pub seed: u64,
    pub key_len: usize,
    /// Emit progress every this many operations (0 disables).
    pub progress_every: usize,
    /// Checked before each operation; set it to stop early.
    pub stop: Arc<AtomicBool>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            label: "client".to_string(),
            seed: 0,
            key_len: DEFAULT_KEY_LEN,
            progress_every: 100,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }
}

struct Progress<'a> {
    label: &'a str,
    workload: &'static str,
    total: usize,
    every: usize,
    started: Instant,
}

impl<'a> Progress<'a> {
    fn new(label: &'a str, workload: &'static str, total: usize, every: usize) -> Self {
        Self {
            label,
            workload,
            total,
            every,
            started: Instant::now(),
        }
    }

    fn observe(&self, done: usize, result: &WorkloadResult) {
        if self.every == 0 || (done % self.every != 0 && done != self.total) {
            return;
        }
        let elapsed = self.started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 { done as f64 / elapsed } else { 0.0 };
        info!(
            worker = self.label,
            workload = self.workload,
            "{}/{} ops | {} ok, {} failed | {:.1} ops/s",
            done,
            self.total,
            result.success_count,
            result.failure_count,
            rate
        );
    }
}

/// Runs bulk-write, bulk-read and mixed workloads on one connection.
pub struct WorkloadRunner<S> {
    client: ResilientClient<S>,
    payload: PayloadGenerator,
    options: RunnerOptions,
}

impl<S: KvStub> WorkloadRunner<S> {
    pub fn new(client: ResilientClient<S>, options: RunnerOptions) -> Self {
        Self {
            payload: PayloadGenerator::new(options.seed, options.key_len),
            client,
            options,
        }
    }

    pub fn client_mut(&mut self) -> &mut ResilientClient<S> {
        &mut self.client
    }

    fn stopped(&self) -> bool {
        self.options.stop.load(Ordering::Relaxed)
    }

    fn note_attempts(result: &mut WorkloadResult, outcome: &OperationOutcome) {
        for &latency in &outcome.attempt_latencies {
            result.attempt_latency.record(latency);
        }
    }

    fn note_failure(&self, result: &mut WorkloadResult, outcome: OperationOutcome) {
        if let Classification::Contention { position } =
            self.client.classifier().classify(&outcome.message)
        {
            result.contention.record(position);
        }
        result.failure_count += 1;
        result.failure_messages.push(outcome.message);
    }

    async fn timed_write(&mut self, result: &mut WorkloadResult, value_size: usize) -> Option<String> {
        let key = self.payload.key();
        let value = self.payload.value(value_size);

        let started = Instant::now();
        let outcome = self.client.set(&key, &value).await;
        result.latency.record(started.elapsed());
        Self::note_attempts(result, &outcome);

        result.writes += 1;
        result.set_attempts += u64::from(outcome.attempts);
        if outcome.succeeded {
            result.success_count += 1;
            result.generated_keys.push(key.clone());
            Some(key)
        } else {
            self.note_failure(result, outcome);
            None
        }
    }

    async fn timed_read(&mut self, result: &mut WorkloadResult, key: &str) {
        let started = Instant::now();
        let outcome = self.client.get(key).await;
        result.latency.record(started.elapsed());
        Self::note_attempts(result, &outcome);

        result.reads += 1;
        if outcome.succeeded {
            result.success_count += 1;
        } else {
            self.note_failure(result, outcome);
        }
    }

    /// Writes `num_writes` random pairs. Latency covers each `set` end to
    /// end, backoff included.
    pub async fn bulk_write(&mut self, num_writes: usize, value_size: usize) -> WorkloadResult {
        let mut result = WorkloadResult::default();
        let label = self.options.label.clone();
        let progress = Progress::new(&label, "bulk_write", num_writes, self.options.progress_every);

        for done in 1..=num_writes {
            if self.stopped() {
                info!(worker = %label, completed = done - 1, "Bulk write stopped early");
                break;
            }
            self.timed_write(&mut result, value_size).await;
            progress.observe(done, &result);
        }
        result
    }

    /// Reads each key in order.
    pub async fn bulk_read(&mut self, keys: &[String]) -> WorkloadResult {
        let mut result = WorkloadResult::default();
        let label = self.options.label.clone();
        let progress = Progress::new(&label, "bulk_read", keys.len(), self.options.progress_every);

        for (i, key) in keys.iter().enumerate() {
            if self.stopped() {
                info!(worker = %label, completed = i, "Bulk read stopped early");
                break;
            }
            self.timed_read(&mut result, key).await;
            progress.observe(i + 1, &result);
        }
        result
    }

    /// Each operation reads a random pooled key with probability 1/2 (when
    /// the pool is non-empty) and otherwise writes a new pair. Successful
    /// writes join the pool.
    pub async fn mixed(
        &mut self,
        num_operations: usize,
        value_size: usize,
        pool: &mut Vec<String>,
    ) -> WorkloadResult {
        let mut result = WorkloadResult::default();
        let label = self.options.label.clone();
        let progress = Progress::new(&label, "mixed", num_operations, self.options.progress_every);

        for done in 1..=num_operations {
            if self.stopped() {
                info!(worker = %label, completed = done - 1, "Mixed workload stopped early");
                break;
            }
            if !pool.is_empty() && self.payload.chance(0.5) {
                let key = pool[self.payload.index(pool.len())].clone();
                self.timed_read(&mut result, &key).await;
            } else if let Some(key) = self.timed_write(&mut result, value_size).await {
                pool.push(key);
            }
            progress.observe(done, &result);
        }
        result
    }
}
