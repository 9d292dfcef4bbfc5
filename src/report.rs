//! Aggregate run report.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::latency::LatencyRecorder;
use crate::workload::{ContentionRecord, WorkloadResult};

/// Distinct failure messages kept in a report.
const TOP_FAILURES: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyReport {
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl LatencyReport {
    fn from_recorder(recorder: &LatencyRecorder) -> Self {
        let summary = recorder.summary();
        Self {
            min_ms: summary.min,
            max_ms: summary.max,
            avg_ms: summary.avg,
            p50_ms: recorder.percentile(50.0),
            p95_ms: recorder.percentile(95.0),
            p99_ms: recorder.percentile(99.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureCount {
    pub message: String,
    pub count: u64,
}

/// Summary of one workload or harness run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchReport {
    pub label: String,
    pub workers: usize,
    pub total_operations: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub reads: u64,
    pub writes: u64,
    pub set_attempts: u64,
    pub duration_secs: f64,
    pub ops_per_sec: f64,
    pub latency: LatencyReport,
    /// Per network attempt, without backoff.
    pub attempt_latency: LatencyReport,
    pub contention: ContentionRecord,
    pub top_failures: Vec<FailureCount>,
    pub seed: u64,
}

impl BenchReport {
    pub fn new(
        label: impl Into<String>,
        workers: usize,
        result: &WorkloadResult,
        elapsed: Duration,
        seed: u64,
    ) -> Self {
        let duration_secs = elapsed.as_secs_f64();
        let total = result.total_operations();
        Self {
            label: label.into(),
            workers,
            total_operations: total,
            success_count: result.success_count,
            failure_count: result.failure_count,
            reads: result.reads,
            writes: result.writes,
            set_attempts: result.set_attempts,
            duration_secs,
            ops_per_sec: if duration_secs > 0.0 {
                total as f64 / duration_secs
            } else {
                0.0
            },
            latency: LatencyReport::from_recorder(&result.latency),
            attempt_latency: LatencyReport::from_recorder(&result.attempt_latency),
            contention: result.contention.clone(),
            top_failures: top_failures(&result.failure_messages, TOP_FAILURES),
            seed,
        }
    }

    pub fn log(&self) {
        info!("");
        info!("═══════════════════════════════════════════════════════════════");
        info!("  {} COMPLETE", self.label.to_uppercase());
        info!("═══════════════════════════════════════════════════════════════");
        info!(
            "Elapsed: {:.2}s | Workers: {} | Ops: {} ({} ok, {} failed) | Ops/s: {:.1}",
            self.duration_secs,
            self.workers,
            self.total_operations,
            self.success_count,
            self.failure_count,
            self.ops_per_sec
        );
        info!(
            "Reads: {} | Writes: {} | Set attempts: {}",
            self.reads, self.writes, self.set_attempts
        );
        info!(
            "Latency (ms): min {:.3} | avg {:.3} | max {:.3} | p50 {:.3} | p95 {:.3} | p99 {:.3}",
            self.latency.min_ms,
            self.latency.avg_ms,
            self.latency.max_ms,
            self.latency.p50_ms,
            self.latency.p95_ms,
            self.latency.p99_ms
        );
        info!(
            "Per attempt (ms): avg {:.3} | p50 {:.3} | p99 {:.3}",
            self.attempt_latency.avg_ms, self.attempt_latency.p50_ms, self.attempt_latency.p99_ms
        );
        if !self.contention.is_empty() {
            info!("Contention (position: count), {} total:", self.contention.total());
            for (position, count) in self.contention.iter() {
                info!("  {:>8}: {}", position, count);
            }
            if self.contention.unknown() > 0 {
                info!("   unknown: {}", self.contention.unknown());
            }
        }
        for failure in &self.top_failures {
            info!("Failure x{}: {}", failure.count, failure.message);
        }
    }
}

/// Writes any serializable report (or list of reports) as pretty JSON.
pub fn write_json<T: Serialize + ?Sized>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    info!("Results written to {}", path.display());
    Ok(())
}

/// Most frequent messages first; ties keep first-seen order.
fn top_failures(messages: &[String], limit: usize) -> Vec<FailureCount> {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for message in messages {
        let count = counts.entry(message.as_str()).or_insert(0);
        if *count == 0 {
            order.push(message.as_str());
        }
        *count += 1;
    }
    let mut ranked: Vec<FailureCount> = order
        .into_iter()
        .map(|m| FailureCount {
            message: m.to_string(),
            count: counts[m],
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    ranked.truncate(limit);
    ranked
}
