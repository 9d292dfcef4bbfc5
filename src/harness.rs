//! Concurrent bulk-write harness.
//!
//! Splits a write count across a fixed number of workers. Each worker opens
//! its own connection, runs a sequential bulk write, and hands back an owned
//! [`WorkloadResult`]. Results are merged only after every worker has joined.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{error, info};

use crate::client::{ResilientClient, RetryPolicy};
use crate::error::{Result, StressError};
use crate::payload::{worker_seed, DEFAULT_KEY_LEN};
use crate::stub::StubFactory;
use crate::workload::{RunnerOptions, WorkloadResult, WorkloadRunner};

/// Allowed worker pool sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerCount {
    Two,
    Four,
    Eight,
    Sixteen,
    ThirtyTwo,
}

impl WorkerCount {
    pub const ALL: [WorkerCount; 5] = [
        WorkerCount::Two,
        WorkerCount::Four,
        WorkerCount::Eight,
        WorkerCount::Sixteen,
        WorkerCount::ThirtyTwo,
    ];

    pub fn get(self) -> usize {
        match self {
            WorkerCount::Two => 2,
            WorkerCount::Four => 4,
            WorkerCount::Eight => 8,
            WorkerCount::Sixteen => 16,
            WorkerCount::ThirtyTwo => 32,
        }
    }
}

impl TryFrom<usize> for WorkerCount {
    type Error = StressError;

    fn try_from(n: usize) -> Result<Self> {
        WorkerCount::ALL
            .into_iter()
            .find(|w| w.get() == n)
            .ok_or_else(|| {
                StressError::InvalidConfig(format!(
                    "number of clients must be one of 2, 4, 8, 16, 32 (got {})",
                    n
                ))
            })
    }
}

impl FromStr for WorkerCount {
    type Err = StressError;

    fn from_str(s: &str) -> Result<Self> {
        let n: usize = s
            .trim()
            .parse()
            .map_err(|_| StressError::InvalidConfig(format!("not a number: {}", s)))?;
        WorkerCount::try_from(n)
    }
}

impl fmt::Display for WorkerCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// Per-worker operation counts: worker 0 takes the remainder.
pub fn partition(total: usize, workers: usize) -> Vec<usize> {
    if workers == 0 {
        return Vec::new();
    }
    let base = total / workers;
    let remainder = total % workers;
    (0..workers)
        .map(|i| if i == 0 { base + remainder } else { base })
        .collect()
}

/// Fans a bulk write out over independent connections.
pub struct ConcurrentLoadHarness<F> {
    factory: Arc<F>,
    policy: RetryPolicy,
    seed: u64,
    key_len: usize,
    progress_every: usize,
    stop: Arc<AtomicBool>,
}

impl<F: StubFactory> ConcurrentLoadHarness<F> {
    pub fn new(factory: F, policy: RetryPolicy) -> Self {
        Self {
            factory: Arc::new(factory),
            policy,
            seed: 0,
            key_len: DEFAULT_KEY_LEN,
            progress_every: 100,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_key_len(mut self, key_len: usize) -> Self {
        self.key_len = key_len;
        self
    }

    pub fn with_progress_every(mut self, progress_every: usize) -> Self {
        self.progress_every = progress_every;
        self
    }

    /// Flag observed by every worker before each operation.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Runs `num_writes` writes across `workers` and merges the results.
    ///
    /// Fails if any worker cannot connect or dies; the failure names the
    /// worker rather than dropping its share from the totals, and carries the
    /// merged results of the workers that finished.
    pub async fn run(
        &self,
        num_writes: usize,
        workers: WorkerCount,
        value_size: usize,
    ) -> Result<WorkloadResult> {
        let shares = partition(num_writes, workers.get());
        info!(
            workers = workers.get(),
            num_writes,
            value_size,
            "Starting concurrent bulk write (shares: {:?})",
            shares
        );

        let mut handles = Vec::with_capacity(shares.len());
        for (worker, share) in shares.iter().copied().enumerate() {
            let factory = Arc::clone(&self.factory);
            let options = RunnerOptions {
                label: format!("worker-{}", worker),
                seed: worker_seed(self.seed, worker),
                key_len: self.key_len,
                progress_every: self.progress_every,
                stop: Arc::clone(&self.stop),
            };
            let policy = self.policy;

            handles.push(tokio::spawn(async move {
                let stub = factory.connect(worker).await?;
                let mut runner = WorkloadRunner::new(ResilientClient::new(stub, policy), options);
                Ok::<_, StressError>(runner.bulk_write(share, value_size).await)
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        let mut first_fault = None;
        for (worker, joined) in join_all(handles).await.into_iter().enumerate() {
            let fault = match joined {
                Ok(Ok(result)) => {
                    results.push(result);
                    continue;
                }
                Ok(Err(e)) => StressError::WorkerFailed {
                    worker,
                    source: Box::new(e),
                    partial: Box::default(),
                },
                Err(e) => StressError::WorkerPanicked {
                    worker,
                    message: e.to_string(),
                    partial: Box::default(),
                },
            };
            error!(worker, error = %fault, "Worker did not complete");
            if first_fault.is_none() {
                first_fault = Some(fault);
            }
        }

        if let Some(mut fault) = first_fault {
            if let StressError::WorkerFailed { partial, .. }
            | StressError::WorkerPanicked { partial, .. } = &mut fault
            {
                **partial = WorkloadResult::merge_all(results);
            }
            return Err(fault);
        }
        Ok(WorkloadResult::merge_all(results))
    }
}
