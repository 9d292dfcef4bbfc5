//! kv-stress: load generation and contention-aware retries for the
//! `kvstore.KeyValueStore` gRPC service.
//!
//! Data flows top-down: [`ConcurrentLoadHarness`] → N × [`WorkloadRunner`] →
//! [`ResilientClient`] → [`KvStub`] → network. Results flow back up and are
//! merged once every worker has finished.

pub mod client;
pub mod config;
pub mod contention;
pub mod error;
pub mod harness;
pub mod latency;
pub mod mock;
pub mod payload;
pub mod proto;
pub mod report;
pub mod stub;
pub mod workload;

pub use client::{FailureKind, OperationOutcome, Payload, ResilientClient, RetryPolicy};
pub use config::RunConfig;
pub use contention::{Classification, ContentionClassifier};
pub use error::{Result, StressError, TransportError, TransportKind};
pub use harness::{partition, ConcurrentLoadHarness, WorkerCount};
pub use latency::{LatencyRecorder, LatencySummary};
pub use report::BenchReport;
pub use stub::{GrpcConnector, GrpcStub, KvStub, StubFactory};
pub use workload::{ContentionRecord, RunnerOptions, WorkloadResult, WorkloadRunner};
