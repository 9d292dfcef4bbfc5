//! Resilient operation client.
//!
//! Wraps one [`KvStub`] connection. Writes that hit a locked position are
//! retried with exponential backoff; every other failure is returned as-is.
//! Nothing in here returns `Err` for an expected failure: the outcome always
//! carries the status and the diagnostic.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::contention::{Classification, ContentionClassifier};
use crate::error::{Result, StressError, TransportError, TransportKind};
use crate::stub::KvStub;

/// Retry configuration for `set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(20),
        }
    }
}

impl RetryPolicy {
    /// Fails when `max_retries` is zero.
    pub fn new(max_retries: u32, base_delay: Duration) -> Result<Self> {
        if max_retries == 0 {
            return Err(StressError::InvalidConfig(
                "max_retries must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            max_retries,
            base_delay,
        })
    }

    /// Maximum number of network attempts for one `set`.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Delay slept after failed attempt `attempt` (1-indexed), before the
    /// next one: `base_delay * 2^(attempt - 1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Why an operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network/connection failure; never retried.
    Transport(TransportKind),
    /// Every attempt hit a locked position.
    ContentionExhausted,
    /// Application failure without the contention marker.
    Terminal,
}

/// Data returned by a successful operation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Payload {
    #[default]
    Empty,
    Value(Vec<u8>),
    Objects(Vec<(String, Vec<u8>)>),
}

/// Result of one logical operation.
///
/// A failed outcome always has a non-empty `message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub succeeded: bool,
    pub payload: Payload,
    pub message: String,
    /// Network attempts made.
    pub attempts: u32,
    /// Round-trip time of each attempt, in order. Backoff sleeps are not
    /// included.
    pub attempt_latencies: Vec<Duration>,
    pub failure: Option<FailureKind>,
}

impl OperationOutcome {
    fn success(payload: Payload, message: String, attempt_latencies: Vec<Duration>) -> Self {
        Self {
            succeeded: true,
            payload,
            message,
            attempts: attempt_latencies.len() as u32,
            attempt_latencies,
            failure: None,
        }
    }

    fn failure(kind: FailureKind, message: String, attempt_latencies: Vec<Duration>) -> Self {
        let message = if message.trim().is_empty() {
            "operation failed without diagnostic".to_string()
        } else {
            message
        };
        Self {
            succeeded: false,
            payload: Payload::Empty,
            message,
            attempts: attempt_latencies.len() as u32,
            attempt_latencies,
            failure: Some(kind),
        }
    }

    fn transport(err: TransportError, attempt_latencies: Vec<Duration>) -> Self {
        Self::failure(FailureKind::Transport(err.kind), err.to_string(), attempt_latencies)
    }

    /// Value for a successful `get`.
    pub fn value(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Objects for a successful `get_prefix`.
    pub fn objects(&self) -> Option<&[(String, Vec<u8>)]> {
        match &self.payload {
            Payload::Objects(o) => Some(o),
            _ => None,
        }
    }
}

/// One connection plus the retry loop for writes.
pub struct ResilientClient<S> {
    stub: S,
    policy: RetryPolicy,
    classifier: ContentionClassifier,
}

impl<S: KvStub> ResilientClient<S> {
    pub fn new(stub: S, policy: RetryPolicy) -> Self {
        Self {
            stub,
            policy,
            classifier: ContentionClassifier::default(),
        }
    }

    pub fn with_classifier(mut self, classifier: ContentionClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn classifier(&self) -> &ContentionClassifier {
        &self.classifier
    }

    pub fn into_inner(self) -> S {
        self.stub
    }

    /// Writes `value` under `key` using the client's policy.
    pub async fn set(&mut self, key: &str, value: &[u8]) -> OperationOutcome {
        let policy = self.policy;
        self.set_with_policy(key, value, &policy).await
    }

    /// Writes with an explicit policy.
    ///
    /// Makes between 1 and `policy.max_retries()` network attempts. Only
    /// contention is retried; transport and terminal failures return at once.
    pub async fn set_with_policy(
        &mut self,
        key: &str,
        value: &[u8],
        policy: &RetryPolicy,
    ) -> OperationOutcome {
        let mut attempt = 1;
        let mut latencies = Vec::with_capacity(policy.max_retries() as usize);
        loop {
            let started = Instant::now();
            let sent = self.stub.set(key, value).await;
            latencies.push(started.elapsed());

            let reply = match sent {
                Ok(reply) => reply,
                Err(err) => {
                    warn!(key, attempt, error = %err, "Set failed at transport layer");
                    return OperationOutcome::transport(err, latencies);
                }
            };

            if reply.status {
                if attempt > 1 {
                    debug!(key, attempt, "Set succeeded after contention");
                }
                return OperationOutcome::success(Payload::Empty, reply.message, latencies);
            }

            match self.classifier.classify(&reply.message) {
                Classification::Terminal => {
                    warn!(key, attempt, message = %reply.message, "Set failed");
                    return OperationOutcome::failure(
                        FailureKind::Terminal,
                        reply.message,
                        latencies,
                    );
                }
                Classification::Contention { position } => {
                    match position {
                        Some(position) => debug!(key, attempt, position, "Position locked"),
                        None => warn!(
                            key,
                            attempt,
                            position = "unknown",
                            message = %reply.message,
                            "Position locked"
                        ),
                    }

                    if attempt >= policy.max_retries() {
                        warn!(key, attempts = attempt, "Set gave up after contention");
                        return OperationOutcome::failure(
                            FailureKind::ContentionExhausted,
                            format!(
                                "failed after {} retries, last message: {}",
                                policy.max_retries(),
                                reply.message
                            ),
                            latencies,
                        );
                    }

                    let delay = policy.delay_for_attempt(attempt);
                    debug!(key, attempt, ?delay, "Backing off before retry");
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Single attempt; succeeds only if the service reports the key found.
    pub async fn get(&mut self, key: &str) -> OperationOutcome {
        let started = Instant::now();
        let sent = self.stub.get(key).await;
        let latencies = vec![started.elapsed()];
        match sent {
            Ok(reply) if reply.status => {
                OperationOutcome::success(Payload::Value(reply.value), reply.message, latencies)
            }
            Ok(reply) => OperationOutcome::failure(FailureKind::Terminal, reply.message, latencies),
            Err(err) => {
                warn!(key, error = %err, "Get failed at transport layer");
                OperationOutcome::transport(err, latencies)
            }
        }
    }

    /// Single attempt.
    pub async fn get_prefix(&mut self, prefix: &str) -> OperationOutcome {
        let started = Instant::now();
        let sent = self.stub.get_prefix(prefix).await;
        let latencies = vec![started.elapsed()];
        match sent {
            Ok(reply) if reply.status => {
                OperationOutcome::success(Payload::Objects(reply.objects), reply.message, latencies)
            }
            Ok(reply) => OperationOutcome::failure(FailureKind::Terminal, reply.message, latencies),
            Err(err) => {
                warn!(prefix, error = %err, "GetPrefix failed at transport layer");
                OperationOutcome::transport(err, latencies)
            }
        }
    }

    /// Single attempt.
    pub async fn reset_db(&mut self) -> OperationOutcome {
        let started = Instant::now();
        let sent = self.stub.reset_db().await;
        let latencies = vec![started.elapsed()];
        match sent {
            Ok(reply) if reply.status => {
                OperationOutcome::success(Payload::Empty, reply.message, latencies)
            }
            Ok(reply) => OperationOutcome::failure(FailureKind::Terminal, reply.message, latencies),
            Err(err) => {
                warn!(error = %err, "ResetDb failed at transport layer");
                OperationOutcome::transport(err, latencies)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ScriptStep, ScriptedService};
    use std::sync::Arc;

    fn policy(max_retries: u32, base_ms: u64) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(base_ms)).unwrap()
    }

    fn gaps(times: &[Instant]) -> Vec<Duration> {
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }

    #[test]
    fn zero_retries_rejected() {
        assert!(matches!(
            RetryPolicy::new(0, Duration::from_millis(10)),
            Err(StressError::InvalidConfig(_))
        ));
    }

    #[test]
    fn delays_double() {
        let p = policy(5, 20);
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(20));
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(40));
        assert_eq!(p.delay_for_attempt(3), Duration::from_millis(80));
        assert_eq!(p.delay_for_attempt(4), Duration::from_millis(160));
        // Saturates instead of overflowing.
        assert_eq!(p.delay_for_attempt(200), Duration::from_millis(20).saturating_mul(u32::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_contention_makes_exactly_max_attempts() {
        for n in 1..=5u32 {
            let service = Arc::new(ScriptedService::new());
            service.push_set_steps(std::iter::repeat(ScriptStep::Contention(Some(42))).take(10));
            let mut client = ResilientClient::new(service.stub(), policy(n, 10));

            let outcome = client.set("k1", b"v").await;

            assert!(!outcome.succeeded);
            assert_eq!(outcome.attempts, n);
            assert_eq!(outcome.failure, Some(FailureKind::ContentionExhausted));
            assert_eq!(service.set_calls(), n as usize);
            assert!(outcome
                .message
                .starts_with(&format!("failed after {} retries, last message: ", n)));
            assert!(outcome.message.contains("bloqueo en la posición 42"));

            let expected: Vec<Duration> = (0..n.saturating_sub(1))
                .map(|i| Duration::from_millis(10 * 2u64.pow(i)))
                .collect();
            assert_eq!(gaps(&service.set_times()), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_kth_attempt_stops_retrying() {
        let service = Arc::new(ScriptedService::new());
        service.push_set_steps([
            ScriptStep::Contention(Some(1)),
            ScriptStep::Contention(Some(1)),
            ScriptStep::Ok,
        ]);
        let mut client = ResilientClient::new(service.stub(), policy(5, 20));

        let start = Instant::now();
        let outcome = client.set("k", b"value").await;

        assert!(outcome.succeeded);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(service.set_calls(), 3);
        // 20ms + 40ms of backoff, nothing after the success.
        assert_eq!(start.elapsed(), Duration::from_millis(60));
        assert_eq!(service.value_of("k"), Some(b"value".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn each_attempt_is_timed_without_backoff() {
        let service = Arc::new(ScriptedService::new().with_service_time(Duration::from_millis(3)));
        service.push_set_steps([
            ScriptStep::Contention(Some(9)),
            ScriptStep::Contention(Some(9)),
            ScriptStep::Ok,
        ]);
        let mut client = ResilientClient::new(service.stub(), policy(5, 20));

        let outcome = client.set("k", b"v").await;

        assert!(outcome.succeeded);
        assert_eq!(outcome.attempt_latencies, vec![Duration::from_millis(3); 3]);

        let read = client.get("k").await;
        assert_eq!(read.attempt_latencies, vec![Duration::from_millis(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_is_not_retried() {
        let service = Arc::new(ScriptedService::new());
        service.push_set_steps([ScriptStep::Terminal("invalid key".to_string())]);
        let mut client = ResilientClient::new(service.stub(), policy(5, 20));

        let outcome = client.set("k", b"v").await;

        assert!(!outcome.succeeded);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.message, "invalid key");
        assert_eq!(outcome.failure, Some(FailureKind::Terminal));
        assert_eq!(service.set_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_is_not_retried() {
        let service = Arc::new(ScriptedService::new());
        service.push_set_steps([
            ScriptStep::Contention(Some(3)),
            ScriptStep::Transport(TransportKind::Unavailable),
        ]);
        let mut client = ResilientClient::new(service.stub(), policy(5, 20));

        let outcome = client.set("k", b"v").await;

        assert!(!outcome.succeeded);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(
            outcome.failure,
            Some(FailureKind::Transport(TransportKind::Unavailable))
        );
        assert!(!outcome.message.is_empty());
        assert_eq!(service.set_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_position_is_still_retried() {
        let service = Arc::new(ScriptedService::new());
        service.push_set_steps([ScriptStep::Contention(None), ScriptStep::Ok]);
        let mut client = ResilientClient::new(service.stub(), policy(3, 5));

        let outcome = client.set("k", b"v").await;

        assert!(outcome.succeeded);
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn empty_failure_message_gets_diagnostic() {
        let service = Arc::new(ScriptedService::new());
        service.push_set_steps([ScriptStep::Terminal(String::new())]);
        let mut client = ResilientClient::new(service.stub(), policy(2, 1));

        let outcome = client.set("k", b"v").await;

        assert!(!outcome.succeeded);
        assert!(!outcome.message.is_empty());
    }

    #[tokio::test]
    async fn reads_are_single_attempt() {
        let service = Arc::new(ScriptedService::new());
        let mut client = ResilientClient::new(service.stub(), RetryPolicy::default());

        assert!(client.set("ab12", b"one").await.succeeded);
        assert!(client.set("ab34", b"two").await.succeeded);
        assert!(client.set("cd56", b"three").await.succeeded);

        let found = client.get("ab12").await;
        assert!(found.succeeded);
        assert_eq!(found.value(), Some(&b"one"[..]));

        let missing = client.get("zz").await;
        assert!(!missing.succeeded);
        assert_eq!(missing.attempts, 1);

        let prefixed = client.get_prefix("ab").await;
        assert!(prefixed.succeeded);
        let keys: Vec<&str> = prefixed
            .objects()
            .unwrap()
            .iter()
            .map(|(k, _)| k.as_str())
            .collect();
        assert_eq!(keys, vec!["ab12", "ab34"]);

        assert!(client.reset_db().await.succeeded);
        assert!(!client.get("ab12").await.succeeded);
    }

    #[tokio::test]
    async fn read_transport_failure_is_outcome() {
        let service = Arc::new(ScriptedService::new());
        service.fail_reads(TransportKind::Timeout);
        let mut client = ResilientClient::new(service.stub(), RetryPolicy::default());

        let outcome = client.get("k").await;
        assert!(!outcome.succeeded);
        assert_eq!(outcome.failure, Some(FailureKind::Transport(TransportKind::Timeout)));
        assert!(outcome.message.starts_with("timeout error"));
    }
}
