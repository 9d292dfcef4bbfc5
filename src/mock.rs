//! In-memory stand-in for the key-value service.
//!
//! [`ScriptedService`] keeps a real map so reads see earlier writes, and lets
//! callers script how individual `Set` attempts fail. Used by the unit and
//! integration tests; it is also handy for dry runs of the harness.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;

use crate::error::{Result, StressError, TransportError, TransportKind};
use crate::stub::{GetReply, KvStub, PrefixReply, Reply, StubFactory};

/// Scripted response to one `Set` attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    Ok,
    /// Locked position; `None` renders an unparsable position.
    Contention(Option<i64>),
    Terminal(String),
    Transport(TransportKind),
    /// Panics inside the stub, simulating a fault in the worker.
    Panic,
}

/// One `Set` attempt as seen by the service.
#[derive(Debug, Clone)]
pub struct SetAttempt {
    pub key: String,
    pub contended: bool,
    pub at: Instant,
}

struct RandomContention {
    rate: f64,
    positions: i64,
    rng: StdRng,
}

/// Shared in-memory service.
pub struct ScriptedService {
    store: Mutex<BTreeMap<String, Vec<u8>>>,
    steps: Mutex<VecDeque<ScriptStep>>,
    contention: Mutex<Option<RandomContention>>,
    attempts: Mutex<Vec<SetAttempt>>,
    read_failure: Mutex<Option<TransportKind>>,
    service_time: Mutex<Duration>,
}

impl Default for ScriptedService {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedService {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(BTreeMap::new()),
            steps: Mutex::new(VecDeque::new()),
            contention: Mutex::new(None),
            attempts: Mutex::new(Vec::new()),
            read_failure: Mutex::new(None),
            service_time: Mutex::new(Duration::ZERO),
        }
    }

    /// A new connection to this service.
    pub fn stub(self: &Arc<Self>) -> ScriptedStub {
        ScriptedStub {
            service: Arc::clone(self),
        }
    }

    /// Queues responses for upcoming `Set` attempts, in order. Once the queue
    /// drains, attempts fall back to random contention (if configured) or
    /// success.
    pub fn push_set_steps(&self, steps: impl IntoIterator<Item = ScriptStep>) {
        self.steps.lock().extend(steps);
    }

    /// Reports contention on `rate` of `Set` attempts, with positions drawn
    /// uniformly from `0..positions`.
    pub fn with_random_contention(self, rate: f64, positions: i64, seed: u64) -> Self {
        *self.contention.lock() = Some(RandomContention {
            rate: rate.clamp(0.0, 1.0),
            positions: positions.max(1),
            rng: StdRng::seed_from_u64(seed),
        });
        self
    }

    /// Simulated processing time applied to every call.
    pub fn with_service_time(self, service_time: Duration) -> Self {
        *self.service_time.lock() = service_time;
        self
    }

    /// Makes every `Get`/`GetPrefix` fail at the transport layer.
    pub fn fail_reads(&self, kind: TransportKind) {
        *self.read_failure.lock() = Some(kind);
    }

    pub fn set_calls(&self) -> usize {
        self.attempts.lock().len()
    }

    pub fn set_times(&self) -> Vec<Instant> {
        self.attempts.lock().iter().map(|a| a.at).collect()
    }

    pub fn set_attempts(&self) -> Vec<SetAttempt> {
        self.attempts.lock().clone()
    }

    pub fn value_of(&self, key: &str) -> Option<Vec<u8>> {
        self.store.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }

    fn next_step(&self) -> ScriptStep {
        if let Some(step) = self.steps.lock().pop_front() {
            return step;
        }
        let mut contention = self.contention.lock();
        if let Some(c) = contention.as_mut() {
            if c.rng.gen_bool(c.rate) {
                return ScriptStep::Contention(Some(c.rng.gen_range(0..c.positions)));
            }
        }
        ScriptStep::Ok
    }

    async fn simulate_work(&self) {
        let service_time = *self.service_time.lock();
        if !service_time.is_zero() {
            tokio::time::sleep(service_time).await;
        }
    }

    fn read_failure(&self) -> Option<TransportError> {
        self.read_failure
            .lock()
            .map(|kind| TransportError::new(kind, "scripted read failure"))
    }
}

fn contention_message(position: Option<i64>) -> String {
    match position {
        Some(p) => format!("Error: bloqueo en la posición {}, intente de nuevo", p),
        None => "Error: bloqueo en la posición desconocida".to_string(),
    }
}

/// Connection to a [`ScriptedService`].
#[derive(Clone)]
pub struct ScriptedStub {
    service: Arc<ScriptedService>,
}

#[async_trait]
impl KvStub for ScriptedStub {
    async fn set(&mut self, key: &str, value: &[u8]) -> Result<Reply, TransportError> {
        self.service.simulate_work().await;
        let step = self.service.next_step();
        self.service.attempts.lock().push(SetAttempt {
            key: key.to_string(),
            contended: matches!(step, ScriptStep::Contention(_)),
            at: Instant::now(),
        });
        match step {
            ScriptStep::Ok => {
                self.service
                    .store
                    .lock()
                    .insert(key.to_string(), value.to_vec());
                Ok(Reply {
                    status: true,
                    message: "OK".to_string(),
                })
            }
            ScriptStep::Contention(position) => Ok(Reply {
                status: false,
                message: contention_message(position),
            }),
            ScriptStep::Terminal(message) => Ok(Reply {
                status: false,
                message,
            }),
            ScriptStep::Transport(kind) => {
                Err(TransportError::new(kind, "scripted transport failure"))
            }
            ScriptStep::Panic => panic!("scripted fault while writing {}", key),
        }
    }

    async fn get(&mut self, key: &str) -> Result<GetReply, TransportError> {
        self.service.simulate_work().await;
        if let Some(err) = self.service.read_failure() {
            return Err(err);
        }
        Ok(match self.service.value_of(key) {
            Some(value) => GetReply {
                status: true,
                message: "OK".to_string(),
                value,
            },
            None => GetReply {
                status: false,
                message: "clave no encontrada".to_string(),
                value: Vec::new(),
            },
        })
    }

    async fn get_prefix(&mut self, prefix: &str) -> Result<PrefixReply, TransportError> {
        self.service.simulate_work().await;
        if let Some(err) = self.service.read_failure() {
            return Err(err);
        }
        let objects = self
            .service
            .store
            .lock()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(PrefixReply {
            status: true,
            message: "OK".to_string(),
            objects,
        })
    }

    async fn reset_db(&mut self) -> Result<Reply, TransportError> {
        self.service.simulate_work().await;
        self.service.store.lock().clear();
        Ok(Reply {
            status: true,
            message: "OK".to_string(),
        })
    }
}

/// [`StubFactory`] handing out connections to one [`ScriptedService`].
pub struct ScriptedFactory {
    service: Arc<ScriptedService>,
    refuse: HashSet<usize>,
    connections: AtomicUsize,
}

impl ScriptedFactory {
    pub fn new(service: Arc<ScriptedService>) -> Self {
        Self {
            service,
            refuse: HashSet::new(),
            connections: AtomicUsize::new(0),
        }
    }

    /// Refuses to connect the given worker.
    pub fn refuse_worker(mut self, worker: usize) -> Self {
        self.refuse.insert(worker);
        self
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl StubFactory for ScriptedFactory {
    type Stub = ScriptedStub;

    async fn connect(&self, worker: usize) -> Result<ScriptedStub> {
        if self.refuse.contains(&worker) {
            return Err(StressError::Connect {
                endpoint: "scripted".to_string(),
                message: format!("connection refused for worker {}", worker),
            });
        }
        self.connections.fetch_add(1, Ordering::Relaxed);
        Ok(self.service.stub())
    }
}
