//! The RPC stub seam.
//!
//! [`KvStub`] is the raw, single-attempt view of the service that the
//! resilient client wraps. [`StubFactory`] opens one stub per worker so that
//! connections are never shared.

use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::Endpoint;
use tonic::{Code, Status};
use tracing::debug;

use crate::error::{Result, StressError, TransportError, TransportKind};
use crate::proto::{
    GetPrefixRequest, GetRequest, KeyValueStoreClient, ResetDbRequest, SetRequest,
};

/// Reply to `Set` and `ResetDb`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: bool,
    pub message: String,
}

/// Reply to `Get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetReply {
    pub status: bool,
    pub message: String,
    pub value: Vec<u8>,
}

/// Reply to `GetPrefix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixReply {
    pub status: bool,
    pub message: String,
    pub objects: Vec<(String, Vec<u8>)>,
}

/// One attempt against the service. No retries happen at this layer.
#[async_trait]
pub trait KvStub: Send {
    async fn set(&mut self, key: &str, value: &[u8]) -> Result<Reply, TransportError>;

    async fn get(&mut self, key: &str) -> Result<GetReply, TransportError>;

    async fn get_prefix(&mut self, prefix: &str) -> Result<PrefixReply, TransportError>;

    async fn reset_db(&mut self) -> Result<Reply, TransportError>;
}

/// Opens independent connections, one per worker.
#[async_trait]
pub trait StubFactory: Send + Sync + 'static {
    type Stub: KvStub + 'static;

    async fn connect(&self, worker: usize) -> Result<Self::Stub>;
}

/// Outcome of mapping a failed gRPC call.
enum StatusClass {
    Application(String),
    Transport(TransportError),
}

/// The service fails write RPCs with `Unknown` and the diagnostic text, so
/// those codes are application replies. Everything else is transport, as is
/// any status tonic built locally from a connection error (it carries a
/// source; statuses decoded from the wire do not).
fn classify_status(status: &Status) -> StatusClass {
    let message = if status.message().is_empty() {
        format!("rpc failed with code {:?}", status.code())
    } else {
        status.message().to_string()
    };
    if std::error::Error::source(status).is_some() {
        return StatusClass::Transport(TransportError::new(TransportKind::Other, message));
    }
    match status.code() {
        Code::Unknown
        | Code::Aborted
        | Code::FailedPrecondition
        | Code::InvalidArgument
        | Code::NotFound
        | Code::ResourceExhausted => StatusClass::Application(message),
        Code::Unavailable => {
            StatusClass::Transport(TransportError::new(TransportKind::Unavailable, message))
        }
        Code::DeadlineExceeded => {
            StatusClass::Transport(TransportError::new(TransportKind::Timeout, message))
        }
        Code::Cancelled => {
            StatusClass::Transport(TransportError::new(TransportKind::Cancelled, message))
        }
        _ => StatusClass::Transport(TransportError::new(TransportKind::Other, message)),
    }
}

/// [`KvStub`] backed by a dedicated tonic channel.
#[derive(Debug, Clone)]
pub struct GrpcStub {
    client: KeyValueStoreClient,
}

impl GrpcStub {
    pub fn new(client: KeyValueStoreClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KvStub for GrpcStub {
    async fn set(&mut self, key: &str, value: &[u8]) -> Result<Reply, TransportError> {
        let request = SetRequest {
            key: key.to_string(),
            value: value.to_vec(),
        };
        match self.client.set(request).await {
            Ok(response) => {
                let response = response.into_inner();
                Ok(Reply {
                    status: response.status,
                    message: response.message,
                })
            }
            Err(status) => match classify_status(&status) {
                StatusClass::Application(message) => Ok(Reply {
                    status: false,
                    message,
                }),
                StatusClass::Transport(err) => Err(err),
            },
        }
    }

    async fn get(&mut self, key: &str) -> Result<GetReply, TransportError> {
        let request = GetRequest {
            key: key.to_string(),
        };
        match self.client.get(request).await {
            Ok(response) => {
                let response = response.into_inner();
                Ok(GetReply {
                    status: response.status,
                    message: response.message,
                    value: response.value,
                })
            }
            Err(status) => match classify_status(&status) {
                StatusClass::Application(message) => Ok(GetReply {
                    status: false,
                    message,
                    value: Vec::new(),
                }),
                StatusClass::Transport(err) => Err(err),
            },
        }
    }

    async fn get_prefix(&mut self, prefix: &str) -> Result<PrefixReply, TransportError> {
        let request = GetPrefixRequest {
            prefix: prefix.to_string(),
        };
        match self.client.get_prefix(request).await {
            Ok(response) => {
                let response = response.into_inner();
                Ok(PrefixReply {
                    status: response.status,
                    message: response.message,
                    objects: response
                        .objects
                        .into_iter()
                        .map(|kv| (kv.key, kv.value))
                        .collect(),
                })
            }
            Err(status) => match classify_status(&status) {
                StatusClass::Application(message) => Ok(PrefixReply {
                    status: false,
                    message,
                    objects: Vec::new(),
                }),
                StatusClass::Transport(err) => Err(err),
            },
        }
    }

    async fn reset_db(&mut self) -> Result<Reply, TransportError> {
        match self.client.reset_db(ResetDbRequest {}).await {
            Ok(response) => {
                let response = response.into_inner();
                Ok(Reply {
                    status: response.status,
                    message: response.message,
                })
            }
            Err(status) => match classify_status(&status) {
                StatusClass::Application(message) => Ok(Reply {
                    status: false,
                    message,
                }),
                StatusClass::Transport(err) => Err(err),
            },
        }
    }
}

/// Connects a fresh [`GrpcStub`] on every call.
#[derive(Debug, Clone)]
pub struct GrpcConnector {
    endpoint: String,
    connect_timeout: Duration,
    op_timeout: Duration,
}

impl GrpcConnector {
    pub fn new(endpoint: impl Into<String>, connect_timeout: Duration, op_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout,
            op_timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn configure(&self) -> Result<Endpoint> {
        let endpoint = Endpoint::from_shared(self.endpoint.clone()).map_err(|e| {
            StressError::InvalidConfig(format!("invalid endpoint {}: {}", self.endpoint, e))
        })?;
        Ok(endpoint
            .connect_timeout(self.connect_timeout)
            .timeout(self.op_timeout)
            .tcp_nodelay(true))
    }
}

#[async_trait]
impl StubFactory for GrpcConnector {
    type Stub = GrpcStub;

    async fn connect(&self, worker: usize) -> Result<GrpcStub> {
        let channel = self
            .configure()?
            .connect()
            .await
            .map_err(|e| StressError::Connect {
                endpoint: self.endpoint.clone(),
                message: e.to_string(),
            })?;
        debug!(worker, endpoint = %self.endpoint, "Opened connection");
        Ok(GrpcStub::new(KeyValueStoreClient::new(channel)))
    }
}
