//! Wire messages and client for the `kvstore.KeyValueStore` gRPC service.
//!
//! The message layout mirrors the service's protobuf schema. The client is
//! written against `tonic::client::Grpc` directly so the crate builds without
//! `protoc`.

use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;
use tonic::{Response, Status};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetRequest {
    #[prost(string, tag = "1")]
    pub key: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetResponse {
    #[prost(bool, tag = "1")]
    pub status: bool,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetRequest {
    #[prost(string, tag = "1")]
    pub key: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetResponse {
    #[prost(bool, tag = "1")]
    pub status: bool,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "3")]
    pub value: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetPrefixRequest {
    #[prost(string, tag = "1")]
    pub prefix: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyValue {
    #[prost(string, tag = "1")]
    pub key: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetPrefixResponse {
    #[prost(bool, tag = "1")]
    pub status: bool,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "3")]
    pub objects: ::prost::alloc::vec::Vec<KeyValue>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ResetDbRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResetDbResponse {
    #[prost(bool, tag = "1")]
    pub status: bool,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
}

const SET_PATH: &str = "/kvstore.KeyValueStore/Set";
const GET_PATH: &str = "/kvstore.KeyValueStore/Get";
const GET_PREFIX_PATH: &str = "/kvstore.KeyValueStore/GetPrefix";
const RESET_DB_PATH: &str = "/kvstore.KeyValueStore/ResetDb";

/// Unary client for `kvstore.KeyValueStore`.
#[derive(Debug, Clone)]
pub struct KeyValueStoreClient {
    inner: tonic::client::Grpc<Channel>,
}

impl KeyValueStoreClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    pub async fn set(&mut self, request: SetRequest) -> Result<Response<SetResponse>, Status> {
        self.unary(request, SET_PATH).await
    }

    pub async fn get(&mut self, request: GetRequest) -> Result<Response<GetResponse>, Status> {
        self.unary(request, GET_PATH).await
    }

    pub async fn get_prefix(
        &mut self,
        request: GetPrefixRequest,
    ) -> Result<Response<GetPrefixResponse>, Status> {
        self.unary(request, GET_PREFIX_PATH).await
    }

    pub async fn reset_db(
        &mut self,
        request: ResetDbRequest,
    ) -> Result<Response<ResetDbResponse>, Status> {
        self.unary(request, RESET_DB_PATH).await
    }

    async fn unary<Req, Resp>(
        &mut self,
        request: Req,
        path: &'static str,
    ) -> Result<Response<Resp>, Status>
    where
        Req: ::prost::Message + Send + Sync + 'static,
        Resp: ::prost::Message + Default + Send + Sync + 'static,
    {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unavailable(format!("Service was not ready: {}", e)))?;
        let codec = tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static(path);
        self.inner
            .unary(tonic::Request::new(request), path, codec)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn get_prefix_response_decodes_objects() {
        let response = GetPrefixResponse {
            status: true,
            message: "OK".to_string(),
            objects: vec![
                KeyValue {
                    key: "ab01".to_string(),
                    value: vec![1, 2, 3],
                },
                KeyValue {
                    key: "ab02".to_string(),
                    value: Vec::new(),
                },
            ],
        };
        let bytes = response.encode_to_vec();
        let decoded = GetPrefixResponse::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded.objects.len(), 2);
        assert_eq!(decoded.objects[0].value, vec![1, 2, 3]);
    }

    #[test]
    fn reset_request_encodes_empty() {
        assert!(ResetDbRequest {}.encode_to_vec().is_empty());
    }
}
