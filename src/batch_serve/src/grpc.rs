//! gRPC front API: the request server, the registry service, and the
//! client side of both.

tonic::include_proto!("api");

use crate::{error::Error, router::Connector, server::RequestServer};
use async_trait::async_trait;
use registry::{Address, Discovery, Token};
use std::{collections::HashMap, convert::TryFrom, time::Duration};
use tokio::sync::Mutex;
use tonic::{transport::Channel, Code, Request, Response, Status};

const STATUS_OK: u32 = 0;
const STATUS_ERROR: u32 = 1;

/// Encode the outcome of one call.
pub fn encode_response(result: Result<engine::Output, Error>) -> InferResponse {
    match result {
        Ok(output) => InferResponse {
            status_code: STATUS_OK,
            predictions: output
                .into_iter()
                .map(|p| Prediction {
                    label: p.label,
                    score: p.score,
                })
                .collect(),
            error_kind: String::new(),
            message: String::new(),
        },
        Err(e) => InferResponse {
            status_code: STATUS_ERROR,
            predictions: vec![],
            error_kind: e.kind().as_str().to_string(),
            message: e.detail(),
        },
    }
}

/// Decode a response received from the server at `address`.
pub fn decode_response(address: &Address, response: InferResponse) -> Result<engine::Output, Error> {
    if response.status_code == STATUS_OK {
        return Ok(response
            .predictions
            .into_iter()
            .map(|p| engine::Prediction::new(p.label, p.score))
            .collect());
    }
    let kind = response.error_kind.parse()?;
    Err(Error::from_remote(address, kind, response.message))
}

impl TryFrom<ServerAddress> for Address {
    type Error = Status;

    fn try_from(address: ServerAddress) -> Result<Self, Self::Error> {
        let port = u16::try_from(address.port)
            .map_err(|_| Status::invalid_argument(format!("port {} out of range", address.port)))?;
        if address.host.is_empty() {
            return Err(Status::invalid_argument("empty host"));
        }
        Ok(Address::new(address.host, port))
    }
}

impl From<Address> for ServerAddress {
    fn from(address: Address) -> Self {
        ServerAddress {
            host: address.host,
            port: address.port as u32,
        }
    }
}

/// Request server gRPC service
pub struct InferService {
    server: RequestServer,
}

impl InferService {
    /// Create an InferService
    pub fn new(server: RequestServer) -> Self {
        InferService { server }
    }
}

#[tonic::async_trait]
impl infer_server::Infer for InferService {
    async fn infer(
        &self,
        request: Request<InferRequest>,
    ) -> Result<Response<InferResponse>, Status> {
        let compressed_input = request.into_inner().compressed_input;
        let result = match lz4_flex::decompress_size_prepended(&compressed_input) {
            Ok(input) => self.server.infer(input).await,
            Err(e) => Err(Error::InvalidRequest(format!(
                "malformed compressed payload: {:?}",
                e
            ))),
        };
        Ok(Response::new(encode_response(result)))
    }
}

/// Registry gRPC service
pub struct RegistryService {
    registry: registry::Registry,
}

impl RegistryService {
    /// Create a RegistryService
    pub fn new(registry: registry::Registry) -> Self {
        RegistryService { registry }
    }
}

#[tonic::async_trait]
impl registry_server::Registry for RegistryService {
    async fn register(
        &self,
        request: Request<ServerAddress>,
    ) -> Result<Response<RegistrationToken>, Status> {
        let address = Address::try_from(request.into_inner())?;
        let token = self.registry.register(address);
        Ok(Response::new(RegistrationToken { id: token.0 }))
    }

    async fn deregister(
        &self,
        request: Request<RegistrationToken>,
    ) -> Result<Response<Empty>, Status> {
        let token = Token(request.into_inner().id);
        self.registry
            .deregister(token)
            .map_err(|e| Status::not_found(e.to_string()))?;
        Ok(Response::new(Empty {}))
    }

    async fn resolve_one(&self, _request: Request<Empty>) -> Result<Response<ServerAddress>, Status> {
        match self.registry.resolve_one() {
            Ok(address) => Ok(Response::new(address.into())),
            Err(e) => Err(Status::failed_precondition(e.to_string())),
        }
    }

    async fn list(&self, _request: Request<Empty>) -> Result<Response<ServerList>, Status> {
        let servers = self
            .registry
            .list()
            .into_iter()
            .map(ServerAddress::from)
            .collect();
        Ok(Response::new(ServerList { servers }))
    }
}

/// Discovery through a registry reached over gRPC.
pub struct RemoteRegistry {
    url: String,
    timeout: Duration,
    client: Mutex<Option<registry_client::RegistryClient<Channel>>>,
}

impl RemoteRegistry {
    /// Create a RemoteRegistry for the registry at `url`, e.g.
    /// `http://127.0.0.1:7070`. Connects lazily.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        RemoteRegistry {
            url: url.into(),
            timeout,
            client: Mutex::new(None),
        }
    }

    async fn client(&self) -> Result<registry_client::RegistryClient<Channel>, registry::Error> {
        let mut client = self.client.lock().await;
        if let Some(client) = client.as_ref() {
            return Ok(client.clone());
        }
        let connect = registry_client::RegistryClient::connect(self.url.clone());
        let connected = tokio::time::timeout(self.timeout, connect)
            .await
            .map_err(|_| registry::Error::Unavailable(format!("connect to {} timed out", self.url)))?
            .map_err(|e| registry::Error::Unavailable(format!("{}: {}", self.url, e)))?;
        *client = Some(connected.clone());
        Ok(connected)
    }

    /// Map a failed call. Anything but an answer from the registry drops
    /// the connection so the next call reconnects.
    async fn fail(&self, status: Status) -> registry::Error {
        match status.code() {
            Code::FailedPrecondition => registry::Error::NoLiveServers,
            Code::InvalidArgument => registry::Error::InvalidAddress(status.message().to_string()),
            _ => {
                self.client.lock().await.take();
                registry::Error::Unavailable(format!("{}: {}", self.url, status.message()))
            }
        }
    }

    /// Run one call under the deadline, a missed deadline reported as
    /// `DeadlineExceeded`.
    async fn call<T, F>(&self, call: F) -> Result<T, Status>
    where
        F: std::future::Future<Output = Result<Response<T>, Status>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map(Response::into_inner),
            Err(_) => Err(Status::deadline_exceeded(format!(
                "no answer within {:?}",
                self.timeout
            ))),
        }
    }
}

fn to_address(address: ServerAddress) -> Result<Address, registry::Error> {
    Address::try_from(address).map_err(|s| registry::Error::InvalidAddress(s.message().to_string()))
}

#[async_trait]
impl Discovery for RemoteRegistry {
    async fn register(&self, address: Address) -> Result<Token, registry::Error> {
        let mut client = self.client().await?;
        let request = Request::new(ServerAddress::from(address));
        match self.call(client.register(request)).await {
            Ok(token) => Ok(Token(token.id)),
            Err(status) => Err(self.fail(status).await),
        }
    }

    async fn deregister(&self, token: Token) -> Result<(), registry::Error> {
        let mut client = self.client().await?;
        let request = Request::new(RegistrationToken { id: token.0 });
        match self.call(client.deregister(request)).await {
            Ok(Empty {}) => Ok(()),
            Err(status) if status.code() == Code::NotFound => {
                Err(registry::Error::UnknownToken(token))
            }
            Err(status) => Err(self.fail(status).await),
        }
    }

    async fn resolve_one(&self) -> Result<Address, registry::Error> {
        let mut client = self.client().await?;
        match self.call(client.resolve_one(Request::new(Empty {}))).await {
            Ok(address) => to_address(address),
            Err(status) => Err(self.fail(status).await),
        }
    }

    async fn list(&self) -> Result<Vec<Address>, registry::Error> {
        let mut client = self.client().await?;
        match self.call(client.list(Request::new(Empty {}))).await {
            Ok(list) => list.servers.into_iter().map(to_address).collect(),
            Err(status) => Err(self.fail(status).await),
        }
    }
}

/// Direct gRPC transport to request servers. Keeps one channel per server.
pub struct GrpcConnector {
    timeout: Duration,
    clients: Mutex<HashMap<Address, infer_client::InferClient<Channel>>>,
}

impl GrpcConnector {
    /// Create a GrpcConnector, `timeout` bounds both connect and call.
    pub fn new(timeout: Duration) -> Self {
        GrpcConnector {
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client(&self, address: &Address) -> Result<infer_client::InferClient<Channel>, Error> {
        if let Some(client) = self.clients.lock().await.get(address) {
            return Ok(client.clone());
        }
        let connect = infer_client::InferClient::connect(address.to_uri());
        let client = match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(client)) => client,
            Ok(Err(e)) => return Err(Error::Unreachable(address.clone(), e.to_string())),
            Err(_) => {
                return Err(Error::Unreachable(
                    address.clone(),
                    format!("connect timed out after {:?}", self.timeout),
                ))
            }
        };
        self.clients
            .lock()
            .await
            .insert(address.clone(), client.clone());
        Ok(client)
    }

    async fn forget(&self, address: &Address) {
        self.clients.lock().await.remove(address);
    }
}

#[async_trait]
impl Connector for GrpcConnector {
    async fn send(&self, address: &Address, payload: &[u8]) -> Result<engine::Output, Error> {
        let mut client = self.client(address).await?;
        let request = Request::new(InferRequest {
            compressed_input: lz4_flex::compress_prepend_size(payload),
        });
        let reason = match tokio::time::timeout(self.timeout, client.infer(request)).await {
            Ok(Ok(response)) => return decode_response(address, response.into_inner()),
            Ok(Err(status)) => status.message().to_string(),
            Err(_) => format!("no answer within {:?}", self.timeout),
        };
        self.forget(address).await;
        Err(Error::Unreachable(address.clone(), reason))
    }
}
