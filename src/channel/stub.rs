use crate::grpc;
use crate::grpc::gribi_client::GribiClient;
use std::net::Ipv4Addr;
use std::pin::Pin;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tonic::codegen::http::uri;
use tonic::transport::{Channel, Endpoint};
use tonic::Status;

pub type ModifyResponseStream = Pin<Box<dyn Stream<Item = Result<grpc::ModifyResponse, Status>> + Send>>;

/// GribiStub is whatever carries our requests to a device: a tonic connection in production, or
/// an in-process device in tests.
#[async_trait::async_trait]
pub trait GribiStub: Send + Sync {
    /// Opens the bidirectional modify stream. Requests are taken from `requests` until it closes.
    async fn modify(&self, requests: ReceiverStream<grpc::ModifyRequest>) -> Result<ModifyResponseStream, Status>;

    async fn flush(&self, request: grpc::FlushRequest) -> Result<grpc::FlushResponse, Status>;
}

pub struct TonicStub {
    inner: GribiClient<Channel>,
}

impl TonicStub {
    pub async fn new(ip: Ipv4Addr, port: u16) -> Result<Self, ConnectError> {
        let url = format!("http://{}:{}", ip, port);
        let endpoint = Endpoint::from_shared(url)?;

        let connection = endpoint.connect().await?;

        Ok(TonicStub {
            inner: GribiClient::new(connection),
        })
    }
}

#[async_trait::async_trait]
impl GribiStub for TonicStub {
    async fn modify(&self, requests: ReceiverStream<grpc::ModifyRequest>) -> Result<ModifyResponseStream, Status> {
        // Generated client methods take &mut self; clones share the underlying channel.
        let mut client = self.inner.clone();
        let responses = client.modify(requests).await?.into_inner();
        Ok(Box::pin(responses))
    }

    async fn flush(&self, request: grpc::FlushRequest) -> Result<grpc::FlushResponse, Status> {
        let mut client = self.inner.clone();
        Ok(client.flush(request).await?.into_inner())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Invalid device URI")]
    InvalidUri(#[from] uri::InvalidUri),
    #[error("Failed to connect to device")]
    ConnectFailure(#[from] tonic::transport::Error),
}
