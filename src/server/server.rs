use crate::channel::GribiStub;
use crate::device::ReferenceDevice;
use crate::grpc::gribi_server::{Gribi, GribiServer};
use crate::grpc::{FlushRequest, FlushResponse, ModifyRequest, ModifyResponse};
use crate::server::RpcServerShutdownSignal;
use std::net::SocketAddr;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};

/// RpcServer is the type that exposes a reference device over the gRIBI gRPC interface.
pub struct RpcServer {
    logger: slog::Logger,
    device: ReferenceDevice,
}

impl RpcServer {
    pub fn new(logger: slog::Logger, device: ReferenceDevice) -> Self {
        RpcServer { logger, device }
    }

    pub async fn run(self, socket_addr: SocketAddr, shutdown_signal: RpcServerShutdownSignal) {
        let logger = self.logger.clone();
        slog::info!(logger, "Listening on '{:?}'", socket_addr);

        let result = Server::builder()
            .add_service(GribiServer::new(self))
            .serve_with_shutdown(socket_addr, shutdown_signal)
            .await;

        slog::info!(logger, "Server run() has exited: {:?}", result);
    }
}

#[async_trait::async_trait]
impl Gribi for RpcServer {
    type ModifyStream = UnboundedReceiverStream<Result<ModifyResponse, Status>>;

    async fn modify(
        &self,
        rpc_request_wrapped: Request<Streaming<ModifyRequest>>,
    ) -> Result<Response<Self::ModifyStream>, Status> {
        slog::debug!(self.logger, "ServerWire - Modify stream from {:?}", rpc_request_wrapped.remote_addr());
        let requests = rpc_request_wrapped.into_inner();

        self.device.open_session(requests).await.map(Response::new)
    }

    async fn flush(&self, rpc_request_wrapped: Request<FlushRequest>) -> Result<Response<FlushResponse>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.device.flush(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }
}
