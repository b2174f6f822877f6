use crate::channel::TonicStub;
use crate::client::client::Client;
use crate::client::error::ClientCreationError;
use crate::client::options::ClientOptions;
use crate::verify::AftTelemetry;
use std::net::Ipv4Addr;
use std::sync::Arc;

pub struct ClientConfig {
    pub device_ip: Ipv4Addr,
    pub device_port: u16,
    pub info_logger: slog::Logger,
    // Without one, the check_* operations return `ClientError::NoTelemetry`.
    pub telemetry: Option<Arc<dyn AftTelemetry>>,
    pub options: ClientOptions,
}

/// Connects to the device over gRPC and starts a session. The returned client is not yet the
/// leader; call `become_leader()` before programming anything.
pub async fn try_create_client(config: ClientConfig) -> Result<Client, ClientCreationError> {
    let root_logger = config.info_logger;
    let logger = root_logger.new(slog::o!(
        "Device" => format!("{}:{}", config.device_ip, config.device_port),
    ));

    let stub = TonicStub::new(config.device_ip, config.device_port).await?;
    slog::info!(logger, "Connected");

    Client::start(Arc::new(stub), config.telemetry, config.options, logger).await
}
