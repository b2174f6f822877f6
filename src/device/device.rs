use crate::channel::{GribiStub, ModifyResponseStream};
use crate::device::state::{DeviceState, SessionId};
use crate::grpc;
use crate::verify::{AftIpv4Entry, AftNextHop, AftNextHopGroup, AftTelemetry, DeviceAft, TelemetryError};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::{ReceiverStream, UnboundedReceiverStream};
use tokio_stream::{Stream, StreamExt};
use tonic::Status;

const EVENT_BUFFER_SIZE: usize = 64;

pub(crate) type ResponseSender = mpsc::UnboundedSender<Result<grpc::ModifyResponse, Status>>;

#[derive(Debug)]
enum Event {
    OpenSession(oneshot::Sender<SessionId>),
    Modify {
        session_id: SessionId,
        request: grpc::ModifyRequest,
        responder: ResponseSender,
    },
    CloseSession(SessionId),
    Flush(grpc::FlushRequest, oneshot::Sender<Result<grpc::FlushResponse, Status>>),
    ReadAft(String, oneshot::Sender<DeviceAft>),
}

/// ReferenceDevice is an in-memory gRIBI target. Cloning it gives another handle to the same
/// device; the device stops once every handle and session is gone.
#[derive(Clone)]
pub struct ReferenceDevice {
    logger: slog::Logger,
    sender: mpsc::Sender<Event>,
}

impl ReferenceDevice {
    /// Starts the device event loop on the current tokio runtime.
    pub fn spawn(logger: slog::Logger) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        let actor = DeviceActor {
            receiver: rx,
            state: DeviceState::new(logger.clone()),
        };
        tokio::spawn(actor.run_event_loop());

        ReferenceDevice { logger, sender: tx }
    }

    /// Starts serving one modify stream. Responses end once `requests` ends.
    pub async fn open_session<S>(
        &self,
        requests: S,
    ) -> Result<UnboundedReceiverStream<Result<grpc::ModifyResponse, Status>>, Status>
    where
        S: Stream<Item = Result<grpc::ModifyRequest, Status>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.send(Event::OpenSession(tx)).await?;
        let session_id = rx.await.map_err(|_| device_gone())?;

        let (responder, responses) = mpsc::unbounded_channel();
        let device = self.clone();
        tokio::spawn(async move {
            let mut requests = Box::pin(requests);
            while let Some(request) = requests.next().await {
                let request = match request {
                    Ok(request) => request,
                    Err(status) => {
                        slog::debug!(device.logger, "Session {} request stream failed: {}", session_id, status);
                        break;
                    }
                };
                let event = Event::Modify {
                    session_id,
                    request,
                    responder: responder.clone(),
                };
                if device.send(event).await.is_err() {
                    break;
                }
            }
            let _ = device.send(Event::CloseSession(session_id)).await;
        });

        Ok(UnboundedReceiverStream::new(responses))
    }

    /// A snapshot of one instance's tables. Unknown instances are empty.
    pub async fn aft(&self, instance: &str) -> Result<DeviceAft, TelemetryError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::ReadAft(instance.to_string(), tx))
            .await
            .map_err(|status| TelemetryError::Unavailable(status.message().to_string()))?;
        rx.await
            .map_err(|_| TelemetryError::Unavailable("device is shut down".to_string()))
    }

    async fn send(&self, event: Event) -> Result<(), Status> {
        self.sender.send(event).await.map_err(|_| device_gone())
    }
}

fn device_gone() -> Status {
    Status::unavailable("device is shut down")
}

#[async_trait::async_trait]
impl GribiStub for ReferenceDevice {
    async fn modify(&self, requests: ReceiverStream<grpc::ModifyRequest>) -> Result<ModifyResponseStream, Status> {
        let responses = self.open_session(requests.map(Ok)).await?;
        Ok(Box::pin(responses))
    }

    async fn flush(&self, request: grpc::FlushRequest) -> Result<grpc::FlushResponse, Status> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Flush(request, tx)).await?;
        rx.await.map_err(|_| device_gone())?
    }
}

#[async_trait::async_trait]
impl AftTelemetry for ReferenceDevice {
    async fn next_hops(&self, instance: &str) -> Result<Vec<AftNextHop>, TelemetryError> {
        Ok(self.aft(instance).await?.next_hops.into_iter().map(|(_, nh)| nh).collect())
    }

    async fn next_hop_groups(&self, instance: &str) -> Result<Vec<AftNextHopGroup>, TelemetryError> {
        Ok(self
            .aft(instance)
            .await?
            .next_hop_groups
            .into_iter()
            .map(|(_, nhg)| nhg)
            .collect())
    }

    async fn ipv4_entry(&self, instance: &str, prefix: &str) -> Result<Option<AftIpv4Entry>, TelemetryError> {
        Ok(self.aft(instance).await?.ipv4_entries.remove(prefix))
    }
}

struct DeviceActor {
    receiver: mpsc::Receiver<Event>,
    state: DeviceState,
}

impl DeviceActor {
    async fn run_event_loop(mut self) {
        while let Some(event) = self.receiver.recv().await {
            self.handle_event(event);
        }
    }

    // Not async: the whole device state changes one event at a time.
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::OpenSession(callback) => {
                let session_id = self.state.open_session();
                let _ = callback.send(session_id);
            }
            Event::Modify {
                session_id,
                request,
                responder,
            } => {
                for response in self.state.modify(session_id, request) {
                    // The client may already be gone; its session closes shortly after.
                    let _ = responder.send(Ok(response));
                }
            }
            Event::CloseSession(session_id) => {
                self.state.close_session(session_id);
            }
            Event::Flush(request, callback) => {
                let _ = callback.send(self.state.flush(&request));
            }
            Event::ReadAft(instance, callback) => {
                let aft = self.state.instance(&instance).cloned().unwrap_or_default();
                let _ = callback.send(aft);
            }
        }
    }
}
