use crate::aft::{EntityKey, Mutation, OpType};
use crate::channel::params::SessionParams;
use crate::channel::result::{AftOperationResult, Expectation, OperationResult, ProgrammingStatus};
use crate::channel::stub::{GribiStub, ModifyResponseStream};
use crate::channel::wire;
use crate::client::{expected_description, ClientError};
use crate::election::ElectionId;
use crate::grpc;
use crate::grpc::aft_result::Status as AftStatus;
use crate::grpc::session_parameters_result::Status as SessionStatus;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

const REQUEST_BUFFER_SIZE: usize = 64;

/// OperationChannel owns one modify stream. Requests go out without blocking; `wait()` then
/// blocks until every outstanding request has been answered, or the deadline passes.
///
/// The response half of the stream is drained by a background task, which stops when the
/// channel is closed or dropped.
pub struct OperationChannel {
    logger: slog::Logger,
    params: SessionParams,
    default_timeout: Duration,
    requests: Option<mpsc::Sender<grpc::ModifyRequest>>,
    responses: mpsc::UnboundedReceiver<Result<grpc::ModifyResponse, tonic::Status>>,
    cancel: CancellationToken,
    election_id: Option<ElectionId>,
    next_operation_id: u64,
    pending: BTreeMap<u64, PendingOperation>,
    awaiting_election: bool,
    awaiting_session: bool,
    results: Vec<OperationResult>,
    batch_start: usize,
}

struct PendingOperation {
    network_instance: String,
    key: EntityKey,
    op: OpType,
    sent_at: Instant,
}

impl OperationChannel {
    /// Opens the modify stream and negotiates session parameters.
    pub async fn start(
        stub: &dyn GribiStub,
        params: SessionParams,
        default_timeout: Duration,
        parent: &CancellationToken,
        logger: slog::Logger,
    ) -> Result<Self, ClientError> {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_BUFFER_SIZE);
        let stream = stub.modify(ReceiverStream::new(request_rx)).await?;

        let cancel = parent.child_token();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_responses(
            stream,
            response_tx,
            cancel.clone(),
            logger.clone(),
        ));

        let mut channel = OperationChannel {
            logger,
            params,
            default_timeout,
            requests: Some(request_tx),
            responses: response_rx,
            cancel,
            election_id: None,
            next_operation_id: 1,
            pending: BTreeMap::new(),
            awaiting_election: false,
            awaiting_session: false,
            results: Vec::new(),
            batch_start: 0,
        };

        channel.begin_batch();
        channel.awaiting_session = true;
        channel
            .send(grpc::ModifyRequest {
                params: Some(params.to_wire()),
                ..Default::default()
            })
            .await?;
        channel.wait(None).await?;

        let accepted = channel
            .batch_results()
            .iter()
            .any(|result| matches!(result, OperationResult::SessionParameters { accepted: true }));
        if !accepted {
            return Err(ClientError::SessionRejected);
        }
        slog::info!(channel.logger, "Modify stream established with {:?}", params);

        Ok(channel)
    }

    pub fn params(&self) -> SessionParams {
        self.params
    }

    /// The election id stamped on outgoing operations.
    pub fn election_id(&self) -> Option<ElectionId> {
        self.election_id
    }

    /// Every result received on this stream so far, in arrival order.
    pub fn results(&self) -> &[OperationResult] {
        &self.results
    }

    /// Results received since the last request was sent.
    pub fn batch_results(&self) -> &[OperationResult] {
        &self.results[self.batch_start..]
    }

    /// The current election id the device reported in reply to the last election update.
    pub fn reported_election_id(&self) -> Option<ElectionId> {
        self.batch_results().iter().rev().find_map(OperationResult::as_election)
    }

    pub(crate) async fn send_election_id(&mut self, id: ElectionId) -> Result<(), ClientError> {
        self.begin_batch();
        self.awaiting_election = true;
        self.election_id = Some(id);
        self.send(grpc::ModifyRequest {
            election_id: Some(id.into()),
            ..Default::default()
        })
        .await
    }

    /// Sends every mutation in one request. Returns the assigned operation ids.
    pub async fn submit(&mut self, mutations: &[Mutation]) -> Result<Vec<u64>, ClientError> {
        self.begin_batch();
        let sent_at = Instant::now();
        let mut ids = Vec::with_capacity(mutations.len());
        let mut operations = Vec::with_capacity(mutations.len());

        for mutation in mutations {
            let id = self.next_operation_id;
            self.next_operation_id += 1;
            operations.push(wire::to_aft_operation(id, mutation, self.election_id));
            self.pending.insert(
                id,
                PendingOperation {
                    network_instance: mutation.network_instance.clone(),
                    key: mutation.key(),
                    op: mutation.op,
                    sent_at,
                },
            );
            ids.push(id);
        }

        slog::debug!(self.logger, "Submitting {} operation(s): {:?}", ids.len(), ids);
        self.send(grpc::ModifyRequest {
            operation: operations,
            ..Default::default()
        })
        .await?;
        Ok(ids)
    }

    /// Blocks until nothing is outstanding. `timeout` overrides the session default.
    pub async fn wait(&mut self, timeout: Option<Duration>) -> Result<(), ClientError> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let deadline = Instant::now() + timeout;

        while self.is_waiting() {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => None,
                next = timeout_at(deadline, self.responses.recv()) => Some(next),
            };

            match next {
                None => return Err(ClientError::Cancelled),
                Some(Err(_elapsed)) => {
                    // Late results for abandoned operations are dropped as unknown.
                    let pending = self.pending_count();
                    self.pending.clear();
                    self.awaiting_session = false;
                    self.awaiting_election = false;
                    return Err(ClientError::Timeout { pending, timeout });
                }
                Some(Ok(None)) => return Err(ClientError::StreamClosed),
                Some(Ok(Some(response))) => self.handle_response(response?),
            }
        }

        Ok(())
    }

    /// Checks the results of the last batch for `key` against `expectation`.
    pub fn expect_outcome(
        &self,
        network_instance: &str,
        key: &EntityKey,
        op: OpType,
        expectation: Expectation,
    ) -> Result<(), ClientError> {
        let statuses: Vec<ProgrammingStatus> = self
            .batch_results()
            .iter()
            .filter_map(OperationResult::as_operation)
            .filter(|result| result.network_instance == network_instance && &result.key == key && result.op == op)
            .map(|result| result.status)
            .collect();

        let has = |status| statuses.contains(&status);
        let matches = match expectation {
            Expectation::Success => {
                has(ProgrammingStatus::RibProgrammed)
                    && (!self.params.fib_ack || has(ProgrammingStatus::FibProgrammed))
                    && !has(ProgrammingStatus::Failed)
            }
            Expectation::Failure => {
                has(ProgrammingStatus::Failed)
                    && !has(ProgrammingStatus::RibProgrammed)
                    && !has(ProgrammingStatus::FibProgrammed)
            }
        };

        if matches {
            Ok(())
        } else {
            Err(ClientError::ResultMismatch {
                instance: network_instance.to_string(),
                key: key.to_string(),
                op,
                expected: expected_description(expectation, self.params.fib_ack),
                observed: statuses.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
            })
        }
    }

    /// Closes the request stream and stops the response task. Idempotent.
    pub fn close(&mut self) {
        if self.requests.take().is_some() {
            slog::debug!(self.logger, "Closing modify stream");
        }
        self.cancel.cancel();
    }

    fn begin_batch(&mut self) {
        self.batch_start = self.results.len();
    }

    fn is_waiting(&self) -> bool {
        self.awaiting_session || self.awaiting_election || !self.pending.is_empty()
    }

    fn pending_count(&self) -> usize {
        self.pending.len() + self.awaiting_session as usize + self.awaiting_election as usize
    }

    async fn send(&mut self, request: grpc::ModifyRequest) -> Result<(), ClientError> {
        let requests = self.requests.as_ref().ok_or(ClientError::StreamClosed)?;
        requests.send(request).await.map_err(|_| ClientError::StreamClosed)
    }

    fn handle_response(&mut self, response: grpc::ModifyResponse) {
        let received_at = Instant::now();

        if let Some(result) = response.session_params_result {
            let accepted = SessionStatus::from_i32(result.status) == Some(SessionStatus::Ok);
            self.results.push(OperationResult::SessionParameters { accepted });
            self.awaiting_session = false;
        }

        if let Some(id) = response.election_id {
            let id = ElectionId::from(id);
            slog::debug!(self.logger, "Device reports current election id {}", id);
            self.results.push(OperationResult::Election(id));
            self.awaiting_election = false;
        }

        for result in response.result {
            self.handle_aft_result(result, received_at);
        }
    }

    fn handle_aft_result(&mut self, result: grpc::AftResult, received_at: Instant) {
        let status = match AftStatus::from_i32(result.status) {
            Some(AftStatus::RibProgrammed) => ProgrammingStatus::RibProgrammed,
            Some(AftStatus::FibProgrammed) => ProgrammingStatus::FibProgrammed,
            Some(AftStatus::Failed) => ProgrammingStatus::Failed,
            other => {
                slog::debug!(self.logger, "Ignoring result {} with status {:?}", result.id, other);
                return;
            }
        };

        let pending = match self.pending.get(&result.id) {
            Some(pending) => pending,
            None => {
                slog::warn!(self.logger, "Result for unknown operation {}", result.id);
                return;
            }
        };

        self.results.push(OperationResult::Operation(AftOperationResult {
            operation_id: result.id,
            network_instance: pending.network_instance.clone(),
            key: pending.key.clone(),
            op: pending.op,
            status,
            latency: received_at.saturating_duration_since(pending.sent_at),
            device_timestamp: AftOperationResult::device_time(result.timestamp),
            error_details: if result.error_details.is_empty() {
                None
            } else {
                Some(result.error_details)
            },
        }));

        let complete = match status {
            ProgrammingStatus::Failed | ProgrammingStatus::FibProgrammed => true,
            ProgrammingStatus::RibProgrammed => !self.params.fib_ack,
        };
        if complete {
            self.pending.remove(&result.id);
        }
    }
}

impl Drop for OperationChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn forward_responses(
    mut stream: ModifyResponseStream,
    sender: mpsc::UnboundedSender<Result<grpc::ModifyResponse, tonic::Status>>,
    cancel: CancellationToken,
    logger: slog::Logger,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(response) => {
                if sender.send(response).is_err() {
                    break;
                }
            }
            None => {
                slog::debug!(logger, "Modify stream ended by the device");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aft::{Ipv4Entry, NextHop};
    use crate::channel::stub::ModifyResponseStream;
    use crate::channel::Persistence;
    use crate::device::ReferenceDevice;
    use crate::test_utils::test_logger;

    fn params(fib_ack: bool) -> SessionParams {
        SessionParams {
            persistence: Persistence::Preserve,
            fib_ack,
        }
    }

    async fn started(device: &ReferenceDevice, fib_ack: bool) -> OperationChannel {
        let mut channel = OperationChannel::start(
            device,
            params(fib_ack),
            Duration::from_secs(5),
            &CancellationToken::new(),
            test_logger(),
        )
        .await
        .unwrap();
        channel.send_election_id(ElectionId::new(1, 0)).await.unwrap();
        channel.wait(None).await.unwrap();
        channel
    }

    #[tokio::test]
    async fn operation_completes_on_rib_ack() {
        // -- setup --
        let device = ReferenceDevice::spawn(test_logger());
        let mut channel = started(&device, false).await;
        let mutation = Mutation::add("default", NextHop::decap(10));

        // -- execute --
        channel.submit(&[mutation.clone()]).await.unwrap();
        channel.wait(None).await.unwrap();

        // -- verify --
        assert_eq!(channel.batch_results().len(), 1);
        channel
            .expect_outcome("default", &mutation.key(), OpType::Add, Expectation::Success)
            .unwrap();
        assert!(channel
            .expect_outcome("default", &mutation.key(), OpType::Add, Expectation::Failure)
            .is_err());
    }

    #[tokio::test]
    async fn fib_ack_waits_for_both_results() {
        // -- setup --
        let device = ReferenceDevice::spawn(test_logger());
        let mut channel = started(&device, true).await;
        let mutation = Mutation::add("default", NextHop::decap(10));

        // -- execute --
        channel.submit(&[mutation.clone()]).await.unwrap();
        channel.wait(None).await.unwrap();

        // -- verify --
        let statuses: Vec<_> = channel
            .batch_results()
            .iter()
            .filter_map(OperationResult::as_operation)
            .map(|result| result.status)
            .collect();
        assert_eq!(
            statuses,
            vec![ProgrammingStatus::RibProgrammed, ProgrammingStatus::FibProgrammed]
        );
        channel
            .expect_outcome("default", &mutation.key(), OpType::Add, Expectation::Success)
            .unwrap();
    }

    #[tokio::test]
    async fn dangling_route_is_reported_failed() {
        // -- setup --
        let device = ReferenceDevice::spawn(test_logger());
        let mut channel = started(&device, false).await;
        let mutation = Mutation::add("default", Ipv4Entry::new("198.51.100.1/32", 404));

        // -- execute --
        channel.submit(&[mutation.clone()]).await.unwrap();
        channel.wait(None).await.unwrap();

        // -- verify --
        channel
            .expect_outcome("default", &mutation.key(), OpType::Add, Expectation::Failure)
            .unwrap();
        let result = channel.batch_results()[0].as_operation().unwrap();
        assert!(result.error_details.is_some());
    }

    struct SilentStub;

    #[async_trait::async_trait]
    impl GribiStub for SilentStub {
        async fn modify(
            &self,
            requests: ReceiverStream<grpc::ModifyRequest>,
        ) -> Result<ModifyResponseStream, tonic::Status> {
            // Answers session parameters, then never says anything again.
            let accepted = grpc::ModifyResponse {
                session_params_result: Some(grpc::SessionParametersResult {
                    status: SessionStatus::Ok as i32,
                }),
                ..Default::default()
            };
            let responses = tokio_stream::once(Ok(accepted)).chain(tokio_stream::pending());
            // Hold the request half open for as long as the response stream lives.
            let responses = responses.map(move |response| {
                let _ = &requests;
                response
            });
            Ok(Box::pin(responses))
        }

        async fn flush(&self, _request: grpc::FlushRequest) -> Result<grpc::FlushResponse, tonic::Status> {
            Err(tonic::Status::unimplemented("flush"))
        }
    }

    #[tokio::test]
    async fn wait_times_out_naming_pending_count() {
        // -- setup --
        let mut channel = OperationChannel::start(
            &SilentStub,
            params(false),
            Duration::from_secs(5),
            &CancellationToken::new(),
            test_logger(),
        )
        .await
        .unwrap();
        channel
            .submit(&[
                Mutation::add("default", NextHop::decap(1)),
                Mutation::add("default", NextHop::decap(2)),
            ])
            .await
            .unwrap();

        // -- execute --
        let err = channel.wait(Some(Duration::from_millis(50))).await.unwrap_err();

        // -- verify --
        match err {
            ClientError::Timeout { pending, .. } => assert_eq!(pending, 2),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn timed_out_operations_are_abandoned() {
        // -- setup --
        let mut channel = OperationChannel::start(
            &SilentStub,
            params(false),
            Duration::from_secs(5),
            &CancellationToken::new(),
            test_logger(),
        )
        .await
        .unwrap();
        channel.submit(&[Mutation::add("default", NextHop::decap(1))]).await.unwrap();
        assert!(channel.wait(Some(Duration::from_millis(50))).await.is_err());

        // -- execute --
        let started = Instant::now();
        channel.wait(Some(Duration::from_secs(5))).await.unwrap();

        // -- verify --
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(channel.batch_results().is_empty());
    }

    #[tokio::test]
    async fn cancelling_parent_scope_interrupts_wait() {
        // -- setup --
        let parent = CancellationToken::new();
        let mut channel = OperationChannel::start(
            &SilentStub,
            params(false),
            Duration::from_secs(30),
            &parent,
            test_logger(),
        )
        .await
        .unwrap();
        channel.submit(&[Mutation::add("default", NextHop::decap(1))]).await.unwrap();

        // -- execute --
        parent.cancel();
        let err = channel.wait(None).await.unwrap_err();

        // -- verify --
        assert!(matches!(err, ClientError::Cancelled));
    }
}
