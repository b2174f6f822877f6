use crate::aft::{OpType, ShadowError};
use crate::channel::{ConnectError, Expectation};
use crate::election::ElectionId;
use crate::verify::ConsistencyError;
use std::time::Duration;

/// ClientError is every way a scenario step can fail. None of them are retried; the caller is
/// expected to fail the scenario.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Timed out after {timeout:?} with {pending} operation(s) still pending")]
    Timeout { pending: usize, timeout: Duration },
    #[error("{op} of {key} in instance '{instance}': expected {expected}, device reported [{observed}]")]
    ResultMismatch {
        instance: String,
        key: String,
        op: OpType,
        expected: String,
        observed: String,
    },
    #[error("Batch expected {expected} new result(s), got {observed}")]
    Cardinality { expected: usize, observed: usize },
    #[error("Device state does not match the shadow AFT: {0}")]
    Consistency(#[from] ConsistencyError),
    #[error("Rejected before sending: {0}")]
    Invariant(#[from] ShadowError),
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::Status),
    #[error("Modify stream closed by the device")]
    StreamClosed,
    #[error("Cancelled while waiting for results")]
    Cancelled,
    #[error("Claimed election id {claimed} but device reports {reported}; another client is ahead")]
    ElectionMismatch { claimed: ElectionId, reported: ElectionId },
    #[error("Election id {claimed} does not increase on previously claimed {previous}")]
    ElectionNotIncreasing { claimed: ElectionId, previous: ElectionId },
    #[error("Election id space exhausted")]
    ElectionExhausted,
    #[error("Device did not report an election id")]
    NoElectionId,
    #[error("Device rejected session parameters")]
    SessionRejected,
    #[error("Flush was not accepted by the device: {0}")]
    FlushFailed(String),
    #[error("No telemetry source is attached")]
    NoTelemetry,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientCreationError {
    #[error("Illegal options for configuring client: {0}")]
    IllegalClientOptions(String),
    #[error("Failed to connect: {0}")]
    Connect(#[from] ConnectError),
    #[error("Failed to start session: {0}")]
    Start(#[from] ClientError),
}

pub(crate) fn expected_description(expectation: Expectation, fib_ack: bool) -> String {
    match (expectation, fib_ack) {
        (Expectation::Failure, _) => "FAILED".to_string(),
        (Expectation::Success, false) => "RIB_PROGRAMMED".to_string(),
        (Expectation::Success, true) => "RIB_PROGRAMMED and FIB_PROGRAMMED".to_string(),
    }
}
