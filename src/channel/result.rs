use crate::aft::{EntityKey, OpType};
use crate::election::ElectionId;
use chrono::{DateTime, TimeZone, Utc};
use std::fmt;
use std::time::Duration;

/// How far the device got with one operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProgrammingStatus {
    RibProgrammed,
    FibProgrammed,
    Failed,
}

impl fmt::Display for ProgrammingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgrammingStatus::RibProgrammed => write!(f, "RIB_PROGRAMMED"),
            ProgrammingStatus::FibProgrammed => write!(f, "FIB_PROGRAMMED"),
            ProgrammingStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// What the caller expects the device to do with a mutation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Expectation {
    Success,
    Failure,
}

/// AftOperationResult is one AFT result, correlated back to the operation that caused it.
#[derive(Clone, Debug)]
pub struct AftOperationResult {
    pub operation_id: u64,
    pub network_instance: String,
    pub key: EntityKey,
    pub op: OpType,
    pub status: ProgrammingStatus,
    /// Measured on our side, from sending the request to receiving this result.
    pub latency: Duration,
    pub device_timestamp: Option<DateTime<Utc>>,
    pub error_details: Option<String>,
}

impl AftOperationResult {
    pub(crate) fn device_time(nanos: i64) -> Option<DateTime<Utc>> {
        if nanos == 0 {
            None
        } else {
            Some(Utc.timestamp_nanos(nanos))
        }
    }
}

#[derive(Clone, Debug)]
pub enum OperationResult {
    Operation(AftOperationResult),
    /// The device's current election id, reported in reply to an election update.
    Election(ElectionId),
    SessionParameters { accepted: bool },
}

impl OperationResult {
    pub fn as_operation(&self) -> Option<&AftOperationResult> {
        match self {
            OperationResult::Operation(result) => Some(result),
            _ => None,
        }
    }

    pub fn as_election(&self) -> Option<ElectionId> {
        match self {
            OperationResult::Election(id) => Some(*id),
            _ => None,
        }
    }
}
