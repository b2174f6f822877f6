use crate::grpc;
use crate::grpc::session_parameters::{AckType, Persistence as WirePersistence, Redundancy};

/// What the device does with our entries once the session that programmed them goes away.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Persistence {
    /// Entries are removed when the session ends.
    Delete,
    /// Entries outlive the session.
    Preserve,
}

/// SessionParams are negotiated once, as the first message on the modify stream. Redundancy is
/// always single-primary: only the client holding the highest election id may program.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SessionParams {
    pub persistence: Persistence,
    /// When set, each operation completes on FIB_PROGRAMMED rather than RIB_PROGRAMMED.
    pub fib_ack: bool,
}

impl SessionParams {
    pub(crate) fn to_wire(&self) -> grpc::SessionParameters {
        grpc::SessionParameters {
            redundancy: Redundancy::SinglePrimary as i32,
            persistence: match self.persistence {
                Persistence::Delete => WirePersistence::Delete as i32,
                Persistence::Preserve => WirePersistence::Preserve as i32,
            },
            ack_type: if self.fib_ack {
                AckType::RibAndFibAck as i32
            } else {
                AckType::RibAck as i32
            },
        }
    }

    pub(crate) fn from_wire(params: &grpc::SessionParameters) -> Result<Self, &'static str> {
        if Redundancy::from_i32(params.redundancy) != Some(Redundancy::SinglePrimary) {
            return Err("only SINGLE_PRIMARY redundancy is supported");
        }
        let persistence = match WirePersistence::from_i32(params.persistence) {
            Some(WirePersistence::Delete) => Persistence::Delete,
            Some(WirePersistence::Preserve) => Persistence::Preserve,
            None => return Err("unknown persistence mode"),
        };
        let fib_ack = match AckType::from_i32(params.ack_type) {
            Some(AckType::RibAck) => false,
            Some(AckType::RibAndFibAck) => true,
            None => return Err("unknown ack type"),
        };
        Ok(SessionParams { persistence, fib_ack })
    }
}

impl Default for SessionParams {
    fn default() -> Self {
        SessionParams {
            persistence: Persistence::Preserve,
            fib_ack: false,
        }
    }
}
