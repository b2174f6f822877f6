//! The modify stream: sending operations and correlating their results.
mod channel;
mod params;
mod result;
mod stub;
mod wire;

pub use channel::OperationChannel;
pub use params::Persistence;
pub use params::SessionParams;
pub use result::AftOperationResult;
pub use result::Expectation;
pub use result::OperationResult;
pub use result::ProgrammingStatus;
pub use stub::ConnectError;
pub use stub::GribiStub;
pub use stub::ModifyResponseStream;
pub use stub::TonicStub;

// So the device can decode what it receives.
pub(crate) use wire::from_aft_operation;
pub(crate) use wire::to_aft_operation;
