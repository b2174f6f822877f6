mod aft;
mod channel;
mod client;
mod device;
mod election;
mod server;
#[cfg(test)]
mod test_utils;
mod verify;
mod grpc {
    include!("../generated/gribi.rs");
}

pub use aft::CascadeReport;
pub use aft::Entity;
pub use aft::EntityKey;
pub use aft::Generation;
pub use aft::InterfaceRef;
pub use aft::Ipv4Entry;
pub use aft::Mutation;
pub use aft::NextHop;
pub use aft::NextHopAction;
pub use aft::NextHopGroup;
pub use aft::OpType;
pub use aft::OriginProtocol;
pub use aft::ShadowError;
pub use aft::ShadowState;
pub use channel::AftOperationResult;
pub use channel::ConnectError;
pub use channel::Expectation;
pub use channel::OperationResult;
pub use channel::Persistence;
pub use channel::ProgrammingStatus;
pub use client::random_entries;
pub use client::try_create_client;
pub use client::BatchSummary;
pub use client::Client;
pub use client::ClientConfig;
pub use client::ClientCreationError;
pub use client::ClientError;
pub use client::ClientOptions;
pub use device::ReferenceDevice;
pub use election::ElectionId;
pub use server::shutdown_signal;
pub use server::RpcServer;
pub use server::RpcServerShutdownHandle;
pub use server::RpcServerShutdownSignal;
pub use verify::AftIpv4Entry;
pub use verify::AftNextHop;
pub use verify::AftNextHopGroup;
pub use verify::AftTelemetry;
pub use verify::ConsistencyError;
pub use verify::DeviceAft;
pub use verify::StaticTelemetry;
pub use verify::TelemetryError;

// `crate::{root_mod}` holds no code: only `mod` and `pub use` statements. Every `mod` stays
// private, and types are exported one `pub use` at a time.
