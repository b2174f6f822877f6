//! The client-side model of the device's forwarding tables.
mod cascade;
mod entry;
mod instance;
mod mutation;
mod shadow;

pub use cascade::invalidate;
pub use cascade::CascadeReport;
pub use cascade::Invalidation;
pub use entry::Entity;
pub use entry::EntityKey;
pub use entry::InterfaceRef;
pub use entry::Ipv4Entry;
pub use entry::NextHop;
pub use entry::NextHopAction;
pub use entry::NextHopGroup;
pub use entry::OriginProtocol;
pub use instance::InstanceAliases;
pub use instance::RoutingInstanceAft;
pub use mutation::Mutation;
pub use mutation::OpType;
pub use shadow::AftSnapshot;
pub use shadow::Generation;
pub use shadow::ShadowError;
pub use shadow::ShadowState;
