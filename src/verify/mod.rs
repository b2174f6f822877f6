//! Reading device state back and comparing it with the shadow AFT.
mod checker;
mod telemetry;

pub use checker::ConsistencyChecker;
pub use checker::ConsistencyError;
pub use telemetry::AftIpv4Entry;
pub use telemetry::AftNextHop;
pub use telemetry::AftNextHopGroup;
pub use telemetry::AftTelemetry;
pub use telemetry::DeviceAft;
pub use telemetry::StaticTelemetry;
pub use telemetry::TelemetryError;
