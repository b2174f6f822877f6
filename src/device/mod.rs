//! An in-memory gRIBI target, so the client can be exercised without hardware.
mod device;
mod state;

pub use device::ReferenceDevice;
