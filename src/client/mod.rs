//! The test client: one session, one shadow AFT, one blocking step at a time.
mod batch;
mod client;
mod error;
mod options;
mod wiring;

pub use batch::random_entries;
pub use batch::BatchSummary;
pub use client::Client;
pub use error::ClientCreationError;
pub use error::ClientError;
pub use options::ClientOptions;
pub use wiring::try_create_client;
pub use wiring::ClientConfig;

pub(crate) use error::expected_description;
