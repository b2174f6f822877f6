mod election_id;
mod session;

pub use election_id::ElectionId;
pub use session::ElectionSession;
