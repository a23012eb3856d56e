mod error;
mod registry;

pub use error::{MembershipErr, NotEligibleReason};
pub use registry::{MembershipRegistry, Roster};
