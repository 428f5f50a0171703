pub mod actor;
pub mod attendee;

pub use actor::Actor;
pub use attendee::{AdminInfo, Attendee, CachedBalances};
