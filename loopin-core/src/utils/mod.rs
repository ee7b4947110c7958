pub mod clock;
pub mod event_hash;

pub use clock::{Clock, ManualClock, SystemClock};
pub use event_hash::event_hash;
