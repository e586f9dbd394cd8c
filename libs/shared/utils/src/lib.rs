pub mod backoff;
pub mod clock;
pub mod test_utils;

pub use backoff::BackoffTable;
pub use clock::{Clock, ManualClock, SystemClock};
