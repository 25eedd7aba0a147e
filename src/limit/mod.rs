//! Rate limiting primitives: token buckets, queue selection, delay stats.

mod bucket;
mod selector;
mod stats;

pub use bucket::{Reservation, TokenBucket};
pub use selector::select;
pub use stats::DelayStats;
