//! Stream utilities for event consumers.

mod throttle;

pub use throttle::{Throttle, ThrottleExt};
