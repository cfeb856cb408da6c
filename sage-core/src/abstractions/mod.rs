//! Trait-based abstractions over ambient resources
//!
//! Services take these as injected dependencies so that time-dependent
//! behaviour (rate-limit windows, retry delays, measurements) can be driven
//! deterministically in tests.

pub mod time;

pub use time::{Clock, Instant, MockClock, SystemClock};
