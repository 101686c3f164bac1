#![forbid(unsafe_code)]

pub mod error;
pub mod model;
pub mod progress;
pub mod retry;
pub mod rounding;
pub mod time;
pub mod timer;

pub use error::Error;
pub use retry::BackoffPolicy;
pub use time::Clock;
