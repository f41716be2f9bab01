pub mod async_helpers;
pub mod performance;

pub use async_helpers::{batch_process, with_timeout};
pub use performance::Timer;
