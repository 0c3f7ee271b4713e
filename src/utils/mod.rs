pub mod digest;
pub mod locker;
pub mod retry;

pub use retry::RetryPolicy;
