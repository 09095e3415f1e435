pub mod cancellation_token;
pub use cancellation_token::{CancellationToken, DropGuard};
pub mod timeout;
pub use timeout::{Elapsed, with_timeout};
