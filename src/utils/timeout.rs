use std::future::Future;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("deadline of {0:?} elapsed")]
pub struct Elapsed(pub Duration);

/// Race `fut` against a timer. `None` waits for `fut` without a bound.
pub async fn with_timeout<F: Future>(
    timeout: Option<Duration>,
    fut: F,
) -> Result<F::Output, Elapsed> {
    let Some(dur) = timeout else {
        return Ok(fut.await);
    };
    smol::future::or(async { Ok(fut.await) }, async {
        smol::Timer::after(dur).await;
        Err(Elapsed(dur))
    })
    .await
}
