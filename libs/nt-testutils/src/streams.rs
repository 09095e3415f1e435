use std::time::Duration;

use anyhow::anyhow;
use futures::StreamExt;

use node_test::OutputStream;
use node_test::utils::with_timeout as deadline;

/// Wrapper to run a future with a timeout and provide a meaningful error message
pub async fn with_timeout<F, T>(fut: F, dur_sec: u64, name: &str) -> anyhow::Result<T>
where
    F: std::future::Future<Output = T>,
{
    deadline(Some(Duration::from_secs(dur_sec)), fut)
        .await
        .map_err(|_| anyhow!("{} timed out after {} seconds", name, dur_sec))
}

/// Wrapper to run a future that returns a result with a timeout and provide a meaningful error message
pub async fn with_timeout_res<F, T, E>(fut: F, dur_sec: u64, name: &str) -> anyhow::Result<T>
where
    F: std::future::Future<Output = Result<T, E>>,
    E: Into<anyhow::Error>,
{
    match with_timeout(fut, dur_sec, name).await? {
        Ok(inner) => Ok(inner),
        Err(e) => Err(anyhow!("{} failed: {}", name, e.into())),
    }
}

/// Collect the first `n` items of a stream, failing if they do not all
/// arrive within `dur_sec` seconds.
pub async fn take_n<T: 'static>(
    stream: OutputStream<T>,
    n: usize,
    dur_sec: u64,
) -> anyhow::Result<Vec<T>> {
    let items: Vec<T> = with_timeout(stream.take(n).collect(), dur_sec, "take_n").await?;
    if items.len() < n {
        return Err(anyhow!("Stream ended after {} of {} items", items.len(), n));
    }
    Ok(items)
}
