use std::rc::Rc;

use async_stream::stream;
use futures::StreamExt;
use tracing::debug;

use crate::{OutputStream, utils::DropGuard};

/* Wrap a stream in a drop guard to ensure that the associated cancellation
 * token is not dropped before the stream has completed or been dropped.
 * This is used for automatic cleanup of background tasks (such as a node
 * spinning for a subscription) when all consumers of a stream have gone away. */
pub fn drop_guard_stream<T: 'static>(
    stream: OutputStream<T>,
    drop_guard: Rc<DropGuard>,
) -> OutputStream<T> {
    Box::pin(stream! {
        // Keep the shared reference to drop_guard alive until the stream
        // is done
        let _drop_guard = drop_guard;
        let mut stream = stream;
        while let Some(val) = stream.next().await {
            yield val;
        }
        debug!("drop_guard_stream: stream ended, releasing drop guard");
    })
}
