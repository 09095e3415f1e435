use std::rc::Rc;

use async_cell::unsync::AsyncCell;
use futures::future::LocalBoxFuture;

/// Single-threaded cancellation flag used to stop background tasks (such as
/// a spinning middleware node) once nothing depends on them anymore.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Rc<AsyncCell<bool>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Rc::new(AsyncCell::new_with(false)),
        }
    }

    pub async fn is_cancelled(&self) -> bool {
        self.cancelled.get().await
    }

    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    /// A guard that cancels the token when dropped.
    pub fn drop_guard(&self) -> DropGuard {
        DropGuard {
            cancelled: self.cancelled.clone(),
        }
    }

    pub fn cancelled(&self) -> LocalBoxFuture<'static, ()> {
        let cancelled = self.cancelled.clone();
        Box::pin(async move {
            while !cancelled.get().await {
                smol::future::yield_now().await;
            }
        })
    }
}

pub struct DropGuard {
    cancelled: Rc<AsyncCell<bool>>,
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.cancelled.set(true);
    }
}
