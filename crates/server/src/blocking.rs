//! Bounded pool for blocking upload work.
//!
//! Staging writes and digest computation are CPU and disk bound. They run on
//! tokio's blocking threads, but at most `size` at a time so a burst of
//! uploads cannot take over the whole blocking pool.

use std::io;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Clone)]
pub struct BlockingPool {
    permits: Arc<Semaphore>,
}

impl BlockingPool {
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
        }
    }

    /// Run `f` on a blocking thread once a slot is free.
    pub async fn run<F, T>(&self, f: F) -> io::Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| io::Error::other("blocking pool closed"))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await
        .map_err(|e| io::Error::other(format!("blocking task failed: {e}")))
    }

    /// Slots not currently in use.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
