//! Persistent worker pool for data-parallel kernels.
//!
//! The engine's only concurrency primitive: a fixed set of long-lived worker
//! threads reused across calls (thread creation is far more expensive than
//! handing work to an existing pool). Growing the pool is supported,
//! shrinking is not.

use log::debug;

use crate::{Error, Result};

#[derive(Debug)]
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    threads: usize,
}

impl WorkerPool {
    /// Build a pool with `threads` workers (clamped to at least one).
    pub fn new(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to start worker pool: {e}")))?;
        Ok(Self { pool, threads })
    }

    #[inline]
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Ensure the pool has at least `threads` workers.
    ///
    /// Requests for fewer threads than currently exist are ignored.
    pub fn grow(&mut self, threads: usize) -> Result<()> {
        if threads <= self.threads {
            return Ok(());
        }
        debug!("growing worker pool from {} to {threads} threads", self.threads);
        *self = Self::new(threads)?;
        Ok(())
    }

    /// Run `op` inside the pool so that rayon parallel iterators in its body
    /// execute on these workers and block until completion.
    #[inline]
    pub(crate) fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        self.pool.install(op)
    }
}
