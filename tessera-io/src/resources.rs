//! Shared context resources: the blob store, the compute pool, metrics, and
//! configuration. One `ContextResources` is shared by every array and query
//! in a process.

use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tessera_error::{tessera_bail, tessera_err, TesseraResult};
use tessera_metrics::TesseraMetrics;

use crate::{Config, Vfs, COMPUTE_CONCURRENCY_KEY};

/// Process-wide resources shared across queries.
pub struct ContextResources {
    vfs: Arc<dyn Vfs>,
    compute_pool: rayon::ThreadPool,
    metrics: TesseraMetrics,
    config: Config,
    cancelled: AtomicBool,
}

impl Debug for ContextResources {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextResources")
            .field("vfs", &self.vfs)
            .field("threads", &self.compute_pool.current_num_threads())
            .finish_non_exhaustive()
    }
}

impl ContextResources {
    /// Build resources over `vfs` with `config`.
    pub fn new(vfs: Arc<dyn Vfs>, config: Config) -> TesseraResult<Self> {
        let threads = config.get_usize(COMPUTE_CONCURRENCY_KEY)?;
        let compute_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("tessera-compute-{i}"))
            .build()
            .map_err(|e| tessera_err!(InvalidArgument: "cannot build compute pool: {}", e))?;
        Ok(Self {
            vfs,
            compute_pool,
            metrics: TesseraMetrics::new(),
            config,
            cancelled: AtomicBool::new(false),
        })
    }

    /// The blob store.
    pub fn vfs(&self) -> &dyn Vfs {
        self.vfs.as_ref()
    }

    /// The shared compute pool.
    pub fn compute_pool(&self) -> &rayon::ThreadPool {
        &self.compute_pool
    }

    /// The metrics registry.
    pub fn metrics(&self) -> &TesseraMetrics {
        &self.metrics
    }

    /// The engine configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Request cancellation of in-flight I/O. Takes effect at the next
    /// blob-store boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Clear a previous cancellation request.
    pub fn reset_cancellation(&self) {
        self.cancelled.store(false, Ordering::Release);
    }

    /// Fail with `Cancelled` if cancellation was requested.
    pub fn check_cancelled(&self) -> TesseraResult<()> {
        if self.cancelled.load(Ordering::Acquire) {
            tessera_bail!(Cancelled: "operation cancelled");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryVfs;
    use tessera_error::TesseraError;

    fn resources() -> ContextResources {
        ContextResources::new(Arc::new(MemoryVfs::new()), Config::new()).unwrap()
    }

    #[test]
    fn pool_runs_work() {
        let resources = resources();
        let total: u64 = resources
            .compute_pool()
            .install(|| (0..100u64).map(|i| i * 2).sum());
        assert_eq!(total, 9900);
    }

    #[test]
    fn cancellation_round_trip() {
        let resources = resources();
        resources.check_cancelled().unwrap();
        resources.cancel();
        assert!(matches!(
            resources.check_cancelled(),
            Err(TesseraError::Cancelled(_))
        ));
        resources.reset_cancellation();
        resources.check_cancelled().unwrap();
    }
}
