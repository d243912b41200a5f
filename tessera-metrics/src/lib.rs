#![deny(missing_docs)]
//! Performance counters for the Tessera storage engine.
//!
//! Storage paths record byte counts and call counts against named counters,
//! so operators can see how much of a fragment's metadata a workload actually
//! touches.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use witchcraft_metrics::MetricRegistry;

// re-export exposed metric types
pub use witchcraft_metrics::{Counter, Metric, MetricId};

/// A registry for storage-engine counters.
#[derive(Default, Clone)]
pub struct TesseraMetrics {
    registry: Arc<MetricRegistry>,
}

impl Debug for TesseraMetrics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TesseraMetrics").finish_non_exhaustive()
    }
}

impl TesseraMetrics {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counter with the specified ID, creating a default instance
    /// if absent.
    ///
    /// # Panics
    ///
    /// Panics if a metric is registered with the ID that is not a counter.
    pub fn counter<T>(&self, id: T) -> Arc<Counter>
    where
        T: Into<MetricId>,
    {
        self.registry.counter(id)
    }

    /// Add `n` to the counter with the specified ID. Convenience for
    /// single-shot accounting on storage paths.
    pub fn add_counter<T>(&self, id: T, n: i64)
    where
        T: Into<MetricId>,
    {
        self.registry.counter(id).add(n);
    }

    /// Visit every registered counter.
    pub fn for_each_counter(&self, mut f: impl FnMut(&MetricId, i64)) {
        let metrics = self.registry.metrics();
        for (id, metric) in metrics.iter() {
            if let Metric::Counter(c) = metric {
                f(id, c.count());
            }
        }
    }
}
