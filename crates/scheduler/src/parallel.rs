use serde::{Deserialize, Serialize};

/// How a parallel-for splits its index range into task invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelForParams {
    /// Minimum number of items per invocation.
    pub bin_size: usize,
    /// Invocations per short-task worker.
    pub max_tasks_per_thread: usize,
}

impl Default for ParallelForParams {
    fn default() -> Self {
        Self {
            bin_size: 1,
            max_tasks_per_thread: 2,
        }
    }
}

impl ParallelForParams {
    /// Number of invocations to split `items` into. 0 means "run serially
    /// on the caller", which is also returned when splitting would yield a
    /// single invocation.
    pub fn determine_multiplicity(&self, items: usize, workers: usize) -> u32 {
        let bins = items / self.bin_size.max(1);
        let cap = workers.saturating_mul(self.max_tasks_per_thread);
        let multiplicity = bins.min(cap);
        if multiplicity <= 1 {
            0
        } else {
            u32::try_from(multiplicity).unwrap_or(u32::MAX)
        }
    }

    /// Items handled by each invocation, rounded up.
    pub fn items_per_invocation(&self, items: usize, multiplicity: u32) -> usize {
        let multiplicity = multiplicity.max(1) as usize;
        items.div_ceil(multiplicity)
    }
}
