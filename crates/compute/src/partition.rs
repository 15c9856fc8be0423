use std::ops::Range;

/// A contiguous, half-open range of node ids that is processed by a single task.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Partition {
    start_node: u64,
    node_count: u64,
}

impl Partition {
    pub fn new(start_node: u64, node_count: u64) -> Self {
        Self {
            start_node,
            node_count,
        }
    }

    pub fn start_node(&self) -> u64 {
        self.start_node
    }

    pub fn node_count(&self) -> u64 {
        self.node_count
    }

    /// Returns the first node id after this partition.
    pub fn end_node(&self) -> u64 {
        self.start_node + self.node_count
    }

    pub fn nodes(&self) -> Range<u64> {
        self.start_node..self.end_node()
    }
}

impl From<Range<u64>> for Partition {
    fn from(range: Range<u64>) -> Self {
        Partition::new(range.start, range.end - range.start)
    }
}

/// Splits `0..node_count` into partitions of `batch_size` nodes.
///
/// The last partition holds the remainder and may be smaller.
///
/// # Panics
///
/// Panics if `batch_size` is `0`.
///
/// # Examples
///
/// ```
/// use graph_compute::prelude::*;
///
/// let partitions = range_partition(10, 4);
///
/// assert_eq!(partitions.len(), 3);
/// assert_eq!(partitions[0].nodes(), 0..4);
/// assert_eq!(partitions[1].nodes(), 4..8);
/// assert_eq!(partitions[2].nodes(), 8..10);
/// ```
pub fn range_partition(node_count: u64, batch_size: u64) -> Vec<Partition> {
    assert!(batch_size > 0, "batch size must be at least 1");

    (0..node_count)
        .step_by(batch_size as usize)
        .map(|start| Partition::new(start, u64::min(batch_size, node_count - start)))
        .collect()
}

/// Returns the number of batches of `batch_size` that are needed to cover
/// `element_count` elements.
///
/// # Panics
///
/// Panics if `batch_size` is `0`.
pub fn thread_count(batch_size: u64, element_count: u64) -> u64 {
    assert!(batch_size > 0, "batch size must be at least 1");

    if batch_size >= element_count {
        return 1;
    }

    (element_count - 1) / batch_size + 1
}

/// Computes a batch size that splits `node_count` nodes into roughly
/// `concurrency` partitions, but never goes below `min_batch_size`.
///
/// # Examples
///
/// ```
/// use graph_compute::prelude::*;
///
/// // Large graphs are split into one batch per thread.
/// assert_eq!(adjusted_batch_size(1_000_000, 4, 10_000), 250_000);
/// // Small graphs fall back to the minimum batch size.
/// assert_eq!(adjusted_batch_size(1_000, 4, 10_000), 10_000);
/// ```
pub fn adjusted_batch_size(node_count: u64, concurrency: u64, min_batch_size: u64) -> u64 {
    let target_batch_size = thread_count(concurrency, node_count);
    u64::max(min_batch_size, target_batch_size)
}

/// Partitions nodes `0..node_count` into at most `max_batches` contiguous
/// partitions such that the degrees of the nodes in each partition sum up
/// to roughly `batch_size`.
///
/// It is greedy in the sense that it goes through the node set only once
/// and closes the current partition as soon as its degree sum reaches
/// `batch_size`. The last partition takes all remaining nodes.
pub fn degree_partition<F>(
    node_count: u64,
    degree: F,
    batch_size: u64,
    max_batches: usize,
) -> Vec<Partition>
where
    F: Fn(u64) -> u64,
{
    if node_count == 0 {
        return Vec::new();
    }

    let max_batches = usize::max(max_batches, 1);
    let mut partitions = Vec::with_capacity(max_batches);

    let mut partition_size = 0;
    let mut partition_start = 0;
    let upper_bound = node_count - 1;

    for node in 0..node_count {
        partition_size += degree(node);

        if (partitions.len() < max_batches - 1 && partition_size >= batch_size)
            || node == upper_bound
        {
            let partition_end = node + 1;
            partitions.push(Partition::from(partition_start..partition_end));
            partition_size = 0;
            partition_start = partition_end;
        }
    }

    partitions
}
