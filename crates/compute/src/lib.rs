//! A library of parallel, iterative graph computations that share their state
//! across threads without locks.
//!
//! The crate provides two algorithms, Weakly Connected Components (WCC) and
//! Label Propagation, together with the building blocks they are made of:
//!
//! * [`AtomicLongArray`](crate::atomic_array::AtomicLongArray), a paged array
//!   of 64-bit integers that supports atomic reads, writes and
//!   compare-and-swap on every index.
//! * [`DisjointSetStruct`](crate::dss::DisjointSetStruct), a lock-free
//!   union-find built on top of the atomic array.
//! * A partitioner that splits the node id space into contiguous batches and
//!   a runner that executes one task per batch on a caller-supplied
//!   [rayon](https://github.com/rayon-rs/rayon) thread pool.
//!
//! Graphs are consumed through the [`ComputeGraph`](crate::graph::ComputeGraph)
//! trait, which is implemented for the CSR graphs of the
//! [graph_builder](https://docs.rs/graph_builder) crate.
//!
//! # Weakly Connected Components
//!
//! WCC uses subgraph sampling [1] to identify the largest component early and
//! skips the relationships of its members afterwards.
//!
//! ```
//! use graph_compute::prelude::*;
//!
//! let graph: UndirectedCsrGraph<usize> = GraphBuilder::new()
//!     .edges(vec![(0, 1), (1, 2), (3, 4)])
//!     .build();
//!
//! let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
//!
//! let components = Wcc::new(&graph, WccConfig::default())
//!     .unwrap()
//!     .compute(&pool, &TerminationFlag::running_true())
//!     .into_result()
//!     .unwrap();
//!
//! assert!(components.same_set(0, 2));
//! assert!(components.same_set(3, 4));
//! assert!(!components.same_set(2, 3));
//! ```
//!
//! # Label Propagation
//!
//! ```
//! use graph_compute::prelude::*;
//!
//! let graph: UndirectedCsrGraph<usize> = GraphBuilder::new()
//!     .edges(vec![(0, 1), (1, 2), (2, 0), (3, 4), (4, 5), (5, 3)])
//!     .build();
//!
//! let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
//!
//! let result = LabelPropagation::new(&graph, LabelPropagationConfig::default())
//!     .unwrap()
//!     .compute(&pool, &TerminationFlag::running_true())
//!     .into_result()
//!     .unwrap();
//!
//! assert!(result.did_converge());
//! assert_eq!(result.label(0), result.label(2));
//! assert_eq!(result.label(3), result.label(5));
//! assert_ne!(result.label(0), result.label(3));
//! ```
//!
//! [1] Michael Sutton, Tal Ben-Nun, Amnon Barak:
//!     "Optimizing Parallel Graph Connectivity Computation via Subgraph Sampling",
//!     Symposium on Parallel and Distributed Processing, IPDPS 2018

pub mod atomic_array;
pub mod dss;
pub mod graph;
pub mod label_propagation;
pub mod partition;
pub mod prelude;
mod progress;
pub mod runner;
pub mod wcc;

use thiserror::Error;

/// The smallest number of nodes that is worth handing to a separate task.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Number of tasks that run at the same time unless configured otherwise.
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Error, Debug)]
pub enum Error {
    #[error("max iterations must be at least 1, got {0}")]
    InvalidMaxIterations(usize),
    #[error("concurrency must be at least 1, got {0}")]
    InvalidConcurrency(usize),
    #[error("batch size must be at least 1, got {0}")]
    InvalidBatchSize(usize),
    #[error("sampling size must be at least 1, got {0}")]
    InvalidSamplingSize(usize),
    #[error("threshold must be a finite number, got {0}")]
    InvalidThreshold(f64),
    #[error("seed value of node {node} must not be negative, got {value}")]
    InvalidSeedValue { node: u64, value: i64 },
    #[error("labels of unseeded nodes overflow: the max seed is {max_seed} and there are {node_count} nodes")]
    SeedOverflow { max_seed: i64, node_count: u64 },
    #[error("index out of range: the size is {size} but the index is {index}")]
    IndexOutOfRange { index: u64, size: u64 },
    #[error("computation was terminated before it completed")]
    Terminated,
}

/// The result of an algorithm run that may have been cancelled.
///
/// A terminated run leaves no valid output behind. Partial state computed
/// before the termination flag was raised is dropped.
#[must_use]
#[derive(Debug)]
pub enum Outcome<T> {
    Completed(T),
    Terminated,
}

impl<T> Outcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Outcome::Terminated)
    }

    /// Returns the computed value, or `None` if the run was terminated.
    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            Outcome::Terminated => None,
        }
    }

    /// Converts a terminated run into [`Error::Terminated`].
    ///
    /// # Examples
    ///
    /// ```
    /// use graph_compute::{Error, Outcome};
    ///
    /// let outcome: Outcome<u32> = Outcome::Terminated;
    /// assert!(matches!(outcome.into_result(), Err(Error::Terminated)));
    /// ```
    pub fn into_result(self) -> Result<T, Error> {
        self.completed().ok_or(Error::Terminated)
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Outcome::Completed(value) => Outcome::Completed(f(value)),
            Outcome::Terminated => Outcome::Terminated,
        }
    }
}
