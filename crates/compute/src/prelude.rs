pub use crate::atomic_array::AtomicLongArray;
pub use crate::atomic_array::PAGE_SIZE;

pub use crate::dss::DisjointSetStruct;

pub use crate::graph::ComputeGraph;
pub use crate::graph::EdgeWeight;
pub use crate::graph::FnProperty;
pub use crate::graph::NodeProperty;
pub use crate::graph::Orientation;
pub use crate::graph::Oriented;
pub use crate::graph::RelationshipCursor;

pub use crate::label_propagation::LabelPropagation;
pub use crate::label_propagation::LabelPropagationConfig;
pub use crate::label_propagation::LabelPropagationResult;

pub use crate::partition::adjusted_batch_size;
pub use crate::partition::degree_partition;
pub use crate::partition::range_partition;
pub use crate::partition::thread_count;
pub use crate::partition::Partition;

pub use crate::runner::run_with_concurrency;
pub use crate::runner::RunStatus;
pub use crate::runner::Task;
pub use crate::runner::TerminationFlag;

pub use crate::wcc::Wcc;
pub use crate::wcc::WccConfig;

pub use crate::Error;
pub use crate::Outcome;
pub use crate::DEFAULT_BATCH_SIZE;
pub use crate::DEFAULT_CONCURRENCY;

pub use graph_builder::prelude::CsrLayout;
pub use graph_builder::prelude::DirectedCsrGraph;
pub use graph_builder::prelude::GraphBuilder;
pub use graph_builder::prelude::UndirectedCsrGraph;
