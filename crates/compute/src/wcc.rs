use std::time::Instant;

use ahash::AHashMap;
use log::{debug, info};
use num_format::{Locale, ToFormattedString};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::{prelude::*, ThreadPool};

use crate::{
    dss::{DisjointSetStruct, Seeding},
    graph::{ComputeGraph, NodeProperty, RelationshipCursor},
    partition::{adjusted_batch_size, degree_partition, range_partition, thread_count, Partition},
    progress::ProgressLogger,
    runner::{run_with_concurrency, Task, TerminationFlag},
    Error, Outcome, DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY,
};

const NEIGHBOR_ROUNDS: usize = 2;
const SAMPLING_SIZE: usize = 1024;

// Weight reported for unweighted relationships when there is no threshold.
const DEFAULT_WEIGHT: f64 = 1.0;

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct WccConfig {
    /// Number of tasks that run at the same time.
    #[cfg_attr(feature = "clap", clap(long, default_value_t = DEFAULT_CONCURRENCY))]
    pub concurrency: usize,
    /// Smallest number of nodes (or relationships, if a threshold is set)
    /// that is processed by a single task.
    #[cfg_attr(feature = "clap", clap(long, default_value_t = DEFAULT_BATCH_SIZE))]
    pub min_batch_size: usize,
    /// Number of relationships of each node to sample during subgraph linking.
    #[cfg_attr(feature = "clap", clap(long, default_value_t = NEIGHBOR_ROUNDS))]
    pub neighbor_rounds: usize,
    /// Number of samples to draw from the DSS to find the largest component.
    #[cfg_attr(feature = "clap", clap(long, default_value_t = SAMPLING_SIZE))]
    pub sampling_size: usize,
    /// Seed for drawing the samples, random if not set.
    #[cfg_attr(feature = "clap", clap(long))]
    pub sampling_seed: Option<u64>,
    /// Only relationships with a weight above the threshold connect nodes.
    #[cfg_attr(feature = "clap", clap(long))]
    pub threshold: Option<f64>,
}

impl Default for WccConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            min_batch_size: DEFAULT_BATCH_SIZE,
            neighbor_rounds: NEIGHBOR_ROUNDS,
            sampling_size: SAMPLING_SIZE,
            sampling_seed: None,
            threshold: None,
        }
    }
}

impl WccConfig {
    pub fn new(concurrency: usize, neighbor_rounds: usize, sampling_size: usize) -> Self {
        Self {
            concurrency,
            neighbor_rounds,
            sampling_size,
            ..Self::default()
        }
    }

    pub fn with_concurrency(self, concurrency: usize) -> Self {
        Self {
            concurrency,
            ..self
        }
    }

    pub fn with_min_batch_size(self, min_batch_size: usize) -> Self {
        Self {
            min_batch_size,
            ..self
        }
    }

    pub fn with_neighbor_rounds(self, neighbor_rounds: usize) -> Self {
        Self {
            neighbor_rounds,
            ..self
        }
    }

    pub fn with_sampling_size(self, sampling_size: usize) -> Self {
        Self {
            sampling_size,
            ..self
        }
    }

    pub fn with_sampling_seed(self, sampling_seed: u64) -> Self {
        Self {
            sampling_seed: Some(sampling_seed),
            ..self
        }
    }

    pub fn with_threshold(self, threshold: f64) -> Self {
        Self {
            threshold: Some(threshold),
            ..self
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.concurrency == 0 {
            return Err(Error::InvalidConcurrency(self.concurrency));
        }
        if self.min_batch_size == 0 {
            return Err(Error::InvalidBatchSize(self.min_batch_size));
        }
        if self.sampling_size == 0 {
            return Err(Error::InvalidSamplingSize(self.sampling_size));
        }
        match self.threshold {
            Some(threshold) if !threshold.is_finite() => Err(Error::InvalidThreshold(threshold)),
            _ => Ok(()),
        }
    }
}

/// Computes the weakly connected components of a graph.
///
/// On an undirected graph without a threshold, e.g. an [`UndirectedCsrGraph`]
/// or an [`Oriented`] view with [`Orientation::Undirected`], the computation
/// follows the Afforest approach [1]: it first links a sampled subgraph of
/// at most `neighbor_rounds` relationships per node, then estimates the
/// largest intermediate component and finally links all remaining
/// relationships while skipping the nodes of that component.
///
/// Skipping is only correct if every relationship is also visited from its
/// target. Directed graphs are therefore linked by visiting every
/// relationship once, which also connects nodes that are only reachable
/// against the direction of their relationships.
///
/// With a threshold, every relationship is visited once and only those with
/// a weight above the threshold are linked. Unweighted relationships are
/// always linked.
///
/// With a seed property, see [`Wcc::with_seed_property`], the computation
/// continues from the components given by the seed values.
///
/// [1] Michael Sutton, Tal Ben-Nun, Amnon Barak:
///     "Optimizing Parallel Graph Connectivity Computation via Subgraph Sampling",
///     Symposium on Parallel and Distributed Processing, IPDPS 2018
///
/// [`UndirectedCsrGraph`]: graph_builder::prelude::UndirectedCsrGraph
/// [`Oriented`]: crate::graph::Oriented
/// [`Orientation::Undirected`]: crate::graph::Orientation::Undirected
pub struct Wcc<'g, G> {
    graph: &'g G,
    config: WccConfig,
    seeds: Option<(&'g dyn NodeProperty<i64>, Seeding)>,
}

impl<'g, G: ComputeGraph> Wcc<'g, G> {
    pub fn new(graph: &'g G, config: WccConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            graph,
            config,
            seeds: None,
        })
    }

    /// Starts the computation from the components given by `seeds`.
    ///
    /// Nodes with the same seed value are in the same component and keep the
    /// seed value as component id. Joined components keep the smaller id,
    /// see [`DisjointSetStruct::with_seeds`].
    ///
    /// Fails if a seed value is negative or if the ids of unseeded nodes
    /// would overflow.
    pub fn with_seed_property(self, seeds: &'g dyn NodeProperty<i64>) -> Result<Self, Error> {
        let seeding = Seeding::new(self.graph.node_count(), seeds)?;
        debug!("Seeded components with a max seed of {}", seeding.max_seed());
        Ok(Self {
            seeds: Some((seeds, seeding)),
            ..self
        })
    }

    pub fn config(&self) -> WccConfig {
        self.config
    }

    /// Returns the number of bytes the result for a graph of `node_count`
    /// nodes occupies.
    pub fn memory_estimation(node_count: u64) -> u64 {
        DisjointSetStruct::memory_estimation(node_count)
    }

    /// Runs the computation on `pool`.
    ///
    /// Returns [`Outcome::Terminated`] if `termination_flag` was raised
    /// before all phases finished.
    pub fn compute(
        &self,
        pool: &ThreadPool,
        termination_flag: &TerminationFlag,
    ) -> Outcome<DisjointSetStruct> {
        let start = Instant::now();
        let outcome = pool.install(|| {
            if self.config.threshold.is_none() && self.graph.is_undirected() {
                self.compute_sampled(pool, termination_flag)
            } else {
                self.compute_full_scan(pool, termination_flag)
            }
        });
        info!("Wcc took {:?}", start.elapsed());
        outcome
    }

    fn create_components(&self) -> DisjointSetStruct {
        let node_count = self.graph.node_count();
        let start = Instant::now();
        let dss = match &self.seeds {
            Some((seeds, seeding)) => DisjointSetStruct::from_seeding(node_count, *seeds, seeding),
            None => DisjointSetStruct::new(node_count),
        };
        info!("Components creation took {:?}", start.elapsed());
        dss
    }

    fn compute_sampled(
        &self,
        pool: &ThreadPool,
        termination_flag: &TerminationFlag,
    ) -> Outcome<DisjointSetStruct> {
        let node_count = self.graph.node_count();
        let concurrency = self.config.concurrency;

        let dss = self.create_components();

        if node_count == 0 {
            return Outcome::Completed(dss);
        }

        let batch_size = adjusted_batch_size(
            node_count,
            concurrency as u64,
            self.config.min_batch_size as u64,
        );
        let partitions = range_partition(node_count, batch_size);
        debug!(
            "Created {} partitions with a batch size of {}",
            partitions.len(),
            batch_size.to_formatted_string(&Locale::en)
        );

        let start = Instant::now();
        if self
            .sample_subgraph(pool, &dss, &partitions, termination_flag)
            .is_terminated()
        {
            return Outcome::Terminated;
        }
        info!("Link subgraph took {:?}", start.elapsed());

        let start = Instant::now();
        let largest_component = self.find_largest_component(&dss);
        info!("Get component took {:?}", start.elapsed());

        let start = Instant::now();
        let progress = ProgressLogger::new("Link remaining", node_count);
        let mut tasks = partitions
            .iter()
            .map(|&partition| LinkTask {
                partition,
                graph: self.graph,
                cursor: self.graph.concurrent_copy(),
                dss: &dss,
                skip_component: largest_component,
                neighbor_rounds: self.config.neighbor_rounds,
                progress: &progress,
            })
            .collect::<Vec<_>>();

        let status = run_with_concurrency(pool, concurrency, &mut tasks, termination_flag);
        drop(tasks);
        if status.is_terminated() {
            return Outcome::Terminated;
        }
        info!("Link remaining took {:?}", start.elapsed());

        Outcome::Completed(dss)
    }

    // Sample a subgraph by looking at the first `neighbor_rounds` many targets of each node.
    fn sample_subgraph(
        &self,
        pool: &ThreadPool,
        dss: &DisjointSetStruct,
        partitions: &[Partition],
        termination_flag: &TerminationFlag,
    ) -> Outcome<()> {
        let neighbor_rounds = self.config.neighbor_rounds;
        let progress = ProgressLogger::new(
            "Sample subgraph",
            self.graph.node_count() * neighbor_rounds as u64,
        );

        let mut tasks = partitions
            .iter()
            .map(|&partition| SampleTask {
                partition,
                graph: self.graph,
                cursor: self.graph.concurrent_copy(),
                dss,
                round: 0,
                progress: &progress,
            })
            .collect::<Vec<_>>();

        for round in 0..neighbor_rounds {
            let start = Instant::now();

            for task in tasks.iter_mut() {
                task.round = round;
            }

            let status =
                run_with_concurrency(pool, self.config.concurrency, &mut tasks, termination_flag);
            if status.is_terminated() {
                return Outcome::Terminated;
            }

            debug!(
                "Neighbor round {} of {neighbor_rounds} took {:?}",
                round + 1,
                start.elapsed()
            );
        }

        Outcome::Completed(())
    }

    // Find the largest component after running wcc on the sampled graph.
    fn find_largest_component(&self, dss: &DisjointSetStruct) -> u64 {
        let node_count = dss.size();
        let sampling_size = self.config.sampling_size;

        let mut rng = match self.config.sampling_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut sample_counts = AHashMap::<u64, usize>::new();
        for _ in 0..sampling_size {
            let component = dss.find(rng.gen_range(0..node_count));
            *sample_counts.entry(component).or_insert(0) += 1;
        }

        // Ties are broken towards the smaller set id to not depend on the
        // iteration order of the map.
        let (most_frequent, size) = sample_counts
            .into_iter()
            .max_by(|(c1, v1), (c2, v2)| v1.cmp(v2).then_with(|| c2.cmp(c1)))
            .unwrap_or((0, 0));

        info!(
            "Largest intermediate component {most_frequent} containing approx. {}% of the graph.",
            (size as f32 / sampling_size as f32 * 100.0) as usize
        );

        most_frequent
    }

    // Links every relationship, or those above the threshold, exactly once.
    fn compute_full_scan(
        &self,
        pool: &ThreadPool,
        termination_flag: &TerminationFlag,
    ) -> Outcome<DisjointSetStruct> {
        let graph = self.graph;
        let node_count = graph.node_count();
        let concurrency = self.config.concurrency;
        let threshold = self.config.threshold;

        let dss = self.create_components();

        let start = Instant::now();
        let relationship_count = (0..node_count)
            .into_par_iter()
            .map(|node| graph.degree(node) as u64)
            .sum::<u64>();
        let batch_size = u64::max(
            self.config.min_batch_size as u64,
            thread_count(concurrency as u64, relationship_count),
        );
        let partitions = degree_partition(
            node_count,
            |node| graph.degree(node) as u64,
            batch_size,
            concurrency,
        );
        debug!(
            "Created {} degree partitions for {} relationships in {:?}",
            partitions.len(),
            relationship_count.to_formatted_string(&Locale::en),
            start.elapsed()
        );

        let start = Instant::now();
        let progress = ProgressLogger::new("Link relationships", node_count);
        let mut tasks = partitions
            .into_iter()
            .map(|partition| UnionTask::<G> {
                partition,
                cursor: graph.concurrent_copy(),
                dss: &dss,
                threshold,
                progress: &progress,
            })
            .collect::<Vec<_>>();

        let status = run_with_concurrency(pool, concurrency, &mut tasks, termination_flag);
        drop(tasks);
        if status.is_terminated() {
            return Outcome::Terminated;
        }
        match threshold {
            Some(threshold) => info!("Link above threshold {threshold} took {:?}", start.elapsed()),
            None => info!("Link relationships took {:?}", start.elapsed()),
        }

        Outcome::Completed(dss)
    }
}

struct SampleTask<'a, G: ComputeGraph + 'a> {
    partition: Partition,
    graph: &'a G,
    cursor: G::Cursor<'a>,
    dss: &'a DisjointSetStruct,
    // The index of the relationship that is linked in the next run.
    round: usize,
    progress: &'a ProgressLogger,
}

impl<'a, G: ComputeGraph + 'a> Task for SampleTask<'a, G> {
    fn run(&mut self, termination_flag: &TerminationFlag) {
        let Self {
            partition,
            graph,
            cursor,
            dss,
            round,
            progress,
        } = self;
        let round = *round;

        for node in partition.nodes() {
            if termination_flag.terminated() {
                return;
            }

            if graph.degree(node) as usize <= round {
                continue;
            }

            let mut index = 0;
            cursor.for_each_relationship(node, DEFAULT_WEIGHT, |source, target, _| {
                if index == round {
                    dss.union(source, target);
                    return false;
                }
                index += 1;
                true
            });
        }

        progress.log_progress(partition.node_count());
    }
}

struct LinkTask<'a, G: ComputeGraph + 'a> {
    partition: Partition,
    graph: &'a G,
    cursor: G::Cursor<'a>,
    dss: &'a DisjointSetStruct,
    skip_component: u64,
    neighbor_rounds: usize,
    progress: &'a ProgressLogger,
}

impl<'a, G: ComputeGraph + 'a> Task for LinkTask<'a, G> {
    fn run(&mut self, termination_flag: &TerminationFlag) {
        let Self {
            partition,
            graph,
            cursor,
            dss,
            skip_component,
            neighbor_rounds,
            progress,
        } = self;

        for node in partition.nodes() {
            if termination_flag.terminated() {
                return;
            }

            if dss.find(node) == *skip_component {
                continue;
            }

            if graph.degree(node) as usize <= *neighbor_rounds {
                continue;
            }

            let mut index = 0;
            cursor.for_each_relationship(node, DEFAULT_WEIGHT, |source, target, _| {
                if index >= *neighbor_rounds {
                    dss.union(source, target);
                }
                index += 1;
                true
            });
        }

        progress.log_progress(partition.node_count());
    }
}

struct UnionTask<'a, G: ComputeGraph + 'a> {
    partition: Partition,
    cursor: G::Cursor<'a>,
    dss: &'a DisjointSetStruct,
    threshold: Option<f64>,
    progress: &'a ProgressLogger,
}

impl<'a, G: ComputeGraph + 'a> Task for UnionTask<'a, G> {
    fn run(&mut self, termination_flag: &TerminationFlag) {
        let Self {
            partition,
            cursor,
            dss,
            threshold,
            progress,
        } = self;

        for node in partition.nodes() {
            if termination_flag.terminated() {
                return;
            }

            match *threshold {
                Some(threshold) => {
                    cursor.for_each_relationship(node, threshold + 1.0, |source, target, weight| {
                        if weight > threshold {
                            dss.union(source, target);
                        }
                        true
                    });
                }
                None => {
                    cursor.for_each_relationship(node, DEFAULT_WEIGHT, |source, target, _| {
                        dss.union(source, target);
                        true
                    });
                }
            }
        }

        progress.log_progress(partition.node_count());
    }
}
