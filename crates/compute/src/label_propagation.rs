use std::time::Instant;

use ahash::{AHashMap, AHashSet};
use log::{debug, info};
use num_format::{Locale, ToFormattedString};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::{prelude::*, ThreadPool};

use crate::{
    atomic_array::AtomicLongArray,
    dss::check_unseeded_labels,
    graph::{ComputeGraph, NodeProperty, RelationshipCursor},
    partition::{adjusted_batch_size, range_partition, Partition},
    progress::ProgressLogger,
    runner::{run_with_concurrency, Task, TerminationFlag},
    Error, Outcome, DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY,
};

const MAX_ITERATIONS: usize = 10;

const DEFAULT_WEIGHT: f64 = 1.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct LabelPropagationConfig {
    /// The maximum number of passes over all nodes.
    #[cfg_attr(feature = "clap", clap(long, default_value_t = MAX_ITERATIONS))]
    pub max_iterations: usize,
    /// Number of tasks that run at the same time.
    #[cfg_attr(feature = "clap", clap(long, default_value_t = DEFAULT_CONCURRENCY))]
    pub concurrency: usize,
    /// Smallest number of nodes that is processed by a single task.
    #[cfg_attr(feature = "clap", clap(long, default_value_t = DEFAULT_BATCH_SIZE))]
    pub batch_size: usize,
    /// Seed for shuffling the order in which each task visits its nodes.
    /// Nodes are visited in ascending order if not set.
    #[cfg_attr(feature = "clap", clap(long))]
    pub random_seed: Option<u64>,
}

impl Default for LabelPropagationConfig {
    fn default() -> Self {
        Self {
            max_iterations: MAX_ITERATIONS,
            concurrency: DEFAULT_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
            random_seed: None,
        }
    }
}

impl LabelPropagationConfig {
    pub fn new(max_iterations: usize, concurrency: usize, batch_size: usize) -> Self {
        Self {
            max_iterations,
            concurrency,
            batch_size,
            random_seed: None,
        }
    }

    pub fn with_max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }

    pub fn with_concurrency(self, concurrency: usize) -> Self {
        Self {
            concurrency,
            ..self
        }
    }

    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    pub fn with_random_seed(self, random_seed: u64) -> Self {
        Self {
            random_seed: Some(random_seed),
            ..self
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.max_iterations == 0 {
            return Err(Error::InvalidMaxIterations(self.max_iterations));
        }
        if self.concurrency == 0 {
            return Err(Error::InvalidConcurrency(self.concurrency));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidBatchSize(self.batch_size));
        }
        Ok(())
    }
}

/// Detects communities by repeatedly moving every node to the label that
/// carries the most weight among its neighbors.
///
/// Labels are updated in place while a pass is running, so a node may see
/// labels of its neighbors that were already updated in the same pass. The
/// result therefore depends on how partitions are scheduled when more than
/// one partition exists.
///
/// Ties between labels of equal weight are resolved in favor of the node's
/// current label, or else the smallest label.
pub struct LabelPropagation<'g, G> {
    graph: &'g G,
    config: LabelPropagationConfig,
    seed_property: Option<&'g dyn NodeProperty<i64>>,
    max_seed_label: i64,
    node_weight_property: Option<&'g dyn NodeProperty<f64>>,
}

impl<'g, G: ComputeGraph> LabelPropagation<'g, G> {
    pub fn new(graph: &'g G, config: LabelPropagationConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            graph,
            config,
            seed_property: None,
            max_seed_label: -1,
            node_weight_property: None,
        })
    }

    /// Starts nodes with a present seed value in the community of that value.
    ///
    /// Nodes without a seed value start with a label that is larger than
    /// every seed value: `max_seed + node + 1`. Fails with
    /// [`Error::SeedOverflow`] if these labels do not fit into an `i64`.
    pub fn with_seed_property(
        self,
        seed_property: &'g dyn NodeProperty<i64>,
    ) -> Result<Self, Error> {
        let node_count = self.graph.node_count();
        let max_seed_label = (0..node_count)
            .into_par_iter()
            .filter_map(|node| seed_property.get(node))
            .max()
            .unwrap_or(-1);
        check_unseeded_labels(max_seed_label, node_count)?;

        Ok(Self {
            seed_property: Some(seed_property),
            max_seed_label,
            ..self
        })
    }

    /// Scales the votes of each neighbor by its weight, `1.0` if absent.
    pub fn with_node_weight_property(self, node_weight_property: &'g dyn NodeProperty<f64>) -> Self {
        Self {
            node_weight_property: Some(node_weight_property),
            ..self
        }
    }

    pub fn config(&self) -> LabelPropagationConfig {
        self.config
    }

    /// Returns the number of bytes the result for a graph of `node_count`
    /// nodes occupies.
    pub fn memory_estimation(node_count: u64) -> u64 {
        AtomicLongArray::memory_estimation(node_count)
    }

    /// Runs the computation on `pool`.
    ///
    /// Returns [`Outcome::Terminated`] if `termination_flag` was raised
    /// before the last iteration finished.
    pub fn compute(
        &self,
        pool: &ThreadPool,
        termination_flag: &TerminationFlag,
    ) -> Outcome<LabelPropagationResult> {
        let start = Instant::now();
        let outcome = pool.install(|| self.compute_labels(pool, termination_flag));
        info!("Label propagation took {:?}", start.elapsed());
        outcome
    }

    fn compute_labels(
        &self,
        pool: &ThreadPool,
        termination_flag: &TerminationFlag,
    ) -> Outcome<LabelPropagationResult> {
        let node_count = self.graph.node_count();
        let concurrency = self.config.concurrency;

        let batch_size =
            adjusted_batch_size(node_count, concurrency as u64, self.config.batch_size as u64);
        let partitions = range_partition(node_count, batch_size);
        debug!(
            "Created {} partitions with a batch size of {}",
            partitions.len(),
            batch_size.to_formatted_string(&Locale::en)
        );

        let start = Instant::now();
        let labels = AtomicLongArray::new(node_count);
        let max_seed_label = self.max_seed_label;

        let progress = ProgressLogger::new("Initialize labels", node_count);
        let mut init_tasks = partitions
            .iter()
            .map(|&partition| InitTask {
                partition,
                labels: &labels,
                seed_property: self.seed_property,
                max_seed_label,
                progress: &progress,
            })
            .collect::<Vec<_>>();

        let status = run_with_concurrency(pool, concurrency, &mut init_tasks, termination_flag);
        drop(init_tasks);
        if status.is_terminated() {
            return Outcome::Terminated;
        }
        info!("Initialization took {:?}", start.elapsed());

        let progress = ProgressLogger::new("Compute labels", node_count);
        let mut tasks = partitions
            .iter()
            .map(|&partition| ComputeTask::<G> {
                partition,
                cursor: self.graph.concurrent_copy(),
                labels: &labels,
                node_weight_property: self.node_weight_property,
                random_seed: self.config.random_seed,
                votes: AHashMap::new(),
                iteration: 0,
                changed: false,
                progress: &progress,
            })
            .collect::<Vec<_>>();

        let max_iterations = self.config.max_iterations;
        let mut ran_iterations = 0;
        let mut did_converge = false;

        for iteration in 1..=max_iterations {
            let start = Instant::now();

            for task in tasks.iter_mut() {
                task.iteration = iteration;
                task.changed = false;
            }
            progress.reset();

            let status = run_with_concurrency(pool, concurrency, &mut tasks, termination_flag);
            if status.is_terminated() {
                return Outcome::Terminated;
            }

            ran_iterations = iteration;
            did_converge = tasks.iter().all(|task| !task.changed);

            info!(
                "Iteration {iteration} of {max_iterations} took {:?}",
                start.elapsed()
            );

            if did_converge {
                break;
            }
        }

        drop(tasks);

        if did_converge {
            info!("Converged after {ran_iterations} iterations");
        } else {
            info!("Did not converge within {max_iterations} iterations");
        }

        Outcome::Completed(LabelPropagationResult {
            labels,
            did_converge,
            ran_iterations,
        })
    }
}

struct InitTask<'a> {
    partition: Partition,
    labels: &'a AtomicLongArray,
    seed_property: Option<&'a dyn NodeProperty<i64>>,
    max_seed_label: i64,
    progress: &'a ProgressLogger,
}

impl Task for InitTask<'_> {
    fn run(&mut self, termination_flag: &TerminationFlag) {
        for node in self.partition.nodes() {
            if termination_flag.terminated() {
                return;
            }

            let label = self
                .seed_property
                .and_then(|seeds| seeds.get(node))
                .unwrap_or_else(|| self.max_seed_label + node as i64 + 1);

            self.labels.set(node, label);
        }

        self.progress.log_progress(self.partition.node_count());
    }
}

struct ComputeTask<'a, G: ComputeGraph + 'a> {
    partition: Partition,
    cursor: G::Cursor<'a>,
    labels: &'a AtomicLongArray,
    node_weight_property: Option<&'a dyn NodeProperty<f64>>,
    random_seed: Option<u64>,
    // Reused across nodes to avoid an allocation per node.
    votes: AHashMap<i64, f64>,
    iteration: usize,
    changed: bool,
    progress: &'a ProgressLogger,
}

impl<'a, G: ComputeGraph + 'a> Task for ComputeTask<'a, G> {
    fn run(&mut self, termination_flag: &TerminationFlag) {
        let Self {
            partition,
            cursor,
            labels,
            node_weight_property,
            random_seed,
            votes,
            iteration,
            changed,
            progress,
        } = self;

        let mut updated = 0_u64;

        let nodes: Box<dyn Iterator<Item = u64>> = match *random_seed {
            Some(seed) => {
                let seed = seed ^ (partition.start_node() << 16) ^ *iteration as u64;
                let mut rng = StdRng::seed_from_u64(seed);
                Box::new(shuffled_nodes(*partition, &mut rng))
            }
            None => Box::new(partition.nodes()),
        };

        for node in nodes {
            if termination_flag.terminated() {
                return;
            }

            votes.clear();
            cursor.for_each_relationship(node, DEFAULT_WEIGHT, |_, target, weight| {
                let node_weight = node_weight_property
                    .and_then(|weights| weights.get(target))
                    .unwrap_or(1.0);
                *votes.entry(labels.get(target)).or_insert(0.0) += weight * node_weight;
                true
            });

            let current = labels.get(node);
            let winner = elect_label(votes, current);

            if winner != current {
                labels.set(node, winner);
                updated += 1;
            }
        }

        if updated > 0 {
            *changed = true;
        }

        debug!(
            "Iteration {iteration}: updated {updated} labels in nodes {:?}",
            partition.nodes()
        );
        progress.log_progress(partition.node_count());
    }
}

// Visits every node of `partition` once. `offset * step + shift` is a
// permutation of `0..len` modulo `len` for any `step` coprime to `len`.
fn shuffled_nodes(partition: Partition, rng: &mut StdRng) -> impl Iterator<Item = u64> {
    let start = partition.start_node();
    let len = partition.node_count();

    let (step, shift) = if len > 1 {
        let mut step = rng.gen_range(1..len);
        while gcd(step, len) != 1 {
            step = if step + 1 == len { 1 } else { step + 1 };
        }
        (step, rng.gen_range(0..len))
    } else {
        (1, 0)
    };

    (0..len).map(move |offset| {
        let position = (offset as u128 * step as u128 + shift as u128) % len as u128;
        start + position as u64
    })
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

// Returns the label with the highest vote. Ties keep the current label if it
// is among the winners, otherwise the smallest label wins.
fn elect_label(votes: &AHashMap<i64, f64>, current: i64) -> i64 {
    let max_weight = votes.values().copied().fold(f64::NEG_INFINITY, f64::max);

    if votes.get(&current) == Some(&max_weight) {
        return current;
    }

    votes
        .iter()
        .filter(|(_, &weight)| weight == max_weight)
        .map(|(&label, _)| label)
        .min()
        .unwrap_or(current)
}

/// The communities computed by [`LabelPropagation`].
#[derive(Debug)]
pub struct LabelPropagationResult {
    labels: AtomicLongArray,
    did_converge: bool,
    ran_iterations: usize,
}

impl LabelPropagationResult {
    /// Returns the community label of `node`.
    pub fn label(&self, node: u64) -> i64 {
        self.labels.get(node)
    }

    pub fn labels(&self) -> &AtomicLongArray {
        &self.labels
    }

    pub fn into_labels(self) -> AtomicLongArray {
        self.labels
    }

    /// Returns `true` if the last iteration did not change any label.
    pub fn did_converge(&self) -> bool {
        self.did_converge
    }

    pub fn ran_iterations(&self) -> usize {
        self.ran_iterations
    }

    /// Returns the number of distinct labels.
    pub fn community_count(&self) -> usize {
        self.labels.to_vec().into_iter().collect::<AHashSet<_>>().len()
    }

    /// Drops the result and returns the number of bytes that were released.
    pub fn release(self) -> u64 {
        self.labels.release()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    };

    use graph_builder::prelude::{GraphBuilder, UndirectedCsrGraph};
    use rayon::ThreadPoolBuilder;

    use crate::graph::FnProperty;

    use super::*;

    fn pool() -> ThreadPool {
        ThreadPoolBuilder::new().num_threads(4).build().unwrap()
    }

    fn two_triangles() -> UndirectedCsrGraph<usize> {
        GraphBuilder::new()
            .edges(vec![(0, 1), (1, 2), (2, 0), (3, 4), (4, 5), (5, 3)])
            .build()
    }

    fn run<G: ComputeGraph>(lp: LabelPropagation<G>) -> LabelPropagationResult {
        lp.compute(&pool(), &TerminationFlag::running_true())
            .into_result()
            .unwrap()
    }

    #[test]
    fn two_triangles_converge() {
        let graph = two_triangles();
        let config = LabelPropagationConfig::default();

        let result = run(LabelPropagation::new(&graph, config).unwrap());

        assert!(result.did_converge());
        assert!(result.ran_iterations() < config.max_iterations);
        assert_eq!(result.labels().to_vec(), vec![1, 1, 1, 4, 4, 4]);
        assert_eq!(result.community_count(), 2);
    }

    #[test]
    fn many_partitions() {
        let edges = (0..1000_usize)
            .flat_map(|c| {
                let n = c * 3;
                [(n, n + 1), (n + 1, n + 2), (n + 2, n)]
            })
            .collect::<Vec<_>>();
        let graph: UndirectedCsrGraph<usize> = GraphBuilder::new().edges(edges).build();

        let config = LabelPropagationConfig::default()
            .with_batch_size(100)
            .with_max_iterations(100);
        let result = run(LabelPropagation::new(&graph, config).unwrap());

        assert!(result.did_converge());
        assert_eq!(result.community_count(), 1000);
        for n in (0..3000).step_by(3) {
            assert_eq!(result.label(n), result.label(n + 1));
            assert_eq!(result.label(n), result.label(n + 2));
        }
    }

    #[test]
    fn iteration_cap() {
        let graph: UndirectedCsrGraph<usize> = GraphBuilder::new()
            .edges(vec![(0, 1), (1, 2), (2, 0)])
            .build();

        let config = LabelPropagationConfig::default().with_max_iterations(1);
        let result = run(LabelPropagation::new(&graph, config).unwrap());

        assert_eq!(result.ran_iterations(), 1);
        assert!(!result.did_converge());
    }

    #[test]
    fn seed_labels() {
        // Self loops only vote for the node's own label.
        let graph: UndirectedCsrGraph<usize> = GraphBuilder::new()
            .edges(vec![(0, 0), (1, 1), (2, 2), (3, 3)])
            .build();

        let seeds: Vec<Option<i64>> = vec![Some(5), None, Some(2), None];
        let result = run(LabelPropagation::new(&graph, LabelPropagationConfig::default())
            .unwrap()
            .with_seed_property(&seeds)
            .unwrap());

        assert_eq!(result.labels().to_vec(), vec![5, 7, 2, 9]);
        assert!(result.did_converge());
        assert_eq!(result.ran_iterations(), 1);
    }

    #[test]
    fn seed_labels_spread() {
        let graph: UndirectedCsrGraph<usize> = GraphBuilder::new()
            .edges(vec![(0, 1), (1, 2), (2, 0), (3, 4)])
            .build();

        let seeds = FnProperty(|node: u64| (node == 2).then_some(42_i64));
        let result = run(LabelPropagation::new(&graph, LabelPropagationConfig::default())
            .unwrap()
            .with_seed_property(&seeds)
            .unwrap());

        assert!(result.did_converge());
        assert_eq!(result.label(0), result.label(2));
        assert_eq!(result.label(1), result.label(2));
        assert_eq!(result.label(3), result.label(4));
        // The unseeded pair starts at 42 + 3 + 1 and 42 + 4 + 1.
        assert!(result.label(3) == 46 || result.label(3) == 47);
    }

    #[test]
    fn seed_labels_overflow() {
        let graph: UndirectedCsrGraph<usize> =
            GraphBuilder::new().edges(vec![(0, 0), (1, 1)]).build();
        let lp = LabelPropagation::new(&graph, LabelPropagationConfig::default()).unwrap();

        let seeds = vec![Some(i64::MAX), None];
        assert!(matches!(
            lp.with_seed_property(&seeds),
            Err(Error::SeedOverflow {
                max_seed: i64::MAX,
                node_count: 2
            })
        ));

        let seeds = vec![Some(i64::MAX - 2), None];
        let config = LabelPropagationConfig::default().with_max_iterations(1);
        let result = run(LabelPropagation::new(&graph, config)
            .unwrap()
            .with_seed_property(&seeds)
            .unwrap());
        assert_eq!(result.labels().to_vec(), vec![i64::MAX - 2, i64::MAX]);
    }

    #[test]
    fn relationship_weights() {
        let graph: UndirectedCsrGraph<usize, (), f32> = GraphBuilder::new()
            .edges_with_values(vec![(0, 1, 1.0), (0, 2, 1.0), (0, 3, 5.0)])
            .build();

        let result = run(LabelPropagation::new(&graph, LabelPropagationConfig::default()).unwrap());

        assert_eq!(result.labels().to_vec(), vec![3, 3, 3, 3]);
    }

    #[test]
    fn node_weights() {
        let graph: UndirectedCsrGraph<usize> = GraphBuilder::new()
            .edges(vec![(0, 1), (0, 2), (0, 3)])
            .build();

        let result = run(LabelPropagation::new(&graph, LabelPropagationConfig::default()).unwrap());
        assert_eq!(result.labels().to_vec(), vec![1, 1, 1, 1]);

        let weights = FnProperty(|node: u64| (node == 2).then_some(10.0));
        let result = run(LabelPropagation::new(&graph, LabelPropagationConfig::default())
            .unwrap()
            .with_node_weight_property(&weights));
        assert_eq!(result.labels().to_vec(), vec![2, 2, 2, 2]);
    }

    #[test]
    fn shuffled_nodes_visit_every_node() {
        for len in [0, 1, 2, 7, 12, 100] {
            for seed in 0..8 {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut nodes =
                    shuffled_nodes(Partition::new(40, len), &mut rng).collect::<Vec<_>>();
                nodes.sort_unstable();
                assert_eq!(nodes, (40..40 + len).collect::<Vec<_>>());
            }
        }

        assert_eq!(gcd(12, 8), 4);
        assert_eq!(gcd(7, 12), 1);
    }

    #[test]
    fn random_visit_order() {
        let graph = two_triangles();

        for seed in 0..4 {
            let config = LabelPropagationConfig::default().with_random_seed(seed);
            let result = run(LabelPropagation::new(&graph, config).unwrap());

            assert!(result.did_converge());
            assert_eq!(result.community_count(), 2);
            assert_eq!(result.label(0), result.label(1));
            assert_eq!(result.label(0), result.label(2));
            assert_eq!(result.label(3), result.label(4));
            assert_eq!(result.label(3), result.label(5));
        }
    }

    #[test]
    fn elect_label_ties() {
        let votes = AHashMap::from_iter([(3, 2.0), (1, 2.0), (7, 1.0)]);

        assert_eq!(elect_label(&votes, 3), 3);
        assert_eq!(elect_label(&votes, 7), 1);
        assert_eq!(elect_label(&votes, 9), 1);
        assert_eq!(elect_label(&AHashMap::new(), 9), 9);
    }

    #[test]
    fn terminated() {
        let graph = two_triangles();
        let lp = LabelPropagation::new(&graph, LabelPropagationConfig::default()).unwrap();

        let outcome = lp.compute(&pool(), &TerminationFlag::from_fn(|| false));

        assert!(outcome.is_terminated());
    }

    #[test]
    fn terminated_during_iteration() {
        let graph = two_triangles();
        let terminate = Arc::new(AtomicBool::new(false));
        let lookups = Arc::new(AtomicU64::new(0));

        // One pass looks up 12 node weights, the 13th lookup is part of the
        // second iteration.
        let weights = FnProperty({
            let terminate = Arc::clone(&terminate);
            let lookups = Arc::clone(&lookups);
            move |_: u64| {
                if lookups.fetch_add(1, Ordering::SeqCst) + 1 == 13 {
                    terminate.store(true, Ordering::SeqCst);
                }
                Some(1.0)
            }
        });

        let outcome = LabelPropagation::new(&graph, LabelPropagationConfig::default())
            .unwrap()
            .with_node_weight_property(&weights)
            .compute(&pool(), &TerminationFlag::from_atomic(Arc::clone(&terminate)));

        assert!(outcome.is_terminated());
        let lookups = lookups.load(Ordering::SeqCst);
        assert!((13..24).contains(&lookups), "{lookups} lookups");
    }

    #[test]
    fn invalid_config() {
        let graph = two_triangles();

        assert!(matches!(
            LabelPropagation::new(&graph, LabelPropagationConfig::default().with_max_iterations(0)),
            Err(Error::InvalidMaxIterations(0))
        ));
        assert!(matches!(
            LabelPropagation::new(&graph, LabelPropagationConfig::default().with_concurrency(0)),
            Err(Error::InvalidConcurrency(0))
        ));
        assert!(matches!(
            LabelPropagation::new(&graph, LabelPropagationConfig::default().with_batch_size(0)),
            Err(Error::InvalidBatchSize(0))
        ));
    }

    #[test]
    fn memory_estimation() {
        let graph = two_triangles();
        let result = run(LabelPropagation::new(&graph, LabelPropagationConfig::default()).unwrap());

        assert_eq!(
            LabelPropagation::<UndirectedCsrGraph<usize>>::memory_estimation(6),
            result.release()
        );
    }
}
