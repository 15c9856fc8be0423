use std::fmt::Debug;

use ahash::AHashMap;
use rayon::prelude::*;

use crate::{atomic_array::AtomicLongArray, graph::NodeProperty, Error};

/// A thread-safe Disjoint Set Struct implementation, that
/// can be safely shared and accessed across threads.
///
/// Each element stores the id of its parent in an [`AtomicLongArray`].
/// Roots are self-parented. All modifications of the parent pointers
/// are compare-and-swap operations, no locks are taken.
///
/// The implementation is based on the Java implementation [1]
/// which in turn is based on a C++ implementation [2] and some
/// input from a Rust implementation [3].
///
/// [1] [Java](https://github.com/neo4j/graph-data-science/blob/edeab6ab68f241135737aafe68a113248f11042c/core/src/main/java/org/neo4j/gds/core/utils/paged/dss/HugeAtomicDisjointSetStruct.java)
/// [2] [C++](https://github.com/wjakob/dset/blob/7967ef0e6041cd9d73b9c7f614ab8ae92e9e587a/dset.h)
/// [3] [Rust](https://github.com/tov/disjoint-sets-rs/blob/88ab08df21f04fcf7c157b6e042efd561ee873ba/src/concurrent.rs)
///
/// A dss that is created [`with_seeds`](Self::with_seeds) additionally
/// tracks a component id per root. Seeded elements start in the component
/// of their seed value and unions keep the smaller component id.
pub struct DisjointSetStruct {
    parents: AtomicLongArray,
    // Component id per root, only present for seeded sets.
    communities: Option<AtomicLongArray>,
}

/// Validated seed values of a node id space.
pub(crate) struct Seeding {
    // The smallest element per seed value.
    representatives: AHashMap<i64, u64>,
    max_seed: i64,
}

impl Seeding {
    pub(crate) fn new(size: u64, seeds: &dyn NodeProperty<i64>) -> Result<Self, Error> {
        let representatives = (0..size)
            .into_par_iter()
            .fold(AHashMap::new, |mut representatives, id| {
                if let Some(seed) = seeds.get(id) {
                    keep_smaller(&mut representatives, seed, id);
                }
                representatives
            })
            .reduce(AHashMap::new, |mut left, right| {
                for (seed, id) in right {
                    keep_smaller(&mut left, seed, id);
                }
                left
            });

        if let Some((&value, &node)) = representatives.iter().min_by_key(|&(&seed, _)| seed) {
            if value < 0 {
                return Err(Error::InvalidSeedValue { node, value });
            }
        }

        let max_seed = representatives.keys().copied().max().unwrap_or(-1);
        check_unseeded_labels(max_seed, size)?;

        Ok(Self {
            representatives,
            max_seed,
        })
    }

    pub(crate) fn max_seed(&self) -> i64 {
        self.max_seed
    }
}

fn keep_smaller(representatives: &mut AHashMap<i64, u64>, seed: i64, id: u64) {
    representatives
        .entry(seed)
        .and_modify(|representative| *representative = u64::min(*representative, id))
        .or_insert(id);
}

/// Fails if `max_seed + node_count`, the largest id that is synthesized
/// for an unseeded element, does not fit into an `i64`.
pub(crate) fn check_unseeded_labels(max_seed: i64, node_count: u64) -> Result<(), Error> {
    i64::try_from(node_count)
        .ok()
        .and_then(|count| max_seed.checked_add(count))
        .map(|_| ())
        .ok_or(Error::SeedOverflow {
            max_seed,
            node_count,
        })
}

impl DisjointSetStruct {
    /// Creates a new disjoint-set struct of `size` elements,
    /// each of them in its own set.
    ///
    /// # Examples
    ///
    /// ```
    /// use graph_compute::prelude::*;
    ///
    /// let dss = DisjointSetStruct::new(3);
    /// dss.union(0, 1);
    /// let set0 = dss.find(0);
    /// let set1 = dss.find(1);
    /// assert_eq!(set0, set1);
    /// ```
    pub fn new(size: u64) -> Self {
        Self {
            parents: AtomicLongArray::with_generator(size, |id| id as i64),
            communities: None,
        }
    }

    /// Creates a disjoint-set struct of `size` elements whose initial sets
    /// are given by `seeds`.
    ///
    /// Elements with the same seed value start in the same set and report
    /// the seed value as their set id. Unseeded elements start alone and
    /// report `max_seed + id + 1` until they are joined with other sets.
    /// A joined set reports the smallest set id of its parts.
    ///
    /// Fails if a seed value is negative or if the synthesized ids overflow.
    ///
    /// # Examples
    ///
    /// ```
    /// use graph_compute::prelude::*;
    ///
    /// let seeds = vec![Some(7_i64), None, Some(7), None];
    /// let dss = DisjointSetStruct::with_seeds(4, &seeds).unwrap();
    /// assert!(dss.same_set(0, 2));
    /// assert_eq!(dss.set_id_of(2), 7);
    /// assert_eq!(dss.set_id_of(1), 9);
    ///
    /// dss.union(1, 3);
    /// assert_eq!(dss.set_id_of(3), 9);
    /// dss.union(3, 0);
    /// assert_eq!(dss.set_id_of(1), 7);
    /// ```
    pub fn with_seeds(size: u64, seeds: &dyn NodeProperty<i64>) -> Result<Self, Error> {
        let seeding = Seeding::new(size, seeds)?;
        Ok(Self::from_seeding(size, seeds, &seeding))
    }

    pub(crate) fn from_seeding(
        size: u64,
        seeds: &dyn NodeProperty<i64>,
        seeding: &Seeding,
    ) -> Self {
        let parents = AtomicLongArray::with_generator(size, |id| {
            seeds
                .get(id)
                .and_then(|seed| seeding.representatives.get(&seed).copied())
                .unwrap_or(id) as i64
        });
        let max_seed = seeding.max_seed;
        let communities = AtomicLongArray::with_generator(size, |id| {
            seeds.get(id).unwrap_or(max_seed + id as i64 + 1)
        });

        Self {
            parents,
            communities: Some(communities),
        }
    }

    /// Returns `true` if the dss was created from seed values.
    pub fn is_seeded(&self) -> bool {
        self.communities.is_some()
    }

    /// Joins the set of `id1` with the set of `id2`.
    ///
    /// The root with the smaller id becomes the root of the joined set.
    ///
    /// # Examples
    ///
    /// ```
    /// use graph_compute::prelude::*;
    ///
    /// let dss = DisjointSetStruct::new(10);
    /// dss.union(2, 4);
    /// assert_eq!(dss.find(2), 2);
    /// assert_eq!(dss.find(4), 2);
    /// ```
    pub fn union(&self, mut id1: u64, mut id2: u64) {
        loop {
            id1 = self.find(id1);
            id2 = self.find(id2);

            if id1 == id2 {
                return;
            }

            // We do Union-by-Min, so the smaller set id wins.
            // We also only update the entry for id1 and if that
            // is the smaller value, we need to swap ids so we update
            // only the value for id2, not id1.
            if id1 < id2 {
                std::mem::swap(&mut id1, &mut id2);
            }

            if self.update_parent(id1, id1, id2) {
                if let Some(communities) = &self.communities {
                    self.merge_community(communities, id1, id2);
                }
                break;
            }
        }
    }

    // Moves the component id of the former root `child` to the root of
    // `root`. If `root` is linked concurrently, either the linking thread
    // reads the smaller id or the root check below fails and we move on to
    // the new root.
    fn merge_community(&self, communities: &AtomicLongArray, child: u64, mut root: u64) {
        let community = communities.get(child);
        loop {
            communities.update(root, |current| i64::min(current, community));
            let parent = self.parent(root);
            if parent == root {
                return;
            }
            root = self.find(parent);
        }
    }

    /// Find the set of `id`.
    ///
    /// Every visited element is re-pointed to its grand parent on the way.
    ///
    /// # Examples
    ///
    /// ```
    /// use graph_compute::prelude::*;
    ///
    /// let dss = DisjointSetStruct::new(10);
    /// assert_eq!(dss.find(4), 4);
    /// dss.union(4, 2);
    /// assert_eq!(dss.find(4), 2);
    /// ```
    pub fn find(&self, mut id: u64) -> u64 {
        let mut parent = self.parent(id);

        while id != parent {
            let grand_parent = self.parent(parent);
            // Try to apply path-halving by setting the value
            // for some id to its grand parent. This might fail
            // if another thread is also changing the same value
            // but that's ok. The CAS operations guarantees
            // that at least one of the contenting threads will
            // succeed. That's enough for the path-halving to work
            // and there is no need to retry in case of a CAS failure.
            let _ = self.update_parent(id, parent, grand_parent);
            id = parent;
            parent = grand_parent;
        }

        id
    }

    /// Returns the set id of `id`, compressing its path as a side effect.
    ///
    /// This is the root of the set, or the component id of the root for a
    /// seeded dss.
    pub fn set_id_of(&self, id: u64) -> u64 {
        let root = self.find(id);
        match &self.communities {
            Some(communities) => communities.get(root) as u64,
            None => root,
        }
    }

    /// Returns `true` if `id1` and `id2` are members of the same set.
    pub fn same_set(&self, id1: u64, id2: u64) -> bool {
        self.find(id1) == self.find(id2)
    }

    /// Returns the number of elements in the dss.
    ///
    /// # Examples
    ///
    /// ```
    /// use graph_compute::prelude::*;
    ///
    /// let dss = DisjointSetStruct::new(3);
    /// assert_eq!(dss.size(), 3);
    /// ```
    pub fn size(&self) -> u64 {
        self.parents.size()
    }

    /// Compresses the DSS so that each id stores its root set id.
    pub fn compress(&self) {
        (0..self.size()).into_par_iter().for_each(|id| {
            self.find(id);
        });
    }

    /// Returns the number of disjoint sets.
    pub fn component_count(&self) -> u64 {
        (0..self.size())
            .into_par_iter()
            .filter(|&id| self.find(id) == id)
            .count() as u64
    }

    /// Returns the number of elements per set id.
    pub fn component_sizes(&self) -> AHashMap<u64, u64> {
        (0..self.size())
            .into_par_iter()
            .fold(AHashMap::new, |mut sizes, id| {
                *sizes.entry(self.set_id_of(id)).or_insert(0) += 1;
                sizes
            })
            .reduce(AHashMap::new, |mut left, right| {
                for (set_id, count) in right {
                    *left.entry(set_id).or_insert(0) += count;
                }
                left
            })
    }

    /// Returns the set id of every element, indexed by element id.
    pub fn to_vec(&self) -> Vec<u64> {
        self.compress();
        match &self.communities {
            Some(_) => (0..self.size())
                .into_par_iter()
                .map(|id| self.set_id_of(id))
                .collect(),
            None => self
                .parents
                .to_vec()
                .into_iter()
                .map(|set_id| set_id as u64)
                .collect(),
        }
    }

    /// Returns the number of bytes a dss of `size` elements occupies.
    pub fn memory_estimation(size: u64) -> u64 {
        AtomicLongArray::memory_estimation(size)
    }

    /// Returns the number of bytes a seeded dss of `size` elements occupies.
    pub fn seeded_memory_estimation(size: u64) -> u64 {
        2 * AtomicLongArray::memory_estimation(size)
    }

    /// Drops the dss and returns the number of bytes that were released.
    pub fn release(self) -> u64 {
        self.parents.release() + self.communities.map_or(0, AtomicLongArray::release)
    }

    fn parent(&self, id: u64) -> u64 {
        self.parents.get(id) as u64
    }

    fn update_parent(&self, id: u64, current: u64, new: u64) -> bool {
        self.parents
            .compare_and_set(id, current as i64, new as i64)
    }
}

impl Debug for DisjointSetStruct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisjointSetStruct")
            .field("size", &self.size())
            .field("seeded", &self.is_seeded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Barrier;

    use super::*;

    #[test]
    fn test_union() {
        let dss = DisjointSetStruct::new(10);

        assert_eq!(dss.find(9), 9);
        dss.union(9, 7);
        assert_eq!(dss.find(9), 7);
        dss.union(7, 4);
        assert_eq!(dss.find(9), 4);
        dss.union(4, 2);
        assert_eq!(dss.find(9), 2);
        dss.union(2, 0);
        assert_eq!(dss.find(9), 0);
    }

    #[test]
    fn test_union_with_path_halving() {
        let dss = DisjointSetStruct::new(10);

        dss.union(4, 3);
        dss.union(3, 2);
        dss.union(2, 1);
        dss.union(1, 0);

        dss.union(9, 8);
        dss.union(8, 7);
        dss.union(7, 6);
        dss.union(6, 5);

        assert_eq!(dss.find(4), 0);
        assert_eq!(dss.find(9), 5);

        dss.union(5, 4);

        for i in 0..dss.size() {
            assert_eq!(dss.find(i), 0);
        }
    }

    #[test]
    fn test_union_parallel() {
        let barrier = Arc::new(Barrier::new(2));
        let dss = Arc::new(DisjointSetStruct::new(1000));

        fn workload(barrier: &Barrier, dss: &DisjointSetStruct) {
            barrier.wait();
            for i in 0..500 {
                dss.union(i, i + 1);
            }
            // We wait again after the first cluster to increase the chance of concurrent updates
            barrier.wait();
            for i in 501..999 {
                dss.union(i, i + 1);
            }
        }

        let t1 = std::thread::spawn({
            let barrier = Arc::clone(&barrier);
            let dss = Arc::clone(&dss);
            move || workload(&barrier, &dss)
        });

        let t2 = std::thread::spawn({
            let barrier = Arc::clone(&barrier);
            let dss = Arc::clone(&dss);
            move || workload(&barrier, &dss)
        });

        t1.join().unwrap();
        t2.join().unwrap();

        for i in 0..500 {
            assert_eq!(dss.find(i), dss.find(i + 1));
        }

        assert_ne!(dss.find(500), dss.find(501));

        for i in 501..999 {
            assert_eq!(dss.find(i), dss.find(i + 1));
        }
    }

    #[test]
    fn test_union_rayon() {
        let dss = DisjointSetStruct::new(10_000);

        // Links every id to the id that is 100 smaller, producing 100 chains.
        (100..10_000_u64).into_par_iter().for_each(|id| {
            dss.union(id, id - 100);
        });

        assert_eq!(dss.component_count(), 100);
        for id in 0..10_000 {
            assert_eq!(dss.find(id), id % 100);
        }
    }

    #[test]
    fn find_is_idempotent() {
        let dss = DisjointSetStruct::new(8);
        dss.union(7, 3);
        dss.union(3, 5);
        dss.union(1, 6);

        for id in 0..dss.size() {
            let set_id = dss.find(id);
            assert_eq!(dss.find(set_id), set_id);
            assert_eq!(dss.set_id_of(id), set_id);
        }
    }

    #[test]
    fn same_set_is_an_equivalence() {
        let dss = DisjointSetStruct::new(6);
        dss.union(0, 2);
        dss.union(2, 4);
        dss.union(1, 3);

        for a in 0..6 {
            assert!(dss.same_set(a, a));
            for b in 0..6 {
                assert_eq!(dss.same_set(a, b), dss.same_set(b, a));
                for c in 0..6 {
                    if dss.same_set(a, b) && dss.same_set(b, c) {
                        assert!(dss.same_set(a, c));
                    }
                }
            }
        }

        assert!(dss.same_set(0, 4));
        assert!(!dss.same_set(0, 1));
        assert!(!dss.same_set(3, 5));
    }

    #[test]
    fn component_statistics() {
        let dss = DisjointSetStruct::new(6);
        dss.union(5, 4);
        dss.union(4, 3);
        dss.union(1, 0);

        assert_eq!(dss.component_count(), 3);

        let sizes = dss.component_sizes();
        assert_eq!(sizes.len(), 3);
        assert_eq!(sizes[&0], 2);
        assert_eq!(sizes[&2], 1);
        assert_eq!(sizes[&3], 3);

        assert_eq!(dss.to_vec(), vec![0, 0, 2, 3, 3, 3]);
    }

    #[test]
    fn memory_estimation() {
        assert_eq!(DisjointSetStruct::memory_estimation(100), 840);
        assert_eq!(DisjointSetStruct::new(100).release(), 840);

        let seeds = vec![Some(1_i64); 100];
        assert_eq!(DisjointSetStruct::seeded_memory_estimation(100), 1680);
        assert_eq!(
            DisjointSetStruct::with_seeds(100, &seeds).unwrap().release(),
            1680
        );
    }

    #[test]
    fn seeds_form_initial_sets() {
        let seeds = vec![Some(3_i64), None, Some(3), Some(1), None];
        let dss = DisjointSetStruct::with_seeds(5, &seeds).unwrap();

        assert!(dss.is_seeded());
        assert!(dss.same_set(0, 2));
        assert!(!dss.same_set(0, 3));
        assert_eq!(dss.component_count(), 4);
        // Unseeded elements get `max_seed + id + 1`.
        assert_eq!(dss.to_vec(), vec![3, 5, 3, 1, 8]);
    }

    #[test]
    fn seeded_union_keeps_smaller_set_id() {
        let seeds = vec![Some(3_i64), None, Some(3), Some(1), None];
        let dss = DisjointSetStruct::with_seeds(5, &seeds).unwrap();

        // Two unseeded elements keep the id of the smaller one.
        dss.union(4, 1);
        assert_eq!(dss.set_id_of(4), 5);

        dss.union(1, 2);
        assert_eq!(dss.to_vec(), vec![3, 3, 3, 1, 3]);

        dss.union(0, 3);
        assert_eq!(dss.to_vec(), vec![1; 5]);

        let sizes = dss.component_sizes();
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[&1], 5);
    }

    #[test]
    fn seeded_union_rayon() {
        // Every tenth element of a chain carries a seed, the largest one first.
        let seeds = (0..10_000_u64)
            .map(|id| (id % 10 == 0).then(|| 10_000 - id as i64))
            .collect::<Vec<_>>();
        let dss = DisjointSetStruct::with_seeds(10_000, &seeds).unwrap();

        (1..10_000_u64).into_par_iter().for_each(|id| {
            dss.union(id, id - 1);
        });

        assert_eq!(dss.component_count(), 1);
        assert!(dss.to_vec().into_iter().all(|set_id| set_id == 10));
    }

    #[test]
    fn invalid_seeds() {
        let seeds = vec![Some(3_i64), Some(-2), Some(-1)];
        assert!(matches!(
            DisjointSetStruct::with_seeds(3, &seeds),
            Err(Error::InvalidSeedValue { node: 1, value: -2 })
        ));

        let seeds = vec![Some(i64::MAX - 1), None];
        assert!(matches!(
            DisjointSetStruct::with_seeds(2, &seeds),
            Err(Error::SeedOverflow { node_count: 2, .. })
        ));

        let seeds = vec![Some(i64::MAX - 2), None];
        assert!(DisjointSetStruct::with_seeds(2, &seeds).is_ok());
    }
}
