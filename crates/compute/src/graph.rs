use graph_builder::{
    prelude::{DirectedCsrGraph, Idx, Target, UndirectedCsrGraph},
    DirectedDegrees, DirectedNeighborsWithValues, Graph, UndirectedDegrees,
    UndirectedNeighborsWithValues,
};

/// Iterates the relationships of single nodes.
///
/// A cursor is owned by exactly one thread. Other threads traverse the same
/// graph through their own cursors, see [`ComputeGraph::concurrent_copy`].
pub trait RelationshipCursor {
    /// Calls `visitor(node, target, weight)` for every relationship of `node`.
    ///
    /// Relationships without a weight report `default_weight`. The traversal
    /// stops as soon as `visitor` returns `false`.
    fn for_each_relationship<F>(&mut self, node: u64, default_weight: f64, visitor: F)
    where
        F: FnMut(u64, u64, f64) -> bool;
}

/// The read-only view of a graph that the algorithms in this crate compute on.
///
/// Nodes are identified by the dense range `0..node_count()`.
pub trait ComputeGraph: Sync {
    type Cursor<'a>: RelationshipCursor + Send
    where
        Self: 'a;

    fn node_count(&self) -> u64;

    /// Returns the number of relationships that
    /// [`RelationshipCursor::for_each_relationship`] visits for `node`.
    fn degree(&self, node: u64) -> u32;

    /// Creates an independent cursor that shares the graph topology.
    fn concurrent_copy(&self) -> Self::Cursor<'_>;

    /// Returns `true` if every relationship is visited from both of its end
    /// nodes.
    fn is_undirected(&self) -> bool;
}

/// Converts relationship values into weights.
pub trait EdgeWeight: Copy {
    fn weight_or(self, default_weight: f64) -> f64;
}

impl EdgeWeight for () {
    fn weight_or(self, default_weight: f64) -> f64 {
        default_weight
    }
}

impl EdgeWeight for f32 {
    fn weight_or(self, _: f64) -> f64 {
        self as f64
    }
}

impl EdgeWeight for f64 {
    fn weight_or(self, _: f64) -> f64 {
        self
    }
}

/// Selects which relationships of a directed graph are visited.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum Orientation {
    /// Outgoing relationships.
    #[default]
    Natural,
    /// Incoming relationships.
    Reverse,
    /// Outgoing followed by incoming relationships.
    Undirected,
}

/// A directed graph that is traversed in the given [`Orientation`].
///
/// # Examples
///
/// ```
/// use graph_compute::prelude::*;
///
/// let graph: DirectedCsrGraph<usize> = GraphBuilder::new()
///     .edges(vec![(0, 1), (2, 1)])
///     .build();
///
/// let undirected = Oriented::new(&graph, Orientation::Undirected);
/// assert_eq!(undirected.degree(1), 2);
///
/// let reverse = Oriented::new(&graph, Orientation::Reverse);
/// assert_eq!(reverse.degree(0), 0);
/// ```
#[derive(Debug)]
pub struct Oriented<'g, G> {
    graph: &'g G,
    orientation: Orientation,
}

impl<'g, G> Oriented<'g, G> {
    pub fn new(graph: &'g G, orientation: Orientation) -> Self {
        Self { graph, orientation }
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }
}

/// The cursor of the `graph_builder` CSR graphs.
///
/// CSR graphs are immutable and the cursor only borrows the adjacency lists.
pub struct CsrCursor<'g, G> {
    graph: &'g G,
    orientation: Orientation,
}

fn to_degree<NI: Idx>(degree: NI) -> u32 {
    u32::try_from(degree.index()).unwrap_or(u32::MAX)
}

// Returns `false` if the visitor stopped the traversal.
fn visit_targets<'a, NI, EV, F>(
    node: u64,
    targets: impl Iterator<Item = &'a Target<NI, EV>>,
    default_weight: f64,
    visitor: &mut F,
) -> bool
where
    NI: Idx,
    EV: EdgeWeight + 'a,
    F: FnMut(u64, u64, f64) -> bool,
{
    for target in targets {
        let weight = target.value.weight_or(default_weight);
        if !visitor(node, target.target.index() as u64, weight) {
            return false;
        }
    }
    true
}

impl<NI, NV, EV> ComputeGraph for UndirectedCsrGraph<NI, NV, EV>
where
    NI: Idx,
    NV: Sync,
    EV: EdgeWeight + Sync,
{
    type Cursor<'a> = CsrCursor<'a, Self> where Self: 'a;

    fn node_count(&self) -> u64 {
        Graph::node_count(self).index() as u64
    }

    fn degree(&self, node: u64) -> u32 {
        to_degree(UndirectedDegrees::degree(self, NI::new(node as usize)))
    }

    fn concurrent_copy(&self) -> Self::Cursor<'_> {
        CsrCursor {
            graph: self,
            orientation: Orientation::Undirected,
        }
    }

    fn is_undirected(&self) -> bool {
        true
    }
}

impl<NI, NV, EV> RelationshipCursor for CsrCursor<'_, UndirectedCsrGraph<NI, NV, EV>>
where
    NI: Idx,
    EV: EdgeWeight,
{
    fn for_each_relationship<F>(&mut self, node: u64, default_weight: f64, mut visitor: F)
    where
        F: FnMut(u64, u64, f64) -> bool,
    {
        let targets = self.graph.neighbors_with_values(NI::new(node as usize));
        visit_targets(node, targets, default_weight, &mut visitor);
    }
}

fn directed_degree<NI, NV, EV>(
    graph: &DirectedCsrGraph<NI, NV, EV>,
    node: u64,
    orientation: Orientation,
) -> u32
where
    NI: Idx,
{
    let node = NI::new(node as usize);
    let degree = match orientation {
        Orientation::Natural => graph.out_degree(node).index(),
        Orientation::Reverse => graph.in_degree(node).index(),
        Orientation::Undirected => graph.out_degree(node).index() + graph.in_degree(node).index(),
    };
    u32::try_from(degree).unwrap_or(u32::MAX)
}

impl<NI, NV, EV> ComputeGraph for DirectedCsrGraph<NI, NV, EV>
where
    NI: Idx,
    NV: Sync,
    EV: EdgeWeight + Sync,
{
    type Cursor<'a> = CsrCursor<'a, Self> where Self: 'a;

    fn node_count(&self) -> u64 {
        Graph::node_count(self).index() as u64
    }

    fn degree(&self, node: u64) -> u32 {
        directed_degree(self, node, Orientation::Natural)
    }

    fn concurrent_copy(&self) -> Self::Cursor<'_> {
        CsrCursor {
            graph: self,
            orientation: Orientation::Natural,
        }
    }

    fn is_undirected(&self) -> bool {
        false
    }
}

impl<'g, NI, NV, EV> ComputeGraph for Oriented<'g, DirectedCsrGraph<NI, NV, EV>>
where
    NI: Idx,
    NV: Sync,
    EV: EdgeWeight + Sync,
{
    type Cursor<'a> = CsrCursor<'a, DirectedCsrGraph<NI, NV, EV>> where Self: 'a;

    fn node_count(&self) -> u64 {
        Graph::node_count(self.graph).index() as u64
    }

    fn degree(&self, node: u64) -> u32 {
        directed_degree(self.graph, node, self.orientation)
    }

    fn concurrent_copy(&self) -> Self::Cursor<'_> {
        CsrCursor {
            graph: self.graph,
            orientation: self.orientation,
        }
    }

    fn is_undirected(&self) -> bool {
        self.orientation == Orientation::Undirected
    }
}

impl<NI, NV, EV> RelationshipCursor for CsrCursor<'_, DirectedCsrGraph<NI, NV, EV>>
where
    NI: Idx,
    EV: EdgeWeight,
{
    fn for_each_relationship<F>(&mut self, node: u64, default_weight: f64, mut visitor: F)
    where
        F: FnMut(u64, u64, f64) -> bool,
    {
        let graph = self.graph;
        let id = NI::new(node as usize);

        match self.orientation {
            Orientation::Natural => {
                visit_targets(
                    node,
                    graph.out_neighbors_with_values(id),
                    default_weight,
                    &mut visitor,
                );
            }
            Orientation::Reverse => {
                visit_targets(
                    node,
                    graph.in_neighbors_with_values(id),
                    default_weight,
                    &mut visitor,
                );
            }
            Orientation::Undirected => {
                if visit_targets(
                    node,
                    graph.out_neighbors_with_values(id),
                    default_weight,
                    &mut visitor,
                ) {
                    visit_targets(
                        node,
                        graph.in_neighbors_with_values(id),
                        default_weight,
                        &mut visitor,
                    );
                }
            }
        }
    }
}

/// A per-node property that may be absent for some nodes.
pub trait NodeProperty<T>: Sync {
    fn get(&self, node: u64) -> Option<T>;
}

impl<T: Copy + Sync> NodeProperty<T> for [Option<T>] {
    fn get(&self, node: u64) -> Option<T> {
        usize::try_from(node)
            .ok()
            .and_then(|node| <[Option<T>]>::get(self, node))
            .copied()
            .flatten()
    }
}

impl<T: Copy + Sync> NodeProperty<T> for Vec<Option<T>> {
    fn get(&self, node: u64) -> Option<T> {
        NodeProperty::get(self.as_slice(), node)
    }
}

/// Turns a closure into a [`NodeProperty`].
///
/// # Examples
///
/// ```
/// use graph_compute::prelude::*;
///
/// let even_nodes = FnProperty(|node: u64| (node % 2 == 0).then_some(node as i64));
/// assert_eq!(even_nodes.get(4), Some(4));
/// assert_eq!(even_nodes.get(5), None);
/// ```
#[derive(Copy, Clone, Debug)]
pub struct FnProperty<F>(pub F);

impl<T, F> NodeProperty<T> for FnProperty<F>
where
    F: Fn(u64) -> Option<T> + Sync,
{
    fn get(&self, node: u64) -> Option<T> {
        (self.0)(node)
    }
}
