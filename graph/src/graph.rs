use core::hash::Hash;

use smallvec::SmallVec;

/// This is an abstraction over graph-like structures used in the middle-end:
///
/// * The CFG of a function body, i.e. graph of basic blocks
/// * The dominator tree of a function, i.e. graph of dominator tree nodes
/// * etc...
///
/// Implementations are expected to be cheap, handle-like types: algorithms in this workspace clone
/// them freely, and never hold on to borrowed data from them across calls.
pub trait Graph {
    /// The type of node represented in the graph.
    ///
    /// Typically this should be a pointer-like reference type or an index, cheap to copy/clone.
    /// Nodes are compared by identity, never structurally.
    type Node: Clone + Eq + Hash;
    /// Type used to iterate over children of a node in the graph.
    type ChildIter: ExactSizeIterator<Item = Self::Node>;

    /// An empty graph has no nodes.
    #[inline]
    fn is_empty(&self) -> bool {
        self.size() == 0
    }
    /// Get the number of nodes in this graph
    fn size(&self) -> usize;
    /// Get the entry node of the graph.
    ///
    /// It is expected that a graph always has an entry. As such, this function will panic if
    /// called on an "empty" graph. You should check whether the graph is empty _first_, if you
    /// are working with a possibly-empty graph.
    fn entry_node(&self) -> Self::Node;
    /// Get an iterator over the children of `parent`
    fn children(&self, parent: Self::Node) -> Self::ChildIter;
    /// Returns true if `node` belongs to this graph instance.
    ///
    /// Used to validate that nodes handed to an analysis built over this graph were not taken
    /// from some other graph.
    #[inline]
    fn contains_node(&self, node: &Self::Node) -> bool {
        let _ = node;
        true
    }
}

impl<G: Graph> Graph for &G {
    type ChildIter = <G as Graph>::ChildIter;
    type Node = <G as Graph>::Node;

    fn is_empty(&self) -> bool {
        (**self).is_empty()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn entry_node(&self) -> Self::Node {
        (**self).entry_node()
    }

    fn children(&self, parent: Self::Node) -> Self::ChildIter {
        (**self).children(parent)
    }

    fn contains_node(&self, node: &Self::Node) -> bool {
        (**self).contains_node(node)
    }
}

/// An [InvertibleGraph] is a [Graph] which can be "inverted", i.e. edges are reversed.
///
/// Technically, any graph is invertible, however we are primarily interested in supporting graphs
/// for which an inversion of itself has some semantic value. For example, visiting a CFG in
/// reverse is useful in various contexts, such as constructing post-dominator trees.
///
/// This is primarily consumed via [Inverse].
pub trait InvertibleGraph: Graph {
    /// The type of iterator used to visit "inverted" children of a node in this graph, i.e.
    /// the predecessors.
    type InvertibleChildIter: ExactSizeIterator<Item = Self::Node>;

    /// Get an iterator over the predecessors of `parent`.
    ///
    /// NOTE: `parent` in this case will actually be a child of the nodes in the iterator, but we
    /// preserve the naming so as to make it apparent we are working with an inversion of the
    /// original graph.
    fn inverse_children(&self, parent: Self::Node) -> Self::InvertibleChildIter;
}

impl<G: InvertibleGraph> InvertibleGraph for &G {
    type InvertibleChildIter = <G as InvertibleGraph>::InvertibleChildIter;

    fn inverse_children(&self, parent: Self::Node) -> Self::InvertibleChildIter {
        (**self).inverse_children(parent)
    }
}

/// A [Graph] which can enumerate all of its nodes, not just those reachable from the entry.
pub trait GraphNodes: Graph {
    /// The type of iterator returned by [GraphNodes::nodes]
    type NodeIter: Iterator<Item = Self::Node>;

    /// Get an iterator over every node in the graph.
    ///
    /// The order must be stable for a given graph state, as some analyses use it to break ties.
    fn nodes(&self) -> Self::NodeIter;

    /// Get the number of edges in the graph
    fn num_edges(&self) -> usize {
        self.nodes().map(|node| self.children(node).len()).sum()
    }
}

impl<G: GraphNodes> GraphNodes for &G {
    type NodeIter = <G as GraphNodes>::NodeIter;

    fn nodes(&self) -> Self::NodeIter {
        (**self).nodes()
    }

    fn num_edges(&self) -> usize {
        (**self).num_edges()
    }
}

/// This is a wrapper type for [Graph] implementations, used to indicate that iterating a
/// graph should be iterated in "inverse" order, i.e. following predecessor edges.
///
/// No copy of the underlying graph is made: `Inverse<G>::children` simply forwards to
/// `G::inverse_children`, and vice versa, so `Inverse<Inverse<G>>` walks `G` in its original
/// direction.
#[derive(Clone, Copy, Debug)]
pub struct Inverse<G> {
    graph: G,
}

impl<G> Inverse<G> {
    /// Construct an inversion over `graph`
    #[inline]
    pub const fn new(graph: G) -> Self {
        Self { graph }
    }

    /// Get a reference to the underlying graph
    #[inline]
    pub const fn graph(&self) -> &G {
        &self.graph
    }

    /// Recover the original graph
    #[inline]
    pub fn into_inner(self) -> G {
        self.graph
    }
}

impl<G: InvertibleGraph> Graph for Inverse<G> {
    type ChildIter = <G as InvertibleGraph>::InvertibleChildIter;
    type Node = <G as Graph>::Node;

    fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    fn size(&self) -> usize {
        self.graph.size()
    }

    fn entry_node(&self) -> Self::Node {
        self.graph.entry_node()
    }

    fn children(&self, parent: Self::Node) -> Self::ChildIter {
        self.graph.inverse_children(parent)
    }

    fn contains_node(&self, node: &Self::Node) -> bool {
        self.graph.contains_node(node)
    }
}

impl<G: InvertibleGraph> InvertibleGraph for Inverse<G> {
    type InvertibleChildIter = <G as Graph>::ChildIter;

    fn inverse_children(&self, parent: Self::Node) -> Self::InvertibleChildIter {
        self.graph.children(parent)
    }
}

impl<G: InvertibleGraph + GraphNodes> GraphNodes for Inverse<G> {
    type NodeIter = <G as GraphNodes>::NodeIter;

    fn nodes(&self) -> Self::NodeIter {
        self.graph.nodes()
    }

    fn num_edges(&self) -> usize {
        self.graph.num_edges()
    }
}

/// Get the successors (or predecessors, if `INVERSE == true`) of `node` in `graph`.
///
/// Successors are returned in _reverse_ order, so that pushing them on a depth-first worklist
/// results in them being visited in their natural order. Predecessors are returned as-is.
pub fn get_children<G, const INVERSE: bool>(graph: &G, node: G::Node) -> SmallVec<[G::Node; 8]>
where
    G: InvertibleGraph,
{
    if INVERSE {
        graph.inverse_children(node).collect()
    } else {
        let mut children = graph.children(node).collect::<SmallVec<[G::Node; 8]>>();
        children.reverse();
        children
    }
}
