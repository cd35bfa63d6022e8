use alloc::collections::VecDeque;
use core::{hash::Hash, ops::ControlFlow};

use smallvec::SmallVec;

use crate::{FxHashSet, Graph, Inverse, InvertibleGraph};

/// By implementing this trait, you can refine the traversal performed by [LazyDfsVisitor], as well
/// as hook in custom behavior to be executed upon reaching a node in both pre-order and post-order
/// visits.
///
/// There are two callbacks, both with default implementations that align with the default
/// semantics of a depth-first traversal.
///
/// If you wish to prune the search, the best place to do so is [GraphVisitor::on_node_reached],
/// as it provides the opportunity to control whether or not the visitor will visit any of the
/// node's successors as well as emit the node during iteration.
#[allow(unused_variables)]
pub trait GraphVisitor {
    type Node;

    /// Called when a node is first reached during a depth-first traversal, i.e. pre-order
    ///
    /// If this function returns `ControlFlow::Break`, none of `node`'s successors will be visited,
    /// and `node` will not be emitted by the visitor. This can be used to prune the traversal,
    /// e.g. confining a visit to a specific loop in a CFG.
    fn on_node_reached(&mut self, from: Option<&Self::Node>, node: &Self::Node) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    /// Called when all successors of a node have been visited by the depth-first traversal, i.e.
    /// post-order.
    fn on_node_visited(&mut self, node: &Self::Node) {}
}

/// A useful no-op visitor for when you want the default behavior.
pub struct DefaultGraphVisitor<T>(core::marker::PhantomData<T>);
impl<T> Default for DefaultGraphVisitor<T> {
    fn default() -> Self {
        Self(core::marker::PhantomData)
    }
}
impl<T> GraphVisitor for DefaultGraphVisitor<T> {
    type Node = T;
}

/// The set of nodes considered visited by a traversal.
///
/// Traversals own their set by default. Passing `&mut set` instead lets several traversals share
/// one set, so that nodes visited by an earlier traversal are skipped by later ones, e.g. when
/// computing a depth-first forest over disconnected regions of a graph.
pub trait VisitedSet<T> {
    /// Mark `node` visited, returning true if it was not already
    fn insert(&mut self, node: T) -> bool;
    fn contains(&self, node: &T) -> bool;
}

impl<T: Hash + Eq> VisitedSet<T> for FxHashSet<T> {
    #[inline]
    fn insert(&mut self, node: T) -> bool {
        FxHashSet::insert(self, node)
    }

    #[inline]
    fn contains(&self, node: &T) -> bool {
        FxHashSet::contains(self, node)
    }
}

impl<T, S: VisitedSet<T>> VisitedSet<T> for &mut S {
    #[inline]
    fn insert(&mut self, node: T) -> bool {
        (**self).insert(node)
    }

    #[inline]
    fn contains(&self, node: &T) -> bool {
        (**self).contains(node)
    }
}

/// A basic iterator over a depth-first traversal of nodes in a graph, producing them in pre-order.
///
/// In addition to iteration, the traversal can be steered while it is in progress: see
/// [DepthFirstIter::skip_children], and inspected, see [DepthFirstIter::path_len].
#[repr(transparent)]
pub struct DepthFirstIter<G, S = FxHashSet<<G as Graph>::Node>>(
    LazyDfsVisitor<G, DefaultGraphVisitor<<G as Graph>::Node>, S>,
)
where
    G: Graph;

impl<G: Graph> DepthFirstIter<G> {
    /// Visit all nodes of `graph` reachable from `root` in pre-order
    pub fn new(graph: G, root: <G as Graph>::Node) -> Self {
        Self::with_visited(graph, root, FxHashSet::default())
    }
}

impl<G, S> DepthFirstIter<G, S>
where
    G: Graph,
    S: VisitedSet<<G as Graph>::Node>,
{
    /// Visit all nodes of `graph` reachable from `root` in pre-order, treating the nodes in
    /// `visited` as already visited, skipping them (and their successors) during the traversal.
    pub fn with_visited(graph: G, root: <G as Graph>::Node, visited: S) -> Self {
        Self(LazyDfsVisitor::new_with_visited(graph, root, DefaultGraphVisitor::default(), visited))
    }

    /// Do not visit the children of the node most recently produced by this iterator
    #[inline]
    pub fn skip_children(&mut self) {
        self.0.skip_children();
    }

    /// The number of nodes on the path from the traversal root to the node most recently produced
    /// by this iterator, both included.
    #[inline]
    pub fn path_len(&self) -> usize {
        self.0.path_len()
    }

    /// Get the `index`th node on the current path, where `0` is the traversal root
    #[inline]
    pub fn path_at(&self, index: usize) -> Option<&<G as Graph>::Node> {
        self.0.path_at(index)
    }
}

impl<G, S> core::iter::FusedIterator for DepthFirstIter<G, S>
where
    G: Graph,
    S: VisitedSet<<G as Graph>::Node>,
{
}
impl<G, S> Iterator for DepthFirstIter<G, S>
where
    G: Graph,
    S: VisitedSet<<G as Graph>::Node>,
{
    type Item = <G as Graph>::Node;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.0.next::<false>()
    }
}

/// A basic iterator over a depth-first traversal of nodes in a graph, producing them in post-order.
#[repr(transparent)]
pub struct PostOrderIter<G, S = FxHashSet<<G as Graph>::Node>>(
    LazyDfsVisitor<G, DefaultGraphVisitor<<G as Graph>::Node>, S>,
)
where
    G: Graph;

impl<G: Graph> PostOrderIter<G> {
    /// Visit all nodes of `graph` reachable from `root` in post-order
    #[inline]
    pub fn new(graph: G, root: <G as Graph>::Node) -> Self {
        Self::with_visited(graph, root, FxHashSet::default())
    }
}

impl<G, S> PostOrderIter<G, S>
where
    G: Graph,
    S: VisitedSet<<G as Graph>::Node>,
{
    /// Visit all nodes of `graph` reachable from `root` in post-order, treating the nodes in
    /// `visited` as already visited, skipping them (and their successors) during the traversal.
    pub fn with_visited(graph: G, root: <G as Graph>::Node, visited: S) -> Self {
        Self(LazyDfsVisitor::new_with_visited(graph, root, DefaultGraphVisitor::default(), visited))
    }
}

impl<G, S> core::iter::FusedIterator for PostOrderIter<G, S>
where
    G: Graph,
    S: VisitedSet<<G as Graph>::Node>,
{
}
impl<G, S> Iterator for PostOrderIter<G, S>
where
    G: Graph,
    S: VisitedSet<<G as Graph>::Node>,
{
    type Item = <G as Graph>::Node;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.0.next::<true>()
    }
}

/// This type is an iterator over a depth-first traversal of a graph, with customization hooks
/// provided via the [GraphVisitor] trait.
///
/// The order in which nodes are produced by the iterator depends on how you invoke the `next`
/// method - it must be instantiated with a constant boolean that indicates whether or not the
/// iteration is to produce nodes in post-order.
///
/// As a result, this type does not implement `Iterator` itself - it is meant to be consumed as
/// an internal detail of higher-level iterator types. Two such types are provided in this module
/// for common pre- and post-order iterations:
///
/// * [DepthFirstIter], for iterating in pre-order
/// * [PostOrderIter], for iterating in post-order
///
/// Successors of a node are visited in the order the graph returns them.
pub struct LazyDfsVisitor<G: Graph, V, S = FxHashSet<<G as Graph>::Node>> {
    graph: G,
    /// The nodes we have already visited, or wish to consider visited
    visited: S,
    /// The stack of discovered nodes currently being visited
    stack: SmallVec<[VisitNode<<G as Graph>::Node>; 8]>,
    /// A [GraphVisitor] implementation used to hook into the traversal machinery
    visitor: V,
}

/// Represents a node in the graph which has been reached during traversal, and is in the process of
/// being visited.
struct VisitNode<T> {
    /// The parent node in the graph from which this node was derived
    parent: Option<T>,
    /// The node in the underlying graph being visited
    node: T,
    /// The successors of this node which remain to be visited, in reverse order
    successors: SmallVec<[T; 2]>,
    /// Set to `true` once this node has been handled by [GraphVisitor::on_node_reached]
    reached: bool,
}

impl<T: Clone> VisitNode<T> {
    fn new<G>(graph: &G, parent: Option<T>, node: T) -> Self
    where
        G: Graph<Node = T>,
    {
        let mut successors = SmallVec::from_iter(graph.children(node.clone()));
        successors.reverse();
        Self {
            parent,
            node,
            successors,
            reached: false,
        }
    }
}

impl<G, V> LazyDfsVisitor<G, V>
where
    G: Graph,
    V: GraphVisitor<Node = <G as Graph>::Node>,
{
    /// Visit the graph rooted under `from`, using the provided visitor for customization hooks.
    pub fn new(graph: G, from: <G as Graph>::Node, visitor: V) -> Self {
        Self::new_with_visited(graph, from, visitor, FxHashSet::default())
    }
}

impl<G, V, S> LazyDfsVisitor<G, V, S>
where
    G: Graph,
    V: GraphVisitor<Node = <G as Graph>::Node>,
    S: VisitedSet<<G as Graph>::Node>,
{
    /// Visit the graph rooted under `from`, using the provided visitor for customization hooks.
    ///
    /// Any node already in `visited` (and its children) will be skipped during iteration and by
    /// the traversal itself. If `from` is in this set, then the resulting iterator will be empty
    /// (i.e. produce no nodes, and perform no traversal).
    pub fn new_with_visited(graph: G, from: <G as Graph>::Node, visitor: V, visited: S) -> Self {
        let mut stack = SmallVec::new();
        if !visited.contains(&from) {
            stack.push(VisitNode::new(&graph, None, from));
        }
        Self {
            graph,
            visited,
            stack,
            visitor,
        }
    }

    #[inline]
    pub fn visitor(&self) -> &V {
        &self.visitor
    }

    #[inline]
    pub fn visitor_mut(&mut self) -> &mut V {
        &mut self.visitor
    }

    /// Stop the traversal, returning the visitor and the set of visited nodes
    pub fn into_parts(self) -> (V, S) {
        (self.visitor, self.visited)
    }

    /// Drop the unvisited successors of the node on top of the visit stack.
    ///
    /// When iterating in pre-order, this is the node most recently produced.
    pub fn skip_children(&mut self) {
        if let Some(node) = self.stack.last_mut() {
            node.successors.clear();
        }
    }

    /// The length of the current path from the traversal root
    #[inline]
    pub fn path_len(&self) -> usize {
        self.stack.len()
    }

    /// Get the `index`th node on the current path from the traversal root
    #[inline]
    pub fn path_at(&self, index: usize) -> Option<&<G as Graph>::Node> {
        self.stack.get(index).map(|visit| &visit.node)
    }

    /// Step the visitor forward one step.
    ///
    /// The semantics of a step depend on the value of `POSTORDER`:
    ///
    /// * If `POSTORDER == true`, then we resume traversal of the graph until the next node that
    ///   has had all of its successors visited is on top of the visit stack.
    /// * If `POSTORDER == false`, then we resume traversal of the graph until the next unvisited
    ///   node is reached for the first time.
    ///
    /// In both cases, the node we find by the search is what is returned. If no more nodes remain
    /// to be visited, this returns `None`.
    ///
    /// This function invokes the associated [GraphVisitor] callbacks during the traversal, at the
    /// appropriate time.
    #[allow(clippy::should_implement_trait)]
    pub fn next<const POSTORDER: bool>(&mut self) -> Option<<G as Graph>::Node> {
        loop {
            let Some(node) = self.stack.last_mut() else {
                break None;
            };

            if !node.reached {
                node.reached = true;
                let unvisited = self.visited.insert(node.node.clone());
                if !unvisited {
                    self.stack.pop();
                    continue;
                }

                // Handle pre-order visit
                let should_visit =
                    self.visitor.on_node_reached(node.parent.as_ref(), &node.node).is_continue();
                if !should_visit {
                    // It was indicated we shouldn't visit this node, so move to the next
                    self.stack.pop();
                    continue;
                }

                if POSTORDER {
                    // We need to visit this node's successors first
                    continue;
                } else {
                    // We're going to visit this node's successors on the next call
                    break Some(node.node.clone());
                }
            }

            // Otherwise, we're visiting a successor of this node.
            //
            // If we've visited all successors of this node, we've got our next item
            let Some(successor) = node.successors.pop() else {
                let visited = self.stack.pop().expect("visit stack cannot be empty here");
                self.visitor.on_node_visited(&visited.node);
                if POSTORDER {
                    break Some(visited.node);
                } else {
                    continue;
                }
            };

            // Skip successors we already know about, without allocating a frame for them
            if self.visited.contains(&successor) {
                continue;
            }

            let parent = node.node.clone();
            let visit = VisitNode::new(&self.graph, Some(parent), successor);
            self.stack.push(visit);
        }
    }
}

/// An iterator over a breadth-first traversal of nodes in a graph.
///
/// Each node is produced once, and [BreadthFirstIter::level] reports its distance (in edges) from
/// the traversal root.
pub struct BreadthFirstIter<G: Graph, S = FxHashSet<<G as Graph>::Node>> {
    graph: G,
    visited: S,
    queue: VecDeque<(<G as Graph>::Node, u32)>,
    level: u32,
}

impl<G: Graph> BreadthFirstIter<G> {
    pub fn new(graph: G, root: <G as Graph>::Node) -> Self {
        Self::with_visited(graph, root, FxHashSet::default())
    }
}

impl<G, S> BreadthFirstIter<G, S>
where
    G: Graph,
    S: VisitedSet<<G as Graph>::Node>,
{
    pub fn with_visited(graph: G, root: <G as Graph>::Node, mut visited: S) -> Self {
        let mut queue = VecDeque::new();
        if visited.insert(root.clone()) {
            queue.push_back((root, 0));
        }
        Self {
            graph,
            visited,
            queue,
            level: 0,
        }
    }

    /// The level of the node most recently produced by this iterator, where the root is at level 0
    #[inline]
    pub fn level(&self) -> u32 {
        self.level
    }
}

impl<G, S> core::iter::FusedIterator for BreadthFirstIter<G, S>
where
    G: Graph,
    S: VisitedSet<<G as Graph>::Node>,
{
}
impl<G, S> Iterator for BreadthFirstIter<G, S>
where
    G: Graph,
    S: VisitedSet<<G as Graph>::Node>,
{
    type Item = <G as Graph>::Node;

    fn next(&mut self) -> Option<Self::Item> {
        let (node, level) = self.queue.pop_front()?;
        self.level = level;
        for child in self.graph.children(node.clone()) {
            if self.visited.insert(child.clone()) {
                self.queue.push_back((child, level + 1));
            }
        }
        Some(node)
    }
}

/// Visit `graph` depth-first from its entry, in pre-order
pub fn depth_first<G: Graph>(graph: G) -> DepthFirstIter<G> {
    let entry = graph.entry_node();
    DepthFirstIter::new(graph, entry)
}

/// Visit `graph` depth-first from its entry, in pre-order, skipping and recording nodes in the
/// externally-owned `visited` set.
pub fn depth_first_with_visited<G, S>(graph: G, visited: &mut S) -> DepthFirstIter<G, &mut S>
where
    G: Graph,
    S: VisitedSet<<G as Graph>::Node>,
{
    let entry = graph.entry_node();
    DepthFirstIter::with_visited(graph, entry, visited)
}

/// Visit the predecessors of `root` in `graph` depth-first, in pre-order
pub fn inverse_depth_first<G: InvertibleGraph>(
    graph: G,
    root: <G as Graph>::Node,
) -> DepthFirstIter<Inverse<G>> {
    DepthFirstIter::new(Inverse::new(graph), root)
}

/// Visit `graph` depth-first from its entry, in post-order
pub fn post_order<G: Graph>(graph: G) -> PostOrderIter<G> {
    let entry = graph.entry_node();
    PostOrderIter::new(graph, entry)
}

/// Visit `graph` breadth-first from its entry
pub fn breadth_first<G: Graph>(graph: G) -> BreadthFirstIter<G> {
    let entry = graph.entry_node();
    BreadthFirstIter::new(graph, entry)
}
