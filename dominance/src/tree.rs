use alloc::{
    rc::{Rc, Weak},
    vec::Vec,
};
use core::{
    cell::{Cell, RefCell},
    fmt,
    hash::{Hash, Hasher},
};

use pilc_graph::{
    CfgUpdate, DepthFirstIter, FxHashMap, Graph, Inverse, InvertibleGraph, PostOrderIter,
};
use smallvec::{SmallVec, smallvec};

use crate::{DominanceGraph, NodeOf, SemiNCA, verify};

/// The number of dominance queries answered by walking the tree, after which the DFS numbering of
/// the tree is recomputed, so that subsequent queries are answered in constant time.
const SLOW_QUERY_THRESHOLD: u32 = 32;

#[derive(Debug, thiserror::Error)]
pub enum DomTreeError {
    /// Tried to compute a dominator tree for a graph with no nodes
    #[error("unable to create dominance tree for empty graph")]
    EmptyGraph,
}

/// The level of verification to use with [DomTreeBase::verify_with]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DomTreeVerificationLevel {
    /// Checks basic tree structure and compares with a freshly constructed tree
    ///
    /// O(n^2) time worst case, but is faster in practice.
    Fast,
    /// Checks if the tree is correct, but compares it to a freshly constructed tree instead of
    /// checking the sibling property.
    ///
    /// O(n^2) time.
    Basic,
    /// Verifies if the tree is correct by making sure all the properties, including the parent
    /// and sibling property, hold.
    ///
    /// O(n^3) time.
    Full,
}

/// A forward dominance tree
pub type DominanceTree<G> = DomTreeBase<G, false>;

/// A post (backward) dominance tree
pub type PostDominanceTree<G> = DomTreeBase<G, true>;

pub type DomTreeRoots<N> = SmallVec<[N; 4]>;

/// Visits a dominator (sub)tree in pre-order, i.e. dominators before the nodes they dominate
pub type PreOrderDomTreeIter<N> = DepthFirstIter<DomSubtree<N>>;

/// Visits a dominator (sub)tree in post-order, i.e. dominated nodes before their dominators
pub type PostOrderDomTreeIter<N> = PostOrderIter<DomSubtree<N>>;

/// A dominator tree implementation that abstracts over the type of dominance it represents.
pub struct DomTreeBase<G: DominanceGraph, const IS_POST_DOM: bool> {
    /// The roots from which dominance is traced.
    ///
    /// For forward dominance trees, there is always a single root. For post-dominance trees, there
    /// may be multiple, one for each exit from the graph, plus one for each region of the graph
    /// from which no exit can be reached (e.g. an infinite loop). All of them are children of the
    /// virtual root node.
    roots: DomTreeRoots<NodeOf<G>>,
    /// The nodes represented in this dominance tree.
    ///
    /// The virtual root of a post-dominance tree is keyed by `None`.
    nodes: FxHashMap<Option<NodeOf<G>>, Rc<DomTreeNode<NodeOf<G>>>>,
    /// The root dominance tree node.
    root: Option<Rc<DomTreeNode<NodeOf<G>>>>,
    /// The graph for which this dominance tree was computed
    parent: G,
    /// Whether the DFS numbering of this tree is up to date
    valid: Cell<bool>,
    /// A counter for expensive queries that may cause us to perform some extra work in order to
    /// speed up those queries after a certain point.
    slow_queries: Cell<u32>,
}

/// A node in a [DomTreeBase].
pub struct DomTreeNode<N> {
    /// The block represented by this node, or `None` for the virtual root of a post-dominance tree
    block: Option<N>,
    /// The immediate dominator of this node, if applicable
    idom: RefCell<Weak<DomTreeNode<N>>>,
    /// The children of this node in the tree
    children: RefCell<SmallVec<[Rc<DomTreeNode<N>>; 4]>>,
    /// The depth of this node in the tree
    level: Cell<u32>,
    /// The DFS visitation order (forward)
    num_in: Cell<Option<u32>>,
    /// The DFS visitation order (backward)
    num_out: Cell<Option<u32>>,
}

impl<N: Copy> DomTreeNode<N> {
    /// Create a new node for `block`, with `idom` as its immediate dominator.
    ///
    /// NOTE: This does not insert the new node as a child of `idom`.
    pub fn new(block: Option<N>, idom: Option<&Rc<DomTreeNode<N>>>) -> Self {
        let (level, idom) = match idom {
            Some(idom) => (idom.level() + 1, Rc::downgrade(idom)),
            None => (0, Weak::new()),
        };
        Self {
            block,
            idom: RefCell::new(idom),
            children: Default::default(),
            level: Cell::new(level),
            num_in: Cell::new(None),
            num_out: Cell::new(None),
        }
    }

    /// The block this node represents, `None` if this is a virtual root
    #[inline]
    pub fn block(&self) -> Option<N> {
        self.block
    }

    #[inline]
    pub fn idom(&self) -> Option<Rc<DomTreeNode<N>>> {
        self.idom.borrow().upgrade()
    }

    #[inline]
    pub fn level(&self) -> u32 {
        self.level.get()
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.borrow().is_empty()
    }

    #[inline]
    pub fn num_children(&self) -> usize {
        self.children.borrow().len()
    }

    /// Get a snapshot of the children of this node
    pub fn children(&self) -> SmallVec<[Rc<DomTreeNode<N>>; 4]> {
        self.children.borrow().clone()
    }

    #[inline]
    pub fn dfs_num_in(&self) -> Option<u32> {
        self.num_in.get()
    }

    #[inline]
    pub fn dfs_num_out(&self) -> Option<u32> {
        self.num_out.get()
    }

    /// Returns true if `self` is dominated by `other`, using the DFS numbering of the tree.
    ///
    /// The numbering must be up to date, see [DomTreeBase::update_dfs_numbers].
    pub fn is_dominated_by(&self, other: &Self) -> bool {
        match (self.num_in.get(), self.num_out.get(), other.num_in.get(), other.num_out.get()) {
            (Some(a_in), Some(a_out), Some(b_in), Some(b_out)) => a_in >= b_in && a_out <= b_out,
            _ => panic!("dfs numbers are not valid"),
        }
    }

    /// Visit the subtree rooted at this node in pre-order
    pub fn preorder(self: &Rc<Self>) -> PreOrderDomTreeIter<N>
    where
        N: Eq + Hash,
    {
        DepthFirstIter::new(DomSubtree::new(Rc::clone(self)), Rc::clone(self))
    }

    /// Visit the subtree rooted at this node in post-order
    pub fn postorder(self: &Rc<Self>) -> PostOrderDomTreeIter<N>
    where
        N: Eq + Hash,
    {
        PostOrderIter::new(DomSubtree::new(Rc::clone(self)), Rc::clone(self))
    }

    pub(crate) fn add_child(&self, child: Rc<DomTreeNode<N>>) {
        self.children.borrow_mut().push(child);
    }

    /// Remove `child` from the children of this node, returning false if it was not a child.
    pub(crate) fn remove_child(&self, child: &Rc<DomTreeNode<N>>) -> bool {
        let mut children = self.children.borrow_mut();
        match children.iter().position(|c| Rc::ptr_eq(c, child)) {
            Some(index) => {
                children.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Make `new_idom` the immediate dominator of this node, updating the levels of this subtree.
    pub(crate) fn set_idom(self: &Rc<Self>, new_idom: &Rc<DomTreeNode<N>>) {
        if let Some(old_idom) = self.idom() {
            if Rc::ptr_eq(&old_idom, new_idom) {
                return;
            }
            let removed = old_idom.remove_child(self);
            assert!(removed, "not in immediate dominator children set");
        }

        new_idom.add_child(Rc::clone(self));
        *self.idom.borrow_mut() = Rc::downgrade(new_idom);

        self.update_level();
    }

    fn update_level(self: &Rc<Self>) {
        let Some(idom) = self.idom() else {
            return;
        };
        if self.level() == idom.level() + 1 {
            return;
        }

        let mut worklist: SmallVec<[Rc<DomTreeNode<N>>; 64]> = smallvec![Rc::clone(self)];
        while let Some(current) = worklist.pop() {
            let idom = current.idom().expect("expected node with a stale level to have an idom");
            current.level.set(idom.level() + 1);
            let level = current.level();
            for child in current.children.borrow().iter() {
                if child.level() != level + 1 {
                    worklist.push(Rc::clone(child));
                }
            }
        }
    }

    /// Returns true if `other` has the same level and the same set of child blocks as `self`
    fn is_same_as(&self, other: &Self) -> bool
    where
        N: Eq,
    {
        if self.level() != other.level() || self.num_children() != other.num_children() {
            return false;
        }
        let other_children = other.children.borrow();
        self.children.borrow().iter().all(|child| {
            other_children.iter().any(|other_child| other_child.block == child.block)
        })
    }
}

impl<N: Eq> Eq for DomTreeNode<N> {}
impl<N: Eq> PartialEq for DomTreeNode<N> {
    fn eq(&self, other: &Self) -> bool {
        self.block == other.block
    }
}

impl<N: Hash> Hash for DomTreeNode<N> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.block.hash(state);
    }
}

impl<N: fmt::Display> fmt::Display for DomTreeNode<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.block.as_ref() {
            Some(block) => write!(f, "{block}"),
            None => f.write_str("<virtual>"),
        }
    }
}

impl<N: Copy + fmt::Debug> fmt::Debug for DomTreeNode<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let children = self.children.borrow().iter().map(|child| child.block).collect::<Vec<_>>();
        f.debug_struct("DomTreeNode")
            .field("block", &self.block)
            .field("idom", &self.idom().map(|idom| idom.block))
            .field("children", &children)
            .field("level", &self.level.get())
            .field("num_in", &self.num_in.get())
            .field("num_out", &self.num_out.get())
            .finish()
    }
}

/// A view of the subtree rooted at some [DomTreeNode], as a [Graph] whose edges point from a
/// node to the nodes it immediately dominates.
#[derive(Clone)]
pub struct DomSubtree<N> {
    root: Rc<DomTreeNode<N>>,
}

impl<N> DomSubtree<N> {
    pub fn new(root: Rc<DomTreeNode<N>>) -> Self {
        Self { root }
    }
}

impl<N: Copy + Eq + Hash> Graph for DomSubtree<N> {
    type ChildIter = smallvec::IntoIter<[Rc<DomTreeNode<N>>; 4]>;
    type Node = Rc<DomTreeNode<N>>;

    fn size(&self) -> usize {
        let mut size = 0;
        let mut worklist: SmallVec<[Rc<DomTreeNode<N>>; 8]> = smallvec![Rc::clone(&self.root)];
        while let Some(node) = worklist.pop() {
            size += 1;
            worklist.extend(node.children.borrow().iter().cloned());
        }
        size
    }

    fn entry_node(&self) -> Self::Node {
        Rc::clone(&self.root)
    }

    fn children(&self, parent: Self::Node) -> Self::ChildIter {
        parent.children().into_iter()
    }
}

impl<G: DominanceGraph, const IS_POST_DOM: bool> DomTreeBase<G, IS_POST_DOM> {
    /// Compute the dominance tree of `graph`
    pub fn new(graph: G) -> Result<Self, DomTreeError> {
        if graph.is_empty() {
            return Err(DomTreeError::EmptyGraph);
        }

        let mut this = Self::empty(graph);
        SemiNCA::<G, IS_POST_DOM>::compute_from_scratch(&mut this, None);
        Ok(this)
    }

    /// Create an empty tree for `graph`, without computing anything.
    ///
    /// Use [Self::recalculate] to populate it.
    pub fn empty(graph: G) -> Self {
        Self {
            roots: Default::default(),
            nodes: Default::default(),
            root: None,
            parent: graph,
            valid: Cell::new(false),
            slow_queries: Cell::new(0),
        }
    }

    /// Recompute this tree from scratch for `graph`
    pub fn recalculate(&mut self, graph: G) {
        self.parent = graph;
        SemiNCA::<G, IS_POST_DOM>::compute_from_scratch(self, None);
    }

    /// Compute this tree for the state of `graph` prior to applying `updates`.
    ///
    /// The graph is expected to already reflect `updates`. Following this with
    /// [Self::apply_updates] on the same set of updates brings the tree up to date with `graph`.
    pub fn recalculate_with_updates(&mut self, graph: G, updates: &[CfgUpdate<NodeOf<G>>]) {
        self.parent = graph;
        SemiNCA::<G, IS_POST_DOM>::compute_with_updates(self, updates);
    }

    /// Clear all nodes and roots of this tree, leaving it empty
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.roots.clear();
        self.root = None;
        self.valid.set(false);
        self.slow_queries.set(0);
    }

    /// The graph this tree was computed for
    #[inline]
    pub fn parent(&self) -> &G {
        &self.parent
    }

    /// The number of nodes in this tree, including the virtual root of a post-dominance tree
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn roots(&self) -> &[NodeOf<G>] {
        &self.roots
    }

    #[inline]
    pub fn root_node(&self) -> Option<Rc<DomTreeNode<NodeOf<G>>>> {
        self.root.clone()
    }

    /// Returns true if this tree is a post-dominance tree.
    #[inline(always)]
    pub const fn is_post_dominator(&self) -> bool {
        IS_POST_DOM
    }

    /// Returns true if `node` is the virtual root of a post-dominance tree
    pub fn is_virtual_root(&self, node: &DomTreeNode<NodeOf<G>>) -> bool {
        IS_POST_DOM && node.block.is_none()
    }

    /// Returns true if the DFS numbering of this tree is up to date
    #[inline]
    pub fn has_valid_dfs_numbers(&self) -> bool {
        self.valid.get()
    }

    /// Get the node for `block`, if it is in the tree
    pub fn get(&self, block: NodeOf<G>) -> Option<Rc<DomTreeNode<NodeOf<G>>>> {
        debug_assert!(
            self.parent.contains_node(&block),
            "{block} does not belong to the graph of this dominance tree"
        );
        self.nodes.get(&Some(block)).cloned()
    }

    /// Get the node for `block`, where `None` refers to the virtual root of a post-dominance tree
    pub fn get_node(&self, block: Option<NodeOf<G>>) -> Option<Rc<DomTreeNode<NodeOf<G>>>> {
        self.nodes.get(&block).cloned()
    }

    /// Returns true if `block` is reachable from the root(s) of this tree.
    ///
    /// For post-dominance trees, this is true for every node in the graph.
    pub fn is_reachable_from_entry(&self, block: NodeOf<G>) -> bool {
        self.get(block).is_some()
    }

    /// Returns true if `a` dominates `b`.
    ///
    /// Note that every block dominates itself, and that any block dominates an unreachable one.
    pub fn dominates(&self, a: NodeOf<G>, b: NodeOf<G>) -> bool {
        if a == b {
            return true;
        }
        self.dominates_node(self.get(a).as_ref(), self.get(b).as_ref())
    }

    /// Returns true if `a` dominates `b`, and `a != b`
    pub fn properly_dominates(&self, a: NodeOf<G>, b: NodeOf<G>) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Returns true if the node `a` dominates the node `b`.
    ///
    /// A `None` node is considered unreachable.
    pub fn dominates_node(
        &self,
        a: Option<&Rc<DomTreeNode<NodeOf<G>>>>,
        b: Option<&Rc<DomTreeNode<NodeOf<G>>>>,
    ) -> bool {
        // An unreachable node is dominated by anything
        let Some(b) = b else {
            return true;
        };
        // And dominates nothing
        let Some(a) = a else {
            return false;
        };
        // A node trivially dominates itself
        if Rc::ptr_eq(a, b) {
            return true;
        }

        if b.idom().is_some_and(|idom| Rc::ptr_eq(&idom, a)) {
            return true;
        }

        if a.idom().is_some_and(|idom| Rc::ptr_eq(&idom, b)) {
            return false;
        }

        // A can only dominate B if it is higher in the tree
        if a.level() >= b.level() {
            return false;
        }

        if self.valid.get() {
            return b.is_dominated_by(a);
        }

        // If we end up with too many slow queries, just update the DFS numbers on the assumption
        // that we are going to keep querying
        self.slow_queries.set(self.slow_queries.get() + 1);
        if self.slow_queries.get() > SLOW_QUERY_THRESHOLD {
            self.update_dfs_numbers();
            return b.is_dominated_by(a);
        }

        self.dominated_by_slow_tree_walk(a, b)
    }

    /// Returns true if the node `a` dominates the node `b`, and they are not the same node
    pub fn properly_dominates_node(
        &self,
        a: Option<&Rc<DomTreeNode<NodeOf<G>>>>,
        b: Option<&Rc<DomTreeNode<NodeOf<G>>>>,
    ) -> bool {
        match (a, b) {
            (Some(a), Some(b)) if Rc::ptr_eq(a, b) => false,
            (None, None) => false,
            _ => self.dominates_node(a, b),
        }
    }

    /// Walk up the tree from `b`, stopping at the level of `a`. `a` dominates `b` only if we end
    /// up at `a`.
    fn dominated_by_slow_tree_walk(
        &self,
        a: &Rc<DomTreeNode<NodeOf<G>>>,
        b: &Rc<DomTreeNode<NodeOf<G>>>,
    ) -> bool {
        let a_level = a.level();
        let mut b = Rc::clone(b);
        while let Some(idom) = b.idom() {
            if idom.level() < a_level {
                break;
            }
            b = idom;
        }
        Rc::ptr_eq(&b, a)
    }

    /// Find the nearest block which dominates both `a` and `b`.
    ///
    /// Returns `None` if the only common dominator is the virtual root of a post-dominance tree.
    ///
    /// Also returns `None` if either block is unreachable, see [Self::is_reachable_from_entry].
    pub fn find_nearest_common_dominator(
        &self,
        a: NodeOf<G>,
        b: NodeOf<G>,
    ) -> Option<NodeOf<G>> {
        let a_node = self.get(a)?;
        let b_node = self.get(b)?;

        // If either A or B is the entry block, then it is the nearest common dominator
        if !IS_POST_DOM
            && let Some(&entry) = self.roots.first()
            && (a == entry || b == entry)
        {
            return Some(entry);
        }

        self.find_nearest_common_dominator_node(&a_node, &b_node).and_then(|ncd| ncd.block())
    }

    /// Find the nearest node which dominates both `a` and `b`.
    ///
    /// Unlike [Self::find_nearest_common_dominator], this returns the virtual root node of a
    /// post-dominance tree, if that is the nearest common dominator.
    pub fn find_nearest_common_dominator_node(
        &self,
        a: &Rc<DomTreeNode<NodeOf<G>>>,
        b: &Rc<DomTreeNode<NodeOf<G>>>,
    ) -> Option<Rc<DomTreeNode<NodeOf<G>>>> {
        let mut a = Rc::clone(a);
        let mut b = Rc::clone(b);

        // Use level information to go up the tree until the levels match. Then continue going up
        // until we arrive at the same node.
        while !Rc::ptr_eq(&a, &b) {
            if a.level() < b.level() {
                core::mem::swap(&mut a, &mut b);
            }
            a = a.idom()?;
        }

        Some(a)
    }

    /// Find the nearest block which dominates all of `blocks`.
    ///
    /// Returns `None` if `blocks` is empty, or if the only common dominator is the virtual root.
    pub fn find_nearest_common_dominator_of_all<I>(&self, blocks: I) -> Option<NodeOf<G>>
    where
        I: IntoIterator<Item = NodeOf<G>>,
    {
        let mut blocks = blocks.into_iter();
        let mut ncd = blocks.next()?;
        for block in blocks {
            ncd = self.find_nearest_common_dominator(ncd, block)?;
        }
        Some(ncd)
    }

    /// Get all blocks dominated by `block`, including `block` itself.
    ///
    /// Returns an empty set if `block` is unreachable.
    pub fn get_descendants(&self, block: NodeOf<G>) -> SmallVec<[NodeOf<G>; 8]> {
        match self.get(block) {
            Some(node) => node.preorder().filter_map(|node| node.block()).collect(),
            None => SmallVec::new(),
        }
    }

    /// Get the nodes of this tree (excluding any virtual root) in pre-order
    pub fn preorder(&self) -> Vec<Rc<DomTreeNode<NodeOf<G>>>> {
        match self.root.as_ref() {
            Some(root) => root.preorder().filter(|node| node.block.is_some()).collect(),
            None => Vec::new(),
        }
    }

    /// Get the nodes of this tree (excluding any virtual root) in post-order
    pub fn postorder(&self) -> Vec<Rc<DomTreeNode<NodeOf<G>>>> {
        match self.root.as_ref() {
            Some(root) => root.postorder().filter(|node| node.block.is_some()).collect(),
            None => Vec::new(),
        }
    }

    /// Get the nodes of this tree (excluding any virtual root) in reverse post-order
    pub fn reverse_postorder(&self) -> Vec<Rc<DomTreeNode<NodeOf<G>>>> {
        let mut nodes = self.postorder();
        nodes.reverse();
        nodes
    }

    /// Assign in and out numbers to the nodes of the tree while walking it in DFS order, so that
    /// dominance queries can be answered by comparing intervals.
    pub fn update_dfs_numbers(&self) {
        if self.valid.get() {
            self.slow_queries.set(0);
            return;
        }

        let Some(root) = self.root.as_ref() else {
            return;
        };

        // Both dominators and post-dominators have a single root node. In the case of
        // post-dominators, this node is the virtual root.
        let mut worklist: SmallVec<[(Rc<DomTreeNode<NodeOf<G>>>, usize); 32]> =
            smallvec![(Rc::clone(root), 0)];
        let mut dfs_num = 0u32;
        root.num_in.set(Some(dfs_num));
        dfs_num += 1;

        while let Some((node, next_child)) = worklist.last_mut() {
            let child = node.children.borrow().get(*next_child).cloned();
            match child {
                // If we visited all of the children of this node, "recurse" back up the stack,
                // setting the DFS out number.
                None => {
                    node.num_out.set(Some(dfs_num));
                    dfs_num += 1;
                    worklist.pop();
                }
                Some(child) => {
                    *next_child += 1;
                    child.num_in.set(Some(dfs_num));
                    dfs_num += 1;
                    worklist.push((child, 0));
                }
            }
        }

        self.slow_queries.set(0);
        self.valid.set(true);
    }

    /// Returns true if `other` has the same roots, the same nodes, and each node has the same
    /// level and children as its counterpart in `self`.
    pub fn is_same_as(&self, other: &Self) -> bool {
        if self.roots.len() != other.roots.len()
            || !self.roots.iter().all(|root| other.roots.contains(root))
        {
            return false;
        }

        if self.nodes.len() != other.nodes.len() {
            return false;
        }

        self.nodes.iter().all(|(block, node)| {
            other.nodes.get(block).is_some_and(|other_node| node.is_same_as(other_node))
        })
    }

    /// Inform the dominator tree about the insertion of the edge `from -> to` in the graph.
    ///
    /// The graph must already contain the edge.
    pub fn insert_edge(&mut self, from: NodeOf<G>, to: NodeOf<G>) {
        assert!(
            self.parent.contains_node(&from) && self.parent.contains_node(&to),
            "cannot update dominance with an edge ({from} -> {to}) from another graph"
        );

        if IS_POST_DOM {
            SemiNCA::<G, IS_POST_DOM>::insert_edge(self, None, to, from);
        } else {
            SemiNCA::<G, IS_POST_DOM>::insert_edge(self, None, from, to);
        }
    }

    /// Inform the dominator tree about the deletion of the edge `from -> to` from the graph.
    ///
    /// The edge must already be removed from the graph.
    pub fn delete_edge(&mut self, from: NodeOf<G>, to: NodeOf<G>) {
        assert!(
            self.parent.contains_node(&from) && self.parent.contains_node(&to),
            "cannot update dominance with an edge ({from} -> {to}) from another graph"
        );

        if IS_POST_DOM {
            SemiNCA::<G, IS_POST_DOM>::delete_edge(self, None, to, from);
        } else {
            SemiNCA::<G, IS_POST_DOM>::delete_edge(self, None, from, to);
        }
    }

    /// Inform the dominator tree about a batch of edge insertions and deletions.
    ///
    /// The graph must already reflect all of `updates`. Updates may be redundant, e.g. inserting
    /// and then deleting the same edge, in which case they cancel out.
    pub fn apply_updates(&mut self, updates: &[CfgUpdate<NodeOf<G>>]) {
        debug_assert!(
            updates.iter().all(|update| self.parent.contains_node(&update.from())
                && self.parent.contains_node(&update.to())),
            "cannot update dominance with edges from another graph"
        );
        SemiNCA::<G, IS_POST_DOM>::apply_updates(self, updates);
    }

    /// Add a new node to the tree for `block`, as a child of the node for `idom`.
    ///
    /// `idom` may be `None` to refer to the virtual root of a post-dominance tree.
    pub fn add_new_block(
        &mut self,
        block: NodeOf<G>,
        idom: Option<NodeOf<G>>,
    ) -> Rc<DomTreeNode<NodeOf<G>>> {
        assert!(self.get(block).is_none(), "{block} is already in the dominator tree");
        let idom = self.get_node(idom).expect("no immediate dominator specified for block");
        self.valid.set(false);
        self.create_node(Some(block), Some(idom))
    }

    /// Update the dominator tree so that `block` has `new_idom` as its immediate dominator.
    pub fn change_immediate_dominator(&mut self, block: NodeOf<G>, new_idom: Option<NodeOf<G>>) {
        let node = self.get(block).expect("cannot change the idom of a block not in the tree");
        let new_idom = self.get_node(new_idom).expect("new idom must be in the tree");
        self.change_immediate_dominator_node(&node, &new_idom);
    }

    pub fn change_immediate_dominator_node(
        &mut self,
        node: &Rc<DomTreeNode<NodeOf<G>>>,
        new_idom: &Rc<DomTreeNode<NodeOf<G>>>,
    ) {
        self.valid.set(false);
        node.set_idom(new_idom);
    }

    /// Remove `block` from the tree.
    ///
    /// The node for `block` must be a leaf of the tree.
    pub fn erase_node(&mut self, block: NodeOf<G>) {
        let node = self.get(block).expect("cannot erase a block that isn't in the dominator tree");
        assert!(node.is_leaf(), "{block} is not a leaf node");
        self.remove_node(&node);

        if IS_POST_DOM && let Some(index) = self.roots.iter().position(|root| root == &block) {
            self.roots.swap_remove(index);
        }
    }

    /// `block` has just been split from an existing block, as the single predecessor of that
    /// block's successor (its single successor in the inverse graph, for post-dominance).
    ///
    /// Update the tree to reflect the new block.
    pub fn split_block(&mut self, block: NodeOf<G>) {
        if IS_POST_DOM {
            self.split(Inverse::new(self.parent.clone()), block);
        } else {
            self.split(self.parent.clone(), block);
        }
    }

    fn split<H>(&mut self, graph: H, new_block: NodeOf<G>)
    where
        H: InvertibleGraph<Node = NodeOf<G>>,
    {
        let mut successors = graph.children(new_block);
        assert_eq!(successors.len(), 1, "{new_block} should have a single successor");
        let new_block_succ = successors.next().expect("expected a successor");

        let pred_blocks = graph.inverse_children(new_block).collect::<SmallVec<[_; 4]>>();
        assert!(!pred_blocks.is_empty(), "{new_block} has no predecessors");

        let new_block_dominates_succ = graph.inverse_children(new_block_succ).all(|pred| {
            pred == new_block
                || self.dominates(new_block_succ, pred)
                || !self.is_reachable_from_entry(pred)
        });

        // Find the immediate dominator of the new block. If none of its predecessors are
        // reachable, then the new block is itself unreachable, and nothing needs to change.
        let mut reachable_preds = pred_blocks.iter().filter_map(|pred| self.get(*pred));
        let Some(mut new_block_idom) = reachable_preds.next() else {
            return;
        };
        for pred in reachable_preds {
            new_block_idom = self
                .find_nearest_common_dominator_node(&new_block_idom, &pred)
                .expect("expected predecessors in the same tree to have a common dominator");
        }

        self.valid.set(false);
        let new_node = self.create_node(Some(new_block), Some(new_block_idom));

        // If the new block strictly dominates other blocks, then it is now the immediate dominator
        // of its successor.
        if new_block_dominates_succ && let Some(succ_node) = self.get(new_block_succ) {
            self.change_immediate_dominator_node(&succ_node, &new_node);
        }
    }

    /// Verify the correctness of this tree against its graph, using the most thorough checks
    pub fn verify(&self) -> bool {
        self.verify_with(DomTreeVerificationLevel::Full)
    }

    /// Verify the correctness of this tree against its graph.
    ///
    /// Problems are reported using `log::error!`, this function never panics on a malformed tree.
    pub fn verify_with(&self, level: DomTreeVerificationLevel) -> bool {
        verify::verify(self, level)
    }

    pub(crate) fn nodes(&self) -> impl Iterator<Item = &Rc<DomTreeNode<NodeOf<G>>>> + '_ {
        self.nodes.values()
    }

    pub(crate) fn roots_mut(&mut self) -> &mut DomTreeRoots<NodeOf<G>> {
        &mut self.roots
    }

    pub(crate) fn set_root_node(&mut self, root: Rc<DomTreeNode<NodeOf<G>>>) {
        self.root = Some(root);
    }

    #[inline]
    pub(crate) fn mark_invalid(&self) {
        self.valid.set(false);
    }

    /// Create a node for `block`, and attach it as a child of `idom`
    pub(crate) fn create_node(
        &mut self,
        block: Option<NodeOf<G>>,
        idom: Option<Rc<DomTreeNode<NodeOf<G>>>>,
    ) -> Rc<DomTreeNode<NodeOf<G>>> {
        let node = Rc::new(DomTreeNode::new(block, idom.as_ref()));
        if let Some(idom) = idom {
            idom.add_child(Rc::clone(&node));
        }
        self.nodes.insert(block, Rc::clone(&node));
        node
    }

    /// Detach `node` from its immediate dominator, and remove it from the tree
    pub(crate) fn remove_node(&mut self, node: &Rc<DomTreeNode<NodeOf<G>>>) {
        debug_assert!(node.is_leaf(), "only leaves can be removed from the tree");
        self.valid.set(false);

        if let Some(idom) = node.idom() {
            let removed = idom.remove_child(node);
            assert!(removed, "not in immediate dominator children set");
        }
        self.nodes.remove(&node.block);

        if self.root.as_ref().is_some_and(|root| Rc::ptr_eq(root, node)) {
            self.root = None;
            self.roots.clear();
        }
    }
}

impl<G: DominanceGraph> DomTreeBase<G, false> {
    /// The root block of a forward dominance tree
    #[inline]
    pub fn root(&self) -> Option<NodeOf<G>> {
        self.roots.first().copied()
    }

    /// Add a new node to the tree for `block`, making it the new root of the tree.
    ///
    /// The previous root, if any, becomes a child of the new root.
    pub fn set_new_root(&mut self, block: NodeOf<G>) -> Rc<DomTreeNode<NodeOf<G>>> {
        assert!(self.get(block).is_none(), "{block} is already in the dominator tree");
        self.valid.set(false);

        let new_root = self.create_node(Some(block), None);
        match self.root.take() {
            None => {
                self.roots.clear();
                self.roots.push(block);
            }
            Some(old_root) => {
                assert_eq!(self.roots.len(), 1);
                old_root.set_idom(&new_root);
                self.roots[0] = block;
            }
        }

        self.root = Some(Rc::clone(&new_root));
        new_root
    }
}

impl<G: DominanceGraph, const IS_POST_DOM: bool> Eq for DomTreeBase<G, IS_POST_DOM> {}
impl<G: DominanceGraph, const IS_POST_DOM: bool> PartialEq for DomTreeBase<G, IS_POST_DOM> {
    fn eq(&self, other: &Self) -> bool {
        self.is_same_as(other)
    }
}

impl<G: DominanceGraph, const IS_POST_DOM: bool> fmt::Display for DomTreeBase<G, IS_POST_DOM> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("=============================--------------------------------\n")?;
        if IS_POST_DOM {
            f.write_str("Inorder PostDominator Tree: ")?;
        } else {
            f.write_str("Inorder Dominator Tree: ")?;
        }
        if !self.valid.get() {
            write!(f, "DFSNumbers invalid: {} slow queries.", self.slow_queries.get())?;
        }
        f.write_str("\n")?;

        if let Some(root) = self.root.as_ref() {
            print_dom_tree(root, f)?;
        }

        f.write_str("Roots: ")?;
        for root in self.roots.iter() {
            write!(f, "{root} ")?;
        }
        f.write_str("\n")
    }
}

fn print_dom_tree<N>(root: &Rc<DomTreeNode<N>>, f: &mut fmt::Formatter<'_>) -> fmt::Result
where
    N: Copy + fmt::Display,
{
    let mut worklist: SmallVec<[(Rc<DomTreeNode<N>>, usize); 16]> = smallvec![(Rc::clone(root), 1)];
    while let Some((node, depth)) = worklist.pop() {
        write!(f, "{:indent$}[{level}] {node} {{", "", level = node.level(), indent = 2 * depth)?;
        match node.dfs_num_in() {
            Some(num) => write!(f, "{num},")?,
            None => f.write_str("?,")?,
        }
        match node.dfs_num_out() {
            Some(num) => writeln!(f, "{num}}}")?,
            None => f.write_str("?}\n")?,
        }
        let children = node.children.borrow();
        worklist.extend(children.iter().rev().map(|child| (Rc::clone(child), depth + 1)));
    }
    Ok(())
}

impl<G: DominanceGraph, const IS_POST_DOM: bool> fmt::Debug for DomTreeBase<G, IS_POST_DOM> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nodes = match self.root.as_ref() {
            Some(root) => root.preorder().collect::<Vec<_>>(),
            None => Vec::new(),
        };
        f.debug_struct("DomTreeBase")
            .field("valid", &self.valid.get())
            .field("slow_queries", &self.slow_queries.get())
            .field("root", &self.root.as_ref().map(|root| root.block))
            .field("roots", &self.roots)
            .field("nodes", &nodes)
            .finish()
    }
}

#[cfg(test)]
mod tests;
