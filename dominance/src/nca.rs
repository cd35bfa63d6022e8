//! The Semi-NCA algorithm for computing dominator trees, and the Depth-Based Search algorithm for
//! keeping them up to date incrementally.
//!
//! The implementation closely follows the papers listed in the crate documentation, i.e.:
//!
//! * Construction runs a DFS over the graph, computes semidominators in reverse preorder using an
//!   `eval` with path compression, and then derives each immediate dominator as the nearest common
//!   ancestor of its semidominator and its DFS tree parent.
//! * Insertion of an edge `from -> to` finds the nearest common dominator of both endpoints, and
//!   visits the nodes affected by the insertion in the order of their depth in the tree.
//! * Deletion of an edge rebuilds the subtree affected by the deletion, either in place (if `to`
//!   remains reachable) or after removing the now unreachable part of the tree.
//!
//! Post-dominance trees have a virtual root, which is the parent of every root, and represents a
//! single exit for the graph. A post-dominance tree has a root for every node without successors,
//! and for some node of every region of the graph from which no such node can be reached.
use alloc::collections::{BTreeMap, BinaryHeap};
use alloc::rc::Rc;
use core::{
    cell::{Cell, RefCell},
    cmp::Ordering,
};

use pilc_graph::{
    CfgDiff, CfgUpdate, CfgUpdateKind, FxHashMap, FxHashSet, GraphDiff, get_children,
};
use smallvec::{SmallVec, smallvec};

use crate::{DomTreeBase, DomTreeNode, DomTreeRoots, DominanceGraph, NodeOf};

/// Trees of at most this many nodes are recalculated from scratch when a batch of updates is
/// larger than the tree itself.
const SMALL_TREE_THRESHOLD: usize = 100;

/// For larger trees, a batch of updates is applied by recalculating the tree when it contains more
/// than `1 / BATCH_RECALCULATION_RATIO` updates per node.
const BATCH_RECALCULATION_RATIO: usize = 40;

/// Information about a batch of updates to apply to a dominator tree.
pub struct BatchUpdateInfo<N, const IS_POST_DOM: bool> {
    /// A view of the graph as it was before the updates in the batch, which is advanced towards
    /// the current state of the graph one update at a time.
    pub pre_cfg_view: RefCell<CfgDiff<N, IS_POST_DOM>>,
    /// A view of the graph after the updates in the batch, used when recalculating from scratch.
    ///
    /// When `None`, the underlying graph is used.
    pub post_cfg_view: Option<CfgDiff<N, IS_POST_DOM>>,
    /// The number of legalized updates in the batch
    pub num_legalized: usize,
    /// Remembers if the whole tree was recalculated at some point during the current batch update
    pub is_recalculated: Cell<bool>,
}

impl<N, const IS_POST_DOM: bool> BatchUpdateInfo<N, IS_POST_DOM>
where
    N: Copy + Eq + core::hash::Hash + core::fmt::Debug,
{
    pub fn new(
        pre_cfg_view: CfgDiff<N, IS_POST_DOM>,
        post_cfg_view: Option<CfgDiff<N, IS_POST_DOM>>,
    ) -> Self {
        let num_legalized = pre_cfg_view.num_legalized_updates();
        Self {
            pre_cfg_view: RefCell::new(pre_cfg_view),
            post_cfg_view,
            num_legalized,
            is_recalculated: Cell::new(false),
        }
    }
}

/// Per-node state of a DFS walk and the semidominator computation
struct NodeInfo<N> {
    /// Preorder number of the node, or 0 if unvisited
    num: Cell<u32>,
    /// Preorder number of the parent of the node in the DFS tree
    parent: Cell<u32>,
    semi: Cell<u32>,
    label: Cell<u32>,
    idom: Cell<Option<N>>,
    /// The preorder numbers of every node from which this node was reached during the DFS
    reverse_children: SmallVec<[u32; 4]>,
}

impl<N> Default for NodeInfo<N> {
    fn default() -> Self {
        Self {
            num: Cell::new(0),
            parent: Cell::new(0),
            semi: Cell::new(0),
            label: Cell::new(0),
            idom: Cell::new(None),
            reverse_children: Default::default(),
        }
    }
}

/// A tree node ordered by its level in the tree, used to visit the nodes affected by an insertion
/// in order of decreasing depth.
struct InsertionInfoItem<N>(Rc<DomTreeNode<N>>);

impl<N: Copy> Eq for InsertionInfoItem<N> {}
impl<N: Copy> PartialEq for InsertionInfoItem<N> {
    fn eq(&self, other: &Self) -> bool {
        self.0.level() == other.0.level()
    }
}
impl<N: Copy> PartialOrd for InsertionInfoItem<N> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<N: Copy> Ord for InsertionInfoItem<N> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.level().cmp(&other.0.level())
    }
}

/// [SemiNCA] implements the Semi-NCA algorithm for computing the dominator tree of a graph, and
/// the incremental update algorithms built on top of it.
pub struct SemiNCA<'a, G: DominanceGraph, const IS_POST_DOM: bool> {
    graph: G,
    /// Number to node mapping is 1-based. Index 0 is unused, and index 1 is the virtual root of a
    /// post-dominance tree, represented by `None`.
    num_to_node: SmallVec<[Option<NodeOf<G>>; 64]>,
    node_infos: FxHashMap<Option<NodeOf<G>>, NodeInfo<NodeOf<G>>>,
    /// The snapshot of the graph to use, when applying a batch of updates
    batch_updates: Option<&'a BatchUpdateInfo<NodeOf<G>, IS_POST_DOM>>,
}

impl<'a, G: DominanceGraph, const IS_POST_DOM: bool> SemiNCA<'a, G, IS_POST_DOM> {
    pub fn new(
        graph: G,
        batch_updates: Option<&'a BatchUpdateInfo<NodeOf<G>, IS_POST_DOM>>,
    ) -> Self {
        Self {
            graph,
            num_to_node: smallvec![None],
            node_infos: Default::default(),
            batch_updates,
        }
    }

    pub fn clear(&mut self) {
        self.num_to_node.clear();
        self.num_to_node.push(None);
        self.node_infos.clear();
    }

    /// The preorder number of `block`, or 0 if it has not been visited
    pub fn num(&self, block: Option<NodeOf<G>>) -> u32 {
        self.node_infos.get(&block).map(|info| info.num.get()).unwrap_or(0)
    }

    /// The nodes visited so far, in preorder
    pub fn visited(&self) -> impl Iterator<Item = NodeOf<G>> + '_ {
        self.num_to_node.iter().flatten().copied()
    }

    /// The computed immediate dominator of `block`
    fn idom(&self, block: Option<NodeOf<G>>) -> Option<NodeOf<G>> {
        self.node_infos.get(&block).and_then(|info| info.idom.get())
    }

    fn get_children<const INVERSED: bool>(&self, node: NodeOf<G>) -> SmallVec<[NodeOf<G>; 8]> {
        children_of::<G, INVERSED, IS_POST_DOM>(&self.graph, node, self.batch_updates)
    }

    fn has_forward_successors(&self, node: NodeOf<G>) -> bool {
        !self.get_children::<false>(node).is_empty()
    }

    /// Add the virtual root of a post-dominance tree, which must be the first node visited
    pub fn add_virtual_root(&mut self) {
        assert!(IS_POST_DOM, "only post-dominance trees have a virtual root");
        assert_eq!(self.num_to_node.len(), 1, "the virtual root must be the first node visited");

        let info = self.node_infos.entry(None).or_default();
        info.num.set(1);
        info.semi.set(1);
        info.label.set(1);

        self.num_to_node.push(None);
    }

    /// Run a DFS walk from `v`, numbering each node visited in preorder, starting with
    /// `last_num + 1`, and returning the last number assigned.
    ///
    /// The walk follows successors (predecessors for post-dominance), unless `REVERSE` is set, in
    /// which case the direction is flipped. An edge `from -> to` is only followed when
    /// `condition(from, to)` is true. The parent of `v` in the DFS tree is `attach_to_num`.
    ///
    /// If `succ_order` is given, the children of each node are visited in the order it assigns
    /// to them, rather than the order in which they appear in the graph.
    pub fn run_dfs<const REVERSE: bool, C>(
        &mut self,
        v: NodeOf<G>,
        mut last_num: u32,
        mut condition: C,
        attach_to_num: u32,
        succ_order: Option<&BTreeMap<NodeOf<G>, u32>>,
    ) -> u32
    where
        C: FnMut(NodeOf<G>, NodeOf<G>) -> bool,
    {
        let mut worklist: SmallVec<[(NodeOf<G>, u32); 64]> = smallvec![(v, attach_to_num)];

        while let Some((block, parent_num)) = worklist.pop() {
            let block_info = self.node_infos.entry(Some(block)).or_default();
            block_info.reverse_children.push(parent_num);

            // Visited nodes always have positive DFS numbers
            if block_info.num.get() != 0 {
                continue;
            }

            last_num += 1;
            block_info.parent.set(parent_num);
            block_info.num.set(last_num);
            block_info.semi.set(last_num);
            block_info.label.set(last_num);
            self.num_to_node.push(Some(block));

            let mut successors = if REVERSE != IS_POST_DOM {
                self.get_children::<true>(block)
            } else {
                self.get_children::<false>(block)
            };
            if let Some(succ_order) = succ_order
                && successors.len() > 1
            {
                successors.sort_by_key(|succ| succ_order.get(succ).copied().unwrap_or_default());
            }

            for succ in successors {
                if condition(block, succ) {
                    worklist.push((succ, last_num));
                }
            }
        }

        last_num
    }

    /// Compute the immediate dominators of all nodes visited by [Self::run_dfs]
    pub fn run(&mut self) {
        let next_num = self.num_to_node.len();
        let mut num_to_info: SmallVec<[Option<&NodeInfo<NodeOf<G>>>; 64]> =
            SmallVec::with_capacity(next_num);
        num_to_info.push(None);

        // Initialize idoms to spanning tree parents
        for i in 1..next_num {
            let v = self.num_to_node[i];
            let v_info = self.node_infos.get(&v).expect("expected visited node to have info");
            v_info.idom.set(self.num_to_node[v_info.parent.get() as usize]);
            num_to_info.push(Some(v_info));
        }

        // Step 1: Calculate the semidominators of all vertices
        let mut eval_stack = SmallVec::<[&NodeInfo<NodeOf<G>>; 32]>::default();
        for i in (2..next_num).rev() {
            let w_info = info(&num_to_info, i as u32);

            // Initialize the semidominator to point to the parent node.
            w_info.semi.set(w_info.parent.get());
            for &n in w_info.reverse_children.iter() {
                let semi_u = info(
                    &num_to_info,
                    eval(n, i as u32 + 1, &mut eval_stack, &num_to_info),
                )
                .semi
                .get();
                if semi_u < w_info.semi.get() {
                    w_info.semi.set(semi_u);
                }
            }
        }

        // Step 2: Explicitly define the immediate dominator of each vertex.
        //
        //     IDom[i] = NCA(SDom[i], SpanningTreeParent(i))
        //
        // Note that the parents were stored in idoms, and later got invalidated during path
        // compression in `eval`.
        for i in 2..next_num {
            let w_info = info(&num_to_info, i as u32);
            let semi_num = w_info.semi.get();
            assert_ne!(semi_num, 0, "expected semidominator to be computed");
            let sdom_num = info(&num_to_info, semi_num).num.get();
            let mut w_idom_candidate = w_info.idom.get();
            loop {
                let candidate_num = self.num(w_idom_candidate);
                if candidate_num <= sdom_num {
                    break;
                }
                w_idom_candidate = self.idom(w_idom_candidate);
            }

            w_info.idom.set(w_idom_candidate);
        }
    }

    /// Walk the graph from the root(s) of `tree`, as given by [DomTreeBase::roots].
    pub fn do_full_dfs_walk<C>(&mut self, tree: &DomTreeBase<G, IS_POST_DOM>, mut condition: C)
    where
        C: FnMut(NodeOf<G>, NodeOf<G>) -> bool,
    {
        if !IS_POST_DOM {
            assert!(tree.roots().len() <= 1, "dominators should have a single root");
            if let Some(&root) = tree.roots().first() {
                self.run_dfs::<false, _>(root, 0, condition, 0, None);
            }
            return;
        }

        self.add_virtual_root();
        let mut num = 1;
        for &root in tree.roots() {
            num = self.run_dfs::<false, _>(root, num, &mut condition, 1, None);
        }
    }

    /// Attach the nodes visited by the last DFS walk, none of which are in `tree` yet (except the
    /// root of the walk), as a subtree of `attach_to`.
    pub fn attach_new_subtree(
        &mut self,
        tree: &mut DomTreeBase<G, IS_POST_DOM>,
        attach_to: &Rc<DomTreeNode<NodeOf<G>>>,
    ) {
        // Attach the first unreachable block to `attach_to`
        let first = self.num_to_node[1];
        self.node_infos.entry(first).or_default().idom.set(attach_to.block());

        // Loop over all of the discovered blocks
        for i in 1..self.num_to_node.len() {
            let w = self.num_to_node[i];
            if tree.get_node(w).is_some() {
                continue;
            }

            let idom = self.idom(w);
            let idom_node = self.node_for_block(idom, tree);
            log::trace!(
                target: "dominance",
                "attaching {} to {idom_node}",
                w.expect("only the virtual root has no block")
            );
            tree.create_node(w, Some(idom_node));
        }
    }

    /// Update the immediate dominators of the nodes visited by the last DFS walk, all of which
    /// are already in `tree`, and reattach the subtree to `attach_to`.
    pub fn reattach_existing_subtree(
        &mut self,
        tree: &mut DomTreeBase<G, IS_POST_DOM>,
        attach_to: &Rc<DomTreeNode<NodeOf<G>>>,
    ) {
        let first = self.num_to_node[1];
        self.node_infos.entry(first).or_default().idom.set(attach_to.block());

        for i in 1..self.num_to_node.len() {
            let block = self.num_to_node[i];
            let node = tree.get_node(block).expect("expected node to be in the tree");
            let new_idom = tree
                .get_node(self.idom(block))
                .expect("expected new immediate dominator to be in the tree");
            node.set_idom(&new_idom);
        }
    }

    /// Get the tree node for `block`, creating it (and its dominators) if necessary
    fn node_for_block(
        &self,
        block: Option<NodeOf<G>>,
        tree: &mut DomTreeBase<G, IS_POST_DOM>,
    ) -> Rc<DomTreeNode<NodeOf<G>>> {
        let mut pending = SmallVec::<[Option<NodeOf<G>>; 8]>::default();
        let mut current = block;
        let mut idom_node = loop {
            if let Some(node) = tree.get_node(current) {
                break node;
            }
            assert!(current.is_some(), "expected idom or virtual node");
            pending.push(current);
            current = self.idom(current);
        };

        // Create nodes from the top down, so that each has its immediate dominator in place
        while let Some(block) = pending.pop() {
            idom_node = tree.create_node(block, Some(idom_node));
        }

        idom_node
    }

    /// Compute a tie-breaking order for the successors of nodes not visited so far, based on the
    /// position of each successor in [pilc_graph::GraphNodes::nodes].
    fn compute_succ_order(&self) -> BTreeMap<NodeOf<G>, u32> {
        let mut succ_order = BTreeMap::default();
        for node in self.graph.nodes() {
            if self.num(Some(node)) == 0 {
                for succ in self.get_children::<false>(node) {
                    succ_order.insert(succ, 0);
                }
            }
        }

        // Add mapping for all entries of `succ_order`
        for (node_num, node) in self.graph.nodes().enumerate() {
            if let Some(order) = succ_order.get_mut(&node) {
                *order = node_num as u32 + 1;
            }
        }

        succ_order
    }
}

/// Tree construction and incremental updates
impl<G: DominanceGraph, const IS_POST_DOM: bool> SemiNCA<'_, G, IS_POST_DOM> {
    /// Compute `tree` from scratch, replacing its current contents
    pub fn compute_from_scratch(
        tree: &mut DomTreeBase<G, IS_POST_DOM>,
        bui: Option<&BatchUpdateInfo<NodeOf<G>, IS_POST_DOM>>,
    ) {
        tree.reset();

        // If the update is using the actual graph, `bui` is `None`. If it is using a view, `bui`
        // is `Some`, and the pre-update view is used. When calculating from scratch, make the
        // pre-update view equal to the post-update view, so the post-update view is used.
        let post_view_bui = bui.filter(|bui| {
            let Some(post_view) = bui.post_cfg_view.as_ref() else {
                return false;
            };
            *bui.pre_cfg_view.borrow_mut() = post_view.clone();
            true
        });

        if let Some(bui) = bui {
            bui.is_recalculated.set(true);
            log::debug!(target: "dominance", "dominator tree recalculated, skipping future batch updates");
        }

        let graph = tree.parent().clone();
        if graph.is_empty() {
            return;
        }

        let roots = Self::find_roots(tree, post_view_bui);
        *tree.roots_mut() = roots;

        // This is rebuilding the whole tree, not incrementally, but `post_view_bui` is used in
        // case the caller needs the tree for a view of the graph.
        let mut snca = SemiNCA::new(graph, post_view_bui);
        snca.do_full_dfs_walk(tree, |_, _| true);
        snca.run();

        if tree.roots().is_empty() {
            return;
        }

        // Add a node for the root. If the tree is a post-dominance tree, it will be the virtual
        // exit, which post-dominates all real exits (including multiple exit blocks, infinite
        // loops).
        let root = if IS_POST_DOM { None } else { Some(tree.roots()[0]) };
        let root_node = tree.create_node(root, None);
        tree.set_root_node(Rc::clone(&root_node));
        snca.attach_new_subtree(tree, &root_node);
    }

    /// Compute `tree` for the state of its graph before `updates` were applied to it
    pub fn compute_with_updates(
        tree: &mut DomTreeBase<G, IS_POST_DOM>,
        updates: &[CfgUpdate<NodeOf<G>>],
    ) {
        let post_view_cfg = CfgDiff::<NodeOf<G>, IS_POST_DOM>::new(updates.iter().copied(), true);
        let bui = BatchUpdateInfo::new(CfgDiff::default(), Some(post_view_cfg));
        Self::compute_from_scratch(tree, Some(&bui));
    }

    /// Find the roots of `tree` in its graph (or the view of it in `bui`).
    ///
    /// For forward dominance this is simply the entry node. For post-dominance, it is every node
    /// without successors, plus one node of each region from which none of those can be reached.
    pub fn find_roots(
        tree: &DomTreeBase<G, IS_POST_DOM>,
        bui: Option<&BatchUpdateInfo<NodeOf<G>, IS_POST_DOM>>,
    ) -> DomTreeRoots<NodeOf<G>> {
        let graph = tree.parent();
        let mut roots = DomTreeRoots::default();

        // For dominators, the entry node is always a tree root node
        if !IS_POST_DOM {
            if !graph.is_empty() {
                roots.push(graph.entry_node());
            }
            return roots;
        }

        let mut snca = SemiNCA::new(graph.clone(), bui);

        // Post-dominance trees always have a virtual root
        snca.add_virtual_root();
        let mut num = 1;

        log::trace!(target: "dominance", "looking for trivial roots");

        // Step 1: Find all the trivial roots that are going to definitely remain tree roots
        let mut total = 0u32;
        for node in graph.nodes() {
            total += 1;
            // If it has no successors, it is definitely a root
            if !snca.has_forward_successors(node) {
                roots.push(node);
                // Run DFS not to walk this part of the graph later
                num = snca.run_dfs::<false, _>(node, num, |_, _| true, 1, None);
                log::trace!(target: "dominance", "found a new trivial root: {node}");
            }
        }

        log::trace!(target: "dominance", "looking for non-trivial roots");

        // Step 2: Find all non-trivial root candidates.
        //
        // Those are nodes that are reverse-unreachable, and were not visited by the previous DFS
        // walks, i.e. nodes in infinite loops.
        let mut has_non_trivial_roots = false;
        // Accounting for the virtual exit, see if we had any reverse-unreachable nodes
        if total + 1 != num {
            has_non_trivial_roots = true;

            // The successor order makes the choice of the furthest away node, and with it the
            // whole tree, independent of the order in which successors appear in the graph. It
            // is computed lazily, and only covers successors of reverse-unreachable nodes.
            let mut succ_order = None;

            // Make another DFS pass over all other nodes to find the reverse-unreachable blocks,
            // and find the furthest paths we'll be able to make.
            //
            // Note that this looks N^2, but it's really 2N worst case, if every node is
            // unreachable. This is because we are still going to only visit each unreachable node
            // once, we may just visit it in two directions, depending on how lucky we get.
            for node in graph.nodes() {
                if snca.num(Some(node)) != 0 {
                    continue;
                }

                log::trace!(target: "dominance", "visiting node {node}");

                // Find the furthest away we can get by following successors, then follow them in
                // reverse. This gives us some reasonable answer about the post-dom tree inside
                // any infinite loop. In particular, it guarantees we get to the farthest away
                // point along some path.
                let succ_order: &BTreeMap<_, _> =
                    succ_order.get_or_insert_with(|| snca.compute_succ_order());
                let new_num = snca.run_dfs::<true, _>(node, num, |_, _| true, num, Some(succ_order));
                let furthest_away = snca.num_to_node[new_num as usize]
                    .expect("expected forward walk to visit a real node");
                log::trace!(
                    target: "dominance",
                    "found a new furthest away node (non-trivial root): {furthest_away}"
                );
                roots.push(furthest_away);

                // Forget the forward walk
                for _ in num..new_num {
                    let block = snca.num_to_node.pop().expect("expected visited node");
                    snca.node_infos.remove(&block);
                }

                let prev_num = num;
                num = snca.run_dfs::<false, _>(furthest_away, num, |_, _| true, 1, None);
                for i in (prev_num + 1)..=num {
                    if let Some(block) = snca.num_to_node[i as usize] {
                        log::trace!(target: "dominance", "found visited node {block}");
                    }
                }
            }
        }

        assert_eq!(total + 1, num, "everything should have been visited");

        // Step 3: If we found some non-trivial roots, make them non-redundant
        if has_non_trivial_roots {
            Self::remove_redundant_roots(graph, bui, &mut roots);
        }

        log::trace!(target: "dominance", "found roots: {roots:?}");

        roots
    }

    /// Remove non-trivial roots which can reach another root by following successors.
    ///
    /// Such a root is already post-dominated through the root it reaches.
    fn remove_redundant_roots(
        graph: &G,
        bui: Option<&BatchUpdateInfo<NodeOf<G>, IS_POST_DOM>>,
        roots: &mut DomTreeRoots<NodeOf<G>>,
    ) {
        assert!(IS_POST_DOM, "this function is only for post-dominators");

        let mut snca = SemiNCA::new(graph.clone(), bui);
        let mut index = 0;
        while index < roots.len() {
            let root = roots[index];
            // Trivial roots are never redundant
            if !snca.has_forward_successors(root) {
                index += 1;
                continue;
            }

            snca.clear();
            let num = snca.run_dfs::<true, _>(root, 0, |_, _| true, 0, None);
            let redundant = (2..=num).any(|i| {
                snca.num_to_node[i as usize].is_some_and(|block| roots.contains(&block))
            });

            if redundant {
                log::trace!(target: "dominance", "forward DFS walk from {root} found another root, removing it");
                roots.swap_remove(index);
            } else {
                index += 1;
            }
        }
    }

    pub fn insert_edge(
        tree: &mut DomTreeBase<G, IS_POST_DOM>,
        bui: Option<&BatchUpdateInfo<NodeOf<G>, IS_POST_DOM>>,
        from: NodeOf<G>,
        to: NodeOf<G>,
    ) {
        log::trace!(target: "dominance", "inserting edge {from} -> {to}");

        // An unpopulated tree is computed from scratch, which accounts for the new edge
        if tree.root_node().is_none() {
            Self::compute_from_scratch(tree, bui);
            return;
        }

        let from_node = match tree.get(from) {
            Some(node) => node,
            // Ignore edges from unreachable nodes for (forward) dominators
            None if !IS_POST_DOM => return,
            None => {
                // The unreachable node becomes a new root, with a tree node of its own
                let virtual_root =
                    tree.get_node(None).expect("post-dominance trees always have a virtual root");
                let node = tree.create_node(Some(from), Some(virtual_root));
                tree.roots_mut().push(from);
                node
            }
        };

        tree.mark_invalid();

        match tree.get(to) {
            None => Self::insert_unreachable(tree, bui, &from_node, to),
            Some(to_node) => Self::insert_reachable(tree, bui, &from_node, &to_node),
        }
    }

    /// Handle the insertion of an edge to a node which was not reachable before
    fn insert_unreachable(
        tree: &mut DomTreeBase<G, IS_POST_DOM>,
        bui: Option<&BatchUpdateInfo<NodeOf<G>, IS_POST_DOM>>,
        from: &Rc<DomTreeNode<NodeOf<G>>>,
        to: NodeOf<G>,
    ) {
        log::trace!(target: "dominance", "inserting {from} -> {to} (unreachable)");

        // Collect discovered edges to already reachable nodes
        let mut discovered_edges_to_reachable = SmallVec::<[(NodeOf<G>, NodeOf<G>); 8]>::default();

        // Discover and connect nodes that became reachable with the insertion
        Self::compute_unreachable_dominators(tree, bui, to, from, &mut discovered_edges_to_reachable);

        // Use the discovered edges and insert discovered connecting (incoming) edges
        for (edge_from, edge_to) in discovered_edges_to_reachable {
            log::trace!(target: "dominance", "inserting discovered connecting edge {edge_from} -> {edge_to}");
            let (Some(from_node), Some(to_node)) = (tree.get(edge_from), tree.get(edge_to)) else {
                continue;
            };
            Self::insert_reachable(tree, bui, &from_node, &to_node);
        }
    }

    /// Connect the nodes that became reachable through `root` to the tree, under `incoming`.
    ///
    /// Edges from the newly reachable region to nodes already in the tree are collected in
    /// `discovered_connecting_edges`.
    fn compute_unreachable_dominators(
        tree: &mut DomTreeBase<G, IS_POST_DOM>,
        bui: Option<&BatchUpdateInfo<NodeOf<G>, IS_POST_DOM>>,
        root: NodeOf<G>,
        incoming: &Rc<DomTreeNode<NodeOf<G>>>,
        discovered_connecting_edges: &mut SmallVec<[(NodeOf<G>, NodeOf<G>); 8]>,
    ) {
        assert!(tree.get(root).is_none(), "root must not be reachable");

        let mut snca = SemiNCA::new(tree.parent().clone(), bui);
        // Visit only previously unreachable nodes
        snca.run_dfs::<false, _>(
            root,
            0,
            |from, to| {
                if tree.get(to).is_none() {
                    return true;
                }
                discovered_connecting_edges.push((from, to));
                false
            },
            0,
            None,
        );
        snca.run();
        snca.attach_new_subtree(tree, incoming);

        log::trace!(target: "dominance", "after adding unreachable nodes");
    }

    /// Handle the insertion of an edge between two reachable nodes
    fn insert_reachable(
        tree: &mut DomTreeBase<G, IS_POST_DOM>,
        bui: Option<&BatchUpdateInfo<NodeOf<G>, IS_POST_DOM>>,
        from: &Rc<DomTreeNode<NodeOf<G>>>,
        to: &Rc<DomTreeNode<NodeOf<G>>>,
    ) {
        log::trace!(target: "dominance", "reachable {from} -> {to}");

        if IS_POST_DOM && Self::update_roots_before_insertion(tree, bui, to) {
            return;
        }

        // The nearest common dominator may be the virtual root of a post-dominance tree
        let ncd = tree
            .find_nearest_common_dominator_node(from, to)
            .expect("expected reachable nodes to have a common dominator");
        log::trace!(target: "dominance", "nearest common dominator: {ncd}");

        // Based on Lemma 2.5 from [2], after insertion of (from, to), v is affected iff
        // depth(ncd) + 1 < depth(v) && a path P from `to` to v exists where every w on P s.t.
        // depth(v) <= depth(w)
        //
        // This reduces to a widest path problem (maximizing the depth of the minimum vertex in
        // the path) which can be solved by a modified version of Dijkstra with a bucket queue
        // (named depth-based search in [2]).
        //
        // `to` is in the path, so depth(ncd) + 1 < depth(v) <= depth(to). Nothing affected if
        // this does not hold.
        let ncd_level = ncd.level();
        if ncd_level + 1 >= to.level() {
            // The root set may still have changed, e.g. when `from` was a root that has just
            // gained a successor
            if IS_POST_DOM {
                Self::update_roots_after_update(tree, bui);
            }
            return;
        }

        let mut bucket = BinaryHeap::<InsertionInfoItem<NodeOf<G>>>::default();
        let mut visited = FxHashSet::<Option<NodeOf<G>>>::default();
        let mut affected = SmallVec::<[Rc<DomTreeNode<NodeOf<G>>>; 8]>::default();
        let mut unaffected_on_current_level = SmallVec::<[Rc<DomTreeNode<NodeOf<G>>>; 8]>::default();

        bucket.push(InsertionInfoItem(Rc::clone(to)));
        visited.insert(to.block());

        while let Some(InsertionInfoItem(mut node)) = bucket.pop() {
            affected.push(Rc::clone(&node));

            let current_level = node.level();
            log::trace!(target: "dominance", "mark {node} as affected, current level: {current_level}");

            loop {
                // Unlike regular Dijkstra, we have an inner loop to expand more vertices. The
                // first iteration is for the (affected) vertex popped from the bucket queue. The
                // rest of the iterations are for the unaffected vertices with a level greater
                // than the current one.
                let block = node.block().expect("the virtual root cannot be affected by an insertion");
                for succ in children_of::<G, IS_POST_DOM, IS_POST_DOM>(tree.parent(), block, bui) {
                    let succ_node = tree
                        .get(succ)
                        .expect("unreachable successor found at reachable insertion");
                    let succ_level = succ_node.level();
                    log::trace!(target: "dominance", "successor {succ}, level = {succ_level}");

                    // There is an optimal path from `to` to `succ` with the minimum depth being
                    // `current_level`. If `succ` is not affected, there is no need to visit it.
                    if succ_level <= ncd_level + 1 || !visited.insert(Some(succ)) {
                        continue;
                    }

                    if succ_level > current_level {
                        // `succ` is unaffected, but it may (transitively) dominate an affected
                        // node.
                        log::trace!(target: "dominance", "marking visited not affected {succ}");
                        unaffected_on_current_level.push(succ_node);
                    } else {
                        // The condition is satisfied (Lemma 2.5 from [2]), so `succ` is affected.
                        log::trace!(target: "dominance", "add {succ} to a bucket");
                        bucket.push(InsertionInfoItem(succ_node));
                    }
                }

                match unaffected_on_current_level.pop() {
                    Some(next) => {
                        node = next;
                        log::trace!(target: "dominance", "next: {node}");
                    }
                    None => break,
                }
            }
        }

        // Finish by updating immediate dominators and levels
        Self::update_insertion(tree, bui, &ncd, &affected);
    }

    fn update_insertion(
        tree: &mut DomTreeBase<G, IS_POST_DOM>,
        bui: Option<&BatchUpdateInfo<NodeOf<G>, IS_POST_DOM>>,
        ncd: &Rc<DomTreeNode<NodeOf<G>>>,
        affected: &[Rc<DomTreeNode<NodeOf<G>>>],
    ) {
        log::trace!(target: "dominance", "updating ncd = {ncd}");

        for node in affected {
            log::trace!(target: "dominance", "idom({node}) = {ncd}");
            node.set_idom(ncd);
        }

        if IS_POST_DOM {
            Self::update_roots_after_update(tree, bui);
        }
    }

    pub fn delete_edge(
        tree: &mut DomTreeBase<G, IS_POST_DOM>,
        bui: Option<&BatchUpdateInfo<NodeOf<G>, IS_POST_DOM>>,
        from: NodeOf<G>,
        to: NodeOf<G>,
    ) {
        // Ensure that the edge was in fact deleted from the graph before informing the tree
        debug_assert!(
            !children_of::<G, IS_POST_DOM, IS_POST_DOM>(tree.parent(), from, bui).contains(&to),
            "deleted edge {from} -> {to} still exists in the graph"
        );

        log::trace!(target: "dominance", "deleting edge {from} -> {to}");

        // Deletion in an unreachable subtree, nothing to do
        let Some(from_node) = tree.get(from) else {
            return;
        };

        let Some(to_node) = tree.get(to) else {
            log::trace!(target: "dominance", "to ({to}) already unreachable, nothing to delete");
            return;
        };

        let ncd = tree.find_nearest_common_dominator_node(&from_node, &to_node);

        // If `to` dominates `from`, nothing to do
        if !ncd.is_some_and(|ncd| Rc::ptr_eq(&ncd, &to_node)) {
            tree.mark_invalid();

            let to_idom = to_node.idom();
            log::trace!(
                target: "dominance",
                "to idom: {:?}",
                to_idom.as_ref().and_then(|idom| idom.block())
            );

            // `to` remains reachable after deletion (based on the caption under figure 4 from [2])
            if !to_idom.is_some_and(|idom| Rc::ptr_eq(&idom, &from_node))
                || Self::has_proper_support(tree, bui, &to_node)
            {
                Self::delete_reachable(tree, bui, &from_node, &to_node);
            } else {
                Self::delete_unreachable(tree, bui, &to_node);
            }
        }

        if IS_POST_DOM {
            Self::update_roots_after_update(tree, bui);
        }
    }

    /// Handle the deletion of an edge after which `to` is still reachable
    fn delete_reachable(
        tree: &mut DomTreeBase<G, IS_POST_DOM>,
        bui: Option<&BatchUpdateInfo<NodeOf<G>, IS_POST_DOM>>,
        from: &Rc<DomTreeNode<NodeOf<G>>>,
        to: &Rc<DomTreeNode<NodeOf<G>>>,
    ) {
        log::trace!(target: "dominance", "deleting reachable {from} -> {to}");

        // Find the top of the subtree that needs to be rebuilt (based on the lemma 2.6 from [2])
        let to_idom = tree
            .find_nearest_common_dominator_node(from, to)
            .expect("expected reachable nodes to have a common dominator");
        let prev_idom_subtree = to_idom.idom();

        // Top of the subtree to rebuild is the root node. Rebuild the tree from scratch.
        let Some(prev_idom_subtree) = prev_idom_subtree else {
            log::trace!(target: "dominance", "the entire tree needs to be rebuilt");
            Self::compute_from_scratch(tree, bui);
            return;
        };

        // Only visit nodes in the subtree starting at `to_idom`
        let level = to_idom.level();
        let to_idom_block = to_idom.block().expect("only the virtual root has no block");
        let mut snca = SemiNCA::new(tree.parent().clone(), bui);
        snca.run_dfs::<false, _>(
            to_idom_block,
            0,
            |_, to| tree.get(to).is_some_and(|node| node.level() > level),
            0,
            None,
        );

        log::trace!(target: "dominance", "running Semi-NCA");
        snca.run();
        snca.reattach_existing_subtree(tree, &prev_idom_subtree);
    }

    /// Returns true if `node` has a predecessor (successor for post-dominance) in the tree which
    /// it does not dominate, i.e. if it is reachable other than through its immediate dominator.
    fn has_proper_support(
        tree: &DomTreeBase<G, IS_POST_DOM>,
        bui: Option<&BatchUpdateInfo<NodeOf<G>, IS_POST_DOM>>,
        node: &Rc<DomTreeNode<NodeOf<G>>>,
    ) -> bool {
        log::trace!(target: "dominance", "is {node} supported?");

        let block = node.block().expect("the virtual root is always supported");
        let preds = if IS_POST_DOM {
            children_of::<G, false, IS_POST_DOM>(tree.parent(), block, bui)
        } else {
            children_of::<G, true, IS_POST_DOM>(tree.parent(), block, bui)
        };

        for pred in preds {
            let Some(pred_node) = tree.get(pred) else {
                continue;
            };

            let support = tree.find_nearest_common_dominator_node(node, &pred_node);
            if !support.is_some_and(|support| Rc::ptr_eq(&support, node)) {
                log::trace!(target: "dominance", "{block} is reachable from support {pred}");
                return true;
            }
        }

        false
    }

    /// Handle the deletion of an edge which makes `to` unreachable
    fn delete_unreachable(
        tree: &mut DomTreeBase<G, IS_POST_DOM>,
        bui: Option<&BatchUpdateInfo<NodeOf<G>, IS_POST_DOM>>,
        to: &Rc<DomTreeNode<NodeOf<G>>>,
    ) {
        log::trace!(target: "dominance", "deleting unreachable subtree {to}");

        let to_block = to.block().expect("cannot disconnect the virtual root");

        if IS_POST_DOM {
            // Deletion makes a region reverse-unreachable and creates a new root.
            //
            // Simulate that by inserting an edge from the virtual root to `to` and adding it as
            // a new root.
            log::trace!(target: "dominance", "deletion made a region reverse-unreachable, adding new root {to_block}");
            tree.roots_mut().push(to_block);
            let virtual_root =
                tree.get_node(None).expect("post-dominance trees always have a virtual root");
            Self::insert_reachable(tree, bui, &virtual_root, to);
            return;
        }

        let mut affected_queue = SmallVec::<[NodeOf<G>; 16]>::default();
        let level = to.level();

        // Traverse the descendants of `to` with a greater level in the tree, and collect the
        // nodes visited.
        let mut snca = SemiNCA::new(tree.parent().clone(), bui);
        let last_dfs_num = snca.run_dfs::<false, _>(
            to_block,
            0,
            |_, succ| {
                let succ_node = tree.get(succ).expect("expected successor to be in the tree");
                if succ_node.level() > level {
                    return true;
                }
                if !affected_queue.contains(&succ) {
                    affected_queue.push(succ);
                }
                false
            },
            0,
            None,
        );

        // Identify the top of the subtree to rebuild by finding the NCD of all the affected nodes
        let mut min_node = Rc::clone(to);
        for block in affected_queue {
            let node = tree.get(block).expect("expected affected node to be in the tree");
            let ncd = tree
                .find_nearest_common_dominator_node(&node, to)
                .expect("expected reachable nodes to have a common dominator");
            log::trace!(target: "dominance", "processing affected node {node} with ncd = {ncd}, min node = {min_node}");
            if !Rc::ptr_eq(&ncd, &node) && ncd.level() < min_node.level() {
                min_node = ncd;
            }
        }

        // Root reached, rebuild the whole tree from scratch
        let Some(prev_idom) = min_node.idom() else {
            log::trace!(target: "dominance", "the entire tree needs to be rebuilt");
            Self::compute_from_scratch(tree, bui);
            return;
        };

        // Erase the unreachable subtree in reverse preorder to process all children before
        // deleting their parent.
        for i in (1..=last_dfs_num as usize).rev() {
            let block = snca.num_to_node[i];
            log::trace!(
                target: "dominance",
                "erasing node {}",
                block.expect("expected a real node")
            );
            let node = tree.get_node(block).expect("expected node to be in the tree");
            tree.remove_node(&node);
        }

        // The affected subtree starts at the `to` node, there's no extra work to do
        if Rc::ptr_eq(&min_node, to) {
            return;
        }

        log::trace!(target: "dominance", "delete_unreachable: running dfs with min node {min_node}");
        let min_level = min_node.level();
        let min_block = min_node.block().expect("the virtual root is never affected");
        snca.clear();

        // Identify nodes that remain in the affected subtree
        snca.run_dfs::<false, _>(
            min_block,
            0,
            |_, to| tree.get(to).is_some_and(|node| node.level() > min_level),
            0,
            None,
        );

        log::trace!(target: "dominance", "previous idom(min node) = {prev_idom}");
        log::trace!(target: "dominance", "running Semi-NCA");

        // Rebuild the remaining part of affected subtree
        snca.run();
        snca.reattach_existing_subtree(tree, &prev_idom);
    }

    /// Recalculate `tree` if `to` was a root of a post-dominance tree, which is about to gain a
    /// successor through the insertion of an edge.
    ///
    /// Returns true if the tree was recalculated.
    fn update_roots_before_insertion(
        tree: &mut DomTreeBase<G, IS_POST_DOM>,
        bui: Option<&BatchUpdateInfo<NodeOf<G>, IS_POST_DOM>>,
        to: &Rc<DomTreeNode<NodeOf<G>>>,
    ) -> bool {
        assert!(IS_POST_DOM, "this function is only for post-dominators");

        // Destination node is not attached to the virtual root, so it cannot be a root
        if !to.idom().is_some_and(|idom| tree.is_virtual_root(&idom)) {
            return false;
        }

        // `to` is not a root, nothing to update
        let Some(to_block) = to.block() else {
            return false;
        };
        if !tree.roots().contains(&to_block) {
            return false;
        }

        log::trace!(target: "dominance", "after the insertion, {to_block} is no longer a root, rebuilding the tree");
        Self::compute_from_scratch(tree, bui);
        true
    }

    /// Update the set of roots of a post-dominance tree after an update.
    ///
    /// The incremental algorithm does not know about, or use, the set of roots, and can make an
    /// implicit decision about which node within an infinite loop becomes a root which differs
    /// from the one that [Self::find_roots] makes. When that happens, the tree is recalculated.
    fn update_roots_after_update(
        tree: &mut DomTreeBase<G, IS_POST_DOM>,
        bui: Option<&BatchUpdateInfo<NodeOf<G>, IS_POST_DOM>>,
    ) {
        assert!(IS_POST_DOM, "this function is only for post-dominators");

        // The tree has only trivial roots, nothing to update
        let graph = tree.parent();
        let has_non_trivial_roots = tree.roots().iter().any(|&root| {
            !children_of::<G, false, IS_POST_DOM>(graph, root, bui).is_empty()
        });
        if !has_non_trivial_roots {
            return;
        }

        // Recalculate the set of roots
        let roots = Self::find_roots(tree, bui);
        if !is_permutation(tree.roots(), &roots) {
            log::trace!(
                target: "dominance",
                "roots are different in updated trees, the entire tree needs to be rebuilt"
            );
            Self::compute_from_scratch(tree, bui);
        }
    }

    /// Apply a batch of `updates` to `tree`, which must already be reflected in its graph.
    pub fn apply_updates(
        tree: &mut DomTreeBase<G, IS_POST_DOM>,
        updates: &[CfgUpdate<NodeOf<G>>],
    ) {
        let mut pre_view_cfg = CfgDiff::<NodeOf<G>, IS_POST_DOM>::new(updates.iter().copied(), true);
        let num_updates = pre_view_cfg.num_legalized_updates();

        match num_updates {
            0 => (),
            // Take the fast path for a single update and avoid running the batch update machinery
            1 => {
                let update = pre_view_cfg.pop_update_for_incremental_updates();
                match update.kind() {
                    CfgUpdateKind::Insert => {
                        Self::insert_edge(tree, None, update.from(), update.to())
                    }
                    CfgUpdateKind::Delete => {
                        Self::delete_edge(tree, None, update.from(), update.to())
                    }
                }
            }
            _ => {
                let bui = BatchUpdateInfo::new(pre_view_cfg, None);
                Self::apply_batch(tree, &bui);
            }
        }
    }

    fn apply_batch(
        tree: &mut DomTreeBase<G, IS_POST_DOM>,
        bui: &BatchUpdateInfo<NodeOf<G>, IS_POST_DOM>,
    ) {
        log::trace!(target: "dominance", "applying {} legalized updates", bui.num_legalized);

        // Recalculate the tree when the number of updates exceeds a threshold, which usually
        // makes direct updating slower than recalculation. The threshold is proportional to the
        // size of the tree.
        let num_nodes = tree.len();
        let recalculate = if num_nodes <= SMALL_TREE_THRESHOLD {
            bui.num_legalized > num_nodes
        } else {
            bui.num_legalized > num_nodes / BATCH_RECALCULATION_RATIO
        };
        if recalculate {
            Self::compute_from_scratch(tree, Some(bui));
        }

        // If the tree was recalculated at some point, stop the batch updates. Full
        // recalculations ignore batch updates and look at the actual graph.
        for _ in 0..bui.num_legalized {
            if bui.is_recalculated.get() {
                break;
            }
            Self::apply_next_update(tree, bui);
        }
    }

    fn apply_next_update(
        tree: &mut DomTreeBase<G, IS_POST_DOM>,
        bui: &BatchUpdateInfo<NodeOf<G>, IS_POST_DOM>,
    ) {
        // Popping the next update will move the pre-update view to the next snapshot
        let update = bui.pre_cfg_view.borrow_mut().pop_update_for_incremental_updates();
        log::trace!(target: "dominance", "applying update: {update:?}");

        match update.kind() {
            CfgUpdateKind::Insert => Self::insert_edge(tree, Some(bui), update.from(), update.to()),
            CfgUpdateKind::Delete => Self::delete_edge(tree, Some(bui), update.from(), update.to()),
        }
    }
}

/// Get the children of `node` in `graph`, as seen through the pre-update view of `bui`, if any
fn children_of<G, const INVERSED: bool, const IS_POST_DOM: bool>(
    graph: &G,
    node: NodeOf<G>,
    bui: Option<&BatchUpdateInfo<NodeOf<G>, IS_POST_DOM>>,
) -> SmallVec<[NodeOf<G>; 8]>
where
    G: DominanceGraph,
{
    match bui {
        Some(bui) => bui.pre_cfg_view.borrow().get_children::<G, INVERSED>(graph, node),
        None => get_children::<G, INVERSED>(graph, node),
    }
}

/// Returns true if `a` and `b` contain the same set of nodes
pub(crate) fn is_permutation<N: PartialEq>(a: &[N], b: &[N]) -> bool {
    a.len() == b.len() && a.iter().all(|n| b.contains(n))
}

#[inline]
fn info<'a, N>(num_to_info: &[Option<&'a NodeInfo<N>>], num: u32) -> &'a NodeInfo<N> {
    num_to_info[num as usize].expect("invalid dfs number")
}

/// Find the vertex with the minimum semidominator on the path from `v` to the root of the forest
/// of vertices numbered below `last_linked`, compressing the path along the way.
fn eval<'a, N>(
    v: u32,
    last_linked: u32,
    eval_stack: &mut SmallVec<[&'a NodeInfo<N>; 32]>,
    num_to_info: &[Option<&'a NodeInfo<N>>],
) -> u32 {
    let mut v_info = info(num_to_info, v);
    if v_info.parent.get() < last_linked {
        return v_info.label.get();
    }

    // Store ancestors except the last (root of a virtual tree) into a stack
    eval_stack.clear();
    loop {
        eval_stack.push(v_info);
        v_info = info(num_to_info, v_info.parent.get());
        if v_info.parent.get() < last_linked {
            break;
        }
    }

    // Path compression. Point each vertex's parent to the root and update its label if any of
    // its ancestors has a smaller semidominator.
    let mut p_info = v_info;
    let mut p_label_info = info(num_to_info, p_info.label.get());
    while let Some(next) = eval_stack.pop() {
        v_info = next;
        v_info.parent.set(p_info.parent.get());
        let v_label_info = info(num_to_info, v_info.label.get());
        if p_label_info.semi.get() < v_label_info.semi.get() {
            v_info.label.set(p_info.label.get());
        } else {
            p_label_info = v_label_info;
        }
        p_info = v_info;
    }

    v_info.label.get()
}
