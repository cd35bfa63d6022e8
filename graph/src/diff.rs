use core::{fmt, hash::Hash};

use smallvec::SmallVec;

use crate::{FxHashMap, InvertibleGraph, get_children};

#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub enum CfgUpdateKind {
    Insert,
    Delete,
}

/// A single planned mutation of a control-flow graph: the insertion or deletion of `from -> to`
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct CfgUpdate<N> {
    kind: CfgUpdateKind,
    from: N,
    to: N,
}

impl<N> CfgUpdate<N> {
    #[inline]
    pub const fn new(kind: CfgUpdateKind, from: N, to: N) -> Self {
        Self { kind, from, to }
    }

    #[inline]
    pub const fn insert(from: N, to: N) -> Self {
        Self::new(CfgUpdateKind::Insert, from, to)
    }

    #[inline]
    pub const fn delete(from: N, to: N) -> Self {
        Self::new(CfgUpdateKind::Delete, from, to)
    }

    #[inline(always)]
    pub const fn kind(&self) -> CfgUpdateKind {
        self.kind
    }

    #[inline(always)]
    pub const fn is_insert(&self) -> bool {
        matches!(self.kind, CfgUpdateKind::Insert)
    }
}

impl<N: Copy> CfgUpdate<N> {
    #[inline(always)]
    pub const fn from(&self) -> N {
        self.from
    }

    #[inline(always)]
    pub const fn to(&self) -> N {
        self.to
    }
}

impl<N: fmt::Debug> fmt::Debug for CfgUpdate<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(match self.kind {
            CfgUpdateKind::Insert => "Insert",
            CfgUpdateKind::Delete => "Delete",
        })
        .field("from", &self.from)
        .field("to", &self.to)
        .finish()
    }
}

#[derive(Clone)]
struct DeletesInserts<N> {
    deletes: SmallVec<[N; 2]>,
    inserts: SmallVec<[N; 2]>,
}

impl<N> Default for DeletesInserts<N> {
    fn default() -> Self {
        Self {
            deletes: SmallVec::new(),
            inserts: SmallVec::new(),
        }
    }
}

impl<N> DeletesInserts<N> {
    fn di(&self, is_insert: bool) -> &SmallVec<[N; 2]> {
        if is_insert { &self.inserts } else { &self.deletes }
    }

    fn di_mut(&mut self, is_insert: bool) -> &mut SmallVec<[N; 2]> {
        if is_insert {
            &mut self.inserts
        } else {
            &mut self.deletes
        }
    }
}

/// A [GraphDiff] describes a snapshot of some graph, relative to that graph's current state.
pub trait GraphDiff {
    type Node;

    fn is_empty(&self) -> bool;
    fn legalized_updates(&self) -> &[CfgUpdate<Self::Node>];
    fn num_legalized_updates(&self) -> usize {
        self.legalized_updates().len()
    }
    /// Remove the earliest remaining update, advancing the snapshot by one step towards the state
    /// of the underlying graph.
    fn pop_update_for_incremental_updates(&mut self) -> CfgUpdate<Self::Node>;
    /// Get the children of `node` as they are in this snapshot of `graph`.
    ///
    /// When `INVERSE_EDGE` is false, these are the successors of `node`, in reverse order, as
    /// returned by [crate::get_children]. Otherwise they are the predecessors of `node`.
    fn get_children<G, const INVERSE_EDGE: bool>(
        &self,
        graph: &G,
        node: Self::Node,
    ) -> SmallVec<[Self::Node; 8]>
    where
        G: InvertibleGraph<Node = Self::Node>;
}

/// [CfgDiff] defines a CFG snapshot: given a set of [CfgUpdate], it provides a `get_children`
/// method to get a node's children based on the additional updates in the snapshot. The diff
/// treats the CFG as a graph rather than a multigraph: added edges are pruned to be unique, and
/// deleted edges remove all existing edges between two blocks.
///
/// Two booleans are used to define orders in graphs:
///
/// * `INVERSE_GRAPH` defines when we need to reverse the whole graph, and is as such also
///   equivalent to applying updates in reverse.
/// * `INVERSE_EDGE` (see [GraphDiff::get_children]) defines whether we want to change the edge
///   direction. For a non-inverted graph, the children are naturally the successors when
///   `INVERSE_EDGE` is false, and the predecessors when it is true.
#[derive(Clone)]
pub struct CfgDiff<N, const INVERSE_GRAPH: bool = false> {
    succ: FxHashMap<N, DeletesInserts<N>>,
    pred: FxHashMap<N, DeletesInserts<N>>,
    /// By default, it is assumed that, given a CFG and a set of updates, we wish to apply these
    /// updates as given. If this is set, the updates are applied in reverse: deleted edges are
    /// considered re-added, and inserted edges are considered deleted when returning children.
    updated_are_reverse_applied: bool,
    /// The legalized updates, kept for a deterministic order of updates when using a diff for
    /// incremental updates of a dominator tree. The earliest update is at the end of the list.
    legalized_updates: SmallVec<[CfgUpdate<N>; 4]>,
}

impl<N, const INVERSE_GRAPH: bool> Default for CfgDiff<N, INVERSE_GRAPH> {
    fn default() -> Self {
        Self {
            succ: Default::default(),
            pred: Default::default(),
            updated_are_reverse_applied: false,
            legalized_updates: Default::default(),
        }
    }
}

impl<N, const INVERSE_GRAPH: bool> CfgDiff<N, INVERSE_GRAPH>
where
    N: Copy + Eq + Hash,
{
    /// Construct a snapshot from `updates`.
    ///
    /// If `reverse_apply_updates` is true, the snapshot represents the graph _before_ `updates`
    /// were applied to it, i.e. the underlying graph is assumed to already reflect them.
    pub fn new<I>(updates: I, reverse_apply_updates: bool) -> Self
    where
        I: IntoIterator<Item = CfgUpdate<N>>,
    {
        let mut this = Self {
            legalized_updates: legalize_updates(updates, INVERSE_GRAPH, false),
            ..Default::default()
        };
        for update in this.legalized_updates.iter() {
            let is_insert = update.is_insert() != reverse_apply_updates;
            this.succ.entry(update.from).or_default().di_mut(is_insert).push(update.to);
            this.pred.entry(update.to).or_default().di_mut(is_insert).push(update.from);
        }
        this.updated_are_reverse_applied = reverse_apply_updates;
        this
    }

    #[inline]
    pub fn is_reverse_applied(&self) -> bool {
        self.updated_are_reverse_applied
    }
}

impl<N, const INVERSE_GRAPH: bool> GraphDiff for CfgDiff<N, INVERSE_GRAPH>
where
    N: Copy + Eq + Hash + fmt::Debug,
{
    type Node = N;

    fn is_empty(&self) -> bool {
        self.succ.is_empty() && self.pred.is_empty() && self.legalized_updates.is_empty()
    }

    #[inline(always)]
    fn legalized_updates(&self) -> &[CfgUpdate<N>] {
        &self.legalized_updates
    }

    fn pop_update_for_incremental_updates(&mut self) -> CfgUpdate<N> {
        let update = self.legalized_updates.pop().expect("no updates to apply");
        let is_insert = update.is_insert() != self.updated_are_reverse_applied;

        let succ_di_list = self.succ.get_mut(&update.from).expect("update is missing from diff");
        let succ_list = succ_di_list.di_mut(is_insert);
        assert_eq!(succ_list.last(), Some(&update.to));
        succ_list.pop();
        if succ_list.is_empty() && succ_di_list.di(!is_insert).is_empty() {
            self.succ.remove(&update.from);
        }

        let pred_di_list = self.pred.get_mut(&update.to).expect("update is missing from diff");
        let pred_list = pred_di_list.di_mut(is_insert);
        assert_eq!(pred_list.last(), Some(&update.from));
        pred_list.pop();
        if pred_list.is_empty() && pred_di_list.di(!is_insert).is_empty() {
            self.pred.remove(&update.to);
        }

        update
    }

    fn get_children<G, const INVERSE_EDGE: bool>(&self, graph: &G, node: N) -> SmallVec<[N; 8]>
    where
        G: InvertibleGraph<Node = N>,
    {
        let mut children = get_children::<G, INVERSE_EDGE>(graph, node);

        let diff = if INVERSE_EDGE != INVERSE_GRAPH {
            &self.pred
        } else {
            &self.succ
        };
        let Some(found) = diff.get(&node) else {
            return children;
        };

        // Remove children present in the CFG but not in the snapshot.
        for child in found.di(false) {
            children.retain(|c| c != child);
        }

        // Add children present in the snapshot but not in the real CFG.
        children.extend(found.di(true).iter().copied());

        children
    }
}

impl<N: fmt::Debug, const INVERSE_GRAPH: bool> fmt::Debug for CfgDiff<N, INVERSE_GRAPH> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CfgDiff")
            .field("inverse_graph", &INVERSE_GRAPH)
            .field("reverse_applied", &self.updated_are_reverse_applied)
            .field("updates", &self.legalized_updates)
            .finish()
    }
}

/// `legalize_updates` simplifies updates assuming a graph structure.
///
/// This function serves a double purpose:
///
/// 1. It removes redundant updates, which makes it easier to reverse-apply them when traversing
///    the CFG.
/// 2. It optimizes away updates that cancel each other out, as the end result is the same.
///
/// The result is ordered by the position of the last occurrence of each edge in `all_updates`,
/// most recent first, unless `reverse_result_order` is set.
///
/// # Panics
///
/// Panics if some edge is inserted (or deleted) twice without an intervening update of the
/// opposite kind.
pub fn legalize_updates<N, I>(
    all_updates: I,
    inverse_graph: bool,
    reverse_result_order: bool,
) -> SmallVec<[CfgUpdate<N>; 4]>
where
    N: Copy + Eq + Hash,
    I: IntoIterator<Item = CfgUpdate<N>>,
{
    #[derive(Default, Copy, Clone)]
    struct UpdateOp {
        num_insertions: i32,
        index: u32,
    }

    // Count the total number of insertions of each edge.
    //
    // Each insertion adds 1 and deletion subtracts 1. The end number should be one of:
    //
    // * `-1` (deletion)
    // * `0` (NOP),
    // * `1` (insertion).
    //
    // Otherwise, the sequence of updates contains multiple updates of the same kind and we assert
    // for that case.
    let all_updates = all_updates.into_iter();
    let mut operations = FxHashMap::<(N, N), UpdateOp>::with_capacity_and_hasher(
        all_updates.size_hint().0,
        Default::default(),
    );

    let mut len = 0;
    for (i, CfgUpdate { kind, mut from, mut to }) in all_updates.enumerate() {
        if inverse_graph {
            // Reverse edge for post-dominators
            core::mem::swap(&mut from, &mut to);
        }

        let op = operations.entry((from, to)).or_default();
        op.num_insertions += match kind {
            CfgUpdateKind::Insert => 1,
            CfgUpdateKind::Delete => -1,
        };
        op.index = i as u32;
        len = i + 1;
    }

    let mut result = SmallVec::<[CfgUpdate<N>; 4]>::with_capacity(operations.len());
    for (&(from, to), update_op) in operations.iter() {
        assert!(update_op.num_insertions.abs() <= 1, "unbalanced operations!");
        if update_op.num_insertions == 0 {
            continue;
        }
        let kind = if update_op.num_insertions > 0 {
            CfgUpdateKind::Insert
        } else {
            CfgUpdateKind::Delete
        };
        result.push(CfgUpdate { kind, from, to });
    }

    // Make the order consistent by not relying on hash order, using the index of the last
    // occurrence of each edge instead.
    result.sort_by(|a, b| {
        let op_a = &operations[&(a.from, a.to)];
        let op_b = &operations[&(b.from, b.to)];
        if reverse_result_order {
            op_a.index.cmp(&op_b.index)
        } else {
            op_a.index.cmp(&op_b.index).reverse()
        }
    });

    log::trace!(
        target: "cfg",
        "legalized {len} updates into {} (inverse_graph = {inverse_graph})",
        result.len()
    );

    result
}
