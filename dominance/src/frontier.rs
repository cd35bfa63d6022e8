use alloc::collections::{BTreeSet, VecDeque};
use core::hash::Hash;

use pilc_graph::FxHashMap;
use smallvec::SmallVec;

use crate::{DominanceGraph, DominanceTree};

/// Calculates the dominance frontier for every block in a given [DominanceTree]
///
/// The dominance frontier of a block `B` is the set of blocks `DF` where for each block `Y` in `DF`
/// `B` dominates some predecessor of `Y`, but does not strictly dominate `Y`.
///
/// Dominance frontiers are useful in the construction of SSA form, as well as identifying control
/// dependent dataflow (for example, a variable in a program that has a different value depending
/// on what branch of an `if` statement is taken).
///
/// An iterated dominance frontier is given by computing the dominance frontier for some set `X`,
/// i.e. `DF(X)`, then computing the dominance frontier on that, i.e. `DF(DF(X))`, taking the union
/// of the results, and repeating this process until fixpoint is reached. This is often represented
/// in literature as `DF+(X)`, and corresponds to the set of blocks at which a phi (or block
/// argument) is needed for a variable assigned in each of the blocks of `X`.
///
/// Consider the following graph:
///
/// ```text,ignore
/// block0 -> block1, block2
/// block1 -> block3
/// block2 -> block3
/// ```
///
/// * `DF(block0)` is empty, because `block0` strictly dominates all other blocks.
/// * `DF(block1)` contains `block3`, because `block1` dominates a predecessor of `block3` (itself),
///   but does not strictly dominate `block3`. The same goes for `block2`.
/// * `DF(block3)` is empty, because it has no successors.
pub struct DominanceFrontier<N> {
    /// The dominance frontier for each block, as a set of blocks
    dfs: FxHashMap<N, SmallVec<[N; 2]>>,
}

impl<N> Default for DominanceFrontier<N> {
    fn default() -> Self {
        Self {
            dfs: Default::default(),
        }
    }
}

impl<N> DominanceFrontier<N>
where
    N: Copy + Ord + Hash,
{
    pub fn new<G>(domtree: &DominanceTree<G>) -> Self
    where
        G: DominanceGraph<Node = N>,
    {
        let mut this = Self::default();
        let graph = domtree.parent();

        for node in domtree.postorder() {
            let Some(node_block) = node.block() else {
                continue;
            };

            let predecessors = graph.inverse_children(node_block).collect::<SmallVec<[N; 4]>>();
            if predecessors.len() < 2 {
                continue;
            }

            // The root of the tree has no immediate dominator, in which case each predecessor is
            // walked up to the root, inclusive
            let idom_block = node.idom().and_then(|idom| idom.block());
            for pred in predecessors {
                // Unreachable predecessors contribute nothing
                let Some(mut runner) = domtree.get(pred) else {
                    continue;
                };

                while runner.block() != idom_block {
                    let Some(runner_block) = runner.block() else {
                        break;
                    };
                    this.insert(runner_block, node_block);
                    let Some(idom) = runner.idom() else {
                        break;
                    };
                    runner = idom;
                }
            }
        }

        this
    }

    fn insert(&mut self, block: N, frontier_block: N) {
        let df = self.dfs.entry(block).or_default();
        if !df.contains(&frontier_block) {
            df.push(frontier_block);
        }
    }

    /// Compute the iterated dominance frontier for `block`
    pub fn iterate(&self, block: N) -> BTreeSet<N> {
        self.iterate_all([block])
    }

    /// Compute the iterated dominance frontier for `blocks`
    pub fn iterate_all<I>(&self, blocks: I) -> BTreeSet<N>
    where
        I: IntoIterator<Item = N>,
    {
        let mut block_q = VecDeque::default();
        let mut idf = BTreeSet::default();

        let mut visit_block = |block: N, block_q: &mut VecDeque<N>| {
            // If `block` has an empty dominance frontier, there is nothing to add.
            let Some(df) = self.dfs.get(&block) else {
                return;
            };

            // Extend `idf` and add the new blocks to the queue
            for &block in df.iter() {
                if idf.insert(block) {
                    block_q.push_back(block);
                }
            }
        };

        // Process the initial set of blocks
        for block in blocks {
            visit_block(block, &mut block_q);
        }

        // Process any newly queued blocks
        while let Some(block) = block_q.pop_front() {
            visit_block(block, &mut block_q);
        }

        idf
    }

    /// Get an iterator over the dominance frontier of `block`
    pub fn iter(&self, block: N) -> impl Iterator<Item = N> + '_ {
        self.dfs.get(&block).into_iter().flat_map(|df| df.iter().copied())
    }

    /// Get the set of blocks in the dominance frontier of `block`, or `None` if `block` has an
    /// empty dominance frontier.
    #[inline]
    pub fn get(&self, block: &N) -> Option<&[N]> {
        self.dfs.get(block).map(|df| df.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::testing::{b, cfg, init_logger};

    #[test]
    fn dominance_frontier_of_diamond() {
        init_logger();

        let graph = cfg(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let domtree = DominanceTree::new(graph).unwrap();
        let df = DominanceFrontier::new(&domtree);

        assert_eq!(df.get(&b(0)), None);
        assert_eq!(df.get(&b(1)), Some([b(3)].as_slice()));
        assert_eq!(df.get(&b(2)), Some([b(3)].as_slice()));
        assert_eq!(df.get(&b(3)), None);
        assert_eq!(df.iter(b(1)).collect::<Vec<_>>(), [b(3)]);
        assert_eq!(df.iter(b(0)).count(), 0);
        assert_eq!(df.iterate_all([b(1), b(2)]).into_iter().collect::<Vec<_>>(), [b(3)]);
    }

    #[test]
    fn dominance_frontier_of_loop() {
        init_logger();

        // block0 -> block1 <-> block2 -> block3
        let graph = cfg(4, &[(0, 1), (1, 2), (2, 1), (2, 3)]);
        let domtree = DominanceTree::new(graph).unwrap();
        let df = DominanceFrontier::new(&domtree);

        assert_eq!(df.get(&b(1)), Some([b(1)].as_slice()));
        assert_eq!(df.get(&b(2)), Some([b(1)].as_slice()));
        assert_eq!(df.get(&b(3)), None);
        assert_eq!(df.iterate(b(2)).into_iter().collect::<Vec<_>>(), [b(1)]);
    }

    #[test]
    fn iterated_dominance_frontier_reaches_fixpoint() {
        init_logger();

        // block0 -> block1 -> block2 -> block4
        //       \-> block3 ------------^
        // block2 -> block1 (back edge)
        let graph = cfg(5, &[(0, 1), (0, 3), (1, 2), (2, 4), (3, 4), (2, 1)]);
        let domtree = DominanceTree::new(graph).unwrap();
        let df = DominanceFrontier::new(&domtree);

        // DF(2) = {1, 4}, DF(1) = {1, 4}, DF(4) = {}
        assert_eq!(df.iterate(b(2)).into_iter().collect::<Vec<_>>(), [b(1), b(4)]);
        assert_eq!(df.iterate(b(3)).into_iter().collect::<Vec<_>>(), [b(4)]);
        assert!(df.iterate(b(0)).is_empty());
    }

    #[test]
    fn unreachable_predecessors_are_ignored() {
        init_logger();

        // block3 is unreachable, but branches into block2
        let graph = cfg(4, &[(0, 1), (1, 2), (3, 2)]);
        let domtree = DominanceTree::new(graph).unwrap();
        let df = DominanceFrontier::new(&domtree);

        assert_eq!(df.get(&b(1)), None);
        assert_eq!(df.get(&b(3)), None);
    }
}
