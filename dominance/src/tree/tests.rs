use alloc::{string::ToString, vec::Vec};

use pilc_graph::{BlockId, CfgRef};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use super::*;
use crate::testing::{b, cfg, init_logger};

/// The block of the immediate dominator of `block`, or `None` if it is dominated by the root
/// (virtual or otherwise) of the tree
fn idom_of<const IS_POST_DOM: bool>(
    tree: &DomTreeBase<CfgRef, IS_POST_DOM>,
    block: u32,
) -> Option<BlockId> {
    let node = tree.get(b(block)).expect("expected block to be in the tree");
    node.idom().and_then(|idom| idom.block())
}

fn level_of<const IS_POST_DOM: bool>(tree: &DomTreeBase<CfgRef, IS_POST_DOM>, block: u32) -> u32 {
    tree.get(b(block)).expect("expected block to be in the tree").level()
}

fn sorted_roots<const IS_POST_DOM: bool>(tree: &DomTreeBase<CfgRef, IS_POST_DOM>) -> Vec<BlockId> {
    let mut roots = tree.roots().to_vec();
    roots.sort();
    roots
}

/// ```text,ignore
/// block0 -> block1, block2
/// block1 -> block3
/// block2 -> block3
/// ```
fn diamond() -> CfgRef {
    cfg(4, &[(0, 1), (0, 2), (1, 3), (2, 3)])
}

#[test]
fn empty_graph_has_no_dominance_tree() {
    let result = DominanceTree::new(CfgRef::default());
    assert!(matches!(result, Err(DomTreeError::EmptyGraph)));
}

#[test]
fn dominance_tree_of_diamond() {
    init_logger();

    let tree = DominanceTree::new(diamond()).unwrap();

    assert_eq!(tree.roots(), &[b(0)]);
    assert_eq!(tree.root(), Some(b(0)));
    assert_eq!(tree.len(), 4);
    assert!(!tree.is_post_dominator());

    assert_eq!(idom_of(&tree, 0), None);
    assert_eq!(idom_of(&tree, 1), Some(b(0)));
    assert_eq!(idom_of(&tree, 2), Some(b(0)));
    assert_eq!(idom_of(&tree, 3), Some(b(0)));
    assert_eq!(level_of(&tree, 0), 0);
    assert_eq!(level_of(&tree, 3), 1);

    assert!(tree.dominates(b(0), b(3)));
    assert!(tree.dominates(b(3), b(3)));
    assert!(!tree.dominates(b(1), b(3)));
    assert!(!tree.dominates(b(3), b(0)));
    assert!(tree.properly_dominates(b(0), b(1)));
    assert!(!tree.properly_dominates(b(0), b(0)));

    assert_eq!(tree.find_nearest_common_dominator(b(1), b(2)), Some(b(0)));
    assert_eq!(tree.find_nearest_common_dominator(b(1), b(3)), Some(b(0)));
    assert_eq!(tree.find_nearest_common_dominator(b(0), b(2)), Some(b(0)));
    assert_eq!(tree.find_nearest_common_dominator(b(3), b(3)), Some(b(3)));
    assert_eq!(tree.find_nearest_common_dominator_of_all([b(1), b(2), b(3)]), Some(b(0)));
    assert_eq!(tree.find_nearest_common_dominator_of_all([]), None);

    assert!(tree.verify());
}

#[test]
fn unreachable_blocks_are_not_in_the_tree() {
    init_logger();

    // block2 is unreachable from the entry
    let tree = DominanceTree::new(cfg(3, &[(0, 1), (2, 1)])).unwrap();

    assert!(tree.is_reachable_from_entry(b(1)));
    assert!(!tree.is_reachable_from_entry(b(2)));
    assert!(tree.get(b(2)).is_none());
    assert_eq!(idom_of(&tree, 1), Some(b(0)));

    // Any block dominates an unreachable one, and an unreachable one dominates nothing
    assert!(tree.dominates(b(1), b(2)));
    assert!(tree.properly_dominates(b(1), b(2)));
    assert!(!tree.dominates(b(2), b(1)));
    assert!(tree.get_descendants(b(2)).is_empty());
    assert_eq!(tree.find_nearest_common_dominator(b(1), b(2)), None);
    assert_eq!(tree.find_nearest_common_dominator(b(0), b(2)), None);

    assert!(tree.verify());
}

#[test]
fn dominance_tree_of_loop() {
    init_logger();

    // block0 -> block1 -> block2 -> block3, block2 -> block1
    let tree = DominanceTree::new(cfg(4, &[(0, 1), (1, 2), (2, 1), (2, 3)])).unwrap();

    assert_eq!(idom_of(&tree, 1), Some(b(0)));
    assert_eq!(idom_of(&tree, 2), Some(b(1)));
    assert_eq!(idom_of(&tree, 3), Some(b(2)));
    assert_eq!(tree.get_descendants(b(1)).as_slice(), &[b(1), b(2), b(3)]);
    assert!(tree.verify());
}

#[test]
fn tree_traversals_skip_nothing() {
    init_logger();

    let tree = DominanceTree::new(cfg(4, &[(0, 1), (1, 2), (0, 3)])).unwrap();

    let preorder = tree.preorder().iter().filter_map(|node| node.block()).collect::<Vec<_>>();
    assert_eq!(preorder, [b(0), b(1), b(2), b(3)]);

    let postorder = tree.postorder().iter().filter_map(|node| node.block()).collect::<Vec<_>>();
    assert_eq!(postorder, [b(2), b(1), b(3), b(0)]);

    let rpo = tree.reverse_postorder().iter().filter_map(|node| node.block()).collect::<Vec<_>>();
    assert_eq!(rpo, [b(0), b(3), b(1), b(2)]);

    let subtree = tree.get(b(1)).unwrap().preorder().filter_map(|node| node.block()).count();
    assert_eq!(subtree, 2);
}

#[test]
fn dominance_tree_display() {
    init_logger();

    let tree = DominanceTree::new(diamond()).unwrap();

    let expected = concat!(
        "=============================--------------------------------\n",
        "Inorder Dominator Tree: DFSNumbers invalid: 0 slow queries.\n",
        "  [0] block0 {?,?}\n",
        "    [1] block1 {?,?}\n",
        "    [1] block3 {?,?}\n",
        "    [1] block2 {?,?}\n",
        "Roots: block0 \n",
    );
    assert_eq!(tree.to_string(), expected);

    tree.update_dfs_numbers();
    let expected = concat!(
        "=============================--------------------------------\n",
        "Inorder Dominator Tree: \n",
        "  [0] block0 {0,7}\n",
        "    [1] block1 {1,2}\n",
        "    [1] block3 {3,4}\n",
        "    [1] block2 {5,6}\n",
        "Roots: block0 \n",
    );
    assert_eq!(tree.to_string(), expected);
    assert!(tree.verify());
}

#[test]
fn slow_queries_eventually_compute_dfs_numbers() {
    init_logger();

    let edges = (0..39u32).map(|i| (i, i + 1)).collect::<Vec<_>>();
    let tree = DominanceTree::new(cfg(40, &edges)).unwrap();
    assert!(!tree.has_valid_dfs_numbers());

    for _ in 0..SLOW_QUERY_THRESHOLD {
        assert!(tree.dominates(b(0), b(39)));
    }
    assert!(!tree.has_valid_dfs_numbers());
    assert!(tree.to_string().contains("DFSNumbers invalid: 32 slow queries."));

    assert!(tree.dominates(b(0), b(39)));
    assert!(tree.has_valid_dfs_numbers());
    assert!(!tree.dominates(b(39), b(0)));
    assert!(tree.dominates(b(10), b(20)));
    assert!(!tree.dominates(b(20), b(10)));
    assert!(tree.verify());
}

#[test]
fn post_dominance_tree_of_diamond() {
    init_logger();

    let tree = PostDominanceTree::new(diamond()).unwrap();

    assert!(tree.is_post_dominator());
    assert_eq!(tree.roots(), &[b(3)]);
    // The virtual root is a node of the tree
    assert_eq!(tree.len(), 5);

    let root = tree.root_node().unwrap();
    assert!(tree.is_virtual_root(&root));
    assert_eq!(root.block(), None);
    assert_eq!(root.num_children(), 1);

    assert_eq!(idom_of(&tree, 3), None);
    assert_eq!(idom_of(&tree, 0), Some(b(3)));
    assert_eq!(idom_of(&tree, 1), Some(b(3)));
    assert_eq!(idom_of(&tree, 2), Some(b(3)));
    assert_eq!(level_of(&tree, 3), 1);
    assert_eq!(level_of(&tree, 0), 2);

    assert!(tree.dominates(b(3), b(0)));
    assert!(!tree.dominates(b(1), b(0)));
    assert_eq!(tree.find_nearest_common_dominator(b(1), b(2)), Some(b(3)));

    assert!(tree.verify());
}

#[test]
fn post_dominance_tree_with_multiple_exits() {
    init_logger();

    // block0 -> block1, block2; both block1 and block2 exit
    let tree = PostDominanceTree::new(cfg(3, &[(0, 1), (0, 2)])).unwrap();

    assert_eq!(sorted_roots(&tree), [b(1), b(2)]);
    assert_eq!(idom_of(&tree, 0), None);
    assert_eq!(idom_of(&tree, 1), None);
    assert_eq!(idom_of(&tree, 2), None);
    // The only common post-dominator is the virtual root
    assert_eq!(tree.find_nearest_common_dominator(b(1), b(2)), None);
    assert!(tree.verify());
}

#[test]
fn post_dominance_tree_with_exits_on_each_branch() {
    init_logger();

    // entry (block0) -> a (block1) -> exit1 (block3)
    //               \-> b (block2) -> exit2 (block4)
    let tree = PostDominanceTree::new(cfg(5, &[(0, 1), (0, 2), (1, 3), (2, 4)])).unwrap();

    assert_eq!(sorted_roots(&tree), [b(3), b(4)]);
    let root = tree.root_node().unwrap();
    assert!(tree.is_virtual_root(&root));
    assert_eq!(root.num_children(), 2);

    assert_eq!(idom_of(&tree, 3), None);
    assert_eq!(idom_of(&tree, 4), None);
    assert_eq!(idom_of(&tree, 1), Some(b(3)));
    assert_eq!(idom_of(&tree, 2), Some(b(4)));
    assert_eq!(idom_of(&tree, 0), None);
    assert_eq!(level_of(&tree, 3), 1);
    assert_eq!(level_of(&tree, 1), 2);

    // Both exits only meet at the virtual root
    assert_eq!(tree.find_nearest_common_dominator(b(3), b(4)), None);
    assert_eq!(tree.find_nearest_common_dominator(b(1), b(2)), None);
    let exit1 = tree.get(b(3)).unwrap();
    let exit2 = tree.get(b(4)).unwrap();
    let ncd = tree.find_nearest_common_dominator_node(&exit1, &exit2).unwrap();
    assert!(tree.is_virtual_root(&ncd));

    assert!(tree.dominates(b(3), b(1)));
    assert!(!tree.dominates(b(3), b(0)));
    assert!(!tree.dominates(b(3), b(2)));
    assert!(tree.verify());
}

#[test]
fn post_dominance_tree_of_infinite_loop() {
    init_logger();

    // block0 -> block1 <-> block2, block0 -> block3
    let tree = PostDominanceTree::new(cfg(4, &[(0, 1), (1, 2), (2, 1), (0, 3)])).unwrap();

    // block3 is a trivial root, block2 is the root chosen for the reverse-unreachable loop
    assert_eq!(sorted_roots(&tree), [b(2), b(3)]);
    assert_eq!(idom_of(&tree, 0), None);
    assert_eq!(idom_of(&tree, 1), Some(b(2)));
    assert_eq!(idom_of(&tree, 2), None);
    assert_eq!(idom_of(&tree, 3), None);
    assert_eq!(tree.find_nearest_common_dominator(b(0), b(3)), None);
    assert_eq!(tree.find_nearest_common_dominator(b(1), b(2)), Some(b(2)));
    assert!(tree.verify());
}

#[test]
fn forward_incremental_insert_and_delete() {
    init_logger();

    let graph = cfg(4, &[(0, 1), (1, 2), (2, 3)]);
    let mut tree = DominanceTree::new(graph.clone()).unwrap();
    assert_eq!(idom_of(&tree, 3), Some(b(2)));

    graph.borrow_mut().add_edge(b(0), b(3));
    tree.insert_edge(b(0), b(3));
    assert_eq!(idom_of(&tree, 3), Some(b(0)));
    assert_eq!(level_of(&tree, 3), 1);
    assert!(tree.verify());

    // block2 becomes unreachable
    graph.borrow_mut().remove_edge(b(1), b(2));
    tree.delete_edge(b(1), b(2));
    assert!(tree.get(b(2)).is_none());
    assert_eq!(idom_of(&tree, 3), Some(b(0)));
    assert!(tree.verify());

    // block2 becomes reachable again
    graph.borrow_mut().add_edge(b(1), b(2));
    tree.insert_edge(b(1), b(2));
    assert_eq!(idom_of(&tree, 2), Some(b(1)));
    assert_eq!(idom_of(&tree, 3), Some(b(0)));
    assert!(tree.verify());

    graph.borrow_mut().remove_edge(b(0), b(3));
    tree.delete_edge(b(0), b(3));
    assert_eq!(idom_of(&tree, 3), Some(b(2)));
    assert_eq!(level_of(&tree, 3), 3);
    assert!(tree.verify());
}

#[test]
fn forward_insertion_from_unreachable_block_is_ignored() {
    init_logger();

    let graph = cfg(3, &[(0, 1)]);
    let mut tree = DominanceTree::new(graph.clone()).unwrap();

    graph.borrow_mut().add_edge(b(2), b(1));
    tree.insert_edge(b(2), b(1));
    assert!(tree.get(b(2)).is_none());
    assert_eq!(idom_of(&tree, 1), Some(b(0)));
    assert!(tree.verify());
}

#[test]
fn insertion_into_unpopulated_tree_computes_it() {
    init_logger();

    let graph = cfg(2, &[]);
    let mut tree = DominanceTree::empty(graph.clone());
    assert!(tree.is_empty());

    graph.borrow_mut().add_edge(b(0), b(1));
    tree.insert_edge(b(0), b(1));
    assert_eq!(idom_of(&tree, 1), Some(b(0)));
    assert!(tree.verify());
}

#[test]
fn post_dominance_incremental_insert_and_delete() {
    init_logger();

    let graph = cfg(3, &[(0, 1), (1, 2)]);
    let mut tree = PostDominanceTree::new(graph.clone()).unwrap();
    assert_eq!(idom_of(&tree, 0), Some(b(1)));

    graph.borrow_mut().add_edge(b(0), b(2));
    tree.insert_edge(b(0), b(2));
    assert_eq!(idom_of(&tree, 0), Some(b(2)));
    assert_eq!(tree.roots(), &[b(2)]);
    assert!(tree.verify());

    // block1 becomes an exit of its own
    graph.borrow_mut().remove_edge(b(1), b(2));
    tree.delete_edge(b(1), b(2));
    assert_eq!(sorted_roots(&tree), [b(1), b(2)]);
    assert_eq!(idom_of(&tree, 0), None);
    assert_eq!(idom_of(&tree, 1), None);
    assert!(tree.verify());

    // block1 is no longer an exit
    graph.borrow_mut().add_edge(b(1), b(2));
    tree.insert_edge(b(1), b(2));
    assert_eq!(tree.roots(), &[b(2)]);
    assert_eq!(idom_of(&tree, 1), Some(b(2)));
    assert!(tree.verify());
}

#[test]
fn post_dominance_insertion_revalidates_roots() {
    init_logger();

    // block0 <-> block2 is an infinite loop, block1 is the only exit
    let graph = cfg(3, &[(2, 0), (0, 2)]);
    let mut tree = PostDominanceTree::new(graph.clone()).unwrap();
    assert_eq!(sorted_roots(&tree), [b(1), b(2)]);

    // block1 no longer exits, the whole graph is an infinite loop
    toggle_edge(&graph, &mut tree, 1, 2);
    assert!(tree.verify());
    assert_eq!(tree.roots(), &[b(2)]);

    // Nothing in the tree is affected by this edge, but the root of the loop changes
    toggle_edge(&graph, &mut tree, 0, 1);
    assert!(tree.verify());
    assert_eq!(tree.roots(), &[b(1)]);
    assert_eq!(idom_of(&tree, 1), None);
    assert_eq!(idom_of(&tree, 0), Some(b(1)));
    assert_eq!(idom_of(&tree, 2), Some(b(0)));
}

#[test]
fn post_dominance_deletion_creating_infinite_loop() {
    init_logger();

    // block0 -> block1 <-> block2 -> block3
    let graph = cfg(4, &[(0, 1), (1, 2), (2, 1), (2, 3)]);
    let mut tree = PostDominanceTree::new(graph.clone()).unwrap();
    assert_eq!(tree.roots(), &[b(3)]);

    graph.borrow_mut().remove_edge(b(2), b(3));
    tree.delete_edge(b(2), b(3));
    assert!(tree.verify());
    assert!(tree.roots().contains(&b(3)));
    assert_eq!(tree.roots().len(), 2);
}

#[test]
fn batch_updates_match_fresh_tree() {
    init_logger();

    let graph = cfg(6, &[(0, 1), (1, 2), (2, 3), (3, 4), (4, 5)]);
    let mut tree = DominanceTree::new(graph.clone()).unwrap();
    let mut post_tree = PostDominanceTree::new(graph.clone()).unwrap();

    let updates = [
        CfgUpdate::insert(b(0), b(3)),
        CfgUpdate::delete(b(2), b(3)),
        CfgUpdate::insert(b(1), b(5)),
    ];
    {
        let mut g = graph.borrow_mut();
        g.add_edge(b(0), b(3));
        g.remove_edge(b(2), b(3));
        g.add_edge(b(1), b(5));
    }

    tree.apply_updates(&updates);
    post_tree.apply_updates(&updates);

    assert_eq!(tree, DominanceTree::new(graph.clone()).unwrap());
    assert_eq!(post_tree, PostDominanceTree::new(graph.clone()).unwrap());
    assert_eq!(idom_of(&tree, 3), Some(b(0)));
    assert_eq!(idom_of(&tree, 5), Some(b(0)));
    assert!(tree.verify());
    assert!(post_tree.verify());
}

#[test]
fn large_batch_recalculates() {
    init_logger();

    let graph = cfg(4, &[(0, 1)]);
    let mut tree = DominanceTree::new(graph.clone()).unwrap();

    // More updates than nodes in the tree
    let edges = [(1, 2), (2, 3), (0, 2), (0, 3), (3, 1)];
    let updates = edges.map(|(from, to)| CfgUpdate::insert(b(from), b(to)));
    for (from, to) in edges {
        graph.borrow_mut().add_edge(b(from), b(to));
    }

    tree.apply_updates(&updates);
    assert_eq!(tree, DominanceTree::new(graph.clone()).unwrap());
    assert!(tree.verify());
}

#[test]
fn redundant_batch_updates_cancel_out() {
    init_logger();

    let graph = cfg(3, &[(0, 1), (1, 2)]);
    let mut tree = DominanceTree::new(graph.clone()).unwrap();

    tree.apply_updates(&[CfgUpdate::insert(b(0), b(2)), CfgUpdate::delete(b(0), b(2))]);
    assert_eq!(idom_of(&tree, 2), Some(b(1)));
    assert!(tree.verify());
}

#[test]
fn recalculate_with_updates_then_apply_them() {
    init_logger();

    let edges = [(0, 1), (1, 2), (2, 3), (1, 3)];
    let before = DominanceTree::new(cfg(5, &edges)).unwrap();

    let graph = cfg(5, &edges);
    let updates = [
        CfgUpdate::insert(b(3), b(4)),
        CfgUpdate::delete(b(1), b(3)),
        CfgUpdate::insert(b(0), b(2)),
    ];
    {
        let mut g = graph.borrow_mut();
        g.add_edge(b(3), b(4));
        g.remove_edge(b(1), b(3));
        g.add_edge(b(0), b(2));
    }

    // The tree is computed for the graph as it was before the updates
    let mut tree = DominanceTree::empty(graph.clone());
    tree.recalculate_with_updates(graph.clone(), &updates);
    assert!(tree.is_same_as(&before));
    assert!(tree.get(b(4)).is_none());

    tree.apply_updates(&updates);
    assert_eq!(idom_of(&tree, 2), Some(b(0)));
    assert_eq!(idom_of(&tree, 3), Some(b(2)));
    assert_eq!(idom_of(&tree, 4), Some(b(3)));
    assert!(tree.verify());
}

#[test]
fn recalculate_replaces_tree() {
    init_logger();

    let mut tree = DominanceTree::new(diamond()).unwrap();
    let graph = cfg(3, &[(0, 1), (1, 2)]);
    tree.recalculate(graph.clone());

    assert_eq!(tree.len(), 3);
    assert_eq!(idom_of(&tree, 2), Some(b(1)));
    assert!(tree.parent().ptr_eq(&graph));
    assert!(tree.verify());

    tree.reset();
    assert!(tree.is_empty());
    assert!(tree.roots().is_empty());
    assert!(tree.root_node().is_none());
}

#[test]
fn verify_detects_corrupted_tree() {
    init_logger();

    let mut tree = DominanceTree::new(diamond()).unwrap();
    assert!(tree.verify());

    tree.change_immediate_dominator(b(3), Some(b(1)));
    assert_eq!(idom_of(&tree, 3), Some(b(1)));
    assert_eq!(level_of(&tree, 3), 2);
    assert!(!tree.verify_with(DomTreeVerificationLevel::Fast));
    assert!(!tree.verify());
}

#[test]
fn add_new_block() {
    init_logger();

    let graph = cfg(2, &[(0, 1)]);
    let mut tree = DominanceTree::new(graph.clone()).unwrap();

    let block2 = graph.borrow_mut().add_block();
    graph.borrow_mut().add_edge(b(1), block2);
    let node = tree.add_new_block(block2, Some(b(1)));

    assert_eq!(node.level(), 2);
    assert_eq!(idom_of(&tree, 2), Some(b(1)));
    assert!(tree.verify());
}

#[test]
fn set_new_root() {
    init_logger();

    // block1 is unreachable until it becomes the entry
    let graph = cfg(3, &[(1, 0), (0, 2)]);
    let mut tree = DominanceTree::new(graph.clone()).unwrap();
    assert!(tree.get(b(1)).is_none());

    graph.borrow_mut().set_entry(b(1));
    let root = tree.set_new_root(b(1));

    assert_eq!(root.level(), 0);
    assert_eq!(tree.root(), Some(b(1)));
    assert_eq!(idom_of(&tree, 0), Some(b(1)));
    assert_eq!(level_of(&tree, 0), 1);
    assert_eq!(level_of(&tree, 2), 2);
    assert!(tree.verify());
}

#[test]
fn split_block_dominating_its_successor() {
    init_logger();

    let graph = cfg(3, &[(0, 1), (1, 2)]);
    let mut tree = DominanceTree::new(graph.clone()).unwrap();

    // Split the edge block0 -> block1 with block3
    {
        let mut g = graph.borrow_mut();
        let block3 = g.add_block();
        g.remove_edge(b(0), b(1));
        g.add_edge(b(0), block3);
        g.add_edge(block3, b(1));
    }
    tree.split_block(b(3));

    assert_eq!(idom_of(&tree, 3), Some(b(0)));
    assert_eq!(idom_of(&tree, 1), Some(b(3)));
    assert_eq!(level_of(&tree, 2), 3);
    assert!(tree.verify());
}

#[test]
fn split_block_not_dominating_its_successor() {
    init_logger();

    let graph = cfg(3, &[(0, 1), (0, 2), (2, 1)]);
    let mut tree = DominanceTree::new(graph.clone()).unwrap();

    {
        let mut g = graph.borrow_mut();
        let block3 = g.add_block();
        g.remove_edge(b(0), b(1));
        g.add_edge(b(0), block3);
        g.add_edge(block3, b(1));
    }
    tree.split_block(b(3));

    assert_eq!(idom_of(&tree, 3), Some(b(0)));
    assert_eq!(idom_of(&tree, 1), Some(b(0)));
    assert!(tree.verify());
}

#[test]
fn split_block_in_post_dominance_tree() {
    init_logger();

    let graph = cfg(3, &[(0, 1), (1, 2)]);
    let mut tree = PostDominanceTree::new(graph.clone()).unwrap();

    // Split the edge block1 -> block2 with block3, which is the single successor of block1 in
    // the inverse graph
    {
        let mut g = graph.borrow_mut();
        let block3 = g.add_block();
        g.remove_edge(b(1), b(2));
        g.add_edge(b(1), block3);
        g.add_edge(block3, b(2));
    }
    tree.split_block(b(3));

    assert_eq!(idom_of(&tree, 3), Some(b(2)));
    assert_eq!(idom_of(&tree, 1), Some(b(3)));
    assert!(tree.verify());
}

#[test]
fn erase_node() {
    init_logger();

    let graph = cfg(3, &[(0, 1), (1, 2)]);
    let mut tree = DominanceTree::new(graph.clone()).unwrap();

    graph.borrow_mut().remove_edge(b(1), b(2));
    tree.erase_node(b(2));

    assert!(tree.get(b(2)).is_none());
    assert!(tree.get(b(1)).unwrap().is_leaf());
    assert!(tree.verify());
}

#[test]
fn erase_post_dominance_root() {
    init_logger();

    let graph = cfg(3, &[(0, 1), (0, 2)]);
    let mut tree = PostDominanceTree::new(graph).unwrap();
    assert_eq!(sorted_roots(&tree), [b(1), b(2)]);

    tree.erase_node(b(2));
    assert_eq!(tree.roots(), &[b(1)]);
    assert!(tree.get(b(2)).is_none());
}

#[test]
#[should_panic = "is not a leaf node"]
fn erase_node_requires_leaf() {
    let mut tree = DominanceTree::new(cfg(2, &[(0, 1)])).unwrap();
    tree.erase_node(b(0));
}

/// Toggle the edge `from -> to` in `graph`, and inform `tree` of the change
fn toggle_edge<const IS_POST_DOM: bool>(
    graph: &CfgRef,
    tree: &mut DomTreeBase<CfgRef, IS_POST_DOM>,
    from: u32,
    to: u32,
) {
    let (from, to) = (b(from), b(to));
    if graph.borrow().has_edge(from, to) {
        graph.borrow_mut().remove_edge(from, to);
        tree.delete_edge(from, to);
    } else {
        graph.borrow_mut().add_edge(from, to);
        tree.insert_edge(from, to);
    }
}

/// Toggle the edge `from -> to` in `graph`, returning the corresponding update
fn toggle_graph_edge(graph: &CfgRef, from: u32, to: u32) -> CfgUpdate<BlockId> {
    let (from, to) = (b(from), b(to));
    let mut graph = graph.borrow_mut();
    if graph.has_edge(from, to) {
        graph.remove_edge(from, to);
        CfgUpdate::delete(from, to)
    } else {
        graph.add_edge(from, to);
        CfgUpdate::insert(from, to)
    }
}

prop_compose! {
    fn edges_between(num_blocks: u32, max_edges: usize)
        (edges in prop::collection::vec((0..num_blocks, 0..num_blocks), 0..max_edges))
        -> Vec<(u32, u32)>
    {
        edges.into_iter().filter(|(from, to)| from != to).collect()
    }
}

prop_compose! {
    /// A random graph of at most `max_blocks` blocks, and a random sequence of edges to toggle in it
    fn graph_and_toggles(max_blocks: u32)
        (num_blocks in 2u32..=max_blocks)
        (edges in edges_between(num_blocks, 2 * num_blocks as usize),
         toggles in edges_between(num_blocks, 20),
         num_blocks in Just(num_blocks)) -> (u32, Vec<(u32, u32)>, Vec<(u32, u32)>)
    {
        (num_blocks, edges, toggles)
    }
}

/// Check that dominance is reflexive, antisymmetric and transitive on the blocks of `tree`, and
/// that nearest common dominators are the deepest blocks dominating both of their operands
fn check_dominance_relation<const IS_POST_DOM: bool>(
    tree: &DomTreeBase<CfgRef, IS_POST_DOM>,
) -> Result<(), TestCaseError> {
    let blocks = tree.preorder().iter().filter_map(|node| node.block()).collect::<Vec<_>>();

    for &a in blocks.iter() {
        prop_assert!(tree.dominates(a, a), "{a} does not dominate itself");
        prop_assert!(!tree.properly_dominates(a, a), "{a} properly dominates itself");

        for &b in blocks.iter() {
            if a != b {
                prop_assert!(
                    !(tree.dominates(a, b) && tree.dominates(b, a)),
                    "{a} and {b} dominate each other"
                );
            }

            for &c in blocks.iter() {
                if tree.dominates(a, b) && tree.dominates(b, c) {
                    prop_assert!(tree.dominates(a, c), "{a} dom {b} dom {c}, but not {a} dom {c}");
                }
            }

            let ncd = tree.find_nearest_common_dominator(a, b);
            if !IS_POST_DOM {
                prop_assert!(ncd.is_some(), "{a} and {b} have no common dominator");
            }
            match ncd {
                Some(ncd) => {
                    prop_assert!(tree.dominates(ncd, a) && tree.dominates(ncd, b));
                    for &d in blocks.iter() {
                        if tree.dominates(d, a) && tree.dominates(d, b) {
                            prop_assert!(
                                tree.dominates(d, ncd),
                                "{d} dominates {a} and {b}, but not their ncd {ncd}"
                            );
                        }
                    }
                }
                None => {
                    // Only the virtual root dominates both
                    prop_assert!(!blocks.iter().any(|&d| tree.dominates(d, a) && tree.dominates(d, b)));
                }
            }
        }
    }

    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn incremental_dominance_matches_fresh_tree((num_blocks, edges, toggles) in graph_and_toggles(12)) {
        init_logger();

        let graph = cfg(num_blocks as usize, &edges);
        let mut tree = DominanceTree::new(graph.clone()).unwrap();
        prop_assert!(tree.verify());

        for (from, to) in toggles {
            toggle_edge(&graph, &mut tree, from, to);
            prop_assert!(tree.verify(), "invalid tree after toggling {from} -> {to} in {:?}", graph);
        }
    }

    #[test]
    fn incremental_post_dominance_matches_fresh_tree((num_blocks, edges, toggles) in graph_and_toggles(12)) {
        init_logger();

        let graph = cfg(num_blocks as usize, &edges);
        let mut tree = PostDominanceTree::new(graph.clone()).unwrap();
        prop_assert!(tree.verify());

        for (from, to) in toggles {
            toggle_edge(&graph, &mut tree, from, to);
            prop_assert!(tree.verify(), "invalid tree after toggling {from} -> {to} in {:?}", graph);
        }
    }

    #[test]
    fn batch_updates_match_fresh_tree_for_random_graphs((num_blocks, edges, toggles) in graph_and_toggles(12)) {
        init_logger();

        let graph = cfg(num_blocks as usize, &edges);
        let mut tree = DominanceTree::new(graph.clone()).unwrap();
        let mut post_tree = PostDominanceTree::new(graph.clone()).unwrap();

        let updates = toggles
            .into_iter()
            .map(|(from, to)| toggle_graph_edge(&graph, from, to))
            .collect::<Vec<_>>();
        tree.apply_updates(&updates);
        post_tree.apply_updates(&updates);

        prop_assert!(tree.verify(), "invalid tree after {updates:?} in {:?}", graph);
        prop_assert!(post_tree.verify(), "invalid post-dominance tree after {updates:?} in {:?}", graph);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn dominance_is_a_tree_order((num_blocks, edges, _toggles) in graph_and_toggles(50)) {
        init_logger();

        let graph = cfg(num_blocks as usize, &edges);
        let tree = DominanceTree::new(graph.clone()).unwrap();
        check_dominance_relation(&tree)?;
        let post_tree = PostDominanceTree::new(graph).unwrap();
        check_dominance_relation(&post_tree)?;
    }

    #[test]
    fn incremental_updates_match_fresh_tree_for_large_graphs(
        (num_blocks, edges, toggles) in graph_and_toggles(50)
    ) {
        init_logger();

        let graph = cfg(num_blocks as usize, &edges);
        let mut tree = DominanceTree::new(graph.clone()).unwrap();
        let mut post_tree = PostDominanceTree::new(graph.clone()).unwrap();

        for (from, to) in toggles {
            let (from_block, to_block) = (b(from), b(to));
            let update = toggle_graph_edge(&graph, from, to);
            if update.is_insert() {
                tree.insert_edge(from_block, to_block);
                post_tree.insert_edge(from_block, to_block);
            } else {
                tree.delete_edge(from_block, to_block);
                post_tree.delete_edge(from_block, to_block);
            }
            prop_assert!(tree.verify(), "invalid tree after {update:?} in {:?}", graph);
            prop_assert!(post_tree.verify(), "invalid post-dominance tree after {update:?} in {:?}", graph);
        }

        check_dominance_relation(&tree)?;
        check_dominance_relation(&post_tree)?;
    }
}
