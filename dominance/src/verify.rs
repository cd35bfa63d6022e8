//! Verification of dominance trees against the graph they were computed for.
//!
//! None of the checks in this module panic on a malformed tree: problems are reported with
//! `log::error!`, and the check returns false.
use alloc::rc::Rc;

use pilc_graph::SmallVec;

use crate::{
    DomTreeBase, DomTreeNode, DomTreeVerificationLevel, DominanceGraph, NodeOf, SemiNCA,
    nca::is_permutation,
};

/// Run the checks selected by `level` on `tree`
pub(crate) fn verify<G: DominanceGraph, const IS_POST_DOM: bool>(
    tree: &DomTreeBase<G, IS_POST_DOM>,
    level: DomTreeVerificationLevel,
) -> bool {
    // The simplest check is to compare against a new tree. This also prints the old and new
    // trees, if they are different.
    if !is_same_as_fresh_tree(tree) {
        return false;
    }

    // Common checks to verify the properties of the tree. O(n log n) at worst.
    if !verify_roots(tree)
        || !verify_reachability(tree)
        || !verify_levels(tree)
        || !verify_dfs_numbers(tree)
    {
        return false;
    }

    // Extra checks depending on the verification level. Up to O(n^3).
    if matches!(level, DomTreeVerificationLevel::Basic | DomTreeVerificationLevel::Full)
        && !verify_parent_property(tree)
    {
        return false;
    }

    if level == DomTreeVerificationLevel::Full && !verify_sibling_property(tree) {
        return false;
    }

    true
}

fn is_same_as_fresh_tree<G: DominanceGraph, const IS_POST_DOM: bool>(
    tree: &DomTreeBase<G, IS_POST_DOM>,
) -> bool {
    let mut fresh = DomTreeBase::<G, IS_POST_DOM>::empty(tree.parent().clone());
    SemiNCA::<G, IS_POST_DOM>::compute_from_scratch(&mut fresh, None);

    if tree.is_same_as(&fresh) {
        return true;
    }

    log::error!(
        target: "dominance:verify",
        "{} is different than a freshly computed one!\n\tcurrent:\n{tree}\n\tfreshly computed tree:\n{fresh}",
        if IS_POST_DOM { "post-dominator tree" } else { "dominator tree" },
    );
    false
}

/// Verify that the roots of `tree` are the roots that would be computed for its graph
fn verify_roots<G: DominanceGraph, const IS_POST_DOM: bool>(
    tree: &DomTreeBase<G, IS_POST_DOM>,
) -> bool {
    let graph = tree.parent();
    if graph.is_empty() {
        if !tree.roots().is_empty() {
            log::error!(target: "dominance:verify", "tree of an empty graph has roots!");
            return false;
        }
        return true;
    }

    if !IS_POST_DOM {
        let Some(&root) = tree.roots().first() else {
            log::error!(target: "dominance:verify", "tree doesn't have a root!");
            return false;
        };

        let entry = graph.entry_node();
        if root != entry {
            log::error!(
                target: "dominance:verify",
                "tree's root ({root}) is not its graph's entry node ({entry})!"
            );
            return false;
        }
    }

    let computed_roots = SemiNCA::<G, IS_POST_DOM>::find_roots(tree, None);
    if !is_permutation(tree.roots(), &computed_roots) {
        log::error!(
            target: "dominance:verify",
            "tree has different roots than freshly computed ones!\n\ttree roots: {:?}\n\tcomputed roots: {computed_roots:?}",
            tree.roots(),
        );
        return false;
    }

    true
}

/// Verify that the nodes of `tree` are exactly the nodes reachable from its roots
fn verify_reachability<G: DominanceGraph, const IS_POST_DOM: bool>(
    tree: &DomTreeBase<G, IS_POST_DOM>,
) -> bool {
    let mut snca = SemiNCA::<G, IS_POST_DOM>::new(tree.parent().clone(), None);
    snca.do_full_dfs_walk(tree, |_, _| true);

    for node in tree.nodes() {
        // The virtual root has a corresponding virtual graph node
        let Some(block) = node.block() else {
            continue;
        };

        if snca.num(Some(block)) == 0 {
            log::error!(target: "dominance:verify", "tree node {block} not found by DFS walk!");
            return false;
        }
    }

    for block in snca.visited() {
        if tree.get(block).is_none() {
            log::error!(target: "dominance:verify", "graph node {block} not found in the tree!");
            return false;
        }
    }

    true
}

/// Verify that every node is one level deeper than its immediate dominator
fn verify_levels<G: DominanceGraph, const IS_POST_DOM: bool>(
    tree: &DomTreeBase<G, IS_POST_DOM>,
) -> bool {
    for node in tree.nodes() {
        if node.block().is_none() {
            continue;
        }

        match node.idom() {
            None if node.level() != 0 => {
                log::error!(
                    target: "dominance:verify",
                    "node without an idom ({node}) has a nonzero level {}!",
                    node.level()
                );
                return false;
            }
            Some(idom) if node.level() != idom.level() + 1 => {
                log::error!(
                    target: "dominance:verify",
                    "node {node} has level {} while its idom {idom} has level {}!",
                    node.level(),
                    idom.level()
                );
                return false;
            }
            _ => (),
        }
    }

    true
}

/// Verify the DFS numbering of `tree`, if it is marked valid.
///
/// The intervals of the children of every node must tile the interval of the node, without gaps.
fn verify_dfs_numbers<G: DominanceGraph, const IS_POST_DOM: bool>(
    tree: &DomTreeBase<G, IS_POST_DOM>,
) -> bool {
    if !tree.has_valid_dfs_numbers() {
        return true;
    }

    let Some(root) = tree.root_node() else {
        return true;
    };

    // Although the numbering would also work starting from some other value, 0-based numbering
    // is assumed
    if root.dfs_num_in() != Some(0) {
        log::error!(
            target: "dominance:verify",
            "dfs-in number for the tree root ({root}) is not 0! {}",
            dfs_numbers(&root)
        );
        return false;
    }

    for node in tree.nodes() {
        let (Some(num_in), Some(num_out)) = (node.dfs_num_in(), node.dfs_num_out()) else {
            log::error!(
                target: "dominance:verify",
                "node {node} has no dfs numbers, but the numbering is marked valid!"
            );
            return false;
        };

        if node.is_leaf() {
            if num_in + 1 != num_out {
                log::error!(
                    target: "dominance:verify",
                    "dfs numbers for leaf node {node} {} are not consecutive!",
                    dfs_numbers(node)
                );
                return false;
            }
            continue;
        }

        // Sort the children, such that it is possible to check for gaps between the numbers of
        // adjacent children
        let mut children = node.children();
        if children.iter().any(|child| child.dfs_num_in().is_none() || child.dfs_num_out().is_none())
        {
            log::error!(
                target: "dominance:verify",
                "a child of {node} has no dfs numbers, but the numbering is marked valid!"
            );
            return false;
        }
        children.sort_by_key(|child| child.dfs_num_in());

        let report = |first: &Rc<DomTreeNode<NodeOf<G>>>,
                      second: Option<&Rc<DomTreeNode<NodeOf<G>>>>| {
            let children = children
                .iter()
                .map(|child| dfs_numbers(child))
                .collect::<SmallVec<[_; 8]>>();
            match second {
                Some(second) => log::error!(
                    target: "dominance:verify",
                    "incorrect dfs numbers for {node} {}: children {first} {} and {second} {} are not \
                     contiguous, all children: {children:?}",
                    dfs_numbers(node),
                    dfs_numbers(first),
                    dfs_numbers(second),
                ),
                None => log::error!(
                    target: "dominance:verify",
                    "incorrect dfs numbers for {node} {}: child {first} {} does not line up with its \
                     parent, all children: {children:?}",
                    dfs_numbers(node),
                    dfs_numbers(first),
                ),
            }
        };

        let first = &children[0];
        if first.dfs_num_in() != Some(num_in + 1) {
            report(first, None);
            return false;
        }

        let last = &children[children.len() - 1];
        if last.dfs_num_out().map(|out| out + 1) != Some(num_out) {
            report(last, None);
            return false;
        }

        for pair in children.windows(2) {
            if pair[0].dfs_num_out().map(|out| out + 1) != pair[1].dfs_num_in() {
                report(&pair[0], Some(&pair[1]));
                return false;
            }
        }
    }

    true
}

/// Check that removing a node from the graph makes all of its children in the tree unreachable.
///
/// This proves that the tree has the parent property, i.e. for each node `v`, `idom(v)`
/// dominates `v`. O(n^2) time.
fn verify_parent_property<G: DominanceGraph, const IS_POST_DOM: bool>(
    tree: &DomTreeBase<G, IS_POST_DOM>,
) -> bool {
    let mut snca = SemiNCA::<G, IS_POST_DOM>::new(tree.parent().clone(), None);
    for node in tree.nodes() {
        let Some(block) = node.block() else {
            continue;
        };
        if node.is_leaf() {
            continue;
        }

        snca.clear();
        snca.do_full_dfs_walk(tree, |from, to| from != block && to != block);

        for child in node.children() {
            if snca.num(child.block()) != 0 {
                log::error!(
                    target: "dominance:verify",
                    "child {child} reachable after its parent {block} is removed!"
                );
                return false;
            }
        }
    }

    true
}

/// Check that removing a node from the graph leaves all of its siblings in the tree reachable.
///
/// This proves that the tree has the sibling property, i.e. for each sibling `v` and `w`, neither
/// `v` dominates `w`, nor `w` dominates `v`. O(n^3) time.
fn verify_sibling_property<G: DominanceGraph, const IS_POST_DOM: bool>(
    tree: &DomTreeBase<G, IS_POST_DOM>,
) -> bool {
    let mut snca = SemiNCA::<G, IS_POST_DOM>::new(tree.parent().clone(), None);
    for node in tree.nodes() {
        if node.block().is_none() || node.is_leaf() {
            continue;
        }

        let children = node.children();
        for child in children.iter() {
            let Some(removed) = child.block() else {
                continue;
            };

            snca.clear();
            snca.do_full_dfs_walk(tree, |from, to| from != removed && to != removed);

            for sibling in children.iter() {
                if Rc::ptr_eq(sibling, child) {
                    continue;
                }

                if snca.num(sibling.block()) == 0 {
                    log::error!(
                        target: "dominance:verify",
                        "node {sibling} not reachable when its sibling {child} is removed!"
                    );
                    return false;
                }
            }
        }
    }

    true
}

struct DfsNumbers(Option<u32>, Option<u32>);

impl core::fmt::Debug for DfsNumbers {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(self, f)
    }
}

impl core::fmt::Display for DfsNumbers {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.0 {
            Some(num) => write!(f, "{{{num}, ")?,
            None => f.write_str("{?, ")?,
        }
        match self.1 {
            Some(num) => write!(f, "{num}}}"),
            None => f.write_str("?}"),
        }
    }
}

fn dfs_numbers<N>(node: &DomTreeNode<N>) -> DfsNumbers
where
    N: Copy,
{
    DfsNumbers(node.dfs_num_in(), node.dfs_num_out())
}
