//! Incremental dominator and post-dominator trees.
//!
//! The trees in this crate are computed with the Semi-NCA algorithm, and kept up to date across
//! CFG edits using the Depth-Based Search algorithm for incremental dominator tree maintenance:
//!
//! * [1] Georgiadis et al., "An Experimental Study of Dynamic Dominators"
//! * [2] Loukas Georgiadis, "Linear-Time Algorithms for Dominators and Related Problems"
//!
//! Both are generic over any graph implementing [DominanceGraph], which is satisfied by any cheap,
//! cloneable handle implementing [pilc_graph::Graph], [pilc_graph::InvertibleGraph] and
//! [pilc_graph::GraphNodes] (e.g. [pilc_graph::CfgRef]).
#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

mod frontier;
pub mod nca;
mod tree;
mod verify;

use core::{fmt, hash::Hash};

use pilc_graph::{Graph, GraphNodes, InvertibleGraph};

pub use self::{
    frontier::DominanceFrontier,
    nca::{BatchUpdateInfo, SemiNCA},
    tree::{
        DomSubtree, DomTreeBase, DomTreeError, DomTreeNode, DomTreeRoots, DomTreeVerificationLevel,
        DominanceTree, PostDominanceTree, PostOrderDomTreeIter, PreOrderDomTreeIter,
    },
};

/// The requirements a graph must satisfy in order to compute dominance over it.
///
/// Dominance trees hold on to the graph they were computed for, so that they can observe the
/// graph as it is mutated and be incrementally updated. As such, the graph is expected to be a
/// cheap handle type, and its nodes small, copyable identifiers.
pub trait DominanceGraph:
    Clone + GraphNodes<Node: Copy + Ord + Hash + fmt::Debug + fmt::Display> + InvertibleGraph
{
}

impl<G> DominanceGraph for G where
    G: Clone + GraphNodes<Node: Copy + Ord + Hash + fmt::Debug + fmt::Display> + InvertibleGraph
{
}

/// The type of node in the graph `G`
pub type NodeOf<G> = <G as Graph>::Node;
