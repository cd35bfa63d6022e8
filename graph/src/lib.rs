//! Graph abstractions shared by the pilc middle-end.
//!
//! This crate provides the vocabulary that graph algorithms (most notably dominance, see the
//! `pilc-dominance` crate) are written against:
//!
//! * [Graph], [InvertibleGraph] and [GraphNodes], which describe what an algorithm may ask of an
//!   arbitrary graph representation, plus the [Inverse] adapter for walking edges backwards.
//! * Lazy depth-first and breadth-first traversals in [visit].
//! * [CfgUpdate] and [CfgDiff], which describe a batch of edge insertions/deletions and present
//!   a view of the graph at any point within that batch.
//! * [Cfg], a small adjacency-list control-flow graph used as the reference client graph.
#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub use smallvec::{SmallVec, smallvec};

pub type FxHashMap<K, V> = hashbrown::HashMap<K, V, rustc_hash::FxBuildHasher>;
pub type FxHashSet<K> = hashbrown::HashSet<K, rustc_hash::FxBuildHasher>;
pub use rustc_hash::{FxBuildHasher, FxHasher};

mod cfg;
mod diff;
mod graph;
pub mod visit;

pub use self::{
    cfg::{BlockId, Cfg, CfgRef},
    diff::{CfgDiff, CfgUpdate, CfgUpdateKind, GraphDiff, legalize_updates},
    graph::{Graph, GraphNodes, Inverse, InvertibleGraph, get_children},
    visit::{
        BreadthFirstIter, DefaultGraphVisitor, DepthFirstIter, GraphVisitor, LazyDfsVisitor,
        PostOrderIter, VisitedSet, breadth_first, depth_first, depth_first_with_visited,
        inverse_depth_first, post_order,
    },
};
