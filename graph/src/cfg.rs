use alloc::{rc::Rc, vec::Vec};
use core::{
    cell::{Ref, RefCell, RefMut},
    fmt,
    iter::Map,
    ops::Range,
};

use smallvec::SmallVec;

use crate::{Graph, GraphNodes, InvertibleGraph};

/// A unique identifier for a block in a [Cfg].
///
/// Identifiers are dense indices, allocated in the order blocks are added to the graph.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct BlockId(u32);

impl BlockId {
    #[inline]
    pub const fn from_u32(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block{}", self.0)
    }
}

#[derive(Default, Clone)]
struct BlockEdges {
    successors: SmallVec<[BlockId; 2]>,
    predecessors: SmallVec<[BlockId; 2]>,
}

/// A minimal control-flow graph: a set of blocks connected by directed edges.
///
/// The first block added is the entry block, unless overridden with [Cfg::set_entry]. The graph is
/// a simple graph, i.e. there is at most one edge between any ordered pair of blocks.
#[derive(Default, Clone)]
pub struct Cfg {
    blocks: Vec<BlockEdges>,
    entry: Option<BlockId>,
}

impl Cfg {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a graph with `num_blocks` blocks and the given edges
    pub fn with_edges(num_blocks: usize, edges: &[(u32, u32)]) -> Self {
        let mut cfg = Self::default();
        for _ in 0..num_blocks {
            cfg.add_block();
        }
        for &(from, to) in edges {
            cfg.add_edge(BlockId(from), BlockId(to));
        }
        cfg
    }

    /// Add a new, disconnected block to the graph
    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BlockEdges::default());
        if self.entry.is_none() {
            self.entry = Some(id);
        }
        id
    }

    /// Add `N` new blocks to the graph
    pub fn add_blocks<const N: usize>(&mut self) -> [BlockId; N] {
        core::array::from_fn(|_| self.add_block())
    }

    /// Make `block` the entry of this graph
    pub fn set_entry(&mut self, block: BlockId) {
        assert!(self.contains(block), "{block} is not a block of this graph");
        self.entry = Some(block);
    }

    #[inline]
    pub fn entry(&self) -> Option<BlockId> {
        self.entry
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[inline]
    pub fn contains(&self, block: BlockId) -> bool {
        block.as_usize() < self.blocks.len()
    }

    /// Get an iterator over all blocks in the graph, in allocation order
    pub fn blocks(&self) -> impl ExactSizeIterator<Item = BlockId> + use<> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    pub fn successors(&self, block: BlockId) -> &[BlockId] {
        &self.blocks[block.as_usize()].successors
    }

    pub fn predecessors(&self, block: BlockId) -> &[BlockId] {
        &self.blocks[block.as_usize()].predecessors
    }

    pub fn has_edge(&self, from: BlockId, to: BlockId) -> bool {
        self.successors(from).contains(&to)
    }

    /// Add an edge from `from` to `to`.
    ///
    /// Returns false if the edge was already present.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) -> bool {
        assert!(self.contains(from) && self.contains(to), "invalid edge {from} -> {to}");
        if self.has_edge(from, to) {
            return false;
        }
        self.blocks[from.as_usize()].successors.push(to);
        self.blocks[to.as_usize()].predecessors.push(from);
        true
    }

    /// Remove the edge from `from` to `to`.
    ///
    /// Returns false if there was no such edge.
    pub fn remove_edge(&mut self, from: BlockId, to: BlockId) -> bool {
        let successors = &mut self.blocks[from.as_usize()].successors;
        let Some(index) = successors.iter().position(|succ| succ == &to) else {
            return false;
        };
        successors.remove(index);
        let predecessors = &mut self.blocks[to.as_usize()].predecessors;
        if let Some(index) = predecessors.iter().position(|pred| pred == &from) {
            predecessors.remove(index);
        }
        true
    }
}

impl fmt::Debug for Cfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_map();
        for block in self.blocks() {
            builder.entry(&block, &self.successors(block));
        }
        builder.finish()
    }
}

pub type CfgChildIter = smallvec::IntoIter<[BlockId; 4]>;
pub type CfgNodeIter = Map<Range<u32>, fn(u32) -> BlockId>;

impl Graph for Cfg {
    type ChildIter = CfgChildIter;
    type Node = BlockId;

    fn size(&self) -> usize {
        self.blocks.len()
    }

    fn entry_node(&self) -> Self::Node {
        self.entry.expect("cannot get entry of an empty graph")
    }

    fn children(&self, parent: Self::Node) -> Self::ChildIter {
        SmallVec::from_slice(self.successors(parent)).into_iter()
    }

    fn contains_node(&self, node: &Self::Node) -> bool {
        self.contains(*node)
    }
}

impl InvertibleGraph for Cfg {
    type InvertibleChildIter = CfgChildIter;

    fn inverse_children(&self, parent: Self::Node) -> Self::InvertibleChildIter {
        SmallVec::from_slice(self.predecessors(parent)).into_iter()
    }
}

impl GraphNodes for Cfg {
    type NodeIter = CfgNodeIter;

    fn nodes(&self) -> Self::NodeIter {
        (0..self.blocks.len() as u32).map(BlockId as fn(u32) -> BlockId)
    }

    fn num_edges(&self) -> usize {
        self.blocks.iter().map(|block| block.successors.len()).sum()
    }
}

/// A shared, mutable handle to a [Cfg].
///
/// Analyses built over a graph keep a handle to it so that they can observe the graph as it is
/// mutated, e.g. to incrementally update a dominator tree after an edge is inserted.
#[derive(Default, Clone)]
pub struct CfgRef(Rc<RefCell<Cfg>>);

impl CfgRef {
    pub fn new(cfg: Cfg) -> Self {
        Self(Rc::new(RefCell::new(cfg)))
    }

    #[inline]
    pub fn borrow(&self) -> Ref<'_, Cfg> {
        self.0.borrow()
    }

    #[inline]
    pub fn borrow_mut(&self) -> RefMut<'_, Cfg> {
        self.0.borrow_mut()
    }

    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl From<Cfg> for CfgRef {
    fn from(cfg: Cfg) -> Self {
        Self::new(cfg)
    }
}

impl Eq for CfgRef {}
impl PartialEq for CfgRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for CfgRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.borrow(), f)
    }
}

impl Graph for CfgRef {
    type ChildIter = CfgChildIter;
    type Node = BlockId;

    fn size(&self) -> usize {
        self.borrow().size()
    }

    fn entry_node(&self) -> Self::Node {
        self.borrow().entry_node()
    }

    fn children(&self, parent: Self::Node) -> Self::ChildIter {
        self.borrow().children(parent)
    }

    fn contains_node(&self, node: &Self::Node) -> bool {
        self.borrow().contains(*node)
    }
}

impl InvertibleGraph for CfgRef {
    type InvertibleChildIter = CfgChildIter;

    fn inverse_children(&self, parent: Self::Node) -> Self::InvertibleChildIter {
        self.borrow().inverse_children(parent)
    }
}

impl GraphNodes for CfgRef {
    type NodeIter = CfgNodeIter;

    fn nodes(&self) -> Self::NodeIter {
        self.borrow().nodes()
    }

    fn num_edges(&self) -> usize {
        self.borrow().num_edges()
    }
}
