//! Invariant function bodies.
//!
//! A `BodyData` is the part of a function that does not change between the
//! contexts specializing it: the control flow graph in topological block
//! order, the natural loop nest, and whether the function owns a stack frame.
//! Contexts refer to it and add their per-context liveness facts on top.

use super::entities::{Block, Loop};
use super::path::PathConditions;
use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::{EntityRef, PrimaryMap};
use smallvec::SmallVec;

/// Control flow facts about one block of a body.
#[derive(Clone, Debug, Default)]
pub struct BlockData {
    /// Successors, in terminator order. Per-context liveness flags are indexed
    /// the same way.
    pub succs: SmallVec<[Block; 2]>,
    /// Predecessors.
    pub preds: SmallVec<[Block; 2]>,
    /// Innermost loop containing this block.
    pub scope: PackedOption<Loop>,
    /// The block ends in a return.
    pub is_return: bool,
}

/// A natural loop. Its blocks are the contiguous range starting at the header.
#[derive(Clone, Debug)]
pub struct LoopData {
    /// First block of the loop.
    pub header: Block,
    /// The single block outside the loop branching to the header.
    pub preheader: Block,
    /// The block carrying the back edge to the header.
    pub latch: Block,
    /// Number of blocks in the loop, nested loops included.
    pub len: u32,
    /// Innermost enclosing loop.
    pub parent: PackedOption<Loop>,
}

impl LoopData {
    /// One past the last block of the loop.
    pub fn end(&self) -> Block {
        Block::new(self.header.index() + self.len as usize)
    }

    /// Is `block` one of this loop's blocks?
    pub fn contains_block(&self, block: Block) -> bool {
        self.header <= block && block < self.end()
    }
}

/// A function body.
#[derive(Clone, Debug, Default)]
pub struct BodyData {
    /// Name for diagnostics.
    pub name: String,
    /// The function owns stack-local allocations and needs a frame.
    pub has_frame: bool,
    /// Path conditions that hold in every context specializing this body.
    pub path_conditions: PathConditions,
    blocks: PrimaryMap<Block, BlockData>,
    loops: PrimaryMap<Loop, LoopData>,
}

impl BodyData {
    /// Create an empty body.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Append a block. Blocks must be created in topological order.
    pub fn add_block(&mut self) -> Block {
        self.blocks.push(BlockData::default())
    }

    /// Append `n` blocks and return the first.
    pub fn add_blocks(&mut self, n: usize) -> Block {
        let first = Block::new(self.blocks.len());
        for _ in 0..n {
            self.add_block();
        }
        first
    }

    /// Add the control flow edge `from -> to`.
    pub fn add_edge(&mut self, from: Block, to: Block) {
        self.blocks[from].succs.push(to);
        self.blocks[to].preds.push(from);
    }

    /// Mark `block` as ending in a return.
    pub fn set_return(&mut self, block: Block) {
        self.blocks[block].is_return = true;
    }

    /// Declare a natural loop covering `len` blocks from `header`.
    ///
    /// Enclosing loops must be declared before the loops they contain.
    pub fn add_loop(&mut self, header: Block, len: u32, preheader: Block, latch: Block) -> Loop {
        let parent = self.blocks[header].scope;
        let lp = self.loops.push(LoopData {
            header,
            preheader,
            latch,
            len,
            parent,
        });
        let end = self.loops[lp].end();
        for index in header.index()..end.index().min(self.blocks.len()) {
            self.blocks[Block::new(index)].scope = lp.into();
        }
        lp
    }

    /// The entry block.
    pub fn entry(&self) -> Block {
        Block::new(0)
    }

    /// Number of blocks.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Iterate over all blocks in order.
    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.blocks.keys()
    }

    /// Is `block` a block of this body?
    pub fn is_valid_block(&self, block: Block) -> bool {
        self.blocks.is_valid(block)
    }

    /// Control flow data of `block`.
    pub fn block(&self, block: Block) -> &BlockData {
        &self.blocks[block]
    }

    /// Successors of `block`.
    pub fn succs(&self, block: Block) -> &[Block] {
        &self.blocks[block].succs
    }

    /// Predecessors of `block`.
    pub fn preds(&self, block: Block) -> &[Block] {
        &self.blocks[block].preds
    }

    /// Innermost loop containing `block`.
    pub fn scope(&self, block: Block) -> Option<Loop> {
        self.blocks[block].scope.expand()
    }

    /// Iterate over the declared loops.
    pub fn loops(&self) -> impl Iterator<Item = (Loop, &LoopData)> {
        self.loops.iter()
    }

    /// Is `lp` a loop of this body?
    pub fn is_valid_loop(&self, lp: Loop) -> bool {
        self.loops.is_valid(lp)
    }

    /// Data of loop `lp`.
    pub fn loop_data(&self, lp: Loop) -> &LoopData {
        &self.loops[lp]
    }

    /// Is `inner` nested in `outer`, or equal to it? The function scope `None`
    /// contains everything.
    pub fn scope_contains(&self, outer: Option<Loop>, inner: Option<Loop>) -> bool {
        let Some(outer) = outer else {
            return true;
        };
        let mut cur = inner;
        while let Some(lp) = cur {
            if lp == outer {
                return true;
            }
            cur = self.loops[lp].parent.expand();
        }
        false
    }

    /// The loop directly inside `outer` that contains `inner`.
    ///
    /// `inner` must be strictly nested in `outer`.
    pub fn immediate_child_loop(&self, outer: Option<Loop>, inner: Loop) -> Loop {
        let mut cur = inner;
        loop {
            let parent = self.loops[cur].parent.expand();
            if parent == outer {
                return cur;
            }
            match parent {
                Some(p) => cur = p,
                None => return cur,
            }
        }
    }

    /// Position of `to` among the successors of `from`.
    pub fn succ_index(&self, from: Block, to: Block) -> Option<usize> {
        self.blocks[from].succs.iter().position(|&s| s == to)
    }

    /// The blocks ending in a return.
    pub fn return_blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.blocks
            .iter()
            .filter(|(_, data)| data.is_return)
            .map(|(block, _)| block)
    }
}
