//! Speculative contexts.
//!
//! The evaluation engine explores a program as a tree of contexts. A function
//! context specializes one body for one call site; an iteration context
//! specializes the blocks of one loop for one trip of a peel attempt. Both
//! kinds share a representation: the body they specialize, the loop scope
//! they cover, and a sparse table of block instances.

use super::entities::{Block, Body, Context, Inst, Loop, Peel};
use cranelift_entity::SecondaryMap;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// The two kinds of context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContextKind {
    /// An inlined (or root) function.
    Function {
        /// The call instruction in the parent context. `None` for roots: the
        /// program entry and checker functions of path conditions.
        call_site: Option<Inst>,
        /// Stack depth of this function root in the specialization target,
        /// used to match global path conditions.
        target_stack_depth: Option<u32>,
    },
    /// One iteration of a peeled loop.
    Iteration {
        /// The peel attempt this iteration belongs to.
        peel: Peel,
        /// Zero-based trip number.
        index: u32,
    },
}

/// A block as specialized in one context.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockInstance {
    /// The specialized instructions, in program order.
    pub insts: Vec<Inst>,
    /// Liveness of each outgoing edge, indexed like the body's successors.
    pub succs_alive: SmallVec<[bool; 2]>,
}

/// A node of the context tree.
#[derive(Clone, Debug)]
pub struct ContextData {
    /// Function or iteration.
    pub kind: ContextKind,
    /// The specialized body.
    pub body: Body,
    /// The loop whose blocks this context covers; `None` for functions.
    pub scope: Option<Loop>,
    /// Parent in the context tree: the caller for inlined functions, the
    /// context owning the peel attempt for iterations.
    pub parent: Option<Context>,
    /// The function context this context belongs to. Functions are their own
    /// root.
    pub root: Context,
    /// Whether this context will be materialized by the commit stage.
    pub enabled: bool,
    /// Already materialized by an earlier commit; nothing left to decide.
    pub committed: bool,
    /// Block instances. Blocks the engine found unreachable have none.
    pub blocks: SecondaryMap<Block, Option<BlockInstance>>,
    /// Peel attempts of loops directly inside `scope`.
    pub peels: FxHashMap<Loop, Peel>,
    /// Call instructions in this context with an inlined child.
    pub calls: Vec<Inst>,
}

impl ContextData {
    pub(crate) fn new(
        kind: ContextKind,
        body: Body,
        scope: Option<Loop>,
        parent: Option<Context>,
        root: Context,
    ) -> Self {
        Self {
            kind,
            body,
            scope,
            parent,
            root,
            enabled: true,
            committed: false,
            blocks: SecondaryMap::new(),
            peels: FxHashMap::default(),
            calls: Vec::new(),
        }
    }

    /// The instance of `block` in this context, if the block is reachable.
    pub fn block(&self, block: Block) -> Option<&BlockInstance> {
        self.blocks[block].as_ref()
    }

    /// The call site of a function context.
    pub fn call_site(&self) -> Option<Inst> {
        match self.kind {
            ContextKind::Function { call_site, .. } => call_site,
            ContextKind::Iteration { .. } => None,
        }
    }

    /// Is this a function context?
    pub fn is_function(&self) -> bool {
        matches!(self.kind, ContextKind::Function { .. })
    }

    /// The peel attempt of an iteration context.
    pub fn peel(&self) -> Option<Peel> {
        match self.kind {
            ContextKind::Iteration { peel, .. } => Some(peel),
            ContextKind::Function { .. } => None,
        }
    }
}

/// A peel attempt: a loop explored trip by trip.
#[derive(Clone, Debug)]
pub struct PeelData {
    /// The context containing the loop.
    pub owner: Context,
    /// The loop being peeled.
    pub lp: Loop,
    /// Iteration contexts, in trip order.
    pub iterations: Vec<Context>,
    /// The engine proved the loop exits after the last iteration. Attempts
    /// that did not terminate are walked as an ordinary loop in the owner.
    pub terminated: bool,
    /// Whether the iterations will be materialized.
    pub enabled: bool,
}
