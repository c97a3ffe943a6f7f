//! The speculative IR consumed from the evaluation engine.
//!
//! [`SpecTree`] owns every table the analysis reads: abstract objects, function
//! bodies, the context tree with its peel attempts, and the specialized
//! instructions. The engine builds it once; the analysis only reads it and
//! keeps its own results on the side.

mod body;
mod context;
pub mod entities;
mod instructions;
mod path;

pub use self::body::{BlockData, BodyData, LoopData};
pub use self::context::{BlockInstance, ContextData, ContextKind, PeelData};
pub use self::entities::{Block, Body, Context, FuncRef, Inst, Loop, Object, Peel};
pub use self::instructions::{
    CallTarget, InstData, InstKind, LockDomain, Pointer, ResultState, SpecialCheck, Target,
    ThreadLocalState, ValueRange,
};
pub use self::path::{Asserted, PathCondition, PathConditions, PathFunction};

use crate::frames::Home;
use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::{EntityRef, PrimaryMap, SecondaryMap};
use rustc_hash::FxHashSet;
use smallvec::smallvec;

/// Where an abstract object lives.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    /// A stack allocation in the frame at this depth of the frame list.
    Stack {
        /// Frame depth, counted from the outermost frame.
        frame: u32,
    },
    /// A heap allocation site.
    Heap,
    /// A global variable.
    Global {
        /// The global is constant: nobody can race on it.
        constant: bool,
    },
}

/// An abstract memory object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectData {
    /// Where the object lives.
    pub kind: ObjectKind,
    /// Allocation size in bytes, when known.
    pub size: Option<u64>,
    /// The object is only ever available to the current thread.
    pub thread_private: bool,
}

impl ObjectData {
    /// A global of `size` bytes.
    pub fn global(size: u64) -> Self {
        Self::new(ObjectKind::Global { constant: false }, size)
    }

    /// A constant global of `size` bytes.
    pub fn constant_global(size: u64) -> Self {
        Self::new(ObjectKind::Global { constant: true }, size)
    }

    /// A heap allocation of `size` bytes.
    pub fn heap(size: u64) -> Self {
        Self::new(ObjectKind::Heap, size)
    }

    /// A stack allocation of `size` bytes in the frame at depth `frame`.
    pub fn stack(frame: u32, size: u64) -> Self {
        Self::new(ObjectKind::Stack { frame }, size)
    }

    fn new(kind: ObjectKind, size: u64) -> Self {
        Self {
            kind,
            size: Some(size),
            thread_private: false,
        }
    }

    /// Mark the object as private to the current thread.
    pub fn private(mut self) -> Self {
        self.thread_private = true;
        self
    }

    /// Is this a constant global?
    pub fn is_constant(&self) -> bool {
        matches!(self.kind, ObjectKind::Global { constant: true })
    }

    /// The frame list store that tracks this object.
    pub fn home(&self) -> Home {
        match self.kind {
            ObjectKind::Stack { frame } => Home::Frame(frame),
            ObjectKind::Heap | ObjectKind::Global { .. } => Home::Global,
        }
    }
}

/// The speculative context tree and everything it refers to.
#[derive(Clone, Debug, Default)]
pub struct SpecTree {
    objects: PrimaryMap<Object, ObjectData>,
    bodies: PrimaryMap<Body, BodyData>,
    contexts: PrimaryMap<Context, ContextData>,
    peels: PrimaryMap<Peel, PeelData>,
    insts: PrimaryMap<Inst, InstData>,
    inlined: SecondaryMap<Inst, PackedOption<Context>>,
    yield_functions: FxHashSet<FuncRef>,
    path_conditions: PathConditions,
    entry: Option<Context>,
}

impl SpecTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an abstract object.
    pub fn add_object(&mut self, data: ObjectData) -> Object {
        self.objects.push(data)
    }

    /// Declare a function body.
    pub fn add_body(&mut self, data: BodyData) -> Body {
        self.bodies.push(data)
    }

    /// Create the context for the program entry, specializing `body`.
    pub fn add_entry(&mut self, body: Body) -> Context {
        let ctx = self.add_root(body, Some(0));
        self.entry = Some(ctx);
        ctx
    }

    /// Create a root function context that is not the program entry, such as
    /// the checker of a function path condition.
    pub fn add_root(&mut self, body: Body, target_stack_depth: Option<u32>) -> Context {
        let ctx = Context::new(self.contexts.len());
        self.contexts.push(ContextData::new(
            ContextKind::Function {
                call_site: None,
                target_stack_depth,
            },
            body,
            None,
            None,
            ctx,
        ))
    }

    /// Inline `body` at the call instruction `call`.
    pub fn inline_call(&mut self, call: Inst, body: Body) -> Context {
        let parent = self.insts[call].ctx;
        let ctx = Context::new(self.contexts.len());
        self.contexts.push(ContextData::new(
            ContextKind::Function {
                call_site: Some(call),
                target_stack_depth: None,
            },
            body,
            None,
            Some(parent),
            ctx,
        ));
        self.contexts[parent].calls.push(call);
        self.inlined[call] = ctx.into();
        ctx
    }

    /// Start a peel attempt of loop `lp` inside `ctx`.
    pub fn add_peel(&mut self, ctx: Context, lp: Loop) -> Peel {
        let peel = self.peels.push(PeelData {
            owner: ctx,
            lp,
            iterations: Vec::new(),
            terminated: false,
            enabled: true,
        });
        self.contexts[ctx].peels.insert(lp, peel);
        peel
    }

    /// Append an iteration to `peel`.
    pub fn add_iteration(&mut self, peel: Peel) -> Context {
        let owner = self.peels[peel].owner;
        let lp = self.peels[peel].lp;
        let index = self.peels[peel].iterations.len() as u32;
        let owner_data = &self.contexts[owner];
        let data = ContextData::new(
            ContextKind::Iteration { peel, index },
            owner_data.body,
            Some(lp),
            Some(owner),
            owner_data.root,
        );
        let ctx = self.contexts.push(data);
        self.peels[peel].iterations.push(ctx);
        ctx
    }

    /// Create the instance of `block` in `ctx`, with every outgoing edge live.
    pub fn instantiate_block(&mut self, ctx: Context, block: Block) {
        let body = self.contexts[ctx].body;
        let nsuccs = self.bodies[body].succs(block).len();
        let slot = &mut self.contexts[ctx].blocks[block];
        if slot.is_none() {
            *slot = Some(BlockInstance {
                insts: Vec::new(),
                succs_alive: smallvec![true; nsuccs],
            });
        }
    }

    /// Mark the edge `from -> to` dead in `ctx`.
    pub fn kill_edge(&mut self, ctx: Context, from: Block, to: Block) {
        let body = self.contexts[ctx].body;
        let Some(index) = self.bodies[body].succ_index(from, to) else {
            return;
        };
        if let Some(instance) = self.contexts[ctx].blocks[from].as_mut() {
            instance.succs_alive[index] = false;
        }
    }

    /// Append an instruction to `block` in `ctx`, instantiating the block if
    /// needed.
    pub fn append_inst(&mut self, ctx: Context, block: Block, mut data: InstData) -> Inst {
        self.instantiate_block(ctx, block);
        data.ctx = ctx;
        data.block = block;
        let inst = self.insts.push(data);
        if let Some(instance) = self.contexts[ctx].blocks[block].as_mut() {
            instance.insts.push(inst);
        }
        inst
    }

    /// Declare `func` as a function that may yield to other threads.
    pub fn add_yield_function(&mut self, func: FuncRef) {
        self.yield_functions.insert(func);
    }

    /// May calling `func` yield to other threads?
    pub fn is_yield_function(&self, func: FuncRef) -> bool {
        self.yield_functions.contains(&func)
    }

    /// The program entry context.
    pub fn entry(&self) -> Option<Context> {
        self.entry
    }

    /// Data of `object`.
    pub fn object(&self, object: Object) -> &ObjectData {
        &self.objects[object]
    }

    /// Is `object` declared?
    pub fn is_valid_object(&self, object: Object) -> bool {
        self.objects.is_valid(object)
    }

    /// Data of `body`.
    pub fn body(&self, body: Body) -> &BodyData {
        &self.bodies[body]
    }

    /// Mutable data of `body`.
    pub fn body_mut(&mut self, body: Body) -> &mut BodyData {
        &mut self.bodies[body]
    }

    /// Iterate over the declared bodies.
    pub fn bodies(&self) -> impl Iterator<Item = (Body, &BodyData)> {
        self.bodies.iter()
    }

    /// Data of `ctx`.
    pub fn context(&self, ctx: Context) -> &ContextData {
        &self.contexts[ctx]
    }

    /// Mutable data of `ctx`.
    pub fn context_mut(&mut self, ctx: Context) -> &mut ContextData {
        &mut self.contexts[ctx]
    }

    /// Iterate over all contexts.
    pub fn contexts(&self) -> impl Iterator<Item = (Context, &ContextData)> {
        self.contexts.iter()
    }

    /// Number of contexts.
    pub fn num_contexts(&self) -> usize {
        self.contexts.len()
    }

    /// The body specialized by `ctx`.
    pub fn context_body(&self, ctx: Context) -> &BodyData {
        &self.bodies[self.contexts[ctx].body]
    }

    /// Data of `peel`.
    pub fn peel(&self, peel: Peel) -> &PeelData {
        &self.peels[peel]
    }

    /// Mutable data of `peel`.
    pub fn peel_mut(&mut self, peel: Peel) -> &mut PeelData {
        &mut self.peels[peel]
    }

    /// Iterate over all peel attempts.
    pub fn peels(&self) -> impl Iterator<Item = (Peel, &PeelData)> {
        self.peels.iter()
    }

    /// The terminated peel attempt of `lp` in `ctx`, if any.
    pub fn terminated_peel(&self, ctx: Context, lp: Loop) -> Option<Peel> {
        self.contexts[ctx]
            .peels
            .get(&lp)
            .copied()
            .filter(|&peel| self.peels[peel].terminated)
    }

    /// Data of `inst`.
    pub fn inst(&self, inst: Inst) -> &InstData {
        &self.insts[inst]
    }

    /// Data of `inst`, or `None` if it is not part of this tree.
    pub fn try_inst(&self, inst: Inst) -> Option<&InstData> {
        self.insts.get(inst)
    }

    /// Iterate over all instructions.
    pub fn insts(&self) -> impl Iterator<Item = (Inst, &InstData)> {
        self.insts.iter()
    }

    /// The context inlined at call instruction `inst`.
    pub fn inlined_context(&self, inst: Inst) -> Option<Context> {
        self.inlined[inst].expand()
    }

    /// Global path conditions.
    pub fn path_conditions(&self) -> &PathConditions {
        &self.path_conditions
    }

    /// Mutable global path conditions.
    pub fn path_conditions_mut(&mut self) -> &mut PathConditions {
        &mut self.path_conditions
    }

    /// Every checker context named by a function path condition.
    pub fn checkers(&self) -> impl Iterator<Item = Context> + '_ {
        self.path_conditions
            .functions
            .iter()
            .chain(self.bodies.values().flat_map(|b| b.path_conditions.functions.iter()))
            .map(|f| f.checker)
    }

    /// Is the edge `from -> to` live in `ctx`?
    pub fn edge_is_live(&self, ctx: Context, from: Block, to: Block) -> bool {
        let data = &self.contexts[ctx];
        let Some(instance) = data.block(from) else {
            return false;
        };
        self.bodies[data.body]
            .succ_index(from, to)
            .and_then(|index| instance.succs_alive.get(index).copied())
            .unwrap_or(false)
    }

    /// The blocks `ctx` is responsible for, in walk order: its instantiated
    /// blocks, minus the regions of child loops handed to terminated peel
    /// attempts.
    pub fn own_blocks(&self, ctx: Context) -> Vec<Block> {
        let data = &self.contexts[ctx];
        let body = &self.bodies[data.body];
        let (start, end) = match data.scope {
            Some(lp) => {
                let ld = body.loop_data(lp);
                (ld.header.index(), ld.end().index().min(body.num_blocks()))
            }
            None => (0, body.num_blocks()),
        };
        let mut blocks = Vec::new();
        let mut index = start;
        while index < end {
            let block = Block::new(index);
            if let Some(inner) = body.scope(block).filter(|&lp| Some(lp) != data.scope) {
                let child = body.immediate_child_loop(data.scope, inner);
                if self.terminated_peel(ctx, child).is_some() {
                    index = body.loop_data(child).end().index();
                    continue;
                }
            }
            if data.block(block).is_some() {
                blocks.push(block);
            }
            index += 1;
        }
        blocks
    }
}
