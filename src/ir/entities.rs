//! Entity references into the speculative context tree.
//!
//! Everything the analysis looks at lives in a table owned by
//! [`SpecTree`](super::SpecTree) and is named by a compact `u32` index. Each
//! table gets its own index type, so a block number can never be confused with
//! a context number.
//!
//! Blocks and loops are numbered per function body: the same `Block` names one
//! block of the body's control flow graph in every context that specializes
//! that body. Contexts, peels and instructions are global to the tree.

use cranelift_entity::entity_impl;

/// An abstract memory object produced by the points-to analysis: one stack
/// allocation in one frame, one heap allocation site, or one global.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Object(u32);
entity_impl!(Object, "obj");

/// A function body: the invariant control flow graph and loop nest shared by
/// every context specializing the function.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Body(u32);
entity_impl!(Body, "body");

/// A basic block of a [`Body`], in the body's topological numbering.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// A natural loop of a [`Body`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Loop(u32);
entity_impl!(Loop, "loop");

/// A node of the context tree: an inlined function or one peeled loop
/// iteration.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Context(u32);
entity_impl!(Context, "ctx");

/// A peel attempt: the sequence of iteration contexts produced for one loop
/// inside one context.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Peel(u32);
entity_impl!(Peel, "peel");

/// A specialized instruction: one instruction of a body as it appears in one
/// particular context.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// A callee function, as named by direct calls.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncRef(u32);
entity_impl!(FuncRef, "fn");
