//! Path conditions.
//!
//! A path condition asserts that some memory holds a given value when control
//! reaches a given block. Whoever supplied the condition is responsible for it
//! being true, so the analysis treats the covered bytes as verified without
//! asking for a check.

use super::entities::{Block, Context};
use super::instructions::Pointer;

/// The value asserted by a memory path condition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Asserted {
    /// An integer of `size` bytes.
    Int {
        /// The asserted value.
        value: u64,
        /// Store size of the value's type.
        size: u64,
    },
    /// A constant byte string, terminator included if the string has one.
    Bytes(Vec<u8>),
}

impl Asserted {
    /// Number of bytes covered.
    pub fn len(&self) -> u64 {
        match self {
            Asserted::Int { size, .. } => *size,
            Asserted::Bytes(bytes) => bytes.len() as u64,
        }
    }

    /// Does the assertion cover no bytes at all?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A memory path condition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathCondition {
    /// Stack depth of the function root the condition applies to. `None` for
    /// conditions attached to a body, which apply at any depth.
    pub stack_depth: Option<u32>,
    /// The block at whose start the condition holds.
    pub block: Block,
    /// Memory the condition talks about.
    pub target: Pointer,
    /// Extra byte offset added to `target`.
    pub offset: i64,
    /// The asserted content.
    pub value: Asserted,
}

/// A function path condition: a checker function, walked as committed code at
/// the start of `block`, whose exit store replaces the block's store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathFunction {
    /// Stack depth of the function root the condition applies to. `None` for
    /// conditions attached to a body.
    pub stack_depth: Option<u32>,
    /// The block at whose start the checker runs.
    pub block: Block,
    /// The checker's function context.
    pub checker: Context,
}

/// A table of path conditions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathConditions {
    /// Memory conditions.
    pub memory: Vec<PathCondition>,
    /// Function conditions.
    pub functions: Vec<PathFunction>,
}

impl PathConditions {
    /// Is the table empty?
    pub fn is_empty(&self) -> bool {
        self.memory.is_empty() && self.functions.is_empty()
    }

    /// Memory conditions holding at the start of `block` for a root at
    /// `stack_depth`.
    pub fn memory_at(
        &self,
        stack_depth: Option<u32>,
        block: Block,
    ) -> impl Iterator<Item = &PathCondition> + '_ {
        self.memory
            .iter()
            .filter(move |c| c.stack_depth == stack_depth && c.block == block)
    }

    /// Checker functions to run at the start of `block` for a root at
    /// `stack_depth`.
    pub fn functions_at(
        &self,
        stack_depth: Option<u32>,
        block: Block,
    ) -> impl Iterator<Item = &PathFunction> + '_ {
        self.functions
            .iter()
            .filter(move |f| f.stack_depth == stack_depth && f.block == block)
    }
}
