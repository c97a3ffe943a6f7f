//! Instruction kinds as seen by the interference analysis.
//!
//! The evaluation engine folds every instruction down to the facts this
//! analysis needs: which objects a pointer operand may address, how many bytes
//! are touched, what was learned about loaded values, and the synchronisation
//! behaviour of calls and atomics. Everything else is `Other`.

use super::entities::{Block, Context, FuncRef, Object};
use cranelift_entity::packed_option::ReservedValue;
#[cfg(feature = "enable-serde")]
use serde_derive::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Interference classification of an instruction.
///
/// The order is from least to most safe, so the verdict over several candidate
/// targets is the minimum.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum ThreadLocalState {
    /// The value read may have been changed by another thread: a run-time
    /// check is required.
    MustCheck,
    /// Checked during the analysis and found already verified.
    NoCheck,
    /// Exempt: thread-local, constant, or nothing was learned from it.
    NeverCheck,
    /// Not classified yet.
    #[default]
    Unevaluated,
}

/// A resolved pointer target: an abstract object plus a constant byte offset.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Target {
    /// The object addressed.
    pub object: Object,
    /// Byte offset from the start of the object. May be negative when the
    /// engine saw out-of-bounds pointer arithmetic.
    pub offset: i64,
}

impl Target {
    /// Create a target.
    pub fn new(object: Object, offset: i64) -> Self {
        Self { object, offset }
    }
}

/// What the points-to analysis knows about a pointer operand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Pointer {
    /// The pointer could not be resolved.
    Unknown,
    /// The pointer is null.
    Null,
    /// The pointer addresses one of these targets.
    Targets(SmallVec<[Target; 1]>),
}

impl Pointer {
    /// A pointer with a single resolved target.
    pub fn to(object: Object, offset: i64) -> Self {
        Pointer::Targets(SmallVec::from_buf([Target::new(object, offset)]))
    }

    /// A pointer that may address any of `targets`.
    pub fn any_of(targets: impl IntoIterator<Item = Target>) -> Self {
        Pointer::Targets(targets.into_iter().collect())
    }

    /// The target, if the pointer is resolved to exactly one.
    pub fn unique(&self) -> Option<Target> {
        match self {
            Pointer::Targets(targets) if targets.len() == 1 => Some(targets[0]),
            _ => None,
        }
    }
}

/// A sub-range of a multi-part value, relative to the start of the value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ValueRange {
    /// First byte.
    pub start: u64,
    /// One past the last byte.
    pub stop: u64,
    /// The engine knows the content of these bytes.
    pub known: bool,
}

impl ValueRange {
    /// A range whose content the engine knows.
    pub fn known(start: u64, stop: u64) -> Self {
        Self {
            start,
            stop,
            known: true,
        }
    }

    /// A range whose content the engine does not know.
    pub fn unknown(start: u64, stop: u64) -> Self {
        Self {
            start,
            stop,
            known: false,
        }
    }

    /// Length in bytes.
    pub fn len(&self) -> u64 {
        self.stop.saturating_sub(self.start)
    }

    /// Is the range empty?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Explicit clobber annotation for a call that may yield.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum LockDomain {
    /// No annotation: the call may modify anything.
    #[default]
    Unspecified,
    /// The call can only modify these globals.
    Globals(SmallVec<[Object; 4]>),
    /// The lock is assumed taken during specialization; it was already
    /// accounted for there and has no effect here.
    Pessimistic,
}

/// Callee of a call instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CallTarget {
    /// A call to a known function.
    Direct(FuncRef),
    /// A call through a function pointer the engine could not resolve. Such a
    /// call is never inlined and may yield unless the program is
    /// single-threaded.
    Indirect,
}

/// The closed set of instruction kinds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstKind {
    /// Read `size` bytes through `ptr`.
    Load {
        /// Address read.
        ptr: Pointer,
        /// Bytes read.
        size: u64,
        /// Acquire or stronger ordering.
        ordered: bool,
        /// Volatile access.
        volatile: bool,
        /// The engine proved the access carries no synchronisation edge.
        simple: bool,
        /// For aggregate results, the known and unknown parts of the value.
        /// Empty for plain scalar results.
        parts: SmallVec<[ValueRange; 2]>,
    },
    /// Write `size` bytes through `ptr`.
    Store {
        /// Address written.
        ptr: Pointer,
        /// Bytes written.
        size: u64,
    },
    /// Atomic read-modify-write or compare-exchange.
    AtomicRmw {
        /// Address accessed.
        ptr: Pointer,
        /// Bytes accessed.
        size: u64,
        /// The engine proved the access carries no synchronisation edge.
        simple: bool,
    },
    /// Memory fence.
    Fence,
    /// Stack allocation.
    Alloca {
        /// Allocated object.
        object: Object,
        /// Allocation size.
        size: u64,
    },
    /// `memset`-style fill.
    MemSet {
        /// Filled memory.
        dest: Pointer,
        /// Bytes filled, if the engine resolved the length.
        len: Option<u64>,
    },
    /// `memcpy`-style copy.
    MemCopy {
        /// Copy destination.
        dest: Pointer,
        /// Copy source.
        src: Pointer,
        /// Bytes copied, if the engine resolved the length.
        len: Option<u64>,
        /// What the engine learned about the source bytes, relative to `src`.
        reads: SmallVec<[ValueRange; 2]>,
    },
    /// `realloc`-style call: copy from the old allocation into a new one.
    Realloc {
        /// The new allocation.
        object: Object,
        /// Size of the new allocation.
        size: u64,
        /// The old allocation.
        src: Pointer,
        /// Bytes carried over, if the engine resolved the length.
        len: Option<u64>,
        /// What the engine learned about the carried bytes.
        reads: SmallVec<[ValueRange; 2]>,
    },
    /// `malloc`-style call.
    Malloc {
        /// The new allocation.
        object: Object,
        /// Allocation size.
        size: u64,
    },
    /// A `read` system call whose result the engine resolved.
    FileRead {
        /// Destination buffer.
        buffer: Pointer,
        /// Bytes read.
        len: u64,
    },
    /// Any other call.
    Call {
        /// Callee.
        target: CallTarget,
        /// Clobber annotation for yielding callees.
        lock: LockDomain,
    },
    /// A PHI node.
    Phi,
    /// Anything without memory or synchronisation effects.
    Other,
}

impl InstKind {
    /// A scalar load with no ordering constraints.
    pub fn load(ptr: Pointer, size: u64) -> Self {
        InstKind::Load {
            ptr,
            size,
            ordered: false,
            volatile: false,
            simple: false,
            parts: SmallVec::new(),
        }
    }

    /// A plain store.
    pub fn store(ptr: Pointer, size: u64) -> Self {
        InstKind::Store { ptr, size }
    }

    /// A call with no lock-domain annotation.
    pub fn call(target: CallTarget) -> Self {
        InstKind::Call {
            target,
            lock: LockDomain::Unspecified,
        }
    }

    /// Does the instruction read memory whose content the engine may have
    /// relied on?
    pub fn reads_memory_directly(&self) -> bool {
        matches!(
            self,
            InstKind::Load { .. }
                | InstKind::AtomicRmw { .. }
                | InstKind::MemCopy { .. }
                | InstKind::Realloc { .. }
        )
    }

    /// Is this a memory transfer?
    pub fn is_copy(&self) -> bool {
        matches!(self, InstKind::MemCopy { .. } | InstKind::Realloc { .. })
    }

    /// Is this lowered to a function call?
    pub fn is_call(&self) -> bool {
        matches!(
            self,
            InstKind::Call { .. }
                | InstKind::Realloc { .. }
                | InstKind::Malloc { .. }
                | InstKind::FileRead { .. }
        )
    }

    /// Short name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            InstKind::Load { .. } => "load",
            InstKind::Store { .. } => "store",
            InstKind::AtomicRmw { .. } => "atomic_rmw",
            InstKind::Fence => "fence",
            InstKind::Alloca { .. } => "alloca",
            InstKind::MemSet { .. } => "memset",
            InstKind::MemCopy { .. } => "memcpy",
            InstKind::Realloc { .. } => "realloc",
            InstKind::Malloc { .. } => "malloc",
            InstKind::FileRead { .. } => "read",
            InstKind::Call { .. } => "call",
            InstKind::Phi => "phi",
            InstKind::Other => "other",
        }
    }
}

/// What the engine learned about an instruction's result.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ResultState {
    /// The instruction produces no value.
    #[default]
    Void,
    /// The instruction belongs to a disabled loop that was never analysed.
    Unanalyzed,
    /// Nothing is known about the value.
    Unknown,
    /// The value is at least partly known.
    Known,
}

/// Checks requested by other parts of the engine.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SpecialCheck {
    /// None.
    #[default]
    None,
    /// The result must be compared against the value seen at specialization.
    AsExpected,
    /// A file must be checked for modification before this point.
    FileUnchanged,
    /// A memory region must be compared against its specialization content.
    MemCompare,
}

/// One specialized instruction.
#[derive(Clone, Debug)]
pub struct InstData {
    /// Owning context. Filled in by [`SpecTree::append_inst`](super::SpecTree::append_inst).
    pub ctx: Context,
    /// Owning block. Filled in by [`SpecTree::append_inst`](super::SpecTree::append_inst).
    pub block: Block,
    /// What the instruction does.
    pub kind: InstKind,
    /// What is known about its result.
    pub result: ResultState,
    /// Classification seeded by the points-to phase.
    pub thread_local: ThreadLocalState,
    /// Check requested by other parts of the engine.
    pub special_check: SpecialCheck,
}

impl InstData {
    /// A fresh instruction of the given kind. Reads default to a known
    /// result, with the copied bytes standing in for the result of a copy.
    pub fn new(kind: InstKind) -> Self {
        let result = match kind {
            InstKind::Load { .. } | InstKind::AtomicRmw { .. } | InstKind::MemCopy { .. } => {
                ResultState::Known
            }
            _ => ResultState::Void,
        };
        Self {
            ctx: Context::reserved_value(),
            block: Block::reserved_value(),
            kind,
            result,
            thread_local: ThreadLocalState::Unevaluated,
            special_check: SpecialCheck::None,
        }
    }

    /// Set the result state.
    pub fn with_result(mut self, result: ResultState) -> Self {
        self.result = result;
        self
    }

    /// Seed the classification.
    pub fn with_thread_local(mut self, state: ThreadLocalState) -> Self {
        self.thread_local = state;
        self
    }

    /// Request a special check.
    pub fn with_special_check(mut self, check: SpecialCheck) -> Self {
        self.special_check = check;
        self
    }
}
