//! Structural verification of a context tree.
//!
//! The analysis trusts the engine's tree. Running the verifier first turns a
//! broken contract (a loop that is not contiguous, an instruction pointing at a
//! block its context never instantiated) into a list of errors instead of a
//! wrong answer.
//!
//! Checked conditions:
//!
//! - Loop blocks are contiguous from the header, and every block in the range
//!   has the loop or one of its descendants as scope.
//! - The latch is inside the loop and branches to the header; the preheader is
//!   outside and branches to the header.
//! - Block instances have one liveness flag per successor.
//! - Every instruction sits in an instantiated block of its context, and its
//!   objects are declared.
//! - Inlined calls lead to function contexts whose call site is that call.
//! - Peel iterations cover exactly the peel's loop, in the owner's body.
//! - Path conditions name declared blocks and checker function contexts.

use crate::ir::{
    Block, Body, CallTarget, Context, Inst, InstKind, Loop, Object, PathConditions, Peel, Pointer,
    SpecTree,
};
use crate::timing;
use core::fmt;
use cranelift_entity::EntityRef;

/// The entity a verifier error is about.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Location {
    /// The tree as a whole.
    Tree,
    /// A function body.
    Body(Body),
    /// A loop of a body.
    Loop(Body, Loop),
    /// A context.
    Context(Context),
    /// A block instance of a context.
    Block(Context, Block),
    /// An instruction.
    Inst(Inst),
    /// A peel attempt.
    Peel(Peel),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Location::Tree => write!(f, "tree"),
            Location::Body(body) => write!(f, "{body}"),
            Location::Loop(body, lp) => write!(f, "{body}:{lp}"),
            Location::Context(ctx) => write!(f, "{ctx}"),
            Location::Block(ctx, block) => write!(f, "{ctx}:{block}"),
            Location::Inst(inst) => write!(f, "{inst}"),
            Location::Peel(peel) => write!(f, "{peel}"),
        }
    }
}

/// A verifier error.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct VerifierError {
    /// The entity causing the verifier error.
    pub location: Location,
    /// Error message.
    pub message: String,
}

impl fmt::Display for VerifierError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

impl std::error::Error for VerifierError {}

impl<L: Into<Location>, M: Into<String>> From<(L, M)> for VerifierError {
    fn from((location, message): (L, M)) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

impl From<Context> for Location {
    fn from(ctx: Context) -> Self {
        Location::Context(ctx)
    }
}

impl From<Inst> for Location {
    fn from(inst: Inst) -> Self {
        Location::Inst(inst)
    }
}

impl From<Peel> for Location {
    fn from(peel: Peel) -> Self {
        Location::Peel(peel)
    }
}

impl From<Body> for Location {
    fn from(body: Body) -> Self {
        Location::Body(body)
    }
}

/// List of verifier errors.
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct VerifierErrors(pub Vec<VerifierError>);

impl std::error::Error for VerifierErrors {}

impl VerifierErrors {
    /// Return a new `VerifierErrors` struct.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Return whether no errors were reported.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Return whether one or more errors were reported.
    pub fn has_error(&self) -> bool {
        !self.0.is_empty()
    }

    /// Return a `Result` that is `Ok` if no errors were reported.
    pub fn as_result(&self) -> Result<(), VerifierErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self.clone())
        }
    }

    /// Report an error.
    pub fn report(&mut self, error: impl Into<VerifierError>) {
        self.0.push(error.into());
    }
}

impl From<Vec<VerifierError>> for VerifierErrors {
    fn from(v: Vec<VerifierError>) -> Self {
        Self(v)
    }
}

impl fmt::Display for VerifierErrors {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for err in &self.0 {
            writeln!(f, "- {err}")?;
        }
        Ok(())
    }
}

/// Verify `tree`, returning every problem found.
pub fn verify_tree(tree: &SpecTree) -> Result<(), VerifierErrors> {
    let _tt = timing::verifier();
    let mut errors = VerifierErrors::new();
    let verifier = Verifier { tree };
    for (body, _) in tree.bodies() {
        verifier.body_loops(body, &mut errors);
        verifier.path_conditions(&tree.body(body).path_conditions, Some(body), &mut errors);
    }
    verifier.path_conditions(tree.path_conditions(), None, &mut errors);
    for (ctx, _) in tree.contexts() {
        verifier.context(ctx, &mut errors);
    }
    for (peel, _) in tree.peels() {
        verifier.peel(peel, &mut errors);
    }
    for (inst, _) in tree.insts() {
        verifier.inst(inst, &mut errors);
    }
    errors.as_result()
}

struct Verifier<'a> {
    tree: &'a SpecTree,
}

impl Verifier<'_> {
    fn body_loops(&self, body: Body, errors: &mut VerifierErrors) {
        let data = self.tree.body(body);
        for (lp, ld) in data.loops() {
            let loc = Location::Loop(body, lp);
            if !data.is_valid_block(ld.header) || ld.end().index() > data.num_blocks() {
                errors.report((loc, "loop extends past the end of the body"));
                continue;
            }
            for block in (ld.header.index()..ld.end().index()).map(Block::new) {
                if !data.scope_contains(Some(lp), data.scope(block)) {
                    errors.report((loc, format!("{block} is not nested in the loop")));
                }
            }
            if !ld.contains_block(ld.latch) {
                errors.report((loc, format!("latch {} is outside the loop", ld.latch)));
            } else if !data.succs(ld.latch).contains(&ld.header) {
                errors.report((loc, "latch does not branch to the header"));
            }
            if !data.is_valid_block(ld.preheader) || ld.contains_block(ld.preheader) {
                errors.report((loc, format!("preheader {} is not outside the loop", ld.preheader)));
            } else if !data.succs(ld.preheader).contains(&ld.header) {
                errors.report((loc, "preheader does not branch to the header"));
            }
        }
    }

    fn path_conditions(
        &self,
        conditions: &PathConditions,
        owner: Option<Body>,
        errors: &mut VerifierErrors,
    ) {
        let loc = owner.map_or(Location::Tree, Location::Body);
        for cond in &conditions.memory {
            if let Some(body) = owner {
                if !self.tree.body(body).is_valid_block(cond.block) {
                    errors.report((body, format!("path condition at unknown {}", cond.block)));
                }
                if cond.stack_depth.is_some() {
                    errors.report((body, "body path condition names a stack depth"));
                }
            }
            self.pointer(&cond.target, loc, errors);
        }
        for func in &conditions.functions {
            if self.tree.num_contexts() <= func.checker.index() {
                errors.report((loc, format!("path function names unknown {}", func.checker)));
                continue;
            }
            let checker = self.tree.context(func.checker);
            if !checker.is_function() || checker.call_site().is_some() {
                errors.report((func.checker, "path function checker is not a root function"));
            }
        }
    }

    fn context(&self, ctx: Context, errors: &mut VerifierErrors) {
        let data = self.tree.context(ctx);
        let body = self.tree.body(data.body);
        for (block, instance) in data.blocks.iter() {
            let Some(instance) = instance else { continue };
            let loc = Location::Block(ctx, block);
            if !body.is_valid_block(block) {
                errors.report((loc, "instance of a block the body does not have"));
                continue;
            }
            if instance.succs_alive.len() != body.succs(block).len() {
                errors.report((
                    loc,
                    format!(
                        "{} liveness flags for {} successors",
                        instance.succs_alive.len(),
                        body.succs(block).len()
                    ),
                ));
            }
            if !body.scope_contains(data.scope, body.scope(block)) {
                errors.report((loc, "block outside the context's loop"));
            }
        }
        for &call in &data.calls {
            match self.tree.inlined_context(call) {
                Some(child) if self.tree.context(child).call_site() == Some(call) => {}
                _ => errors.report((call, "inlined call without a matching callee context")),
            }
        }
    }

    fn peel(&self, peel: Peel, errors: &mut VerifierErrors) {
        let pd = self.tree.peel(peel);
        let owner = self.tree.context(pd.owner);
        let body = self.tree.body(owner.body);
        if !body.is_valid_loop(pd.lp) {
            errors.report((peel, format!("peel of unknown {}", pd.lp)));
            return;
        }
        if body.loop_data(pd.lp).parent.expand() != owner.scope {
            errors.report((peel, "peeled loop is not directly inside its owner"));
        }
        for &it in &pd.iterations {
            let data = self.tree.context(it);
            if data.peel() != Some(peel) || data.scope != Some(pd.lp) || data.body != owner.body {
                errors.report((it, format!("iteration does not cover {}", pd.lp)));
            }
        }
    }

    fn inst(&self, inst: Inst, errors: &mut VerifierErrors) {
        let data = self.tree.inst(inst);
        if self.tree.num_contexts() <= data.ctx.index() {
            errors.report((inst, "instruction of an unknown context"));
            return;
        }
        let instance = self.tree.context(data.ctx).block(data.block);
        if !instance.is_some_and(|i| i.insts.contains(&inst)) {
            errors.report((inst, format!("not listed in {} of {}", data.block, data.ctx)));
        }
        let loc = Location::Inst(inst);
        match &data.kind {
            InstKind::Load { ptr, .. }
            | InstKind::Store { ptr, .. }
            | InstKind::AtomicRmw { ptr, .. } => self.pointer(ptr, loc, errors),
            InstKind::MemSet { dest, .. } => self.pointer(dest, loc, errors),
            InstKind::MemCopy { dest, src, .. } => {
                self.pointer(dest, loc, errors);
                self.pointer(src, loc, errors);
            }
            InstKind::Realloc { object, src, .. } => {
                self.object(*object, loc, errors);
                self.pointer(src, loc, errors);
            }
            InstKind::Alloca { object, .. } | InstKind::Malloc { object, .. } => {
                self.object(*object, loc, errors)
            }
            InstKind::FileRead { buffer, .. } => self.pointer(buffer, loc, errors),
            InstKind::Call { .. } | InstKind::Fence | InstKind::Phi | InstKind::Other => {}
        }
        if let Some(child) = self.tree.inlined_context(inst) {
            match data.kind {
                InstKind::Call {
                    target: CallTarget::Direct(_),
                    ..
                } => {}
                InstKind::Call { .. } => {
                    errors.report((inst, format!("unresolved call inlined as {child}")));
                }
                _ => errors.report((inst, format!("{} inlined as {child}", data.kind.name()))),
            }
        }
    }

    fn pointer(&self, ptr: &Pointer, loc: Location, errors: &mut VerifierErrors) {
        if let Pointer::Targets(targets) = ptr {
            for target in targets {
                self.object(target.object, loc, errors);
            }
        }
    }

    fn object(&self, object: Object, loc: Location, errors: &mut VerifierErrors) {
        if !self.tree.is_valid_object(object) {
            errors.report((loc, format!("unknown {object}")));
        }
    }
}
