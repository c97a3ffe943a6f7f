//! Per-instruction classification and store updates.
//!
//! Every instruction in an enabled block passes through
//! [`Walker::analyze_instruction`]: reads are classified against the store
//! that reaches them, then the store is updated with whatever the instruction
//! verifies or clobbers.

use crate::ir::{
    CallTarget, Context, Inst, InstKind, LockDomain, Object, Pointer, ResultState, Target,
    ThreadLocalState, ValueRange,
};
use crate::trace;
use crate::walker::{Store, Walker};
use std::rc::Rc;

impl Walker<'_> {
    /// Classify `inst` against `store`, then apply its effect on `store`.
    ///
    /// Inside a disabled context nothing becomes verified, but clobbers still
    /// take effect: the code will run unspecialized.
    pub(crate) fn analyze_instruction(
        &mut self,
        ctx: Context,
        inst: Inst,
        store: &mut Store,
        commit_disabled: bool,
        second_pass: bool,
    ) {
        let data = self.tree.inst(inst);
        let current = self.state.classes[inst];
        if data.kind.reads_memory_directly() {
            // A read found tentative stays tentative across loop passes.
            let sticky = second_pass && current == ThreadLocalState::MustCheck;
            if !sticky && current != ThreadLocalState::NeverCheck {
                let class = self.should_check_load(inst, store);
                trace!("{ctx}: {inst} {} -> {class:?}", data.kind.name());
                self.state.classes[inst] = class;
            }
            if self.state.classes[inst] == ThreadLocalState::MustCheck {
                self.state.contexts[ctx].reads_tentative = true;
            }
        } else if current == ThreadLocalState::NeverCheck {
            return;
        }
        self.update_store(ctx, inst, store, !commit_disabled);
    }

    /// Classify a read against the store reaching it.
    pub(crate) fn should_check_load(&self, inst: Inst, store: &Store) -> ThreadLocalState {
        if self.config.is_single_threaded() {
            return ThreadLocalState::NeverCheck;
        }
        let data = self.tree.inst(inst);
        if let InstKind::AtomicRmw { .. } = data.kind {
            // The exchange itself synchronizes with other threads.
            return ThreadLocalState::MustCheck;
        }
        if !data.kind.is_copy() && data.result == ResultState::Unknown {
            // Nothing was learned from the value, so nothing can be wrong.
            return ThreadLocalState::NeverCheck;
        }
        match &data.kind {
            InstKind::Load {
                ptr,
                size,
                ordered,
                volatile,
                parts,
                ..
            } => {
                if *ordered || *volatile {
                    return ThreadLocalState::MustCheck;
                }
                self.check_pointer(ptr, |target| {
                    self.check_load_from(store, target, *size, parts)
                })
            }
            InstKind::MemCopy { src, len, reads, .. } | InstKind::Realloc { src, len, reads, .. } => {
                self.should_check_copy(store, src, *len, reads)
            }
            _ => ThreadLocalState::NeverCheck,
        }
    }

    /// The least safe classification over every target of `ptr`.
    fn check_pointer(
        &self,
        ptr: &Pointer,
        mut check: impl FnMut(&Target) -> ThreadLocalState,
    ) -> ThreadLocalState {
        match ptr {
            Pointer::Null => ThreadLocalState::NeverCheck,
            Pointer::Unknown => ThreadLocalState::MustCheck,
            Pointer::Targets(targets) => targets
                .iter()
                .map(|t| check(t))
                .min()
                .unwrap_or(ThreadLocalState::NeverCheck),
        }
    }

    /// Classify a load of `size` bytes at `target`. Only the known parts of a
    /// multi-part value matter.
    fn check_load_from(
        &self,
        store: &Store,
        target: &Target,
        size: u64,
        parts: &[ValueRange],
    ) -> ThreadLocalState {
        if size == 0 || self.is_exempt(target.object) {
            return ThreadLocalState::NeverCheck;
        }
        let whole = [ValueRange::known(0, size)];
        let parts = if parts.is_empty() { &whole[..] } else { parts };
        let verified = parts
            .iter()
            .filter(|p| p.known && !p.is_empty())
            .all(|p| self.is_verified(store, target, p.start, p.len()));
        if verified {
            ThreadLocalState::NoCheck
        } else {
            ThreadLocalState::MustCheck
        }
    }

    /// Classify a memory transfer by the source bytes the engine relied on.
    fn should_check_copy(
        &self,
        store: &Store,
        src: &Pointer,
        len: Option<u64>,
        reads: &[ValueRange],
    ) -> ThreadLocalState {
        match len {
            None => return ThreadLocalState::MustCheck,
            Some(0) => return ThreadLocalState::NeverCheck,
            Some(_) => {}
        }
        match src {
            Pointer::Null => return ThreadLocalState::NeverCheck,
            Pointer::Unknown => return ThreadLocalState::MustCheck,
            Pointer::Targets(_) => {}
        }
        if reads.is_empty() {
            return ThreadLocalState::NeverCheck;
        }
        self.check_pointer(src, |target| {
            if self.is_exempt(target.object) {
                return ThreadLocalState::NeverCheck;
            }
            let verified = reads
                .iter()
                .filter(|r| r.known && !r.is_empty())
                .all(|r| self.is_verified(store, target, r.start, r.len()));
            if verified {
                ThreadLocalState::NoCheck
            } else {
                ThreadLocalState::MustCheck
            }
        })
    }

    /// Constant and thread-private objects cannot be raced on.
    fn is_exempt(&self, object: Object) -> bool {
        let data = self.tree.object(object);
        data.is_constant() || data.thread_private
    }

    fn is_verified(&self, store: &Store, target: &Target, start: u64, len: u64) -> bool {
        let Some(offset) = u64::try_from(target.offset)
            .ok()
            .and_then(|o| o.checked_add(start))
        else {
            return false;
        };
        let home = self.tree.object(target.object).home();
        store.is_range_verified(target.object, home, offset, len)
    }

    /// Apply the effect of `inst` on `store`. Verifications only happen when
    /// `enabled`.
    fn update_store(&mut self, ctx: Context, inst: Inst, store: &mut Store, enabled: bool) {
        let tree = self.tree;
        let data = tree.inst(inst);
        match &data.kind {
            InstKind::Load {
                ptr,
                size,
                ordered,
                volatile,
                simple,
                ..
            } => {
                if (*ordered || *volatile) && !*simple {
                    self.clobber_all(ctx, inst, store);
                } else {
                    self.mark_good(store, ptr, 0, *size, enabled);
                }
            }
            InstKind::Store { ptr, size } => self.write(ctx, inst, store, ptr, *size, enabled),
            InstKind::AtomicRmw { ptr, size, simple } => {
                if !*simple {
                    self.clobber_all(ctx, inst, store);
                } else {
                    self.mark_good(store, ptr, 0, *size, enabled);
                }
            }
            InstKind::Fence => self.clobber_all(ctx, inst, store),
            InstKind::Alloca { object, size } | InstKind::Malloc { object, size } => {
                self.mark_good(store, &Pointer::to(*object, 0), 0, *size, enabled);
            }
            InstKind::MemSet { dest, len } => {
                if let Some(len) = *len {
                    self.write(ctx, inst, store, dest, len, enabled);
                }
            }
            InstKind::MemCopy { dest, src, len, .. } => {
                if let Some(len) = *len {
                    self.write(ctx, inst, store, dest, len, enabled);
                    self.mark_good(store, src, 0, len, enabled);
                }
            }
            InstKind::Realloc {
                object,
                size,
                src,
                len,
                ..
            } => {
                if let Some(len) = *len {
                    self.mark_good(store, src, 0, len, enabled);
                }
                self.mark_good(store, &Pointer::to(*object, 0), 0, *size, enabled);
            }
            InstKind::FileRead { buffer, len } => {
                self.write(ctx, inst, store, buffer, *len, enabled);
            }
            InstKind::Call { target, lock } => {
                let may_yield = match *target {
                    CallTarget::Direct(func) => tree.is_yield_function(func),
                    CallTarget::Indirect => !self.config.is_single_threaded(),
                };
                if !may_yield {
                    return;
                }
                match lock {
                    LockDomain::Pessimistic => {}
                    LockDomain::Globals(objects) => {
                        trace!("{ctx}: {inst} clobbers {} globals", objects.len());
                        let list = Rc::make_mut(store);
                        for &object in objects {
                            list.clobber_object(object, tree.object(object).home());
                        }
                        self.state.contexts[ctx].yields = true;
                    }
                    LockDomain::Unspecified => self.clobber_all(ctx, inst, store),
                }
            }
            InstKind::Phi | InstKind::Other => {}
        }
    }

    /// A write of `len` bytes through `ptr`. A write that could land anywhere
    /// leaves nothing verified, but it is not a yield point.
    fn write(
        &self,
        ctx: Context,
        inst: Inst,
        store: &mut Store,
        ptr: &Pointer,
        len: u64,
        enabled: bool,
    ) {
        if let Pointer::Unknown = ptr {
            trace!("{ctx}: {inst} writes through an unknown pointer");
            if !store.is_clobbered_all() {
                Rc::make_mut(store).mark_clobbered_all();
            }
            return;
        }
        self.mark_good(store, ptr, 0, len, enabled);
    }

    /// A yield point: everything becomes tentative.
    fn clobber_all(&mut self, ctx: Context, inst: Inst, store: &mut Store) {
        if log::log_enabled!(log::Level::Debug) {
            let block = self.tree.inst(inst).block;
            let position = self
                .tree
                .context(ctx)
                .block(block)
                .and_then(|b| b.insts.iter().position(|&i| i == inst))
                .unwrap_or_default();
            log::debug!("{ctx}: {inst} at {block}[{position}] crosses a yield point");
        }
        if !store.is_clobbered_all() {
            Rc::make_mut(store).mark_clobbered_all();
        }
        self.state.contexts[ctx].yields = true;
    }

    /// Record `len` bytes at `ptr + offset` as verified. Only a pointer with a
    /// single non-constant target verifies anything.
    pub(crate) fn mark_good(
        &self,
        store: &mut Store,
        ptr: &Pointer,
        offset: i64,
        len: u64,
        enabled: bool,
    ) {
        if !enabled || len == 0 {
            return;
        }
        let Some(target) = ptr.unique() else {
            return;
        };
        let object = self.tree.object(target.object);
        if object.is_constant() {
            return;
        }
        let Some(start) = target
            .offset
            .checked_add(offset)
            .and_then(|o| u64::try_from(o).ok())
        else {
            return;
        };
        let home = object.home();
        if store.is_range_verified(target.object, home, start, len) || store.store(home).is_none() {
            return;
        }
        Rc::make_mut(store).add_verified(target.object, home, start..start.saturating_add(len));
    }
}
