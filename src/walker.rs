//! Context tree walker.
//!
//! The walker drives per-block propagation over the whole context tree. Each
//! context walks its blocks in topological order, merging the frame lists of
//! live predecessors at every block after the first. Child loops are walked
//! either iteration by iteration (terminated peel attempts) or in place until
//! their header state is stable. Inlined calls recurse into the callee and
//! continue with the merge of its return blocks.
//!
//! Frame lists flow along edges as `Rc<FrameList>`. A block that finishes
//! keeps its outgoing list together with the number of counted edges still to
//! consume it; the last consumer releases it.

use crate::config::Config;
use crate::frames::FrameList;
use crate::ir::{
    Block, Context, ContextKind, Inst, Loop, PathConditions, SpecTree, ThreadLocalState,
};
use crate::result::{TentativeError, TentativeResult};
use crate::{timing, trace, verifier};
use cranelift_entity::{EntityRef, SecondaryMap};
use smallvec::SmallVec;
use std::rc::Rc;

pub(crate) type Store = Rc<FrameList>;

/// Progress of a context through the walk.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) enum RunState {
    #[default]
    NotStarted,
    InProgress,
    Done,
}

/// Outgoing state of one block.
#[derive(Clone, Debug, Default)]
pub(crate) struct BlockState {
    pub(crate) store: Option<Store>,
    /// Counted outgoing edges that have not taken `store` yet.
    pub(crate) pending: u32,
}

/// Per-context analysis state.
#[derive(Clone, Debug, Default)]
pub(crate) struct ContextState {
    pub(crate) run: RunState,
    /// Something in this context or below it read tentative data.
    pub(crate) reads_tentative: bool,
    /// Something in this context or below it crossed a yield point.
    pub(crate) yields: bool,
    /// The function pushed a frame on entry.
    pub(crate) pushed_frame: bool,
    /// Store handed in by the parent for the first block.
    pub(crate) entry: Option<Store>,
    /// Caller's store before a call into a disabled context.
    pub(crate) backup: Option<Store>,
    pub(crate) blocks: SecondaryMap<Block, BlockState>,
}

/// The interference analysis over one [`SpecTree`].
///
/// Results live here rather than in the tree: the per-instruction
/// classifications and the per-context summaries consulted by the commit
/// stage.
#[derive(Clone, Debug, Default)]
pub struct TentativeLoads {
    pub(crate) contexts: SecondaryMap<Context, ContextState>,
    pub(crate) classes: SecondaryMap<Inst, ThreadLocalState>,
    ran: bool,
    walks: u64,
}

impl TentativeLoads {
    /// Prepare an analysis of `tree`, seeding every classification from the
    /// points-to phase.
    pub fn new(tree: &SpecTree) -> Self {
        let mut classes = SecondaryMap::new();
        for (inst, data) in tree.insts() {
            classes[inst] = data.thread_local;
        }
        Self {
            contexts: SecondaryMap::new(),
            classes,
            ran: false,
            walks: 0,
        }
    }

    /// Has the analysis run since it was created or last reset?
    pub fn has_run(&self) -> bool {
        self.ran
    }

    /// Analyse the whole tree from its entry context.
    pub fn run(&mut self, tree: &SpecTree, config: &Config) -> TentativeResult<()> {
        let _tt = timing::tentative_loads();
        config.validate()?;
        if self.ran {
            return Err(TentativeError::AlreadyRun);
        }
        if config.enable_verifier {
            verifier::verify_tree(tree)?;
        }
        let entry = tree.entry().ok_or(TentativeError::NoEntry)?;
        self.ran = true;
        let mut walker = Walker {
            tree,
            config,
            state: self,
        };
        walker.walk_function(entry, false, false)?;
        log::debug!(
            "tentative loads: walked {} contexts of {}",
            self.walks,
            tree.num_contexts()
        );
        Ok(())
    }

    /// Forget every result so the analysis can run again. Classifications go
    /// back to the values seeded by the points-to phase.
    pub fn reset(&mut self, tree: &SpecTree) {
        let _tt = timing::reset();
        if let Some(entry) = tree.entry() {
            self.reset_context(tree, entry, true);
        }
        for checker in tree.checkers() {
            self.reset_context(tree, checker, true);
        }
        self.ran = false;
        self.walks = 0;
    }

    /// Clear the run markers and held stores of `ctx` and everything below
    /// it. A `full` reset also clears summaries and classifications.
    pub(crate) fn reset_context(&mut self, tree: &SpecTree, ctx: Context, full: bool) {
        let state = &mut self.contexts[ctx];
        if full {
            *state = ContextState::default();
            let data = tree.context(ctx);
            for block in tree.own_blocks(ctx) {
                let insts = data.block(block).map_or(&[][..], |b| &b.insts[..]);
                for &inst in insts {
                    self.classes[inst] = tree.inst(inst).thread_local;
                }
            }
        } else {
            state.run = RunState::NotStarted;
            state.entry = None;
            state.backup = None;
            state.blocks.clear();
        }
        let data = tree.context(ctx);
        for &call in &data.calls {
            if let Some(child) = tree.inlined_context(call) {
                self.reset_context(tree, child, full);
            }
        }
        for &peel in data.peels.values() {
            let peel = tree.peel(peel);
            if peel.terminated {
                for &it in &peel.iterations {
                    self.reset_context(tree, it, full);
                }
            }
        }
    }
}

/// One run of the analysis.
pub(crate) struct Walker<'a> {
    pub(crate) tree: &'a SpecTree,
    pub(crate) config: &'a Config,
    pub(crate) state: &'a mut TentativeLoads,
}

impl Walker<'_> {
    /// Mark `ctx` as in progress. Returns false if it was already walked.
    fn enter(&mut self, ctx: Context) -> TentativeResult<bool> {
        let state = &mut self.state.contexts[ctx];
        match state.run {
            RunState::Done => return Ok(false),
            RunState::InProgress => return Err(TentativeError::Reentrant(ctx)),
            RunState::NotStarted => state.run = RunState::InProgress,
        }
        self.state.walks += 1;
        let interval = self.config.progress_interval;
        if interval != 0 && self.state.walks % interval == 0 {
            log::debug!("tentative loads: {} contexts walked", self.state.walks);
        }
        Ok(true)
    }

    /// Mark `ctx` as done and fold its summaries into its parent.
    fn leave(&mut self, ctx: Context) {
        let state = &mut self.state.contexts[ctx];
        state.run = RunState::Done;
        let (reads, yields) = (state.reads_tentative, state.yields);
        if let Some(parent) = self.tree.context(ctx).parent {
            let parent = &mut self.state.contexts[parent];
            parent.reads_tentative |= reads;
            parent.yields |= yields;
        }
    }

    pub(crate) fn walk_function(
        &mut self,
        ctx: Context,
        commit_disabled: bool,
        second_pass: bool,
    ) -> TentativeResult<()> {
        if !self.enter(ctx)? {
            return Ok(());
        }
        let tree = self.tree;
        let data = tree.context(ctx);
        let body = tree.body(data.body);
        let entry_block = body.entry();
        let incoming = if tree.entry() == Some(ctx) {
            Some(Rc::new(FrameList::new()))
        } else {
            self.state.contexts[ctx].entry.take()
        };
        let mut store = incoming.ok_or(TentativeError::MissingStore {
            ctx,
            block: entry_block,
        })?;
        let push = body.has_frame || data.call_site().is_none();
        if push {
            Rc::make_mut(&mut store).push_frame(ctx);
        }
        trace!("{ctx}: entering {} at depth {}", body.name, store.depth());
        let state = &mut self.state.contexts[ctx];
        state.pushed_frame = push;
        state.blocks[entry_block] = BlockState {
            store: Some(store),
            pending: 0,
        };
        self.walk_scope(ctx, None, commit_disabled, second_pass, false)?;
        self.leave(ctx);
        Ok(())
    }

    fn walk_iteration(
        &mut self,
        ctx: Context,
        commit_disabled: bool,
        second_pass: bool,
    ) -> TentativeResult<()> {
        if !self.enter(ctx)? {
            return Ok(());
        }
        let tree = self.tree;
        let data = tree.context(ctx);
        let body = tree.body(data.body);
        let header = data
            .scope
            .map_or(body.entry(), |lp| body.loop_data(lp).header);
        let store = self.state.contexts[ctx]
            .entry
            .take()
            .ok_or(TentativeError::MissingStore { ctx, block: header })?;
        self.seed(ctx, header, store);
        self.walk_scope(ctx, data.scope, commit_disabled, second_pass, false)?;
        self.leave(ctx);
        Ok(())
    }

    /// Walk the blocks of `scope` in `ctx`, handing nested loops to
    /// [`Self::walk_child_loop`]. The first block must already be seeded.
    ///
    /// With `latch_to_header` the loop `scope` is being walked optimistically:
    /// its latch feeds the header and its exits are not counted.
    fn walk_scope(
        &mut self,
        ctx: Context,
        scope: Option<Loop>,
        commit_disabled: bool,
        second_pass: bool,
        latch_to_header: bool,
    ) -> TentativeResult<()> {
        let tree = self.tree;
        let body = tree.context_body(ctx);
        let (start, end) = match scope {
            Some(lp) => {
                let ld = body.loop_data(lp);
                (ld.header, ld.end().index().min(body.num_blocks()))
            }
            None => (body.entry(), body.num_blocks()),
        };
        let mut index = start.index();
        while index < end {
            let block = Block::new(index);
            let block_scope = body.scope(block);
            if block_scope != scope {
                let Some(inner) = block_scope else {
                    index += 1;
                    continue;
                };
                let child = body.immediate_child_loop(scope, inner);
                self.walk_child_loop(ctx, child, commit_disabled, second_pass)?;
                index = body.loop_data(child).end().index();
                continue;
            }
            self.walk_block(
                ctx,
                block,
                scope,
                block == start,
                commit_disabled,
                second_pass,
                latch_to_header,
            )?;
            index += 1;
        }
        Ok(())
    }

    fn walk_child_loop(
        &mut self,
        ctx: Context,
        lp: Loop,
        commit_disabled: bool,
        second_pass: bool,
    ) -> TentativeResult<()> {
        let tree = self.tree;
        let data = tree.context(ctx);
        let ld = tree.body(data.body).loop_data(lp);
        let Some(incoming) = self.take_outgoing(ctx, ld.preheader) else {
            trace!("{ctx}: {lp} is not reached");
            return Ok(());
        };
        let peel = data.peels.get(&lp).copied();
        if let Some(peel) = peel.filter(|&p| tree.peel(p).terminated) {
            let pd = tree.peel(peel);
            let disabled = commit_disabled || !pd.enabled;
            let mut incoming = Some(incoming);
            for &it in &pd.iterations {
                let Some(store) = incoming.take() else {
                    break;
                };
                self.state.contexts[it].entry = Some(store);
                self.walk_iteration(it, disabled, second_pass)?;
                if tree.edge_is_live(it, ld.latch, ld.header) {
                    incoming = self.take_outgoing(it, ld.latch);
                }
            }
            return Ok(());
        }
        let disabled = commit_disabled || peel.is_some_and(|p| !tree.peel(p).enabled);
        self.walk_unbounded_loop(ctx, lp, incoming, disabled, second_pass)
    }

    /// Walk a loop in place until the state at its header is stable.
    ///
    /// The first pass is optimistic and only feeds the latch back to the
    /// header. Every later pass starts from the intersection of the header
    /// state so far and the latch state of the previous pass, so the header
    /// state only shrinks. Once the latch verifies everything the header
    /// started with, every real trip through the loop sees at least the final
    /// header state. If that takes more than `max_loop_passes` walks the
    /// header is clobbered outright, which is trivially stable.
    fn walk_unbounded_loop(
        &mut self,
        ctx: Context,
        lp: Loop,
        incoming: Store,
        disabled: bool,
        second_pass: bool,
    ) -> TentativeResult<()> {
        let tree = self.tree;
        let data = tree.context(ctx);
        let ld = tree.body(data.body).loop_data(lp);
        if data.block(ld.header).is_none() {
            return Ok(());
        }
        if !tree.edge_is_live(ctx, ld.latch, ld.header) {
            self.seed(ctx, ld.header, incoming);
            return self.walk_scope(ctx, Some(lp), disabled, second_pass, false);
        }

        let mut header = incoming;
        let mut passes = 0;
        if !second_pass {
            self.seed(ctx, ld.header, header.clone());
            self.walk_scope(ctx, Some(lp), disabled, false, true)?;
            passes += 1;
            if let Some(latch) = self.take_outgoing(ctx, ld.latch) {
                header = self.intersect(ctx, ld.header, &header, &latch)?;
            }
        }
        loop {
            if passes > 0 {
                self.reset_loop_children(ctx, lp);
            }
            self.seed(ctx, ld.header, header.clone());
            self.walk_scope(ctx, Some(lp), disabled, true, false)?;
            passes += 1;
            let Some(latch) = self.peek_outgoing(ctx, ld.latch) else {
                break;
            };
            if latch.covers(&header) || header.is_clobbered_all() {
                break;
            }
            if passes >= self.config.max_loop_passes {
                log::debug!("{ctx}: {lp} not stable after {passes} passes, clobbering its header");
                Rc::make_mut(&mut header).mark_clobbered_all();
            } else {
                header = self.intersect(ctx, ld.header, &header, &latch)?;
            }
        }
        trace!("{ctx}: {lp} stable after {passes} passes");

        let latch = &mut self.state.contexts[ctx].blocks[ld.latch];
        if latch.pending == 0 {
            latch.store = None;
        }
        Ok(())
    }

    /// Children of `ctx` inside `lp` must be walked again on the next pass.
    fn reset_loop_children(&mut self, ctx: Context, lp: Loop) {
        let tree = self.tree;
        let data = tree.context(ctx);
        let body = tree.body(data.body);
        let ld = body.loop_data(lp);
        for &call in &data.calls {
            if !ld.contains_block(tree.inst(call).block) {
                continue;
            }
            if let Some(child) = tree.inlined_context(call) {
                self.state.reset_context(tree, child, false);
            }
        }
        for (&inner, &peel) in &data.peels {
            if body.scope_contains(Some(lp), Some(inner)) {
                for &it in &tree.peel(peel).iterations {
                    self.state.reset_context(tree, it, false);
                }
            }
        }
    }

    fn walk_block(
        &mut self,
        ctx: Context,
        block: Block,
        scope: Option<Loop>,
        is_start: bool,
        commit_disabled: bool,
        second_pass: bool,
        latch_to_header: bool,
    ) -> TentativeResult<()> {
        let tree = self.tree;
        let data = tree.context(ctx);
        let body = tree.body(data.body);
        let Some(instance) = data.block(block) else {
            return Ok(());
        };
        let incoming = if is_start {
            self.state.contexts[ctx].blocks[block].store.take()
        } else {
            self.merge_predecessors(ctx, block)?
        };
        let Some(mut store) = incoming else {
            if is_start {
                return Err(TentativeError::MissingStore { ctx, block });
            }
            trace!("{ctx}: nothing reaches {block}");
            self.state.contexts[ctx].blocks[block] = BlockState::default();
            return Ok(());
        };

        self.walk_path_conditions(ctx, block, &mut store, commit_disabled, second_pass)?;
        for &inst in &instance.insts {
            self.analyze_instruction(ctx, inst, &mut store, commit_disabled, second_pass);
            if let Some(callee) = tree.inlined_context(inst) {
                match self.walk_call(ctx, inst, callee, store, commit_disabled, second_pass)? {
                    Some(exit) => store = exit,
                    None => {
                        trace!("{ctx}: {inst} never returns");
                        self.state.contexts[ctx].blocks[block] = BlockState::default();
                        return Ok(());
                    }
                }
            }
        }

        // Walking a loop in place from an enclosing scope.
        let in_place = scope.filter(|_| scope != data.scope).map(|lp| body.loop_data(lp));
        let mut pending = 0;
        for (i, &succ) in body.succs(block).iter().enumerate() {
            if !instance.succs_alive.get(i).copied().unwrap_or(false) {
                continue;
            }
            if let Some(ld) = in_place {
                let skip = if latch_to_header {
                    !ld.contains_block(succ)
                } else {
                    succ == ld.header
                };
                if skip {
                    continue;
                }
            }
            pending += 1;
        }

        if body.succs(block).is_empty() && self.state.contexts[data.root].pushed_frame {
            Rc::make_mut(&mut store).pop_frame();
        }
        let keep = pending > 0
            || body.block(block).is_return
            || in_place.is_some_and(|ld| !latch_to_header && ld.latch == block);
        self.state.contexts[ctx].blocks[block] = BlockState {
            store: keep.then_some(store),
            pending,
        };
        Ok(())
    }

    /// Intersect the outgoing stores of every live predecessor of `block`.
    fn merge_predecessors(&mut self, ctx: Context, block: Block) -> TentativeResult<Option<Store>> {
        let tree = self.tree;
        let body = tree.context_body(ctx);
        let mut merged: Option<Store> = None;
        let mut sources: SmallVec<[Context; 4]> = SmallVec::new();
        for &pred in body.preds(block) {
            sources.clear();
            self.pred_instances(ctx, pred, &mut sources);
            for &src in &sources {
                if !tree.edge_is_live(src, pred, block) {
                    continue;
                }
                let Some(incoming) = self.take_outgoing(src, pred) else {
                    continue;
                };
                merged = Some(match merged {
                    None => incoming,
                    Some(acc) => self.intersect(ctx, block, &acc, &incoming)?,
                });
            }
        }
        Ok(merged)
    }

    /// Collect the contexts holding instances of `pred` as seen from `ctx`:
    /// `ctx` itself, or the iterations of terminated peel attempts between
    /// `ctx` and the loop containing `pred`.
    fn pred_instances(&self, ctx: Context, pred: Block, out: &mut SmallVec<[Context; 4]>) {
        let tree = self.tree;
        let data = tree.context(ctx);
        let body = tree.body(data.body);
        let pred_scope = body.scope(pred);
        if pred_scope == data.scope {
            out.push(ctx);
            return;
        }
        let Some(inner) = pred_scope.filter(|&s| body.scope_contains(data.scope, Some(s))) else {
            return;
        };
        let child = body.immediate_child_loop(data.scope, inner);
        match tree.terminated_peel(ctx, child) {
            Some(peel) => {
                for &it in &tree.peel(peel).iterations {
                    self.pred_instances(it, pred, out);
                }
            }
            None => out.push(ctx),
        }
    }

    fn intersect(
        &self,
        ctx: Context,
        block: Block,
        a: &Store,
        b: &Store,
    ) -> TentativeResult<Store> {
        let mut merged = a.clone();
        if !Rc::ptr_eq(a, b) {
            FrameList::merge(b, Rc::make_mut(&mut merged))
                .map_err(|_| TentativeError::FrameMismatch { ctx, block })?;
        }
        Ok(merged)
    }

    fn seed(&mut self, ctx: Context, block: Block, store: Store) {
        self.state.contexts[ctx].blocks[block] = BlockState {
            store: Some(store),
            pending: 0,
        };
    }

    /// Take the outgoing store of `block` along one counted edge.
    fn take_outgoing(&mut self, ctx: Context, block: Block) -> Option<Store> {
        let is_return = self.tree.context_body(ctx).block(block).is_return;
        let slot = &mut self.state.contexts[ctx].blocks[block];
        let store = slot.store.clone()?;
        if slot.pending > 0 {
            slot.pending -= 1;
            if slot.pending == 0 && !is_return {
                slot.store = None;
            }
        }
        Some(store)
    }

    fn peek_outgoing(&self, ctx: Context, block: Block) -> Option<Store> {
        self.state.contexts[ctx].blocks[block].store.clone()
    }

    /// Walk the context inlined at `inst` and return the caller's store after
    /// the call, or `None` if the callee never returns.
    fn walk_call(
        &mut self,
        ctx: Context,
        inst: Inst,
        callee: Context,
        store: Store,
        commit_disabled: bool,
        second_pass: bool,
    ) -> TentativeResult<Option<Store>> {
        let disabled_here = !self.tree.context(callee).enabled;
        let state = &mut self.state.contexts[callee];
        if disabled_here {
            state.backup = Some(store.clone());
        }
        state.entry = Some(store);
        self.walk_function(callee, commit_disabled || disabled_here, second_pass)?;
        let Some(mut exit) = self.call_merge(callee)? else {
            return Ok(None);
        };
        if !disabled_here {
            return Ok(Some(exit));
        }

        let state = &mut self.state.contexts[callee];
        let backup = state.backup.take();
        if state.reads_tentative {
            log::warn!(
                "{ctx}: disabled callee {callee} at {inst} read tentative data; every object becomes tentative"
            );
            Rc::make_mut(&mut exit).mark_clobbered_all();
            self.state.contexts[ctx].yields = true;
            return Ok(Some(exit));
        }
        if !state.yields {
            if let Some(backup) = backup {
                return Ok(Some(backup));
            }
        }
        Ok(Some(exit))
    }

    /// Merge the stores of every reached return block of `callee`, including
    /// returns from inside peeled loop iterations.
    fn call_merge(&mut self, callee: Context) -> TentativeResult<Option<Store>> {
        let tree = self.tree;
        let body = tree.context_body(callee);
        let mut merged: Option<Store> = None;
        let mut sources: SmallVec<[Context; 4]> = SmallVec::new();
        for block in body.return_blocks() {
            sources.clear();
            self.pred_instances(callee, block, &mut sources);
            for &src in &sources {
                let Some(exit) = self.peek_outgoing(src, block) else {
                    continue;
                };
                merged = Some(match merged {
                    None => exit,
                    Some(acc) => self.intersect(callee, block, &acc, &exit)?,
                });
            }
        }
        Ok(merged)
    }

    /// Apply the path conditions holding at the start of `block`.
    fn walk_path_conditions(
        &mut self,
        ctx: Context,
        block: Block,
        store: &mut Store,
        commit_disabled: bool,
        second_pass: bool,
    ) -> TentativeResult<()> {
        let tree = self.tree;
        let data = tree.context(ctx);
        if let ContextKind::Function {
            target_stack_depth: Some(depth),
            ..
        } = tree.context(data.root).kind
        {
            self.apply_path_conditions(
                tree.path_conditions(),
                Some(depth),
                block,
                store,
                commit_disabled,
                second_pass,
            )?;
        }
        let body = tree.body(data.body);
        self.apply_path_conditions(
            &body.path_conditions,
            None,
            block,
            store,
            commit_disabled,
            second_pass,
        )
    }

    fn apply_path_conditions(
        &mut self,
        conditions: &PathConditions,
        depth: Option<u32>,
        block: Block,
        store: &mut Store,
        commit_disabled: bool,
        second_pass: bool,
    ) -> TentativeResult<()> {
        if conditions.is_empty() {
            return Ok(());
        }
        for cond in conditions.memory_at(depth, block) {
            self.mark_good(store, &cond.target, cond.offset, cond.value.len(), !commit_disabled);
        }
        for func in conditions.functions_at(depth, block) {
            let checker = func.checker;
            trace!("{block}: running path condition checker {checker}");
            self.state.reset_context(self.tree, checker, false);
            self.state.contexts[checker].entry = Some(store.clone());
            // Checkers are committed code regardless of the surrounding context.
            self.walk_function(checker, false, second_pass)?;
            if let Some(exit) = self.call_merge(checker)? {
                *store = exit;
            }
        }
        Ok(())
    }
}
