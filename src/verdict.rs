//! Verdict queries for the commit stage.

use crate::config::Config;
use crate::ir::{
    Context, Inst, InstKind, Peel, ResultState, SpecTree, SpecialCheck, ThreadLocalState,
};
use crate::walker::TentativeLoads;

impl TentativeLoads {
    /// The classification of `inst`.
    pub fn classification(&self, inst: Inst) -> ThreadLocalState {
        self.classes[inst]
    }

    /// Did `ctx` or anything below it read tentative data?
    pub fn reads_tentative_data(&self, ctx: Context) -> bool {
        self.contexts[ctx].reads_tentative
    }

    /// Did `ctx` or anything below it cross a yield point?
    pub fn crosses_yield_point(&self, ctx: Context) -> bool {
        self.contexts[ctx].yields
    }

    /// Did any iteration of `peel` read tentative data?
    pub fn peel_reads_tentative_data(&self, tree: &SpecTree, peel: Peel) -> bool {
        tree.peel(peel)
            .iterations
            .iter()
            .any(|&it| self.reads_tentative_data(it))
    }

    /// Does `inst` need a thread-interference check when committed?
    ///
    /// Instructions with a special check of their own are left to the code
    /// emitting that check.
    pub fn requires_runtime_check(&self, tree: &SpecTree, config: &Config, inst: Inst) -> bool {
        if config.omits_checks() {
            return false;
        }
        tree.try_inst(inst)
            .is_some_and(|data| data.special_check == SpecialCheck::None)
            && self.needs_check(tree, inst, false)
    }

    /// Does `inst` need any run-time check, counting special checks?
    pub fn requires_any_runtime_check(&self, tree: &SpecTree, inst: Inst) -> bool {
        tree.try_inst(inst).is_some() && self.needs_check(tree, inst, true)
    }

    pub(crate) fn needs_check(&self, tree: &SpecTree, inst: Inst, include_special: bool) -> bool {
        let data = tree.inst(inst);
        if matches!(data.result, ResultState::Void | ResultState::Unanalyzed) {
            return false;
        }
        match data.special_check {
            SpecialCheck::AsExpected => return true,
            SpecialCheck::FileUnchanged | SpecialCheck::MemCompare if include_special => {
                return true;
            }
            _ => {}
        }

        if matches!(data.kind, InstKind::MemCopy { .. })
            || (data.kind.reads_memory_directly() && !data.kind.is_call())
        {
            return self.classes[inst] == ThreadLocalState::MustCheck;
        }

        // The result of a call into a disabled context that read tentative
        // data is only as good as that data.
        if let Some(callee) = tree.inlined_context(inst) {
            if !tree.context(callee).enabled && self.reads_tentative_data(callee) {
                return data.result == ResultState::Known;
            }
        }

        // Likewise for values flowing out of a disabled peel attempt.
        if matches!(data.kind, InstKind::Phi) {
            let ctx = tree.context(data.ctx);
            let body = tree.body(ctx.body);
            for &pred in body.preds(data.block) {
                let Some(inner) = body
                    .scope(pred)
                    .filter(|&lp| Some(lp) != ctx.scope && body.scope_contains(ctx.scope, Some(lp)))
                else {
                    continue;
                };
                let child = body.immediate_child_loop(ctx.scope, inner);
                let Some(peel) = tree.terminated_peel(data.ctx, child) else {
                    continue;
                };
                if !tree.peel(peel).enabled && self.peel_reads_tentative_data(tree, peel) {
                    return data.result == ResultState::Known;
                }
            }
        }
        false
    }
}
