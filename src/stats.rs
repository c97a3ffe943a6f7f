//! Check counting.

use crate::ir::{Context, SpecTree, SpecialCheck};
use crate::timing;
use crate::walker::TentativeLoads;
use cranelift_entity::SecondaryMap;

/// Interference checks needed by one context.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckCounts {
    /// Checks on the context's own instructions.
    pub here: u32,
    /// Checks on the context and all its descendants.
    pub including_children: u32,
}

/// Per-context check counts, used by the commit stage to decide whether
/// committing a context is worth it.
#[derive(Clone, Debug, Default)]
pub struct TentativeStats {
    counts: SecondaryMap<Context, CheckCounts>,
}

impl TentativeStats {
    /// Counts for `ctx`. Committed and unreached contexts count zero.
    pub fn get(&self, ctx: Context) -> CheckCounts {
        self.counts[ctx]
    }

    /// Total checks in the tree below `root`.
    pub fn total(&self, root: Context) -> u32 {
        self.counts[root].including_children
    }
}

impl TentativeLoads {
    /// Count the instructions needing an interference check in every
    /// context reachable from the entry.
    pub fn count_tentative_instructions(&self, tree: &SpecTree) -> TentativeStats {
        let _tt = timing::count_checks();
        let mut stats = TentativeStats::default();
        if let Some(entry) = tree.entry() {
            self.count_context(tree, entry, &mut stats);
        }
        stats
    }

    fn count_context(&self, tree: &SpecTree, ctx: Context, stats: &mut TentativeStats) -> u32 {
        let data = tree.context(ctx);
        if data.committed {
            return 0;
        }
        let mut here = 0;
        for block in tree.own_blocks(ctx) {
            let insts = data.block(block).map_or(&[][..], |b| &b.insts[..]);
            for &inst in insts {
                if tree.inst(inst).special_check == SpecialCheck::None
                    && self.needs_check(tree, inst, false)
                {
                    here += 1;
                }
            }
        }
        let mut total = here;
        for &call in &data.calls {
            if let Some(child) = tree.inlined_context(call) {
                total += self.count_context(tree, child, stats);
            }
        }
        for &peel in data.peels.values() {
            let peel = tree.peel(peel);
            if peel.terminated {
                for &it in &peel.iterations {
                    total += self.count_context(tree, it, stats);
                }
            }
        }
        stats.counts[ctx] = CheckCounts {
            here,
            including_children: total,
        };
        total
    }
}
