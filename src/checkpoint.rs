//! Checkpoint failure paths.
//!
//! Every run-time check that can fail needs somewhere to go. The commit stage
//! emits an unspecialized continuation for each block reachable from a failed
//! check; this module computes, per function root and body block, the earliest
//! instruction index from which that continuation must start.

use crate::ir::{Block, Context, InstKind, SpecTree, SpecialCheck};
use crate::timing;
use crate::walker::TentativeLoads;
use rustc_hash::FxHashMap;

/// Blocks reachable from a failed check, keyed by function root.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FailedPaths {
    marks: FxHashMap<(Context, Block), u32>,
}

impl FailedPaths {
    /// The earliest instruction index in `block` of `root` from which a
    /// failure path runs, if any does.
    pub fn earliest(&self, root: Context, block: Block) -> Option<u32> {
        self.marks.get(&(root, block)).copied()
    }

    /// Does any failure path run through `block` of `root`?
    pub fn is_marked(&self, root: Context, block: Block) -> bool {
        self.marks.contains_key(&(root, block))
    }

    /// Number of marked blocks.
    pub fn len(&self) -> usize {
        self.marks.len()
    }

    /// Is nothing marked?
    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    /// Lower the mark of `block` to `index`. Returns true if the block was not
    /// marked before.
    fn mark(&mut self, root: Context, block: Block, index: u32) -> bool {
        match self.marks.get_mut(&(root, block)) {
            Some(old) => {
                *old = (*old).min(index);
                false
            }
            None => {
                self.marks.insert((root, block), index);
                true
            }
        }
    }

    /// Mark `block` from `index`, then everything reachable from it from the
    /// start.
    fn mark_reachable(&mut self, tree: &SpecTree, root: Context, block: Block, index: u32) {
        if !self.mark(root, block, index) {
            return;
        }
        let body = tree.context_body(root);
        let mut worklist = vec![block];
        while let Some(block) = worklist.pop() {
            for &succ in body.succs(block) {
                if self.mark(root, succ, 0) {
                    worklist.push(succ);
                }
            }
        }
    }
}

impl TentativeLoads {
    /// Find the blocks each check failure can reach.
    pub fn add_checkpoint_failed_blocks(&self, tree: &SpecTree) -> FailedPaths {
        let _tt = timing::checkpoint_blocks();
        let mut paths = FailedPaths::default();
        if let Some(entry) = tree.entry() {
            self.visit_failures(tree, entry, &mut paths);
        }
        log::debug!("checkpoints: {} blocks on failure paths", paths.len());
        paths
    }

    /// Mark the failure paths starting in `ctx` and its enabled descendants.
    /// Returns true if a failure path reaches one of its return blocks.
    fn visit_failures(&self, tree: &SpecTree, ctx: Context, paths: &mut FailedPaths) -> bool {
        let data = tree.context(ctx);
        if data.committed {
            return false;
        }
        let root = data.root;
        let body = tree.body(data.body);
        for block in tree.own_blocks(ctx) {
            let insts = data.block(block).map_or(&[][..], |b| &b.insts[..]);
            for (j, &inst) in insts.iter().enumerate() {
                let idata = tree.inst(inst);
                let fails = if idata.special_check == SpecialCheck::FileUnchanged {
                    // Checked before the instruction runs.
                    paths.mark_reachable(tree, root, block, j as u32);
                    continue;
                } else if let Some(child) = tree
                    .inlined_context(inst)
                    .filter(|&c| tree.context(c).enabled)
                {
                    self.visit_failures(tree, child, paths)
                } else {
                    self.needs_check(tree, inst, false)
                        || idata.special_check == SpecialCheck::MemCompare
                };
                if !fails {
                    continue;
                }
                // PHI checks run once the whole group has executed.
                let next_is_phi = insts
                    .get(j + 1)
                    .is_some_and(|&n| matches!(tree.inst(n).kind, InstKind::Phi));
                if matches!(idata.kind, InstKind::Phi) && next_is_phi {
                    continue;
                }
                if j + 1 == insts.len() {
                    if let Some(&succ) = body.succs(block).first() {
                        paths.mark_reachable(tree, root, succ, 0);
                    } else {
                        paths.mark_reachable(tree, root, block, j as u32 + 1);
                    }
                } else {
                    paths.mark_reachable(tree, root, block, j as u32 + 1);
                }
            }
        }
        for &peel in data.peels.values() {
            let pd = tree.peel(peel);
            if pd.terminated && pd.enabled {
                for &it in &pd.iterations {
                    self.visit_failures(tree, it, paths);
                }
            }
        }
        if !data.is_function() {
            return false;
        }
        body.return_blocks()
            .any(|block| paths.is_marked(root, block))
    }
}
