//! Pass timing.
//!
//! Every top-level operation of the analysis starts a [`TimingToken`] for its
//! pass. The token adds the elapsed time to a thread-local [`PassTimes`] table
//! when dropped; [`take_current`] hands the table over and clears it.

use core::fmt;
use std::cell::RefCell;
use std::time::{Duration, Instant};

/// A timed pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pass {
    /// Verify the context tree.
    Verifier,
    /// Interference analysis.
    TentativeLoads,
    /// Reset analysis state.
    Reset,
    /// Count instructions needing checks.
    CountChecks,
    /// Mark blocks reachable under check failure.
    CheckpointBlocks,
}

/// Number of timed passes.
pub const NUM_PASSES: usize = 5;

const PASSES: [Pass; NUM_PASSES] = [
    Pass::Verifier,
    Pass::TentativeLoads,
    Pass::Reset,
    Pass::CountChecks,
    Pass::CheckpointBlocks,
];

impl Pass {
    /// Index into a dense table of pass timings.
    pub fn idx(self) -> usize {
        self as usize
    }

    /// Description of the pass.
    pub fn description(self) -> &'static str {
        match self {
            Pass::Verifier => "Verify context tree",
            Pass::TentativeLoads => "Interference analysis",
            Pass::Reset => "Reset analysis state",
            Pass::CountChecks => "Count checked instructions",
            Pass::CheckpointBlocks => "Mark check-failure paths",
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Accumulated timing for one pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassTime {
    /// Total time spent in the pass.
    pub total: Duration,
    /// Number of times the pass ran.
    pub runs: u32,
}

/// Accumulated timing for all passes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassTimes {
    pass: [PassTime; NUM_PASSES],
}

impl PassTimes {
    /// Timing of `pass`.
    pub fn get(&self, pass: Pass) -> PassTime {
        self.pass[pass.idx()]
    }

    /// Add `other` into `self`.
    pub fn add(&mut self, other: &PassTimes) {
        for (mine, theirs) in self.pass.iter_mut().zip(&other.pass) {
            mine.total += theirs.total;
            mine.runs += theirs.runs;
        }
    }

    /// Total time over all passes.
    pub fn total(&self) -> Duration {
        self.pass.iter().map(|p| p.total).sum()
    }
}

impl fmt::Display for PassTimes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "======== ====== ==================================")?;
        writeln!(f, "   Total   Runs Pass")?;
        writeln!(f, "-------- ------ ----------------------------------")?;
        for pass in PASSES {
            let time = self.get(pass);
            if time.runs == 0 {
                continue;
            }
            writeln!(
                f,
                "{:8.3} {:6} {pass}",
                time.total.as_secs_f64(),
                time.runs
            )?;
        }
        writeln!(f, "======== ====== ==================================")
    }
}

thread_local! {
    static PASS_TIMES: RefCell<PassTimes> = RefCell::new(PassTimes::default());
}

/// Take the accumulated pass timings for this thread, resetting them.
pub fn take_current() -> PassTimes {
    PASS_TIMES.with(|times| core::mem::take(&mut *times.borrow_mut()))
}

/// A running pass. Dropping it records the elapsed time.
#[must_use]
pub struct TimingToken {
    pass: Pass,
    start: Instant,
}

impl Drop for TimingToken {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        log::debug!("timing: Ending {}: {:.3}s", self.pass, elapsed.as_secs_f64());
        PASS_TIMES.with(|times| {
            let mut times = times.borrow_mut();
            let slot = &mut times.pass[self.pass.idx()];
            slot.total += elapsed;
            slot.runs += 1;
        });
    }
}

fn start_pass(pass: Pass) -> TimingToken {
    log::debug!("timing: Starting {pass}");
    TimingToken {
        pass,
        start: Instant::now(),
    }
}

/// Verify the context tree.
pub fn verifier() -> TimingToken {
    start_pass(Pass::Verifier)
}

/// Interference analysis.
pub fn tentative_loads() -> TimingToken {
    start_pass(Pass::TentativeLoads)
}

/// Reset analysis state.
pub fn reset() -> TimingToken {
    start_pass(Pass::Reset)
}

/// Count instructions needing checks.
pub fn count_checks() -> TimingToken {
    start_pass(Pass::CountChecks)
}

/// Mark blocks reachable under check failure.
pub fn checkpoint_blocks() -> TimingToken {
    start_pass(Pass::CheckpointBlocks)
}
