//! Engine runtime state and the per-tick execution walk.
//!
//! [`Engine`] is the single value holding everything a code load creates:
//! memory contexts, the access slab, the ordered block array, subscriptions
//! and the wire log ring. The packet parsers (see [`crate::parser`]) build
//! it up; the driver borrows it once per tick under the controller's mutex.

use crate::blocks::{self, Block};
use crate::error::{Owner, VmError, VmResult};
use crate::logging::LogSink;
use crate::memory::Memory;
use crate::parser::ParsePhases;
use crate::publish::Subscriptions;
use crate::state::BlockOutcome;
use blockflow_asm::{BlockType, Fault};
use core::sync::atomic::{AtomicBool, Ordering};

/// Loop timing configuration, fed by the `LOOP_CFG` packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    /// Tick period in microseconds.
    pub period_us: u64,
    /// Skip budget of the watchdog.
    pub max_skipped: u8,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            period_us: crate::consts::DEFAULT_PERIOD_US,
            max_skipped: crate::consts::DEFAULT_MAX_SKIPPED,
        }
    }
}

/// Per-tick context handed to every block execution.
#[derive(Debug, Clone, Copy)]
pub struct TickCtx<'a> {
    /// Loop time in milliseconds, accumulated per tick.
    pub time_ms: u64,
    /// Tick counter.
    pub cycle: u64,
    /// Milliseconds one tick advances the time base.
    pub delta_ms: u32,
    /// Watchdog flag raised by the timer when the skip budget is spent.
    pub watchdog: &'a AtomicBool,
}

static NO_WATCHDOG: AtomicBool = AtomicBool::new(false);

impl TickCtx<'static> {
    /// A tick context without a live watchdog, for synchronous runs.
    pub fn unmonitored(time_ms: u64, cycle: u64, delta_ms: u32) -> Self {
        Self {
            time_ms,
            cycle,
            delta_ms,
            watchdog: &NO_WATCHDOG,
        }
    }
}

/// The ordered block array of one code load.
#[derive(Debug, Default)]
pub struct Code {
    blocks: Vec<Option<Block>>,
}

impl Code {
    /// Allocate slots for `count` blocks, dropping any previous load.
    pub fn create(&mut self, count: u16) {
        self.blocks = vec![None; count as usize];
        tracing::debug!(count, "block list allocated");
    }

    /// Declared block count.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// True when no code is loaded.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Drop the whole load.
    pub fn reset(&mut self) {
        self.blocks.clear();
    }

    /// Place a block at its declared index.
    pub fn insert(&mut self, block: Block) -> Result<(), Fault> {
        let slot = self
            .blocks
            .get_mut(block.idx as usize)
            .ok_or(Fault::BlockInvalidParam)?;
        *slot = Some(block);
        Ok(())
    }

    /// Look up a constructed block.
    pub fn block(&self, idx: usize) -> Result<&Block, Fault> {
        self.blocks
            .get(idx)
            .ok_or(Fault::BlockInvalidParam)?
            .as_ref()
            .ok_or(Fault::NullPtr)
    }

    /// Mutable lookup of a constructed block.
    pub fn block_mut(&mut self, idx: usize) -> Result<&mut Block, Fault> {
        self.blocks
            .get_mut(idx)
            .ok_or(Fault::BlockInvalidParam)?
            .as_mut()
            .ok_or(Fault::NullPtr)
    }
}

/// Complete runtime state of the engine.
#[derive(Debug, Default)]
pub struct Engine {
    pub(crate) memory: Memory,
    pub(crate) code: Code,
    pub(crate) subs: Subscriptions,
    pub(crate) logs: LogSink,
    pub(crate) phases: ParsePhases,
    pub(crate) loop_cfg: LoopConfig,
    /// Cursor of the single-step debug walk.
    pub(crate) step_cursor: usize,
    /// Busy-wait injected before one block, to exercise the watchdog.
    #[cfg(test)]
    pub(crate) test_spin: Option<(usize, u64)>,
}

impl Engine {
    /// Fresh engine with no contexts and no code.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared memory of the engine.
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Loaded code graph.
    pub fn code(&self) -> &Code {
        &self.code
    }

    /// Wire log ring.
    pub fn logs(&self) -> &LogSink {
        &self.logs
    }

    /// Loop configuration parsed from `LOOP_CFG`, or the defaults.
    pub fn loop_cfg(&self) -> LoopConfig {
        self.loop_cfg
    }

    /// Clear the `updated` flag on every clearable output of block `idx`.
    pub(crate) fn clear_block_outputs(&mut self, idx: usize) {
        let Engine { memory, code, .. } = self;
        if let Ok(block) = code.block(idx) {
            blocks::clear_outputs(memory, block);
        }
    }

    /// Dispatch one block by its type tag.
    ///
    /// Returns the outcome plus the number of following blocks to skip
    /// (non-zero only for the for-loop, which runs its child chain
    /// itself).
    pub(crate) fn execute_block(
        &mut self,
        idx: usize,
        tick: &TickCtx<'_>,
    ) -> VmResult<(BlockOutcome, usize)> {
        let ty = self
            .code
            .block(idx)
            .map_err(|f| VmError::abort(f, Owner::ExecuteCode, idx as u16))?
            .ty;

        if ty == BlockType::For {
            return blocks::for_loop::execute(self, idx, tick);
        }

        let Engine { memory, code, .. } = self;
        let wrap = |f| VmError::abort(f, Owner::ExecuteCode, idx as u16);
        let outcome = match ty {
            BlockType::Math => blocks::math::execute(memory, code.block(idx).map_err(wrap)?)?,
            BlockType::Logic => blocks::logic::execute(memory, code.block(idx).map_err(wrap)?)?,
            BlockType::Set => blocks::set::execute(memory, code.block(idx).map_err(wrap)?)?,
            BlockType::InSelector => {
                blocks::selector::execute_in(memory, code.block(idx).map_err(wrap)?)?
            }
            BlockType::QSelector => {
                blocks::selector::execute_q(memory, code.block(idx).map_err(wrap)?)?
            }
            BlockType::Latch => {
                blocks::latch::execute(memory, code.block_mut(idx).map_err(wrap)?)?
            }
            BlockType::Counter => {
                blocks::counter::execute(memory, code.block_mut(idx).map_err(wrap)?)?
            }
            BlockType::Clock => {
                blocks::clock::execute(memory, code.block_mut(idx).map_err(wrap)?, tick)?
            }
            BlockType::Timer => {
                blocks::timer::execute(memory, code.block_mut(idx).map_err(wrap)?, tick)?
            }
            BlockType::For => unreachable!("handled above"),
        };
        Ok((outcome, 0))
    }

    /// Walk the ordered block list once.
    ///
    /// Clearable outputs are reset right before their block runs; the
    /// watchdog flag is honored between blocks; abort results terminate
    /// the walk, warnings and notices are logged and skipped over.
    pub fn execute_tick(&mut self, tick: &TickCtx<'_>) -> VmResult<()> {
        let total = self.code.len();
        let mut i = 0usize;
        while i < total {
            self.clear_block_outputs(i);

            if tick.watchdog.load(Ordering::Relaxed) {
                let err = VmError::abort(Fault::BlockWtdTriggered, Owner::ExecuteCode, i as u16);
                tracing::warn!(block = i, cycle = tick.cycle, "watchdog fired mid-tick");
                self.logs.error(&err, tick.time_ms, tick.cycle);
                return Err(err);
            }

            #[cfg(test)]
            if let Some((spin_idx, spin_ms)) = self.test_spin {
                if spin_idx == i {
                    std::thread::sleep(std::time::Duration::from_millis(spin_ms));
                }
            }

            match self.execute_block(i, tick) {
                Ok((_, skip)) => i += 1 + skip,
                Err(err) if err.is_abort() => {
                    let err = err.chain(Owner::ExecuteCode, i as u16);
                    self.logs.error(&err, tick.time_ms, tick.cycle);
                    return Err(err);
                }
                Err(err) => {
                    self.logs.error(&err, tick.time_ms, tick.cycle);
                    i += 1;
                }
            }
        }
        Ok(())
    }

    /// Check code completeness; precondition to `LOOP_START`.
    ///
    /// Verifies that every declared block was constructed, that every
    /// connected input and every output is wired to a live instance, and
    /// runs the per-type verifies. Warning-severity findings are logged
    /// and do not block the start.
    pub fn verify_code(&mut self) -> VmResult<()> {
        if self.code.is_empty() {
            return Err(VmError::warning(
                Fault::BlockInvalidParam,
                Owner::VerifyCode,
                0,
            ));
        }

        for i in 0..self.code.len() {
            let block = self
                .code
                .block(i)
                .map_err(|f| VmError::abort(f, Owner::VerifyCode, i as u16))?;

            for n in 0..block.in_cnt as usize {
                if block.connected(n) {
                    self.verify_port(block.input(n), i)?;
                }
            }
            for q in 0..block.q_cnt as usize {
                self.verify_port(block.output(q), i)?;
            }

            let per_type = if block.ty == BlockType::For {
                blocks::for_loop::verify(self, i)
            } else {
                blocks::verify_block(block)
            };
            if let Err(err) = per_type {
                if err.is_abort() {
                    return Err(err.chain(Owner::VerifyCode, i as u16));
                }
                tracing::warn!(block = i, %err, "verify warning");
                self.logs.error(&err, 0, 0);
            }
        }
        tracing::debug!(blocks = self.code.len(), "code verified");
        Ok(())
    }

    fn verify_port(&self, port: Option<crate::memory::AccessId>, idx: usize) -> VmResult<()> {
        let fail = || VmError::abort(Fault::NullPtr, Owner::VerifyCode, idx as u16);
        let id = port.ok_or_else(fail)?;
        let access = self.memory.access.node(id).map_err(|_| fail())?;
        self.memory.instance(access.target).map_err(|_| fail())?;
        Ok(())
    }

    /// Drop the code graph and the access slab, keeping memory contexts.
    pub fn reset_code(&mut self) {
        self.code.reset();
        self.memory.access.reset();
        self.step_cursor = 0;
        self.phases.remove(
            ParsePhases::ACCESS
                | ParsePhases::CODE
                | ParsePhases::HEADERS
                | ParsePhases::WIRING
                | ParsePhases::BLOCK_DATA,
        );
        tracing::debug!("code reset");
    }

    /// Return the engine to its startup state.
    pub fn reset_all(&mut self) {
        self.code.reset();
        self.memory.reset();
        self.subs.reset();
        self.logs.clear();
        self.step_cursor = 0;
        self.phases = ParsePhases::empty();
        self.loop_cfg = LoopConfig::default();
        tracing::debug!("full reset");
    }
}
