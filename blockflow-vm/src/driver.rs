//! Periodic tick driver and the skip-budget watchdog.
//!
//! Two threads cooperate around a pair of rendezvous points. The timer
//! thread is the hardware-timer analogue: every period it either consumes
//! the posted cycle-end flag and signals the next tick, or counts a
//! skipped loop; past the skip budget it raises the watchdog flag and
//! halts the loop. The body thread waits for tick signals, borrows the
//! engine under the controller's mutex, executes one tick and posts
//! cycle-end after draining the publish channel and the log ring.
//!
//! The timer thread touches only atomics, the status mutex and the
//! rendezvous flags; it never allocates and never calls into the logger.

use crate::consts::{LOOP_PERIOD_MAX_US, LOOP_PERIOD_MIN_US};
use crate::engine::{Engine, LoopConfig, TickCtx};
use crate::error::{Owner, VmError, VmResult};
use crate::state::LoopStatus;
use crate::transport::Transport;
use blockflow_asm::Fault;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Binary-semaphore style rendezvous.
#[derive(Default)]
struct Rendezvous {
    flag: Mutex<bool>,
    cv: Condvar,
}

impl Rendezvous {
    fn post(&self) {
        *self.flag.lock() = true;
        self.cv.notify_one();
    }

    fn clear(&self) {
        *self.flag.lock() = false;
    }

    /// Take the flag if it is posted, without blocking.
    fn try_consume(&self) -> bool {
        let mut flag = self.flag.lock();
        core::mem::take(&mut *flag)
    }

    /// Wait up to `timeout` for a post and consume it.
    fn wait_consume(&self, timeout: Duration) -> bool {
        let mut flag = self.flag.lock();
        if !*flag {
            let _ = self.cv.wait_for(&mut flag, timeout);
        }
        core::mem::take(&mut *flag)
    }
}

struct LoopShared {
    status: Mutex<LoopStatus>,
    tick: Rendezvous,
    cycle_end: Rendezvous,
    period_us: AtomicU64,
    time_ms: AtomicU64,
    cycle: AtomicU64,
    skipped: AtomicU8,
    max_skipped: AtomicU8,
    wtd_triggered: AtomicBool,
    shutdown: AtomicBool,
}

/// Handle of the running loop: owns the timer and body threads.
pub struct TickDriver {
    shared: Arc<LoopShared>,
    timer: Option<JoinHandle<()>>,
    body: Option<JoinHandle<()>>,
}

impl TickDriver {
    /// Construct the loop in `CREATED` state and spawn its threads.
    pub fn spawn(
        cfg: LoopConfig,
        engine: Arc<Mutex<Engine>>,
        transport: Arc<Mutex<dyn Transport>>,
    ) -> Self {
        let shared = Arc::new(LoopShared {
            status: Mutex::new(LoopStatus::Created),
            tick: Rendezvous::default(),
            cycle_end: Rendezvous::default(),
            period_us: AtomicU64::new(
                cfg.period_us.clamp(LOOP_PERIOD_MIN_US, LOOP_PERIOD_MAX_US),
            ),
            time_ms: AtomicU64::new(0),
            cycle: AtomicU64::new(0),
            skipped: AtomicU8::new(0),
            max_skipped: AtomicU8::new(cfg.max_skipped),
            wtd_triggered: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        });

        let timer = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || timer_loop(&shared))
        };
        let body = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || body_loop(&shared, &engine, &transport))
        };

        tracing::debug!(period_us = cfg.period_us, "loop initialized");
        Self {
            shared,
            timer: Some(timer),
            body: Some(body),
        }
    }

    /// Current lifecycle state.
    pub fn status(&self) -> LoopStatus {
        *self.shared.status.lock()
    }

    /// Loop time in milliseconds, accumulated per tick.
    pub fn time_ms(&self) -> u64 {
        self.shared.time_ms.load(Ordering::Relaxed)
    }

    /// Completed tick count.
    pub fn cycle(&self) -> u64 {
        self.shared.cycle.load(Ordering::Relaxed)
    }

    /// Current period in microseconds.
    pub fn period_us(&self) -> u64 {
        self.shared.period_us.load(Ordering::Relaxed)
    }

    /// True when the watchdog halted the loop.
    pub fn wtd_triggered(&self) -> bool {
        self.shared.wtd_triggered.load(Ordering::Relaxed)
    }

    /// Start or resume the periodic loop.
    ///
    /// The first cycle of a fresh start fires immediately; resuming from
    /// `HALTED` clears the watchdog flags.
    pub fn start(&self) -> VmResult<()> {
        let mut status = self.shared.status.lock();
        match *status {
            LoopStatus::Created | LoopStatus::Stopped => {}
            LoopStatus::Halted => {
                self.shared.wtd_triggered.store(false, Ordering::Relaxed);
                self.shared.skipped.store(0, Ordering::Relaxed);
            }
            LoopStatus::Running => {
                return Err(VmError::abort(Fault::InvalidState, Owner::LoopStart, 0))
            }
        }
        *status = LoopStatus::Running;
        drop(status);

        self.shared.cycle_end.clear();
        self.shared.tick.post();
        tracing::debug!("loop started");
        Ok(())
    }

    /// Pause the periodic loop.
    pub fn stop(&self) -> VmResult<()> {
        let mut status = self.shared.status.lock();
        if *status != LoopStatus::Running {
            return Err(VmError::warning(Fault::InvalidState, Owner::LoopStop, 0));
        }
        *status = LoopStatus::Stopped;
        tracing::debug!("loop stopped");
        Ok(())
    }

    /// Change the period; the timer picks it up on its next wake.
    ///
    /// Values outside `[10_000, 1_000_000]` microseconds are clamped and
    /// reported as a warning.
    pub fn set_period(&self, period_us: u64) -> VmResult<()> {
        let clamped = period_us.clamp(LOOP_PERIOD_MIN_US, LOOP_PERIOD_MAX_US);
        self.shared.period_us.store(clamped, Ordering::Relaxed);
        tracing::debug!(period_us = clamped, "period set");
        if clamped != period_us {
            return Err(VmError::warning(Fault::InvalidArg, Owner::LoopSetPeriod, 0));
        }
        Ok(())
    }

    /// Run one tick synchronously; denied while the loop is running.
    ///
    /// Waits up to `max_skipped x period` for the cycle to complete;
    /// a timeout halts the loop the same way the periodic watchdog does.
    pub fn run_once(&self) -> VmResult<()> {
        if *self.shared.status.lock() == LoopStatus::Running {
            return Err(VmError::warning(Fault::InvalidState, Owner::LoopRunOnce, 0));
        }
        let period = self.shared.period_us.load(Ordering::Relaxed);
        let budget = u64::from(self.shared.max_skipped.load(Ordering::Relaxed)).max(1);

        self.shared.cycle_end.clear();
        self.shared.tick.post();

        let timeout = Duration::from_micros(period * budget);
        if self.shared.cycle_end.wait_consume(timeout) {
            self.shared.cycle.fetch_add(1, Ordering::Relaxed);
            self.shared
                .time_ms
                .fetch_add((period / 1000).max(1), Ordering::Relaxed);
            tracing::debug!("loop ran once");
            Ok(())
        } else {
            self.shared.wtd_triggered.store(true, Ordering::Relaxed);
            *self.shared.status.lock() = LoopStatus::Halted;
            Err(VmError::abort(Fault::WtdTriggered, Owner::LoopRunOnce, 0))
        }
    }
}

impl Drop for TickDriver {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
        self.shared.tick.post();
        if let Some(timer) = self.timer.take() {
            let _ = timer.join();
        }
        if let Some(body) = self.body.take() {
            let _ = body.join();
        }
    }
}

/// The hardware-timer analogue.
fn timer_loop(shared: &LoopShared) {
    while !shared.shutdown.load(Ordering::Relaxed) {
        let period = shared.period_us.load(Ordering::Relaxed);
        std::thread::sleep(Duration::from_micros(period));
        if shared.shutdown.load(Ordering::Relaxed) {
            break;
        }
        if *shared.status.lock() != LoopStatus::Running {
            continue;
        }
        shared
            .time_ms
            .fetch_add((period / 1000).max(1), Ordering::Relaxed);

        if shared.cycle_end.try_consume() {
            shared.skipped.store(0, Ordering::Relaxed);
            shared.cycle.fetch_add(1, Ordering::Relaxed);
            shared.tick.post();
        } else {
            let skipped = shared.skipped.fetch_add(1, Ordering::Relaxed) + 1;
            if skipped > shared.max_skipped.load(Ordering::Relaxed) {
                shared.wtd_triggered.store(true, Ordering::Relaxed);
                *shared.status.lock() = LoopStatus::Halted;
            }
        }
    }
}

/// The driver unit: waits for tick signals and walks the block list.
fn body_loop(
    shared: &LoopShared,
    engine: &Mutex<Engine>,
    transport: &Mutex<dyn Transport>,
) {
    loop {
        if shared.shutdown.load(Ordering::Relaxed) {
            break;
        }
        if !shared.tick.wait_consume(Duration::from_millis(50)) {
            continue;
        }
        let period = shared.period_us.load(Ordering::Relaxed);
        let tick = TickCtx {
            time_ms: shared.time_ms.load(Ordering::Relaxed),
            cycle: shared.cycle.load(Ordering::Relaxed),
            delta_ms: (period / 1000).max(1) as u32,
            watchdog: &shared.wtd_triggered,
        };
        {
            let mut engine = engine.lock();
            // tick failures are already queued on the log ring
            let _ = engine.execute_tick(&tick);
            let mut transport = transport.lock();
            engine.publish(&mut *transport);
            engine.logs.drain(&mut *transport);
        }
        shared.cycle_end.post();
    }
}
