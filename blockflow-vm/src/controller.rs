//! Control-plane entry point: framed packets in, engine mutations out.
//!
//! The controller owns the engine behind a mutex shared with the driver's
//! body thread, which is what keeps parsers from ever running concurrently
//! with a tick. Frames whose first byte is a known packet header go to the
//! parse path; anything else is read as a 16-bit command id.

use crate::driver::TickDriver;
use crate::engine::Engine;
use crate::error::{Owner, VmError, VmResult};
use crate::logging::ReportId;
use crate::state::LoopStatus;
use crate::transport::Transport;
use blockflow_asm::{Command, Fault, PacketHeader};
use parking_lot::Mutex;
use std::sync::Arc;

/// Owner of the runtime state and the loop lifecycle.
pub struct Controller {
    engine: Arc<Mutex<Engine>>,
    transport: Arc<Mutex<dyn Transport>>,
    driver: Option<TickDriver>,
}

impl Controller {
    /// Fresh controller over the given transport.
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self {
            engine: Arc::new(Mutex::new(Engine::new())),
            transport: Arc::new(Mutex::new(transport)),
            driver: None,
        }
    }

    /// Shared handle to the engine (the publisher and tests read through
    /// this; mutation happens via packets).
    pub fn engine(&self) -> Arc<Mutex<Engine>> {
        Arc::clone(&self.engine)
    }

    /// The loop driver, once `LOOP_INIT` constructed it.
    pub fn driver(&self) -> Option<&TickDriver> {
        self.driver.as_ref()
    }

    /// Loop state; `CREATED` before initialization.
    pub fn status(&self) -> LoopStatus {
        self.driver
            .as_ref()
            .map(TickDriver::status)
            .unwrap_or_default()
    }

    fn record(&self, err: &VmError) {
        let (time, cycle) = self
            .driver
            .as_ref()
            .map(|d| (d.time_ms(), d.cycle()))
            .unwrap_or((0, 0));
        self.engine.lock().logs.error(err, time, cycle);
    }

    fn report(&self, id: ReportId, owner: Owner) {
        let (time, cycle) = self
            .driver
            .as_ref()
            .map(|d| (d.time_ms(), d.cycle()))
            .unwrap_or((0, 0));
        self.engine.lock().logs.report(id, owner, 0, time, cycle);
    }

    /// Process one framed packet from the transport.
    ///
    /// Every failure is queued on the log ring before being returned, so
    /// the peer sees it after the next drain.
    pub fn handle_packet(&mut self, frame: &[u8]) -> VmResult<()> {
        let result = self.dispatch(frame);
        if let Err(err) = &result {
            tracing::warn!(%err, "packet handling failed");
            self.record(err);
        }
        result
    }

    fn dispatch(&mut self, frame: &[u8]) -> VmResult<()> {
        if frame.len() < 2 {
            return Err(VmError::warning(Fault::PacketEmpty, Owner::Controller, 0));
        }

        if PacketHeader::try_from(frame[0]).is_ok() {
            return self.engine.lock().dispatch_packet(frame);
        }

        let id = u16::from_le_bytes([frame[0], frame[1]]);
        let command = Command::try_from(id)
            .map_err(|f| VmError::warning(f, Owner::Controller, id))?;
        tracing::debug!(?command, "processing command");
        self.run_command(command, &frame[2..])
    }

    fn run_command(&mut self, command: Command, payload: &[u8]) -> VmResult<()> {
        match command {
            Command::LoopInit => {
                let cfg = self.engine.lock().loop_cfg();
                // re-initialization replaces the previous loop wholesale
                self.driver = Some(TickDriver::spawn(
                    cfg,
                    Arc::clone(&self.engine),
                    Arc::clone(&self.transport),
                ));
                self.report(ReportId::LoopInitialized, Owner::LoopInit);
                Ok(())
            }
            Command::LoopStart => {
                let driver = self.driver.as_ref().ok_or(VmError::warning(
                    Fault::InvalidState,
                    Owner::LoopStart,
                    0,
                ))?;
                let verified = self.engine.lock().verify_code();
                match verified {
                    Ok(()) => {}
                    Err(err) if err.is_abort() => {
                        return Err(err.chain(Owner::LoopStart, 0));
                    }
                    Err(err) => self.engine.lock().logs.error(&err, 0, 0),
                }
                driver.start()?;
                self.report(ReportId::LoopStarted, Owner::LoopStart);
                Ok(())
            }
            Command::LoopStop => {
                let driver = self.driver.as_ref().ok_or(VmError::warning(
                    Fault::InvalidState,
                    Owner::LoopStop,
                    0,
                ))?;
                driver.stop()?;
                self.report(ReportId::LoopStopped, Owner::LoopStop);
                Ok(())
            }
            Command::SetPeriod => {
                let driver = self.driver.as_ref().ok_or(VmError::warning(
                    Fault::InvalidState,
                    Owner::LoopSetPeriod,
                    0,
                ))?;
                let bytes: [u8; 4] = payload
                    .get(..4)
                    .and_then(|b| b.try_into().ok())
                    .ok_or(VmError::abort(
                        Fault::PacketIncomplete,
                        Owner::LoopSetPeriod,
                        0,
                    ))?;
                driver.set_period(u64::from(u32::from_le_bytes(bytes)))?;
                self.report(ReportId::PeriodChanged, Owner::LoopSetPeriod);
                Ok(())
            }
            Command::RunOnce => {
                let driver = self.driver.as_ref().ok_or(VmError::warning(
                    Fault::InvalidState,
                    Owner::LoopRunOnce,
                    0,
                ))?;
                driver.run_once()?;
                self.report(ReportId::LoopRanOnce, Owner::LoopRunOnce);
                Ok(())
            }
            Command::RunOneStep => {
                if self.status() == LoopStatus::Running {
                    return Err(VmError::warning(
                        Fault::InvalidState,
                        Owner::DebugStep,
                        0,
                    ));
                }
                let (time, cycle) = self
                    .driver
                    .as_ref()
                    .map(|d| (d.time_ms(), d.cycle()))
                    .unwrap_or((0, 0));
                let delta = self
                    .driver
                    .as_ref()
                    .map(|d| (d.period_us() / 1000).max(1) as u32)
                    .unwrap_or(10);
                let mut engine = self.engine.lock();
                let tick = crate::engine::TickCtx::unmonitored(time, cycle, delta);
                let stepped = engine.step_once(&tick).map(|_| ());
                let mut transport = self.transport.lock();
                engine.dump_blocks(&mut *transport);
                engine.logs.drain(&mut *transport);
                stepped
            }
            Command::ResetBlocks => {
                if let Some(driver) = &self.driver {
                    let _ = driver.stop();
                }
                self.engine.lock().reset_code();
                Ok(())
            }
            Command::ResetAll => {
                if let Some(driver) = &self.driver {
                    let _ = driver.stop();
                }
                self.driver = None;
                self.engine.lock().reset_all();
                Ok(())
            }
        }
    }
}
