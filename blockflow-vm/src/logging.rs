//! Wire log rings and their end-of-cycle drain.
//!
//! Two bounded rings mirror the two record kinds of the wire format:
//! failed results (24-byte records) and progress reports (22-byte
//! records). After each tick the driver drains both into MTU-sized,
//! kind-homogeneous batches on the transport's log path. `BLOCK_INACTIVE`
//! never reaches the ring.

use crate::consts::{LOG_RING_CAPACITY, PUBLISH_MTU};
use crate::error::{Owner, VmError};
use crate::transport::Transport;
use blockflow_asm::Fault;
use itertools::Itertools;
use std::collections::VecDeque;

/// Progress report identifiers, serialized as `u16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum ReportId {
    ContextAllocated = 1,
    InstancesCreated,
    DataParsed,
    AccessSlabAllocated,
    BlocksAllocated,
    BlocksVerified,
    LoopInitialized,
    LoopStarted,
    LoopStopped,
    PeriodChanged,
    LoopRanOnce,
    ExecutionFinished,
}

/// A failed result bound for the wire.
///
/// Encoded as `{code:u16, owner:u16, owner_idx:u16, flags:u8, depth:u8,
/// time:u64, cycle:u64}`, 24 bytes little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultRecord {
    /// Fault code.
    pub code: u16,
    /// Reporting site.
    pub owner: u16,
    /// Index the site worked on.
    pub owner_idx: u16,
    /// `abort | warning << 1 | notice << 2`.
    pub flags: u8,
    /// Surfacing depth.
    pub depth: u8,
    /// Loop time in ms.
    pub time: u64,
    /// Tick counter.
    pub cycle: u64,
}

/// Encoded length of a [`ResultRecord`].
pub const RESULT_RECORD_LEN: usize = 24;

/// A progress report bound for the wire.
///
/// Encoded as `{log_id:u16, owner:u16, owner_idx:u16, time:u64,
/// cycle:u64}`, 22 bytes little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportRecord {
    /// Report identifier.
    pub log_id: u16,
    /// Reporting site.
    pub owner: u16,
    /// Index the site worked on.
    pub owner_idx: u16,
    /// Loop time in ms.
    pub time: u64,
    /// Tick counter.
    pub cycle: u64,
}

/// Encoded length of a [`ReportRecord`].
pub const REPORT_RECORD_LEN: usize = 22;

impl ResultRecord {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.code.to_le_bytes());
        out.extend_from_slice(&self.owner.to_le_bytes());
        out.extend_from_slice(&self.owner_idx.to_le_bytes());
        out.push(self.flags);
        out.push(self.depth);
        out.extend_from_slice(&self.time.to_le_bytes());
        out.extend_from_slice(&self.cycle.to_le_bytes());
    }
}

impl ReportRecord {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.log_id.to_le_bytes());
        out.extend_from_slice(&self.owner.to_le_bytes());
        out.extend_from_slice(&self.owner_idx.to_le_bytes());
        out.extend_from_slice(&self.time.to_le_bytes());
        out.extend_from_slice(&self.cycle.to_le_bytes());
    }
}

/// Bounded rings of wire log records.
#[derive(Debug, Default)]
pub struct LogSink {
    results: VecDeque<ResultRecord>,
    reports: VecDeque<ReportRecord>,
}

fn push_bounded<T>(ring: &mut VecDeque<T>, record: T) {
    if ring.len() == LOG_RING_CAPACITY {
        ring.pop_front();
    }
    ring.push_back(record);
}

impl LogSink {
    /// Queue a failed result; `BLOCK_INACTIVE` stays silent.
    pub fn error(&mut self, err: &VmError, time_ms: u64, cycle: u64) {
        if err.fault == Fault::BlockInactive {
            return;
        }
        tracing::debug!(%err, time_ms, cycle, "queueing error record");
        push_bounded(
            &mut self.results,
            ResultRecord {
                code: err.fault.code(),
                owner: err.owner as u16,
                owner_idx: err.owner_idx,
                flags: err.flags(),
                depth: err.depth,
                time: time_ms,
                cycle,
            },
        );
    }

    /// Queue a progress report.
    pub fn report(&mut self, id: ReportId, owner: Owner, owner_idx: u16, time_ms: u64, cycle: u64) {
        push_bounded(
            &mut self.reports,
            ReportRecord {
                log_id: id as u16,
                owner: owner as u16,
                owner_idx,
                time: time_ms,
                cycle,
            },
        );
    }

    /// Queued record count, both kinds.
    pub fn len(&self) -> usize {
        self.results.len() + self.reports.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty() && self.reports.is_empty()
    }

    /// Iterate the queued result records, oldest first.
    pub fn records(&self) -> impl Iterator<Item = &ResultRecord> {
        self.results.iter()
    }

    /// Iterate the queued report records, oldest first.
    pub fn reports(&self) -> impl Iterator<Item = &ReportRecord> {
        self.reports.iter()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.results.clear();
        self.reports.clear();
    }

    /// Drain both rings into MTU-sized batches on the transport's log path.
    ///
    /// Batches are homogeneous: result frames hold only 24-byte records,
    /// report frames only 22-byte records.
    pub fn drain(&mut self, transport: &mut dyn Transport) {
        if !self.results.is_empty() {
            let records: Vec<ResultRecord> = self.results.drain(..).collect();
            for batch in &records.iter().chunks(PUBLISH_MTU / RESULT_RECORD_LEN) {
                let mut frame = Vec::with_capacity(PUBLISH_MTU);
                for record in batch {
                    record.encode(&mut frame);
                }
                transport.send_log(&frame);
            }
        }
        if !self.reports.is_empty() {
            let records: Vec<ReportRecord> = self.reports.drain(..).collect();
            for batch in &records.iter().chunks(PUBLISH_MTU / REPORT_RECORD_LEN) {
                let mut frame = Vec::with_capacity(PUBLISH_MTU);
                for record in batch {
                    record.encode(&mut frame);
                }
                transport.send_log(&frame);
            }
        }
    }
}
