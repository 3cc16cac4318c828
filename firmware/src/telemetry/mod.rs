//! Telemetry forwarding.
//!
//! The robot keeps its recent events in the core `TelemetryRecorder` ring.
//! [`TelemetryDrain`] copies out everything recorded since the previous pass
//! so the records can be logged after the robot lock is released, and counts
//! the records the ring overwrote in between.

use core::fmt::Write as _;

use discbot_core::telemetry::{
    EventId, TELEMETRY_RING_CAPACITY, TelemetryRecord, TelemetryRecorder,
};
use heapless::{String, Vec};

/// Longest rendered record forwarded to the log.
pub const LOG_LINE_CAPACITY: usize = 64;

/// Records pulled out by one [`TelemetryDrain::drain`] pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Drained {
    pub records: Vec<TelemetryRecord, TELEMETRY_RING_CAPACITY>,
    /// Records that were overwritten before they could be drained.
    pub dropped: u32,
}

/// Cursor over the recorder's event ids.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TelemetryDrain {
    cursor: EventId,
}

impl TelemetryDrain {
    pub const fn new() -> Self {
        Self { cursor: 0 }
    }

    /// Copies every record newer than the previous pass.
    pub fn drain<const CAPACITY: usize>(
        &mut self,
        recorder: &TelemetryRecorder<CAPACITY>,
    ) -> Drained {
        let mut drained = Drained::default();
        for record in recorder.records_since(self.cursor) {
            if drained.records.is_empty() {
                drained.dropped = record.id.wrapping_sub(self.cursor);
            }
            if drained.records.push(*record).is_err() {
                break;
            }
        }

        let end = recorder.cursor();
        if drained.records.is_empty() {
            drained.dropped = end.wrapping_sub(self.cursor);
        } else if let Some(last) = drained.records.last() {
            // Records past the copy capacity count as dropped.
            drained.dropped += end.wrapping_sub(last.id.wrapping_add(1));
        }
        self.cursor = end;
        drained
    }
}

/// Logs a drained batch.
pub fn log_drained(drained: &Drained) {
    if drained.dropped > 0 {
        emit_dropped(drained.dropped);
    }
    for record in &drained.records {
        emit_record(record.id, &render(record));
    }
}

/// Renders a record for the log, truncated to [`LOG_LINE_CAPACITY`].
pub fn render(record: &TelemetryRecord) -> String<LOG_LINE_CAPACITY> {
    let mut line = String::new();
    if write!(line, "{record}").is_err() {
        // Keep what fit and mark the cut.
        while line.len() > LOG_LINE_CAPACITY - 1 {
            line.pop();
        }
        let _ = line.push('~');
    }
    line
}

#[cfg(target_os = "none")]
fn emit_record(id: EventId, line: &str) {
    defmt::info!("telemetry #{=u32} {=str}", id, line);
}

#[cfg(not(target_os = "none"))]
fn emit_record(id: EventId, line: &str) {
    println!("telemetry #{id} {line}");
}

#[cfg(target_os = "none")]
fn emit_dropped(count: u32) {
    defmt::warn!("telemetry: {=u32} records overwritten before drain", count);
}

#[cfg(not(target_os = "none"))]
fn emit_dropped(count: u32) {
    println!("telemetry: {count} records overwritten before drain");
}
