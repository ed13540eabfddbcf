//! The cabinet owns every output and the flush path to hardware.
//!
//! Toys never touch output storage directly. They hold [`OutputHandle`]s and
//! go through [`Cabinet::write`], which clamps the value and combines it with
//! earlier writes of the same tick according to the configured
//! [`CombinePolicy`]. A tick is one event dispatch: it is opened with
//! [`Cabinet::begin_tick`] and closed when the returned guard drops.
//! [`Cabinet::flush`] is the only operation that reaches the [`OutputSink`].

pub mod output;

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

pub use output::{clamp_value, CombinePolicy, Output, OutputHandle, IDLE_VALUE};

use crate::sink::{OutputSink, SinkError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CabinetError {
    #[error("output '{0}' is not registered in the cabinet")]
    OutputNotFound(String),

    #[error("output handle {0:?} is stale or does not belong to this cabinet")]
    StaleHandle(OutputHandle),
}

#[derive(Default)]
struct OutputTable {
    outputs: Vec<Output>,
    by_name: HashMap<String, usize>,
    generation: u32,
}

impl OutputTable {
    fn get_mut(&mut self, handle: OutputHandle) -> Option<&mut Output> {
        if handle.generation != self.generation {
            return None;
        }
        self.outputs.get_mut(handle.index)
    }

    fn get(&self, handle: OutputHandle) -> Option<&Output> {
        if handle.generation != self.generation {
            return None;
        }
        self.outputs.get(handle.index)
    }

    fn handle(&self, index: usize) -> OutputHandle {
        OutputHandle {
            index,
            generation: self.generation,
        }
    }
}

/// A value captured for the sink at the start of a flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub handle: OutputHandle,
    pub channel: String,
    pub value: u8,
}

/// Outcome of one flush cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub written: usize,
    pub failed: usize,
    /// Left dirty because the flush was cut short.
    pub skipped: usize,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

pub struct Cabinet {
    table: Mutex<OutputTable>,
    /// Held for the length of a tick. Flush snapshots wait on it.
    tick_gate: Mutex<()>,
    policy: CombinePolicy,
}

/// An open tick. Dropping it closes the tick.
pub struct TickGuard<'a> {
    cabinet: &'a Cabinet,
    _gate: MutexGuard<'a, ()>,
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.cabinet.end_tick();
    }
}

impl Cabinet {
    pub fn new(policy: CombinePolicy) -> Self {
        Self {
            table: Mutex::new(OutputTable::default()),
            tick_gate: Mutex::new(()),
            policy,
        }
    }

    pub fn policy(&self) -> CombinePolicy {
        self.policy
    }

    /// Register an output, or return the existing handle if the name is known.
    pub fn register(&self, name: &str) -> OutputHandle {
        let mut table = self.table.lock();
        if let Some(&index) = table.by_name.get(name) {
            return table.handle(index);
        }

        let index = table.outputs.len();
        table.outputs.push(Output::new(name));
        table.by_name.insert(name.to_string(), index);
        log::trace!("Registered output '{}' at slot {}", name, index);
        table.handle(index)
    }

    pub fn resolve(&self, name: &str) -> Result<OutputHandle, CabinetError> {
        let table = self.table.lock();
        table
            .by_name
            .get(name)
            .map(|&index| table.handle(index))
            .ok_or_else(|| CabinetError::OutputNotFound(name.to_string()))
    }

    /// Write a value to an output. Out-of-range values are clamped.
    pub fn write(&self, handle: OutputHandle, value: i32) -> Result<(), CabinetError> {
        let mut table = self.table.lock();
        let output = table
            .get_mut(handle)
            .ok_or(CabinetError::StaleHandle(handle))?;
        output.apply(clamp_value(value), self.policy);
        Ok(())
    }

    /// Set an output without combining it with the open tick. Used for idle
    /// writes on reset and teardown, which must always land.
    pub fn force(&self, handle: OutputHandle, value: u8) -> Result<(), CabinetError> {
        let mut table = self.table.lock();
        let output = table
            .get_mut(handle)
            .ok_or(CabinetError::StaleHandle(handle))?;
        output.force(value);
        Ok(())
    }

    /// Open a tick. Writes made while the guard lives are combined with each
    /// other; a flush snapshot never sees part of a tick.
    pub fn begin_tick(&self) -> TickGuard<'_> {
        TickGuard {
            cabinet: self,
            _gate: self.tick_gate.lock(),
        }
    }

    /// Close the open tick: the next write to any output starts fresh.
    pub fn end_tick(&self) {
        for output in self.table.lock().outputs.iter_mut() {
            output.touched = false;
        }
    }

    pub fn value(&self, handle: OutputHandle) -> Option<u8> {
        self.table.lock().get(handle).map(|o| o.value)
    }

    pub fn value_by_name(&self, name: &str) -> Option<u8> {
        let table = self.table.lock();
        table.by_name.get(name).map(|&index| table.outputs[index].value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.lock().by_name.contains_key(name)
    }

    pub fn output_names(&self) -> Vec<String> {
        self.table
            .lock()
            .outputs
            .iter()
            .map(|o| o.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table.lock().outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dirty_count(&self) -> usize {
        self.table.lock().outputs.iter().filter(|o| o.dirty).count()
    }

    /// Drop every output. Handles issued before the call become stale.
    pub fn clear(&self) {
        let mut table = self.table.lock();
        table.outputs.clear();
        table.by_name.clear();
        table.generation = table.generation.wrapping_add(1);
    }

    /// Capture every output the sink has not accepted yet. Waits for an open
    /// tick to close, so a tick is never split.
    pub fn take_pending(&self) -> Vec<PendingWrite> {
        let _gate = self.tick_gate.lock();
        let table = self.table.lock();
        let generation = table.generation;
        table
            .outputs
            .iter()
            .enumerate()
            .filter_map(|(index, output)| {
                output.dirty.then(|| PendingWrite {
                    handle: OutputHandle { index, generation },
                    channel: output.name.clone(),
                    value: output.value,
                })
            })
            .collect()
    }

    /// Mark a pending write as delivered. Ignored when the output changed
    /// after the snapshot, so the newer value is sent on the next flush.
    pub fn acknowledge(&self, write: &PendingWrite) {
        let mut table = self.table.lock();
        if let Some(output) = table.get_mut(write.handle) {
            if output.value == write.value {
                output.dirty = false;
            }
        }
    }

    /// Push every dirty output to the sink. Each write is bounded by
    /// `timeout`; failed writes stay dirty and are retried on the next flush.
    pub async fn flush(&self, sink: &dyn OutputSink, timeout: Duration) -> FlushReport {
        self.flush_while(sink, timeout, || true).await
    }

    /// Flush that asks `keep_going` before every write. Once it answers
    /// false the write in progress completes and the rest stay dirty.
    pub async fn flush_while<F>(
        &self,
        sink: &dyn OutputSink,
        timeout: Duration,
        keep_going: F,
    ) -> FlushReport
    where
        F: Fn() -> bool + Send + Sync,
    {
        let pending = self.take_pending();
        let mut report = FlushReport::default();

        for (sent, write) in pending.iter().enumerate() {
            if !keep_going() {
                report.skipped = pending.len() - sent;
                log::debug!("Flush interrupted, {} writes left pending", report.skipped);
                break;
            }

            let result = match tokio::time::timeout(timeout, sink.write(&write.channel, write.value))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(SinkError::Timeout {
                    channel: write.channel.clone(),
                    timeout,
                }),
            };

            match result {
                Ok(()) => {
                    self.acknowledge(write);
                    report.written += 1;
                }
                Err(e) => {
                    log::warn!("Sink write failed, retrying next cycle: {}", e);
                    report.failed += 1;
                }
            }
        }

        report
    }
}

impl Default for Cabinet {
    fn default() -> Self {
        Self::new(CombinePolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    const TIMEOUT: Duration = Duration::from_millis(50);

    #[test]
    fn test_register_is_idempotent() {
        let cabinet = Cabinet::default();
        let first = cabinet.register("GI\\Playfield");
        let second = cabinet.register("GI\\Playfield");
        assert_eq!(first, second);
        assert_eq!(cabinet.len(), 1);
    }

    #[test]
    fn test_resolve_unknown_output() {
        let cabinet = Cabinet::default();
        cabinet.register("Knocker");
        assert!(cabinet.resolve("Knocker").is_ok());
        assert_eq!(
            cabinet.resolve("Shaker"),
            Err(CabinetError::OutputNotFound("Shaker".to_string()))
        );
    }

    #[test]
    fn test_write_clamps() {
        let cabinet = Cabinet::default();
        let handle = cabinet.register("Flipper Left");
        cabinet.write(handle, 400).unwrap();
        assert_eq!(cabinet.value(handle), Some(255));
        cabinet.write(handle, -3).unwrap();
        assert_eq!(cabinet.value(handle), Some(0));
    }

    #[test]
    fn test_stale_handle_after_clear() {
        let cabinet = Cabinet::default();
        let handle = cabinet.register("Strobe");
        cabinet.clear();
        assert!(cabinet.is_empty());

        cabinet.register("Beacon");
        assert_eq!(cabinet.write(handle, 10), Err(CabinetError::StaleHandle(handle)));
        assert_eq!(cabinet.value_by_name("Beacon"), Some(0));
    }

    #[tokio::test]
    async fn test_flush_pushes_dirty_outputs_once() {
        let cabinet = Cabinet::default();
        let sink = MemorySink::new();
        let handle = cabinet.register("GI\\Playfield");

        cabinet.write(handle, 200).unwrap();
        let report = cabinet.flush(&sink, TIMEOUT).await;
        assert_eq!(
            report,
            FlushReport {
                written: 1,
                failed: 0,
                skipped: 0
            }
        );
        assert_eq!(sink.value("GI\\Playfield"), Some(200));

        // Nothing changed, nothing to send
        let report = cabinet.flush(&sink, TIMEOUT).await;
        assert_eq!(report.written, 0);
        assert_eq!(sink.write_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_is_retried() {
        let cabinet = Cabinet::default();
        let sink = MemorySink::new();
        let handle = cabinet.register("Shaker");
        cabinet.write(handle, 90).unwrap();

        sink.set_failing(true);
        let report = cabinet.flush(&sink, TIMEOUT).await;
        assert_eq!(report.failed, 1);
        assert_eq!(cabinet.dirty_count(), 1);
        assert_eq!(cabinet.value(handle), Some(90));

        sink.set_failing(false);
        let report = cabinet.flush(&sink, TIMEOUT).await;
        assert!(report.is_clean());
        assert_eq!(sink.value("Shaker"), Some(90));
        assert_eq!(cabinet.dirty_count(), 0);
    }

    #[tokio::test]
    async fn test_stalled_sink_times_out() {
        let cabinet = Cabinet::default();
        let sink = MemorySink::new();
        let handle = cabinet.register("Beacon");
        cabinet.write(handle, 255).unwrap();

        sink.set_stall(Some(Duration::from_millis(500)));
        let report = cabinet.flush(&sink, Duration::from_millis(10)).await;
        assert_eq!(report.failed, 1);
        assert_eq!(sink.value("Beacon"), None);

        sink.set_stall(None);
        cabinet.flush(&sink, TIMEOUT).await;
        assert_eq!(sink.value("Beacon"), Some(255));
    }

    #[tokio::test]
    async fn test_change_after_snapshot_stays_dirty() {
        let cabinet = Cabinet::default();
        let sink = MemorySink::new();
        let handle = cabinet.register("Flasher");
        cabinet.write(handle, 100).unwrap();

        let pending = cabinet.take_pending();
        cabinet.write(handle, 150).unwrap();
        for write in &pending {
            sink.write(&write.channel, write.value).await.unwrap();
            cabinet.acknowledge(write);
        }

        assert_eq!(cabinet.dirty_count(), 1);
        cabinet.flush(&sink, TIMEOUT).await;
        assert_eq!(sink.value("Flasher"), Some(150));
    }

    #[tokio::test]
    async fn test_max_policy_resets_each_tick() {
        let cabinet = Cabinet::new(CombinePolicy::Max);
        let sink = MemorySink::new();
        let handle = cabinet.register("Flasher");

        cabinet.write(handle, 80).unwrap();
        cabinet.write(handle, 200).unwrap();
        cabinet.write(handle, 120).unwrap();
        cabinet.end_tick();
        cabinet.flush(&sink, TIMEOUT).await;
        assert_eq!(sink.value("Flasher"), Some(200));

        cabinet.write(handle, 40).unwrap();
        cabinet.flush(&sink, TIMEOUT).await;
        assert_eq!(sink.value("Flasher"), Some(40));
    }

    #[tokio::test]
    async fn test_max_policy_off_after_on_before_flush() {
        let cabinet = Cabinet::new(CombinePolicy::Max);
        let sink = MemorySink::new();
        let handle = cabinet.register("Flasher");

        {
            let _tick = cabinet.begin_tick();
            cabinet.write(handle, 255).unwrap();
        }
        {
            let _tick = cabinet.begin_tick();
            cabinet.write(handle, 0).unwrap();
        }
        cabinet.flush(&sink, TIMEOUT).await;
        assert_eq!(sink.value("Flasher"), Some(0));
    }

    #[tokio::test]
    async fn test_force_wins_inside_max_tick() {
        let cabinet = Cabinet::new(CombinePolicy::Max);
        let sink = MemorySink::new();
        let handle = cabinet.register("Beacon");

        let tick = cabinet.begin_tick();
        cabinet.write(handle, 180).unwrap();
        cabinet.force(handle, IDLE_VALUE).unwrap();
        drop(tick);

        cabinet.flush(&sink, TIMEOUT).await;
        assert_eq!(sink.value("Beacon"), Some(0));
    }

    #[tokio::test]
    async fn test_interrupted_flush_leaves_rest_dirty() {
        let cabinet = Cabinet::default();
        let sink = MemorySink::new();
        for name in ["A", "B", "C"] {
            let handle = cabinet.register(name);
            cabinet.write(handle, 10).unwrap();
        }

        let sent = std::sync::atomic::AtomicUsize::new(0);
        let report = cabinet
            .flush_while(&sink, TIMEOUT, || {
                sent.fetch_add(1, std::sync::atomic::Ordering::SeqCst) < 1
            })
            .await;
        assert_eq!(report.written, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(cabinet.dirty_count(), 2);

        cabinet.flush(&sink, TIMEOUT).await;
        assert_eq!(cabinet.dirty_count(), 0);
    }
}
