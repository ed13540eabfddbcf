//! Hardware boundary. A sink receives resolved output values during a flush
//! and hands them to whatever bus driver sits behind it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink rejected write to {channel}: {reason}")]
    Rejected { channel: String, reason: String },

    #[error("sink write to {channel} timed out after {timeout:?}")]
    Timeout { channel: String, timeout: Duration },
}

/// Receives one resolved value per physical channel. The channel id is the
/// output's registry name.
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn write(&self, channel: &str, value: u8) -> Result<(), SinkError>;
}

/// Sink that only logs. Used when no bus driver is attached.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl OutputSink for LogSink {
    async fn write(&self, channel: &str, value: u8) -> Result<(), SinkError> {
        log::debug!("{} = {}", channel, value);
        Ok(())
    }
}

/// In-memory sink recording the last value per channel.
#[derive(Debug, Default)]
pub struct MemorySink {
    values: Mutex<HashMap<String, u8>>,
    writes: Mutex<Vec<(String, u8)>>,
    failing: AtomicBool,
    stall: Mutex<Option<Duration>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value accepted for a channel.
    pub fn value(&self, channel: &str) -> Option<u8> {
        self.values.lock().get(channel).copied()
    }

    /// Every accepted write, in order.
    pub fn writes(&self) -> Vec<(String, u8)> {
        self.writes.lock().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().len()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().clear();
    }

    /// Reject every write while set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every write by `stall` before accepting it.
    pub fn set_stall(&self, stall: Option<Duration>) {
        *self.stall.lock() = stall;
    }
}

#[async_trait]
impl OutputSink for MemorySink {
    async fn write(&self, channel: &str, value: u8) -> Result<(), SinkError> {
        let stall = *self.stall.lock();
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected {
                channel: channel.to_string(),
                reason: "device offline".to_string(),
            });
        }

        self.values.lock().insert(channel.to_string(), value);
        self.writes.lock().push((channel.to_string(), value));
        Ok(())
    }
}
