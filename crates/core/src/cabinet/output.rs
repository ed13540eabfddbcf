use serde::{Deserialize, Serialize};

/// Value every output returns to on reset and teardown.
pub const IDLE_VALUE: u8 = 0;

/// Opaque reference to an output owned by a [`Cabinet`](super::Cabinet).
///
/// Handles carry the registry generation they were issued in, so a handle
/// kept across a topology reload is detected as stale instead of silently
/// addressing whichever output now occupies the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputHandle {
    pub(crate) index: usize,
    pub(crate) generation: u32,
}

/// How writes from several toys to one output within a single tick are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinePolicy {
    /// The write issued last in toy dispatch order wins.
    #[default]
    LastWrite,
    /// The highest value written during the tick wins.
    Max,
}

impl CombinePolicy {
    pub fn combine(self, current: u8, incoming: u8) -> u8 {
        match self {
            CombinePolicy::LastWrite => incoming,
            CombinePolicy::Max => current.max(incoming),
        }
    }
}

/// A named physical or virtual channel.
#[derive(Debug, Clone)]
pub struct Output {
    pub name: String,
    pub value: u8,
    /// Value differs from what the sink last accepted.
    pub dirty: bool,
    /// Written at least once during the open tick.
    pub(crate) touched: bool,
}

impl Output {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: IDLE_VALUE,
            // Unknown hardware state until the first flush goes out.
            dirty: true,
            touched: false,
        }
    }

    pub(crate) fn apply(&mut self, value: u8, policy: CombinePolicy) {
        let resolved = if self.touched {
            policy.combine(self.value, value)
        } else {
            value
        };
        if resolved != self.value {
            self.value = resolved;
            self.dirty = true;
        }
        self.touched = true;
    }

    /// Set the value without combining, e.g. for idle writes on teardown.
    pub(crate) fn force(&mut self, value: u8) {
        if value != self.value {
            self.value = value;
            self.dirty = true;
        }
        self.touched = true;
    }
}

/// Clamp an arbitrary integer into the valid output range.
pub fn clamp_value(value: i32) -> u8 {
    value.clamp(0, u8::MAX as i32) as u8
}
