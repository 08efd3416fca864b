// Core audio sync type definitions and shared structures
//
// This module provides the channel identities, the typed control values
// delivered by the simulator, the state-change event shape, and the error
// type shared across the synchronization engine and its backends.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical cockpit audio channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelId {
    Intercom,
    Radio1,
    Radio2,
    Radio3,
    Cabin,
    PublicAddress,
}

impl ChannelId {
    pub const ALL: [ChannelId; 6] = [
        ChannelId::Intercom,
        ChannelId::Radio1,
        ChannelId::Radio2,
        ChannelId::Radio3,
        ChannelId::Cabin,
        ChannelId::PublicAddress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelId::Intercom => "INT",
            ChannelId::Radio1 => "VHF1",
            ChannelId::Radio2 => "VHF2",
            ChannelId::Radio3 => "VHF3",
            ChannelId::Cabin => "CAB",
            ChannelId::PublicAddress => "PA",
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control variable payload, decoded once at the notification boundary
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ControlValue {
    Bool(bool),
    Float(f32),
    Int(i32),
}

impl ControlValue {
    /// Numeric view of the value. Booleans map to 0.0 / 1.0.
    pub fn as_f32(&self) -> f32 {
        match *self {
            ControlValue::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
            ControlValue::Float(f) => f,
            ControlValue::Int(i) => i as f32,
        }
    }

    /// Truth view of the value. Any non-zero number is true.
    pub fn as_bool(&self) -> bool {
        match *self {
            ControlValue::Bool(b) => b,
            ControlValue::Float(f) => f != 0.0,
            ControlValue::Int(i) => i != 0,
        }
    }
}

impl From<bool> for ControlValue {
    fn from(value: bool) -> Self {
        ControlValue::Bool(value)
    }
}

impl From<f32> for ControlValue {
    fn from(value: f32) -> Self {
        ControlValue::Float(value)
    }
}

impl From<i32> for ControlValue {
    fn from(value: i32) -> Self {
        ControlValue::Int(value)
    }
}

/// Emitted on every accepted write-through to a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelStateEvent {
    pub channel: ChannelId,
    pub is_muted: bool,
    pub volume: f32,
    /// Timestamp in microseconds since Unix epoch
    pub timestamp: u64,
}

impl ChannelStateEvent {
    pub fn new(channel: ChannelId, is_muted: bool, volume: f32) -> Self {
        Self {
            channel,
            is_muted,
            volume,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_micros() as u64,
        }
    }
}

/// Errors that can occur while talking to mixer sessions and backends
#[derive(Debug, thiserror::Error)]
pub enum AudioSyncError {
    #[error("Session for process '{process}' is no longer available")]
    SessionLost { process: String },

    #[error("Mixer backend error: {0}")]
    Backend(String),

    #[error("Remote mixer error: {0}")]
    RemoteMixer(#[from] super::remote::RemoteMixerError),

    #[error("Selected mixer backend is not supported on this platform")]
    UnsupportedPlatform,

    #[error("System error: {0}")]
    SystemError(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AudioSyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_value_decoding() {
        assert_eq!(ControlValue::Bool(true).as_f32(), 1.0);
        assert_eq!(ControlValue::Int(3).as_f32(), 3.0);
        assert!(ControlValue::Float(0.2).as_bool());
        assert!(!ControlValue::Float(0.0).as_bool());
        assert!(!ControlValue::Int(0).as_bool());
        assert!(ControlValue::Int(-1).as_bool());
    }

    #[test]
    fn test_channel_labels_are_unique() {
        let labels: std::collections::HashSet<_> =
            ChannelId::ALL.iter().map(|c| c.as_str()).collect();
        assert_eq!(labels.len(), ChannelId::ALL.len());
    }
}
