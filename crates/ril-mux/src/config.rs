//! Multiplexer configuration
//!
//! Configuration is plain serde data, stored as JSON. Every field except the
//! slot list has a default, so a minimal file only names the endpoints:
//!
//! ```json
//! {
//!   "slots": [
//!     { "slot": 0, "endpoint": { "type": "unix", "path": "/dev/socket/rild" } },
//!     { "slot": 1, "endpoint": { "type": "serial", "path": "/dev/ttyUSB2", "baud_rate": 115200 } }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ril_protocol::DEFAULT_MAX_FRAME_LEN;
use serde::{Deserialize, Serialize};

use crate::error::MuxError;
use crate::slot::SlotId;

/// Hard ceiling on the configurable frame limit (16 MiB)
pub const MAX_FRAME_LEN_CEILING: u32 = 16 * 1024 * 1024;

/// Where a slot's transport channel connects to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Endpoint {
    /// Unix domain stream socket
    Unix {
        /// Socket path
        path: PathBuf,
    },
    /// TCP connection
    Tcp {
        /// Host and port, e.g. `127.0.0.1:3910`
        addr: String,
    },
    /// Serial device
    Serial {
        /// Device path
        path: String,
        /// Baud rate
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Unix { path } => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp { addr } => write!(f, "tcp:{}", addr),
            Endpoint::Serial { path, baud_rate } => write!(f, "serial:{}@{}", path, baud_rate),
        }
    }
}

fn default_baud_rate() -> u32 {
    115200
}

/// Configuration for one radio slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotConfig {
    /// Slot identifier
    pub slot: SlotId,
    /// Transport endpoint
    pub endpoint: Endpoint,
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RilConfig {
    /// Configured slots
    pub slots: Vec<SlotConfig>,
    /// Maximum frame body size in bytes
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: u32,
    /// Timeout for awaited calls; `null` waits forever
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: Option<u64>,
    /// Capacity of each slot's event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Recently acknowledged tokens remembered per slot
    #[serde(default = "default_ack_history")]
    pub ack_history: usize,
}

fn default_max_frame_len() -> u32 {
    DEFAULT_MAX_FRAME_LEN
}

fn default_request_timeout_ms() -> Option<u64> {
    Some(30_000)
}

fn default_event_capacity() -> usize {
    256
}

fn default_ack_history() -> usize {
    64
}

impl Default for RilConfig {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            max_frame_len: default_max_frame_len(),
            request_timeout_ms: default_request_timeout_ms(),
            event_capacity: default_event_capacity(),
            ack_history: default_ack_history(),
        }
    }
}

impl RilConfig {
    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self, MuxError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| MuxError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MuxError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| MuxError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&contents)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String, MuxError> {
        serde_json::to_string_pretty(self).map_err(|e| MuxError::Config(e.to_string()))
    }

    /// Check for duplicate slots and out-of-range limits
    pub fn validate(&self) -> Result<(), MuxError> {
        let mut seen = HashSet::new();
        for slot in &self.slots {
            if !seen.insert(slot.slot) {
                return Err(MuxError::Config(format!("duplicate slot {}", slot.slot)));
            }
        }

        if self.max_frame_len == 0 || self.max_frame_len > MAX_FRAME_LEN_CEILING {
            return Err(MuxError::Config(format!(
                "max_frame_len must be between 1 and {}",
                MAX_FRAME_LEN_CEILING
            )));
        }

        if self.event_capacity == 0 {
            return Err(MuxError::Config("event_capacity must be non-zero".into()));
        }

        Ok(())
    }

    /// Per-slot runtime options derived from this configuration
    pub fn slot_options(&self) -> SlotOptions {
        SlotOptions {
            max_frame_len: self.max_frame_len,
            request_timeout: self.request_timeout_ms.map(Duration::from_millis),
            event_capacity: self.event_capacity,
            ack_history: self.ack_history,
        }
    }
}

/// Runtime options for a single slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotOptions {
    /// Maximum frame body size in bytes
    pub max_frame_len: u32,
    /// Timeout for [`SlotManager::call`](crate::SlotManager::call)
    pub request_timeout: Option<Duration>,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
    /// Recently acknowledged tokens remembered for duplicate suppression
    pub ack_history: usize,
}

impl Default for SlotOptions {
    fn default() -> Self {
        RilConfig::default().slot_options()
    }
}
