//! Radio Interface Layer Simulation Library
//!
//! This crate provides a simulated modem peer for exercising the multiplexer
//! without hardware or a vendor library:
//!
//! - **VirtualModem**: decodes commands, answers them from per-request rules
//!   and queues response and indication frames
//! - **run_virtual_modem**: drives a `VirtualModem` over any async stream,
//!   typically one end of `tokio::io::duplex()`
//!
//! # Example
//!
//! ```rust
//! use ril_protocol::{Command, RequestId, Token};
//! use ril_sim::{ModemRule, VirtualModem};
//!
//! let mut modem = VirtualModem::new("sim0")
//!     .with_rule(RequestId(4), ModemRule::ok(vec![]).ack_expected());
//!
//! modem.process_bytes(&Command::new(RequestId(4), Token(1), vec![]).encode()).unwrap();
//!
//! while let Some(bytes) = modem.take_output() {
//!     println!("Modem output: {:02X?}", bytes);
//! }
//! ```

pub mod error;
pub mod modem;
pub mod modem_task;

pub use error::SimError;
pub use modem::{Handled, ModemRule, ReplyStyle, VirtualModem};
pub use modem_task::{run_virtual_modem, ModemActivity, ModemControl};
