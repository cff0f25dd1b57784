//! Radio Interface Layer Multiplexer
//!
//! This crate correlates outbound commands with their eventual responses on
//! one or more radio slots, and drives the acknowledgment handshake peers use
//! for flow control.
//!
//! # Architecture
//!
//! Each slot is an independent triad:
//!
//! - **Transport channel**: a length-prefixed byte stream, split into a reader
//!   owned by the slot's background task and a shared writer
//! - **Pending request registry**: token-keyed entries for every command in
//!   flight
//! - **Callback cell**: the dispatch table of per-request codecs plus the
//!   vendor's radio functions, replaced as a unit
//!
//! A [`SlotManager`] owns the triad. Callers submit commands from any task;
//! the reader task classifies each inbound frame, acknowledges it when the
//! peer asks for that, and completes the matching request through its
//! completion sink. Unsolicited indications go to a slot-scoped listener.
//!
//! All activity is published on a per-slot [`SlotEvent`] broadcast stream.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ril_mux::{CallbackSet, DefaultRadioFunctions, DispatchTable, SlotId, SlotManager, SlotOptions};
//! use ril_protocol::{Payload, RequestId, Shape};
//!
//! # async fn example() -> Result<(), ril_mux::MuxError> {
//! let (io, _peer) = tokio::io::duplex(4096);
//! let slot = SlotManager::spawn(SlotId(0), io, SlotOptions::default());
//!
//! let table = DispatchTable::new().with_shapes(RequestId(4), Shape::Void, Shape::Ints);
//! slot.register_callbacks(CallbackSet::new(table, Arc::new(DefaultRadioFunctions)));
//!
//! let response = slot.call(RequestId(4), &Payload::Void).await?;
//! println!("{}: {:?}", response.status, response.result);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod registry;
pub mod response;
pub mod router;
pub mod slot;
pub mod slots;
pub mod transport;
pub mod vendor;

pub use config::{Endpoint, RilConfig, SlotConfig, SlotOptions};
pub use dispatch::{CallbackCell, CallbackSet, DispatchEntry, DispatchTable};
pub use error::MuxError;
pub use events::SlotEvent;
pub use registry::{
    AckDecision, Completion, DrainReason, Origin, PendingRegistry, PendingRequest,
    LOCAL_TOKEN_SENTINEL,
};
pub use response::{CompletionSink, Indication, Response};
pub use router::{classify, IndicationListener, Route, Router};
pub use slot::{LocalCompleter, SlotId, SlotManager};
pub use slots::SlotSet;
pub use transport::{ChannelIo, TransportReader, TransportWriter};
pub use vendor::{DefaultRadioFunctions, RadioFunctions};
