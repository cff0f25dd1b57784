//! Dispatch tables and the per-slot callback cell
//!
//! A [`DispatchTable`] maps request numbers to an encoder/decoder pair and
//! indication numbers to a decoder. The table and the vendor functions are
//! installed together as a [`CallbackSet`] and swapped atomically: readers
//! take an `Arc` snapshot, so an in-flight lookup keeps using the set it
//! started with while a replacement is being installed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use ril_protocol::{
    IndicationId, RequestEncoder, RequestId, ResponseDecoder, Shape, ShapeCodec,
};

use crate::vendor::{DefaultRadioFunctions, RadioFunctions};

/// Codec pair registered for one request number
#[derive(Clone)]
pub struct DispatchEntry {
    /// Encoder for the outbound payload
    pub encoder: Arc<dyn RequestEncoder>,
    /// Decoder for the response payload
    pub decoder: Arc<dyn ResponseDecoder>,
}

impl fmt::Debug for DispatchEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchEntry").finish_non_exhaustive()
    }
}

/// Request and indication codec lookup
#[derive(Clone, Default)]
pub struct DispatchTable {
    requests: HashMap<RequestId, DispatchEntry>,
    indications: HashMap<IndicationId, Arc<dyn ResponseDecoder>>,
}

impl DispatchTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a codec pair for `request`
    pub fn with_request(
        mut self,
        request: RequestId,
        encoder: Arc<dyn RequestEncoder>,
        decoder: Arc<dyn ResponseDecoder>,
    ) -> Self {
        self.requests
            .insert(request, DispatchEntry { encoder, decoder });
        self
    }

    /// Register stock shapes for `request`
    pub fn with_shapes(self, request: RequestId, request_shape: Shape, response_shape: Shape) -> Self {
        let codec = Arc::new(ShapeCodec::new(request_shape, response_shape));
        self.with_request(request, codec.clone(), codec)
    }

    /// Register a decoder for `indication`
    pub fn with_indication(
        mut self,
        indication: IndicationId,
        decoder: Arc<dyn ResponseDecoder>,
    ) -> Self {
        self.indications.insert(indication, decoder);
        self
    }

    /// Register a stock shape for `indication`
    pub fn with_indication_shape(self, indication: IndicationId, shape: Shape) -> Self {
        self.with_indication(indication, Arc::new(ShapeCodec::new(Shape::Void, shape)))
    }

    /// Encoder for `request`, if registered
    pub fn request_encoder(&self, request: RequestId) -> Option<Arc<dyn RequestEncoder>> {
        self.requests.get(&request).map(|e| e.encoder.clone())
    }

    /// Decoder for responses to `request`, if registered
    pub fn response_decoder(&self, request: RequestId) -> Option<Arc<dyn ResponseDecoder>> {
        self.requests.get(&request).map(|e| e.decoder.clone())
    }

    /// Decoder for `indication`, if registered
    pub fn indication_decoder(&self, indication: IndicationId) -> Option<Arc<dyn ResponseDecoder>> {
        self.indications.get(&indication).cloned()
    }

    /// Number of registered request types
    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    /// Number of registered indication types
    pub fn indication_count(&self) -> usize {
        self.indications.len()
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut requests: Vec<_> = self.requests.keys().map(|r| r.0).collect();
        requests.sort_unstable();
        let mut indications: Vec<_> = self.indications.keys().map(|i| i.0).collect();
        indications.sort_unstable();
        f.debug_struct("DispatchTable")
            .field("requests", &requests)
            .field("indications", &indications)
            .finish()
    }
}

/// A dispatch table together with the vendor functions that own it
#[derive(Clone)]
pub struct CallbackSet {
    /// Codec lookup
    pub table: DispatchTable,
    /// Vendor functions
    pub vendor: Arc<dyn RadioFunctions>,
}

impl CallbackSet {
    /// Create a callback set
    pub fn new(table: DispatchTable, vendor: Arc<dyn RadioFunctions>) -> Self {
        Self { table, vendor }
    }
}

impl Default for CallbackSet {
    fn default() -> Self {
        Self::new(DispatchTable::new(), Arc::new(DefaultRadioFunctions))
    }
}

impl fmt::Debug for CallbackSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSet")
            .field("table", &self.table)
            .field("vendor", &self.vendor.version())
            .finish()
    }
}

/// Per-slot holder of the active callback set
#[derive(Debug, Default)]
pub struct CallbackCell {
    current: RwLock<Arc<CallbackSet>>,
}

impl CallbackCell {
    /// Create a cell holding `set`
    pub fn new(set: CallbackSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(set)),
        }
    }

    /// Snapshot of the active set
    pub fn load(&self) -> Arc<CallbackSet> {
        self.current.read().clone()
    }

    /// Install `set`, returning the one it replaces
    pub fn replace(&self, set: CallbackSet) -> Arc<CallbackSet> {
        std::mem::replace(&mut *self.current.write(), Arc::new(set))
    }
}
