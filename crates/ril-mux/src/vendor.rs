//! Vendor-side radio functions
//!
//! A vendor library registers a set of functions alongside its dispatch
//! table. The multiplexer consults them for capability checks, for
//! cancellation notices and for requests that are served in-process instead
//! of being written to the transport.

use ril_protocol::{RadioState, RequestId, Status, Token};

/// Functions a vendor library exposes to the multiplexer
pub trait RadioFunctions: Send + Sync {
    /// Current radio state
    fn on_state_request(&self) -> RadioState;

    /// Whether `request` is implemented
    fn supports(&self, request: RequestId) -> bool;

    /// A pending request was cancelled by the caller
    fn on_cancel(&self, token: Token);

    /// Vendor version string
    fn version(&self) -> String;

    /// Begin serving a local request
    ///
    /// The vendor later reports the result through
    /// [`SlotManager::complete_local`](crate::SlotManager::complete_local).
    /// Returning an error refuses the request and nothing is registered.
    fn on_request(&self, request: RequestId, token: Token, data: &[u8]) -> Result<(), Status>;
}

/// Functions used before a vendor registers
///
/// Reports the radio as unavailable, accepts every request for forwarding and
/// refuses to serve anything locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRadioFunctions;

impl RadioFunctions for DefaultRadioFunctions {
    fn on_state_request(&self) -> RadioState {
        RadioState::Unavailable
    }

    fn supports(&self, _request: RequestId) -> bool {
        true
    }

    fn on_cancel(&self, _token: Token) {}

    fn version(&self) -> String {
        "unavailable".to_string()
    }

    fn on_request(&self, _request: RequestId, _token: Token, _data: &[u8]) -> Result<(), Status> {
        Err(Status::REQUEST_NOT_SUPPORTED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_functions() {
        let vendor = DefaultRadioFunctions;
        assert_eq!(vendor.on_state_request(), RadioState::Unavailable);
        assert!(vendor.supports(RequestId(4)));
        assert_eq!(
            vendor.on_request(RequestId(4), Token(1), &[]),
            Err(Status::REQUEST_NOT_SUPPORTED)
        );
    }
}
