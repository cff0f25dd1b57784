//! Dispatch table for the request and indication types the monitor knows

use ril_mux::DispatchTable;
use ril_protocol::{IndicationId, RequestId, Shape};

pub const GET_SIM_STATUS: RequestId = RequestId(1);
pub const GET_CURRENT_CALLS: RequestId = RequestId(9);
pub const SIGNAL_STRENGTH: RequestId = RequestId(19);
pub const VOICE_REGISTRATION_STATE: RequestId = RequestId(20);
pub const OPERATOR: RequestId = RequestId(22);
pub const RADIO_POWER: RequestId = RequestId(23);
pub const BASEBAND_VERSION: RequestId = RequestId(51);

pub const RADIO_STATE_CHANGED: IndicationId = IndicationId(1000);
pub const CALL_STATE_CHANGED: IndicationId = IndicationId(1001);
pub const NITZ_TIME_RECEIVED: IndicationId = IndicationId(1008);
pub const SIGNAL_STRENGTH_IND: IndicationId = IndicationId(1009);

/// Table covering the monitor's stock requests and indications
pub fn table() -> DispatchTable {
    DispatchTable::new()
        .with_shapes(GET_SIM_STATUS, Shape::Void, Shape::Raw)
        .with_shapes(GET_CURRENT_CALLS, Shape::Void, Shape::Raw)
        .with_shapes(SIGNAL_STRENGTH, Shape::Void, Shape::Ints)
        .with_shapes(VOICE_REGISTRATION_STATE, Shape::Void, Shape::Strings)
        .with_shapes(OPERATOR, Shape::Void, Shape::Strings)
        .with_shapes(RADIO_POWER, Shape::Ints, Shape::Void)
        .with_shapes(BASEBAND_VERSION, Shape::Void, Shape::String)
        .with_indication_shape(RADIO_STATE_CHANGED, Shape::Void)
        .with_indication_shape(CALL_STATE_CHANGED, Shape::Void)
        .with_indication_shape(NITZ_TIME_RECEIVED, Shape::String)
        .with_indication_shape(SIGNAL_STRENGTH_IND, Shape::Ints)
}
