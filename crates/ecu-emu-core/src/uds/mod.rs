//! ISO 14229 (UDS) services
//!
//! Constants and response builders live here; [`handler`] runs the per-ECU
//! session/security state machine and [`did`] holds the identifier table.

pub mod did;
pub mod handler;
pub mod nrc;

pub use did::DataIdentifier;
pub use handler::UdsHandler;
pub use nrc::NegativeResponseCode;

/// UDS Service IDs
pub mod service_id {
    pub const DIAGNOSTIC_SESSION_CONTROL: u8 = 0x10;
    pub const ECU_RESET: u8 = 0x11;
    pub const CLEAR_DIAGNOSTIC_INFO: u8 = 0x14;
    pub const READ_DTC_INFO: u8 = 0x19;
    pub const READ_DATA_BY_ID: u8 = 0x22;
    pub const SECURITY_ACCESS: u8 = 0x27;
    pub const TESTER_PRESENT: u8 = 0x3E;
    pub const NEGATIVE_RESPONSE: u8 = 0x7F;
}

/// ReadDTCInformation sub-functions
pub mod dtc_sub_function {
    pub const REPORT_NUMBER_OF_DTC_BY_STATUS_MASK: u8 = 0x01;
    pub const REPORT_DTC_BY_STATUS_MASK: u8 = 0x02;
}

/// SecurityAccess: odd sub-functions request a seed, the following even one
/// sends the key for that level. 0x00 is reserved.
pub fn is_request_seed(sub_function: u8) -> bool {
    sub_function % 2 == 1
}

/// Suppress-positive-response bit of a sub-function byte.
pub const SUPPRESS_POSITIVE_RESPONSE: u8 = 0x80;

/// Lowest service id routed to the UDS handler.
pub const FIRST_UDS_SERVICE: u8 = 0x10;

/// Build a positive response: SID + 0x40 followed by `data`.
pub fn positive_response(service_id: u8, data: &[u8]) -> Vec<u8> {
    let mut response = Vec::with_capacity(1 + data.len());
    response.push(service_id.wrapping_add(0x40));
    response.extend_from_slice(data);
    response
}

/// Build a negative response `[0x7F, sid, nrc]`.
pub fn negative_response(service_id: u8, nrc: NegativeResponseCode) -> Vec<u8> {
    vec![service_id::NEGATIVE_RESPONSE, service_id, nrc.into()]
}
