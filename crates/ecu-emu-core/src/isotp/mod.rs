//! ISO 15765-2 transport
//!
//! [`pdu`] encodes and decodes the protocol control information of single
//! frames; [`link`] runs the receive and transmit state machines on top.

pub mod link;
pub mod pdu;

pub use link::{reply_id, IsoTpLink, IsoTpMessage, RxState, TxState, TRANSFER_TIMEOUT_MS};
pub use pdu::{FlowStatus, FramingError, Pdu, MAX_PAYLOAD_LEN, PADDING_BYTE};
