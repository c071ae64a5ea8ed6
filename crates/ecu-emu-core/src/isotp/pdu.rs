//! Encode and decode ISO-TP protocol control information.

use thiserror::Error;

use crate::frame::CAN_MAX_DLEN;

/// Largest payload a 12-bit first-frame length can announce.
pub const MAX_PAYLOAD_LEN: usize = 4095;

/// Filler for unused frame bytes.
pub const PADDING_BYTE: u8 = 0xAA;

/// Payload bytes carried by a single frame.
pub const SINGLE_FRAME_MAX: usize = 7;

/// Payload bytes carried by a first frame.
pub const FIRST_FRAME_DATA: usize = 6;

/// Payload bytes carried by a consecutive frame.
pub const CONSECUTIVE_FRAME_DATA: usize = 7;

/// Flow control status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    /// Clear to send the next block.
    ContinueToSend,
    /// Receiver not ready; restart the wait timer.
    Wait,
    /// Receiver cannot take the message; abort.
    Overflow,
}

impl FlowStatus {
    fn nibble(self) -> u8 {
        match self {
            Self::ContinueToSend => 0x0,
            Self::Wait => 0x1,
            Self::Overflow => 0x2,
        }
    }
}

/// Parsed ISO-TP protocol data unit, borrowing from the frame data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu<'a> {
    SingleFrame {
        data: &'a [u8],
    },
    FirstFrame {
        len: u16,
        data: &'a [u8],
    },
    ConsecutiveFrame {
        sn: u8,
        data: &'a [u8],
    },
    FlowControl {
        status: FlowStatus,
        /// 0 means no further flow control until the transfer ends.
        block_size: u8,
        /// Raw STmin byte, see [`st_min_to_ms`].
        st_min: u8,
    },
}

/// Malformed frame. The link discards the affected transfer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("Empty frame")]
    Empty,

    #[error("Invalid single frame length {0}")]
    InvalidSingleFrameLength(u8),

    #[error("Invalid first frame length {0}")]
    InvalidFirstFrameLength(u16),

    #[error("Frame too short for PCI type 0x{0:X}")]
    Truncated(u8),

    #[error("Invalid flow status 0x{0:X}")]
    InvalidFlowStatus(u8),

    #[error("Unknown PCI type 0x{0:X}")]
    UnknownPci(u8),

    #[error("Payload of {0} bytes does not fit the frame")]
    Oversized(usize),
}

/// Decode raw frame data into a PDU view.
pub fn decode(data: &[u8]) -> Result<Pdu<'_>, FramingError> {
    let first = *data.first().ok_or(FramingError::Empty)?;
    let pci = first >> 4;

    match pci {
        0x0 => {
            let len = first & 0x0F;
            if len == 0 || len as usize > SINGLE_FRAME_MAX || data.len() < 1 + len as usize {
                return Err(FramingError::InvalidSingleFrameLength(len));
            }
            Ok(Pdu::SingleFrame {
                data: &data[1..1 + len as usize],
            })
        }
        0x1 => {
            if data.len() < 2 {
                return Err(FramingError::Truncated(pci));
            }
            let len = (u16::from(first & 0x0F) << 8) | u16::from(data[1]);
            if (len as usize) <= SINGLE_FRAME_MAX {
                return Err(FramingError::InvalidFirstFrameLength(len));
            }
            Ok(Pdu::FirstFrame {
                len,
                data: &data[2..],
            })
        }
        0x2 => Ok(Pdu::ConsecutiveFrame {
            sn: first & 0x0F,
            data: &data[1..],
        }),
        0x3 => {
            if data.len() < 3 {
                return Err(FramingError::Truncated(pci));
            }
            let status = match first & 0x0F {
                0x0 => FlowStatus::ContinueToSend,
                0x1 => FlowStatus::Wait,
                0x2 => FlowStatus::Overflow,
                other => return Err(FramingError::InvalidFlowStatus(other)),
            };
            Ok(Pdu::FlowControl {
                status,
                block_size: data[1],
                st_min: data[2],
            })
        }
        other => Err(FramingError::UnknownPci(other)),
    }
}

/// Encode a PDU into a full 8-byte frame, padding unused bytes with
/// [`PADDING_BYTE`].
pub fn encode(pdu: &Pdu<'_>) -> Result<[u8; CAN_MAX_DLEN], FramingError> {
    let mut buf = [PADDING_BYTE; CAN_MAX_DLEN];

    match pdu {
        Pdu::SingleFrame { data } => {
            if data.is_empty() || data.len() > SINGLE_FRAME_MAX {
                return Err(FramingError::Oversized(data.len()));
            }
            buf[0] = data.len() as u8;
            buf[1..1 + data.len()].copy_from_slice(data);
        }
        Pdu::FirstFrame { len, data } => {
            if *len as usize > MAX_PAYLOAD_LEN || (*len as usize) <= SINGLE_FRAME_MAX {
                return Err(FramingError::InvalidFirstFrameLength(*len));
            }
            if data.len() > FIRST_FRAME_DATA {
                return Err(FramingError::Oversized(data.len()));
            }
            buf[0] = 0x10 | ((*len >> 8) as u8 & 0x0F);
            buf[1] = (*len & 0xFF) as u8;
            buf[2..2 + data.len()].copy_from_slice(data);
        }
        Pdu::ConsecutiveFrame { sn, data } => {
            if data.len() > CONSECUTIVE_FRAME_DATA {
                return Err(FramingError::Oversized(data.len()));
            }
            buf[0] = 0x20 | (sn & 0x0F);
            buf[1..1 + data.len()].copy_from_slice(data);
        }
        Pdu::FlowControl {
            status,
            block_size,
            st_min,
        } => {
            buf[0] = 0x30 | status.nibble();
            buf[1] = *block_size;
            buf[2] = *st_min;
        }
    }

    Ok(buf)
}

/// Convert an STmin byte to whole milliseconds.
///
/// 0x00-0x7F are milliseconds, 0xF1-0xF9 (100-900 µs) round up to 1 ms and
/// every reserved value is treated as the maximum, 127 ms.
pub fn st_min_to_ms(raw: u8) -> u64 {
    match raw {
        0x00..=0x7F => u64::from(raw),
        0xF1..=0xF9 => 1,
        _ => 0x7F,
    }
}
