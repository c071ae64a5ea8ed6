//! Raw CAN frames and the frame I/O collaborator interface

use std::fmt;
use std::time::Duration;

use tracing::info;

use crate::error::PortError;

/// Classic CAN payload size.
pub const CAN_MAX_DLEN: usize = 8;

/// Highest valid 11-bit identifier.
pub const STANDARD_ID_MAX: u32 = 0x7FF;

/// Highest valid 29-bit identifier.
pub const EXTENDED_ID_MAX: u32 = 0x1FFF_FFFF;

/// A classic CAN frame: identifier, format flag and up to 8 data bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: u32,
    extended: bool,
    len: u8,
    data: [u8; CAN_MAX_DLEN],
}

impl CanFrame {
    /// Build a frame. Returns `None` if the payload exceeds 8 bytes or the id
    /// does not fit the selected format.
    pub fn new(id: u32, extended: bool, payload: &[u8]) -> Option<Self> {
        if payload.len() > CAN_MAX_DLEN {
            return None;
        }
        let max_id = if extended {
            EXTENDED_ID_MAX
        } else {
            STANDARD_ID_MAX
        };
        if id > max_id {
            return None;
        }

        let mut data = [0u8; CAN_MAX_DLEN];
        data[..payload.len()].copy_from_slice(payload);
        Some(Self {
            id,
            extended,
            len: payload.len() as u8,
            data,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn dlc(&self) -> usize {
        self.len as usize
    }
}

impl fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CanFrame({self})")
    }
}

impl fmt::Display for CanFrame {
    /// `ID: 7E8 DLC: 8 Data: 10 13 49 02 ...`, extended ids tagged `(EXT)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extended {
            write!(f, "ID: {:08X} (EXT)", self.id)?;
        } else {
            write!(f, "ID: {:03X}", self.id)?;
        }
        write!(f, " DLC: {} Data:", self.len)?;
        for byte in self.data() {
            write!(f, " {byte:02X}")?;
        }
        Ok(())
    }
}

/// Send/receive capability over the physical bus.
///
/// The core never initialises the bus or chooses its bitrate; it is handed an
/// already open port.
pub trait FramePort {
    /// Transmit one frame.
    fn send(&mut self, frame: &CanFrame) -> Result<(), PortError>;

    /// Return the next inbound frame, waiting at most `timeout`.
    fn try_receive(&mut self, timeout: Duration) -> Result<Option<CanFrame>, PortError>;
}

/// Destination for frames produced by the transport.
pub trait FrameSink {
    fn emit(&mut self, frame: CanFrame);
}

impl FrameSink for Vec<CanFrame> {
    fn emit(&mut self, frame: CanFrame) {
        self.push(frame);
    }
}

/// Direction of a logged frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    Rx,
    Tx,
}

impl fmt::Display for FrameDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rx => write!(f, "RX"),
            Self::Tx => write!(f, "TX"),
        }
    }
}

/// Raw frame logging hook, invoked for every exchanged frame while frame
/// logging is enabled.
pub trait FrameLogger: Send {
    fn on_frame(&self, direction: FrameDirection, frame: &CanFrame);
}

/// Logs frames through `tracing` as `[RX] ID: 7E0 DLC: 8 Data: ...`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFrameLogger;

impl FrameLogger for TracingFrameLogger {
    fn on_frame(&self, direction: FrameDirection, frame: &CanFrame) {
        info!(target: "ecu_emu_core::can", "[{}] {}", direction, frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_oversized_payload() {
        assert!(CanFrame::new(0x7E8, false, &[0u8; 9]).is_none());
    }

    #[test]
    fn rejects_id_out_of_range() {
        assert!(CanFrame::new(0x800, false, &[0x01]).is_none());
        assert!(CanFrame::new(0x18DA_F110, true, &[0x01]).is_some());
        assert!(CanFrame::new(0x2000_0000, true, &[0x01]).is_none());
    }

    #[test]
    fn display_matches_log_format() {
        let frame = CanFrame::new(0x7E8, false, &[0x04, 0x41, 0x0C, 0x17, 0x70]).unwrap();
        assert_eq!(frame.to_string(), "ID: 7E8 DLC: 5 Data: 04 41 0C 17 70");

        let frame = CanFrame::new(0x18DA_F110, true, &[0x02, 0x7E, 0x00]).unwrap();
        assert_eq!(frame.to_string(), "ID: 18DAF110 (EXT) DLC: 3 Data: 02 7E 00");
    }

    #[test]
    fn vec_sink_collects_frames() {
        let mut sink: Vec<CanFrame> = Vec::new();
        sink.emit(CanFrame::new(0x7DF, false, &[0x02, 0x01, 0x00]).unwrap());
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].data(), &[0x02, 0x01, 0x00]);
    }
}
