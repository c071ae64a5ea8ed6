//! SocketCAN frame port

use std::io;
use std::time::Duration;

use ecu_emu_core::{CanFrame, FramePort, PortError};
use socketcan::{
    CanFrame as SocketCanFrame, CanSocket, EmbeddedFrame, ExtendedId, Id, Socket, StandardId,
};
use tracing::info;

/// Raw CAN socket carrying both 11-bit and 29-bit frames.
pub struct SocketCanPort {
    socket: CanSocket,
}

impl SocketCanPort {
    pub fn open(interface: &str) -> Result<Self, PortError> {
        let socket = CanSocket::open(interface)?;
        socket.set_nonblocking(true)?;
        info!(interface = %interface, "Raw CAN socket opened");
        Ok(Self { socket })
    }
}

impl FramePort for SocketCanPort {
    fn send(&mut self, frame: &CanFrame) -> Result<(), PortError> {
        let id = if frame.is_extended() {
            ExtendedId::new(frame.id()).map(Id::Extended)
        } else {
            u16::try_from(frame.id())
                .ok()
                .and_then(StandardId::new)
                .map(Id::Standard)
        }
        .ok_or_else(|| PortError::InvalidFrame(format!("CAN id 0x{:X}", frame.id())))?;

        let raw = <SocketCanFrame as EmbeddedFrame>::new(id, frame.data())
            .ok_or_else(|| PortError::InvalidFrame(frame.to_string()))?;
        self.socket.write_frame(&raw)?;
        Ok(())
    }

    fn try_receive(&mut self, timeout: Duration) -> Result<Option<CanFrame>, PortError> {
        match self.socket.read_frame() {
            Ok(SocketCanFrame::Data(frame)) => {
                let (id, extended) = match EmbeddedFrame::id(&frame) {
                    Id::Standard(id) => (u32::from(id.as_raw()), false),
                    Id::Extended(id) => (id.as_raw(), true),
                };
                Ok(CanFrame::new(id, extended, EmbeddedFrame::data(&frame)))
            }
            // Remote and error frames carry no diagnostic payload.
            Ok(_) => Ok(None),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                if !timeout.is_zero() {
                    std::thread::sleep(timeout);
                }
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
