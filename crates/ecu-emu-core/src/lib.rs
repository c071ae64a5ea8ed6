//! ECU emulator core
//!
//! Diagnostic protocol engine for emulated vehicle ECUs on a CAN bus:
//!
//! - [`isotp`]: ISO 15765-2 segmentation and reassembly over 8-byte frames
//! - [`dispatcher`]: addressing resolution and OBD-II / UDS service dispatch
//! - [`dtc`]: DTC lifecycle (active, permanent, freeze frame, healing)
//! - [`faults`]: fault injection toggles consulted by transport and dispatcher
//! - [`emulator`]: the cooperative poll loop tying everything to a [`frame::FramePort`]
//!
//! The bus driver, UI and persistence are collaborators behind the traits in
//! [`frame`] and [`snapshot`].

pub mod addressing;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod dtc;
pub mod ecu;
pub mod emulator;
pub mod error;
pub mod faults;
pub mod frame;
pub mod isotp;
pub mod obd;
pub mod simulation;
pub mod snapshot;
pub mod uds;

pub use addressing::AddressingMode;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::ConfigRecord;
pub use dtc::DtcCode;
pub use ecu::{EcuRegistry, EcuState};
pub use emulator::Emulator;
pub use error::{ConfigError, DtcError, PortError, TransportError};
pub use faults::{FaultInjector, FaultSettings};
pub use frame::{CanFrame, FrameDirection, FrameLogger, FramePort, FrameSink};
pub use isotp::IsoTpLink;
pub use snapshot::{EmulatorSnapshot, Observer};
