//! CAN id addressing
//!
//! Maps an inbound request id onto the emulated ECUs, honouring the
//! configured [`AddressingMode`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ecu::EcuRegistry;

/// 11-bit functional (broadcast) request id.
pub const OBD_FUNCTIONAL_ID: u32 = 0x7DF;
/// First 11-bit physical request id; ECU `n` listens on `0x7E0 + n`.
pub const OBD_PHYSICAL_BASE: u32 = 0x7E0;
/// Number of 11-bit physical request ids (0x7E0-0x7E7).
pub const OBD_PHYSICAL_COUNT: u32 = 8;
/// 29-bit functional request id (tester 0xF1 to all).
pub const UDS_FUNCTIONAL_ID: u32 = 0x18DB_33F1;
/// 29-bit physical request id with the target address byte cleared.
pub const UDS_PHYSICAL_BASE: u32 = 0x18DA_00F1;
/// Mask selecting everything but the target address byte.
const UDS_TARGET_MASK: u32 = 0xFFFF_00FF;

/// Which request id families the emulator listens to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressingMode {
    /// 11-bit ids only (OBD-II on CAN).
    Obd11,
    /// 29-bit normal fixed addressing only.
    Uds29,
    /// Both id families.
    #[default]
    Hybrid,
    /// Bitrate detection is left to the bus driver; requests are handled as
    /// in [`AddressingMode::Hybrid`].
    Autodetect,
}

impl AddressingMode {
    pub fn accepts_standard(&self) -> bool {
        !matches!(self, Self::Uds29)
    }

    pub fn accepts_extended(&self) -> bool {
        !matches!(self, Self::Obd11)
    }
}

impl fmt::Display for AddressingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Obd11 => "obd11",
            Self::Uds29 => "uds29",
            Self::Hybrid => "hybrid",
            Self::Autodetect => "autodetect",
        };
        f.write_str(name)
    }
}

impl FromStr for AddressingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "obd11" | "11bit" => Ok(Self::Obd11),
            "uds29" | "29bit" => Ok(Self::Uds29),
            "hybrid" => Ok(Self::Hybrid),
            "autodetect" | "auto" => Ok(Self::Autodetect),
            other => Err(format!("unknown addressing mode '{other}'")),
        }
    }
}

/// Who a request is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Broadcast: every enabled ECU.
    Functional,
    /// One ECU, by registry index.
    Physical(usize),
}

impl Target {
    pub fn is_functional(&self) -> bool {
        matches!(self, Self::Functional)
    }
}

/// Resolve a request id. `None` means the frame is not for us.
pub fn resolve(
    mode: AddressingMode,
    id: u32,
    extended: bool,
    registry: &EcuRegistry,
) -> Option<Target> {
    if extended {
        if !mode.accepts_extended() {
            return None;
        }
        if id == UDS_FUNCTIONAL_ID {
            return Some(Target::Functional);
        }
        if id & UDS_TARGET_MASK == UDS_PHYSICAL_BASE {
            let target = ((id >> 8) & 0xFF) as u8;
            return registry
                .index_by_target_address(target)
                .map(Target::Physical);
        }
        None
    } else {
        if !mode.accepts_standard() {
            return None;
        }
        if id == OBD_FUNCTIONAL_ID {
            return Some(Target::Functional);
        }
        if (OBD_PHYSICAL_BASE..OBD_PHYSICAL_BASE + OBD_PHYSICAL_COUNT).contains(&id) {
            let index = (id - OBD_PHYSICAL_BASE) as usize;
            return (index < registry.len()).then_some(Target::Physical(index));
        }
        None
    }
}
