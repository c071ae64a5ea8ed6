//! ReadDataByIdentifier table

use crate::ecu::{DiagnosticSession, EcuState};

/// Identifiers served by service 0x22.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataIdentifier {
    /// 0xF190, 17 ASCII bytes
    Vin,
    /// 0xF188, ASCII
    SoftwareVersion,
    /// 0x1234, volts * 10 as u16
    BatteryVoltage,
    /// 0x0202, rpm * 4 as u16; extended session only
    EngineRpm,
    /// 0x0203, km/h as one byte
    VehicleSpeed,
}

impl DataIdentifier {
    pub fn from_id(did: u16) -> Option<Self> {
        match did {
            0xF190 => Some(Self::Vin),
            0xF188 => Some(Self::SoftwareVersion),
            0x1234 => Some(Self::BatteryVoltage),
            0x0202 => Some(Self::EngineRpm),
            0x0203 => Some(Self::VehicleSpeed),
            _ => None,
        }
    }

    pub fn id(&self) -> u16 {
        match self {
            Self::Vin => 0xF190,
            Self::SoftwareVersion => 0xF188,
            Self::BatteryVoltage => 0x1234,
            Self::EngineRpm => 0x0202,
            Self::VehicleSpeed => 0x0203,
        }
    }

    /// Session required to read the identifier.
    pub fn required_session(&self) -> DiagnosticSession {
        match self {
            Self::EngineRpm => DiagnosticSession::Extended,
            _ => DiagnosticSession::Default,
        }
    }

    pub fn read(&self, ecu: &EcuState) -> Vec<u8> {
        match self {
            Self::Vin => ecu.vin.as_bytes().to_vec(),
            Self::SoftwareVersion => ecu.software_version.as_bytes().to_vec(),
            Self::BatteryVoltage => {
                let decivolts = (ecu.live.battery_voltage * 10.0).round().clamp(0.0, 65535.0);
                (decivolts as u16).to_be_bytes().to_vec()
            }
            Self::EngineRpm => {
                let raw = ecu.live.engine_rpm.saturating_mul(4).min(0xFFFF) as u16;
                raw.to_be_bytes().to_vec()
            }
            Self::VehicleSpeed => vec![ecu.live.vehicle_speed.min(255) as u8],
        }
    }
}
