//! Diagnostic trouble codes and their lifecycle
//!
//! Each ECU keeps two capped sets: the active codes a scan tool can clear, and
//! the permanent record that only heals after enough clean driving cycles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ecu::{EcuState, FreezeFrame};
use crate::error::DtcError;

/// Capacity of both the active and the permanent set.
pub const MAX_DTCS: usize = 5;

/// Clean driving cycles needed to erase the permanent set.
pub const HEALING_THRESHOLD: u8 = 3;

/// ISO 14229-1 status byte bits reported by ReadDTCInformation.
pub mod status_bit {
    pub const TEST_FAILED: u8 = 0x01;
    pub const TEST_FAILED_THIS_OPERATION_CYCLE: u8 = 0x02;
    pub const PENDING_DTC: u8 = 0x04;
    pub const CONFIRMED_DTC: u8 = 0x08;
    pub const TEST_FAILED_SINCE_LAST_CLEAR: u8 = 0x20;

    /// Status of every stored active code.
    pub const ACTIVE: u8 = TEST_FAILED
        | TEST_FAILED_THIS_OPERATION_CYCLE
        | PENDING_DTC
        | CONFIRMED_DTC
        | TEST_FAILED_SINCE_LAST_CLEAR;
}

/// System letter of a DTC, stored in the top two bits of the encoded code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DtcSystem {
    /// P codes
    Powertrain,
    /// C codes
    Chassis,
    /// B codes
    Body,
    /// U codes
    Network,
}

impl DtcSystem {
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'P' => Some(Self::Powertrain),
            'C' => Some(Self::Chassis),
            'B' => Some(Self::Body),
            'U' => Some(Self::Network),
            _ => None,
        }
    }

    pub fn letter(&self) -> char {
        match self {
            Self::Powertrain => 'P',
            Self::Chassis => 'C',
            Self::Body => 'B',
            Self::Network => 'U',
        }
    }

    fn bits(&self) -> u16 {
        match self {
            Self::Powertrain => 0,
            Self::Chassis => 1,
            Self::Body => 2,
            Self::Network => 3,
        }
    }

    fn from_bits(bits: u16) -> Self {
        match bits & 0x03 {
            0 => Self::Powertrain,
            1 => Self::Chassis,
            2 => Self::Body,
            _ => Self::Network,
        }
    }
}

/// A 5-character trouble code such as `P0301`.
///
/// The four digits are read as one decimal number and stored in the low 14
/// bits of the two-byte form, with the system in bits 15-14. `P0300` goes on
/// the wire as `0x012C`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DtcCode {
    system: DtcSystem,
    number: u16,
}

impl DtcCode {
    /// Highest number four decimal digits can spell.
    pub const MAX_NUMBER: u16 = 9999;

    /// Powertrain code from its digits, `powertrain(300)` being P0300.
    pub const fn powertrain(digits: u16) -> Self {
        Self {
            system: DtcSystem::Powertrain,
            number: digits & 0x3FFF,
        }
    }

    pub fn system(&self) -> DtcSystem {
        self.system
    }

    /// Two-byte wire encoding used by OBD-II services 03/07/0A.
    pub fn to_bytes(&self) -> [u8; 2] {
        ((self.system.bits() << 14) | self.number).to_be_bytes()
    }

    /// Decode the two-byte form. Numbers above 9999 have no 5-character
    /// spelling and yield `None`.
    pub fn from_bytes(bytes: [u8; 2]) -> Option<Self> {
        let raw = u16::from_be_bytes(bytes);
        let number = raw & 0x3FFF;
        (number <= Self::MAX_NUMBER).then(|| Self {
            system: DtcSystem::from_bits(raw >> 14),
            number,
        })
    }

    /// Three-byte UDS DTC number (two-byte code plus failure type 0x00).
    pub fn to_uds_bytes(&self) -> [u8; 3] {
        let [hi, lo] = self.to_bytes();
        [hi, lo, 0x00]
    }
}

impl FromStr for DtcCode {
    type Err = DtcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let chars: Vec<char> = s.chars().collect();
        if chars.len() != 5 {
            return Err(DtcError::InvalidLength(s.to_string()));
        }

        let system = DtcSystem::from_letter(chars[0]).ok_or(DtcError::InvalidSystem(chars[0]))?;

        let mut number: u16 = 0;
        for c in &chars[1..] {
            let digit = c
                .to_digit(10)
                .ok_or_else(|| DtcError::InvalidDigits(s.to_string()))?;
            number = number * 10 + digit as u16;
        }

        Ok(Self { system, number })
    }
}

impl TryFrom<String> for DtcCode {
    type Error = DtcError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DtcCode> for String {
    fn from(code: DtcCode) -> Self {
        code.to_string()
    }
}

impl fmt::Display for DtcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:04}", self.system.letter(), self.number)
    }
}

impl fmt::Debug for DtcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DtcCode({self})")
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

impl EcuState {
    /// Record a fault.
    ///
    /// The code goes into the active and the permanent set independently,
    /// each only if absent and not full. The first active insertion while no
    /// freeze frame exists captures one from the live parameters. Returns
    /// whether either set changed.
    pub fn add_dtc(&mut self, code: DtcCode) -> bool {
        let added_active = insert_capped(&mut self.active_dtcs, code);
        let added_permanent = insert_capped(&mut self.permanent_dtcs, code);

        if added_active {
            self.healthy_cycles = 0;
            if self.freeze_frame.is_none() {
                self.freeze_frame = Some(FreezeFrame::capture(code, &self.live));
                info!(ecu = %self.name, dtc = %code, "Freeze frame captured");
            }
            info!(ecu = %self.name, dtc = %code, "DTC stored");
        }

        added_active || added_permanent
    }

    /// Restore a code into the permanent record only, as when loading a
    /// saved state whose active set was already cleared.
    pub fn add_permanent_dtc(&mut self, code: DtcCode) -> bool {
        insert_capped(&mut self.permanent_dtcs, code)
    }

    /// Scan-tool clear: empties the active set, drops the freeze frame and
    /// resets the MIL distance. Permanent codes stay.
    pub fn clear_dtc(&mut self) {
        self.active_dtcs.clear();
        self.freeze_frame = None;
        self.live.distance_with_mil = 0;
        info!(
            ecu = %self.name,
            permanent = self.permanent_dtcs.len(),
            "Active DTCs cleared"
        );
    }

    /// End of a driving cycle. Returns true when this cycle healed the
    /// permanent set.
    pub fn complete_driving_cycle(&mut self) -> bool {
        if !self.active_dtcs.is_empty() {
            self.healthy_cycles = 0;
            return false;
        }

        self.healthy_cycles = self.healthy_cycles.saturating_add(1);
        if self.healthy_cycles >= HEALING_THRESHOLD {
            self.healthy_cycles = 0;
            if !self.permanent_dtcs.is_empty() {
                info!(ecu = %self.name, "Permanent DTCs healed");
                self.permanent_dtcs.clear();
                return true;
            }
        }
        false
    }
}

fn insert_capped(set: &mut Vec<DtcCode>, code: DtcCode) -> bool {
    if set.len() >= MAX_DTCS || set.contains(&code) {
        return false;
    }
    set.push(code);
    true
}
