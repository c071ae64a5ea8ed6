//! Emulated ECU state
//!
//! One [`EcuState`] per simulated controller; the [`EcuRegistry`] owns them
//! in addressing order.

mod registry;

pub use registry::EcuRegistry;

use serde::{Deserialize, Serialize};

use crate::dtc::DtcCode;

/// Maximum number of on-board monitoring test records per ECU.
pub const MAX_MODE06_TESTS: usize = 5;

/// Live vehicle parameters reported through Mode 01 and UDS identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveParameters {
    /// rpm
    pub engine_rpm: u32,
    /// °C
    pub coolant_temp: i32,
    /// km/h
    pub vehicle_speed: u32,
    /// g/s
    pub maf_rate: f32,
    /// %
    pub engine_load: f32,
    /// kPa
    pub intake_pressure: u32,
    /// %
    pub throttle_position: f32,
    /// °C
    pub intake_air_temp: i32,
    /// %
    pub short_term_fuel_trim: f32,
    /// %
    pub long_term_fuel_trim: f32,
    /// V
    pub o2_voltage: f32,
    /// degrees before TDC
    pub timing_advance: f32,
    /// L/h
    pub fuel_rate: f32,
    /// kPa
    pub fuel_pressure: u32,
    /// %
    pub fuel_level: f32,
    /// km
    pub distance_with_mil: u32,
    /// V
    pub battery_voltage: f32,
    /// Transmission ECUs only.
    pub current_gear: Option<u8>,
}

impl Default for LiveParameters {
    fn default() -> Self {
        Self {
            engine_rpm: 1500,
            coolant_temp: 90,
            vehicle_speed: 60,
            maf_rate: 10.0,
            engine_load: 35.0,
            intake_pressure: 40,
            throttle_position: 15.0,
            intake_air_temp: 30,
            short_term_fuel_trim: 0.0,
            long_term_fuel_trim: 2.5,
            o2_voltage: 0.45,
            timing_advance: 5.0,
            fuel_rate: 1.5,
            fuel_pressure: 350,
            fuel_level: 75.0,
            distance_with_mil: 0,
            battery_voltage: 14.2,
            current_gear: None,
        }
    }
}

/// Parameters captured when the first fault was recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreezeFrame {
    /// Code that triggered the capture.
    pub dtc: DtcCode,
    pub engine_rpm: u32,
    pub vehicle_speed: u32,
    pub coolant_temp: i32,
    pub maf_rate: f32,
    pub fuel_pressure: u32,
}

impl FreezeFrame {
    pub fn capture(dtc: DtcCode, live: &LiveParameters) -> Self {
        Self {
            dtc,
            engine_rpm: live.engine_rpm,
            vehicle_speed: live.vehicle_speed,
            coolant_temp: live.coolant_temp,
            maf_rate: live.maf_rate,
            fuel_pressure: live.fuel_pressure,
        }
    }
}

/// Supported-PID bitmaps, MSB first: PID 1 of a range is bit 31.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupportedPids {
    pub pids_01_20: u32,
    pub pids_21_40: u32,
    pub pids_41_60: u32,
    pub pids_61_80: u32,
    /// Service 09 info types 01-20.
    pub service_09: u32,
}

impl SupportedPids {
    /// Bitmap answering Mode 01 PID `base` (0x00, 0x20, 0x40, 0x60).
    pub fn bitmap(&self, base: u8) -> Option<u32> {
        match base {
            0x00 => Some(self.pids_01_20),
            0x20 => Some(self.pids_21_40),
            0x40 => Some(self.pids_41_60),
            0x60 => Some(self.pids_61_80),
            _ => None,
        }
    }

    /// Whether a Mode 01 PID in 0x01-0x80 is flagged supported.
    pub fn supports(&self, pid: u8) -> bool {
        if pid == 0 || pid > 0x80 {
            return false;
        }
        let base = (pid - 1) / 32 * 32;
        self.bitmap(base)
            .is_some_and(|bitmap| bitmap & pid_bit(pid, base) != 0)
    }

    pub fn supports_info_type(&self, info_type: u8) -> bool {
        (1..=0x20).contains(&info_type) && self.service_09 & pid_bit(info_type, 0) != 0
    }

    /// Build a bitmap from a PID list, e.g. `mask(0x00, &[0x0C, 0x0D])`.
    pub fn mask(base: u8, pids: &[u8]) -> u32 {
        pids.iter()
            .filter(|pid| **pid > base && **pid <= base.saturating_add(32))
            .fold(0, |acc, pid| acc | pid_bit(*pid, base))
    }
}

/// Bit for `pid` in the range starting at `base`: `1 << (32 - (pid - base))`.
/// PIDs outside `base + 1 ..= base + 32` have no bit and give 0.
fn pid_bit(pid: u8, base: u8) -> u32 {
    match pid.checked_sub(base).map(u32::from) {
        Some(offset @ 1..=32) => 1u32 << (32 - offset),
        _ => 0,
    }
}

/// On-board monitoring test result (Mode 06).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mode06Test {
    pub test_id: u8,
    pub value: u16,
    pub min: u16,
    pub max: u16,
    pub enabled: bool,
}

/// UDS diagnostic session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSession {
    #[default]
    Default,
    Extended,
}

impl DiagnosticSession {
    pub fn id(&self) -> u8 {
        match self {
            Self::Default => 0x01,
            Self::Extended => 0x03,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0x01 => Some(Self::Default),
            0x03 => Some(Self::Extended),
            _ => None,
        }
    }
}

/// UDS session and security state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UdsSession {
    pub session: DiagnosticSession,
    pub security_unlocked: bool,
    /// Last seed handed out, cleared by a successful key or a relock.
    pub seed: Option<u32>,
}

impl UdsSession {
    pub fn relock(&mut self) {
        self.security_unlocked = false;
        self.seed = None;
    }

    pub fn reset(&mut self) {
        self.session = DiagnosticSession::Default;
        self.relock();
    }
}

/// One emulated controller.
#[derive(Debug, Clone)]
pub struct EcuState {
    pub name: String,
    /// Response id for 11-bit addressing (e.g. 0x7E8).
    pub address_11: u32,
    /// Response id for 29-bit addressing (e.g. 0x18DAF110); the low byte is
    /// the ECU's own address.
    pub address_29: u32,
    pub enabled: bool,

    pub vin: String,
    pub calibration_id: String,
    /// Calibration verification number as 8 hex digits.
    pub cvn: String,
    pub software_version: String,

    pub live: LiveParameters,
    pub supported_pids: SupportedPids,
    pub mode06_tests: Vec<Mode06Test>,
    pub uds: UdsSession,

    pub(crate) active_dtcs: Vec<DtcCode>,
    pub(crate) permanent_dtcs: Vec<DtcCode>,
    pub(crate) freeze_frame: Option<FreezeFrame>,
    pub(crate) healthy_cycles: u8,
}

impl EcuState {
    pub fn new(name: impl Into<String>, address_11: u32, address_29: u32) -> Self {
        Self {
            name: name.into(),
            address_11,
            address_29,
            enabled: true,
            vin: String::new(),
            calibration_id: String::new(),
            cvn: String::new(),
            software_version: "V1.0".to_string(),
            live: LiveParameters::default(),
            supported_pids: SupportedPids::default(),
            mode06_tests: Vec::new(),
            uds: UdsSession::default(),
            active_dtcs: Vec::new(),
            permanent_dtcs: Vec::new(),
            freeze_frame: None,
            healthy_cycles: 0,
        }
    }

    /// Engine control module with the stock parameter set.
    pub fn default_ecm() -> Self {
        let mut ecu = Self::new("ECM", 0x7E8, 0x18DA_F110);
        ecu.vin = "123EMULATORVINECM".to_string();
        ecu.calibration_id = "ECM_CAL_ID_V1".to_string();
        ecu.cvn = "ECE1E2E3".to_string();
        ecu.supported_pids = SupportedPids {
            pids_01_20: SupportedPids::mask(
                0x00,
                &[
                    0x01, 0x04, 0x05, 0x06, 0x07, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10, 0x11,
                    0x14, 0x20,
                ],
            ),
            pids_21_40: SupportedPids::mask(0x20, &[0x2F, 0x31, 0x40]),
            pids_41_60: SupportedPids::mask(0x40, &[0x42, 0x5E, 0x60]),
            pids_61_80: 0,
            service_09: SupportedPids::mask(0x00, &[0x02, 0x04, 0x06]),
        };
        ecu.mode06_tests = vec![
            Mode06Test {
                test_id: 0x01,
                value: 300,
                min: 0,
                max: 500,
                enabled: true,
            },
            Mode06Test {
                test_id: 0x02,
                value: 0,
                min: 0,
                max: 0,
                enabled: false,
            },
        ];
        ecu
    }

    /// Transmission control module: speed, rpm and gear only.
    pub fn default_tcm() -> Self {
        let mut ecu = Self::new("TCM", 0x7E9, 0x18DA_F118);
        ecu.vin = "123EMULATORVINTCM".to_string();
        ecu.calibration_id = "TCM_CAL_ID_V2".to_string();
        ecu.cvn = "7CE1E2E3".to_string();
        ecu.live.current_gear = Some(4);
        ecu.supported_pids = SupportedPids {
            pids_01_20: SupportedPids::mask(0x00, &[0x0C, 0x0D]),
            service_09: SupportedPids::mask(0x00, &[0x02]),
            ..Default::default()
        };
        ecu
    }

    /// The ECU's own address byte in 29-bit addressing.
    pub fn target_address(&self) -> u8 {
        (self.address_29 & 0xFF) as u8
    }

    pub fn active_dtcs(&self) -> &[DtcCode] {
        &self.active_dtcs
    }

    pub fn permanent_dtcs(&self) -> &[DtcCode] {
        &self.permanent_dtcs
    }

    pub fn freeze_frame(&self) -> Option<&FreezeFrame> {
        self.freeze_frame.as_ref()
    }

    pub fn healthy_cycles(&self) -> u8 {
        self.healthy_cycles
    }

    /// MIL is lit while any active code is stored.
    pub fn mil_on(&self) -> bool {
        !self.active_dtcs.is_empty()
    }
}
