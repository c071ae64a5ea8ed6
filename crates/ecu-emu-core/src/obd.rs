//! SAE J1979 (OBD-II) services
//!
//! Mode 01/02 PIDs live in the [`Pid`] table: each variant owns its support
//! rule and its byte formula, so the supported bitmap and the encoder can
//! never disagree.

use tracing::{debug, warn};

use crate::dispatcher::ServiceOutcome;
use crate::dtc::DtcCode;
use crate::ecu::{EcuState, FreezeFrame, SupportedPids};

/// OBD-II service (mode) identifiers
pub mod service {
    pub const CURRENT_DATA: u8 = 0x01;
    pub const FREEZE_FRAME_DATA: u8 = 0x02;
    pub const STORED_DTCS: u8 = 0x03;
    pub const CLEAR_DTCS: u8 = 0x04;
    pub const OXYGEN_SENSOR_MONITORING: u8 = 0x05;
    pub const TEST_RESULTS: u8 = 0x06;
    pub const PENDING_DTCS: u8 = 0x07;
    pub const VEHICLE_INFO: u8 = 0x09;
    pub const PERMANENT_DTCS: u8 = 0x0A;
}

/// Service 09 info types
pub mod info_type {
    pub const SUPPORTED: u8 = 0x00;
    pub const VIN: u8 = 0x02;
    pub const CALIBRATION_ID: u8 = 0x04;
    pub const CVN: u8 = 0x06;
}

/// Offset between a request mode and its positive response.
pub const RESPONSE_OFFSET: u8 = 0x40;

/// J1979 caps a Mode 01 request at six PIDs.
const MAX_PIDS_PER_REQUEST: usize = 6;

/// Freeze frame number reported in Mode 02 responses.
const FREEZE_FRAME_NUMBER: u8 = 0x00;

/// Whether `sid` is one of the OBD-II modes this emulator serves.
pub fn is_obd_service(sid: u8) -> bool {
    matches!(
        sid,
        service::CURRENT_DATA
            | service::FREEZE_FRAME_DATA
            | service::STORED_DTCS
            | service::CLEAR_DTCS
            | service::TEST_RESULTS
            | service::PENDING_DTCS
            | service::VEHICLE_INFO
            | service::PERMANENT_DTCS
    )
}

// =============================================================================
// PID table
// =============================================================================

/// Mode 01 / 02 parameter identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pid {
    /// 0x00, 0x20, 0x40, 0x60: supported bitmap for the next 32 PIDs.
    Supported(u8),
    MonitorStatus,
    /// Mode 02 only: the DTC that triggered the freeze frame.
    FreezeFrameDtc,
    EngineLoad,
    CoolantTemp,
    ShortTermFuelTrim,
    LongTermFuelTrim,
    FuelPressure,
    IntakePressure,
    EngineRpm,
    VehicleSpeed,
    TimingAdvance,
    IntakeAirTemp,
    MafRate,
    ThrottlePosition,
    OxygenSensor1,
    FuelLevel,
    DistanceWithMil,
    ModuleVoltage,
    FuelRate,
    CurrentGear,
}

impl Pid {
    pub fn from_id(pid: u8) -> Option<Self> {
        Some(match pid {
            0x00 | 0x20 | 0x40 | 0x60 => Self::Supported(pid),
            0x01 => Self::MonitorStatus,
            0x02 => Self::FreezeFrameDtc,
            0x04 => Self::EngineLoad,
            0x05 => Self::CoolantTemp,
            0x06 => Self::ShortTermFuelTrim,
            0x07 => Self::LongTermFuelTrim,
            0x0A => Self::FuelPressure,
            0x0B => Self::IntakePressure,
            0x0C => Self::EngineRpm,
            0x0D => Self::VehicleSpeed,
            0x0E => Self::TimingAdvance,
            0x0F => Self::IntakeAirTemp,
            0x10 => Self::MafRate,
            0x11 => Self::ThrottlePosition,
            0x14 => Self::OxygenSensor1,
            0x2F => Self::FuelLevel,
            0x31 => Self::DistanceWithMil,
            0x42 => Self::ModuleVoltage,
            0x5E => Self::FuelRate,
            0xA4 => Self::CurrentGear,
            _ => return None,
        })
    }

    pub fn id(&self) -> u8 {
        match self {
            Self::Supported(base) => *base,
            Self::MonitorStatus => 0x01,
            Self::FreezeFrameDtc => 0x02,
            Self::EngineLoad => 0x04,
            Self::CoolantTemp => 0x05,
            Self::ShortTermFuelTrim => 0x06,
            Self::LongTermFuelTrim => 0x07,
            Self::FuelPressure => 0x0A,
            Self::IntakePressure => 0x0B,
            Self::EngineRpm => 0x0C,
            Self::VehicleSpeed => 0x0D,
            Self::TimingAdvance => 0x0E,
            Self::IntakeAirTemp => 0x0F,
            Self::MafRate => 0x10,
            Self::ThrottlePosition => 0x11,
            Self::OxygenSensor1 => 0x14,
            Self::FuelLevel => 0x2F,
            Self::DistanceWithMil => 0x31,
            Self::ModuleVoltage => 0x42,
            Self::FuelRate => 0x5E,
            Self::CurrentGear => 0xA4,
        }
    }

    /// Mode 01 capability query.
    pub fn is_supported_by(&self, ecu: &EcuState) -> bool {
        match self {
            Self::Supported(_) => true,
            Self::CurrentGear => ecu.live.current_gear.is_some(),
            Self::FreezeFrameDtc => false,
            other => ecu.supported_pids.supports(other.id()),
        }
    }

    /// Mode 01 data bytes from the live parameters.
    pub fn encode(&self, ecu: &EcuState) -> Option<Vec<u8>> {
        let live = &ecu.live;
        let data = match self {
            Self::Supported(base) => ecu.supported_pids.bitmap(*base)?.to_be_bytes().to_vec(),
            Self::MonitorStatus => {
                let count = ecu.active_dtcs().len().min(0x7F) as u8;
                let mil = if ecu.mil_on() { 0x80 } else { 0x00 };
                vec![mil | count, 0x00, 0x00, 0x00]
            }
            Self::FreezeFrameDtc => return None,
            Self::EngineLoad => vec![percent(live.engine_load)],
            Self::CoolantTemp => vec![temperature(live.coolant_temp)],
            Self::ShortTermFuelTrim => vec![fuel_trim(live.short_term_fuel_trim)],
            Self::LongTermFuelTrim => vec![fuel_trim(live.long_term_fuel_trim)],
            Self::FuelPressure => vec![fuel_pressure(live.fuel_pressure)],
            Self::IntakePressure => vec![byte(live.intake_pressure as f32)],
            Self::EngineRpm => rpm(live.engine_rpm).to_vec(),
            Self::VehicleSpeed => vec![byte(live.vehicle_speed as f32)],
            Self::TimingAdvance => vec![byte(live.timing_advance * 2.0 + 128.0)],
            Self::IntakeAirTemp => vec![temperature(live.intake_air_temp)],
            Self::MafRate => maf(live.maf_rate).to_vec(),
            Self::ThrottlePosition => vec![percent(live.throttle_position)],
            Self::OxygenSensor1 => vec![byte(live.o2_voltage * 200.0), 0xFF],
            Self::FuelLevel => vec![percent(live.fuel_level)],
            Self::DistanceWithMil => word(live.distance_with_mil as f32).to_vec(),
            Self::ModuleVoltage => word(live.battery_voltage * 1000.0).to_vec(),
            Self::FuelRate => word(live.fuel_rate * 20.0).to_vec(),
            Self::CurrentGear => vec![live.current_gear?],
        };
        Some(data)
    }

    /// Mode 02 data bytes from a captured freeze frame.
    pub fn encode_freeze_frame(&self, ff: &FreezeFrame) -> Option<Vec<u8>> {
        let data = match self {
            Self::Supported(0x00) => freeze_frame_bitmap().to_be_bytes().to_vec(),
            Self::FreezeFrameDtc => ff.dtc.to_bytes().to_vec(),
            Self::CoolantTemp => vec![temperature(ff.coolant_temp)],
            Self::FuelPressure => vec![fuel_pressure(ff.fuel_pressure)],
            Self::EngineRpm => rpm(ff.engine_rpm).to_vec(),
            Self::VehicleSpeed => vec![byte(ff.vehicle_speed as f32)],
            Self::MafRate => maf(ff.maf_rate).to_vec(),
            _ => return None,
        };
        Some(data)
    }
}

fn freeze_frame_bitmap() -> u32 {
    SupportedPids::mask(0x00, &[0x02, 0x05, 0x0A, 0x0C, 0x0D, 0x10])
}

// ── SAE scaling ──

fn byte(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

fn word(value: f32) -> [u8; 2] {
    (value.round().clamp(0.0, 65535.0) as u16).to_be_bytes()
}

fn percent(value: f32) -> u8 {
    byte(value * 255.0 / 100.0)
}

fn temperature(celsius: i32) -> u8 {
    (celsius + 40).clamp(0, 255) as u8
}

fn fuel_trim(value: f32) -> u8 {
    byte(value * 1.28 + 128.0)
}

fn fuel_pressure(kpa: u32) -> u8 {
    (kpa / 3).min(255) as u8
}

fn rpm(value: u32) -> [u8; 2] {
    (value.saturating_mul(4).min(0xFFFF) as u16).to_be_bytes()
}

fn maf(grams_per_second: f32) -> [u8; 2] {
    word(grams_per_second * 100.0)
}

// =============================================================================
// Service handlers
// =============================================================================

/// Handle one OBD-II request for one ECU. `None` response means the ECU stays
/// silent, which is how J1979 ECUs treat unsupported PIDs.
pub fn handle_request(ecu: &mut EcuState, request: &[u8]) -> ServiceOutcome {
    let Some(&sid) = request.first() else {
        return ServiceOutcome::silent();
    };
    let args = &request[1..];

    match sid {
        service::CURRENT_DATA => ServiceOutcome::from(current_data(ecu, args)),
        service::FREEZE_FRAME_DATA => ServiceOutcome::from(freeze_frame_data(ecu, args)),
        service::STORED_DTCS | service::PENDING_DTCS => {
            ServiceOutcome::reply(dtc_list(sid, ecu.active_dtcs()))
        }
        service::PERMANENT_DTCS => ServiceOutcome::reply(dtc_list(sid, ecu.permanent_dtcs())),
        service::CLEAR_DTCS => {
            ecu.clear_dtc();
            ServiceOutcome::reply(vec![service::CLEAR_DTCS + RESPONSE_OFFSET]).changed()
        }
        service::TEST_RESULTS => ServiceOutcome::from(test_results(ecu, args)),
        service::VEHICLE_INFO => ServiceOutcome::from(vehicle_info(ecu, args)),
        _ => ServiceOutcome::silent(),
    }
}

fn current_data(ecu: &EcuState, pids: &[u8]) -> Option<Vec<u8>> {
    if pids.is_empty() || pids.len() > MAX_PIDS_PER_REQUEST {
        debug!(ecu = %ecu.name, count = pids.len(), "Mode 01 request with bad PID count");
        return None;
    }

    let mut response = vec![service::CURRENT_DATA + RESPONSE_OFFSET];
    for &id in pids {
        let Some(pid) = Pid::from_id(id).filter(|pid| pid.is_supported_by(ecu)) else {
            continue;
        };
        if let Some(data) = pid.encode(ecu) {
            response.push(id);
            response.extend_from_slice(&data);
        }
    }

    (response.len() > 1).then_some(response)
}

fn freeze_frame_data(ecu: &EcuState, args: &[u8]) -> Option<Vec<u8>> {
    let ff = ecu.freeze_frame()?;
    let id = *args.first()?;
    let data = Pid::from_id(id)?.encode_freeze_frame(ff)?;

    let mut response = vec![
        service::FREEZE_FRAME_DATA + RESPONSE_OFFSET,
        id,
        FREEZE_FRAME_NUMBER,
    ];
    response.extend_from_slice(&data);
    Some(response)
}

fn dtc_list(sid: u8, dtcs: &[DtcCode]) -> Vec<u8> {
    let mut response = Vec::with_capacity(2 + dtcs.len() * 2);
    response.push(sid + RESPONSE_OFFSET);
    response.push(dtcs.len() as u8);
    for dtc in dtcs {
        response.extend_from_slice(&dtc.to_bytes());
    }
    response
}

fn test_results(ecu: &EcuState, args: &[u8]) -> Option<Vec<u8>> {
    let tid = *args.first()?;
    let mut response = vec![service::TEST_RESULTS + RESPONSE_OFFSET, tid];
    for test in ecu.mode06_tests.iter().filter(|t| t.enabled) {
        response.push(test.test_id);
        response.extend_from_slice(&test.value.to_be_bytes());
        response.extend_from_slice(&test.min.to_be_bytes());
        response.extend_from_slice(&test.max.to_be_bytes());
    }
    (response.len() > 2).then_some(response)
}

fn vehicle_info(ecu: &EcuState, args: &[u8]) -> Option<Vec<u8>> {
    let info = *args.first()?;
    let mut response = vec![service::VEHICLE_INFO + RESPONSE_OFFSET, info];

    if info == info_type::SUPPORTED {
        response.extend_from_slice(&ecu.supported_pids.service_09.to_be_bytes());
        return Some(response);
    }
    if !ecu.supported_pids.supports_info_type(info) {
        return None;
    }

    match info {
        info_type::VIN => response.extend_from_slice(ecu.vin.as_bytes()),
        info_type::CALIBRATION_ID => response.extend_from_slice(ecu.calibration_id.as_bytes()),
        info_type::CVN => match hex::decode(ecu.cvn.trim()) {
            Ok(cvn) => response.extend_from_slice(&cvn),
            Err(e) => {
                warn!(ecu = %ecu.name, cvn = %ecu.cvn, error = %e, "CVN is not valid hex");
                return None;
            }
        },
        _ => return None,
    }
    Some(response)
}
