//! Observer notifications
//!
//! After every state-changing event the emulator hands its observers an
//! [`EmulatorSnapshot`], a flat serialisable copy of all ECU state plus the
//! global toggles.

use serde::Serialize;

use crate::addressing::AddressingMode;
use crate::dtc::DtcCode;
use crate::ecu::{EcuRegistry, EcuState, FreezeFrame, LiveParameters, Mode06Test, SupportedPids};
use crate::faults::FaultSettings;
use crate::simulation::SimulationSettings;

/// State of one ECU at notification time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EcuSnapshot {
    pub name: String,
    pub address_11: u32,
    pub address_29: u32,
    pub enabled: bool,
    pub vin: String,
    pub calibration_id: String,
    pub cvn: String,
    pub software_version: String,
    #[serde(flatten)]
    pub live: LiveParameters,
    pub supported_pids: SupportedPids,
    pub mode06_tests: Vec<Mode06Test>,
    pub session: u8,
    pub security_unlocked: bool,
    pub mil_on: bool,
    pub dtcs: Vec<DtcCode>,
    pub permanent_dtcs: Vec<DtcCode>,
    pub freeze_frame: Option<FreezeFrame>,
    pub healthy_cycles: u8,
}

impl From<&EcuState> for EcuSnapshot {
    fn from(ecu: &EcuState) -> Self {
        Self {
            name: ecu.name.clone(),
            address_11: ecu.address_11,
            address_29: ecu.address_29,
            enabled: ecu.enabled,
            vin: ecu.vin.clone(),
            calibration_id: ecu.calibration_id.clone(),
            cvn: ecu.cvn.clone(),
            software_version: ecu.software_version.clone(),
            live: ecu.live.clone(),
            supported_pids: ecu.supported_pids,
            mode06_tests: ecu.mode06_tests.clone(),
            session: ecu.uds.session.id(),
            security_unlocked: ecu.uds.security_unlocked,
            mil_on: ecu.mil_on(),
            dtcs: ecu.active_dtcs().to_vec(),
            permanent_dtcs: ecu.permanent_dtcs().to_vec(),
            freeze_frame: ecu.freeze_frame().cloned(),
            healthy_cycles: ecu.healthy_cycles(),
        }
    }
}

/// Everything a dashboard needs to render the emulator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmulatorSnapshot {
    pub mode: AddressingMode,
    pub faults: FaultSettings,
    pub simulation: SimulationSettings,
    pub ecus: Vec<EcuSnapshot>,
}

impl EmulatorSnapshot {
    pub fn capture(
        registry: &EcuRegistry,
        mode: AddressingMode,
        faults: &FaultSettings,
        simulation: &SimulationSettings,
    ) -> Self {
        Self {
            mode,
            faults: faults.clone(),
            simulation: *simulation,
            ecus: registry.iter().map(EcuSnapshot::from).collect(),
        }
    }

    pub fn ecu(&self, name: &str) -> Option<&EcuSnapshot> {
        self.ecus
            .iter()
            .find(|ecu| ecu.name.eq_ignore_ascii_case(name))
    }
}

/// Receives a snapshot after every state change.
pub trait Observer: Send {
    fn notify(&self, snapshot: &EmulatorSnapshot);
}

impl<F> Observer for F
where
    F: Fn(&EmulatorSnapshot) + Send,
{
    fn notify(&self, snapshot: &EmulatorSnapshot) {
        self(snapshot)
    }
}
