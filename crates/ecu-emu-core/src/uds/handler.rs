//! Per-ECU UDS request handling

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use super::did::DataIdentifier;
use super::nrc::NegativeResponseCode as Nrc;
use super::{
    dtc_sub_function, is_request_seed, negative_response, positive_response, service_id,
    SUPPRESS_POSITIVE_RESPONSE,
};
use crate::dispatcher::ServiceOutcome;
use crate::dtc::status_bit;
use crate::ecu::{DiagnosticSession, EcuState};

/// Default XOR constant of the seed/key algorithm.
pub const DEFAULT_SECURITY_KEY_MASK: u32 = 0xDEAD_BEEF;

/// Status bits this ECU reports in ReadDTCInformation.
const DTC_STATUS_AVAILABILITY_MASK: u8 = 0xFF;

/// ISO 14229-1 DTC format identifier.
const DTC_FORMAT_ISO14229: u8 = 0x01;

/// ClearDiagnosticInformation group covering every DTC.
const DTC_GROUP_ALL: u32 = 0x00FF_FFFF;

/// P2 = 50 ms, P2* = 5000 ms (in 10 ms units).
const SESSION_TIMING: [u8; 4] = [0x00, 0x32, 0x01, 0xF4];

type ServiceResult = Result<ServiceOutcome, Nrc>;

/// UDS service handler shared by all ECUs; the state it mutates lives on
/// each [`EcuState`].
#[derive(Debug, Clone)]
pub struct UdsHandler {
    key_mask: u32,
    rng: StdRng,
}

impl UdsHandler {
    pub fn new(key_mask: u32) -> Self {
        Self {
            key_mask,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic seeds, for tests.
    pub fn with_seed(key_mask: u32, seed: u64) -> Self {
        Self {
            key_mask,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn key_mask(&self) -> u32 {
        self.key_mask
    }

    pub fn set_key_mask(&mut self, key_mask: u32) {
        self.key_mask = key_mask;
    }

    /// Key a tester must send for `seed`.
    pub fn expected_key(&self, seed: u32) -> u32 {
        seed ^ self.key_mask
    }

    /// Handle one UDS request for `ecu`. Negative responses that ISO 14229
    /// suppresses for functional addressing are dropped when `functional`.
    pub fn handle(&mut self, ecu: &mut EcuState, request: &[u8], functional: bool) -> ServiceOutcome {
        let Some(&sid) = request.first() else {
            return ServiceOutcome::silent();
        };

        let result = match sid {
            service_id::DIAGNOSTIC_SESSION_CONTROL => session_control(ecu, request),
            service_id::ECU_RESET => ecu_reset(ecu, request),
            service_id::CLEAR_DIAGNOSTIC_INFO => clear_diagnostic_info(ecu, request),
            service_id::READ_DTC_INFO => read_dtc_info(ecu, request),
            service_id::READ_DATA_BY_ID => read_data_by_id(ecu, request),
            service_id::SECURITY_ACCESS => self.security_access(ecu, request),
            service_id::TESTER_PRESENT => tester_present(request),
            _ => {
                debug!(ecu = %ecu.name, service_id = format!("0x{:02X}", sid), "Unsupported service");
                Err(Nrc::ServiceNotSupported)
            }
        };

        match result {
            Ok(outcome) => outcome,
            Err(nrc) if functional && nrc.suppressed_on_functional() => {
                debug!(ecu = %ecu.name, %nrc, "Negative response suppressed (functional request)");
                ServiceOutcome::silent()
            }
            Err(nrc) => {
                debug!(
                    ecu = %ecu.name,
                    service_id = format!("0x{:02X}", sid),
                    nrc = format!("0x{:02X}", nrc),
                    "Negative response"
                );
                ServiceOutcome::reply(negative_response(sid, nrc))
            }
        }
    }

    fn security_access(&mut self, ecu: &mut EcuState, request: &[u8]) -> ServiceResult {
        let sub_function = *request.get(1).ok_or(Nrc::IncorrectMessageLengthOrFormat)?;

        if sub_function == 0x00 {
            return Err(Nrc::SubFunctionNotSupported);
        }

        if is_request_seed(sub_function) {
            if request.len() != 2 {
                return Err(Nrc::IncorrectMessageLengthOrFormat);
            }
            let seed: u32 = self.rng.gen_range(1..=u32::MAX);
            ecu.uds.seed = Some(seed);
            info!(
                ecu = %ecu.name,
                level = sub_function,
                seed = format!("0x{:08X}", seed),
                "Security access: providing seed"
            );

            let mut data = vec![sub_function];
            data.extend_from_slice(&seed.to_be_bytes());
            Ok(ServiceOutcome::reply(positive_response(
                service_id::SECURITY_ACCESS,
                &data,
            )))
        } else {
            if request.len() != 6 {
                return Err(Nrc::IncorrectMessageLengthOrFormat);
            }
            let seed = ecu.uds.seed.ok_or(Nrc::RequestSequenceError)?;
            let key = u32::from_be_bytes([request[2], request[3], request[4], request[5]]);

            if key != self.expected_key(seed) {
                info!(ecu = %ecu.name, key = format!("0x{:08X}", key), "Security access: invalid key");
                return Err(Nrc::InvalidKey);
            }

            ecu.uds.security_unlocked = true;
            ecu.uds.seed = None;
            info!(ecu = %ecu.name, level = sub_function - 1, "Security access: unlocked");
            Ok(ServiceOutcome::reply(positive_response(
                service_id::SECURITY_ACCESS,
                &[sub_function],
            ))
            .changed())
        }
    }
}

impl Default for UdsHandler {
    fn default() -> Self {
        Self::new(DEFAULT_SECURITY_KEY_MASK)
    }
}

fn session_control(ecu: &mut EcuState, request: &[u8]) -> ServiceResult {
    if request.len() != 2 {
        return Err(Nrc::IncorrectMessageLengthOrFormat);
    }
    let session = DiagnosticSession::from_id(request[1]).ok_or(Nrc::SubFunctionNotSupported)?;

    let previous = ecu.uds.session;
    ecu.uds.session = session;
    if session == DiagnosticSession::Default || session != previous {
        if ecu.uds.security_unlocked {
            info!(ecu = %ecu.name, "Session change: security access locked");
        }
        ecu.uds.relock();
    }
    info!(ecu = %ecu.name, session = format!("0x{:02X}", session.id()), "Session changed");

    let mut data = vec![session.id()];
    data.extend_from_slice(&SESSION_TIMING);
    Ok(ServiceOutcome::reply(positive_response(service_id::DIAGNOSTIC_SESSION_CONTROL, &data)).changed())
}

fn ecu_reset(ecu: &mut EcuState, request: &[u8]) -> ServiceResult {
    if request.len() != 2 {
        return Err(Nrc::IncorrectMessageLengthOrFormat);
    }
    let reset_type = request[1];
    // hard, key off/on, soft
    if !(0x01..=0x03).contains(&reset_type) {
        return Err(Nrc::SubFunctionNotSupported);
    }

    info!(ecu = %ecu.name, reset_type, "ECU reset");
    ecu.uds.reset();
    Ok(ServiceOutcome::reply(positive_response(service_id::ECU_RESET, &[reset_type])).changed())
}

fn clear_diagnostic_info(ecu: &mut EcuState, request: &[u8]) -> ServiceResult {
    if request.len() != 4 {
        return Err(Nrc::IncorrectMessageLengthOrFormat);
    }
    let group = u32::from_be_bytes([0, request[1], request[2], request[3]]);
    if group != DTC_GROUP_ALL {
        return Err(Nrc::RequestOutOfRange);
    }

    ecu.clear_dtc();
    Ok(ServiceOutcome::reply(positive_response(service_id::CLEAR_DIAGNOSTIC_INFO, &[])).changed())
}

fn read_dtc_info(ecu: &EcuState, request: &[u8]) -> ServiceResult {
    let sub_function = *request.get(1).ok_or(Nrc::IncorrectMessageLengthOrFormat)?;
    if !matches!(
        sub_function,
        dtc_sub_function::REPORT_NUMBER_OF_DTC_BY_STATUS_MASK
            | dtc_sub_function::REPORT_DTC_BY_STATUS_MASK
    ) {
        return Err(Nrc::SubFunctionNotSupported);
    }
    if request.len() != 3 {
        return Err(Nrc::IncorrectMessageLengthOrFormat);
    }

    let status_mask = request[2];
    let matching: Vec<_> = if status_bit::ACTIVE & status_mask != 0 {
        ecu.active_dtcs().to_vec()
    } else {
        Vec::new()
    };

    let mut data = vec![sub_function, DTC_STATUS_AVAILABILITY_MASK];
    if sub_function == dtc_sub_function::REPORT_NUMBER_OF_DTC_BY_STATUS_MASK {
        data.push(DTC_FORMAT_ISO14229);
        data.extend_from_slice(&(matching.len() as u16).to_be_bytes());
    } else {
        for dtc in &matching {
            data.extend_from_slice(&dtc.to_uds_bytes());
            data.push(status_bit::ACTIVE);
        }
    }

    debug!(
        ecu = %ecu.name,
        status_mask = format!("0x{:02X}", status_mask),
        count = matching.len(),
        "Report DTCs"
    );
    Ok(ServiceOutcome::reply(positive_response(service_id::READ_DTC_INFO, &data)))
}

fn read_data_by_id(ecu: &EcuState, request: &[u8]) -> ServiceResult {
    if request.len() != 3 {
        return Err(Nrc::IncorrectMessageLengthOrFormat);
    }
    let id = u16::from_be_bytes([request[1], request[2]]);
    let did = DataIdentifier::from_id(id).ok_or(Nrc::RequestOutOfRange)?;

    if did.required_session() == DiagnosticSession::Extended
        && ecu.uds.session != DiagnosticSession::Extended
    {
        debug!(ecu = %ecu.name, did = format!("0x{:04X}", id), "DID requires extended session");
        return Err(Nrc::ConditionsNotCorrect);
    }

    let mut data = id.to_be_bytes().to_vec();
    data.extend_from_slice(&did.read(ecu));
    Ok(ServiceOutcome::reply(positive_response(service_id::READ_DATA_BY_ID, &data)))
}

fn tester_present(request: &[u8]) -> ServiceResult {
    if request.len() != 2 {
        return Err(Nrc::IncorrectMessageLengthOrFormat);
    }
    let sub_function = request[1];
    if sub_function & !SUPPRESS_POSITIVE_RESPONSE != 0 {
        return Err(Nrc::SubFunctionNotSupported);
    }
    if sub_function & SUPPRESS_POSITIVE_RESPONSE != 0 {
        return Ok(ServiceOutcome::silent());
    }
    Ok(ServiceOutcome::reply(positive_response(service_id::TESTER_PRESENT, &[0x00])))
}
