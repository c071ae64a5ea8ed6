//! Diagnostic request dispatch
//!
//! Resolves the addressed ECUs of a reassembled request, runs the OBD-II or
//! UDS handler for each and schedules the responses for the transport.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::addressing::{self, AddressingMode, Target};
use crate::ecu::{EcuRegistry, EcuState};
use crate::faults::FaultInjector;
use crate::frame::FrameSink;
use crate::isotp::{IsoTpLink, IsoTpMessage};
use crate::obd;
use crate::uds::{self, NegativeResponseCode, UdsHandler, FIRST_UDS_SERVICE};

/// Upper bound on responses waiting for the transmitter.
pub const MAX_PENDING_RESPONSES: usize = 16;

/// Result of running one service for one ECU.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceOutcome {
    /// Payload to send back, `None` to stay silent.
    pub response: Option<Vec<u8>>,
    /// Whether the ECU state changed in a way observers care about.
    pub state_changed: bool,
}

impl ServiceOutcome {
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn reply(response: Vec<u8>) -> Self {
        Self {
            response: Some(response),
            state_changed: false,
        }
    }

    pub fn changed(mut self) -> Self {
        self.state_changed = true;
        self
    }
}

impl From<Option<Vec<u8>>> for ServiceOutcome {
    fn from(response: Option<Vec<u8>>) -> Self {
        Self {
            response,
            state_changed: false,
        }
    }
}

/// A response waiting to be handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingResponse {
    pub id: u32,
    pub extended: bool,
    pub payload: Vec<u8>,
    pub due_ms: u64,
}

/// Routes requests to ECUs and owns the outbound response queue.
#[derive(Debug, Default)]
pub struct Dispatcher {
    uds: UdsHandler,
    outbound: VecDeque<PendingResponse>,
}

impl Dispatcher {
    pub fn new(uds: UdsHandler) -> Self {
        Self {
            uds,
            outbound: VecDeque::new(),
        }
    }

    pub fn uds(&self) -> &UdsHandler {
        &self.uds
    }

    pub fn uds_mut(&mut self) -> &mut UdsHandler {
        &mut self.uds
    }

    /// Responses not yet handed to the transport.
    pub fn pending(&self) -> impl Iterator<Item = &PendingResponse> {
        self.outbound.iter()
    }

    pub fn clear_pending(&mut self) {
        self.outbound.clear();
    }

    /// Dispatch one reassembled request. Returns whether any ECU state
    /// changed.
    pub fn dispatch(
        &mut self,
        registry: &mut EcuRegistry,
        faults: &mut FaultInjector,
        message: &IsoTpMessage,
        mode: AddressingMode,
        now_ms: u64,
    ) -> bool {
        let Some(&sid) = message.payload.first() else {
            return false;
        };

        if faults.should_drop_request() {
            warn!(
                can_id = format!("0x{:03X}", message.id),
                service_id = format!("0x{:02X}", sid),
                "Injected bus error, request dropped"
            );
            return false;
        }
        if faults.is_silent() {
            debug!(service_id = format!("0x{:02X}", sid), "Silent mode, request ignored");
            return false;
        }

        let Some(target) = addressing::resolve(mode, message.id, message.extended, registry)
        else {
            debug!(can_id = format!("0x{:03X}", message.id), "Request for unknown address dropped");
            return false;
        };
        let functional = target.is_functional();

        let targets: Vec<usize> = match target {
            Target::Physical(index) if !faults.multiple_responses() => vec![index],
            _ => (0..registry.len()).collect(),
        };

        let due_ms = now_ms + faults.response_delay_ms();
        let mut changed = false;

        for index in targets {
            let Some(ecu) = registry.get_mut(index) else {
                continue;
            };
            if !ecu.enabled {
                continue;
            }

            let outcome = self.run_service(ecu, &message.payload, functional);
            changed |= outcome.state_changed;

            if let Some(payload) = outcome.response {
                let id = if message.extended {
                    ecu.address_29
                } else {
                    ecu.address_11
                };
                debug!(
                    ecu = %ecu.name,
                    response_id = format!("0x{:03X}", id),
                    len = payload.len(),
                    "Response scheduled"
                );
                self.enqueue(PendingResponse {
                    id,
                    extended: message.extended,
                    payload,
                    due_ms,
                });
            }
        }

        changed
    }

    fn run_service(&mut self, ecu: &mut EcuState, request: &[u8], functional: bool) -> ServiceOutcome {
        let sid = request[0];
        if obd::is_obd_service(sid) {
            obd::handle_request(ecu, request)
        } else if sid >= FIRST_UDS_SERVICE {
            self.uds.handle(ecu, request, functional)
        } else if functional {
            ServiceOutcome::silent()
        } else {
            debug!(ecu = %ecu.name, service_id = format!("0x{:02X}", sid), "Unsupported OBD mode");
            ServiceOutcome::reply(uds::negative_response(
                sid,
                NegativeResponseCode::ServiceNotSupported,
            ))
        }
    }

    fn enqueue(&mut self, response: PendingResponse) {
        if self.outbound.len() >= MAX_PENDING_RESPONSES {
            if let Some(dropped) = self.outbound.pop_front() {
                warn!(
                    response_id = format!("0x{:03X}", dropped.id),
                    "Outbound queue full, oldest response dropped"
                );
            }
        }
        self.outbound.push_back(response);
    }

    /// Hand due responses to the transport, in order, while it is idle.
    pub fn flush_due(&mut self, link: &mut IsoTpLink, now_ms: u64, sink: &mut dyn FrameSink) {
        while link.is_tx_idle() {
            let due = self
                .outbound
                .front()
                .is_some_and(|response| response.due_ms <= now_ms);
            if !due {
                break;
            }
            let Some(response) = self.outbound.pop_front() else {
                break;
            };
            if let Err(e) = link.send(
                response.id,
                response.extended,
                &response.payload,
                now_ms,
                sink,
            ) {
                warn!(
                    response_id = format!("0x{:03X}", response.id),
                    error = %e,
                    "Response not sent"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faults::FaultSettings;
    use crate::frame::CanFrame;
    use pretty_assertions::assert_eq;

    fn request(id: u32, extended: bool, payload: &[u8]) -> IsoTpMessage {
        IsoTpMessage {
            id,
            extended,
            payload: payload.to_vec(),
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(UdsHandler::with_seed(0xDEAD_BEEF, 7))
    }

    fn pending(dispatcher: &Dispatcher) -> Vec<(u32, Vec<u8>)> {
        dispatcher
            .pending()
            .map(|r| (r.id, r.payload.clone()))
            .collect()
    }

    #[test]
    fn functional_obd_request_reaches_every_ecu() {
        let mut registry = EcuRegistry::with_defaults();
        let mut faults = FaultInjector::with_seed(FaultSettings::default(), 1);
        let mut dispatcher = dispatcher();

        dispatcher.dispatch(
            &mut registry,
            &mut faults,
            &request(0x7DF, false, &[0x01, 0x0D]),
            AddressingMode::Hybrid,
            0,
        );

        assert_eq!(
            pending(&dispatcher),
            vec![
                (0x7E8, vec![0x41, 0x0D, 60]),
                (0x7E9, vec![0x41, 0x0D, 60]),
            ]
        );
    }

    #[test]
    fn physical_request_answers_from_own_id() {
        let mut registry = EcuRegistry::with_defaults();
        let mut faults = FaultInjector::with_seed(FaultSettings::default(), 1);
        let mut dispatcher = dispatcher();

        dispatcher.dispatch(
            &mut registry,
            &mut faults,
            &request(0x18DA_18F1, true, &[0x3E, 0x00]),
            AddressingMode::Hybrid,
            0,
        );
        assert_eq!(pending(&dispatcher), vec![(0x18DA_F118, vec![0x7E, 0x00])]);
    }

    #[test]
    fn disabled_ecu_stays_quiet() {
        let mut registry = EcuRegistry::with_defaults();
        registry.get_mut(1).unwrap().enabled = false;
        let mut faults = FaultInjector::with_seed(FaultSettings::default(), 1);
        let mut dispatcher = dispatcher();

        dispatcher.dispatch(
            &mut registry,
            &mut faults,
            &request(0x7DF, false, &[0x01, 0x0C]),
            AddressingMode::Hybrid,
            0,
        );
        assert_eq!(pending(&dispatcher).len(), 1);
    }

    #[test]
    fn ghost_responders() {
        let mut registry = EcuRegistry::with_defaults();
        let mut faults = FaultInjector::with_seed(
            FaultSettings {
                multiple_responses: true,
                ..Default::default()
            },
            1,
        );
        let mut dispatcher = dispatcher();

        dispatcher.dispatch(
            &mut registry,
            &mut faults,
            &request(0x7E0, false, &[0x3E, 0x00]),
            AddressingMode::Hybrid,
            0,
        );
        let ids: Vec<u32> = pending(&dispatcher).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![0x7E8, 0x7E9]);
    }

    #[test]
    fn silent_mode_and_full_error_rate_drop_everything() {
        let mut registry = EcuRegistry::with_defaults();
        let mut dispatcher = dispatcher();

        for settings in [
            FaultSettings {
                silent_mode: true,
                ..Default::default()
            },
            FaultSettings {
                error_rate_percent: 100,
                ..Default::default()
            },
        ] {
            let mut faults = FaultInjector::with_seed(settings, 3);
            let changed = dispatcher.dispatch(
                &mut registry,
                &mut faults,
                &request(0x7E0, false, &[0x04]),
                AddressingMode::Hybrid,
                0,
            );
            assert!(!changed);
        }
        assert!(pending(&dispatcher).is_empty());
    }

    #[test]
    fn unsupported_mode_rejected_only_when_physical() {
        let mut registry = EcuRegistry::with_defaults();
        let mut faults = FaultInjector::with_seed(FaultSettings::default(), 1);
        let mut dispatcher = dispatcher();

        dispatcher.dispatch(
            &mut registry,
            &mut faults,
            &request(0x7DF, false, &[0x05, 0x01]),
            AddressingMode::Hybrid,
            0,
        );
        assert!(pending(&dispatcher).is_empty());

        dispatcher.dispatch(
            &mut registry,
            &mut faults,
            &request(0x7E0, false, &[0x05, 0x01]),
            AddressingMode::Hybrid,
            0,
        );
        assert_eq!(pending(&dispatcher), vec![(0x7E8, vec![0x7F, 0x05, 0x11])]);
    }

    #[test]
    fn mode_filters_request_family() {
        let mut registry = EcuRegistry::with_defaults();
        let mut faults = FaultInjector::with_seed(FaultSettings::default(), 1);
        let mut dispatcher = dispatcher();

        dispatcher.dispatch(
            &mut registry,
            &mut faults,
            &request(0x7DF, false, &[0x01, 0x0C]),
            AddressingMode::Uds29,
            0,
        );
        assert!(pending(&dispatcher).is_empty());
    }

    #[test]
    fn clear_reports_state_change() {
        let mut registry = EcuRegistry::with_defaults();
        registry.get_mut(0).unwrap().add_dtc("P0300".parse().unwrap());
        let mut faults = FaultInjector::with_seed(FaultSettings::default(), 1);
        let mut dispatcher = dispatcher();

        let changed = dispatcher.dispatch(
            &mut registry,
            &mut faults,
            &request(0x7E0, false, &[0x04]),
            AddressingMode::Hybrid,
            0,
        );
        assert!(changed);
        assert!(registry.get(0).unwrap().active_dtcs().is_empty());
    }

    #[test]
    fn delayed_responses_wait_until_due() {
        let mut registry = EcuRegistry::with_defaults();
        let mut faults = FaultInjector::with_seed(
            FaultSettings {
                frame_delay_ms: 50,
                ..Default::default()
            },
            1,
        );
        let mut dispatcher = dispatcher();
        let mut link = IsoTpLink::new();
        let mut frames: Vec<CanFrame> = Vec::new();

        dispatcher.dispatch(
            &mut registry,
            &mut faults,
            &request(0x7E0, false, &[0x3E, 0x00]),
            AddressingMode::Hybrid,
            100,
        );

        dispatcher.flush_due(&mut link, 149, &mut frames);
        assert!(frames.is_empty());

        dispatcher.flush_due(&mut link, 150, &mut frames);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id(), 0x7E8);
        assert_eq!(&frames[0].data()[..3], &[0x02, 0x7E, 0x00]);
    }

    #[test]
    fn multi_frame_response_holds_back_the_next_one() {
        let mut registry = EcuRegistry::with_defaults();
        let mut faults = FaultInjector::with_seed(FaultSettings::default(), 1);
        let mut dispatcher = dispatcher();
        let mut link = IsoTpLink::new();
        let mut frames: Vec<CanFrame> = Vec::new();

        dispatcher.dispatch(
            &mut registry,
            &mut faults,
            &request(0x7DF, false, &[0x09, 0x02]),
            AddressingMode::Hybrid,
            0,
        );
        dispatcher.flush_due(&mut link, 0, &mut frames);

        // ECM's first frame is out, TCM waits for the transmitter.
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data()[0], 0x10);
        assert_eq!(dispatcher.pending().count(), 1);
    }

    #[test]
    fn queue_is_bounded() {
        let mut dispatcher = dispatcher();
        for i in 0..(MAX_PENDING_RESPONSES as u32 + 2) {
            dispatcher.enqueue(PendingResponse {
                id: i,
                extended: false,
                payload: vec![0x7E, 0x00],
                due_ms: 0,
            });
        }
        assert_eq!(dispatcher.pending().count(), MAX_PENDING_RESPONSES);
        assert_eq!(dispatcher.pending().next().map(|r| r.id), Some(2));
    }
}
