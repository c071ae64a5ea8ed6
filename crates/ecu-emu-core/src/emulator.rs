//! The cooperative emulator loop
//!
//! [`Emulator`] owns every piece of core state and a [`FramePort`]. Each call
//! to [`Emulator::poll`] runs one iteration: receive at most one frame, let the
//! transport advance, dispatch at most one reassembled request, and send
//! whatever became due. Nothing blocks except the bounded receive wait.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::addressing::{self, AddressingMode};
use crate::clock::Clock;
use crate::config::{ConfigRecord, EcuRecord, LoggingConfig, SecurityConfig, TransportConfig};
use crate::dispatcher::Dispatcher;
use crate::dtc::DtcCode;
use crate::ecu::{EcuRegistry, EcuState};
use crate::error::{ConfigResult, PortError};
use crate::faults::{FaultInjector, FaultSettings};
use crate::frame::{CanFrame, FrameDirection, FrameLogger, FramePort, TracingFrameLogger};
use crate::isotp::IsoTpLink;
use crate::simulation::{Simulation, SimulationSettings};
use crate::snapshot::{EmulatorSnapshot, Observer};
use crate::uds::UdsHandler;

/// Default bound on how long one poll waits for an inbound frame.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(1);

/// ECU emulator: registry, transport, dispatcher and fault injector bound to
/// one frame port.
pub struct Emulator {
    registry: EcuRegistry,
    link: IsoTpLink,
    dispatcher: Dispatcher,
    faults: FaultInjector,
    port: Box<dyn FramePort + Send>,
    clock: Box<dyn Clock>,
    transport: TransportConfig,
    simulation_settings: SimulationSettings,
    simulation: Simulation,
    observers: Vec<Box<dyn Observer>>,
    logger: Box<dyn FrameLogger>,
    log_frames: bool,
    receive_timeout: Duration,
    outbound: Vec<CanFrame>,
}

impl Emulator {
    /// Build an emulator from a configuration record.
    pub fn new(
        config: &ConfigRecord,
        port: Box<dyn FramePort + Send>,
        clock: Box<dyn Clock>,
    ) -> Self {
        let now_ms = clock.now_ms();
        Self {
            registry: config.build_registry(),
            link: IsoTpLink::new(),
            dispatcher: Dispatcher::new(UdsHandler::new(config.security.key_constant)),
            faults: FaultInjector::new(config.faults.clone()),
            port,
            clock,
            transport: config.transport.clone(),
            simulation_settings: config.simulation,
            simulation: Simulation::new(now_ms),
            observers: Vec::new(),
            logger: Box::new(TracingFrameLogger),
            log_frames: config.logging.can_frames,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            outbound: Vec::new(),
        }
    }

    /// Replace the fault injector, e.g. with a seeded one.
    pub fn with_fault_injector(mut self, faults: FaultInjector) -> Self {
        self.faults = faults;
        self
    }

    /// Replace the UDS handler, e.g. with a seeded one.
    pub fn with_uds_handler(mut self, handler: UdsHandler) -> Self {
        *self.dispatcher.uds_mut() = handler;
        self
    }

    pub fn with_logger(mut self, logger: Box<dyn FrameLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn add_observer(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    // =========================================================================
    // Poll loop
    // =========================================================================

    /// Run one cooperative iteration. Returns whether an inbound frame
    /// arrived, so a caller polling with a zero receive timeout can wait
    /// elsewhere when the bus is idle.
    ///
    /// Only frame port receive errors are returned; transport and service
    /// failures are resolved inside the core.
    pub fn poll(&mut self) -> Result<bool, PortError> {
        let received = self.port.try_receive(self.receive_timeout)?;
        let frame_arrived = received.is_some();
        let now_ms = self.clock.now_ms();

        if let Some(frame) = received {
            self.log_frame(FrameDirection::Rx, &frame);
            if self.accepts(&frame) {
                self.link
                    .on_frame(&frame, now_ms, &self.faults, &mut self.outbound);
            }
        }

        self.link.poll(now_ms, &mut self.faults, &mut self.outbound);

        let mut changed = false;
        if let Some(message) = self.link.take_message() {
            debug!(
                can_id = format!("0x{:03X}", message.id),
                len = message.payload.len(),
                "Request received"
            );
            changed = self.dispatcher.dispatch(
                &mut self.registry,
                &mut self.faults,
                &message,
                self.transport.mode,
                now_ms,
            );
        }

        self.dispatcher
            .flush_due(&mut self.link, now_ms, &mut self.outbound);
        self.transmit();

        if changed {
            self.notify();
        }
        Ok(frame_arrived)
    }

    /// Whether an inbound frame is addressed to one of our ECUs under the
    /// current addressing mode.
    fn accepts(&self, frame: &CanFrame) -> bool {
        addressing::resolve(
            self.transport.mode,
            frame.id(),
            frame.is_extended(),
            &self.registry,
        )
        .is_some()
    }

    fn transmit(&mut self) {
        for frame in std::mem::take(&mut self.outbound) {
            self.log_frame(FrameDirection::Tx, &frame);
            if let Err(e) = self.port.send(&frame) {
                warn!(can_id = format!("0x{:03X}", frame.id()), error = %e, "Frame send failed");
            }
        }
    }

    fn log_frame(&self, direction: FrameDirection, frame: &CanFrame) {
        if self.log_frames {
            self.logger.on_frame(direction, frame);
        }
    }

    // =========================================================================
    // State-changing operations
    // =========================================================================

    /// Advance the live-parameter simulation.
    pub fn tick_simulation(&mut self) -> bool {
        let now_ms = self.clock.now_ms();
        let changed = self
            .simulation
            .tick(&mut self.registry, &self.simulation_settings, now_ms);
        if changed {
            self.notify();
        }
        changed
    }

    /// Record a DTC on one ECU. Returns whether either DTC set changed.
    pub fn add_dtc(&mut self, ecu_index: usize, code: DtcCode) -> bool {
        let Some(ecu) = self.registry.get_mut(ecu_index) else {
            warn!(ecu_index, "add_dtc: no such ECU");
            return false;
        };
        let changed = ecu.add_dtc(code);
        if changed {
            self.notify();
        }
        changed
    }

    /// Scan-tool style clear of one ECU's active DTCs.
    pub fn clear_dtc(&mut self, ecu_index: usize) {
        if let Some(ecu) = self.registry.get_mut(ecu_index) {
            ecu.clear_dtc();
            self.notify();
        }
    }

    /// Complete a driving cycle on one ECU. Returns true when the permanent
    /// DTCs healed.
    pub fn complete_driving_cycle(&mut self, ecu_index: usize) -> bool {
        let Some(ecu) = self.registry.get_mut(ecu_index) else {
            warn!(ecu_index, "complete_driving_cycle: no such ECU");
            return false;
        };
        let healed = ecu.complete_driving_cycle();
        info!(
            ecu = %ecu.name,
            healthy_cycles = ecu.healthy_cycles(),
            healed,
            "Driving cycle completed"
        );
        self.notify();
        healed
    }

    /// Mutate one ECU and notify observers.
    pub fn update_ecu<F>(&mut self, ecu_index: usize, update: F) -> bool
    where
        F: FnOnce(&mut EcuState),
    {
        let Some(ecu) = self.registry.get_mut(ecu_index) else {
            return false;
        };
        update(ecu);
        self.notify();
        true
    }

    /// Abort any in-flight transfer and drop queued responses.
    pub fn reset_link(&mut self) {
        self.link.reset();
        self.dispatcher.clear_pending();
        info!("ISO-TP link reset");
    }

    pub fn set_fault_settings(&mut self, settings: FaultSettings) {
        self.faults.set_settings(settings);
        self.notify();
    }

    pub fn set_simulation_settings(&mut self, settings: SimulationSettings) {
        self.simulation_settings = settings;
        self.notify();
    }

    pub fn set_mode(&mut self, mode: AddressingMode) {
        if mode != self.transport.mode {
            info!(mode = %mode, "Addressing mode changed");
            self.link.reset();
        }
        self.transport.mode = mode;
        self.notify();
    }

    pub fn set_frame_logging(&mut self, enabled: bool) {
        self.log_frames = enabled;
    }

    // =========================================================================
    // Import / export
    // =========================================================================

    /// Current state as a configuration record.
    pub fn export_state(&self) -> ConfigRecord {
        ConfigRecord {
            transport: self.transport.clone(),
            simulation: self.simulation_settings,
            faults: self.faults.settings().clone(),
            security: SecurityConfig {
                key_constant: self.dispatcher.uds().key_mask(),
            },
            logging: LoggingConfig {
                can_frames: self.log_frames,
            },
            ecus: self.registry.iter().map(EcuRecord::from).collect(),
        }
    }

    /// Apply a configuration record. ECUs are matched by name; unknown names
    /// are appended. DTCs are replayed through the lifecycle.
    pub fn import_state(&mut self, config: &ConfigRecord) -> ConfigResult<()> {
        config.validate()?;

        if config.transport.mode != self.transport.mode {
            self.link.reset();
        }
        self.transport = config.transport.clone();
        self.simulation_settings = config.simulation;
        self.faults.set_settings(config.faults.clone());
        self.dispatcher
            .uds_mut()
            .set_key_mask(config.security.key_constant);
        self.log_frames = config.logging.can_frames;

        for record in &config.ecus {
            match self.registry.index_by_name(&record.name) {
                Some(index) => {
                    if let Some(ecu) = self.registry.get_mut(index) {
                        record.apply_to(ecu);
                    }
                }
                None => {
                    let index = self.registry.push(record.to_state());
                    info!(ecu = %record.name, index, "ECU added");
                }
            }
        }

        info!(ecus = config.ecus.len(), "State imported");
        self.notify();
        Ok(())
    }

    // =========================================================================
    // Observation
    // =========================================================================

    pub fn snapshot(&self) -> EmulatorSnapshot {
        EmulatorSnapshot::capture(
            &self.registry,
            self.transport.mode,
            self.faults.settings(),
            &self.simulation_settings,
        )
    }

    fn notify(&self) {
        if self.observers.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for observer in &self.observers {
            observer.notify(&snapshot);
        }
    }

    pub fn registry(&self) -> &EcuRegistry {
        &self.registry
    }

    /// Direct access for setup; observers are not notified.
    pub fn registry_mut(&mut self) -> &mut EcuRegistry {
        &mut self.registry
    }

    pub fn link(&self) -> &IsoTpLink {
        &self.link
    }

    pub fn fault_settings(&self) -> &FaultSettings {
        self.faults.settings()
    }

    pub fn simulation_settings(&self) -> &SimulationSettings {
        &self.simulation_settings
    }

    pub fn mode(&self) -> AddressingMode {
        self.transport.mode
    }

    pub fn transport(&self) -> &TransportConfig {
        &self.transport
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}
