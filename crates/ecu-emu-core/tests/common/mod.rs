//! Shared test bench: an emulator on an in-memory bus with a manual clock.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ecu_emu_core::faults::{FaultInjector, FaultSettings};
use ecu_emu_core::uds::handler::DEFAULT_SECURITY_KEY_MASK;
use ecu_emu_core::uds::UdsHandler;
use ecu_emu_core::{CanFrame, ConfigRecord, Emulator, FramePort, ManualClock, PortError};

/// Frame port backed by two shared queues.
#[derive(Clone, Default)]
pub struct MemoryPort {
    inbound: Arc<Mutex<VecDeque<CanFrame>>>,
    sent: Arc<Mutex<Vec<CanFrame>>>,
}

impl FramePort for MemoryPort {
    fn send(&mut self, frame: &CanFrame) -> Result<(), PortError> {
        self.sent.lock().unwrap().push(*frame);
        Ok(())
    }

    fn try_receive(&mut self, _timeout: Duration) -> Result<Option<CanFrame>, PortError> {
        Ok(self.inbound.lock().unwrap().pop_front())
    }
}

pub struct Bench {
    pub emulator: Emulator,
    pub clock: ManualClock,
    port: MemoryPort,
}

impl Bench {
    pub fn new() -> Self {
        Self::with_config(&ConfigRecord::default())
    }

    pub fn with_faults(faults: FaultSettings) -> Self {
        let config = ConfigRecord {
            faults,
            ..Default::default()
        };
        Self::with_config(&config)
    }

    pub fn with_config(config: &ConfigRecord) -> Self {
        let port = MemoryPort::default();
        let clock = ManualClock::new(0);
        let emulator = Emulator::new(config, Box::new(port.clone()), Box::new(clock.clone()))
            .with_fault_injector(FaultInjector::with_seed(config.faults.clone(), 42))
            .with_uds_handler(UdsHandler::with_seed(config.security.key_constant, 42));
        Self {
            emulator,
            clock,
            port,
        }
    }

    /// Queue a raw frame for the emulator.
    pub fn push(&self, id: u32, extended: bool, data: &[u8]) {
        let frame = CanFrame::new(id, extended, data).expect("valid test frame");
        self.port.inbound.lock().unwrap().push_back(frame);
    }

    /// Queue a single-frame request and poll once.
    pub fn request(&mut self, id: u32, extended: bool, payload: &[u8]) {
        assert!(payload.len() <= 7);
        let mut data = vec![payload.len() as u8];
        data.extend_from_slice(payload);
        self.push(id, extended, &data);
        self.poll();
    }

    pub fn poll(&mut self) {
        self.emulator.poll().expect("in-memory port never fails");
    }

    pub fn poll_times(&mut self, n: usize) {
        for _ in 0..n {
            self.poll();
        }
    }

    /// Frames sent since the last call.
    pub fn take_sent(&self) -> Vec<CanFrame> {
        std::mem::take(&mut *self.port.sent.lock().unwrap())
    }

    /// Single-frame response payloads sent since the last call, by id.
    pub fn take_single_frames(&self) -> Vec<(u32, Vec<u8>)> {
        self.take_sent()
            .into_iter()
            .map(|frame| {
                let data = frame.data();
                assert_eq!(data[0] >> 4, 0, "expected a single frame, got {frame}");
                let len = (data[0] & 0x0F) as usize;
                (frame.id(), data[1..=len].to_vec())
            })
            .collect()
    }
}

/// Key for a seed under the default security constant.
pub fn default_key(seed: u32) -> u32 {
    seed ^ DEFAULT_SECURITY_KEY_MASK
}
