//! Fault injection
//!
//! Named toggles consulted by the ISO-TP link and the dispatcher to provoke
//! tester error paths on demand.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::isotp::pdu::FlowStatus;

/// Chance that a consecutive frame is sent with a corrupted sequence number
/// while `incorrect_sequence` is enabled.
const INCORRECT_SEQUENCE_PROBABILITY: f64 = 1.0 / 3.0;

/// Fault toggles, serialisable as part of the configuration record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultSettings {
    /// Randomly send consecutive frames with sequence number + 1.
    pub incorrect_sequence: bool,
    /// Suppress every response.
    pub silent_mode: bool,
    /// Every enabled ECU answers physically addressed requests too.
    pub multiple_responses: bool,
    /// Send consecutive frames back to back regardless of negotiated STmin.
    pub ignore_st_min: bool,
    /// Answer every first frame with flow control "Wait".
    pub wrong_flow_control: bool,
    /// Abort multi-frame transmissions after the first consecutive frame.
    pub partial_transfer: bool,
    /// Percentage (0-100) of inbound requests dropped before processing.
    pub error_rate_percent: u8,
    /// Delay applied to every response, in milliseconds.
    pub frame_delay_ms: u32,
}

/// Fault toggles plus the random source used for probabilistic faults.
#[derive(Debug, Clone)]
pub struct FaultInjector {
    settings: FaultSettings,
    rng: StdRng,
}

impl FaultInjector {
    pub fn new(settings: FaultSettings) -> Self {
        Self {
            settings,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic injector for reproducible runs.
    pub fn with_seed(settings: FaultSettings, seed: u64) -> Self {
        Self {
            settings,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn settings(&self) -> &FaultSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut FaultSettings {
        &mut self.settings
    }

    pub fn set_settings(&mut self, settings: FaultSettings) {
        self.settings = settings;
    }

    /// Flow status to answer a first frame with.
    pub fn flow_status_for_first_frame(&self) -> FlowStatus {
        if self.settings.wrong_flow_control {
            FlowStatus::Wait
        } else {
            FlowStatus::ContinueToSend
        }
    }

    /// Sequence number to put on the wire for the next consecutive frame.
    pub fn sequence_number(&mut self, sequence: u8) -> u8 {
        if self.settings.incorrect_sequence && self.rng.gen_bool(INCORRECT_SEQUENCE_PROBABILITY) {
            let corrupted = sequence.wrapping_add(1) & 0x0F;
            debug!(expected = sequence, sent = corrupted, "Injecting sequence error");
            return corrupted;
        }
        sequence
    }

    /// Effective inter-frame delay for a negotiated STmin.
    pub fn separation_time_ms(&self, negotiated_ms: u64) -> u64 {
        if self.settings.ignore_st_min {
            0
        } else {
            negotiated_ms
        }
    }

    pub fn abort_after_first_consecutive_frame(&self) -> bool {
        self.settings.partial_transfer
    }

    /// Roll the error-injection dice for one inbound request.
    pub fn should_drop_request(&mut self) -> bool {
        let rate = self.settings.error_rate_percent.min(100);
        rate > 0 && self.rng.gen_range(0..100u8) < rate
    }

    pub fn is_silent(&self) -> bool {
        self.settings.silent_mode
    }

    pub fn multiple_responses(&self) -> bool {
        self.settings.multiple_responses
    }

    pub fn response_delay_ms(&self) -> u64 {
        u64::from(self.settings.frame_delay_ms)
    }
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self::new(FaultSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_inject_nothing() {
        let mut faults = FaultInjector::with_seed(FaultSettings::default(), 7);
        assert_eq!(faults.flow_status_for_first_frame(), FlowStatus::ContinueToSend);
        assert_eq!(faults.separation_time_ms(20), 20);
        for seq in 0..16 {
            assert_eq!(faults.sequence_number(seq), seq);
        }
        assert!((0..1000).all(|_| !faults.should_drop_request()));
    }

    #[test]
    fn wrong_flow_control_answers_wait() {
        let faults = FaultInjector::with_seed(
            FaultSettings {
                wrong_flow_control: true,
                ..Default::default()
            },
            1,
        );
        assert_eq!(faults.flow_status_for_first_frame(), FlowStatus::Wait);
    }

    #[test]
    fn incorrect_sequence_corrupts_some_frames() {
        let mut faults = FaultInjector::with_seed(
            FaultSettings {
                incorrect_sequence: true,
                ..Default::default()
            },
            42,
        );
        let corrupted = (0..300).filter(|_| faults.sequence_number(5) != 5).count();
        assert!(corrupted > 0 && corrupted < 300);
    }

    #[test]
    fn full_error_rate_drops_everything() {
        let mut faults = FaultInjector::with_seed(
            FaultSettings {
                error_rate_percent: 100,
                ..Default::default()
            },
            3,
        );
        assert!((0..100).all(|_| faults.should_drop_request()));
    }

    #[test]
    fn ignore_st_min_zeroes_delay() {
        let faults = FaultInjector::with_seed(
            FaultSettings {
                ignore_st_min: true,
                ..Default::default()
            },
            0,
        );
        assert_eq!(faults.separation_time_ms(127), 0);
    }
}
