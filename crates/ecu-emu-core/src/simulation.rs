//! Live parameter simulation
//!
//! Optional drive-cycle effects applied from a periodic tick: an oscillating
//! engine speed, misfire and lean-mixture faults, and the distance counter
//! that runs while the MIL is lit.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dtc::DtcCode;
use crate::ecu::EcuRegistry;

/// Random/multiple cylinder misfire detected.
pub const MISFIRE_DTC: DtcCode = DtcCode::powertrain(300);
/// System too lean (bank 1).
pub const LEAN_MIXTURE_DTC: DtcCode = DtcCode::powertrain(171);

const RPM_CENTER: f64 = 2500.0;
const RPM_AMPLITUDE: f64 = 1500.0;
const RPM_PERIOD_MS: f64 = 5000.0;

/// Engine speed above which the misfire fault triggers.
pub const MISFIRE_RPM_THRESHOLD: u32 = 3500;

/// Long-term fuel trim forced by the lean-mixture fault, in percent.
pub const LEAN_FUEL_TRIM: f32 = 25.0;

/// One km of MIL distance is added per interval while codes are active.
pub const MIL_DISTANCE_INTERVAL_MS: u64 = 5000;

/// Simulation toggles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub dynamic_rpm: bool,
    pub misfire: bool,
    pub lean_mixture: bool,
}

/// Timer state carried between ticks.
#[derive(Debug, Clone, Default)]
pub struct Simulation {
    last_distance_ms: u64,
}

impl Simulation {
    pub fn new(now_ms: u64) -> Self {
        Self {
            last_distance_ms: now_ms,
        }
    }

    /// Apply one simulation step. The first ECU of the registry is the
    /// engine controller. Returns whether any ECU state changed.
    pub fn tick(
        &mut self,
        registry: &mut EcuRegistry,
        settings: &SimulationSettings,
        now_ms: u64,
    ) -> bool {
        let mut changed = false;

        if let Some(engine) = registry.get_mut(0) {
            if settings.dynamic_rpm {
                let rpm = dynamic_rpm(now_ms);
                if rpm != engine.live.engine_rpm {
                    engine.live.engine_rpm = rpm;
                    changed = true;
                }
            }

            if settings.misfire && engine.live.engine_rpm > MISFIRE_RPM_THRESHOLD {
                if engine.add_dtc(MISFIRE_DTC) {
                    info!(ecu = %engine.name, rpm = engine.live.engine_rpm, "Misfire detected");
                    changed = true;
                }
            }

            if settings.lean_mixture {
                if engine.live.long_term_fuel_trim != LEAN_FUEL_TRIM {
                    engine.live.long_term_fuel_trim = LEAN_FUEL_TRIM;
                    changed = true;
                }
                changed |= engine.add_dtc(LEAN_MIXTURE_DTC);
            }
        }

        if now_ms.saturating_sub(self.last_distance_ms) >= MIL_DISTANCE_INTERVAL_MS {
            self.last_distance_ms = now_ms;
            for ecu in registry.iter_mut().filter(|ecu| ecu.mil_on()) {
                ecu.live.distance_with_mil = ecu.live.distance_with_mil.saturating_add(1);
                debug!(ecu = %ecu.name, km = ecu.live.distance_with_mil, "MIL distance");
                changed = true;
            }
        }

        changed
    }
}

/// `2500 + 1500 * sin(2π t / 5000 ms)`
pub fn dynamic_rpm(now_ms: u64) -> u32 {
    let phase = 2.0 * PI * (now_ms as f64) / RPM_PERIOD_MS;
    (RPM_CENTER + RPM_AMPLITUDE * phase.sin()).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rpm_wave() {
        assert_eq!(dynamic_rpm(0), 2500);
        assert_eq!(dynamic_rpm(1250), 4000);
        assert_eq!(dynamic_rpm(2500), 2500);
        assert_eq!(dynamic_rpm(3750), 1000);
    }

    #[test]
    fn misfire_above_threshold() {
        let mut registry = EcuRegistry::with_defaults();
        let mut sim = Simulation::new(0);
        let settings = SimulationSettings {
            dynamic_rpm: true,
            misfire: true,
            ..Default::default()
        };

        assert!(sim.tick(&mut registry, &settings, 100));
        assert!(registry.get(0).unwrap().active_dtcs().is_empty());

        sim.tick(&mut registry, &settings, 1250);
        let ecm = registry.get(0).unwrap();
        assert_eq!(ecm.active_dtcs(), &[MISFIRE_DTC]);
        assert_eq!(ecm.freeze_frame().unwrap().engine_rpm, 4000);
        assert!(registry.get(1).unwrap().active_dtcs().is_empty());
    }

    #[test]
    fn lean_mixture_sets_trim_and_code() {
        let mut registry = EcuRegistry::with_defaults();
        let mut sim = Simulation::new(0);
        let settings = SimulationSettings {
            lean_mixture: true,
            ..Default::default()
        };

        assert!(sim.tick(&mut registry, &settings, 100));
        let ecm = registry.get(0).unwrap();
        assert_eq!(ecm.live.long_term_fuel_trim, LEAN_FUEL_TRIM);
        assert_eq!(ecm.active_dtcs()[0].to_string(), "P0171");

        // Steady state: nothing new to report.
        assert!(!sim.tick(&mut registry, &settings, 200));
    }

    #[test]
    fn mil_distance_accumulates_while_lit() {
        let mut registry = EcuRegistry::with_defaults();
        registry.get_mut(1).unwrap().add_dtc("P0700".parse().unwrap());
        let mut sim = Simulation::new(0);
        let settings = SimulationSettings::default();

        assert!(!sim.tick(&mut registry, &settings, 4999));
        assert!(sim.tick(&mut registry, &settings, 5000));
        assert!(sim.tick(&mut registry, &settings, 10_000));

        assert_eq!(registry.get(0).unwrap().live.distance_with_mil, 0);
        assert_eq!(registry.get(1).unwrap().live.distance_with_mil, 2);
    }
}
