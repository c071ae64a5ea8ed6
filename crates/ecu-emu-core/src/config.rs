//! Emulator configuration
//!
//! [`ConfigRecord`] mirrors the ECU table plus the global toggles. It is what
//! the binary reads at startup and what state export/import exchanges.
//! CAN ids and the security constant accept `"0x7E8"` strings or integers.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::addressing::AddressingMode;
use crate::dtc::DtcCode;
use crate::ecu::{
    EcuRegistry, EcuState, LiveParameters, Mode06Test, SupportedPids, MAX_MODE06_TESTS,
};
use crate::error::{ConfigError, ConfigResult};
use crate::faults::FaultSettings;
use crate::frame::{EXTENDED_ID_MAX, STANDARD_ID_MAX};
use crate::simulation::SimulationSettings;
use crate::uds::handler::DEFAULT_SECURITY_KEY_MASK;

const MAX_VIN_LEN: usize = 17;
const MAX_CALIBRATION_ID_LEN: usize = 16;

/// Complete emulator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRecord {
    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub simulation: SimulationSettings,

    #[serde(default)]
    pub faults: FaultSettings,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Emulated ECUs in addressing order. Empty means the built-in ECM/TCM.
    #[serde(default = "default_ecus")]
    pub ecus: Vec<EcuRecord>,
}

fn default_ecus() -> Vec<EcuRecord> {
    vec![
        EcuRecord::from(&EcuState::default_ecm()),
        EcuRecord::from(&EcuState::default_tcm()),
    ]
}

impl Default for ConfigRecord {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            simulation: SimulationSettings::default(),
            faults: FaultSettings::default(),
            security: SecurityConfig::default(),
            logging: LoggingConfig::default(),
            ecus: default_ecus(),
        }
    }
}

impl ConfigRecord {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from a JSON file
    pub fn load_json(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Pick the parser from the file extension (`.json`, `.yaml`/`.yml`,
    /// anything else is TOML).
    pub fn load_any(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::load_json(path),
            Some("yaml" | "yml") => Self::load_yaml(path),
            _ => Self::load(path),
        }
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check limits serde cannot express.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.faults.error_rate_percent > 100 {
            return Err(ConfigError::Invalid(format!(
                "error_rate_percent {} exceeds 100",
                self.faults.error_rate_percent
            )));
        }
        for ecu in &self.ecus {
            ecu.validate()?;
        }
        for (i, ecu) in self.ecus.iter().enumerate() {
            let clash = self.ecus[..i].iter().any(|other| {
                other.address_11 == ecu.address_11
                    || other.address_29 & 0xFF == ecu.address_29 & 0xFF
            });
            if clash {
                return Err(ConfigError::Invalid(format!(
                    "ECU {} shares an address with another ECU",
                    ecu.name
                )));
            }
        }
        Ok(())
    }

    /// ECU table described by this record.
    pub fn build_registry(&self) -> EcuRegistry {
        if self.ecus.is_empty() {
            return EcuRegistry::with_defaults();
        }
        EcuRegistry::new(self.ecus.iter().map(EcuRecord::to_state).collect())
    }
}

// =============================================================================
// Sections
// =============================================================================

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// CAN interface
    pub interface: String,

    /// Request id families to answer
    pub mode: AddressingMode,

    /// Bus bitrate in bit/s; brought up by the OS, logged only
    pub bitrate: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            interface: "vcan0".to_string(),
            mode: AddressingMode::default(),
            bitrate: 500_000,
        }
    }
}

/// Security access configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Key = seed XOR key_constant
    #[serde(
        deserialize_with = "deserialize_hex_u32",
        serialize_with = "serialize_hex_u32"
    )]
    pub key_constant: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            key_constant: DEFAULT_SECURITY_KEY_MASK,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log every raw CAN frame
    pub can_frames: bool,
}

// =============================================================================
// ECU records
// =============================================================================

/// Serialisable form of one [`EcuState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EcuRecord {
    pub name: String,

    /// 11-bit response id
    #[serde(
        deserialize_with = "deserialize_hex_u32",
        serialize_with = "serialize_hex_u32"
    )]
    pub address_11: u32,

    /// 29-bit response id
    #[serde(
        deserialize_with = "deserialize_hex_u32",
        serialize_with = "serialize_hex_u32"
    )]
    pub address_29: u32,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub vin: String,

    #[serde(default)]
    pub calibration_id: String,

    #[serde(default)]
    pub cvn: String,

    #[serde(default = "default_software_version")]
    pub software_version: String,

    /// Active codes, restored through the DTC lifecycle on import
    #[serde(default)]
    pub dtcs: Vec<DtcCode>,

    #[serde(default)]
    pub permanent_dtcs: Vec<DtcCode>,

    #[serde(default)]
    pub live: LiveParameters,

    #[serde(default)]
    pub supported_pids: SupportedPids,

    #[serde(default)]
    pub mode06_tests: Vec<Mode06Test>,
}

fn default_enabled() -> bool {
    true
}

fn default_software_version() -> String {
    "V1.0".to_string()
}

impl EcuRecord {
    fn validate(&self) -> ConfigResult<()> {
        let invalid = |what: String| Err(ConfigError::Invalid(format!("ECU {}: {}", self.name, what)));

        if self.name.is_empty() {
            return Err(ConfigError::Invalid("ECU without a name".to_string()));
        }
        if self.vin.len() > MAX_VIN_LEN {
            return invalid(format!("VIN longer than {MAX_VIN_LEN} characters"));
        }
        if self.calibration_id.len() > MAX_CALIBRATION_ID_LEN {
            return invalid(format!(
                "calibration id longer than {MAX_CALIBRATION_ID_LEN} characters"
            ));
        }
        if !self.cvn.is_empty() && hex::decode(&self.cvn).is_err() {
            return invalid(format!("CVN {:?} is not hex", self.cvn));
        }
        if self.address_11 > STANDARD_ID_MAX {
            return invalid(format!("address_11 0x{:X} is not an 11-bit id", self.address_11));
        }
        if self.address_29 > EXTENDED_ID_MAX {
            return invalid(format!("address_29 0x{:X} is not a 29-bit id", self.address_29));
        }
        if self.mode06_tests.len() > MAX_MODE06_TESTS {
            return invalid(format!("more than {MAX_MODE06_TESTS} Mode 06 tests"));
        }
        Ok(())
    }

    /// Overwrite `ecu` with this record. Both DTC sets are replaced; active
    /// codes go through the lifecycle so the freeze frame is recaptured from
    /// the imported live parameters.
    pub fn apply_to(&self, ecu: &mut EcuState) {
        ecu.name = self.name.clone();
        ecu.address_11 = self.address_11;
        ecu.address_29 = self.address_29;
        ecu.enabled = self.enabled;
        ecu.vin = self.vin.clone();
        ecu.calibration_id = self.calibration_id.clone();
        ecu.cvn = self.cvn.clone();
        ecu.software_version = self.software_version.clone();
        ecu.live = self.live.clone();
        ecu.supported_pids = self.supported_pids;
        ecu.mode06_tests = self.mode06_tests.clone();

        ecu.clear_dtc();
        ecu.permanent_dtcs.clear();
        ecu.healthy_cycles = 0;
        for code in &self.dtcs {
            ecu.add_dtc(*code);
        }
        for code in &self.permanent_dtcs {
            ecu.add_permanent_dtc(*code);
        }
        ecu.live.distance_with_mil = self.live.distance_with_mil;
    }

    pub fn to_state(&self) -> EcuState {
        let mut ecu = EcuState::new(self.name.clone(), self.address_11, self.address_29);
        self.apply_to(&mut ecu);
        ecu
    }
}

impl From<&EcuState> for EcuRecord {
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
            dtcs: ecu.active_dtcs().to_vec(),
            permanent_dtcs: ecu.permanent_dtcs().to_vec(),
            live: ecu.live.clone(),
            supported_pids: ecu.supported_pids,
            mode06_tests: ecu.mode06_tests.clone(),
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Deserialize a hex u32 (supports "0x7E8" or 2024)
fn deserialize_hex_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HexOrInt {
        Hex(String),
        Int(u32),
    }

    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Hex(s) => {
            let s = s.trim();
            let digits = s
                .strip_prefix("0x")
                .or_else(|| s.strip_prefix("0X"))
                .unwrap_or(s);
            u32::from_str_radix(digits, 16).map_err(|e| D::Error::custom(e.to_string()))
        }
    }
}

fn serialize_hex_u32<S>(value: &u32, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&format!("0x{value:X}"))
}
