//! Error types

use thiserror::Error;

/// Errors returned by the ISO-TP transmit API.
///
/// Framing problems on the receive side are never reported through this type;
/// they discard the transfer and return the link to idle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transmitter busy")]
    Busy,

    #[error("Payload too large: {0} bytes (max 4095)")]
    PayloadTooLarge(usize),

    #[error("Empty payload")]
    EmptyPayload,

    #[error("Invalid CAN id 0x{0:X}")]
    InvalidId(u32),
}

/// Errors from parsing a diagnostic trouble code.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DtcError {
    #[error("DTC must be exactly 5 characters, got {0:?}")]
    InvalidLength(String),

    #[error("Unknown DTC system letter '{0}' (expected P, C, B or U)")]
    InvalidSystem(char),

    #[error("Invalid DTC digits in {0:?}")]
    InvalidDigits(String),
}

/// Errors from the frame I/O collaborator.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("Frame I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Port closed")]
    Closed,
}

/// Configuration load / parse errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
