//! UDS negative response codes

use std::fmt;

/// Negative response codes this ECU can answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegativeResponseCode {
    ServiceNotSupported,
    SubFunctionNotSupported,
    IncorrectMessageLengthOrFormat,
    ConditionsNotCorrect,
    RequestSequenceError,
    RequestOutOfRange,
    InvalidKey,
    /// Any other code, kept for decoding.
    Unknown(u8),
}

impl NegativeResponseCode {
    /// ISO 14229-1 suppresses these for functionally addressed requests so a
    /// broadcast does not draw a flood of rejections.
    pub fn suppressed_on_functional(&self) -> bool {
        matches!(
            self,
            Self::ServiceNotSupported | Self::SubFunctionNotSupported | Self::RequestOutOfRange
        )
    }
}

impl From<u8> for NegativeResponseCode {
    fn from(value: u8) -> Self {
        match value {
            0x11 => Self::ServiceNotSupported,
            0x12 => Self::SubFunctionNotSupported,
            0x13 => Self::IncorrectMessageLengthOrFormat,
            0x22 => Self::ConditionsNotCorrect,
            0x24 => Self::RequestSequenceError,
            0x31 => Self::RequestOutOfRange,
            0x35 => Self::InvalidKey,
            other => Self::Unknown(other),
        }
    }
}

impl From<NegativeResponseCode> for u8 {
    fn from(nrc: NegativeResponseCode) -> Self {
        match nrc {
            NegativeResponseCode::ServiceNotSupported => 0x11,
            NegativeResponseCode::SubFunctionNotSupported => 0x12,
            NegativeResponseCode::IncorrectMessageLengthOrFormat => 0x13,
            NegativeResponseCode::ConditionsNotCorrect => 0x22,
            NegativeResponseCode::RequestSequenceError => 0x24,
            NegativeResponseCode::RequestOutOfRange => 0x31,
            NegativeResponseCode::InvalidKey => 0x35,
            NegativeResponseCode::Unknown(v) => v,
        }
    }
}

impl fmt::UpperHex for NegativeResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value: u8 = (*self).into();
        fmt::UpperHex::fmt(&value, f)
    }
}

impl fmt::Display for NegativeResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceNotSupported => write!(f, "ServiceNotSupported"),
            Self::SubFunctionNotSupported => write!(f, "SubFunctionNotSupported"),
            Self::IncorrectMessageLengthOrFormat => write!(f, "IncorrectMessageLengthOrFormat"),
            Self::ConditionsNotCorrect => write!(f, "ConditionsNotCorrect"),
            Self::RequestSequenceError => write!(f, "RequestSequenceError"),
            Self::RequestOutOfRange => write!(f, "RequestOutOfRange"),
            Self::InvalidKey => write!(f, "InvalidKey"),
            Self::Unknown(v) => write!(f, "Unknown(0x{v:02X})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_conversion() {
        for raw in [0x11u8, 0x12, 0x13, 0x22, 0x24, 0x31, 0x35, 0x78] {
            let nrc = NegativeResponseCode::from(raw);
            assert_eq!(u8::from(nrc), raw);
        }
        assert_eq!(
            NegativeResponseCode::from(0x78),
            NegativeResponseCode::Unknown(0x78)
        );
    }

    #[test]
    fn formatting() {
        assert_eq!(format!("{:02X}", NegativeResponseCode::InvalidKey), "35");
        assert_eq!(NegativeResponseCode::Unknown(0x7F).to_string(), "Unknown(0x7F)");
    }
}
