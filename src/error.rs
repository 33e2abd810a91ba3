//! Error types and result definitions for the tuya-hybrid crate.
//! Includes TinyTuya-style error codes and conversion from standard IO/JSON errors.

use thiserror::Error;

/// Represents all possible errors raised while routing between ZCL and the DP tunnel.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HybridError {
    /// Standard IO error (mostly short reads while decoding frames)
    #[error("IO error: {0}")]
    Io(String),

    /// JSON serialization or deserialization error
    #[error("JSON error: {0}")]
    Json(String),

    /// No active mapping exists for the capability
    #[error("No mapping for capability '{0}'")]
    Unmapped(String),

    /// The frame carried a type tag this codec does not know
    #[error("Unknown DP type tag 0x{0:02X}")]
    UnknownDpType(u8),

    /// A declared length does not match the bytes available or the type
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Value too large to be carried by a 16-bit length field
    #[error("DP value too large: {0} bytes (max 65535)")]
    PayloadTooLarge(usize),

    /// The capability value cannot be converted to the DP type
    #[error("Invalid value for {value_type}: {reason}")]
    InvalidValue {
        value_type: &'static str,
        reason: String,
    },

    /// The (scaled) value does not fit the wire representation
    #[error("Value out of range: {0}")]
    ValueOutOfRange(String),

    /// The underlying transmit or native write was rejected
    #[error("Transport error: {0}")]
    Transport(String),

    /// No transport was configured for the selected route
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(&'static str),

    /// The transport reported a timeout
    #[error("Timeout waiting for device")]
    Timeout,

    /// The upward consumer rejected a capability update
    #[error("Capability update rejected: {0}")]
    UpdateRejected(String),

    /// Failed to decode hex data
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Device ID already exists in manager
    #[error("Device ID '{0}' already exists")]
    DuplicateDevice(String),

    /// Device ID not found in manager
    #[error("Device ID '{0}' not found")]
    DeviceNotFound(String),
}

/// A specialized Result type for adapter operations.
pub type Result<T> = std::result::Result<T, HybridError>;

impl From<std::io::Error> for HybridError {
    fn from(err: std::io::Error) -> Self {
        HybridError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for HybridError {
    fn from(err: serde_json::Error) -> Self {
        HybridError::Json(err.to_string())
    }
}

impl From<hex::FromHexError> for HybridError {
    fn from(err: hex::FromHexError) -> Self {
        HybridError::DecodeError(err.to_string())
    }
}

impl HybridError {
    pub fn code(&self) -> u32 {
        match self {
            HybridError::Io(_) => ERR_PAYLOAD,
            HybridError::Json(_) => ERR_JSON,
            HybridError::Unmapped(_) => ERR_FUNCTION,
            HybridError::UnknownDpType(_) => ERR_PAYLOAD,
            HybridError::MalformedFrame(_) => ERR_PAYLOAD,
            HybridError::PayloadTooLarge(_) => ERR_RANGE,
            HybridError::InvalidValue { .. } => ERR_PARAMS,
            HybridError::ValueOutOfRange(_) => ERR_RANGE,
            HybridError::Transport(_) => ERR_CONNECT,
            HybridError::TransportUnavailable(_) => ERR_OFFLINE,
            HybridError::Timeout => ERR_TIMEOUT,
            HybridError::UpdateRejected(_) => ERR_STATE,
            HybridError::DecodeError(_) => ERR_PAYLOAD,
            HybridError::DuplicateDevice(_) => ERR_DUPLICATE,
            HybridError::DeviceNotFound(_) => ERR_NOT_FOUND,
        }
    }

    /// True for failures of the frame codec (as opposed to routing or transport).
    pub fn is_codec_error(&self) -> bool {
        matches!(
            self,
            HybridError::Io(_)
                | HybridError::UnknownDpType(_)
                | HybridError::MalformedFrame(_)
                | HybridError::PayloadTooLarge(_)
                | HybridError::DecodeError(_)
        )
    }
}

// TinyTuya-style response codes
define_error_codes! {
    ERR_SUCCESS = 0 => "Success",
    ERR_JSON = 900 => "Invalid JSON Payload",
    ERR_CONNECT = 901 => "Transport Error: Write Rejected",
    ERR_TIMEOUT = 902 => "Timeout Waiting for Device",
    ERR_RANGE = 903 => "Specified Value Out of Range",
    ERR_PAYLOAD = 904 => "Unexpected Payload from Device",
    ERR_OFFLINE = 905 => "Transport Unavailable",
    ERR_STATE = 906 => "Capability Update Rejected",
    ERR_FUNCTION = 907 => "Function Not Supported by Device",
    ERR_PARAMS = 912 => "Invalid Function Parameters",
    ERR_DUPLICATE = 915 => "Device ID already exists",
    ERR_NOT_FOUND = 916 => "Device ID not found",
}
