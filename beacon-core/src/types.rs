//! Shared types, error enum, frame layout constants, and hex helpers.

use serde::Serialize;
use thiserror::Error;

/// All errors produced by beacon-core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BeaconError {
    #[error("invalid frame length: expected {expected} hex chars, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("invalid hex string: {0}")]
    InvalidHex(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("config error: {0}")]
    Config(String),
}

impl From<std::io::Error> for BeaconError {
    fn from(e: std::io::Error) -> Self {
        BeaconError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BeaconError>;

// ---------------------------------------------------------------------------
// Frame layout
// ---------------------------------------------------------------------------

/// Length of a beacon data frame in hex characters (29 bytes incl. service UUID).
pub const DATA_FRAME_LEN: usize = 58;

/// 16-bit service UUID under which beacons advertise their payload.
pub const BEACON_SERVICE_UUID: u16 = 0xFDAF;

/// Group ID range (chars 4..10).
pub const GROUP_ID_RANGE: std::ops::Range<usize> = 4..10;

/// Message type range (chars 10..12).
pub const MSG_TYPE_RANGE: std::ops::Range<usize> = 10..12;

/// Dedup key range (chars 50..58).
pub const DEDUP_KEY_RANGE: std::ops::Range<usize> = 50..58;

pub const GROUP_ID_META: u32 = 0x0000EC;
pub const GROUP_ID_CONTROL: u32 = 0x0000ED;
pub const GROUP_ID_BRIDGE: u32 = 0x0000EE;

/// Bridge management message type for heartbeats.
pub const MSG_TYPE_HEARTBEAT: u8 = 0x02;

// ---------------------------------------------------------------------------
// Hex utilities
// ---------------------------------------------------------------------------

/// True if every byte is an ASCII hex digit.
pub fn is_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Parse an ASCII hex slice into a u32. `None` on overflow or bad digits.
pub fn parse_hex_u32(hex: &str) -> Option<u32> {
    if hex.is_empty() || hex.len() > 8 {
        return None;
    }
    u32::from_str_radix(hex, 16).ok()
}

/// Encode bytes as lowercase hex, the form beacon payloads travel in.
pub fn hex_encode(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for &b in data {
        s.push(HEX_CHARS[(b >> 4) as usize] as char);
        s.push(HEX_CHARS[(b & 0x0F) as usize] as char);
    }
    s
}

const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

// ---------------------------------------------------------------------------
// Signal strength
// ---------------------------------------------------------------------------

/// Coarse signal bucket for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum SignalStrength {
    NoSignal = 0,
    Poor = 1,
    Fair = 2,
    Good = 3,
    Excellent = 4,
}

impl SignalStrength {
    pub fn from_rssi(rssi: i32) -> Self {
        match rssi {
            r if r > -70 => SignalStrength::Excellent,
            -85..=-70 => SignalStrength::Good,
            -100..=-86 => SignalStrength::Fair,
            -110..=-101 => SignalStrength::Poor,
            _ => SignalStrength::NoSignal,
        }
    }
}

impl std::fmt::Display for SignalStrength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalStrength::NoSignal => write!(f, "none"),
            SignalStrength::Poor => write!(f, "poor"),
            SignalStrength::Fair => write!(f, "fair"),
            SignalStrength::Good => write!(f, "good"),
            SignalStrength::Excellent => write!(f, "excellent"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
