//! Parse raw beacon advertisements into classified frames.
//!
//! Responsibilities:
//! - Reject payloads that are not exactly 58 hex characters
//! - Extract the group ID (chars 4-9) and message type (chars 10-11)
//! - Classify gateway/bridge control traffic so it never reaches the window
//! - Extract the dedup key from the trailing 8 characters of data frames

use crate::types::{
    hex_encode, is_hex, parse_hex_u32, BeaconError, BEACON_SERVICE_UUID, DATA_FRAME_LEN,
    DEDUP_KEY_RANGE, GROUP_ID_BRIDGE, GROUP_ID_CONTROL, GROUP_ID_META, GROUP_ID_RANGE,
    MSG_TYPE_HEARTBEAT, MSG_TYPE_RANGE,
};

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// One scan observation as delivered by the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Hex payload, service UUID prefix included.
    pub payload: String,
    pub device_address: String,
    /// RSSI in dBm
    pub signal_level: i32,
    pub received_at_ms: u64,
}

impl RawFrame {
    pub fn new(
        payload: impl Into<String>,
        device_address: impl Into<String>,
        signal_level: i32,
        received_at_ms: u64,
    ) -> Self {
        RawFrame {
            payload: payload.into(),
            device_address: device_address.into(),
            signal_level,
            received_at_ms,
        }
    }

    /// Build a frame from advertisement service data.
    ///
    /// Returns `None` unless the data was advertised under the beacon service
    /// UUID. The payload is the UUID in advertised byte order followed by the
    /// service data, lowercase hex.
    pub fn from_service_data(
        service_uuid: u16,
        data: &[u8],
        device_address: impl Into<String>,
        signal_level: i32,
        received_at_ms: u64,
    ) -> Option<Self> {
        if service_uuid != BEACON_SERVICE_UUID {
            return None;
        }
        let mut payload = hex_encode(&service_uuid.to_be_bytes());
        payload.push_str(&hex_encode(data));
        Some(RawFrame::new(
            payload,
            device_address,
            signal_level,
            received_at_ms,
        ))
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// A beacon data reading. `raw_value` is always exactly 58 hex chars.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub raw_value: String,
    pub dedup_key: u32,
    pub group_id: u32,
    pub message_type: u8,
    pub device_address: String,
    pub signal_level: i32,
    pub received_at_ms: u64,
}

/// Why a frame counts as control traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// Gateway/bridge control group
    Control,
    /// Meta group
    Meta,
    /// Bridge management, any non-heartbeat message
    BridgeConfig,
    /// Bridge management heartbeat
    Heartbeat,
}

impl ControlKind {
    pub fn name(&self) -> &'static str {
        match self {
            ControlKind::Control => "control",
            ControlKind::Meta => "meta",
            ControlKind::BridgeConfig => "bridge-config",
            ControlKind::Heartbeat => "heartbeat",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFrame {
    pub kind: ControlKind,
    pub group_id: u32,
    pub message_type: u8,
    pub device_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedFrame {
    Data(DataFrame),
    Control(ControlFrame),
    Rejected(BeaconError),
}

impl ParsedFrame {
    pub fn is_data(&self) -> bool {
        matches!(self, ParsedFrame::Data(_))
    }

    /// Consume into the data frame, if this is one.
    pub fn into_data(self) -> Option<DataFrame> {
        match self {
            ParsedFrame::Data(f) => Some(f),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Classify a raw frame. Pure; never panics on malformed input.
pub fn parse_frame(raw: &RawFrame) -> ParsedFrame {
    let hex = raw.payload.trim();

    if hex.len() != DATA_FRAME_LEN {
        return ParsedFrame::Rejected(BeaconError::InvalidLength {
            expected: DATA_FRAME_LEN,
            actual: hex.len(),
        });
    }
    if !is_hex(hex) {
        return ParsedFrame::Rejected(BeaconError::InvalidHex(hex.to_string()));
    }

    // All-hex ASCII of the right length: the fixed-range slices below cannot fail.
    let (group_id, message_type, dedup_key) = match (
        parse_hex_u32(&hex[GROUP_ID_RANGE]),
        parse_hex_u32(&hex[MSG_TYPE_RANGE]),
        parse_hex_u32(&hex[DEDUP_KEY_RANGE]),
    ) {
        (Some(g), Some(m), Some(k)) => (g, m as u8, k),
        _ => return ParsedFrame::Rejected(BeaconError::InvalidHex(hex.to_string())),
    };

    if let Some(kind) = control_kind(group_id, message_type) {
        return ParsedFrame::Control(ControlFrame {
            kind,
            group_id,
            message_type,
            device_address: raw.device_address.clone(),
        });
    }

    ParsedFrame::Data(DataFrame {
        raw_value: hex.to_string(),
        dedup_key,
        group_id,
        message_type,
        device_address: raw.device_address.clone(),
        signal_level: raw.signal_level,
        received_at_ms: raw.received_at_ms,
    })
}

fn control_kind(group_id: u32, message_type: u8) -> Option<ControlKind> {
    match group_id {
        GROUP_ID_CONTROL => Some(ControlKind::Control),
        GROUP_ID_META => Some(ControlKind::Meta),
        GROUP_ID_BRIDGE if message_type == MSG_TYPE_HEARTBEAT => Some(ControlKind::Heartbeat),
        GROUP_ID_BRIDGE => Some(ControlKind::BridgeConfig),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a 58-char frame: "fdaf" + group(6) + msg type(2) + filler + key(8).
    pub(crate) fn make_hex(group_id: u32, message_type: u8, key: u32) -> String {
        let filler = "0".repeat(DATA_FRAME_LEN - 4 - 6 - 2 - 8);
        format!("fdaf{group_id:06x}{message_type:02x}{filler}{key:08x}")
    }

    pub(crate) fn make_raw(group_id: u32, message_type: u8, key: u32) -> RawFrame {
        RawFrame::new(make_hex(group_id, message_type, key), "AA:BB:CC:DD:EE:FF", -60, 1000)
    }

    #[test]
    fn test_make_hex_length() {
        assert_eq!(make_hex(0x000050, 0x01, 1).len(), DATA_FRAME_LEN);
    }

    #[test]
    fn test_parse_data_frame() {
        let parsed = parse_frame(&make_raw(0x000050, 0x01, 0xDEADBEEF));
        let frame = parsed.into_data().expect("data frame");
        assert_eq!(frame.dedup_key, 0xDEADBEEF);
        assert_eq!(frame.group_id, 0x000050);
        assert_eq!(frame.message_type, 0x01);
        assert_eq!(frame.raw_value.len(), DATA_FRAME_LEN);
        assert_eq!(frame.device_address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(frame.signal_level, -60);
        assert_eq!(frame.received_at_ms, 1000);
    }

    #[test]
    fn test_dedup_key_is_last_eight_chars() {
        let hex = make_hex(0x000050, 0x01, 0x00000001);
        assert!(hex.ends_with("00000001"));
        let raw = RawFrame::new(hex, "x", 0, 0);
        assert_eq!(parse_frame(&raw).into_data().unwrap().dedup_key, 1);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        for len in [0usize, 14, 57, 59, 64] {
            let raw = RawFrame::new("a".repeat(len), "x", 0, 0);
            match parse_frame(&raw) {
                ParsedFrame::Rejected(BeaconError::InvalidLength { expected, actual }) => {
                    assert_eq!(expected, DATA_FRAME_LEN);
                    assert_eq!(actual, len);
                }
                other => panic!("len {len}: expected rejection, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_parse_rejects_invalid_hex() {
        let mut hex = make_hex(0x000050, 0x01, 1);
        hex.replace_range(20..21, "z");
        let parsed = parse_frame(&RawFrame::new(hex, "x", 0, 0));
        assert!(matches!(parsed, ParsedFrame::Rejected(BeaconError::InvalidHex(_))));
    }

    #[test]
    fn test_control_group() {
        match parse_frame(&make_raw(GROUP_ID_CONTROL, 0x01, 5)) {
            ParsedFrame::Control(c) => assert_eq!(c.kind, ControlKind::Control),
            other => panic!("expected control, got {other:?}"),
        }
    }

    #[test]
    fn test_meta_group() {
        match parse_frame(&make_raw(GROUP_ID_META, 0x05, 5)) {
            ParsedFrame::Control(c) => assert_eq!(c.kind, ControlKind::Meta),
            other => panic!("expected meta, got {other:?}"),
        }
    }

    #[test]
    fn test_bridge_heartbeat_and_config() {
        match parse_frame(&make_raw(GROUP_ID_BRIDGE, MSG_TYPE_HEARTBEAT, 5)) {
            ParsedFrame::Control(c) => assert_eq!(c.kind, ControlKind::Heartbeat),
            other => panic!("expected heartbeat, got {other:?}"),
        }
        match parse_frame(&make_raw(GROUP_ID_BRIDGE, 0x07, 5)) {
            ParsedFrame::Control(c) => assert_eq!(c.kind, ControlKind::BridgeConfig),
            other => panic!("expected bridge config, got {other:?}"),
        }
    }

    #[test]
    fn test_heartbeat_type_outside_bridge_group_is_data() {
        let parsed = parse_frame(&make_raw(0x000050, MSG_TYPE_HEARTBEAT, 9));
        assert!(parsed.is_data());
    }

    #[test]
    fn test_uppercase_hex_accepted() {
        let hex = make_hex(0x0000AB, 0x01, 0xABCDEF01).to_uppercase();
        let frame = parse_frame(&RawFrame::new(hex, "x", 0, 0)).into_data().unwrap();
        assert_eq!(frame.dedup_key, 0xABCDEF01);
    }

    #[test]
    fn test_from_service_data() {
        let data = [0u8; 27];
        let raw = RawFrame::from_service_data(BEACON_SERVICE_UUID, &data, "x", -70, 5).unwrap();
        assert!(raw.payload.starts_with("fdaf"));
        assert_eq!(raw.payload.len(), DATA_FRAME_LEN);

        assert!(RawFrame::from_service_data(0x180F, &data, "x", -70, 5).is_none());
    }
}
