//! Frame-line input for replaying captured scans.
//!
//! One frame per line: `hex[;rssi[;address]]`. Blank lines and `#` comments
//! are skipped. The hex is the full service-data value including the `fdaf`
//! prefix; length is left to the frame parser so short captures show up as
//! rejections instead of vanishing.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use beacon_core::{is_hex, RawFrame};

/// Signal level recorded when a line carries no RSSI.
pub const UNKNOWN_SIGNAL_LEVEL: i32 = -127;

/// Device address recorded when a line carries none.
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// Read all frame lines from a capture file.
pub struct FrameReader {
    path: PathBuf,
}

impl FrameReader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        FrameReader {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Read every frame. Frames are stamped 1 ms apart starting at `start_ms`.
    pub fn read_all(&self, start_ms: u64) -> io::Result<Vec<RawFrame>> {
        let content = fs::read_to_string(&self.path)?;
        Ok(content
            .lines()
            .filter_map(|line| parse_frame_line(line, 0))
            .enumerate()
            .map(|(i, mut frame)| {
                frame.received_at_ms = start_ms + i as u64;
                frame
            })
            .collect())
    }
}

/// Parse one capture line into a `RawFrame` received at `received_at_ms`.
pub fn parse_frame_line(line: &str, received_at_ms: u64) -> Option<RawFrame> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let mut fields = line.split(';').map(str::trim);
    let hex = fields.next()?;
    if hex.is_empty() || !is_hex(hex) {
        return None;
    }

    let signal_level = fields
        .next()
        .and_then(|s| s.parse::<i32>().ok())
        .unwrap_or(UNKNOWN_SIGNAL_LEVEL);
    let address = fields
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_ADDRESS);

    Some(RawFrame::new(
        hex.to_ascii_lowercase(),
        address,
        signal_level,
        received_at_ms,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
