//! Time-windowed deduplication of beacon data frames.
//!
//! Pure state machine with no I/O and no timers. The caller feeds admissions and
//! ticks in a single sequence and forwards the detections each tick returns.
//!
//! A beacon repeats the same payload many times per second. The window keeps
//! the first capture of each dedup key and drops later repeats; once an entry
//! is older than the window it is evicted as a `DetectionRecord`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::frame::DataFrame;
use crate::location::{LocationFix, LocationProvider};

/// Window length in milliseconds.
pub const WINDOW_MS: u64 = 1000;

/// Default tick period in milliseconds.
pub const TICK_PERIOD_MS: u64 = 1000;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// First capture of a dedup key within the live window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowEntry {
    pub dedup_key: u32,
    pub frame: DataFrame,
    pub admitted_at_ms: u64,
}

/// A detection evicted from the window, ready to publish.
///
/// Everything is fixed at construction except the unacknowledged counter,
/// which the publisher resets once the record has been delivered.
#[derive(Debug)]
pub struct DetectionRecord {
    pub frame: DataFrame,
    pub occurrence_count: u32,
    pub location: Option<LocationFix>,
    unacknowledged: AtomicU32,
}

impl DetectionRecord {
    pub fn new(frame: DataFrame, location: Option<LocationFix>) -> Self {
        Self::with_counts(frame, 1, 0, location)
    }

    pub fn with_counts(
        frame: DataFrame,
        occurrence_count: u32,
        unacknowledged_count: u32,
        location: Option<LocationFix>,
    ) -> Self {
        DetectionRecord {
            frame,
            occurrence_count: occurrence_count.max(1),
            location,
            unacknowledged: AtomicU32::new(unacknowledged_count),
        }
    }

    pub fn dedup_key(&self) -> u32 {
        self.frame.dedup_key
    }

    pub fn unacknowledged_count(&self) -> u32 {
        self.unacknowledged.load(Ordering::Acquire)
    }

    /// Acknowledge delivery.
    pub fn mark_delivered(&self) {
        self.unacknowledged.store(0, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Window
// ---------------------------------------------------------------------------

/// Outcome of a single admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Key already pending; the earlier capture was kept.
    Duplicate,
}

/// Running counters, for logging by the caller.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WindowStats {
    pub admitted: u64,
    pub duplicates: u64,
    pub evicted: u64,
    pub ticks: u64,
    pub clock_regressions: u64,
}

/// Map of dedup key to first-seen entry.
pub struct DedupWindow {
    window_ms: u64,
    pending: HashMap<u32, WindowEntry>,
    reference_ms: u64,
    stats: WindowStats,
}

impl DedupWindow {
    pub fn new(window_ms: u64) -> Self {
        DedupWindow {
            window_ms,
            pending: HashMap::new(),
            reference_ms: 0,
            stats: WindowStats::default(),
        }
    }

    /// Admit a data frame. Repeats of a pending key are dropped, not merged.
    ///
    /// The admission time never precedes the reference clock, so a wall
    /// clock that stepped back cannot age a new entry past the window.
    pub fn admit(&mut self, frame: DataFrame, now_ms: u64) -> Admission {
        let key = frame.dedup_key;
        if self.pending.contains_key(&key) {
            self.stats.duplicates += 1;
            return Admission::Duplicate;
        }
        self.pending.insert(
            key,
            WindowEntry {
                dedup_key: key,
                frame,
                admitted_at_ms: now_ms.max(self.reference_ms),
            },
        );
        self.stats.admitted += 1;
        Admission::Admitted
    }

    /// Advance the reference clock and evict entries older than the window.
    ///
    /// Each evicted entry becomes a `DetectionRecord` stamped with the
    /// provider's location at eviction time. Returns an empty vec when
    /// nothing expired; callers must not emit empty batches.
    pub fn tick(&mut self, now_ms: u64, location: &dyn LocationProvider) -> Vec<DetectionRecord> {
        self.stats.ticks += 1;

        // Never let the reference clock run backwards.
        if now_ms < self.reference_ms {
            self.stats.clock_regressions += 1;
        } else {
            self.reference_ms = now_ms;
        }

        if self.pending.is_empty() {
            return Vec::new();
        }

        let reference = self.reference_ms;
        let window = self.window_ms;
        let expired: Vec<u32> = self
            .pending
            .values()
            .filter(|e| e.admitted_at_ms.saturating_add(window) < reference)
            .map(|e| e.dedup_key)
            .collect();

        let mut records = Vec::with_capacity(expired.len());
        for key in expired {
            if let Some(entry) = self.pending.remove(&key) {
                records.push(DetectionRecord::new(entry.frame, location.current_location()));
            }
        }
        self.stats.evicted += records.len() as u64;
        records
    }

    pub fn contains(&self, dedup_key: u32) -> bool {
        self.pending.contains_key(&dedup_key)
    }

    pub fn entry(&self, dedup_key: u32) -> Option<&WindowEntry> {
        self.pending.get(&dedup_key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn reference_ms(&self) -> u64 {
        self.reference_ms
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub fn stats(&self) -> WindowStats {
        self.stats
    }
}

impl Default for DedupWindow {
    fn default() -> Self {
        DedupWindow::new(WINDOW_MS)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
