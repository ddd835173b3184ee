//! Dedup window actor, its ticker, and the scan ingress handle.
//!
//! One task owns the `DedupWindow`; everything else talks to it through a
//! single mailbox. Scan callbacks send `Admit`, the ticker sends `Tick`, so
//! admissions and evictions are totally ordered without any lock on the map.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use beacon_core::{
    parse_frame, Admission, Clock, ControlKind, DataFrame, DedupWindow, DetectionRecord,
    LocationProvider, ParsedFrame, RawFrame, WindowStats,
};

use crate::slot::LatestSlot;

/// A batch of detections evicted by one tick.
pub type DetectionBatch = Arc<Vec<DetectionRecord>>;

#[derive(Debug)]
pub enum WindowMsg {
    Admit(DataFrame),
    Tick,
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

pub struct WindowActor {
    window: DedupWindow,
    mailbox: mpsc::Receiver<WindowMsg>,
    output: Arc<LatestSlot<DetectionBatch>>,
    clock: Arc<dyn Clock>,
    location: Arc<dyn LocationProvider>,
}

impl WindowActor {
    pub fn new(
        window: DedupWindow,
        mailbox: mpsc::Receiver<WindowMsg>,
        output: Arc<LatestSlot<DetectionBatch>>,
        clock: Arc<dyn Clock>,
        location: Arc<dyn LocationProvider>,
    ) -> Self {
        WindowActor {
            window,
            mailbox,
            output,
            clock,
            location,
        }
    }

    /// Process messages until shutdown or until every sender is gone.
    pub async fn run(mut self, shutdown: CancellationToken) -> WindowStats {
        info!(window_ms = self.window.window_ms(), "dedup window started");

        loop {
            let msg = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                msg = self.mailbox.recv() => match msg {
                    Some(m) => m,
                    None => break,
                },
            };
            self.handle(msg);
        }

        let stats = self.window.stats();
        info!(
            admitted = stats.admitted,
            duplicates = stats.duplicates,
            evicted = stats.evicted,
            pending = self.window.len(),
            "dedup window stopped"
        );
        stats
    }

    fn handle(&mut self, msg: WindowMsg) {
        match msg {
            WindowMsg::Admit(frame) => {
                let key = frame.dedup_key;
                let now = self.clock.now_ms();
                if self.window.admit(frame, now) == Admission::Duplicate {
                    trace!(key, "duplicate dropped");
                }
            }
            WindowMsg::Tick => self.tick(),
        }
    }

    fn tick(&mut self) {
        let now = self.clock.now_ms();
        let regressions = self.window.stats().clock_regressions;

        let records = self.window.tick(now, self.location.as_ref());

        if self.window.stats().clock_regressions > regressions {
            warn!(
                now,
                reference = self.window.reference_ms(),
                "clock went backwards; keeping previous reference"
            );
        }
        if records.is_empty() {
            return;
        }

        debug!(count = records.len(), pending = self.window.len(), "evicted batch");
        let outcome = self.output.put(Arc::new(records));
        if outcome.replaced_pending || outcome.cancelled_in_flight {
            debug!(
                replaced_pending = outcome.replaced_pending,
                cancelled_in_flight = outcome.cancelled_in_flight,
                "newer batch superseded previous one"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Ticker
// ---------------------------------------------------------------------------

/// Send `Tick` every `period` until shutdown or the mailbox closes.
pub async fn run_ticker(
    mailbox: mpsc::Sender<WindowMsg>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(period_ms = period.as_millis() as u64, "ticker started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        // Waits for mailbox capacity, but never past shutdown.
        let sent = tokio::select! {
            _ = shutdown.cancelled() => break,
            res = mailbox.send(WindowMsg::Tick) => res.is_ok(),
        };
        if !sent {
            debug!("window mailbox closed");
            break;
        }
    }

    debug!("ticker stopped");
}

// ---------------------------------------------------------------------------
// Ingress
// ---------------------------------------------------------------------------

/// Result of handing one raw frame to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    Queued,
    Control(ControlKind),
    Rejected,
    /// Mailbox full; the frame was dropped.
    Dropped,
    Closed,
}

#[derive(Debug, Default)]
struct IngressCounters {
    queued: AtomicU64,
    control: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngressStats {
    pub queued: u64,
    pub control: u64,
    pub rejected: u64,
    pub dropped: u64,
}

/// Cloneable entry point for scan sources. Parses in the caller's context
/// and forwards only data frames to the window.
#[derive(Clone)]
pub struct ScanHandle {
    mailbox: mpsc::Sender<WindowMsg>,
    counters: Arc<IngressCounters>,
}

impl ScanHandle {
    pub fn new(mailbox: mpsc::Sender<WindowMsg>) -> Self {
        ScanHandle {
            mailbox,
            counters: Arc::new(IngressCounters::default()),
        }
    }

    /// Non-blocking submit for radio callbacks.
    pub fn submit(&self, raw: &RawFrame) -> Ingest {
        let frame = match self.classify(raw) {
            Ok(frame) => frame,
            Err(outcome) => return outcome,
        };
        match self.mailbox.try_send(WindowMsg::Admit(frame)) {
            Ok(()) => self.queued(),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(device = %raw.device_address, "window mailbox full; frame dropped");
                Ingest::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Ingest::Closed,
        }
    }

    /// Submit, waiting for mailbox capacity instead of dropping.
    pub async fn submit_wait(&self, raw: &RawFrame) -> Ingest {
        let frame = match self.classify(raw) {
            Ok(frame) => frame,
            Err(outcome) => return outcome,
        };
        match self.mailbox.send(WindowMsg::Admit(frame)).await {
            Ok(()) => self.queued(),
            Err(_) => Ingest::Closed,
        }
    }

    pub fn stats(&self) -> IngressStats {
        IngressStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            control: self.counters.control.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    fn queued(&self) -> Ingest {
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        Ingest::Queued
    }

    fn classify(&self, raw: &RawFrame) -> Result<DataFrame, Ingest> {
        match parse_frame(raw) {
            ParsedFrame::Data(frame) => Ok(frame),
            ParsedFrame::Control(c) => {
                self.counters.control.fetch_add(1, Ordering::Relaxed);
                trace!(kind = c.kind.name(), device = %c.device_address, "control frame skipped");
                Err(Ingest::Control(c.kind))
            }
            ParsedFrame::Rejected(e) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(device = %raw.device_address, error = %e, "malformed frame dropped");
                Err(Ingest::Rejected)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
