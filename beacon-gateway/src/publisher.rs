//! Publish batcher: turns evicted batches into envelopes and sends them.
//!
//! One `publish` call draws one sequence number. Every envelope built by the
//! call, one per location group, carries that number on all of its items.
//! Heartbeats draw a number too.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use beacon_core::{
    group_by_location, Clock, Credentials, DetectionRecord, Envelope, LocationProvider,
};

use crate::actor::DetectionBatch;
use crate::slot::LatestSlot;
use crate::transport::{Transport, TransportError};

/// Outcome of one `publish` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishReport {
    pub sequence_id: u32,
    pub envelopes: usize,
    pub sent: usize,
    pub failed: usize,
}

pub struct Publisher {
    transport: Arc<dyn Transport>,
    credentials: Credentials,
    topic: String,
    location: Arc<dyn LocationProvider>,
    clock: Arc<dyn Clock>,
    sequence: AtomicU32,
}

impl Publisher {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Credentials,
        location: Arc<dyn LocationProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let topic = credentials.topic();
        Publisher {
            transport,
            credentials,
            topic,
            location,
            clock,
            sequence: AtomicU32::new(0),
        }
    }

    /// Last sequence number handed out; 0 before the first publish.
    pub fn sequence(&self) -> u32 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Publish one batch. An empty batch sends a heartbeat.
    ///
    /// Groups are sent independently; a failed group is logged and skipped.
    /// Records in a delivered group have their unacknowledged count reset.
    pub async fn publish(&self, batch: &[DetectionRecord]) -> PublishReport {
        let sequence_id = self.sequence.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        let mut report = PublishReport {
            sequence_id,
            ..Default::default()
        };

        if !self.transport.is_connected() {
            if let Err(e) = self.transport.connect(&self.credentials).await {
                warn!(error = %e, sequence_id, "transport connect failed; batch not sent");
                return report;
            }
            info!(topic = %self.topic, "transport connected");
        }

        let now = self.clock.now_ms();

        if batch.is_empty() {
            let envelope =
                Envelope::heartbeat(self.location.current_location(), &self.credentials, now);
            report.envelopes = 1;
            match self.send_envelope(&envelope).await {
                Ok(()) => {
                    report.sent = 1;
                    debug!(sequence_id, "heartbeat sent");
                }
                Err(e) => {
                    report.failed = 1;
                    warn!(error = %e, sequence_id, "heartbeat failed");
                }
            }
            return report;
        }

        let groups = group_by_location(batch);
        report.envelopes = groups.len();
        for group in &groups {
            let envelope = group.to_envelope(sequence_id, &self.credentials, now);
            match self.send_envelope(&envelope).await {
                Ok(()) => {
                    group.mark_delivered();
                    report.sent += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        error = %e,
                        sequence_id,
                        items = group.records.len(),
                        "envelope send failed"
                    );
                }
            }
        }

        debug!(
            sequence_id,
            records = batch.len(),
            envelopes = report.envelopes,
            failed = report.failed,
            "batch published"
        );
        report
    }

    async fn send_envelope(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let payload = envelope.to_json_bytes()?;
        match self.transport.send(&self.topic, &payload).await {
            Err(TransportError::NotConnected) => {
                debug!("transport dropped; reconnecting once");
                self.transport.connect(&self.credentials).await?;
                self.transport.send(&self.topic, &payload).await
            }
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// Publish loop
// ---------------------------------------------------------------------------

/// Consume batches from `slot` until it is closed.
///
/// A publish in progress is abandoned as soon as a newer batch lands in the
/// slot. With `heartbeat` set, an idle interval with no batch publishes an
/// empty batch instead.
pub async fn run_publisher(
    publisher: Arc<Publisher>,
    slot: Arc<LatestSlot<DetectionBatch>>,
    heartbeat: Option<Duration>,
    shutdown: CancellationToken,
) {
    debug!(heartbeat_ms = heartbeat.map(|d| d.as_millis() as u64), "publisher started");

    loop {
        let next = match heartbeat {
            Some(period) => match tokio::time::timeout(period, slot.next()).await {
                Ok(next) => next,
                Err(_) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = publisher.publish(&[]) => {}
                    }
                    continue;
                }
            },
            None => slot.next().await,
        };
        let Some(claim) = next else {
            break;
        };

        tokio::select! {
            biased;
            _ = claim.token.cancelled() => {
                debug!(
                    generation = claim.generation,
                    records = claim.value.len(),
                    "publish superseded"
                );
            }
            _ = publisher.publish(&claim.value) => {}
        }
        slot.finish(claim.generation);
    }

    debug!(sequence = publisher.sequence(), "publisher stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use beacon_core::{
        parse_frame, LocationFix, ManualClock, NoLocation, RawFrame, SharedLocation,
    };

    /// In-memory transport that records every delivered envelope.
    #[derive(Default)]
    pub(crate) struct MemoryTransport {
        connected: AtomicBool,
        pub connects: AtomicU32,
        pub disconnects: AtomicU32,
        pub sent: Mutex<Vec<(String, serde_json::Value)>>,
        /// Number of upcoming sends that fail.
        pub fail_sends: AtomicU32,
        /// Next send reports the connection as lost.
        pub drop_once: AtomicBool,
        /// Refuse every connect attempt.
        pub refuse_connect: AtomicBool,
        /// First send never completes.
        pub stall_first: AtomicBool,
    }

    impl MemoryTransport {
        pub(crate) fn sent(&self) -> Vec<(String, serde_json::Value)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn connect(&self, _credentials: &Credentials) -> Result<(), TransportError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.refuse_connect.load(Ordering::SeqCst) {
                return Err(TransportError::Connect("refused".into()));
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
            if self.drop_once.swap(false, Ordering::SeqCst) {
                self.connected.store(false, Ordering::SeqCst);
                return Err(TransportError::NotConnected);
            }
            if !self.is_connected() {
                return Err(TransportError::NotConnected);
            }
            if self.stall_first.swap(false, Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            let failing = self
                .fail_sends
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(TransportError::Send("injected".into()));
            }
            let value = serde_json::from_slice(payload)?;
            self.sent.lock().unwrap().push((topic.to_string(), value));
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    fn hex(key: u32) -> String {
        format!("fdaf00005001{}{key:08x}", "0".repeat(38))
    }

    fn record(key: u32, location: Option<LocationFix>) -> DetectionRecord {
        let raw = RawFrame::new(hex(key), "AA:BB:CC:DD:EE:FF", -70, 500);
        let frame = parse_frame(&raw).into_data().unwrap();
        DetectionRecord::with_counts(frame, 1, 3, location)
    }

    fn publisher(
        transport: Arc<MemoryTransport>,
        location: Arc<dyn LocationProvider>,
    ) -> Publisher {
        Publisher::new(
            transport,
            Credentials::new("GW01", "token", "owner7"),
            location,
            Arc::new(ManualClock::new(9000)),
        )
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn test_groups_share_one_sequence_id() {
        let transport = Arc::new(MemoryTransport::default());
        let p = publisher(Arc::clone(&transport), Arc::new(NoLocation));
        let l1 = Some(LocationFix::new(1.0, 1.0));
        let l2 = Some(LocationFix::new(2.0, 2.0));
        let batch = vec![record(1, l1), record(2, l2), record(3, l1)];

        let report = p.publish(&batch).await;
        assert_eq!(report.sequence_id, 1);
        assert_eq!(report.envelopes, 2);
        assert_eq!(report.sent, 2);

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "data-prod/owner7/GW01");
        assert_eq!(sent[0].1["items"].as_array().unwrap().len(), 2);
        assert_eq!(sent[1].1["items"].as_array().unwrap().len(), 1);
        for (_, env) in &sent {
            assert_eq!(env["timestamp"], 9000);
            for item in env["items"].as_array().unwrap() {
                assert_eq!(item["sequenceId"], 1);
                assert_eq!(item["timestamp"], 500);
                assert_eq!(item["unacknowledgedCount"], 3);
            }
        }
        assert!(batch.iter().all(|r| r.unacknowledged_count() == 0));
    }

    #[tokio::test]
    async fn test_heartbeat_then_next_sequence() {
        let transport = Arc::new(MemoryTransport::default());
        let location = SharedLocation::with_fix(LocationFix::new(35.5, -82.5));
        let p = publisher(Arc::clone(&transport), Arc::new(location));

        let report = p.publish(&[]).await;
        assert_eq!(report.sequence_id, 1);
        assert_eq!(report.envelopes, 1);

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1["items"].as_array().unwrap().is_empty());
        assert_eq!(sent[0].1["location"]["latitude"], 35.5);

        let report = p.publish(&[record(1, None)]).await;
        assert_eq!(report.sequence_id, 2);
        assert_eq!(transport.sent()[1].1["items"][0]["sequenceId"], 2);
    }

    #[tokio::test]
    async fn test_heartbeat_without_location_uses_origin() {
        let transport = Arc::new(MemoryTransport::default());
        let p = publisher(Arc::clone(&transport), Arc::new(NoLocation));
        p.publish(&[]).await;
        let sent = transport.sent();
        assert_eq!(sent[0].1["location"]["latitude"], 0.0);
        assert_eq!(sent[0].1["location"]["longitude"], 0.0);
    }

    #[tokio::test]
    async fn test_failed_group_does_not_block_others() {
        let transport = Arc::new(MemoryTransport::default());
        transport.fail_sends.store(1, Ordering::SeqCst);
        let p = publisher(Arc::clone(&transport), Arc::new(NoLocation));
        let batch = vec![
            record(1, Some(LocationFix::new(1.0, 1.0))),
            record(2, Some(LocationFix::new(2.0, 2.0))),
        ];

        let report = p.publish(&batch).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(batch[0].unacknowledged_count(), 3);
        assert_eq!(batch[1].unacknowledged_count(), 0);
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_lazy_connect_is_reused() {
        let transport = Arc::new(MemoryTransport::default());
        let p = publisher(Arc::clone(&transport), Arc::new(NoLocation));
        assert_eq!(transport.connects.load(Ordering::SeqCst), 0);

        p.publish(&[record(1, None)]).await;
        p.publish(&[record(2, None)]).await;
        assert_eq!(transport.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_not_connected_reconnects_and_retries_once() {
        let transport = Arc::new(MemoryTransport::default());
        let p = publisher(Arc::clone(&transport), Arc::new(NoLocation));
        p.publish(&[record(1, None)]).await;

        transport.drop_once.store(true, Ordering::SeqCst);
        let report = p.publish(&[record(2, None)]).await;
        assert_eq!(report.sent, 1);
        assert_eq!(transport.connects.load(Ordering::SeqCst), 2);
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_connect_failure_still_advances_sequence() {
        let transport = Arc::new(MemoryTransport::default());
        transport.refuse_connect.store(true, Ordering::SeqCst);
        let p = publisher(Arc::clone(&transport), Arc::new(NoLocation));

        let report = p.publish(&[record(1, None)]).await;
        assert_eq!(
            report,
            PublishReport {
                sequence_id: 1,
                ..Default::default()
            }
        );
        assert!(transport.sent().is_empty());
        assert_eq!(p.sequence(), 1);
    }

    #[tokio::test]
    async fn test_newer_batch_cancels_in_flight_publish() {
        let transport = Arc::new(MemoryTransport::default());
        transport.stall_first.store(true, Ordering::SeqCst);
        let p = Arc::new(publisher(Arc::clone(&transport), Arc::new(NoLocation)));
        let slot: Arc<LatestSlot<DetectionBatch>> = Arc::new(LatestSlot::new());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_publisher(
            Arc::clone(&p),
            Arc::clone(&slot),
            None,
            shutdown.clone(),
        ));

        let batch1: DetectionBatch = Arc::new(vec![record(1, None)]);
        slot.put(Arc::clone(&batch1));
        wait_until(|| !transport.stall_first.load(Ordering::SeqCst)).await;

        let batch2: DetectionBatch = Arc::new(vec![record(2, None)]);
        let outcome = slot.put(Arc::clone(&batch2));
        assert!(outcome.cancelled_in_flight);
        wait_until(|| transport.sent().len() == 1).await;

        assert_eq!(batch1[0].unacknowledged_count(), 3);
        assert_eq!(batch2[0].unacknowledged_count(), 0);
        assert_eq!(transport.sent()[0].1["items"][0]["sequenceId"], 2);

        slot.close();
        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_heartbeat() {
        let transport = Arc::new(MemoryTransport::default());
        let p = Arc::new(publisher(Arc::clone(&transport), Arc::new(NoLocation)));
        let slot: Arc<LatestSlot<DetectionBatch>> = Arc::new(LatestSlot::new());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_publisher(
            Arc::clone(&p),
            Arc::clone(&slot),
            Some(Duration::from_secs(30)),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(61)).await;
        slot.close();
        shutdown.cancel();
        task.await.unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent
            .iter()
            .all(|(_, env)| env["items"].as_array().unwrap().is_empty()));
    }

    #[tokio::test]
    async fn test_loop_exits_when_slot_closed() {
        let transport = Arc::new(MemoryTransport::default());
        let p = Arc::new(publisher(transport, Arc::new(NoLocation)));
        let slot: Arc<LatestSlot<DetectionBatch>> = Arc::new(LatestSlot::new());
        let task = tokio::spawn(run_publisher(
            p,
            Arc::clone(&slot),
            None,
            CancellationToken::new(),
        ));
        slot.close();
        task.await.unwrap();
    }
}
