//! Pipeline lifecycle: wires the window actor, ticker, and publisher together
//! and tears them down in order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use beacon_core::config::WindowConfig;
use beacon_core::{Clock, Credentials, DedupWindow, LocationProvider, WindowStats};

use crate::actor::{run_ticker, DetectionBatch, IngressStats, ScanHandle, WindowActor};
use crate::publisher::{run_publisher, Publisher};
use crate::slot::LatestSlot;
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub window_ms: u64,
    pub tick_period: Duration,
    pub mailbox_capacity: usize,
    pub heartbeat: Option<Duration>,
}

impl From<&WindowConfig> for PipelineConfig {
    fn from(c: &WindowConfig) -> Self {
        PipelineConfig {
            window_ms: c.window_ms,
            tick_period: Duration::from_millis(c.tick_ms.max(1)),
            mailbox_capacity: c.mailbox_capacity.max(1),
            heartbeat: c.heartbeat_ms.map(Duration::from_millis),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig::from(&WindowConfig::default())
    }
}

/// Counters gathered at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineReport {
    pub window: WindowStats,
    pub ingress: IngressStats,
    pub last_sequence: u32,
}

pub struct Pipeline {
    handle: ScanHandle,
    slot: Arc<LatestSlot<DetectionBatch>>,
    publisher: Arc<Publisher>,
    ticker_stop: CancellationToken,
    ticker: JoinHandle<()>,
    publisher_stop: CancellationToken,
    publisher_task: JoinHandle<()>,
    actor_stop: CancellationToken,
    actor: JoinHandle<WindowStats>,
}

impl Pipeline {
    /// Spawn the actor, ticker, and publish loop on the current runtime.
    pub fn start(
        config: PipelineConfig,
        credentials: Credentials,
        transport: Arc<dyn Transport>,
        location: Arc<dyn LocationProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.mailbox_capacity);
        let slot: Arc<LatestSlot<DetectionBatch>> = Arc::new(LatestSlot::new());

        info!(
            gateway = %credentials.gateway_id,
            window_ms = config.window_ms,
            tick_ms = config.tick_period.as_millis() as u64,
            mailbox = config.mailbox_capacity,
            "starting pipeline"
        );

        let actor_stop = CancellationToken::new();
        let actor = WindowActor::new(
            DedupWindow::new(config.window_ms),
            rx,
            Arc::clone(&slot),
            Arc::clone(&clock),
            Arc::clone(&location),
        );
        let actor = tokio::spawn(actor.run(actor_stop.clone()));

        let ticker_stop = CancellationToken::new();
        let ticker = tokio::spawn(run_ticker(
            tx.clone(),
            config.tick_period,
            ticker_stop.clone(),
        ));

        let publisher = Arc::new(Publisher::new(transport, credentials, location, clock));
        let publisher_stop = CancellationToken::new();
        let publisher_task = tokio::spawn(run_publisher(
            Arc::clone(&publisher),
            Arc::clone(&slot),
            config.heartbeat,
            publisher_stop.clone(),
        ));

        Pipeline {
            handle: ScanHandle::new(tx),
            slot,
            publisher,
            ticker_stop,
            ticker,
            publisher_stop,
            publisher_task,
            actor_stop,
            actor,
        }
    }

    /// Ingress handle for scan sources.
    pub fn handle(&self) -> ScanHandle {
        self.handle.clone()
    }

    /// Stop the ticker, cancel any in-flight publish, release the transport,
    /// then stop the window. Each step is best-effort.
    pub async fn shutdown(self) -> PipelineReport {
        self.ticker_stop.cancel();
        if let Err(e) = self.ticker.await {
            warn!(error = %e, "ticker task failed");
        }

        self.slot.close();
        self.publisher_stop.cancel();
        if let Err(e) = self.publisher_task.await {
            warn!(error = %e, "publisher task failed");
        }

        if let Err(e) = self.publisher.transport().disconnect().await {
            warn!(error = %e, "transport disconnect failed");
        }

        self.actor_stop.cancel();
        let window = match self.actor.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "window task failed");
                WindowStats::default()
            }
        };

        let report = PipelineReport {
            window,
            ingress: self.handle.stats(),
            last_sequence: self.publisher.sequence(),
        };
        info!(
            admitted = report.window.admitted,
            duplicates = report.window.duplicates,
            evicted = report.window.evicted,
            dropped = report.ingress.dropped,
            last_sequence = report.last_sequence,
            "pipeline stopped"
        );
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
