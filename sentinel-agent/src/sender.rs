//! Sender state machine
//!
//! `Disconnected -> Connecting -> Streaming -> Disconnected -> ...` until the
//! cancellation token fires, then `Cancelled`.
//!
//! - A failed connect or a failed write waits a fixed `retry_delay`, then
//!   reconnects. No exponential growth, no retry limit.
//! - The batch whose write failed is dropped. Sending resumes with the next
//!   tick after reconnection.
//! - Cancellation is checked while connecting, while backing off, while
//!   waiting for the next tick and while the samplers run (they run on the
//!   blocking pool). An open stream is closed gracefully (bounded
//!   by `close_timeout`) before `run` returns.

use crate::collector::BatchAssembler;
use crate::config::AgentConfig;
use crate::transport::{BatchSink, Transport, TransportError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Disconnected,
    Connecting,
    Streaming,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderSettings {
    pub interval: Duration,
    pub retry_delay: Duration,
    pub close_timeout: Duration,
}

impl SenderSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            interval: config.collection_interval(),
            retry_delay: config.retry_delay(),
            close_timeout: config.close_timeout(),
        }
    }
}

impl Default for SenderSettings {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

/// Counters returned by `Sender::run`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub connect_attempts: u64,
    pub streams_opened: u64,
    pub batches_sent: u64,
}

enum StreamEnd {
    Cancelled,
    Failed(TransportError),
}

pub struct Sender<T: Transport> {
    transport: T,
    assembler: Arc<Mutex<BatchAssembler>>,
    settings: SenderSettings,
    state: watch::Sender<SenderState>,
    stats: SenderStats,
}

impl<T: Transport> Sender<T> {
    pub fn new(transport: T, assembler: BatchAssembler, settings: SenderSettings) -> Self {
        let (state, _) = watch::channel(SenderState::Disconnected);
        Self {
            transport,
            assembler: Arc::new(Mutex::new(assembler)),
            settings,
            state,
            stats: SenderStats::default(),
        }
    }

    /// Follow state transitions
    pub fn subscribe(&self) -> watch::Receiver<SenderState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SenderState {
        *self.state.borrow()
    }

    pub async fn run(mut self, cancel: CancellationToken) -> SenderStats {
        let retry_delay = self.settings.retry_delay;

        loop {
            self.set_state(SenderState::Connecting);
            self.stats.connect_attempts += 1;

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                opened = self.transport.open() => opened,
            };

            match opened {
                Ok(sink) => {
                    self.stats.streams_opened += 1;
                    self.set_state(SenderState::Streaming);
                    info!("Streaming metrics for {} to HQ", self.assembler.lock().source_id());

                    match self.stream(sink, &cancel).await {
                        StreamEnd::Cancelled => break,
                        StreamEnd::Failed(e) => {
                            warn!("Stream error: {}, retrying in {:?}", e, retry_delay)
                        }
                    }
                }
                Err(e) => warn!("Failed to connect to HQ: {}, retrying in {:?}", e, retry_delay),
            }

            self.set_state(SenderState::Disconnected);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(retry_delay) => {}
            }
        }

        self.set_state(SenderState::Cancelled);
        info!(
            "Sender stopped after {} batch(es) on {} stream(s)",
            self.stats.batches_sent, self.stats.streams_opened
        );
        self.stats
    }

    /// Periodic sending on one open stream
    async fn stream(&mut self, mut sink: T::Sink, cancel: &CancellationToken) -> StreamEnd {
        let period = self.settings.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // sysinfo scans are synchronous
            let assembler = self.assembler.clone();
            let collected = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                collected = tokio::task::spawn_blocking(move || assembler.lock().collect()) => collected,
            };
            let batch = match collected {
                Ok(batch) => batch,
                Err(e) => {
                    warn!("Collection task failed: {}", e);
                    continue;
                }
            };
            let count = batch.len();

            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                sent = sink.send(batch) => Some(sent),
            };

            match sent {
                None => break,
                Some(Ok(())) => {
                    self.stats.batches_sent += 1;
                    debug!("Sent batch with {} metrics", count);
                }
                // sink dropped here, with its connection
                Some(Err(e)) => return StreamEnd::Failed(e),
            }
        }

        self.close(sink).await;
        StreamEnd::Cancelled
    }

    async fn close(&self, sink: T::Sink) {
        match timeout(self.settings.close_timeout, sink.close()).await {
            Ok(Ok(ack)) => info!("HQ closed stream: {}", ack.message),
            Ok(Err(e)) => warn!("Error closing stream: {}", e),
            Err(_) => warn!(
                "No acknowledgement from HQ within {:?}, dropping stream",
                self.settings.close_timeout
            ),
        }
    }

    fn set_state(&self, state: SenderState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Sender {:?} -> {:?}", previous, state);
        }
    }
}
