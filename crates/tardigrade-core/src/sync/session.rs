//! Per-peer sync session.
//!
//! A session owns one [`PeerLink`] and runs both directions over it: the
//! [`Sender`] ships a snapshot of the local store, the [`Receiver`]
//! reassembles whatever the peer ships and hands it to
//! [`RecordStore::merge`].
//!
//! The synchronous `on_*` methods are the link callbacks. [`SyncSession::run`]
//! drives them from a link event channel with a deadline tick and a
//! cancellation token.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{SessionStatus, SyncEvent};
use super::framing;
use super::link::{LinkEvent, PeerLink};
use super::receiver::{ReceiveOutcome, Receiver, ReceiverState};
use super::sender::{PumpOutcome, Sender};
use crate::config::SessionConfig;
use crate::error::{StoreResult, SyncError, SyncResult};
use crate::store::{self, MergeReport, RecordStore};

/// Default capacity for the session event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How often a running session checks its transmission deadline
const DEADLINE_TICK: Duration = Duration::from_secs(1);

/// Protocol engine for one peer
pub struct SyncSession<L: PeerLink> {
    link: L,
    store: Arc<RecordStore>,
    sender: Sender,
    receiver: Receiver,
    auto_resend: bool,
    closed: bool,
    event_tx: broadcast::Sender<SyncEvent>,
}

impl<L: PeerLink> SyncSession<L> {
    /// Create a session over `link`.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::ChunkSize` if the link's chunk size cannot carry a
    /// start-of-message frame.
    pub fn new(link: L, store: Arc<RecordStore>, config: &SessionConfig) -> SyncResult<Self> {
        framing::check_chunk_size(link.max_chunk_size())?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            link,
            store,
            sender: Sender::new(config.max_refused_sends, config.transmission_timeout),
            receiver: Receiver::new(config.max_message_bytes),
            auto_resend: config.auto_resend,
            closed: false,
            event_tx,
        })
    }

    /// Publish events on a shared channel instead of the session's own
    pub fn with_event_sender(mut self, event_tx: broadcast::Sender<SyncEvent>) -> Self {
        self.event_tx = event_tx;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    pub fn peer_id(&self) -> &str {
        self.link.peer_id()
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn status(&self) -> SessionStatus {
        if self.closed {
            return SessionStatus::Closed;
        }
        if let ReceiverState::Receiving { expected, received } = self.receiver.state() {
            return SessionStatus::Receiving { received, expected };
        }
        match self.sender.progress() {
            Some((sent, total)) => SessionStatus::Sending { sent, total },
            None => SessionStatus::Idle,
        }
    }

    /// Snapshot the store and start sending it.
    ///
    /// Returns `Ok(false)` if a transmission is already running. Records
    /// added after the snapshot wait for the next transmission.
    pub fn start_transmission(&mut self, now: Instant) -> SyncResult<bool> {
        let snapshot = self.store.current_file_bytes()?;
        self.begin_snapshot(snapshot, now)
    }

    fn begin_snapshot(&mut self, snapshot: Bytes, now: Instant) -> SyncResult<bool> {
        if !self.queue_snapshot(snapshot, now)? {
            return Ok(false);
        }
        self.pump(now);
        Ok(true)
    }

    fn queue_snapshot(&mut self, snapshot: Bytes, now: Instant) -> SyncResult<bool> {
        let bytes = snapshot.len();
        if !self.sender.begin(snapshot, now)? {
            return Ok(false);
        }
        info!(peer = self.peer_id(), bytes, "Sending store snapshot");
        self.emit(SyncEvent::TransmissionStarted {
            peer_id: self.peer_id().to_string(),
            bytes,
        });
        Ok(true)
    }

    /// Link callback: the link can take more chunks.
    ///
    /// With `auto_resend`, an idle sender starts the next transmission cycle
    /// from a fresh snapshot.
    pub fn on_ready_to_send(&mut self, now: Instant) -> SyncResult<PumpOutcome> {
        if self.sender.is_idle() && self.auto_resend && !self.closed {
            let snapshot = self.store.current_file_bytes()?;
            self.queue_snapshot(snapshot, now)?;
        }
        Ok(self.pump(now))
    }

    fn pump(&mut self, now: Instant) -> PumpOutcome {
        let outcome = self.sender.pump(&mut self.link, now);
        match &outcome {
            PumpOutcome::Completed { bytes } => self.emit(SyncEvent::TransmissionCompleted {
                peer_id: self.peer_id().to_string(),
                bytes: *bytes,
            }),
            PumpOutcome::Aborted(err) => self.emit(SyncEvent::TransmissionAborted {
                peer_id: self.peer_id().to_string(),
                reason: err.to_string(),
            }),
            PumpOutcome::Idle | PumpOutcome::Blocked => {}
        }
        outcome
    }

    /// Link callback: one chunk arrived. Returns a completed message, which
    /// the caller must merge (see [`finish_merge`](Self::finish_merge)).
    pub fn on_chunk_received(&mut self, chunk: &[u8]) -> Option<Bytes> {
        match self.receiver.on_chunk(chunk) {
            ReceiveOutcome::Complete(message) => {
                self.emit(SyncEvent::MessageReceived {
                    peer_id: self.peer_id().to_string(),
                    bytes: message.len(),
                });
                Some(message)
            }
            ReceiveOutcome::Violation(error) => {
                self.emit(SyncEvent::ProtocolViolation {
                    peer_id: self.peer_id().to_string(),
                    error,
                });
                None
            }
            ReceiveOutcome::Ignored
            | ReceiveOutcome::Started { .. }
            | ReceiveOutcome::Buffered { .. } => None,
        }
    }

    /// Feed one chunk and merge any completed message on this thread
    pub fn receive_and_merge(&mut self, chunk: &[u8]) -> Option<StoreResult<MergeReport>> {
        let message = self.on_chunk_received(chunk)?;
        let result = self.store.merge(&message);
        self.finish_merge(&result);
        Some(result)
    }

    /// Report the outcome of merging a received message
    pub fn finish_merge(&self, result: &StoreResult<MergeReport>) {
        match result {
            Ok(report) => self.emit(SyncEvent::Merged {
                peer_id: self.peer_id().to_string(),
                report: report.clone(),
            }),
            Err(e) => {
                warn!(peer = self.peer_id(), error = %e, "Merge failed, store unchanged");
                self.emit(SyncEvent::MergeFailed {
                    peer_id: self.peer_id().to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    /// Link callback: the peer went away
    pub fn on_disconnected(&mut self) {
        if self.closed {
            return;
        }
        info!(peer = self.peer_id(), "Peer disconnected");
        if !self.sender.is_idle() {
            self.sender.cancel();
            self.emit(SyncEvent::TransmissionAborted {
                peer_id: self.peer_id().to_string(),
                reason: "peer disconnected".to_string(),
            });
        }
        self.receiver.reset();
        self.closed = true;
        self.emit(SyncEvent::PeerDisconnected {
            peer_id: self.peer_id().to_string(),
        });
    }

    /// Abort an overdue transmission
    pub fn on_tick(&mut self, now: Instant) {
        if let Some(err) = self.sender.check_deadline(now) {
            self.emit(SyncEvent::TransmissionAborted {
                peer_id: self.peer_id().to_string(),
                reason: err.to_string(),
            });
        }
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl<L: PeerLink + 'static> SyncSession<L> {
    /// Drive the session until the peer disconnects or `cancel` fires.
    ///
    /// Sends one snapshot on start, then reacts to link events. Store reads
    /// and merges run on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::LinkClosed` if the event channel closes without a
    /// [`LinkEvent::Disconnected`].
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<LinkEvent>,
        cancel: CancellationToken,
    ) -> SyncResult<()> {
        debug!(peer = self.peer_id(), "Sync session started");
        self.start_from_store().await;

        let mut tick = tokio::time::interval(DEADLINE_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(peer = self.peer_id(), "Sync session cancelled");
                    self.on_disconnected();
                    break Ok(());
                }
                _ = tick.tick() => self.on_tick(now()),
                event = events.recv() => match event {
                    Some(LinkEvent::ReadyToSend) => {
                        if self.sender.is_idle() && self.auto_resend {
                            self.start_from_store().await;
                        } else {
                            self.pump(now());
                        }
                    }
                    Some(LinkEvent::ChunkReceived(chunk)) => {
                        if let Some(message) = self.on_chunk_received(&chunk) {
                            let result = store::join(self.store.merge_in_background(message)).await;
                            self.finish_merge(&result);
                        }
                    }
                    Some(LinkEvent::Disconnected) => {
                        self.on_disconnected();
                        break Ok(());
                    }
                    None => {
                        self.on_disconnected();
                        break Err(SyncError::LinkClosed);
                    }
                },
            }
        };

        debug!(peer = self.peer_id(), "Sync session ended");
        result
    }

    /// Start sending a fresh snapshot. A failure aborts this transmission
    /// only; the session keeps receiving and retries on the next cycle.
    async fn start_from_store(&mut self) {
        if !self.sender.is_idle() {
            return;
        }
        let store = Arc::clone(&self.store);
        let result = store::join(tokio::task::spawn_blocking(move || store.current_file_bytes()))
            .await
            .map_err(SyncError::from)
            .and_then(|snapshot| self.begin_snapshot(snapshot, now()));

        if let Err(e) = result {
            warn!(peer = self.peer_id(), error = %e, "Cannot start transmission");
            self.emit(SyncEvent::TransmissionAborted {
                peer_id: self.peer_id().to_string(),
                reason: e.to_string(),
            });
        }
    }
}

/// Session clock; follows tokio's clock so paused-time tests work
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}
