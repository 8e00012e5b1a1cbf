//! Discovery sweep
//!
//! A third-party home automation integration may have retained discovery
//! topics for a device under `<prefix>/<component>/<deviceId>/...`. The
//! bridge never tracked those, so on removal it subscribes to
//! `<prefix>/+/<deviceId>/#`, clears every retained message the broker
//! replays, and unsubscribes when the grace period ends.
//!
//! Inbound messages reach a sweep through [`SweepRegistry::offer`], called
//! by the ingest path before routing. A sweep stops on its deadline or when
//! its cancellation token fires, whichever comes first. Failures are logged,
//! never surfaced.

use crate::bus::{topic_matches, Bus, InboundMessage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct SweepEntry {
    id: u64,
    filter: String,
    sender: mpsc::UnboundedSender<InboundMessage>,
}

/// Filters of the sweeps currently listening.
#[derive(Default)]
pub struct SweepRegistry {
    entries: Mutex<Vec<SweepEntry>>,
    next_id: AtomicU64,
}

impl SweepRegistry {
    fn lock(&self) -> MutexGuard<'_, Vec<SweepEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands the message to every sweep whose filter matches. Returns true
    /// if at least one sweep took it.
    pub fn offer(&self, message: &InboundMessage) -> bool {
        let entries = self.lock();
        let mut taken = false;
        for entry in entries.iter() {
            if topic_matches(&message.topic, &entry.filter) && entry.sender.send(message.clone()).is_ok() {
                taken = true;
            }
        }
        taken
    }

    pub fn active(&self) -> usize {
        self.lock().len()
    }

    fn insert(&self, filter: &str) -> (u64, mpsc::UnboundedReceiver<InboundMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.lock().push(SweepEntry {
            id,
            filter: filter.to_string(),
            sender,
        });
        (id, receiver)
    }

    fn remove(&self, id: u64) {
        self.lock().retain(|entry| entry.id != id);
    }
}

pub struct SweepHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Ends the sweep before its deadline.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!("Discovery sweep task failed: {}", e);
        }
    }
}

/// Starts a sweep over `filter`. Returns `None` if the subscription could
/// not be placed.
pub async fn start_sweep<B: Bus>(
    bus: Arc<B>,
    registry: Arc<SweepRegistry>,
    filter: String,
    grace: Duration,
    token: CancellationToken,
) -> Option<SweepHandle> {
    // registered before subscribing so no retained replay is missed
    let (id, mut receiver) = registry.insert(&filter);
    if let Err(e) = bus.subscribe(&filter).await {
        warn!("Discovery cleanup for {} skipped: {}", filter, e);
        registry.remove(id);
        return None;
    }
    debug!("Discovery sweep on {} for {:?}", filter, grace);

    let deadline = Instant::now() + grace;
    let task_token = token.clone();
    let task = tokio::spawn(async move {
        let mut cleared = 0usize;
        loop {
            tokio::select! {
                _ = task_token.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => break,
                message = receiver.recv() => {
                    let Some(message) = message else { break };
                    if !message.retained || message.payload.is_empty() {
                        continue;
                    }
                    match tokio::time::timeout_at(deadline, bus.publish(&message.topic, Vec::new(), true)).await {
                        Ok(Ok(())) => cleared += 1,
                        Ok(Err(e)) => warn!("Failed to clear discovery topic {}: {}", message.topic, e),
                        Err(_) => warn!("Timeout clearing discovery topic {}", message.topic),
                    }
                }
            }
        }

        registry.remove(id);
        if let Err(e) = bus.unsubscribe(&filter).await {
            warn!("Failed to unsubscribe from {}: {}", filter, e);
        }
        info!("Discovery sweep on {} finished, {} topics cleared", filter, cleared);
    });

    Some(SweepHandle { token, task })
}
