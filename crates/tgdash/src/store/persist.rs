//! Debounced durable writes of the message list.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::retention::StoredMessage;
use crate::storage::KeyValueStore;

/// Quiet period after the last change before the list is written.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(750);

enum Command {
    Save(Vec<StoredMessage>),
    Remove,
    Flush(oneshot::Sender<()>),
}

/// Background writer owned by a message store.
///
/// Every `schedule` restarts the quiet period, so a burst of changes ends in
/// a single write of the final state. The task is cancelled when the writer
/// is dropped; anything still pending at that point is discarded.
pub struct DebouncedWriter {
    tx: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

impl DebouncedWriter {
    pub fn spawn(kv: Arc<dyn KeyValueStore>, key: impl Into<String>, delay: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(rx, kv, key.into(), delay, cancel.clone()));
        Self {
            tx,
            cancel,
            _task: task,
        }
    }

    /// Queue `items` as the next state to write.
    pub fn schedule(&self, items: Vec<StoredMessage>) {
        if self.tx.send(Command::Save(items)).is_err() {
            warn!("Message writer has stopped; change not persisted");
        }
    }

    /// Drop any pending write and remove the persisted list.
    pub fn remove(&self) {
        if self.tx.send(Command::Remove).is_err() {
            warn!("Message writer has stopped; clear not persisted");
        }
    }

    /// Write any pending state now and wait for it.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

impl Drop for DebouncedWriter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<Command>,
    kv: Arc<dyn KeyValueStore>,
    key: String,
    delay: Duration,
    cancel: CancellationToken,
) {
    let mut pending: Option<Vec<StoredMessage>> = None;

    loop {
        let command = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            command = rx.recv() => match command {
                Some(command) => command,
                None => break,
            },
            _ = tokio::time::sleep(delay), if pending.is_some() => {
                if let Some(items) = pending.take() {
                    write(kv.as_ref(), &key, &items).await;
                }
                continue;
            }
        };

        match command {
            Command::Save(items) => pending = Some(items),
            Command::Remove => {
                pending = None;
                if let Err(err) = kv.remove(&key).await {
                    warn!("Failed to remove persisted messages: {}", err);
                }
            }
            Command::Flush(ack) => {
                if let Some(items) = pending.take() {
                    write(kv.as_ref(), &key, &items).await;
                }
                let _ = ack.send(());
            }
        }
    }
}

async fn write(kv: &dyn KeyValueStore, key: &str, items: &[StoredMessage]) {
    let raw = match serde_json::to_string(items) {
        Ok(raw) => raw,
        Err(err) => {
            warn!("Failed to serialize messages: {}", err);
            return;
        }
    };
    match kv.set(key, &raw).await {
        Ok(()) => debug!("Persisted {} messages", items.len()),
        Err(err) => warn!("Failed to persist messages: {}", err),
    }
}
