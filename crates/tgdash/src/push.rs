//! Client half of the push channel.

use futures::StreamExt;
use log::{debug, info, warn};
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use thiserror::Error;
use tgdash_protocol::{BroadcastEvent, decode_event};
use tokio_util::sync::CancellationToken;

/// Event name of the greeting frame sent on connect.
pub const CONNECTION_ESTABLISHED: &str = "connection_established";

#[derive(Debug, Error)]
pub enum PushError {
    #[error("Cannot build event stream request")]
    InvalidRequest,

    /// The server answered the subscription with a non-success status.
    #[error("Event stream rejected with HTTP status {0}")]
    Rejected(u16),

    /// The stream failed in a way retrying will not fix.
    #[error("Event stream failed: {0}")]
    Stream(String),
}

/// Transport hiccups and ended streams are retried by the event source;
/// everything else means the endpoint is not a usable push channel.
fn into_fatal(error: reqwest_eventsource::Error) -> Option<PushError> {
    use reqwest_eventsource::Error;

    match error {
        Error::Transport(_) | Error::StreamEnded => None,
        Error::InvalidStatusCode(status, _) => Some(PushError::Rejected(status.as_u16())),
        other => Some(PushError::Stream(other.to_string())),
    }
}

/// Subscribes to a server's `/api/events` stream and hands decoded events
/// to a callback. Reconnects follow the event source's retry policy.
#[derive(Debug, Clone)]
pub struct PushSubscriber {
    client: Client,
    base_url: String,
    connection_id: Option<String>,
}

impl PushSubscriber {
    pub fn new(base_url: impl Into<String>, connection_id: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            connection_id,
        }
    }

    pub fn events_url(&self) -> String {
        match &self.connection_id {
            Some(id) => format!(
                "{}/api/events?connectionId={}",
                self.base_url,
                urlencoding::encode(id)
            ),
            None => format!("{}/api/events", self.base_url),
        }
    }

    /// Stream events until `cancel` fires or the source gives up.
    ///
    /// A rejected subscription, a non-SSE response, or a source that closes
    /// right after an error is returned as an error.
    pub async fn run<F>(&self, cancel: CancellationToken, mut on_event: F) -> Result<(), PushError>
    where
        F: FnMut(BroadcastEvent),
    {
        let request = self
            .client
            .get(self.events_url())
            .header("Accept", "text/event-stream");
        let mut source = EventSource::new(request).map_err(|_| PushError::InvalidRequest)?;
        let mut last_error: Option<String> = None;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    source.close();
                    return Ok(());
                }
                next = source.next() => next,
            };

            let Some(result) = next else {
                if let Some(err) = last_error {
                    return Err(PushError::Stream(err));
                }
                info!("Event stream closed");
                return Ok(());
            };

            match result {
                Ok(Event::Open) => {
                    last_error = None;
                    debug!("Event stream opened at {}", self.base_url);
                }
                Ok(Event::Message(msg)) if msg.event == CONNECTION_ESTABLISHED => {
                    info!("Connected to {}", self.base_url);
                }
                Ok(Event::Message(msg)) => match decode_event(&msg.data) {
                    Ok(Some(event)) => on_event(event),
                    Ok(None) => debug!("Ignoring event of unknown type"),
                    Err(err) => warn!("Ignoring undecodable event: {}", err),
                },
                Err(err) => {
                    let message = err.to_string();
                    if let Some(fatal) = into_fatal(err) {
                        source.close();
                        return Err(fatal);
                    }
                    warn!("Event stream error, retrying: {}", message);
                    last_error = Some(message);
                }
            }
        }
    }
}
