//! Fan-out of server-side events to connected front-end clients.
//!
//! Delivery is at-most-once to subscribers connected at publish time. The hub
//! sits on a bounded `tokio::sync::broadcast` channel: publishing never waits
//! on a subscriber, and a subscriber that falls behind skips the oldest events
//! instead of holding the others back.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::call::InboundCallEvent;
use crate::domain::records::{Appointment, GeneralMessage, PrivateMessage, Reminder};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq)]
pub enum RealtimeEvent {
    InboundCall(InboundCallEvent),
    RemindersUpdated(Vec<Reminder>),
    AppointmentsUpdated(Vec<Appointment>),
    MessagesUpdated(Vec<GeneralMessage>),
    PrivateMessageSent(PrivateMessage),
    UserRegistered { username: String },
}

impl RealtimeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InboundCall(_) => "ficheClient",
            Self::RemindersUpdated(_) => "rappelsClientUpdate",
            Self::AppointmentsUpdated(_) => "rendezVousTechnicienUpdate",
            Self::MessagesUpdated(_) => "messageUpdate",
            Self::PrivateMessageSent(_) => "privateMessageUpdate",
            Self::UserRegistered { .. } => "userRegistered",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Self::InboundCall(call) => call.client_card(),
            Self::RemindersUpdated(reminders) => to_payload(self.name(), reminders),
            Self::AppointmentsUpdated(appointments) => to_payload(self.name(), appointments),
            Self::MessagesUpdated(messages) => to_payload(self.name(), messages),
            Self::PrivateMessageSent(message) => to_payload(self.name(), message),
            Self::UserRegistered { username } => serde_json::json!({ "username": username }),
        }
    }

    pub fn into_envelope(self) -> RealtimeEnvelope {
        RealtimeEnvelope { event: self.name().to_owned(), payload: self.payload() }
    }
}

/// Wire shape of one realtime message: `{"event": ..., "payload": ...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEnvelope {
    pub event: String,
    pub payload: Value,
}

#[derive(Clone, Debug)]
pub struct RealtimeHub {
    sender: broadcast::Sender<RealtimeEnvelope>,
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl RealtimeHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Broadcasts `event` and returns how many subscribers it was queued for.
    pub fn publish(&self, event: RealtimeEvent) -> usize {
        let name = event.name();
        match self.sender.send(event.into_envelope()) {
            Ok(receivers) => {
                debug!(
                    event_name = "realtime.published",
                    realtime_event = name,
                    receivers,
                    "realtime event published"
                );
                receivers
            }
            Err(_) => {
                debug!(
                    event_name = "realtime.dropped",
                    realtime_event = name,
                    "no realtime subscribers connected"
                );
                0
            }
        }
    }

    pub fn subscribe(&self) -> RealtimeSubscription {
        RealtimeSubscription { receiver: self.sender.subscribe() }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// One connected client's view of the hub. Dropping it deregisters the client.
#[derive(Debug)]
pub struct RealtimeSubscription {
    receiver: broadcast::Receiver<RealtimeEnvelope>,
}

impl RealtimeSubscription {
    /// Next event for this subscriber, or `None` once the hub is gone.
    pub async fn next(&mut self) -> Option<RealtimeEnvelope> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        event_name = "realtime.subscriber.lagged",
                        skipped,
                        "realtime subscriber fell behind; oldest events were skipped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

fn to_payload<T: Serialize + ?Sized>(event: &str, value: &T) -> Value {
    match serde_json::to_value(value) {
        Ok(payload) => payload,
        Err(error) => {
            warn!(
                event_name = "realtime.payload.encode_failed",
                realtime_event = event,
                error = %error,
                "realtime payload could not be encoded"
            );
            Value::Null
        }
    }
}
