use switchboard_core::InboundCallEvent;
use tokio::sync::broadcast;
use tracing::warn;

use crate::frame::ManagerFrame;

const UNKNOWN_CALLER_ID: &str = "<unknown>";

/// An unsolicited AMI frame carrying an `Event` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagerEvent {
    frame: ManagerFrame,
}

impl ManagerEvent {
    pub fn from_frame(frame: ManagerFrame) -> Self {
        Self { frame }
    }

    pub fn name(&self) -> &str {
        self.frame.get("Event").unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.frame.get(key)
    }

    pub fn frame(&self) -> &ManagerFrame {
        &self.frame
    }

    /// Inbound-call view of the event: a `Newchannel` with a caller number.
    pub fn as_inbound_call(&self) -> Option<InboundCallEvent> {
        if !self.name().eq_ignore_ascii_case("Newchannel") {
            return None;
        }

        let number = caller_id_field(self.get("CallerIDNum"))?;
        let name = caller_id_field(self.get("CallerIDName")).unwrap_or_default();
        Some(InboundCallEvent::new(number, name))
    }
}

fn caller_id_field(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty() && *value != UNKNOWN_CALLER_ID)
}

/// Source of manager events. A subscription only sees events published after
/// it was taken.
pub trait ManagerEventSource: Send + Sync {
    fn subscribe_events(&self) -> EventSubscription;
}

#[derive(Debug)]
pub struct EventSubscription {
    receiver: broadcast::Receiver<ManagerEvent>,
}

impl EventSubscription {
    pub fn from_receiver(receiver: broadcast::Receiver<ManagerEvent>) -> Self {
        Self { receiver }
    }

    /// Next event, or `None` once the source has shut down.
    pub async fn next(&mut self) -> Option<ManagerEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        event_name = "ami.events.lagged",
                        skipped,
                        "manager event subscriber fell behind; events were skipped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
