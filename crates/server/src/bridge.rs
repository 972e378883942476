//! Forwards inbound calls seen on the manager link to the realtime hub.

use std::sync::Arc;
use std::time::Duration;

use switchboard_ami::{ManagerEvent, ManagerEventSource};
use switchboard_core::realtime::{RealtimeEvent, RealtimeHub};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const RESUBSCRIBE_DELAY: Duration = Duration::from_millis(250);

pub struct EventBridge {
    source: Arc<dyn ManagerEventSource>,
    hub: RealtimeHub,
    resubscribe_delay: Duration,
    forwarded: u64,
}

impl EventBridge {
    pub fn new(source: Arc<dyn ManagerEventSource>, hub: RealtimeHub) -> Self {
        Self { source, hub, resubscribe_delay: RESUBSCRIBE_DELAY, forwarded: 0 }
    }

    pub fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    /// Publishes `event` when it is an inbound call. Returns whether it was.
    pub fn handle(&mut self, event: &ManagerEvent) -> bool {
        let Some(call) = event.as_inbound_call() else {
            return false;
        };

        info!(
            event_name = "bridge.inbound_call",
            caller_number = %call.caller_number,
            "inbound call forwarded to clients"
        );
        self.hub.publish(RealtimeEvent::InboundCall(call));
        self.forwarded += 1;
        true
    }

    /// Consumes manager events until `shutdown` flips to true. A subscription
    /// that ends is replaced after a short delay. Returns the number of calls
    /// forwarded over the bridge's lifetime.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> u64 {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let mut events = self.source.subscribe_events();
            debug!(event_name = "bridge.subscribed", "event bridge subscribed to manager events");

            loop {
                tokio::select! {
                    event = events.next() => match event {
                        Some(event) => {
                            self.handle(&event);
                        }
                        None => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return self.forwarded;
                        }
                    }
                }
            }

            warn!(
                event_name = "bridge.subscription_ended",
                delay_ms = self.resubscribe_delay.as_millis() as u64,
                "manager event subscription ended; resubscribing"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.resubscribe_delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.forwarded
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<u64> {
        tokio::spawn(self.run(shutdown))
    }
}
