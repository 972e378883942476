use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use switchboard_core::config::ManagerConfig;
use switchboard_core::{CallDialer, OriginateRequest, OriginateResult, RejectReason};
use tracing::{info, warn};

use crate::action::ManagerAction;
use crate::link::{ActionError, ActionSender};

/// Extra wait on top of the dial timeout: the PBX only answers an `Originate`
/// once the dial attempt has resolved.
pub const RESPONSE_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OriginateSettings {
    pub channel_technology: String,
    pub context: String,
}

impl Default for OriginateSettings {
    fn default() -> Self {
        Self { channel_technology: "PJSIP".to_owned(), context: "from-internal".to_owned() }
    }
}

impl OriginateSettings {
    pub fn from_config(config: &ManagerConfig) -> Self {
        Self {
            channel_technology: config.channel_technology.clone(),
            context: config.context.clone(),
        }
    }
}

pub struct CallOriginator {
    sender: Arc<dyn ActionSender>,
    settings: OriginateSettings,
}

impl CallOriginator {
    pub fn new(sender: Arc<dyn ActionSender>, settings: OriginateSettings) -> Self {
        Self { sender, settings }
    }

    pub async fn submit(&self, request: OriginateRequest) -> OriginateResult {
        let action = ManagerAction::originate(
            &request,
            &self.settings.channel_technology,
            &self.settings.context,
        );
        let deadline = request.timeout + RESPONSE_GRACE;

        let result = match self.sender.send_action_with_timeout(action, deadline).await {
            Ok(response) => OriginateResult::Accepted {
                action_id: response.action_id().unwrap_or_default().to_owned(),
            },
            Err(ActionError::ConnectionUnavailable) => {
                OriginateResult::Rejected(RejectReason::ConnectionUnavailable)
            }
            Err(ActionError::Rejected(message)) => {
                OriginateResult::Rejected(RejectReason::Manager(message))
            }
            Err(ActionError::Timeout) => OriginateResult::TimedOut,
            Err(ActionError::Invalid(message)) => {
                OriginateResult::Rejected(RejectReason::InvalidRequest(message))
            }
        };

        if result.is_accepted() {
            info!(
                event_name = "ami.originate.accepted",
                from = %request.from_extension,
                to = %request.to_destination,
                "outbound call placed"
            );
        } else {
            warn!(
                event_name = "ami.originate.failed",
                from = %request.from_extension,
                to = %request.to_destination,
                outcome = %result.describe(),
                "outbound call was not placed"
            );
        }

        result
    }
}

#[async_trait]
impl CallDialer for CallOriginator {
    async fn originate(&self, from: &str, to: &str) -> OriginateResult {
        match OriginateRequest::new(from, to) {
            Ok(request) => self.submit(request).await,
            Err(error) => {
                warn!(event_name = "ami.originate.invalid", error = %error, "originate request refused");
                OriginateResult::Rejected(RejectReason::InvalidRequest(error.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use switchboard_core::{CallDialer, OriginateResult, RejectReason};
    use tokio::sync::Mutex;

    use super::{CallOriginator, OriginateSettings, RESPONSE_GRACE};
    use crate::action::{ManagerAction, ManagerResponse};
    use crate::frame::ManagerFrame;
    use crate::link::{ActionError, ActionSender};

    #[derive(Default)]
    struct ScriptedSender {
        results: Mutex<VecDeque<Result<ManagerResponse, ActionError>>>,
        sent: Mutex<Vec<(ManagerAction, Duration)>>,
    }

    impl ScriptedSender {
        fn with_script(results: Vec<Result<ManagerResponse, ActionError>>) -> Self {
            Self { results: Mutex::new(results.into()), sent: Mutex::new(Vec::new()) }
        }

        async fn sent(&self) -> Vec<(ManagerAction, Duration)> {
            self.sent.lock().await.clone()
        }
    }

    #[async_trait]
    impl ActionSender for ScriptedSender {
        async fn send_action_with_timeout(
            &self,
            action: ManagerAction,
            timeout: Duration,
        ) -> Result<ManagerResponse, ActionError> {
            self.sent.lock().await.push((action, timeout));
            self.results.lock().await.pop_front().unwrap_or(Err(ActionError::ConnectionUnavailable))
        }
    }

    fn success(action_id: &str) -> ManagerResponse {
        ManagerResponse::from_frame(
            ManagerFrame::new()
                .with("Response", "Success")
                .with("ActionID", action_id)
                .with("Message", "Originate successfully queued"),
        )
    }

    #[tokio::test]
    async fn accepted_originate_uses_configured_channel_and_grace() {
        let sender = Arc::new(ScriptedSender::with_script(vec![Ok(success("sb-3"))]));
        let originator = CallOriginator::new(sender.clone(), OriginateSettings::default());

        let result = originator.originate("1001", "1002").await;
        assert_eq!(result, OriginateResult::Accepted { action_id: "sb-3".to_owned() });

        let sent = sender.sent().await;
        assert_eq!(sent.len(), 1);
        let (action, timeout) = &sent[0];
        assert_eq!(action.name(), "Originate");
        assert_eq!(action.get("Channel"), Some("PJSIP/1001"));
        assert_eq!(action.get("Context"), Some("from-internal"));
        assert_eq!(action.get("Exten"), Some("1002"));
        assert_eq!(action.get("CallerID"), Some("poste 1001"));
        assert_eq!(action.get("Timeout"), Some("30000"));
        assert_eq!(*timeout, Duration::from_secs(30) + RESPONSE_GRACE);
    }

    #[tokio::test]
    async fn action_errors_map_to_originate_outcomes() {
        let sender = Arc::new(ScriptedSender::with_script(vec![
            Err(ActionError::ConnectionUnavailable),
            Err(ActionError::Rejected("Originate failed".to_owned())),
            Err(ActionError::Timeout),
        ]));
        let originator = CallOriginator::new(sender, OriginateSettings::default());

        assert_eq!(
            originator.originate("1001", "1002").await,
            OriginateResult::Rejected(RejectReason::ConnectionUnavailable)
        );
        assert_eq!(
            originator.originate("1001", "1002").await,
            OriginateResult::Rejected(RejectReason::Manager("Originate failed".to_owned()))
        );
        assert_eq!(originator.originate("1001", "1002").await, OriginateResult::TimedOut);
    }

    #[tokio::test]
    async fn blank_endpoints_are_rejected_without_touching_the_link() {
        let sender = Arc::new(ScriptedSender::default());
        let originator = CallOriginator::new(sender.clone(), OriginateSettings::default());

        let result = originator.originate("", "1002").await;
        assert!(matches!(result, OriginateResult::Rejected(RejectReason::InvalidRequest(_))));
        assert!(sender.sent().await.is_empty());
    }

    #[tokio::test]
    async fn destination_with_line_breaks_never_reaches_the_link() {
        let sender = Arc::new(ScriptedSender::with_script(vec![Ok(success("sb-9"))]));
        let originator = CallOriginator::new(sender.clone(), OriginateSettings::default());

        let result = originator
            .originate("1001", "1002\r\n\r\nAction: Command\r\nCommand: core stop now")
            .await;

        assert!(matches!(result, OriginateResult::Rejected(RejectReason::InvalidRequest(_))));
        assert!(sender.sent().await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_requests_are_not_deduplicated() {
        let sender =
            Arc::new(ScriptedSender::with_script(vec![Ok(success("sb-1")), Ok(success("sb-2"))]));
        let originator = CallOriginator::new(
            sender.clone(),
            OriginateSettings { channel_technology: "SIP".to_owned(), context: "default".to_owned() },
        );

        originator.originate("1001", "1002").await;
        originator.originate("1001", "1002").await;

        let sent = sender.sent().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].0.get("Channel"), Some("SIP/1001"));
    }
}
