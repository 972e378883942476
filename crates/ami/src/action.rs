use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use switchboard_core::OriginateRequest;

use crate::frame::ManagerFrame;

/// An AMI action before it is assigned an `ActionID`.
#[derive(Clone, PartialEq, Eq)]
pub struct ManagerAction {
    name: String,
    fields: Vec<(String, String)>,
}

impl ManagerAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), fields: Vec::new() }
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    pub fn login(username: &str, secret: &SecretString) -> Self {
        Self::new("Login")
            .field("Username", username)
            .field("Secret", secret.expose_secret())
            .field("Events", "on")
    }

    /// `Originate` without `Async`: the PBX answers once the dial attempt
    /// towards `Channel` has resolved.
    pub fn originate(request: &OriginateRequest, channel_technology: &str, context: &str) -> Self {
        Self::new("Originate")
            .field("Channel", format!("{channel_technology}/{}", request.from_extension))
            .field("Context", context)
            .field("Exten", request.to_destination.as_str())
            .field("Priority", "1")
            .field("CallerID", request.caller_id_label.as_str())
            .field("Timeout", request.timeout_ms().to_string())
    }

    pub fn ping() -> Self {
        Self::new("Ping")
    }

    pub fn logoff() -> Self {
        Self::new("Logoff")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    pub fn to_frame(&self, action_id: &str) -> ManagerFrame {
        let mut frame = ManagerFrame::new().with("Action", self.name.as_str()).with("ActionID", action_id);
        for (key, value) in &self.fields {
            frame.push(key.as_str(), value.as_str());
        }
        frame
    }
}

impl fmt::Debug for ManagerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<(&str, &str)> = self
            .fields
            .iter()
            .map(|(key, value)| {
                if key.eq_ignore_ascii_case("Secret") {
                    (key.as_str(), "[REDACTED]")
                } else {
                    (key.as_str(), value.as_str())
                }
            })
            .collect();
        f.debug_struct("ManagerAction").field("name", &self.name).field("fields", &fields).finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagerResponse {
    frame: ManagerFrame,
}

impl ManagerResponse {
    pub fn from_frame(frame: ManagerFrame) -> Self {
        Self { frame }
    }

    pub fn status(&self) -> &str {
        self.frame.get("Response").unwrap_or_default()
    }

    /// `Error` is the only status AMI uses to refuse an action.
    pub fn is_success(&self) -> bool {
        !self.status().eq_ignore_ascii_case("Error")
    }

    pub fn message(&self) -> &str {
        self.frame.get("Message").unwrap_or_default()
    }

    pub fn action_id(&self) -> Option<&str> {
        self.frame.action_id()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.frame.get(key)
    }
}
