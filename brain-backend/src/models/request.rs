use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

use super::ActionRecord;

/// Interface the request arrived through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum InterfaceTag {
    #[default]
    Api,
    Voice,
    Chat,
    Webhook,
}

impl InterfaceTag {
    /// Map the free-form interface names clients send onto the known tags
    pub fn from_client(s: &str) -> Self {
        if let Ok(tag) = s.trim().parse::<InterfaceTag>() {
            return tag;
        }
        match s.trim().to_lowercase().as_str() {
            "web" | "websocket" | "whatsapp" | "telegram" | "slack" => InterfaceTag::Chat,
            "fastrtc" | "phone" => InterfaceTag::Voice,
            _ => InterfaceTag::Api,
        }
    }
}

/// A routed request. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub text: String,
    pub requester_id: String,
    pub session_id: String,
    pub interface_tag: InterfaceTag,
    pub arrived_at: DateTime<Utc>,
}

impl Request {
    pub fn new(
        text: impl Into<String>,
        requester_id: impl Into<String>,
        session_id: impl Into<String>,
        interface_tag: InterfaceTag,
    ) -> Self {
        Self {
            text: text.into(),
            requester_id: requester_id.into(),
            session_id: session_id.into(),
            interface_tag,
            arrived_at: Utc::now(),
        }
    }
}

fn default_user_id() -> String {
    "default".to_string()
}

fn default_interface() -> String {
    "api".to_string()
}

/// Inbound body of `POST /api/orchestrate`
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestrateRequest {
    pub message: String,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_interface")]
    pub interface: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub context: Option<Map<String, Value>>,
}

impl OrchestrateRequest {
    /// Build the immutable request, generating a session id when absent
    pub fn into_request(self) -> (Request, Option<Map<String, Value>>) {
        let session_id = match self.session_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => uuid::Uuid::new_v4().to_string(),
        };
        let request = Request::new(
            self.message,
            self.user_id,
            session_id,
            InterfaceTag::from_client(&self.interface),
        );
        (request, self.context)
    }
}

/// Outbound body of `POST /api/orchestrate`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrateResponse {
    pub response: String,
    pub actions_taken: Vec<ActionRecord>,
    pub context_updated: bool,
    pub session_id: String,
    /// Agent that produced the final response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// "single" or "multi"
    pub mode: String,
    /// True when some optional step failed and its dependents ran with degraded input
    #[serde(default)]
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_tag_mapping() {
        assert_eq!(InterfaceTag::from_client("voice"), InterfaceTag::Voice);
        assert_eq!(InterfaceTag::from_client("WEBHOOK"), InterfaceTag::Webhook);
        assert_eq!(InterfaceTag::from_client("whatsapp"), InterfaceTag::Chat);
        assert_eq!(InterfaceTag::from_client("something-else"), InterfaceTag::Api);
    }

    #[test]
    fn test_missing_session_id_is_generated() {
        let body: OrchestrateRequest =
            serde_json::from_str(r#"{"message": "list files"}"#).unwrap();
        let (request, context) = body.into_request();
        assert_eq!(request.requester_id, "default");
        assert_eq!(request.interface_tag, InterfaceTag::Api);
        assert!(uuid::Uuid::parse_str(&request.session_id).is_ok());
        assert!(context.is_none());
    }

    #[test]
    fn test_given_session_id_is_kept() {
        let body: OrchestrateRequest = serde_json::from_str(
            r#"{"message": "hi", "user_id": "mohit", "interface": "chat", "session_id": "S1"}"#,
        )
        .unwrap();
        let (request, _) = body.into_request();
        assert_eq!(request.session_id, "S1");
        assert_eq!(request.interface_tag, InterfaceTag::Chat);
    }
}
