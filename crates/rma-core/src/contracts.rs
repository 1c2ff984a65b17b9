use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{RelayError, Result};

// ---------------------------------------------------------------------------
// Client → relay
// ---------------------------------------------------------------------------

/// A frame sent by the chat client over the `/api/query` WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub dialog_id: String,
    pub message: MessageBody,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub payload: Vec<PayloadItem>,
}

/// One typed item of a client message. Only `"text"` items carry user input;
/// other types are accepted on the wire and ignored by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: String,
}

impl ClientMessage {
    /// Build a single-text-item frame.
    pub fn text(dialog_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            dialog_id: dialog_id.into(),
            message: MessageBody {
                payload: vec![PayloadItem {
                    kind: "text".to_string(),
                    value: text.into(),
                }],
            },
        }
    }

    /// All text payload values joined with newlines.
    pub fn joined_text(&self) -> String {
        self.message
            .payload
            .iter()
            .filter(|item| item.kind == "text")
            .map(|item| item.value.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Convert into an orchestrator request for `session_id`.
    pub fn into_request(self, session_id: &str) -> Result<Request> {
        let text = self.joined_text();
        if text.trim().is_empty() {
            return Err(RelayError::EmptyMessage);
        }
        Ok(Request::new(session_id, self.dialog_id, text))
    }
}

// ---------------------------------------------------------------------------
// Orchestrator request / response
// ---------------------------------------------------------------------------

fn default_user_id() -> String {
    "anonymous".to_string()
}

/// A unit of work placed on the task queue by the session manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<HashMap<String, String>>,
    pub session_id: String,
    pub dialog_id: String,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Request {
    pub fn new(
        session_id: impl Into<String>,
        dialog_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: None,
            session_id: session_id.into(),
            dialog_id: dialog_id.into(),
            user_id: default_user_id(),
            message: message.into(),
            authorization: None,
            locale: None,
            additional_metadata: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Answer {
    #[serde(default)]
    pub answer_string: String,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub data_points: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_locale: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub error_str: String,
    #[serde(default)]
    pub retry: bool,
}

/// A message published by the orchestrator for one session/dialog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub dialog_id: String,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub answer: Answer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            session_id: String::new(),
            dialog_id: String::new(),
            user_id: default_user_id(),
            thread_id: None,
            answer: Answer::default(),
            error: None,
        }
    }
}

impl Response {
    fn addressed_to(request: &Request) -> Self {
        Self {
            session_id: request.session_id.clone(),
            dialog_id: request.dialog_id.clone(),
            user_id: request.user_id.clone(),
            ..Default::default()
        }
    }

    /// A non-final progress update.
    pub fn update(request: &Request, text: impl Into<String>) -> Self {
        let mut response = Self::addressed_to(request);
        response.answer.answer_string = text.into();
        response
    }

    /// The terminal answer for a dialog.
    pub fn final_answer(request: &Request, text: impl Into<String>, data_points: Vec<String>) -> Self {
        let mut response = Self::addressed_to(request);
        response.answer = Answer {
            answer_string: text.into(),
            is_final: true,
            data_points,
            speaker_locale: request.locale.clone(),
        };
        response
    }

    /// A terminal failure. `request` is absent when the task could not be parsed;
    /// the caller may still fill in `session_id` from the raw payload.
    pub fn failure(request: Option<&Request>, error_str: impl Into<String>) -> Self {
        let mut response = request.map(Self::addressed_to).unwrap_or_default();
        response.answer.is_final = true;
        response.error = Some(ErrorInfo {
            error_str: error_str.into(),
            retry: false,
        });
        response
    }

    /// True when no further messages are expected for this dialog.
    pub fn is_terminal(&self) -> bool {
        self.answer.is_final || self.error.is_some()
    }
}

// ---------------------------------------------------------------------------
// Broker envelope
// ---------------------------------------------------------------------------

/// What actually travels over the message channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub payload: Response,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_context: Option<HashMap<String, String>>,
}

impl Envelope {
    pub fn wrap(payload: Response) -> Self {
        Self {
            payload,
            trace_context: None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a raw channel message. A bare `Response` without the envelope is
    /// accepted as well.
    pub fn parse(raw: &str) -> Result<Response> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        if value.get("payload").is_some() {
            let envelope: Envelope = serde_json::from_value(value)?;
            Ok(envelope.payload)
        } else {
            Ok(serde_json::from_value(value)?)
        }
    }
}

// ---------------------------------------------------------------------------
// Relay → client
// ---------------------------------------------------------------------------

/// The answer shape seen by the chat client. `is_final` is optional on the
/// wire; a missing value means final.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnswerFrame {
    #[serde(default)]
    pub answer_string: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_final: Option<bool>,
    #[serde(default)]
    pub data_points: Vec<String>,
}

impl AnswerFrame {
    pub fn is_intermediate(&self) -> bool {
        self.is_final == Some(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error_str: String,
}

/// A frame sent to the chat client: exactly one of `answer` or `error`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClientUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<AnswerFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorFrame>,
}

impl ClientUpdate {
    pub fn error(error_str: impl Into<String>) -> Self {
        Self {
            answer: None,
            error: Some(ErrorFrame {
                error_str: error_str.into(),
            }),
        }
    }

    pub fn answer(text: impl Into<String>, is_final: bool, data_points: Vec<String>) -> Self {
        Self {
            answer: Some(AnswerFrame {
                answer_string: text.into(),
                is_final: Some(is_final),
                data_points,
            }),
            error: None,
        }
    }
}

impl From<Response> for ClientUpdate {
    fn from(response: Response) -> Self {
        match response.error {
            Some(err) => Self::error(err.error_str),
            None => Self::answer(
                response.answer.answer_string,
                response.answer.is_final,
                response.answer.data_points,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_wire_shape() {
        let msg = ClientMessage::text("d-1", "status of release 1.0?");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "dialog_id": "d-1",
                "message": { "payload": [ { "type": "text", "value": "status of release 1.0?" } ] }
            })
        );
    }

    #[test]
    fn joined_text_skips_non_text_items() {
        let raw = r#"{
            "dialog_id": "d-1",
            "message": { "payload": [
                { "type": "text", "value": "first" },
                { "type": "image", "value": "https://x/y.png" },
                { "type": "text", "value": "second" }
            ] }
        }"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.joined_text(), "first\nsecond");
    }

    #[test]
    fn into_request_rejects_blank_text() {
        let msg = ClientMessage::text("d-1", "   ");
        assert!(matches!(
            msg.into_request("s-1"),
            Err(RelayError::EmptyMessage)
        ));
    }

    #[test]
    fn into_request_defaults_user() {
        let req = ClientMessage::text("d-9", "hi").into_request("s-1").unwrap();
        assert_eq!(req.session_id, "s-1");
        assert_eq!(req.dialog_id, "d-9");
        assert_eq!(req.user_id, "anonymous");
        assert_eq!(req.message, "hi");
    }

    #[test]
    fn request_parses_minimal_payload() {
        let req: Request =
            serde_json::from_str(r#"{"session_id":"s","dialog_id":"d","message":"m"}"#).unwrap();
        assert_eq!(req.user_id, "anonymous");
        assert!(req.locale.is_none());
    }

    #[test]
    fn final_answer_carries_locale() {
        let mut req = Request::new("s", "d", "m");
        req.locale = Some("en-US".into());
        let resp = Response::final_answer(&req, "done", vec!["https://img/1.png".into()]);
        assert!(resp.answer.is_final);
        assert_eq!(resp.answer.speaker_locale.as_deref(), Some("en-US"));
        assert!(resp.is_terminal());
    }

    #[test]
    fn failure_without_request_is_terminal() {
        let resp = Response::failure(None, "bad input");
        assert!(resp.is_terminal());
        assert_eq!(resp.session_id, "");
        assert_eq!(resp.user_id, "anonymous");
        assert!(!resp.error.as_ref().unwrap().retry);
    }

    #[test]
    fn envelope_parse_accepts_wrapped_and_bare() {
        let req = Request::new("s-1", "d-1", "m");
        let resp = Response::update(&req, "Processing your request...");

        let wrapped = Envelope::wrap(resp.clone()).to_json().unwrap();
        assert_eq!(Envelope::parse(&wrapped).unwrap(), resp);

        let bare = serde_json::to_string(&resp).unwrap();
        assert_eq!(Envelope::parse(&bare).unwrap(), resp);
    }

    #[test]
    fn envelope_parse_rejects_garbage() {
        assert!(Envelope::parse("not json").is_err());
    }

    #[test]
    fn client_update_prefers_error() {
        let req = Request::new("s", "d", "m");
        let update = ClientUpdate::from(Response::failure(Some(&req), "An error occurred. Please retry.."));
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "error": { "error_str": "An error occurred. Please retry.." } })
        );
    }

    #[test]
    fn client_update_answer_shape() {
        let req = Request::new("s", "d", "m");
        let update = ClientUpdate::from(Response::update(&req, "Loading..."));
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "answer": { "answer_string": "Loading...", "is_final": false, "data_points": [] }
            })
        );
    }

    #[test]
    fn answer_frame_missing_is_final_is_not_intermediate() {
        let frame: AnswerFrame = serde_json::from_str(r#"{"answer_string":"x"}"#).unwrap();
        assert!(!frame.is_intermediate());
    }
}
