use serde::{Deserialize, Serialize};

/// Error body the voting server attaches to non-2xx responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}

/// Picks the text to show for a failed request: the body's `message` field, else the raw
/// body, else the HTTP status text.
pub fn server_error_message(body: &str, status_text: &str) -> String {
    let from_payload = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|payload| payload.message)
        .filter(|message| !message.trim().is_empty());
    if let Some(message) = from_payload {
        return message;
    }

    let body = body.trim();
    if !body.is_empty() {
        return body.to_string();
    }
    if !status_text.is_empty() {
        return status_text.to_string();
    }
    "Request failed".to_string()
}
