//! Inbound transport webhook.
//!
//! Accepts the channel gateway's nested payload, acknowledges with 202
//! immediately, and processes in the background. Messages flagged
//! `fromMe` are our own echoes and are dropped.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::Value;
use uuid::Uuid;

use crate::pipeline::{MessagePipeline, MessageRequest};
use crate::state::AppState;

pub async fn inbound(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    tokio::spawn(async move {
        if let Err(e) = process_payload(state, payload).await {
            tracing::error!(error = %e, "webhook background processing failed");
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"status": "accepted", "message": "Processing"})),
    )
}

async fn process_payload(state: AppState, payload: Value) -> mg_domain::Result<()> {
    let instance_name = payload
        .get("instanceName")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let message = payload.get("message").cloned().unwrap_or(Value::Null);
    let key = message.get("key").cloned().unwrap_or(Value::Null);

    // Skip our own outbound echoes.
    if key.get("fromMe").and_then(Value::as_bool).unwrap_or(false) {
        tracing::debug!("skipping fromMe message");
        return Ok(());
    }

    let from_phone = key
        .get("remoteJid")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .replace("@s.whatsapp.net", "");
    if from_phone.is_empty() {
        tracing::warn!("webhook payload without remoteJid");
        return Ok(());
    }

    let Some(body) = extract_body(&message) else {
        tracing::debug!("webhook payload without text content");
        return Ok(());
    };

    let clinic_id = extract_clinic_id(&instance_name)
        .unwrap_or_else(|| default_clinic(&state));

    let request = MessageRequest {
        from_phone: from_phone.clone(),
        to_phone: instance_name.clone(),
        body,
        message_sid: key
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        clinic_id,
        channel: "whatsapp".into(),
        profile_name: message
            .get("pushName")
            .or_else(|| payload.get("pushName"))
            .and_then(Value::as_str)
            .map(str::to_owned),
        metadata: payload.clone(),
    };

    let pipeline = MessagePipeline::new(state.clone());
    let response = pipeline.process(request).await?;

    if !response.message.is_empty() {
        if let Err(e) = state
            .outbound
            .send_text(&instance_name, &from_phone, &response.message)
            .await
        {
            tracing::error!(error = %e, "failed to send outbound reply");
        }
    }

    Ok(())
}

/// The text body hides under one of several nested shapes.
fn extract_body(message: &Value) -> Option<String> {
    let candidates = [
        message.pointer("/message/conversation"),
        message.pointer("/message/extendedTextMessage/text"),
        message.pointer("/message/imageMessage/caption"),
        message.pointer("/message/videoMessage/caption"),
        message.get("conversation"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_owned)
}

/// Instance names look like `clinic-{uuid}-{timestamp}`; tokens 1–5
/// reassemble the 8-4-4-4-12 UUID.
fn extract_clinic_id(instance_name: &str) -> Option<Uuid> {
    let rest = instance_name.strip_prefix("clinic-")?;
    let tokens: Vec<&str> = rest.split('-').collect();
    if tokens.len() < 5 {
        return None;
    }
    tokens[..5].join("-").parse().ok()
}

fn default_clinic(state: &AppState) -> Uuid {
    state
        .config
        .transport
        .default_clinic_id
        .parse()
        .unwrap_or_else(|_| Uuid::nil())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clinic_id_reassembles_from_instance_name() {
        let id = Uuid::new_v4();
        let instance = format!("clinic-{id}-1718000000");
        assert_eq!(extract_clinic_id(&instance), Some(id));
    }

    #[test]
    fn malformed_instance_name_falls_back() {
        assert!(extract_clinic_id("main-line").is_none());
        assert!(extract_clinic_id("clinic-not-a-uuid").is_none());
    }

    #[test]
    fn body_extraction_covers_nested_shapes() {
        let plain = json!({"message": {"conversation": "hola"}});
        assert_eq!(extract_body(&plain).as_deref(), Some("hola"));

        let extended = json!({"message": {"extendedTextMessage": {"text": "hi"}}});
        assert_eq!(extract_body(&extended).as_deref(), Some("hi"));

        let caption = json!({"message": {"imageMessage": {"caption": "see this"}}});
        assert_eq!(extract_body(&caption).as_deref(), Some("see this"));

        let video = json!({"message": {"videoMessage": {"caption": "clip"}}});
        assert_eq!(extract_body(&video).as_deref(), Some("clip"));

        let empty = json!({"message": {"imageMessage": {}}});
        assert!(extract_body(&empty).is_none());
    }
}
