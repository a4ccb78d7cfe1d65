use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;

use super::provider::SessionRequest;

/// Application identifier sent with every exchange.
pub const APP_ID: &str = "danzin-ia";

/// Persona the backend is asked to play.
pub const SYSTEM_PROMPT: &str = "Você é o Danzin IA, um assistente inteligente, educado e \
objetivo. Responda sempre em português do Brasil, com clareza, e quando o usuário enviar uma \
imagem descreva e analise o conteúdo dela antes de responder à pergunta.";

/// Raw image bytes plus their declared media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub bytes: Arc<[u8]>,
    pub media_type: String,
}

impl ImageAttachment {
    pub fn new(bytes: impl Into<Arc<[u8]>>, media_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            media_type: media_type.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Base64 without any `data:` URI prefix.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedImage {
    pub image: String,
    pub image_type: String,
}

/// The single JSON frame sent right after the connection opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundPayload {
    pub chat_id: String,
    pub app_id: String,
    pub system_prompt: String,
    pub message: String,
    #[serde(flatten)]
    pub image: Option<EncodedImage>,
}

impl OutboundPayload {
    pub fn from_request(request: &SessionRequest, app_id: &str, system_prompt: &str) -> Self {
        Self {
            chat_id: request.chat_id.clone(),
            app_id: app_id.to_string(),
            system_prompt: system_prompt.to_string(),
            message: request.message.clone(),
            image: request.image.as_ref().map(|image| EncodedImage {
                image: image.to_base64(),
                image_type: image.media_type.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::provider::StreamSessionId;

    #[test]
    fn text_payload_omits_image_fields() {
        let request = SessionRequest::new(StreamSessionId::new(1), "chat-1", "Olá");
        let payload = OutboundPayload::from_request(&request, APP_ID, "persona");

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            json!({
                "chatId": "chat-1",
                "appId": APP_ID,
                "systemPrompt": "persona",
                "message": "Olá",
            })
        );
    }

    #[test]
    fn image_payload_carries_plain_base64_and_type() {
        let request = SessionRequest::new(StreamSessionId::new(2), "chat-2", "o que é isto?")
            .with_image(ImageAttachment::new(b"\x89PNG".to_vec(), "image/png"));
        let payload = OutboundPayload::from_request(&request, APP_ID, SYSTEM_PROMPT);

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["image"], Value::from("iVBORw=="));
        assert_eq!(value["imageType"], Value::from("image/png"));
        assert!(!value["image"].as_str().unwrap().starts_with("data:"));
    }
}
