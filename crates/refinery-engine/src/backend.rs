use anyhow::Result;
use serde_json::{json, Value};

/// How a backend call is authorised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    ApiKey(String),
    /// The host environment supplies the key itself.
    HostManaged,
}

impl Credential {
    pub fn api_key(&self) -> Option<&str> {
        match self {
            Credential::ApiKey(key) => Some(key.as_str()),
            Credential::HostManaged => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    InlineImage { mime_type: String, data: String },
}

impl ContentPart {
    pub fn text(value: impl Into<String>) -> Self {
        ContentPart::Text(value.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text(text) => Some(text.as_str()),
            ContentPart::InlineImage { .. } => None,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, ContentPart::InlineImage { .. })
    }

    pub fn to_json(&self) -> Value {
        match self {
            ContentPart::Text(text) => json!({ "text": text }),
            ContentPart::InlineImage { mime_type, data } => json!({
                "inlineData": {
                    "mimeType": mime_type,
                    "data": data,
                }
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextRequest {
    pub model: String,
    pub parts: Vec<ContentPart>,
    pub system_instruction: Option<String>,
    pub grounding: bool,
    pub thinking_budget: Option<u32>,
    pub response_schema: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaRequest {
    pub model: String,
    pub prompt: String,
    pub kind: MediaKind,
    pub aspect_ratio: String,
    pub resolution: Option<String>,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBytes {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

/// Long-running operation as last reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub name: String,
    pub done: bool,
    pub result_uri: Option<String>,
    pub error: Option<String>,
}

impl JobHandle {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: false,
            result_uri: None,
            error: None,
        }
    }
}

/// Opaque request/response capability of the model provider.
pub trait ModelBackend: Send + Sync {
    fn name(&self) -> &str;

    fn generate_text(&self, request: &TextRequest, credential: &Credential) -> Result<String>;

    fn generate_image(&self, request: &MediaRequest, credential: &Credential) -> Result<MediaBytes>;

    fn submit_video(&self, request: &MediaRequest, credential: &Credential) -> Result<JobHandle>;

    fn poll_operation(&self, job: &JobHandle, credential: &Credential) -> Result<JobHandle>;

    /// Download finished media; the credential travels as a query parameter.
    fn fetch_media(&self, uri: &str, credential: &Credential) -> Result<MediaBytes>;

    /// Whether the host can supply a key when none is configured.
    fn host_key_selection(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ContentPart, Credential};

    #[test]
    fn content_parts_serialize_to_gemini_shape() {
        assert_eq!(ContentPart::text("hi").to_json(), json!({"text": "hi"}));
        assert_eq!(
            ContentPart::InlineImage {
                mime_type: "image/png".to_string(),
                data: "AAAA".to_string(),
            }
            .to_json(),
            json!({"inlineData": {"mimeType": "image/png", "data": "AAAA"}})
        );
    }

    #[test]
    fn host_managed_credential_has_no_key() {
        assert_eq!(Credential::HostManaged.api_key(), None);
        assert_eq!(Credential::ApiKey("k".to_string()).api_key(), Some("k"));
    }
}
