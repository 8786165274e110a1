use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use panoedit_contracts::Version;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::backend::{
    BackendConfig, EditReply, EditRequest, GenerativeBackend, InlineImage, SuggestionRequest,
};
use crate::error::{BackendError, GENERIC_BACKEND_MESSAGE};

pub struct GeminiBackend {
    config: BackendConfig,
    http: HttpClient,
}

impl GeminiBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            http: HttpClient::new(),
        }
    }

    fn api_key(&self) -> Result<&str, BackendError> {
        self.config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| BackendError::MissingCredentials("gemini".to_string()))
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.config.api_base, model_path)
    }

    fn edit_payload(request: &EditRequest) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    inline_image_part(&request.image),
                    { "text": request.instruction },
                ],
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE", "TEXT"],
            },
        })
    }

    fn suggestion_payload(request: &SuggestionRequest) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    inline_image_part(&request.image),
                    { "text": request.instruction },
                ],
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "prompts": {
                            "type": "ARRAY",
                            "items": {
                                "type": "STRING",
                                "description": "A creative editing prompt.",
                            },
                        },
                    },
                },
            },
        })
    }

    fn post(&self, model: &str, payload: &Value) -> Result<GenerateContentResponse, BackendError> {
        let api_key = self.api_key()?;
        let endpoint = self.endpoint_for_model(model);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .timeout(self.config.request_timeout)
            .json(payload)
            .send()
            .map_err(|err| BackendError::Transport(format!("Gemini request failed: {err}")))?;
        decode_response(response)
    }

    /// Later parts override earlier ones: the last inline image and the last
    /// non-blank text part make up the reply.
    fn extract_edit_reply(response: &GenerateContentResponse) -> Result<EditReply, BackendError> {
        let mut image = None;
        let mut text = None;
        for part in response.first_candidate_parts() {
            let inline = part.inline_data.as_ref();
            if let Some(inline) = inline.filter(|inline| !inline.data.is_empty()) {
                image = Some(inline);
                continue;
            }
            if let Some(value) = part.text.as_deref().map(str::trim) {
                if !value.is_empty() {
                    text = Some(value.to_string());
                }
            }
        }

        let image = match image {
            Some(inline) => {
                let bytes = BASE64.decode(inline.data.as_bytes()).map_err(|err| {
                    BackendError::InvalidResponse(format!(
                        "Gemini image base64 decode failed: {err}"
                    ))
                })?;
                Some(InlineImage {
                    bytes,
                    media_type: inline
                        .mime_type
                        .as_deref()
                        .map(str::trim)
                        .filter(|value| !value.is_empty())
                        .map(str::to_string),
                })
            }
            None => None,
        };
        Ok(EditReply { image, text })
    }

    fn extract_text(response: &GenerateContentResponse) -> Option<String> {
        let text = response
            .first_candidate_parts()
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect::<String>();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

impl GenerativeBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn edit(&self, request: &EditRequest) -> Result<EditReply, BackendError> {
        let response = self.post(&request.model, &Self::edit_payload(request))?;
        Self::extract_edit_reply(&response)
    }

    fn suggest(&self, request: &SuggestionRequest) -> Result<String, BackendError> {
        let response = self.post(&request.model, &Self::suggestion_payload(request))?;
        Self::extract_text(&response).ok_or_else(|| {
            BackendError::InvalidResponse("Gemini returned no suggestion text".to_string())
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateContentResponse {
    fn first_candidate_parts(&self) -> &[Part] {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| content.parts.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    #[serde(alias = "inline_data")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(alias = "mime_type")]
    mime_type: Option<String>,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

fn inline_image_part(image: &Version) -> Value {
    json!({
        "inlineData": {
            "mimeType": image.media_type(),
            "data": BASE64.encode(image.content()),
        }
    })
}

fn decode_response(response: HttpResponse) -> Result<GenerateContentResponse, BackendError> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .map_err(|err| {
            BackendError::Transport(format!("Gemini response body read failed: {err}"))
        })?;
    if !status.is_success() {
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .ok()
            .and_then(|envelope| envelope.error.message)
            .map(|message| message.trim().to_string())
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| format!("{GENERIC_BACKEND_MESSAGE} (HTTP {code})"));
        return Err(BackendError::Status { code, message });
    }
    serde_json::from_str(&body).map_err(|err| {
        BackendError::InvalidResponse(format!("Gemini returned an unexpected payload: {err}"))
    })
}
