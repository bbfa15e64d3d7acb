use super::types::NextQuestionWire;
use super::{
    AnswerVerdict, GatewayError, NextQuestion, Section, SectionRef, SubmissionGateway, TtsAudio,
    UploadedAudio,
};
use crate::audio::format::extension_for_mime;
use crate::audio::RecordingBlob;
use crate::config::RuntimeConfig;
use async_trait::async_trait;
use reqwest::{multipart, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;

const FALLBACK_AUDIO_MIME: &str = "application/octet-stream";

/// JSON-over-HTTP gateway.
pub struct HttpGateway {
    base_url: Url,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(config: &RuntimeConfig) -> Result<Self, GatewayError> {
        let base_url = Url::parse(&config.gateway_base_url)
            .map_err(|e| GatewayError::Rejected(format!("invalid gateway URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::Rejected(format!(
                "gateway URL {} cannot carry a path",
                base_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        tracing::info!("HTTP gateway initialized: {}", config.gateway_base_url);

        Ok(Self {
            base_url,
            token: config.gateway_token.clone(),
            client,
        })
    }

    /// Append `segments` to the base path. Each one is percent-encoded, so
    /// ids never split or escape their segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn section_url(&self, section: &SectionRef, tail: &[&str]) -> Url {
        let mut segments = vec![
            "assessments",
            section.assessment_id.as_str(),
            "sections",
            section.section_id.as_str(),
        ];
        segments.extend_from_slice(tail);
        self.endpoint(&segments)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, GatewayError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), &body))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let response = self.send(request).await?;
        let text = response.text().await.map_err(classify_transport)?;
        serde_json::from_str(&text).map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SubmissionGateway for HttpGateway {
    async fn start_section(&self, section: &SectionRef) -> Result<Section, GatewayError> {
        tracing::info!("Starting section {}", section.section_id);
        self.send_json(self.client.post(self.section_url(section, &["start"])))
            .await
    }

    async fn get_next_question(&self, section: &SectionRef) -> Result<NextQuestion, GatewayError> {
        let wire: NextQuestionWire = self
            .send_json(self.client.get(self.section_url(section, &["next-question"])))
            .await?;
        NextQuestion::try_from(wire)
    }

    async fn submit_answer(
        &self,
        section: &SectionRef,
        question_id: &str,
        answer: &str,
    ) -> Result<AnswerVerdict, GatewayError> {
        let url = self.section_url(section, &["questions", question_id, "answer"]);
        self.send_json(self.client.post(url).json(&json!({ "answer": answer })))
            .await
    }

    async fn submit_writing(
        &self,
        section: &SectionRef,
        question_id: &str,
        text: &str,
    ) -> Result<(), GatewayError> {
        let url = self.section_url(section, &["questions", question_id, "writing"]);
        self.send(self.client.post(url).json(&json!({ "text": text })))
            .await
            .map(|_| ())
    }

    async fn upload_audio(&self, blob: &RecordingBlob) -> Result<UploadedAudio, GatewayError> {
        let mime = blob.mime.as_deref().unwrap_or(FALLBACK_AUDIO_MIME);
        let file_name = format!("answer.{}", extension_for_mime(mime));
        tracing::info!("Uploading {} bytes of audio ({})", blob.len(), mime);

        let part = multipart::Part::bytes(blob.bytes.as_ref().clone())
            .file_name(file_name)
            .mime_str(mime)
            .map_err(|e| GatewayError::Rejected(e.to_string()))?;
        let form = multipart::Form::new().part("file", part);

        self.send_json(self.client.post(self.endpoint(&["uploads", "audio"])).multipart(form))
            .await
    }

    async fn submit_speaking(
        &self,
        section: &SectionRef,
        question_id: &str,
        audio_url: &str,
        duration_secs: u32,
    ) -> Result<(), GatewayError> {
        let url = self.section_url(section, &["questions", question_id, "speaking"]);
        let body = json!({ "audioUrl": audio_url, "durationSeconds": duration_secs });
        self.send(self.client.post(url).json(&body)).await.map(|_| ())
    }

    async fn complete_section(&self, section: &SectionRef) -> Result<(), GatewayError> {
        match self.send(self.client.post(self.section_url(section, &["complete"]))).await {
            Ok(_) => Ok(()),
            Err(GatewayError::SectionClosed) => {
                tracing::debug!("Section {} already closed", section.section_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn get_tts_audio(&self, question_id: &str) -> Result<TtsAudio, GatewayError> {
        let url = self.endpoint(&["questions", question_id, "tts"]);
        self.send_json(self.client.get(url)).await
    }

    fn name(&self) -> &str {
        "http"
    }
}

fn classify_transport(error: reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        GatewayError::Timeout
    } else if error.is_decode() {
        GatewayError::Decode(error.to_string())
    } else {
        GatewayError::Network(error.to_string())
    }
}

/// Pull a human-readable message out of an error body, JSON or not.
fn error_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let from_json = parsed.as_ref().and_then(|v| {
        ["message", "error", "detail"]
            .iter()
            .find_map(|key| v.get(key).and_then(|m| m.as_str()))
            .map(str::to_string)
    });
    from_json.unwrap_or_else(|| body.trim().to_string())
}

fn classify_status(status: u16, body: &str) -> GatewayError {
    match status {
        401 | 403 => GatewayError::Unauthorized,
        410 => GatewayError::SectionClosed,
        429 => GatewayError::RateLimited,
        400 | 409 | 422 => GatewayError::Rejected(error_message(body)),
        _ => GatewayError::Http {
            status,
            message: error_message(body),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(base_url: &str) -> HttpGateway {
        let config = RuntimeConfig {
            gateway_base_url: base_url.to_string(),
            ..RuntimeConfig::default()
        };
        HttpGateway::new(&config).unwrap()
    }

    #[test]
    fn endpoints_join_cleanly() {
        for base in ["http://localhost:3000/api/", "http://localhost:3000/api"] {
            assert_eq!(
                gateway(base).endpoint(&["uploads", "audio"]).as_str(),
                "http://localhost:3000/api/uploads/audio"
            );
        }
        assert_eq!(
            gateway("http://localhost:3000").endpoint(&["uploads", "audio"]).as_str(),
            "http://localhost:3000/uploads/audio"
        );
    }

    #[test]
    fn section_urls_carry_both_ids() {
        let section = SectionRef::new("a1", "s9");
        assert_eq!(
            gateway("http://exam.test/api/")
                .section_url(&section, &["questions", "q3", "answer"])
                .as_str(),
            "http://exam.test/api/assessments/a1/sections/s9/questions/q3/answer"
        );
    }

    #[test]
    fn ids_are_encoded_as_single_segments() {
        let section = SectionRef::new("a/1", "s?9");
        let url = gateway("http://exam.test/api")
            .section_url(&section, &["questions", "q#3 x", "answer"]);
        assert_eq!(
            url.as_str(),
            "http://exam.test/api/assessments/a%2F1/sections/s%3F9/questions/q%233%20x/answer"
        );
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn unusable_base_urls_are_rejected() {
        for base in ["not a url", "mailto:exam@test"] {
            let config = RuntimeConfig {
                gateway_base_url: base.to_string(),
                ..RuntimeConfig::default()
            };
            assert!(matches!(
                HttpGateway::new(&config),
                Err(GatewayError::Rejected(_))
            ));
        }
    }

    #[test]
    fn statuses_map_to_gateway_errors() {
        assert_eq!(classify_status(401, ""), GatewayError::Unauthorized);
        assert_eq!(classify_status(410, "gone"), GatewayError::SectionClosed);
        assert_eq!(classify_status(429, ""), GatewayError::RateLimited);
        assert_eq!(
            classify_status(422, r#"{"message":"answer missing"}"#),
            GatewayError::Rejected("answer missing".to_string())
        );
        assert_eq!(
            classify_status(502, "bad gateway\n"),
            GatewayError::Http {
                status: 502,
                message: "bad gateway".to_string()
            }
        );
    }
}
