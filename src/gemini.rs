use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::cache::Cache;

const TEXT_MODEL: &str = "gemini-2.5-flash";
const IMAGE_MODEL: &str = "imagen-4.0-fast-generate-001";
const GENERATIVE_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const TTS_ENDPOINT: &str = "https://texttospeech.googleapis.com/v1/text:synthesize";

/// Sample rate requested from the speech synthesizer; must match what the
/// audio pipeline decodes to.
const TTS_SAMPLE_RATE: u32 = 44_100;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("no API key; pass --api-key or set GEMINI_API_KEY")]
    MissingApiKey,
    #[error("{endpoint} returned {status}: {body}")]
    RequestFailed {
        endpoint: &'static str,
        status: u16,
        body: String,
    },
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} response had no usable payload")]
    MalformedResponse { endpoint: &'static str },
    #[error(transparent)]
    Cache(#[from] anyhow::Error),
}

/// Client for the generative collaborators: text generation, speech
/// synthesis, and image generation. All generated assets round-trip through
/// the on-disk [`Cache`] keyed by request content.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    cache: Cache,
}

impl GeminiClient {
    pub fn new(api_key: String, cache: Cache) -> Result<Self, ClientError> {
        if api_key.trim().is_empty() {
            return Err(ClientError::MissingApiKey);
        }
        Ok(Self {
            http: reqwest::Client::new(),
            api_key,
            cache,
        })
    }

    /// Sends a prompt to the text model and returns the first candidate's
    /// text.
    pub async fn generate_text(&self, prompt: &str) -> Result<String, ClientError> {
        const ENDPOINT: &str = "generateContent";
        let url = format!(
            "{GENERATIVE_BASE}/models/{TEXT_MODEL}:generateContent?key={}",
            self.api_key
        );
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_owned(),
                }],
            }],
        };
        let response: GenerateContentResponse =
            self.post_json(ENDPOINT, &url, &request).await?;
        response
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content.parts.into_iter().next())
            .map(|part| part.text)
            .ok_or(ClientError::MalformedResponse { endpoint: ENDPOINT })
    }

    /// Synthesizes one line of speech as MP3 bytes. Cached by voice + text.
    pub async fn synthesize_speech(
        &self,
        voice: &str,
        text: &str,
    ) -> Result<Vec<u8>, ClientError> {
        const ENDPOINT: &str = "text:synthesize";
        let key = audio_cache_key(voice, text);
        if let Some(bytes) = self.cache.audio(&key) {
            return Ok(bytes);
        }

        let url = format!("{TTS_ENDPOINT}?key={}", self.api_key);
        let request = SynthesizeRequest {
            input: SynthesisInput {
                text: text.to_owned(),
            },
            voice: VoiceSelection {
                language_code: language_code_of(voice),
                name: voice.to_owned(),
            },
            audio_config: AudioConfig {
                audio_encoding: "MP3".to_owned(),
                sample_rate_hertz: TTS_SAMPLE_RATE,
            },
        };
        let response: SynthesizeResponse = self.post_json(ENDPOINT, &url, &request).await?;
        let bytes = BASE64
            .decode(response.audio_content.as_bytes())
            .map_err(|_| ClientError::MalformedResponse { endpoint: ENDPOINT })?;
        if bytes.is_empty() {
            return Err(ClientError::MalformedResponse { endpoint: ENDPOINT });
        }
        self.cache.store_audio(&key, &bytes)?;
        Ok(bytes)
    }

    /// Generates a background image for a prompt and returns the cached PNG
    /// path, ready to hand to the frame synthesizer.
    pub async fn generate_image_file(&self, prompt: &str) -> Result<PathBuf, ClientError> {
        const ENDPOINT: &str = "predict";
        let key = image_cache_key(prompt);
        if self.cache.image(&key).is_some() {
            return Ok(self.cache.image_path(&key));
        }

        let url = format!(
            "{GENERATIVE_BASE}/models/{IMAGE_MODEL}:predict?key={}",
            self.api_key
        );
        let request = PredictRequest {
            instances: vec![ImageInstance {
                prompt: prompt.to_owned(),
            }],
            parameters: PredictParameters { sample_count: 1 },
        };
        let response: PredictResponse = self.post_json(ENDPOINT, &url, &request).await?;
        let encoded = response
            .predictions
            .into_iter()
            .next()
            .map(|prediction| prediction.bytes_base64_encoded)
            .ok_or(ClientError::MalformedResponse { endpoint: ENDPOINT })?;
        let bytes = BASE64
            .decode(encoded.as_bytes())
            .map_err(|_| ClientError::MalformedResponse { endpoint: ENDPOINT })?;
        Ok(self.cache.store_image(&key, &bytes)?)
    }

    async fn post_json<Req, Resp>(
        &self,
        endpoint: &'static str,
        url: &str,
        request: &Req,
    ) -> Result<Resp, ClientError>
    where
        Req: Serialize,
        Resp: for<'de> Deserialize<'de>,
    {
        let response = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|source| ClientError::Transport { endpoint, source })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::RequestFailed {
                endpoint,
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }
        response
            .json::<Resp>()
            .await
            .map_err(|source| ClientError::Transport { endpoint, source })
    }
}

pub fn audio_cache_key(voice: &str, text: &str) -> String {
    format!("audio_{voice}_{text}")
}

pub fn image_cache_key(prompt: &str) -> String {
    format!("image_{IMAGE_MODEL}_{prompt}")
}

/// Voice names like "ja-JP-Neural2-B" carry their language code as the
/// first two segments.
fn language_code_of(voice: &str) -> String {
    let mut segments = voice.splitn(3, '-');
    match (segments.next(), segments.next()) {
        (Some(lang), Some(region)) if !lang.is_empty() && !region.is_empty() => {
            format!("{lang}-{region}")
        }
        _ => "en-US".to_owned(),
    }
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Serialize)]
struct SynthesizeRequest {
    input: SynthesisInput,
    voice: VoiceSelection,
    #[serde(rename = "audioConfig")]
    audio_config: AudioConfig,
}

#[derive(Serialize)]
struct SynthesisInput {
    text: String,
}

#[derive(Serialize)]
struct VoiceSelection {
    #[serde(rename = "languageCode")]
    language_code: String,
    name: String,
}

#[derive(Serialize)]
struct AudioConfig {
    #[serde(rename = "audioEncoding")]
    audio_encoding: String,
    #[serde(rename = "sampleRateHertz")]
    sample_rate_hertz: u32,
}

#[derive(Deserialize)]
struct SynthesizeResponse {
    #[serde(rename = "audioContent")]
    audio_content: String,
}

#[derive(Serialize)]
struct PredictRequest {
    instances: Vec<ImageInstance>,
    parameters: PredictParameters,
}

#[derive(Serialize)]
struct ImageInstance {
    prompt: String,
}

#[derive(Serialize)]
struct PredictParameters {
    #[serde(rename = "sampleCount")]
    sample_count: u32,
}

#[derive(Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<ImagePrediction>,
}

#[derive(Deserialize)]
struct ImagePrediction {
    #[serde(rename = "bytesBase64Encoded")]
    bytes_base64_encoded: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_keys_embed_request_content() {
        assert_eq!(
            audio_cache_key("ja-JP-Neural2-B", "hello"),
            "audio_ja-JP-Neural2-B_hello"
        );
        assert_eq!(
            image_cache_key("a castle"),
            format!("image_{IMAGE_MODEL}_a castle")
        );
    }

    #[test]
    fn language_code_comes_from_the_voice_name() {
        assert_eq!(language_code_of("ja-JP-Neural2-B"), "ja-JP");
        assert_eq!(language_code_of("en-GB-Wavenet-A"), "en-GB");
        assert_eq!(language_code_of("bogus"), "en-US");
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path()).unwrap();
        let error = GeminiClient::new("  ".to_owned(), cache).err().unwrap();
        assert!(matches!(error, ClientError::MissingApiKey));
    }

    #[test]
    fn text_response_parses_first_candidate() {
        let raw = r#"{
            "candidates": [
                {"content": {"parts": [{"text": "first"}, {"text": "rest"}]}},
                {"content": {"parts": [{"text": "second"}]}}
            ]
        }"#;
        let parsed: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .unwrap();
        assert_eq!(text, "first");
    }

    #[test]
    fn empty_candidate_list_still_deserializes() {
        let parsed: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.candidates.is_empty());
    }

    #[test]
    fn synthesize_response_decodes_audio_content() {
        let raw = format!(r#"{{"audioContent": "{}"}}"#, BASE64.encode(b"mp3!"));
        let parsed: SynthesizeResponse = serde_json::from_str(&raw).unwrap();
        assert_eq!(BASE64.decode(parsed.audio_content).unwrap(), b"mp3!");
    }

    #[test]
    fn predict_response_decodes_image_bytes() {
        let raw = format!(
            r#"{{"predictions": [{{"bytesBase64Encoded": "{}"}}]}}"#,
            BASE64.encode(b"png!")
        );
        let parsed: PredictResponse = serde_json::from_str(&raw).unwrap();
        let encoded = parsed
            .predictions
            .into_iter()
            .next()
            .unwrap()
            .bytes_base64_encoded;
        assert_eq!(BASE64.decode(encoded).unwrap(), b"png!");
    }

    #[test]
    fn tts_request_serializes_camel_case_fields() {
        let request = SynthesizeRequest {
            input: SynthesisInput {
                text: "hi".to_owned(),
            },
            voice: VoiceSelection {
                language_code: "ja-JP".to_owned(),
                name: "ja-JP-Neural2-B".to_owned(),
            },
            audio_config: AudioConfig {
                audio_encoding: "MP3".to_owned(),
                sample_rate_hertz: TTS_SAMPLE_RATE,
            },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["voice"]["languageCode"], "ja-JP");
        assert_eq!(value["audioConfig"]["audioEncoding"], "MP3");
        assert_eq!(value["audioConfig"]["sampleRateHertz"], 44_100);
    }
}
