//! External collaborators: OCR, speech transcription, and text generation.
//!
//! The session engine only ever talks to these traits. Concrete clients live
//! here too, but tests swap in `mockall` mocks so the dialogue, policy, and
//! worker logic can be exercised without network calls or a local tesseract.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde::Deserialize;

/// Bound on any single OCR/transcription/generation call. Expiry is treated
/// as an ordinary collaborator failure by every caller.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Report generation returns a long completion and gets a wider bound.
pub const REPORT_TIMEOUT: Duration = Duration::from_secs(60);

/// Runs a collaborator call under a deadline.
pub async fn bounded<T>(
    label: &str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(anyhow!("{label} call exceeded {limit:?}")),
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Ocr: Send + Sync {
    /// Extracts text from a preprocessed (binarized grayscale) PNG image.
    async fn recognize(&self, png: &[u8]) -> Result<String>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribes the audio file at `path` to text.
    async fn transcribe(&self, path: &Path) -> Result<String>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produces a completion for `prompt` with a bounded output length.
    async fn complete(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String>;
}

pub type SharedOcr = std::sync::Arc<dyn Ocr>;
pub type SharedTranscriber = std::sync::Arc<dyn Transcriber>;
pub type SharedGenerator = std::sync::Arc<dyn Generator>;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Chat-completions client used for questions, evaluations, and reports.
pub struct OpenAiGenerator {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn complete(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": max_tokens,
            "temperature": temperature,
        });

        let resp = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("chat completion request failed")?
            .error_for_status()
            .context("chat completion returned an error status")?
            .json::<ChatResponse>()
            .await
            .context("chat completion response was not valid JSON")?;

        let answer = resp
            .choices
            .first()
            .ok_or_else(|| anyhow!("chat completion returned no choices"))?
            .message
            .content
            .trim()
            .to_string();
        Ok(answer)
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Whisper transcription client.
pub struct OpenAiTranscriber {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenAiTranscriber {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    async fn transcribe(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read audio file {}", path.display()))?;

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .context("invalid audio mime type")?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part("file", part);

        let resp = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("transcription request failed")?
            .error_for_status()
            .context("transcription returned an error status")?
            .json::<TranscriptionResponse>()
            .await
            .context("transcription response was not valid JSON")?;

        Ok(resp.text)
    }
}

/// OCR via the local tesseract binary, page segmentation mode 6
/// (a uniform block of text, the right mode for screen captures).
pub struct TesseractOcr {
    bin: String,
}

impl TesseractOcr {
    pub fn new(bin: String) -> Self {
        Self { bin }
    }
}

#[async_trait]
impl Ocr for TesseractOcr {
    async fn recognize(&self, png: &[u8]) -> Result<String> {
        use std::io::Write;

        let mut file = tempfile::Builder::new()
            .prefix("viva_frame_")
            .suffix(".png")
            .tempfile()
            .context("failed to create temporary frame file")?;
        file.write_all(png)
            .context("failed to write frame to temporary file")?;
        file.flush().ok();

        let output = tokio::process::Command::new(&self.bin)
            .arg(file.path())
            .arg("stdout")
            .args(["--psm", "6"])
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", self.bin))?;

        if !output.status.success() {
            return Err(anyhow!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bounded_maps_expiry_to_an_error() {
        let res = bounded("slow", Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn bounded_passes_results_through() {
        let res = bounded("fast", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(res.unwrap(), 7);
    }
}
