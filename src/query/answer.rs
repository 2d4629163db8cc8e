/// Retrieval-augmented answer generation via a local Ollama server
///
/// Builds a prompt from the top retrieved contexts and streams generated
/// tokens from `/api/generate`. The streaming response is a sequence of
/// newline-delimited JSON frames `{response, done}`; cancellation drops the
/// in-flight request.
use crate::error::{BackendError, Error, Result};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How many retrieved contexts make it into the prompt
const MAX_CONTEXTS: usize = 5;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const GENERATE_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for Ollama text generation
pub struct LlmClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

impl LlmClient {
    /// Create a client for the Ollama server at `base_url`.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(Error::from)?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client,
        })
    }

    /// Generate text for a prompt, non-streaming.
    pub async fn generate(&self, cancel: &CancellationToken, prompt: &str) -> Result<String> {
        let request = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(GENERATE_TIMEOUT)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
            });

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            sent = request.send() => sent.map_err(|e| self.network_error(e))?,
        };

        let status = response.status();
        let body = response.text().await.map_err(Error::from)?;
        if !status.is_success() {
            return Err(self.status_error(status.as_u16(), body));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Backend(BackendError::InvalidResponse(e.to_string())))?;
        Ok(parsed.response)
    }

    /// Produce a grounded answer from search contexts, non-streaming.
    pub async fn generate_answer(
        &self,
        cancel: &CancellationToken,
        question: &str,
        contexts: &[String],
    ) -> Result<String> {
        if contexts.is_empty() {
            return Ok("No relevant documents found.".to_string());
        }
        self.generate(cancel, &build_prompt(question, contexts)).await
    }

    /// Stream a grounded answer token by token. The sink receives each
    /// token and whether the stream is complete; the call succeeds only if
    /// the server terminates the stream with a `done` frame.
    pub async fn generate_answer_stream<F>(
        &self,
        cancel: &CancellationToken,
        question: &str,
        contexts: &[String],
        mut sink: F,
    ) -> Result<()>
    where
        F: FnMut(&str, bool),
    {
        if contexts.is_empty() {
            sink("No relevant documents found.", true);
            return Ok(());
        }

        let prompt = build_prompt(question, contexts);
        let request = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&GenerateRequest {
                model: &self.model,
                prompt: &prompt,
                stream: true,
            });

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            sent = request.send() => sent.map_err(|e| self.network_error(e))?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.status_error(status.as_u16(), body));
        }

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut done = false;

        loop {
            // Dropping the stream on cancellation closes the connection.
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(|e| self.network_error(e))?;
            buffer.extend_from_slice(&chunk);

            while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                if let Some(frame) = parse_frame(&line)? {
                    sink(&frame.response, frame.done);
                    done = done || frame.done;
                }
            }
        }

        // A final frame without a trailing newline still counts.
        if let Some(frame) = parse_frame(&buffer)? {
            sink(&frame.response, frame.done);
            done = done || frame.done;
        }

        if done {
            Ok(())
        } else {
            Err(Error::Backend(BackendError::TruncatedStream))
        }
    }

    fn network_error(&self, err: reqwest::Error) -> Error {
        Error::Backend(BackendError::Network {
            base_url: self.base_url.clone(),
            message: err.to_string(),
        })
    }

    fn status_error(&self, status: u16, body: String) -> Error {
        if let Ok(parsed) = serde_json::from_str::<ErrorResponse>(&body) {
            if !parsed.error.is_empty() {
                return Error::Backend(BackendError::Api(parsed.error));
            }
        }
        Error::Backend(BackendError::Status { status, body })
    }
}

fn parse_frame(line: &[u8]) -> Result<Option<GenerateResponse>> {
    let line = std::str::from_utf8(line)
        .map_err(|e| Error::Backend(BackendError::InvalidResponse(e.to_string())))?
        .trim();
    if line.is_empty() {
        return Ok(None);
    }
    let frame = serde_json::from_str(line)
        .map_err(|e| Error::Backend(BackendError::InvalidResponse(e.to_string())))?;
    Ok(Some(frame))
}

/// Build the RAG prompt: up to five numbered document contexts followed by
/// the instruction block.
fn build_prompt(question: &str, contexts: &[String]) -> String {
    let mut context_block = String::new();
    for (i, context) in contexts.iter().take(MAX_CONTEXTS).enumerate() {
        context_block.push_str(&format!("--- Document {} ---\n{}\n\n", i + 1, context));
    }

    format!(
        "Based on the following documents from the user's personal knowledge base, answer the question concisely.\n\n{context_block}\n\nQuestion: {question}\n\nAnswer:"
    )
}
