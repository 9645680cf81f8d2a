//! OpenAI-compatible chat completions client (works against Ollama's `/v1`).

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::Client;

use crate::core::error::GatewayError;
use crate::domain::{ChatRequest, ChatResponse, StreamChunk};
use crate::infra::config::CompletionConfig;
use crate::infra::http::headers::add_standard_headers;
use crate::infra::runtime::limits::{make_http_client_with, make_streaming_client_with, retry_async};

/// Incremental text fragments of a streamed completion.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, GatewayError>> + Send>>;

#[async_trait]
pub trait CompletionApi: Send + Sync {
    /// One non-streamed call.
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, GatewayError>;

    /// One streamed call. The stream ends after the end-of-stream marker and
    /// yields an error if the body stops before it.
    async fn stream(&self, request: ChatRequest) -> Result<TextStream, GatewayError>;
}

#[derive(Clone)]
pub struct OpenAiCompatible {
    base: String,
    api_key: String,
    http: Client,
    streaming: Client,
    retries: u32,
}

impl OpenAiCompatible {
    pub fn from_config(cfg: &CompletionConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            base: cfg.base_url.clone(),
            api_key: cfg.api_key.clone(),
            http: make_http_client_with(&cfg.http)?,
            streaming: make_streaming_client_with(&cfg.http)?,
            retries: cfg.http.retries,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base.trim_end_matches('/'))
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    tracing::warn!(status = %status, body = %body, "completion api rejected request");
    Err(GatewayError::UpstreamStatus(status.as_u16()))
}

#[async_trait]
impl CompletionApi for OpenAiCompatible {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, GatewayError> {
        let url = self.endpoint();
        tracing::debug!(endpoint = %url, model = %request.model, messages = request.messages.len(), "completion request");
        let start = Instant::now();
        let request = &request;
        let res = retry_async(self.retries, GatewayError::is_retryable, |_| {
            let builder = self.http.post(&url).bearer_auth(&self.api_key).json(request);
            async move {
                let (builder, _rid) = add_standard_headers(builder, None);
                let resp = check_status(builder.send().await?).await?;
                Ok::<_, GatewayError>(resp.json::<ChatResponse>().await?)
            }
        })
        .await;
        if res.is_err() {
            crate::infra::logging::log_metric("completion", "completion_error_total", 1.0);
        }
        let out = res?;
        let elapsed_ms = start.elapsed().as_millis() as f64;
        crate::infra::logging::log_metric("completion", "completion_latency_ms", elapsed_ms);
        Ok(out)
    }

    async fn stream(&self, request: ChatRequest) -> Result<TextStream, GatewayError> {
        let url = self.endpoint();
        tracing::debug!(endpoint = %url, model = %request.model, "streaming completion request");
        let builder = self.streaming.post(&url).bearer_auth(&self.api_key).json(&request);
        let (builder, _rid) = add_standard_headers(builder, None);
        let resp = check_status(builder.send().await?).await?;
        let body = resp.bytes_stream().map(|r| r.map(|b| b.to_vec())).boxed();
        Ok(text_deltas(body))
    }
}

/// Splits a server-sent-events byte stream into `data:` payloads.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseData {
    Json(String),
    Done,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseData> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            if let Some(data) = parse_line(&line) {
                out.push(data);
            }
        }
        out
    }

    /// Whatever is left after the body ended without a trailing newline.
    pub fn finish(&mut self) -> Option<SseData> {
        let line = std::mem::take(&mut self.buffer);
        parse_line(&line)
    }
}

fn parse_line(line: &[u8]) -> Option<SseData> {
    let line = String::from_utf8_lossy(line);
    let data = line.trim_end_matches(['\r', '\n']).strip_prefix("data:")?.trim();
    match data {
        "" => None,
        "[DONE]" => Some(SseData::Done),
        json => Some(SseData::Json(json.to_owned())),
    }
}

fn delta_text(payload: &str) -> Result<Option<String>, GatewayError> {
    let chunk: StreamChunk = serde_json::from_str(payload)?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|t| !t.is_empty()))
}

struct DeltaState {
    body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    decoder: SseDecoder,
    queue: VecDeque<String>,
    finished: bool,
}

impl DeltaState {
    /// Queue text from decoded events; returns an error to surface, if any.
    fn absorb(&mut self, events: Vec<SseData>) -> Option<GatewayError> {
        for event in events {
            match event {
                SseData::Done => {
                    self.finished = true;
                    return None;
                }
                SseData::Json(payload) => match delta_text(&payload) {
                    Ok(Some(text)) => self.queue.push_back(text),
                    Ok(None) => {}
                    Err(e) => {
                        self.finished = true;
                        return Some(e);
                    }
                },
            }
        }
        None
    }
}

/// Turn a raw SSE body into text fragments, in arrival order.
pub fn text_deltas(body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>) -> TextStream {
    let state = DeltaState { body, decoder: SseDecoder::default(), queue: VecDeque::new(), finished: false };
    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(text) = st.queue.pop_front() {
                return Some((Ok(text), st));
            }
            if st.finished {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => {
                    let events = st.decoder.push(&bytes);
                    if let Some(e) = st.absorb(events) {
                        return Some((Err(e), st));
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(GatewayError::Http(e)), st));
                }
                None => {
                    let tail: Vec<SseData> = st.decoder.finish().into_iter().collect();
                    if let Some(e) = st.absorb(tail) {
                        return Some((Err(e), st));
                    }
                    if !st.finished {
                        st.finished = true;
                        return Some((
                            Err(GatewayError::Completion("stream ended before [DONE]".into())),
                            st,
                        ));
                    }
                }
            }
        }
    })
    .boxed()
}
