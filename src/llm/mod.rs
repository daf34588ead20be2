//! Reqwest-based LLM client implementing OpenAI-compatible Chat Completions streaming.

use std::{pin::Pin, time::Duration};

use anyhow::{Context, Result};
use async_stream::try_stream;
use futures_core::Stream;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::config::Config;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl ChatOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            model: cfg.get("DEFAULT_MODEL").unwrap_or_else(|| "gpt-4o".into()),
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: cfg
                .get("MAX_TOKENS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(2048),
        }
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl LlmClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        // Connection setup only; the whole stream is bounded by the synthesis timeout.
        let connect_timeout = cfg
            .get("REQUEST_TIMEOUT")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(60);
        let api_base_url = cfg.get("API_BASE_URL").unwrap_or_else(|| "default".into());
        let base_url = normalize_base_url(&api_base_url);
        let api_key = cfg.get("OPENAI_API_KEY");
        if api_key.is_none() {
            tracing::warn!("OPENAI_API_KEY is not set; requests will be sent unauthenticated");
        }

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .build()?;

        Ok(Self { http, base_url, api_key })
    }

    pub fn chat_stream(&self, messages: Vec<ChatMessage>, opts: ChatOptions) -> EventStream {
        let http = self.http.clone();
        let base_url = self.base_url.clone();
        let api_key = self.api_key.clone();

        Box::pin(try_stream! {
            let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));

            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("text/event-stream"));
            if let Some(key) = api_key {
                let hv = HeaderValue::from_str(&format!("Bearer {}", key))?;
                headers.insert(AUTHORIZATION, hv);
            }

            let body = serde_json::json!({
                "model": opts.model,
                "temperature": opts.temperature,
                "top_p": opts.top_p,
                "messages": messages,
                "stream": true,
                "max_tokens": opts.max_tokens,
            });

            tracing::debug!(%url, model = %opts.model, "sending chat completion request");
            let resp = http
                .post(url)
                .headers(headers)
                .json(&body)
                .send()
                .await
                .context("failed to send chat request")?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                Err::<(), _>(anyhow::anyhow!("LLM error: {} {}", status, text.trim()))?;
                return;
            }

            // raw bytes until a full line arrives; a chunk may end inside a UTF-8 sequence
            let mut buf: Vec<u8> = Vec::new();
            let mut stream = resp.bytes_stream();
            use futures_util::StreamExt as _;

            while let Some(chunk) = stream.next().await {
                let bytes = chunk.context("stream error")?;
                buf.extend_from_slice(&bytes);
                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = buf.drain(..=pos).collect();
                    let line = std::str::from_utf8(&raw).context("stream line is not valid UTF-8")?;
                    match parse_sse_line(line) {
                        Some(StreamEvent::Done) => {
                            yield StreamEvent::Done;
                            return;
                        }
                        Some(ev) => yield ev,
                        None => {}
                    }
                }
            }
            if let Ok(line) = std::str::from_utf8(&buf) {
                if let Some(StreamEvent::Content(text)) = parse_sse_line(line) {
                    yield StreamEvent::Content(text);
                }
            }
            yield StreamEvent::Done;
        })
    }
}

fn normalize_base_url(api_base_url: &str) -> String {
    if api_base_url == "default" {
        return "https://api.openai.com/v1".to_string();
    }
    let trimmed = api_base_url.trim_end_matches('/');
    if !trimmed.ends_with("/v1") && !trimmed.contains("/v1/") {
        format!("{}/v1", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Decode one SSE line. Comments, blank lines and malformed payloads yield `None`.
fn parse_sse_line(line: &str) -> Option<StreamEvent> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    let payload = line.strip_prefix("data:")?.trim();
    if payload == "[DONE]" {
        return Some(StreamEvent::Done);
    }
    let chunk: Chunk = serde_json::from_str(payload).ok()?;
    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.and_then(|d| d.content))
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(StreamEvent::Content(text))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Content(String),
    Done,
}

// Minimal chunk structures for OpenAI-like streaming
#[derive(Debug, Deserialize)]
struct Chunk {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_delta_is_decoded() {
        let line = r#"data: {"id":"x","choices":[{"delta":{"content":"print("},"finish_reason":null}]}"#;
        assert_eq!(
            parse_sse_line(line),
            Some(StreamEvent::Content("print(".into()))
        );
    }

    #[test]
    fn done_marker() {
        assert_eq!(parse_sse_line("data: [DONE]\n"), Some(StreamEvent::Done));
    }

    #[test]
    fn noise_is_skipped() {
        assert_eq!(parse_sse_line(": keep-alive"), None);
        assert_eq!(parse_sse_line("   "), None);
        assert_eq!(parse_sse_line("data: {not json"), None);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            None
        );
    }

    #[test]
    fn base_url_gets_v1_suffix() {
        assert_eq!(normalize_base_url("default"), "https://api.openai.com/v1");
        assert_eq!(
            normalize_base_url("http://localhost:11434/"),
            "http://localhost:11434/v1"
        );
        assert_eq!(
            normalize_base_url("https://proxy.example/v1/"),
            "https://proxy.example/v1"
        );
    }

    mod wire {
        use std::time::Duration;

        use futures_util::StreamExt;
        use tokio::{
            io::{AsyncReadExt, AsyncWriteExt},
            net::TcpListener,
        };

        use super::super::*;

        /// Serves one request, writing `head` and then each body part as its own write.
        async fn serve_once(head: &'static str, parts: Vec<Vec<u8>>) -> String {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                let (mut sock, _) = listener.accept().await.unwrap();
                read_request(&mut sock).await;
                sock.write_all(head.as_bytes()).await.unwrap();
                for part in parts {
                    sock.write_all(&part).await.unwrap();
                    sock.flush().await.unwrap();
                    tokio::time::sleep(Duration::from_millis(30)).await;
                }
                sock.shutdown().await.ok();
            });
            format!("http://{addr}")
        }

        async fn read_request(sock: &mut tokio::net::TcpStream) {
            let mut req = Vec::new();
            let mut tmp = [0u8; 4096];
            loop {
                let n = sock.read(&mut tmp).await.unwrap();
                if n == 0 {
                    return;
                }
                req.extend_from_slice(&tmp[..n]);
                let Some(end) = req.windows(4).position(|w| w == b"\r\n\r\n") else {
                    continue;
                };
                let head = String::from_utf8_lossy(&req[..end]).to_ascii_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if req.len() >= end + 4 + len {
                    return;
                }
            }
        }

        fn client(base: &str) -> LlmClient {
            LlmClient {
                http: reqwest::Client::builder().no_proxy().build().unwrap(),
                base_url: normalize_base_url(base),
                api_key: Some("sk-test".into()),
            }
        }

        fn opts() -> ChatOptions {
            ChatOptions {
                model: "test-model".into(),
                temperature: 0.0,
                top_p: 1.0,
                max_tokens: 16,
            }
        }

        fn delta(text: &str) -> String {
            format!(
                "data: {}\n\n",
                serde_json::json!({"choices": [{"delta": {"content": text}}]})
            )
        }

        const SSE_HEAD: &str =
            "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n";

        async fn collect(base: &str) -> Vec<Result<StreamEvent>> {
            let messages = vec![ChatMessage::new(Role::User, "hi")];
            client(base).chat_stream(messages, opts()).collect().await
        }

        fn content(events: Vec<Result<StreamEvent>>) -> String {
            events
                .into_iter()
                .map(|ev| match ev.unwrap() {
                    StreamEvent::Content(text) => text,
                    StreamEvent::Done => String::new(),
                })
                .collect()
        }

        #[tokio::test]
        async fn error_status_ends_stream_with_error() {
            let base = serve_once(
                "HTTP/1.1 401 Unauthorized\r\nContent-Length: 9\r\nConnection: close\r\n\r\nbad token",
                Vec::new(),
            )
            .await;
            let events = collect(&base).await;
            assert_eq!(events.len(), 1);
            let err = events.into_iter().next().unwrap().unwrap_err().to_string();
            assert!(err.contains("401"), "{err}");
            assert!(err.contains("bad token"), "{err}");
        }

        #[tokio::test]
        async fn line_split_across_chunks_is_reassembled() {
            let body = format!("{}{}data: [DONE]\n\n", delta("print("), delta("1)"));
            let (a, b) = body.as_bytes().split_at(body.len() / 2);
            let base = serve_once(SSE_HEAD, vec![a.to_vec(), b.to_vec()]).await;
            let events = collect(&base).await;
            assert!(matches!(events.last(), Some(Ok(StreamEvent::Done))));
            assert_eq!(content(events), "print(1)");
        }

        #[tokio::test]
        async fn multibyte_char_split_across_chunks_survives() {
            let body = format!("{}data: [DONE]\n\n", delta("print('25°C')"));
            let bytes = body.into_bytes();
            // split between the two bytes of the degree sign
            let at = bytes.iter().position(|&b| b == 0xC2).unwrap() + 1;
            let base = serve_once(SSE_HEAD, vec![bytes[..at].to_vec(), bytes[at..].to_vec()]).await;
            assert_eq!(content(collect(&base).await), "print('25°C')");
        }

        #[tokio::test]
        async fn done_marker_stops_reading() {
            let body = format!("{}data: [DONE]\n\n{}", delta("x = 1"), delta("ignored"));
            let base = serve_once(SSE_HEAD, vec![body.into_bytes()]).await;
            let events = collect(&base).await;
            assert_eq!(events.len(), 2);
            assert_eq!(content(events), "x = 1");
        }
    }
}
