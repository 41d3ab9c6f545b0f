use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response};

use crate::gateway::frames::BusinessRequest;

/// Longest slice of an error body quoted back to the client.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug)]
pub enum UpstreamError {
    InvalidHeader(String),
    Http(reqwest::Error),
    ServerError { status: u16, body: String },
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::InvalidHeader(name) => write!(f, "invalid request header {name:?}"),
            UpstreamError::Http(e) => {
                if e.is_timeout() {
                    write!(f, "request timed out: ")?;
                }
                write!(f, "{e}")?;
                // reqwest keeps the useful part (refused, reset, ...) in the source chain.
                let mut cause = std::error::Error::source(e);
                while let Some(inner) = cause {
                    write!(f, ": {inner}")?;
                    cause = inner.source();
                }
                Ok(())
            }
            UpstreamError::ServerError { status, body } if body.is_empty() => {
                write!(f, "server returned {status}")
            }
            UpstreamError::ServerError { status, body } => {
                write!(f, "server returned {status}: {body}")
            }
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        UpstreamError::Http(e)
    }
}

/// Client for the streaming inference service behind the gateway.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.to_string(),
            timeout,
        }
    }

    /// Full target address for a route suffix. Plain concatenation, no
    /// slash normalisation.
    pub fn endpoint(&self, resm: &str) -> String {
        format!("{}{}", self.base_url, resm)
    }

    /// POST the request and return the response with its body still unread.
    ///
    /// The timeout covers the whole exchange, so a stalled body read fails
    /// with `UpstreamError::Http` as well.
    pub async fn open_stream(&self, request: &BusinessRequest) -> Result<Response, UpstreamError> {
        let headers = header_map(&request.headers)?;
        let resp = self
            .client
            .post(self.endpoint(&request.resm))
            .headers(headers)
            .json(&request.data)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::ServerError {
                status: status.as_u16(),
                body: truncate(body.trim(), MAX_ERROR_BODY),
            });
        }

        Ok(resp)
    }
}

fn header_map(headers: &HashMap<String, String>) -> Result<HeaderMap, UpstreamError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| UpstreamError::InvalidHeader(name.clone()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| UpstreamError::InvalidHeader(name.as_str().to_string()))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Reassembles `\n`-terminated lines from arbitrarily split body chunks.
///
/// Bytes are held until a full line is available so multi-byte characters
/// split across chunks decode correctly. A trailing `\r` is stripped.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every line it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            lines.push(decode_line(line));
        }
        lines
    }

    /// Flush an unterminated final line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        Some(decode_line(std::mem::take(&mut self.pending)))
    }
}

fn decode_line(mut line: Vec<u8>) -> String {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8_lossy(&line).into_owned()
}
