//! Outbound HTTP for deliveries

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// One signed POST
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// Target URL
    pub url: String,
    /// Header name/value pairs
    pub headers: Vec<(String, String)>,
    /// JSON body
    pub body: Vec<u8>,
}

impl OutboundRequest {
    /// First header value with `name` (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Receiver answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status
    pub status: u16,
    /// Response body, truncated
    pub body: String,
}

impl TransportResponse {
    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends delivery requests. `Err` means no HTTP response was received.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// POST the request
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, String>;
}

const MAX_BODY_CHARS: usize = 1024;

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Client with a per-request timeout
    pub fn new(timeout: Duration, user_agent: &str) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| crate::WebhookError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, String> {
        let mut builder = self
            .client
            .post(&request.url)
            .header("Content-Type", "application/json")
            .body(request.body.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                "request timed out".to_string()
            } else {
                e.to_string()
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(TransportResponse {
            status,
            body: body.chars().take(MAX_BODY_CHARS).collect(),
        })
    }
}

/// Records requests and answers from a script (then a default status)
#[derive(Debug)]
pub struct MemoryTransport {
    default_status: u16,
    script: Mutex<VecDeque<Result<u16, String>>>,
    sent: Mutex<Vec<OutboundRequest>>,
}

impl MemoryTransport {
    /// Always answer `status` once the script runs out
    pub fn with_status(status: u16) -> Self {
        Self {
            default_status: status,
            script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Queue one answer (`Err` = connection failure)
    pub fn push(&self, outcome: Result<u16, String>) {
        self.script.lock().push_back(outcome);
    }

    /// Requests sent so far
    pub fn sent(&self) -> Vec<OutboundRequest> {
        self.sent.lock().clone()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::with_status(200)
    }
}

#[async_trait]
impl WebhookTransport for MemoryTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, String> {
        self.sent.lock().push(request.clone());
        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(Ok(self.default_status));
        outcome.map(|status| TransportResponse {
            status,
            body: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> OutboundRequest {
        OutboundRequest {
            url: "https://example.com".to_string(),
            headers: vec![("X-Webhook-Id".to_string(), "abc".to_string())],
            body: b"{}".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_memory_transport_script() {
        let transport = MemoryTransport::with_status(200);
        transport.push(Ok(500));
        transport.push(Err("connection refused".to_string()));

        assert_eq!(transport.send(&request()).await.unwrap().status, 500);
        assert!(transport.send(&request()).await.is_err());
        assert!(transport.send(&request()).await.unwrap().is_success());
        assert_eq!(transport.sent().len(), 3);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        assert_eq!(request().header("x-webhook-id"), Some("abc"));
        assert_eq!(request().header("missing"), None);
    }
}
