//! HTTP portal client.
//!
//! Each command is one `POST /shell` request carrying the command line in
//! the `X-Shell` header. The first line of the response body is the JSON
//! envelope. Transport failures are retried inside the configured window;
//! malformed bodies are not.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use tokio::time::Instant;
use tracing::debug;

use crate::bridge::{parse_reply, BridgeError, BridgeResult, PortalReply, RemoteBridge};
use crate::retry::{retry, RetryPolicy};

/// Bridge to a portal reachable over plain HTTP/1.
#[derive(Debug, Clone)]
pub struct PortalClient {
    /// `host:port` of the portal.
    address: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl PortalClient {
    /// Create a client for `address` (`host:port`, an `http://` prefix and
    /// trailing slash are tolerated).
    pub fn new(address: &str) -> Self {
        let address = address
            .trim()
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string();
        Self {
            address,
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// One request, bounded by the per-request timeout.
    async fn send_once(&self, line: &str) -> BridgeResult<String> {
        match tokio::time::timeout(self.timeout, self.post_shell(line)).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Timeout(self.timeout)),
        }
    }

    async fn post_shell(&self, line: &str) -> BridgeResult<String> {
        let transport = |reason: String| BridgeError::Transport {
            portal: self.address.clone(),
            reason,
        };

        let stream = tokio::net::TcpStream::connect(&self.address)
            .await
            .map_err(|e| transport(format!("connect: {e}")))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| transport(format!("handshake: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("POST")
            .uri(format!("http://{}/shell", self.address))
            .header("host", &self.address)
            .header("user-agent", "podwarden/0.1")
            .header("x-shell", line)
            .body(Empty::<Bytes>::new())
            .map_err(|_| BridgeError::InvalidCommand(line.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| transport(format!("request: {e}")))?;

        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| transport(format!("body: {e}")))?
            .to_bytes();

        if !status.is_success() {
            return Err(transport(format!("HTTP {status}")));
        }

        String::from_utf8(body.to_vec()).map_err(|e| BridgeError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl RemoteBridge for PortalClient {
    async fn execute(&self, command: &str) -> BridgeResult<PortalReply> {
        let started = Instant::now();
        debug!(command, portal = %self.address, "->");

        let body = retry(self.retry, BridgeError::is_transient, || self.send_once(command)).await?;
        let reply = parse_reply(&body)?;

        debug!(
            command,
            portal = %self.address,
            ok = reply.ok,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "<-"
        );
        Ok(reply)
    }
}
