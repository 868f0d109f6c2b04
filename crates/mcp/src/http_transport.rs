//! HTTP transport for network providers (streamable HTTP).
//!
//! JSON-RPC requests go out as HTTP POST. Responses are either a JSON body or
//! a `text/event-stream` whose first `data:` frame holds the response. A
//! `Mcp-Session-Id` handed out by the server is echoed on every later request
//! and closed with a DELETE on shutdown.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    reqwest::{
        Client, RequestBuilder, StatusCode,
        header::{HeaderMap, HeaderName, HeaderValue},
    },
    secrecy::{ExposeSecret, Secret},
    tokio::sync::RwLock,
    tracing::{debug, warn},
};

use crate::{
    error::{Context, Error, Result},
    traits::McpTransport,
    types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION},
};

const MCP_PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
const MCP_SESSION_ID_HEADER: &str = "Mcp-Session-Id";
const STREAMABLE_ACCEPT_HEADER: &str = "application/json, text/event-stream";

/// HTTP transport for a remote provider.
pub struct HttpTransport {
    client: Client,
    url: String,
    next_id: AtomicU64,
    token: Option<Secret<String>>,
    session_id: RwLock<Option<String>>,
}

impl HttpTransport {
    pub fn new(url: &str) -> Result<Arc<Self>> {
        Self::build(url, None, &HashMap::new(), Duration::from_secs(60))
    }

    /// Transport with an optional bearer token and extra static headers.
    pub fn build(
        url: &str,
        token: Option<Secret<String>>,
        headers: &HashMap<String, String>,
        request_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let mut default_headers = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name '{name}'"))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid value for header '{name}'"))?;
            default_headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(request_timeout)
            .default_headers(default_headers)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Arc::new(Self {
            client,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
            token,
            session_id: RwLock::new(None),
        }))
    }

    async fn decorate(&self, mut req: RequestBuilder) -> RequestBuilder {
        req = req.header(MCP_PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION);
        if let Some(session_id) = self.session_id.read().await.clone() {
            req = req.header(MCP_SESSION_ID_HEADER, session_id);
        }
        if let Some(token) = &self.token {
            req = req.bearer_auth(token.expose_secret());
        }
        req
    }

    async fn post(&self, method: &str, body: &impl serde::Serialize) -> Result<reqwest::Response> {
        let req = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", STREAMABLE_ACCEPT_HEADER);
        let resp = self
            .decorate(req)
            .await
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST to '{}' for '{method}' failed", self.url))?;

        self.store_session_id(&resp).await;

        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(Error::Unauthorized {
                www_authenticate: resp
                    .headers()
                    .get("www-authenticate")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from),
            });
        }
        Ok(resp)
    }

    async fn store_session_id(&self, response: &reqwest::Response) {
        let Some(session_id) = response
            .headers()
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            return;
        };

        let mut slot = self.session_id.write().await;
        if slot.as_deref() != Some(session_id) {
            debug!(url = %self.url, session_id, "updated provider session id");
            *slot = Some(session_id.to_string());
        }
    }

    fn is_event_stream(resp: &reqwest::Response) -> bool {
        resp.headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|base| base.trim() == "text/event-stream")
    }

    /// First complete `data:` frame that parses as a JSON-RPC response.
    fn parse_event_stream(body: &str, method: &str) -> Result<JsonRpcResponse> {
        let mut data = String::new();
        for line in body.lines() {
            let line = line.trim_end();
            if let Some(rest) = line.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(rest.trim_start());
                continue;
            }
            if line.is_empty() && !data.is_empty() {
                if let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&data) {
                    return Ok(resp);
                }
                data.clear();
            }
        }
        if !data.is_empty()
            && let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&data)
        {
            return Ok(resp);
        }
        Err(Error::message(format!(
            "no JSON-RPC response in event stream for '{method}'"
        )))
    }
}

#[async_trait::async_trait]
impl McpTransport for HttpTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);
        debug!(method = %method, id = %id, url = %self.url, "client -> remote provider");

        let http_resp = self.post(method, &req).await?;
        if !http_resp.status().is_success() {
            let status = http_resp.status();
            let body = http_resp.text().await.unwrap_or_default();
            return Err(Error::message(format!(
                "provider returned HTTP {status} for '{method}': {body}"
            )));
        }

        let resp: JsonRpcResponse = if Self::is_event_stream(&http_resp) {
            let body = http_resp
                .text()
                .await
                .with_context(|| format!("failed to read event stream for '{method}'"))?;
            Self::parse_event_stream(&body, method)?
        } else {
            http_resp
                .json()
                .await
                .with_context(|| format!("failed to parse JSON-RPC response for '{method}'"))?
        };

        if let Some(err) = &resp.error {
            return Err(Error::Rpc {
                method: method.to_string(),
                code: err.code,
                message: err.message.clone(),
            });
        }
        Ok(resp)
    }

    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        let notif = JsonRpcNotification::new(method, params);
        let http_resp = self.post(method, &notif).await?;
        if !http_resp.status().is_success() {
            warn!(method = %method, status = %http_resp.status(), "notification returned non-success");
        }
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        let req = self
            .client
            .get(&self.url)
            .timeout(Duration::from_secs(5))
            .header("Accept", STREAMABLE_ACCEPT_HEADER);
        match self.decorate(req).await.send().await {
            Ok(resp) => resp.status() != StatusCode::UNAUTHORIZED,
            Err(_) => false,
        }
    }

    async fn kill(&self) {
        let Some(session_id) = self.session_id.write().await.take() else {
            return;
        };
        let req = self
            .client
            .delete(&self.url)
            .timeout(Duration::from_secs(5))
            .header(MCP_SESSION_ID_HEADER, session_id);
        let req = self.decorate(req).await;
        if let Err(e) = req.send().await {
            warn!(url = %self.url, error = %e, "failed to close provider session");
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_is_alive_unreachable() {
        let transport = HttpTransport::new("http://127.0.0.1:1/mcp").unwrap();
        assert!(!transport.is_alive().await);
    }

    #[tokio::test]
    async fn test_request_unreachable() {
        let transport = HttpTransport::new("http://127.0.0.1:1/mcp").unwrap();
        assert!(transport.request("test", None).await.is_err());
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let mut headers = HashMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        let result = HttpTransport::build("http://localhost/mcp", None, &headers, Duration::from_secs(1));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_401_is_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(401)
            .with_header("www-authenticate", r#"Bearer realm="test""#)
            .create_async()
            .await;

        let transport = HttpTransport::new(&server.url()).unwrap();
        let err = transport.request("test", None).await.unwrap_err();
        match err {
            Error::Unauthorized { www_authenticate } => {
                assert_eq!(www_authenticate.as_deref(), Some(r#"Bearer realm="test""#));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_json_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#)
            .create_async()
            .await;

        let transport = HttpTransport::new(&server.url()).unwrap();
        let resp = transport.request("test", None).await.unwrap();
        assert_eq!(resp.result.unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn test_rpc_error_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"bad params"}}"#)
            .create_async()
            .await;

        let transport = HttpTransport::new(&server.url()).unwrap();
        let err = transport.request("tools/call", None).await.unwrap_err();
        assert!(matches!(err, Error::Rpc { code: -32602, .. }));
    }

    #[tokio::test]
    async fn test_bearer_and_custom_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("authorization", "Bearer test-token-123")
            .match_header("x-team", "core")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#)
            .create_async()
            .await;

        let mut headers = HashMap::new();
        headers.insert("X-Team".to_string(), "core".to_string());
        let transport = HttpTransport::build(
            &server.url(),
            Some(Secret::new("test-token-123".to_string())),
            &headers,
            Duration::from_secs(5),
        )
        .unwrap();
        transport.request("test", None).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_propagates_session_id() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("mcp-session-id", "session-123")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#)
            .create_async()
            .await;
        let second = server
            .mock("POST", "/")
            .match_header("mcp-session-id", "session-123")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":2,"result":{}}"#)
            .create_async()
            .await;

        let transport = HttpTransport::new(&server.url()).unwrap();
        transport.request("initialize", None).await.unwrap();
        transport.request("tools/list", None).await.unwrap();
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_parses_event_stream_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(
                "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"ok\":true}}\n\n",
            )
            .create_async()
            .await;

        let transport = HttpTransport::new(&server.url()).unwrap();
        let resp = transport.request("initialize", None).await.unwrap();
        assert!(resp.result.is_some());
    }

    #[test]
    fn test_event_stream_without_data_fails() {
        let err = HttpTransport::parse_event_stream("event: ping\n\n", "x").unwrap_err();
        assert!(err.to_string().contains("no JSON-RPC response"));
    }

    #[tokio::test]
    async fn test_kill_sends_delete_with_session_id() {
        let mut server = mockito::Server::new_async().await;
        let init = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("mcp-session-id", "session-to-close")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#)
            .create_async()
            .await;
        let delete = server
            .mock("DELETE", "/")
            .match_header("mcp-session-id", "session-to-close")
            .with_status(204)
            .create_async()
            .await;

        let transport = HttpTransport::new(&server.url()).unwrap();
        transport.request("initialize", None).await.unwrap();
        transport.kill().await;
        init.assert_async().await;
        delete.assert_async().await;
    }
}
