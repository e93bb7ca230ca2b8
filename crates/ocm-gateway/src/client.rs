use async_trait::async_trait;
use ocm_core::config::MonitorConfig;
use ocm_core::model::{records_from_wire, subagents_from_wire, SessionRecord, SubagentNode};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::GatewayError;

pub const SESSIONS_TOOL: &str = "sessions_list";
pub const TREE_TOOL: &str = "sessions_tree";
pub const ACTIVE_MINUTES: u32 = 1440;
pub const TREE_DEPTH: u32 = 5;
/// Upper bound on one request; shorter poll intervals shrink it further.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Request timeout for a given poll interval: at most [`REQUEST_TIMEOUT`]
/// and always below the interval, so a hung request cannot eat a tick.
pub fn request_timeout_for(poll_interval: Duration) -> Duration {
    REQUEST_TIMEOUT.min(poll_interval.mul_f64(0.8))
}

/// Anything that can produce the current session list.
#[async_trait]
pub trait SessionSource: Send {
    async fn fetch_sessions(&mut self) -> Result<Vec<SessionRecord>, GatewayError>;

    /// Sub-agent tree for the summary bar. Best effort: any failure is an
    /// empty list.
    async fn fetch_tree(&mut self) -> Vec<SubagentNode> {
        Vec::new()
    }

    /// Release held connections. Called once when polling stops.
    async fn close(&mut self) {}
}

#[derive(Debug, Serialize)]
struct InvokeRequest<'a, I> {
    tool: &'a str,
    input: I,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionsListInput {
    active_minutes: u32,
}

#[derive(Debug, Serialize)]
struct SessionsTreeInput {
    depth: u32,
}

/// HTTP client for the gateway's `/tools/invoke` endpoint.
///
/// The underlying `reqwest::Client` is built on first use and dropped by
/// [`SessionSource::close`]; a later fetch builds a fresh one.
#[derive(Debug)]
pub struct GatewayClient {
    base_url: String,
    token: Option<String>,
    timeout: Duration,
    http: Option<reqwest::Client>,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|token| !token.is_empty()),
            timeout: REQUEST_TIMEOUT,
            http: None,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.base_url(), config.token.clone())
            .with_timeout(request_timeout_for(config.poll_interval))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_open(&self) -> bool {
        self.http.is_some()
    }

    fn http(&mut self) -> Result<reqwest::Client, GatewayError> {
        if let Some(client) = &self.http {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|err| GatewayError::Unreachable(format!("http client init failed: {err}")))?;
        info!("gateway_client_created: {}", self.base_url);
        self.http = Some(client.clone());
        Ok(client)
    }

    /// POST one tool call to `/tools/invoke` and return the decoded body.
    async fn invoke<I>(&mut self, tool: &str, input: I) -> Result<Value, GatewayError>
    where
        I: Serialize + Send,
    {
        let http = self.http()?;
        let url = format!("{}/tools/invoke", self.base_url);
        let mut request = http.post(&url).json(&InvokeRequest { tool, input });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| GatewayError::from_transport(err, self.timeout))?;
        let status = response.status().as_u16();
        if let Some(err) = GatewayError::from_status(status) {
            warn!("gateway_status: HTTP {status} from {url} ({tool})");
            return Err(err);
        }

        response
            .json()
            .await
            .map_err(|err| GatewayError::from_transport(err, self.timeout))
    }
}

#[async_trait]
impl SessionSource for GatewayClient {
    async fn fetch_sessions(&mut self) -> Result<Vec<SessionRecord>, GatewayError> {
        let body = self
            .invoke(
                SESSIONS_TOOL,
                SessionsListInput {
                    active_minutes: ACTIVE_MINUTES,
                },
            )
            .await?;
        let records = parse_sessions_envelope(&body)?;
        debug!("gateway_sessions_fetched: {}", records.len());
        Ok(records)
    }

    async fn fetch_tree(&mut self) -> Vec<SubagentNode> {
        let body = match self.invoke(TREE_TOOL, SessionsTreeInput { depth: TREE_DEPTH }).await {
            Ok(body) => body,
            Err(err) => {
                warn!("gateway_tree_failed: {err}");
                return Vec::new();
            }
        };
        match parse_tree_envelope(&body) {
            Ok(nodes) => nodes,
            Err(err) => {
                warn!("gateway_tree_failed: {err}");
                Vec::new()
            }
        }
    }

    async fn close(&mut self) {
        if self.http.take().is_some() {
            info!("gateway_client_closed: {}", self.base_url);
        }
    }
}

/// Pull `result.details.sessions` out of an invoke response.
pub fn parse_sessions_envelope(body: &Value) -> Result<Vec<SessionRecord>, GatewayError> {
    let sessions = body
        .pointer("/result/details/sessions")
        .and_then(Value::as_array)
        .ok_or_else(|| GatewayError::Decode("missing result.details.sessions array".to_string()))?;
    Ok(records_from_wire(sessions))
}

/// Pull `result.details.tree` out of an invoke response.
pub fn parse_tree_envelope(body: &Value) -> Result<Vec<SubagentNode>, GatewayError> {
    let tree = body
        .pointer("/result/details/tree")
        .and_then(Value::as_array)
        .ok_or_else(|| GatewayError::Decode("missing result.details.tree array".to_string()))?;
    Ok(subagents_from_wire(tree))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Reads one full HTTP request and returns it as text.
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.expect("read");
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    return text;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    /// One-shot server answering a single request with `status` and `body`.
    async fn serve_once(
        status: &'static str,
        body: String,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let request = read_request(&mut stream).await;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.expect("write");
            stream.shutdown().await.ok();
            request
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn envelope_sessions_are_extracted() {
        let body = json!({
            "ok": true,
            "result": {"details": {"count": 2, "sessions": [
                {"key": "agent:main:main", "updatedAt": 1},
                {"key": "agent:ops:cron:1", "abortedLastRun": true}
            ]}}
        });
        let records = parse_sessions_envelope(&body).expect("records");
        assert_eq!(records.len(), 2);
        assert!(records[1].aborted_last_run);
    }

    #[test]
    fn envelope_without_sessions_is_a_decode_error() {
        let err = parse_sessions_envelope(&json!({"result": {"details": {}}})).unwrap_err();
        assert!(matches!(err, GatewayError::Decode(_)));
        let err = parse_sessions_envelope(&json!({"result": {"details": {"sessions": 3}}}))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Decode(_)));
    }

    #[tokio::test]
    async fn fetch_posts_invoke_request_with_bearer_token() {
        let body = json!({"result": {"details": {"sessions": [{"key": "agent:main:main"}]}}});
        let (base_url, server) = serve_once("200 OK", body.to_string()).await;
        let mut client = GatewayClient::new(format!("{base_url}/"), Some("secret".to_string()));

        let records = client.fetch_sessions().await.expect("sessions");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].agent_id(), "main");
        assert!(client.is_open());

        let request = server.await.expect("server");
        assert!(request.starts_with("POST /tools/invoke HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer secret"));
        assert!(request.contains(r#""tool":"sessions_list""#));
        assert!(request.contains(r#""activeMinutes":1440"#));

        client.close().await;
        assert!(!client.is_open());
    }

    #[tokio::test]
    async fn forbidden_maps_to_auth_error() {
        let (base_url, server) = serve_once("403 Forbidden", String::new()).await;
        let mut client = GatewayClient::new(base_url, None);
        let err = client.fetch_sessions().await.unwrap_err();
        assert!(err.is_auth());
        let request = server.await.expect("server");
        assert!(!request.to_ascii_lowercase().contains("authorization:"));
    }

    #[tokio::test]
    async fn server_error_is_neither_auth_nor_connectivity() {
        let (base_url, _server) = serve_once("500 Internal Server Error", "{}".to_string()).await;
        let mut client = GatewayClient::new(base_url, None);
        let err = client.fetch_sessions().await.unwrap_err();
        assert!(matches!(err, GatewayError::Status { status: 500 }));
    }

    #[tokio::test]
    async fn non_json_body_is_a_decode_error() {
        let (base_url, _server) = serve_once("200 OK", "not json".to_string()).await;
        let mut client = GatewayClient::new(base_url, None);
        let err = client.fetch_sessions().await.unwrap_err();
        assert!(matches!(err, GatewayError::Decode(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let mut client = GatewayClient::new(format!("http://{addr}"), None);
        let err = client.fetch_sessions().await.unwrap_err();
        assert!(err.is_connectivity(), "got {err:?}");
    }

    #[tokio::test]
    async fn silent_gateway_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(stream);
        });
        let mut client = GatewayClient::new(format!("http://{addr}"), None)
            .with_timeout(Duration::from_millis(200));
        let err = client.fetch_sessions().await.unwrap_err();
        assert!(matches!(err, GatewayError::Timeout(_)), "got {err:?}");
    }

    #[test]
    fn request_timeout_stays_below_poll_interval() {
        let mut config = MonitorConfig::default();
        let client = GatewayClient::from_config(&config);
        assert!(client.timeout() < config.poll_interval);
        assert!(client.timeout() <= REQUEST_TIMEOUT);

        config.set_poll_interval_ms(0);
        let client = GatewayClient::from_config(&config);
        assert!(client.timeout() < config.poll_interval);
        assert!(!client.timeout().is_zero());

        config.set_poll_interval_ms(60_000);
        assert_eq!(GatewayClient::from_config(&config).timeout(), REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn tree_fetch_posts_tree_tool_and_parses_nodes() {
        let body = json!({"result": {"details": {"tree": [
            {"key": "agent:main:main", "status": "active", "children": [
                {"key": "agent:main:subagent:a", "status": "completed", "runtimeMs": 61000}
            ]}
        ]}}});
        let (base_url, server) = serve_once("200 OK", body.to_string()).await;
        let mut client = GatewayClient::new(base_url, Some("secret".to_string()));

        let nodes = client.fetch_tree().await;
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].children[0].runtime_ms, 61_000);

        let request = server.await.expect("server");
        assert!(request.contains(r#""tool":"sessions_tree""#));
        assert!(request.contains(r#""depth":5"#));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer secret"));
    }

    #[tokio::test]
    async fn tree_fetch_failures_collapse_to_empty() {
        let (base_url, _server) = serve_once("401 Unauthorized", String::new()).await;
        assert!(GatewayClient::new(base_url, None).fetch_tree().await.is_empty());

        let body = json!({"result": {"details": {"sessions": []}}});
        let (base_url, _server) = serve_once("200 OK", body.to_string()).await;
        assert!(GatewayClient::new(base_url, None).fetch_tree().await.is_empty());

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let mut client = GatewayClient::new(format!("http://{addr}"), None);
        assert!(client.fetch_tree().await.is_empty());
    }
}
