//! Remote transport: push endpoint, snapshot export and reachability probes.

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::compression::EncodedPayload;
use super::snapshot::ensure_within_limit;
use crate::config::SyncConfig;
use crate::connectivity::ReachabilityProbe;
use crate::error::{Error, Result};
use crate::models::{Collection, Conflict, DeviceType, MutationQueueItem, SyncMetadata};
use crate::util::compact_text;

const PING_ROUTE: &str = "/api/ping";
const STATE_ROUTE: &str = "/api/sync/state";
const SYNC_ROUTE: &str = "/api/sync";
const EXPORT_ROUTE: &str = "/api/export";

/// Body of a push request before encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub device_id: String,
    pub device_type: DeviceType,
    pub timestamp: i64,
    pub items: Vec<MutationQueueItem>,
}

/// Record version sent back by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteUpdate {
    #[serde(rename = "type", alias = "collection")]
    pub collection: Collection,
    pub data: Value,
}

/// Server reply to a push.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    #[serde(default)]
    pub updates: Vec<RemoteUpdate>,
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
    #[serde(default)]
    pub sync_token: Option<String>,
}

/// Snapshot bytes downloaded from the remote export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSnapshot {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    /// URL the snapshot came from
    pub source: String,
}

/// Operations the sync engine needs from the remote side.
pub trait RemoteTransport {
    /// Deliver one encoded batch
    fn push(
        &self,
        metadata: &SyncMetadata,
        payload: &EncodedPayload,
    ) -> impl Future<Output = Result<SyncResponse>> + Send;

    /// Download the canonical export
    fn fetch_snapshot(&self) -> impl Future<Output = Result<RemoteSnapshot>> + Send;
}

/// Whether a request may be sent again to the next base URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    /// Any failure moves on to the next URL
    Always,
    /// Only a failure to reach the URL moves on; an HTTP reply is final
    Unreached,
}

/// HTTP implementation talking to the peer's application endpoint.
///
/// Every request tries the primary base URL first and the fallback when the
/// primary fails. A push is only re-sent when the primary never answered.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_urls: Vec<String>,
    /// Largest snapshot body accepted from the export route
    max_body_size: u64,
}

impl HttpTransport {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        let base_urls = [&config.server_url, &config.fallback_url]
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        Ok(Self {
            client,
            base_urls,
            max_body_size: config.max_file_size,
        })
    }

    /// Base URLs in the order they are tried.
    pub fn base_urls(&self) -> &[String] {
        &self.base_urls
    }

    async fn send_with_fallback(
        &self,
        route: &str,
        replay: Replay,
        build: impl Fn(&str) -> reqwest::RequestBuilder + Send + Sync,
    ) -> Result<reqwest::Response> {
        let mut last_error = Error::Network("no server URL configured".to_string());

        for base_url in &self.base_urls {
            let url = format!("{base_url}{route}");
            match build(&url).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    let error = Error::Network(format!(
                        "{url} returned HTTP {status}: {}",
                        compact_text(&body)
                    ));
                    if replay == Replay::Unreached {
                        return Err(error);
                    }
                    last_error = error;
                }
                Err(error) => {
                    tracing::debug!("Request to {url} failed: {error}");
                    let unreached = error.is_connect() || error.is_timeout();
                    if replay == Replay::Unreached && !unreached {
                        return Err(Error::Http(error));
                    }
                    last_error = Error::Http(error);
                }
            }
        }

        Err(last_error)
    }
}

impl ReachabilityProbe for HttpTransport {
    async fn probe_peer(&self) -> Result<()> {
        self.send_with_fallback(PING_ROUTE, Replay::Always, |url| self.client.get(url))
            .await
            .map(|_| ())
    }

    async fn probe_server(&self) -> Result<()> {
        self.send_with_fallback(STATE_ROUTE, Replay::Always, |url| {
            self.client
                .get(url)
                .header(reqwest::header::ACCEPT, "application/json")
        })
        .await
        .map(|_| ())
    }
}

impl RemoteTransport for HttpTransport {
    async fn push(&self, metadata: &SyncMetadata, payload: &EncodedPayload) -> Result<SyncResponse> {
        let response = self
            .send_with_fallback(SYNC_ROUTE, Replay::Unreached, |url| {
                self.client
                    .post(url)
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .header(reqwest::header::ACCEPT, "application/json")
                    .header("X-Device-Id", metadata.device_id.as_str())
                    .header("X-Device-Type", metadata.device_type.as_str())
                    .header(
                        "X-Compressed",
                        if payload.compressed { "true" } else { "false" },
                    )
                    .body(payload.body.clone())
            })
            .await?;

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(SyncResponse::default());
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn fetch_snapshot(&self) -> Result<RemoteSnapshot> {
        let mut response = self
            .send_with_fallback(EXPORT_ROUTE, Replay::Always, |url| {
                self.client
                    .get(url)
                    .header(reqwest::header::ACCEPT, "application/json")
            })
            .await?;

        let source = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);

        if let Some(length) = response.content_length() {
            ensure_within_limit(length, self.max_body_size)?;
        }
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            ensure_within_limit((bytes.len() + chunk.len()) as u64, self.max_body_size)?;
            bytes.extend_from_slice(&chunk);
        }

        Ok(RemoteSnapshot {
            bytes,
            content_type,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::compression::encode_payload;
    use serde_json::json;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Serve one raw HTTP response on a local port.
    fn serve_raw(response: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buffer = [0_u8; 4096];
                let _ = stream.read(&mut buffer);
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{address}")
    }

    /// Serve one canned HTTP response on a local port.
    fn serve_once(status_line: &'static str, body: &'static str) -> String {
        serve_raw(format!(
            "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        ))
    }

    fn transport(server_url: Option<String>, fallback_url: Option<String>) -> HttpTransport {
        transport_with(SyncConfig {
            server_url,
            fallback_url,
            ..SyncConfig::default()
        })
    }

    fn transport_with(config: SyncConfig) -> HttpTransport {
        HttpTransport::new(&SyncConfig {
            request_timeout_ms: 2_000,
            ..config
        })
        .unwrap()
    }

    fn push_payload() -> (SyncMetadata, EncodedPayload) {
        (
            SyncMetadata::new(DeviceType::MacBook),
            encode_payload(r#"{"items":[]}"#.to_string(), usize::MAX),
        )
    }

    #[tokio::test]
    async fn test_without_urls_every_call_fails() {
        let transport = transport(None, None);
        let error = transport.probe_peer().await.unwrap_err();
        assert!(matches!(error, Error::Network(message) if message.contains("no server URL")));
    }

    #[tokio::test]
    async fn test_probe_falls_back_when_primary_is_down() {
        let fallback = serve_once("HTTP/1.1 200 OK", "{}");
        let transport = transport(Some("http://127.0.0.1:1".to_string()), Some(fallback));

        transport.probe_peer().await.unwrap();
    }

    #[tokio::test]
    async fn test_error_status_is_a_network_error() {
        let url = serve_once("HTTP/1.1 503 Service Unavailable", r#"{"error":"maintenance"}"#);
        let transport = transport(Some(url), None);

        let error = transport.probe_server().await.unwrap_err();
        assert!(matches!(error, Error::Network(message) if message.contains("503")));
        assert!(transport.probe_server().await.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_snapshot_returns_bytes_and_type() {
        let url = serve_once("HTTP/1.1 200 OK", r#"{"agenda":[]}"#);
        let transport = transport(Some(url), None);

        let snapshot = transport.fetch_snapshot().await.unwrap();
        assert_eq!(snapshot.bytes, br#"{"agenda":[]}"#.to_vec());
        assert_eq!(snapshot.content_type.as_deref(), Some("application/json"));
        assert!(snapshot.source.ends_with("/api/export"));
    }

    #[tokio::test]
    async fn test_fetch_snapshot_refuses_declared_oversized_body() {
        let url = serve_once("HTTP/1.1 200 OK", r#"{"agenda":[1,2,3,4,5,6,7,8]}"#);
        let transport = transport_with(SyncConfig {
            server_url: Some(url),
            max_file_size: 8,
            ..SyncConfig::default()
        });

        let error = transport.fetch_snapshot().await.unwrap_err();
        assert!(matches!(error, Error::InputRejected(message) if message.contains("too large")));
    }

    #[tokio::test]
    async fn test_fetch_snapshot_stops_reading_past_the_limit() {
        let body = format!(r#"{{"agenda":"{}"}}"#, "x".repeat(4_096));
        let url = serve_raw(format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n{body}"
        ));
        let transport = transport_with(SyncConfig {
            server_url: Some(url),
            max_file_size: 1_024,
            ..SyncConfig::default()
        });

        let error = transport.fetch_snapshot().await.unwrap_err();
        assert!(matches!(error, Error::InputRejected(_)));
    }

    #[tokio::test]
    async fn test_push_is_not_replayed_after_an_http_error() {
        let primary = serve_once("HTTP/1.1 503 Service Unavailable", "{}");
        let fallback = TcpListener::bind("127.0.0.1:0").unwrap();
        fallback.set_nonblocking(true).unwrap();
        let fallback_url = format!("http://{}", fallback.local_addr().unwrap());
        let transport = transport(Some(primary), Some(fallback_url));

        let (metadata, payload) = push_payload();
        let error = transport.push(&metadata, &payload).await.unwrap_err();
        assert!(matches!(error, Error::Network(message) if message.contains("503")));
        assert!(fallback.accept().is_err(), "fallback must not be contacted");
    }

    #[tokio::test]
    async fn test_push_falls_back_when_primary_is_unreachable() {
        let fallback = serve_once("HTTP/1.1 200 OK", r#"{"syncToken":"tok-7"}"#);
        let transport = transport(Some("http://127.0.0.1:1".to_string()), Some(fallback));

        let (metadata, payload) = push_payload();
        let response = transport.push(&metadata, &payload).await.unwrap();
        assert_eq!(response.sync_token.as_deref(), Some("tok-7"));
    }

    #[test]
    fn test_sync_response_wire_shape() {
        let response: SyncResponse = serde_json::from_value(json!({
            "updates": [{ "type": "expertise", "data": { "id": "e1", "numero_dossier": "N" } }],
            "conflicts": [],
            "syncToken": "tok-42"
        }))
        .unwrap();
        assert_eq!(response.updates[0].collection, Collection::Expertises);
        assert_eq!(response.sync_token.as_deref(), Some("tok-42"));

        let empty: SyncResponse = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty, SyncResponse::default());
    }

    #[test]
    fn test_base_urls_order() {
        let transport = transport(
            Some("https://peer.tailnet".to_string()),
            Some("http://192.168.1.20:8080".to_string()),
        );
        assert_eq!(
            transport.base_urls(),
            ["https://peer.tailnet", "http://192.168.1.20:8080"]
        );
    }
}
