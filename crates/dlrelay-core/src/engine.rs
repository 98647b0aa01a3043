//! Engine client adapter
//!
//! Submits transfers to the external download engine and hands back the
//! gid it assigns. The engine speaks aria2-style JSON-RPC; every call is
//! bounded by a timeout so an unresponsive engine cannot stall a request.

use crate::capability::CapabilityRegistry;
use crate::error::DlrelayError;
use async_trait::async_trait;
use data_encoding::{BASE32, HEXLOWER, HEXLOWER_PERMISSIVE};
use dlrelay_types::{HttpAuth, SourceKind};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Default upper bound for a submission
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(5);

/// The external download engine
#[async_trait]
pub trait DownloadEngine: Send + Sync {
    /// Queue a new transfer and return its gid
    async fn add_uri(&self, uri: &str, auth: Option<&HttpAuth>) -> Result<String, DlrelayError>;
}

/// JSON-RPC client for an aria2 daemon
pub struct Aria2Client {
    client: Client,
    endpoint: String,
    secret: Option<String>,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcReply {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl Aria2Client {
    /// Create a client for the engine at `endpoint`
    pub fn new(
        endpoint: impl Into<String>,
        secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DlrelayError> {
        let client = Client::builder()
            .user_agent(concat!("dlrelay/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| DlrelayError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            secret,
            next_id: AtomicU64::new(1),
        })
    }

    fn build_params(&self, uri: &str, auth: Option<&HttpAuth>) -> Value {
        let mut params = Vec::with_capacity(3);
        if let Some(secret) = &self.secret {
            params.push(json!(format!("token:{}", secret)));
        }
        params.push(json!([uri]));
        if let Some(auth) = auth {
            params.push(json!({
                "http-user": auth.username,
                "http-passwd": auth.password,
            }));
        }
        Value::Array(params)
    }
}

#[async_trait]
impl DownloadEngine for Aria2Client {
    async fn add_uri(&self, uri: &str, auth: Option<&HttpAuth>) -> Result<String, DlrelayError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": format!("dlrelay-{}", id),
            "method": "aria2.addUri",
            "params": self.build_params(uri, auth),
        });

        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        // aria2 reports RPC errors with a 4xx status and a JSON body
        let reply: RpcReply = response.json().await.map_err(|e| {
            DlrelayError::EngineUnavailable(format!("unreadable engine reply ({}): {}", status, e))
        })?;

        if let Some(error) = reply.error {
            return Err(DlrelayError::InvalidRequest(format!(
                "engine rejected {} (code {}): {}",
                uri, error.code, error.message
            )));
        }

        match reply.result {
            Some(Value::String(gid)) if !gid.is_empty() => Ok(gid),
            other => Err(DlrelayError::EngineUnavailable(format!(
                "engine returned no gid: {:?}",
                other
            ))),
        }
    }
}

/// Successful submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub gid: String,
    /// URI that was actually handed to the engine
    pub uri: String,
    /// Info hash carried by a magnet link
    pub info_hash: Option<String>,
}

/// Validates requests and submits them to the engine under a timeout
#[derive(Clone)]
pub struct EngineAdapter {
    engine: Arc<dyn DownloadEngine>,
    capabilities: Arc<CapabilityRegistry>,
    timeout: Duration,
}

impl EngineAdapter {
    pub fn new(
        engine: Arc<dyn DownloadEngine>,
        capabilities: Arc<CapabilityRegistry>,
        timeout: Duration,
    ) -> Self {
        Self {
            engine,
            capabilities,
            timeout,
        }
    }

    /// Submit a transfer.
    ///
    /// Nothing is recorded anywhere on failure; the caller only creates a
    /// task from a returned [`Submission`].
    pub async fn submit(
        &self,
        uri: &str,
        kind: SourceKind,
        auth: Option<&HttpAuth>,
    ) -> Result<Submission, DlrelayError> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(DlrelayError::Validation("uri must not be empty".to_string()));
        }

        let parsed = Url::parse(uri)
            .map_err(|e| DlrelayError::InvalidRequest(format!("malformed uri {}: {}", uri, e)))?;

        if auth.is_some() && kind != SourceKind::Http {
            return Err(DlrelayError::InvalidRequest(
                "credentials only apply to http downloads".to_string(),
            ));
        }

        let (engine_uri, info_hash) = match kind {
            SourceKind::Torrent => match parsed.scheme() {
                "magnet" => {
                    let hash = magnet_info_hash(&parsed)?.ok_or_else(|| {
                        DlrelayError::InvalidRequest(format!("magnet link without btih: {}", uri))
                    })?;
                    (uri.to_string(), Some(hash))
                }
                "http" | "https" => (uri.to_string(), None),
                other => {
                    return Err(DlrelayError::InvalidRequest(format!(
                        "unsupported torrent scheme: {}",
                        other
                    )))
                }
            },
            SourceKind::Http => match parsed.scheme() {
                "http" | "https" | "ftp" => (uri.to_string(), None),
                other => {
                    return Err(DlrelayError::InvalidRequest(format!(
                        "unsupported http scheme: {}",
                        other
                    )))
                }
            },
            SourceKind::Video => (self.capabilities.resolve_video(&parsed).await?, None),
        };

        let call = self.engine.add_uri(&engine_uri, auth);
        let gid = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(gid)) => gid,
            Ok(Err(e)) => {
                warn!("Engine submission of {} failed: {}", engine_uri, e);
                return Err(e);
            }
            Err(_) => {
                warn!("Engine submission of {} timed out after {:?}", engine_uri, self.timeout);
                return Err(DlrelayError::EngineUnavailable(format!(
                    "no reply within {:?}",
                    self.timeout
                )));
            }
        };

        info!("Engine accepted {} transfer {} as {}", kind, engine_uri, gid);
        Ok(Submission {
            gid,
            uri: engine_uri,
            info_hash,
        })
    }
}

/// Extract the BitTorrent info hash from a magnet link.
///
/// The hash comes back as lowercase hex, the form the engine reports.
/// Magnet links may carry it base32-encoded instead.
pub fn magnet_info_hash(url: &Url) -> Result<Option<String>, DlrelayError> {
    url.query_pairs()
        .filter(|(key, _)| key == "xt")
        .find_map(|(_, value)| value.strip_prefix("urn:btih:").map(str::to_string))
        .map(|raw| normalize_info_hash(&raw))
        .transpose()
}

/// Lowercase hex form of a 40-char hex or 32-char base32 info hash
pub fn normalize_info_hash(raw: &str) -> Result<String, DlrelayError> {
    let invalid = || DlrelayError::InvalidRequest(format!("malformed btih: {:?}", raw));
    let bytes = match raw.len() {
        40 => HEXLOWER_PERMISSIVE
            .decode(raw.as_bytes())
            .map_err(|_| invalid())?,
        32 => BASE32
            .decode(raw.to_ascii_uppercase().as_bytes())
            .map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };
    Ok(HEXLOWER.encode(&bytes))
}
