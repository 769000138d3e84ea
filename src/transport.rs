//! HTTP plumbing between the router and the remote comment API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::config::ApiConfig;
use crate::error::TransportError;

/// Header carrying the client-generated id of a queued write.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl Method {
  /// Only GETs may be served from a cache.
  pub fn is_read(self) -> bool {
    matches!(self, Method::Get)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    }
  }
}

impl From<Method> for reqwest::Method {
  fn from(method: Method) -> Self {
    match method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

/// A request relative to the API origin, e.g. `/api/users/42?x=1`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
  pub method: Method,
  pub path: String,
  pub body: Option<serde_json::Value>,
  pub idempotency_key: Option<String>,
}

impl ApiRequest {
  fn new(method: Method, path: impl Into<String>, body: Option<serde_json::Value>) -> Self {
    Self {
      method,
      path: path.into(),
      body,
      idempotency_key: None,
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::Get, path, None)
  }

  pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
    Self::new(Method::Post, path, Some(body))
  }

  pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
    Self::new(Method::Put, path, Some(body))
  }

  pub fn delete(path: impl Into<String>, body: serde_json::Value) -> Self {
    Self::new(Method::Delete, path, Some(body))
  }

  pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
    self.idempotency_key = Some(key.into());
    self
  }

  /// The path without its query string.
  pub fn pathname(&self) -> &str {
    self.path.split('?').next().unwrap_or_default()
  }

  /// Key under which a GET response is cached.
  pub fn cache_key(&self) -> String {
    self.path.clone()
  }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh from the network
  Network,
  /// Served from a cache partition
  Cache,
  /// Synthesized because neither network nor cache could answer
  Unavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
  pub status: u16,
  pub body: Vec<u8>,
  pub source: ResponseSource,
  /// When the body was stored, for cache hits
  pub cached_at: Option<DateTime<Utc>>,
}

impl HttpResponse {
  pub fn network(status: u16, body: Vec<u8>) -> Self {
    Self {
      status,
      body,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  /// The synthetic "no network, no cache" answer. Never a 2xx.
  pub fn unavailable() -> Self {
    Self {
      status: 503,
      body: b"Offline".to_vec(),
      source: ResponseSource::Unavailable,
      cached_at: None,
    }
  }

  /// Re-tag a stored network response as a cache hit.
  pub fn into_cached(mut self, cached_at: DateTime<Utc>) -> Self {
    self.source = ResponseSource::Cache;
    self.cached_at = Some(cached_at);
    self
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn is_unavailable(&self) -> bool {
    self.source == ResponseSource::Unavailable
  }

  pub fn json<T: DeserializeOwned>(&self) -> std::result::Result<T, serde_json::Error> {
    serde_json::from_slice(&self.body)
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// Sends a single request to the remote API.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: &ApiRequest) -> std::result::Result<HttpResponse, TransportError>;
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

impl HttpTransport {
  pub fn new(config: &ApiConfig, token: Option<String>) -> Result<Self> {
    let base_url = Url::parse(&config.base_url)
      .map_err(|e| eyre!("Invalid API base URL {}: {}", config.base_url, e))?;

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url,
      token,
    })
  }

  fn url_for(&self, path: &str) -> std::result::Result<Url, TransportError> {
    self
      .base_url
      .join(path)
      .map_err(|e| TransportError::Other(format!("invalid path {}: {}", path, e)))
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, request: &ApiRequest) -> std::result::Result<HttpResponse, TransportError> {
    let url = self.url_for(&request.path)?;
    let mut builder = self.client.request(request.method.into(), url);

    if let Some(body) = &request.body {
      let bytes = serde_json::to_vec(body).map_err(|e| TransportError::Other(e.to_string()))?;
      builder = builder.header(CONTENT_TYPE, "application/json").body(bytes);
    }
    if let Some(key) = &request.idempotency_key {
      builder = builder.header(IDEMPOTENCY_HEADER, key);
    }
    if let Some(token) = &self.token {
      builder = builder.bearer_auth(token);
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let body = response.bytes().await?;

    Ok(HttpResponse::network(status, body.to_vec()))
  }
}
