//! Scripted transport used by router, data access and sync tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::TransportError;
use crate::transport::{ApiRequest, HttpResponse, Method, Transport};

pub(crate) struct FakeTransport {
  responses: Mutex<HashMap<(Method, String), (u16, Vec<u8>)>>,
  calls: Mutex<Vec<ApiRequest>>,
  online: AtomicBool,
  delay: Mutex<Option<Duration>>,
}

impl FakeTransport {
  pub fn new() -> Self {
    Self {
      responses: Mutex::new(HashMap::new()),
      calls: Mutex::new(Vec::new()),
      online: AtomicBool::new(true),
      delay: Mutex::new(None),
    }
  }

  /// Answer `method pathname` (query ignored) with `status` and `body`.
  pub fn respond(&self, method: Method, pathname: &str, status: u16, body: impl Into<Vec<u8>>) {
    self
      .responses
      .lock()
      .unwrap()
      .insert((method, pathname.to_string()), (status, body.into()));
  }

  pub fn respond_json(&self, method: Method, pathname: &str, status: u16, body: serde_json::Value) {
    self.respond(method, pathname, status, body.to_string());
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  pub fn set_delay(&self, delay: Option<Duration>) {
    *self.delay.lock().unwrap() = delay;
  }

  pub fn calls(&self) -> Vec<ApiRequest> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self, pathname: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|request| request.pathname() == pathname)
      .count()
  }
}

#[async_trait]
impl Transport for FakeTransport {
  async fn send(&self, request: &ApiRequest) -> Result<HttpResponse, TransportError> {
    self.calls.lock().unwrap().push(request.clone());

    let delay = *self.delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    if !self.online.load(Ordering::SeqCst) {
      return Err(TransportError::Connect("connection refused".to_string()));
    }

    let scripted = self
      .responses
      .lock()
      .unwrap()
      .get(&(request.method, request.pathname().to_string()))
      .cloned();

    Ok(match scripted {
      Some((status, body)) => HttpResponse::network(status, body),
      None => HttpResponse::network(404, br#"{"error":"Not found"}"#.to_vec()),
    })
  }
}
