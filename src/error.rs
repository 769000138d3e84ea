//! Error taxonomy shared by the transport, router and data access layers.

use thiserror::Error;

use crate::transport::{HttpResponse, ResponseSource};

/// Failures raised by a [`Transport`](crate::transport::Transport) before any
/// HTTP status is available.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
  #[error("request timed out")]
  Timeout,
  #[error("connection failed: {0}")]
  Connect(String),
  #[error("transport error: {0}")]
  Other(String),
}

impl From<reqwest::Error> for TransportError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      Self::Timeout
    } else if err.is_connect() {
      Self::Connect(err.to_string())
    } else {
      Self::Other(err.to_string())
    }
  }
}

/// Outcome of a remote API call as seen by callers of the data access layer.
#[derive(Debug, Error)]
pub enum ApiError {
  /// Neither network nor cache could answer. Writes in this state are queued.
  #[error("network unavailable: {0}")]
  Network(String),

  /// 4xx from the server. Never queued or retried.
  #[error("request rejected ({status}): {message}")]
  Rejected { status: u16, message: String },

  /// 5xx from the server. Treated like a network failure for queueing.
  #[error("server error ({status})")]
  Server { status: u16 },

  /// The target entity only exists locally as an unsynced projection.
  #[error("{0} has not been synced yet")]
  NotSynced(String),

  #[error("unexpected response body: {0}")]
  Decode(#[from] serde_json::Error),
}

impl ApiError {
  /// Whether the write behind this error may succeed on a later attempt.
  pub fn is_transient(&self) -> bool {
    matches!(self, Self::Network(_) | Self::Server { .. })
  }

  /// Whether the failure happened because the network was unreachable.
  pub fn is_offline(&self) -> bool {
    matches!(self, Self::Network(_))
  }

  /// Classify a routed response. Successful responses pass through.
  pub fn check(response: HttpResponse) -> Result<HttpResponse, ApiError> {
    if response.source == ResponseSource::Unavailable {
      return Err(Self::Network(response.text()));
    }

    match response.status {
      200..=299 => Ok(response),
      status @ 400..=499 => Err(Self::Rejected {
        status,
        message: rejection_message(&response),
      }),
      status => Err(Self::Server { status }),
    }
  }
}

/// Pull `{"error": "..."}` out of a rejection body, falling back to raw text.
fn rejection_message(response: &HttpResponse) -> String {
  #[derive(serde::Deserialize)]
  struct ErrorBody {
    error: String,
  }

  response
    .json::<ErrorBody>()
    .map(|body| body.error)
    .unwrap_or_else(|_| response.text())
}
