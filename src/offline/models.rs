use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::endpoints;
use crate::api::types::{NewComment, ReactionRequest};
use crate::cache::{keys, TtlCache};
use crate::strategy::StrategyRouter;
use crate::transport::ApiRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteKind {
  CreateComment,
  ToggleReaction,
}

impl std::fmt::Display for WriteKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(match self {
      WriteKind::CreateComment => "create_comment",
      WriteKind::ToggleReaction => "toggle_reaction",
    })
  }
}

/// A write that could not reach the server yet.
///
/// The `id` doubles as the idempotency key sent with every attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingWrite {
  pub id: String,
  pub kind: WriteKind,
  pub payload: serde_json::Value,
  pub enqueued_at: DateTime<Utc>,
  /// True when the write was deferred because the network was unreachable,
  /// false when it was deferred for another reason (5xx, ordering)
  #[serde(default)]
  pub offline: bool,
}

impl PendingWrite {
  /// The network-only request that replays this write.
  pub fn request(&self) -> ApiRequest {
    let path = match self.kind {
      WriteKind::CreateComment => endpoints::CREATE_COMMENT,
      WriteKind::ToggleReaction => endpoints::REACTION,
    };
    ApiRequest::post(path, self.payload.clone()).with_idempotency_key(self.id.as_str())
  }

  pub fn as_new_comment(&self) -> Option<NewComment> {
    match self.kind {
      WriteKind::CreateComment => serde_json::from_value(self.payload.clone()).ok(),
      WriteKind::ToggleReaction => None,
    }
  }

  pub fn as_reaction(&self) -> Option<ReactionRequest> {
    match self.kind {
      WriteKind::ToggleReaction => serde_json::from_value(self.payload.clone()).ok(),
      WriteKind::CreateComment => None,
    }
  }

  /// Cache entries made stale once this write lands.
  pub fn invalidation(&self) -> Invalidation {
    match self.as_new_comment() {
      Some(new) => Invalidation::comment_created(&new),
      None => Invalidation::comments_changed(),
    }
  }
}

/// Substring patterns to drop from the client cache and the router
/// partitions after a write. Their key shapes differ, so each gets its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
  pub client: Vec<String>,
  pub router: Vec<String>,
}

impl Invalidation {
  /// A new comment or reply stales its topic's lists and its parent's replies.
  pub fn comment_created(new: &NewComment) -> Self {
    let mut client = vec![new.topic_id.clone()];
    let mut router = vec![endpoints::topic_reads(&new.topic_id)];
    if let Some(parent) = &new.parent_id {
      client.push(keys::replies_pattern(parent));
      router.push(endpoints::reply_reads(parent));
    }
    Self { client, router }
  }

  /// Edits, deletes, pins and reactions stale every cached comment read.
  pub fn comments_changed() -> Self {
    Self {
      client: vec![keys::COMMENTS_PREFIX.to_string()],
      router: vec![endpoints::COMMENT_READS.to_string()],
    }
  }

  pub fn apply(&self, cache: &TtlCache<serde_json::Value>, router: &StrategyRouter) {
    for pattern in &self.client {
      cache.invalidate(pattern);
    }
    for pattern in &self.router {
      router.invalidate(pattern);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::ReactionType;
  use crate::transport::Method;
  use serde_json::json;

  #[test]
  fn test_persisted_shape() {
    let write = PendingWrite {
      id: "w1".to_string(),
      kind: WriteKind::ToggleReaction,
      payload: json!({"commentId": "c1"}),
      enqueued_at: "2024-05-01T10:00:00Z".parse().unwrap(),
      offline: true,
    };

    let value = serde_json::to_value(&write).unwrap();
    assert_eq!(value["kind"], "toggle_reaction");
    assert_eq!(value["enqueuedAt"], "2024-05-01T10:00:00Z");
  }

  #[test]
  fn test_replay_request_carries_idempotency_key() {
    let payload = ReactionRequest {
      comment_id: "c1".to_string(),
      user_id: "u1".to_string(),
      reaction_type: ReactionType::Like,
    };
    let write = PendingWrite {
      id: "w1".to_string(),
      kind: WriteKind::ToggleReaction,
      payload: serde_json::to_value(&payload).unwrap(),
      enqueued_at: Utc::now(),
      offline: true,
    };

    let request = write.request();
    assert_eq!(request.method, Method::Post);
    assert_eq!(request.path, endpoints::REACTION);
    assert_eq!(request.idempotency_key.as_deref(), Some("w1"));
    assert_eq!(write.as_reaction(), Some(payload));
    assert_eq!(write.invalidation(), Invalidation::comments_changed());
  }

  #[test]
  fn test_reply_invalidates_topic_and_parent() {
    let write = PendingWrite {
      id: "w2".to_string(),
      kind: WriteKind::CreateComment,
      payload: json!({"topicId": "t1", "userId": "u1", "content": "x", "parentId": "c1"}),
      enqueued_at: Utc::now(),
      offline: true,
    };
    let invalidation = write.invalidation();
    assert_eq!(invalidation.client, vec!["t1", "comments_replies_c1_"]);
    assert_eq!(invalidation.router, vec!["topicId=t1&", "commentId=c1&"]);
  }
}
