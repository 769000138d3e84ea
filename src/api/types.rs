//! Entities exchanged with the remote comment API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix marking a comment id that only exists locally.
pub const TENTATIVE_ID_PREFIX: &str = "pending:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionType {
  Like,
  Dislike,
}

impl ReactionType {
  /// Apply the one-reaction-per-user toggle rule.
  ///
  /// Sending the current kind clears it; sending the other kind replaces it.
  pub fn toggle(current: Option<ReactionType>, requested: ReactionType) -> Option<ReactionType> {
    match current {
      Some(existing) if existing == requested => None,
      _ => Some(requested),
    }
  }
}

impl std::str::FromStr for ReactionType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "like" => Ok(ReactionType::Like),
      "dislike" => Ok(ReactionType::Dislike),
      other => Err(format!("unknown reaction type: {}", other)),
    }
  }
}

impl std::fmt::Display for ReactionType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(match self {
      ReactionType::Like => "like",
      ReactionType::Dislike => "dislike",
    })
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
  pub id: String,
  pub topic_id: String,
  pub user_id: String,
  #[serde(default)]
  pub parent_id: Option<String>,
  pub content: String,
  #[serde(default)]
  pub likes_count: i64,
  #[serde(default)]
  pub dislikes_count: i64,
  #[serde(default)]
  pub replies_count: i64,
  #[serde(default)]
  pub is_edited: bool,
  #[serde(default)]
  pub is_pinned: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub username: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub avatar_url: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub user_external_id: Option<String>,
  /// The requesting viewer's reaction
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub user_reaction: Option<ReactionType>,
}

impl Comment {
  /// Local stand-in for a comment whose creation has not been confirmed.
  pub fn tentative(pending_id: &str, new: &NewComment, now: DateTime<Utc>) -> Self {
    Self {
      id: format!("{}{}", TENTATIVE_ID_PREFIX, pending_id),
      topic_id: new.topic_id.clone(),
      user_id: new.user_id.clone(),
      parent_id: new.parent_id.clone(),
      content: new.content.clone(),
      likes_count: 0,
      dislikes_count: 0,
      replies_count: 0,
      is_edited: false,
      is_pinned: false,
      created_at: now,
      updated_at: now,
      username: new.username.clone(),
      avatar_url: new.user_img.clone(),
      user_external_id: None,
      user_reaction: None,
    }
  }

  pub fn is_tentative(&self) -> bool {
    self.id.starts_with(TENTATIVE_ID_PREFIX)
  }

  /// Optimistically apply the viewer's reaction toggle to this comment's counts.
  pub fn apply_reaction(&mut self, requested: ReactionType) {
    let previous = self.user_reaction;
    let next = ReactionType::toggle(previous, requested);

    match previous {
      Some(ReactionType::Like) => self.likes_count -= 1,
      Some(ReactionType::Dislike) => self.dislikes_count -= 1,
      None => {}
    }
    match next {
      Some(ReactionType::Like) => self.likes_count += 1,
      Some(ReactionType::Dislike) => self.dislikes_count += 1,
      None => {}
    }

    self.likes_count = self.likes_count.max(0);
    self.dislikes_count = self.dislikes_count.max(0);
    self.user_reaction = next;
  }
}

/// Body of a create-comment call. Also the payload of a queued create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
  pub topic_id: String,
  pub user_id: String,
  pub content: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parent_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub username: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub user_img: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
}

/// Body of a reaction call. Also the payload of a queued toggle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRequest {
  pub comment_id: String,
  pub user_id: String,
  pub reaction_type: ReactionType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: String,
  pub external_id: String,
  pub username: String,
  #[serde(default)]
  pub avatar_url: Option<String>,
  #[serde(default)]
  pub email: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// Identity fields the host page passes in for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
  pub external_id: String,
  pub username: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub avatar_url: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
  pub id: String,
  pub external_id: String,
  #[serde(default)]
  pub title: Option<String>,
  #[serde(default)]
  pub url: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicInfo {
  pub external_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
}

/// Result of a health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Health {
  pub status: String,
  /// Database latency reported by the server
  pub server_response_time_ms: Option<u64>,
  /// Measured by the client
  pub round_trip_ms: u64,
}

impl Health {
  pub fn is_healthy(&self) -> bool {
    self.status == "healthy"
  }
}

#[derive(Debug, Deserialize)]
pub(crate) struct HealthBody {
  pub status: String,
  #[serde(default, alias = "responseTime", alias = "responseTimeMs")]
  pub response_time_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommentsEnvelope {
  #[serde(default)]
  pub comments: Vec<Comment>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommentEnvelope {
  pub comment: Comment,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserEnvelope {
  pub user: User,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TopicEnvelope {
  pub topic: Topic,
}
