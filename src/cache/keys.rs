//! Cache key shapes used by the data access layer.
//!
//! Keys are plain strings so a single write can invalidate every variant of a
//! read by substring (e.g. all viewer-specific lists for a topic).

/// Prefix shared by every comment-list key.
pub const COMMENTS_PREFIX: &str = "comments_";

/// Comment list for a topic as seen by one viewer.
pub fn comments(topic_id: &str, viewer: Option<&str>) -> String {
  format!("{}{}_{}", COMMENTS_PREFIX, topic_id, viewer.unwrap_or("anonymous"))
}

/// Replies under a single parent comment as seen by one viewer.
pub fn replies(comment_id: &str, viewer: Option<&str>) -> String {
  format!(
    "{}replies_{}_{}",
    COMMENTS_PREFIX,
    comment_id,
    viewer.unwrap_or("anonymous")
  )
}

/// Pattern matching every viewer's replies list under one parent.
pub fn replies_pattern(comment_id: &str) -> String {
  format!("{}replies_{}_", COMMENTS_PREFIX, comment_id)
}

pub fn user(external_id: &str) -> String {
  format!("user_{}", external_id)
}

pub fn topic(external_id: &str) -> String {
  format!("topic_{}", external_id)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_anonymous_viewer() {
    assert_eq!(comments("topicA", None), "comments_topicA_anonymous");
    assert_eq!(comments("topicA", Some("user1")), "comments_topicA_user1");
  }

  #[test]
  fn test_replies_share_comment_prefix() {
    assert!(replies("c1", Some("u1")).starts_with(COMMENTS_PREFIX));
    assert!(replies("c1", Some("u1")).contains(&replies_pattern("c1")));
    assert!(!replies("c10", None).contains(&replies_pattern("c1")));
  }
}
