//! Request builders for the remote comment API.
//!
//! Read paths live under `/api/comments-ultra/`, `/api/users/` and
//! `/api/topics/` so the default strategy table routes them; writes live under
//! `/api/comments/` and are network-only by method anyway.

use serde_json::json;
use url::form_urlencoded;

use super::types::{NewComment, ReactionRequest, TopicInfo, UserProfile};
use crate::transport::ApiRequest;

pub const LIST_COMMENTS: &str = "/api/comments-ultra/list";
pub const LIST_REPLIES: &str = "/api/comments-ultra/replies";
pub const CREATE_COMMENT: &str = "/api/comments/create";
pub const UPDATE_COMMENT: &str = "/api/comments/update";
pub const DELETE_COMMENT: &str = "/api/comments/delete";
pub const REACTION: &str = "/api/comments/reaction";
pub const PIN_COMMENT: &str = "/api/comments/pin";
pub const USERS: &str = "/api/users/";
pub const TOPICS: &str = "/api/topics/";
pub const HEALTH: &str = "/health";

fn with_query(path: &str, pairs: &[(&str, &str)]) -> String {
  let query = form_urlencoded::Serializer::new(String::new())
    .extend_pairs(pairs)
    .finish();
  format!("{}?{}", path, query)
}

fn segment(value: &str) -> String {
  form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Matches every cached comment read in the router partitions.
pub const COMMENT_READS: &str = "/api/comments-ultra/";

/// Matches cached list reads of one topic, for any viewer.
pub fn topic_reads(topic_id: &str) -> String {
  format!("topicId={}&", segment(topic_id))
}

/// Matches cached reply reads of one parent comment, for any viewer.
pub fn reply_reads(comment_id: &str) -> String {
  format!("commentId={}&", segment(comment_id))
}

pub fn list_comments(topic_id: &str, viewer: Option<&str>) -> ApiRequest {
  ApiRequest::get(with_query(
    LIST_COMMENTS,
    &[("topicId", topic_id), ("userId", viewer.unwrap_or_default())],
  ))
}

pub fn list_replies(comment_id: &str, viewer: Option<&str>) -> ApiRequest {
  ApiRequest::get(with_query(
    LIST_REPLIES,
    &[("commentId", comment_id), ("userId", viewer.unwrap_or_default())],
  ))
}

pub fn create_comment(new: &NewComment) -> Result<ApiRequest, serde_json::Error> {
  Ok(ApiRequest::post(CREATE_COMMENT, serde_json::to_value(new)?))
}

pub fn update_comment(comment_id: &str, user_id: &str, content: &str) -> ApiRequest {
  ApiRequest::put(
    UPDATE_COMMENT,
    json!({ "commentId": comment_id, "userId": user_id, "content": content }),
  )
}

pub fn delete_comment(comment_id: &str, user_id: &str) -> ApiRequest {
  ApiRequest::delete(
    DELETE_COMMENT,
    json!({ "commentId": comment_id, "userId": user_id }),
  )
}

pub fn reaction(request: &ReactionRequest) -> Result<ApiRequest, serde_json::Error> {
  Ok(ApiRequest::post(REACTION, serde_json::to_value(request)?))
}

pub fn pin_comment(comment_id: &str, pinned: bool) -> ApiRequest {
  ApiRequest::post(
    PIN_COMMENT,
    json!({ "commentId": comment_id, "isPinned": pinned }),
  )
}

pub fn get_user(external_id: &str) -> ApiRequest {
  ApiRequest::get(format!("{}{}", USERS, segment(external_id)))
}

pub fn create_user(profile: &UserProfile) -> Result<ApiRequest, serde_json::Error> {
  Ok(ApiRequest::post(USERS, serde_json::to_value(profile)?))
}

pub fn get_topic(external_id: &str) -> ApiRequest {
  ApiRequest::get(format!("{}{}", TOPICS, segment(external_id)))
}

pub fn create_topic(topic: &TopicInfo) -> Result<ApiRequest, serde_json::Error> {
  Ok(ApiRequest::post(TOPICS, serde_json::to_value(topic)?))
}

pub fn health() -> ApiRequest {
  ApiRequest::get(HEALTH)
}
