//! Optimistic local state reconciled against sync results.

use std::collections::HashMap;
use tracing::debug;

use super::sync::{ReplayOutcome, SyncReport};
use crate::api::types::{Comment, CommentEnvelope, ReactionType};

#[derive(Debug, Clone)]
enum Delta {
  /// A comment that only exists locally, under its tentative id
  Created { local_id: String },
  /// A reaction toggle; keeps the comment as it was before the toggle and
  /// the order the toggle was applied in
  Reaction {
    before: Comment,
    kind: ReactionType,
    seq: u64,
  },
}

/// The viewer's comment list plus tentative deltas keyed by pending id.
///
/// A confirmed delta is replaced by the server's entity when there is one,
/// a rejected delta is rolled back. Counts are only ever optimistic here; the
/// next successful read is authoritative.
#[derive(Debug, Clone, Default)]
pub struct LocalView {
  comments: Vec<Comment>,
  deltas: HashMap<String, Delta>,
  next_seq: u64,
}

impl LocalView {
  pub fn new(comments: Vec<Comment>) -> Self {
    Self {
      comments,
      deltas: HashMap::new(),
      next_seq: 0,
    }
  }

  pub fn comments(&self) -> &[Comment] {
    &self.comments
  }

  pub fn get(&self, comment_id: &str) -> Option<&Comment> {
    self.comments.iter().find(|c| c.id == comment_id)
  }

  /// Replace the list with a fresh server read, keeping local-only comments.
  pub fn refresh(&mut self, comments: Vec<Comment>) {
    let local: Vec<Comment> = self
      .comments
      .drain(..)
      .filter(|c| c.is_tentative())
      .collect();
    self.comments = local;
    self.comments.extend(comments);
  }

  pub fn has_pending(&self, pending_id: &str) -> bool {
    self.deltas.contains_key(pending_id)
  }

  pub fn pending_count(&self) -> usize {
    self.deltas.len()
  }

  /// Show a not-yet-confirmed comment at the top of the list.
  pub fn apply_created(&mut self, pending_id: &str, comment: Comment) {
    let local_id = comment.id.clone();
    self.comments.insert(0, comment);
    self.deltas.insert(pending_id.to_string(), Delta::Created { local_id });
  }

  /// Toggle the viewer's reaction on a listed comment.
  pub fn apply_reaction(
    &mut self,
    pending_id: &str,
    comment_id: &str,
    kind: ReactionType,
  ) -> Option<&Comment> {
    let comment = self.comments.iter_mut().find(|c| c.id == comment_id)?;
    let before = comment.clone();
    comment.apply_reaction(kind);
    let seq = self.next_seq;
    self.next_seq += 1;
    self
      .deltas
      .insert(pending_id.to_string(), Delta::Reaction { before, kind, seq });
    self.get(comment_id)
  }

  /// The server accepted the write behind `pending_id`.
  pub fn confirm(&mut self, pending_id: &str, authoritative: Option<Comment>) {
    let Some(delta) = self.deltas.remove(pending_id) else {
      return;
    };

    let target = match &delta {
      Delta::Created { local_id } => local_id.clone(),
      Delta::Reaction { before, .. } => before.id.clone(),
    };
    match authoritative {
      Some(comment) => self.replace(&target, comment),
      None => {
        // A created comment without a server body disappears until the
        // next read brings it back under its real id
        if matches!(delta, Delta::Created { .. }) {
          self.comments.retain(|c| c.id != target);
        }
      }
    }
  }

  /// The server refused the write behind `pending_id`; undo it.
  ///
  /// Later toggles on the same comment are still pending, so they are
  /// re-applied on top of the restored state in their original order.
  pub fn rollback(&mut self, pending_id: &str) {
    match self.deltas.remove(pending_id) {
      Some(Delta::Created { local_id }) => self.comments.retain(|c| c.id != local_id),
      Some(Delta::Reaction { before, seq, .. }) => self.rebase_reactions(&before, seq),
      None => {}
    }
  }

  fn rebase_reactions(&mut self, before: &Comment, after_seq: u64) {
    let Some(comment) = self.comments.iter_mut().find(|c| c.id == before.id) else {
      return;
    };
    comment.likes_count = before.likes_count;
    comment.dislikes_count = before.dislikes_count;
    comment.user_reaction = before.user_reaction;

    let mut later: Vec<&mut Delta> = self
      .deltas
      .values_mut()
      .filter(|delta| match delta {
        Delta::Reaction { before: b, seq, .. } => b.id == before.id && *seq > after_seq,
        Delta::Created { .. } => false,
      })
      .collect();
    later.sort_by_key(|delta| match delta {
      Delta::Reaction { seq, .. } => *seq,
      Delta::Created { .. } => 0,
    });

    for delta in later {
      if let Delta::Reaction { before: b, kind, .. } = delta {
        *b = comment.clone();
        comment.apply_reaction(*kind);
      }
    }
  }

  /// Fold the results of a sync pass into the view.
  pub fn apply_report(&mut self, report: &SyncReport) {
    for outcome in &report.outcomes {
      let id = outcome.write().id.as_str();
      match outcome {
        ReplayOutcome::Confirmed { response, .. } => {
          let comment = response.json::<CommentEnvelope>().ok().map(|e| e.comment);
          self.confirm(id, comment);
        }
        ReplayOutcome::Rejected { .. } => self.rollback(id),
        ReplayOutcome::Deferred { .. } => debug!(%id, "delta still tentative"),
      }
    }
  }

  fn replace(&mut self, id: &str, comment: Comment) {
    match self.comments.iter_mut().find(|c| c.id == id) {
      Some(slot) => *slot = comment,
      None => self.comments.insert(0, comment),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::NewComment;
  use crate::offline::{PendingWrite, WriteKind};
  use crate::transport::HttpResponse;
  use chrono::Utc;
  use serde_json::json;

  fn server_comment(id: &str) -> Comment {
    serde_json::from_value(json!({
      "id": id, "topic_id": "t1", "user_id": "u1", "content": "hello",
      "likes_count": 2, "dislikes_count": 0,
      "created_at": "2024-05-01T10:00:00Z", "updated_at": "2024-05-01T10:00:00Z"
    }))
    .unwrap()
  }

  fn new_comment() -> NewComment {
    NewComment {
      topic_id: "t1".to_string(),
      user_id: "u1".to_string(),
      content: "draft".to_string(),
      parent_id: None,
      username: None,
      user_img: None,
      title: None,
      url: None,
    }
  }

  fn write(id: &str, kind: WriteKind) -> PendingWrite {
    PendingWrite {
      id: id.to_string(),
      kind,
      payload: json!({}),
      enqueued_at: Utc::now(),
      offline: true,
    }
  }

  #[test]
  fn test_created_comment_is_swapped_on_confirm() {
    let mut view = LocalView::new(vec![server_comment("c1")]);
    view.apply_created("w1", Comment::tentative("w1", &new_comment(), Utc::now()));
    assert_eq!(view.comments()[0].id, "pending:w1");

    view.confirm("w1", Some(server_comment("c2")));

    let ids: Vec<_> = view.comments().iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["c2", "c1"]);
    assert_eq!(view.pending_count(), 0);
  }

  #[test]
  fn test_rejected_create_is_removed() {
    let mut view = LocalView::new(vec![server_comment("c1")]);
    view.apply_created("w1", Comment::tentative("w1", &new_comment(), Utc::now()));

    view.rollback("w1");

    assert_eq!(view.comments().len(), 1);
    assert!(view.get("pending:w1").is_none());
  }

  #[test]
  fn test_reaction_rollback_restores_counts() {
    let mut view = LocalView::new(vec![server_comment("c1")]);

    let projected = view.apply_reaction("w1", "c1", ReactionType::Like).unwrap();
    assert_eq!(projected.likes_count, 3);

    view.rollback("w1");
    let c1 = view.get("c1").unwrap();
    assert_eq!(c1.likes_count, 2);
    assert_eq!(c1.user_reaction, None);
  }

  #[test]
  fn test_rollback_keeps_later_pending_toggle() {
    let mut view = LocalView::new(vec![server_comment("c1")]);
    view.apply_reaction("w1", "c1", ReactionType::Like);
    let swapped = view.apply_reaction("w2", "c1", ReactionType::Dislike).unwrap();
    assert_eq!((swapped.likes_count, swapped.dislikes_count), (2, 1));

    view.rollback("w1");

    // w2 now applies to the state before w1
    let c1 = view.get("c1").unwrap();
    assert_eq!((c1.likes_count, c1.dislikes_count), (2, 1));
    assert_eq!(c1.user_reaction, Some(ReactionType::Dislike));
    assert!(view.has_pending("w2"));

    view.rollback("w2");
    let c1 = view.get("c1").unwrap();
    assert_eq!((c1.likes_count, c1.dislikes_count), (2, 0));
    assert_eq!(c1.user_reaction, None);
  }

  #[test]
  fn test_reaction_on_unknown_comment_is_ignored() {
    let mut view = LocalView::default();
    assert!(view.apply_reaction("w1", "missing", ReactionType::Like).is_none());
    assert!(!view.has_pending("w1"));
  }

  #[test]
  fn test_report_drives_confirm_and_rollback() {
    let mut view = LocalView::new(vec![server_comment("c1")]);
    view.apply_created("w1", Comment::tentative("w1", &new_comment(), Utc::now()));
    view.apply_reaction("w2", "c1", ReactionType::Dislike);
    view.apply_created("w3", Comment::tentative("w3", &new_comment(), Utc::now()));

    let body = json!({ "comment": server_comment("c9") }).to_string();
    let report = SyncReport {
      outcomes: vec![
        ReplayOutcome::Confirmed {
          write: write("w1", WriteKind::CreateComment),
          response: HttpResponse::network(201, body.into_bytes()),
        },
        ReplayOutcome::Rejected {
          write: write("w2", WriteKind::ToggleReaction),
          status: 400,
          message: "Invalid reaction type".to_string(),
        },
        ReplayOutcome::Deferred {
          write: write("w3", WriteKind::CreateComment),
          reason: "offline".to_string(),
        },
      ],
      skipped: false,
    };

    view.apply_report(&report);

    assert!(view.get("c9").is_some());
    assert!(view.get("pending:w1").is_none());
    assert_eq!(view.get("c1").unwrap().dislikes_count, 0);
    assert!(view.has_pending("w3"));
  }

  #[test]
  fn test_refresh_keeps_local_only_comments() {
    let mut view = LocalView::new(vec![server_comment("c1")]);
    view.apply_created("w1", Comment::tentative("w1", &new_comment(), Utc::now()));

    view.refresh(vec![server_comment("c1"), server_comment("c2")]);

    let ids: Vec<_> = view.comments().iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["pending:w1", "c1", "c2"]);
  }
}
