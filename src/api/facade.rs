//! CRUD over comments, reactions, users and topics with offline fallback.

use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::endpoints;
use super::types::{
  Comment, CommentEnvelope, CommentsEnvelope, Health, HealthBody, NewComment, ReactionRequest,
  ReactionType, Topic, TopicEnvelope, TopicInfo, User, UserEnvelope, UserProfile,
  TENTATIVE_ID_PREFIX,
};
use crate::cache::{keys, Clock, SystemClock, TtlCache};
use crate::config::CacheTtls;
use crate::error::ApiError;
use crate::offline::{Invalidation, OfflineQueue, WriteKind};
use crate::strategy::{Revalidation, StrategyRouter};
use crate::transport::{ApiRequest, HttpResponse, ResponseSource, Transport};

/// What became of a write that may have been deferred.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome<T> {
  /// The server accepted the write
  Committed(T),
  /// Stored for background sync; `projection` is the optimistic result
  Queued { pending_id: String, projection: T },
  /// Undid a queued toggle that had not been sent yet
  Coalesced { cancelled_id: String, projection: T },
  /// Could not be sent or stored; the write is lost
  Dropped { projection: T },
}

impl<T> WriteOutcome<T> {
  pub fn value(&self) -> &T {
    match self {
      WriteOutcome::Committed(value)
      | WriteOutcome::Queued {
        projection: value, ..
      }
      | WriteOutcome::Coalesced {
        projection: value, ..
      }
      | WriteOutcome::Dropped { projection: value } => value,
    }
  }

  pub fn into_value(self) -> T {
    match self {
      WriteOutcome::Committed(value)
      | WriteOutcome::Queued {
        projection: value, ..
      }
      | WriteOutcome::Coalesced {
        projection: value, ..
      }
      | WriteOutcome::Dropped { projection: value } => value,
    }
  }

  pub fn pending_id(&self) -> Option<&str> {
    match self {
      WriteOutcome::Queued { pending_id, .. } => Some(pending_id),
      _ => None,
    }
  }

  pub fn is_committed(&self) -> bool {
    matches!(self, WriteOutcome::Committed(_))
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> WriteOutcome<U> {
    match self {
      WriteOutcome::Committed(value) => WriteOutcome::Committed(f(value)),
      WriteOutcome::Queued {
        pending_id,
        projection,
      } => WriteOutcome::Queued {
        pending_id,
        projection: f(projection),
      },
      WriteOutcome::Coalesced {
        cancelled_id,
        projection,
      } => WriteOutcome::Coalesced {
        cancelled_id,
        projection: f(projection),
      },
      WriteOutcome::Dropped { projection } => WriteOutcome::Dropped {
        projection: f(projection),
      },
    }
  }
}

/// Entry point for every read and write the widget performs.
///
/// Reads check the client TTL cache, then go through the strategy router.
/// Writes are network-only; a successful write invalidates the affected
/// reads before returning. Creates and reaction toggles that fail for a
/// transient reason are queued and answered with an optimistic projection;
/// every other failing write surfaces its error.
pub struct DataAccess {
  router: Arc<StrategyRouter>,
  transport: Arc<dyn Transport>,
  cache: Arc<TtlCache<Value>>,
  queue: Arc<OfflineQueue>,
  ttls: CacheTtls,
  clock: Arc<dyn Clock>,
  revalidations: Mutex<Vec<Revalidation>>,
}

impl DataAccess {
  pub fn new(
    router: Arc<StrategyRouter>,
    transport: Arc<dyn Transport>,
    cache: Arc<TtlCache<Value>>,
    queue: Arc<OfflineQueue>,
    ttls: CacheTtls,
  ) -> Self {
    Self {
      router,
      transport,
      cache,
      queue,
      ttls,
      clock: Arc::new(SystemClock),
      revalidations: Mutex::new(Vec::new()),
    }
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn router(&self) -> &Arc<StrategyRouter> {
    &self.router
  }

  pub fn cache(&self) -> &Arc<TtlCache<Value>> {
    &self.cache
  }

  pub fn queue(&self) -> &Arc<OfflineQueue> {
    &self.queue
  }

  // Comments

  pub async fn list_comments(
    &self,
    topic_id: &str,
    viewer: Option<&str>,
  ) -> Result<Vec<Comment>, ApiError> {
    self
      .cached_read(
        &keys::comments(topic_id, viewer),
        self.ttls.comments,
        endpoints::list_comments(topic_id, viewer),
        |body: CommentsEnvelope| body.comments,
      )
      .await
  }

  pub async fn list_replies(
    &self,
    comment_id: &str,
    viewer: Option<&str>,
  ) -> Result<Vec<Comment>, ApiError> {
    self
      .cached_read(
        &keys::replies(comment_id, viewer),
        self.ttls.comments,
        endpoints::list_replies(comment_id, viewer),
        |body: CommentsEnvelope| body.comments,
      )
      .await
  }

  pub async fn create_comment(&self, new: NewComment) -> Result<WriteOutcome<Comment>, ApiError> {
    let pending_id = OfflineQueue::new_id();
    let request = endpoints::create_comment(&new)?.with_idempotency_key(pending_id.as_str());

    match self.route(request).await {
      Ok(response) => {
        let comment = response.json::<CommentEnvelope>()?.comment;
        self.invalidate(&Invalidation::comment_created(&new));
        Ok(WriteOutcome::Committed(comment))
      }
      Err(e) if e.is_transient() => {
        let projection = Comment::tentative(&pending_id, &new, self.clock.now());
        let payload = serde_json::to_value(&new)?;
        Ok(self.defer(pending_id, WriteKind::CreateComment, payload, &e, projection))
      }
      Err(e) => Err(e),
    }
  }

  pub async fn update_comment(
    &self,
    comment_id: &str,
    user_id: &str,
    content: &str,
  ) -> Result<Comment, ApiError> {
    ensure_synced(comment_id)?;
    let response = self
      .route(endpoints::update_comment(comment_id, user_id, content))
      .await?;
    let comment = response.json::<CommentEnvelope>()?.comment;
    self.invalidate(&Invalidation::comments_changed());
    Ok(comment)
  }

  pub async fn delete_comment(&self, comment_id: &str, user_id: &str) -> Result<(), ApiError> {
    ensure_synced(comment_id)?;
    self
      .route(endpoints::delete_comment(comment_id, user_id))
      .await?;
    self.invalidate(&Invalidation::comments_changed());
    Ok(())
  }

  pub async fn set_pinned(&self, comment_id: &str, pinned: bool) -> Result<Comment, ApiError> {
    ensure_synced(comment_id)?;
    let response = self
      .route(endpoints::pin_comment(comment_id, pinned))
      .await?;
    let comment = response.json::<CommentEnvelope>()?.comment;
    self.invalidate(&Invalidation::comments_changed());
    Ok(comment)
  }

  // Reactions

  /// Toggle the viewer's reaction on `comment` and project the result.
  ///
  /// The projection applies the one-reaction-per-user rule to the counts the
  /// caller holds; the next read brings authoritative counts.
  pub async fn toggle_reaction(
    &self,
    comment: &Comment,
    user_id: &str,
    kind: ReactionType,
  ) -> Result<WriteOutcome<Comment>, ApiError> {
    let request = ReactionRequest {
      comment_id: comment.id.clone(),
      user_id: user_id.to_string(),
      reaction_type: kind,
    };
    let outcome = self.react(request).await?;

    let mut projection = comment.clone();
    projection.apply_reaction(kind);
    Ok(outcome.map(|()| projection))
  }

  /// Send a reaction toggle, queueing it behind any toggles for the same
  /// (comment, user) that are still waiting.
  ///
  /// Re-sending the kind of the newest queued toggle cancels that toggle
  /// instead, since the two would net out on the server.
  pub async fn react(&self, request: ReactionRequest) -> Result<WriteOutcome<()>, ApiError> {
    ensure_synced(&request.comment_id)?;

    let queued = self
      .queue
      .pending_reactions(&request.comment_id, &request.user_id)
      .unwrap_or_else(|e| {
        warn!(error = %e, "could not read offline queue");
        Vec::new()
      });

    if let Some(last) = queued.last() {
      let same_kind = last
        .as_reaction()
        .is_some_and(|r| r.reaction_type == request.reaction_type);
      if same_kind {
        match self.queue.cancel(&last.id) {
          Ok(true) => {
            debug!(cancelled = %last.id, "coalesced reaction toggle");
            return Ok(WriteOutcome::Coalesced {
              cancelled_id: last.id.clone(),
              projection: (),
            });
          }
          // Synced or being sent, so this toggle is a real one
          Ok(false) => {}
          Err(e) => warn!(id = %last.id, error = %e, "could not cancel queued toggle"),
        }
      }

      let still_queued =
        self.queue.is_claimed(&last.id) || self.queue.get(&last.id).ok().flatten().is_some();
      if still_queued {
        let payload = serde_json::to_value(&request)?;
        let pending_id = OfflineQueue::new_id();
        return Ok(self.enqueue(pending_id, WriteKind::ToggleReaction, payload, false, ()));
      }
    }

    let pending_id = OfflineQueue::new_id();
    let http = endpoints::reaction(&request)?.with_idempotency_key(pending_id.as_str());
    match self.route(http).await {
      Ok(_) => {
        self.invalidate(&Invalidation::comments_changed());
        Ok(WriteOutcome::Committed(()))
      }
      Err(e) if e.is_transient() => {
        let payload = serde_json::to_value(&request)?;
        Ok(self.defer(pending_id, WriteKind::ToggleReaction, payload, &e, ()))
      }
      Err(e) => Err(e),
    }
  }

  // Users and topics

  pub async fn get_or_create_user(&self, profile: &UserProfile) -> Result<User, ApiError> {
    let key = keys::user(&profile.external_id);
    self
      .get_or_create(
        &key,
        self.ttls.users,
        endpoints::get_user(&profile.external_id),
        endpoints::create_user(profile)?,
        |body: UserEnvelope| body.user,
      )
      .await
  }

  pub async fn get_or_create_topic(&self, topic: &TopicInfo) -> Result<Topic, ApiError> {
    let key = keys::topic(&topic.external_id);
    self
      .get_or_create(
        &key,
        self.ttls.topics,
        endpoints::get_topic(&topic.external_id),
        endpoints::create_topic(topic)?,
        |body: TopicEnvelope| body.topic,
      )
      .await
  }

  /// Probe the API directly, bypassing every cache.
  pub async fn health(&self) -> Result<Health, ApiError> {
    let started = Instant::now();
    let response = self
      .transport
      .send(&endpoints::health())
      .await
      .map_err(|e| ApiError::Network(e.to_string()))?;
    let round_trip_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    // An unhealthy server still answers with a status body, usually as 503
    match response.json::<HealthBody>() {
      Ok(body) => Ok(Health {
        status: body.status,
        server_response_time_ms: body.response_time_ms,
        round_trip_ms,
      }),
      Err(e) => {
        ApiError::check(response)?;
        Err(e.into())
      }
    }
  }

  /// Wait for background revalidations started by earlier reads.
  pub async fn settle(&self) {
    let pending: Vec<Revalidation> = std::mem::take(
      &mut *self
        .revalidations
        .lock()
        .unwrap_or_else(PoisonError::into_inner),
    );
    for revalidation in pending {
      if let Err(e) = revalidation.wait().await {
        debug!(error = %e, "revalidation failed");
      }
    }
  }

  async fn cached_read<B, T>(
    &self,
    key: &str,
    ttl: Duration,
    request: ApiRequest,
    extract: impl FnOnce(B) -> T,
  ) -> Result<T, ApiError>
  where
    B: DeserializeOwned,
    T: Serialize + DeserializeOwned,
  {
    if let Some(value) = self.cache.get(key) {
      match serde_json::from_value(value) {
        Ok(hit) => return Ok(hit),
        Err(e) => {
          warn!(%key, error = %e, "dropping unreadable cache entry");
          self.cache.remove(key);
        }
      }
    }

    let response = self.route(request).await?;
    let value = extract(response.json::<B>()?);
    if response.source == ResponseSource::Network {
      self.remember(key, &value, ttl);
    }
    Ok(value)
  }

  async fn get_or_create<B, T>(
    &self,
    key: &str,
    ttl: Duration,
    lookup: ApiRequest,
    create: ApiRequest,
    extract: impl Fn(B) -> T,
  ) -> Result<T, ApiError>
  where
    B: DeserializeOwned,
    T: Serialize + DeserializeOwned,
  {
    if let Some(hit) = self.cache.get(key).and_then(|v| serde_json::from_value(v).ok()) {
      return Ok(hit);
    }

    let response = match self.route(lookup).await {
      Ok(response) => response,
      Err(ApiError::Rejected { status: 404, .. }) => {
        info!(path = %create.path, "creating missing record");
        self.route(create).await?
      }
      Err(e) => return Err(e),
    };

    let value = extract(response.json::<B>()?);
    if response.source == ResponseSource::Network {
      self.remember(key, &value, ttl);
    }
    Ok(value)
  }

  async fn route(&self, request: ApiRequest) -> Result<HttpResponse, ApiError> {
    let routed = self.router.fetch(request).await;
    if let Some(revalidation) = routed.revalidation {
      let mut pending = self
        .revalidations
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
      pending.retain(|r| !r.is_finished());
      pending.push(revalidation);
    }
    ApiError::check(routed.response)
  }

  fn remember<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
    match serde_json::to_value(value) {
      Ok(value) => self.cache.set(key, value, ttl),
      Err(e) => warn!(%key, error = %e, "could not cache response"),
    }
  }

  fn invalidate(&self, invalidation: &Invalidation) {
    invalidation.apply(&self.cache, &self.router);
  }

  fn defer<T>(
    &self,
    pending_id: String,
    kind: WriteKind,
    payload: Value,
    cause: &ApiError,
    projection: T,
  ) -> WriteOutcome<T> {
    info!(%kind, error = %cause, "write deferred to background sync");
    self.enqueue(pending_id, kind, payload, cause.is_offline(), projection)
  }

  fn enqueue<T>(
    &self,
    pending_id: String,
    kind: WriteKind,
    payload: Value,
    offline: bool,
    projection: T,
  ) -> WriteOutcome<T> {
    match self.queue.enqueue_with_id(pending_id, kind, payload, offline) {
      Ok(write) => WriteOutcome::Queued {
        pending_id: write.id,
        projection,
      },
      Err(e) => {
        warn!(%kind, error = %e, "could not queue write, it is lost");
        WriteOutcome::Dropped { projection }
      }
    }
  }
}

fn ensure_synced(comment_id: &str) -> Result<(), ApiError> {
  if comment_id.starts_with(TENTATIVE_ID_PREFIX) {
    return Err(ApiError::NotSynced(comment_id.to_string()));
  }
  Ok(())
}
