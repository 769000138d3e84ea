//! Data access over the remote comment API.

pub mod endpoints;
mod facade;
pub mod types;

pub use facade::{DataAccess, WriteOutcome};
pub use types::{
  Comment, Health, NewComment, ReactionRequest, ReactionType, Topic, TopicInfo, User, UserProfile,
};
