//! Domain event catalog.
//!
//! Topic and event-type constants shared by producing and consuming
//! services, the payload shapes that travel under each type, and
//! [`DomainEvents`], a thin typed front over [`EventPublisher::publish`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::{BusError, EventDraft, MessageId, PublishOptions};
use crate::ports::EventPublisher;

/// Topic names.
pub mod topics {
    pub const INTERACTION_EVENTS: &str = "interaction-events";
    pub const USER_EVENTS: &str = "user-events";
    pub const CONTENT_EVENTS: &str = "content-events";
}

/// Event type names.
pub mod event_types {
    pub const POST_LIKED: &str = "post.liked";
    pub const POST_UNLIKED: &str = "post.unliked";
    pub const COMMENT_CREATED: &str = "comment.created";
    pub const USER_FOLLOWED: &str = "user.followed";
    pub const USER_REGISTERED: &str = "user.registered";
    pub const POST_CREATED: &str = "post.created";
    pub const POST_DELETED: &str = "post.deleted";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostLiked {
    pub post_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostUnliked {
    pub post_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentCreated {
    pub comment_id: String,
    pub post_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFollowed {
    pub follower_id: String,
    pub following_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRegistered {
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCreated {
    pub post_id: String,
    pub author_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDeleted {
    pub post_id: String,
    pub author_id: String,
}

/// Typed publishing helpers. Each method fixes a topic and an event type
/// and forwards to the underlying publisher.
pub struct DomainEvents<P: EventPublisher + ?Sized> {
    publisher: Arc<P>,
}

impl<P: EventPublisher + ?Sized> Clone for DomainEvents<P> {
    fn clone(&self) -> Self {
        Self {
            publisher: self.publisher.clone(),
        }
    }
}

impl<P: EventPublisher + ?Sized> DomainEvents<P> {
    pub fn new(publisher: Arc<P>) -> Self {
        Self { publisher }
    }

    async fn emit<T: Serialize>(
        &self,
        topic: &str,
        event_type: &str,
        payload: &T,
    ) -> Result<MessageId, BusError> {
        let draft = EventDraft::from_payload(event_type, payload)
            .map_err(|e| BusError::Serialization(e.to_string()))?;
        self.publisher
            .publish(topic, draft, PublishOptions::default())
            .await
    }

    pub async fn post_liked(&self, payload: &PostLiked) -> Result<MessageId, BusError> {
        self.emit(topics::INTERACTION_EVENTS, event_types::POST_LIKED, payload)
            .await
    }

    pub async fn post_unliked(&self, payload: &PostUnliked) -> Result<MessageId, BusError> {
        self.emit(topics::INTERACTION_EVENTS, event_types::POST_UNLIKED, payload)
            .await
    }

    pub async fn comment_created(&self, payload: &CommentCreated) -> Result<MessageId, BusError> {
        self.emit(topics::INTERACTION_EVENTS, event_types::COMMENT_CREATED, payload)
            .await
    }

    pub async fn user_followed(&self, payload: &UserFollowed) -> Result<MessageId, BusError> {
        self.emit(topics::INTERACTION_EVENTS, event_types::USER_FOLLOWED, payload)
            .await
    }

    pub async fn user_registered(&self, payload: &UserRegistered) -> Result<MessageId, BusError> {
        self.emit(topics::USER_EVENTS, event_types::USER_REGISTERED, payload)
            .await
    }

    pub async fn post_created(&self, payload: &PostCreated) -> Result<MessageId, BusError> {
        self.emit(topics::CONTENT_EVENTS, event_types::POST_CREATED, payload)
            .await
    }

    pub async fn post_deleted(&self, payload: &PostDeleted) -> Result<MessageId, BusError> {
        self.emit(topics::CONTENT_EVENTS, event_types::POST_DELETED, payload)
            .await
    }
}
