//! Persistence collaborator contracts and in-memory implementations.
//!
//! Durable storage of flow definitions and chat transcripts lives outside
//! the core; these traits are the seam. The in-memory implementations back
//! the test suite and the standalone server binary.

use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::ChatMessage;

/// Publication state of a durable flow definition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishedStatus {
    Draft,
    Online,
    Offline,
}

/// A durable flow definition as read from storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRead {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Serialized graph description, assumed already production-compiled.
    pub definition_data: String,
    pub published_status: PublishedStatus,
}

/// Explicit lookup result; "not found" is a value, not an exception.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlowLookup {
    Found(FlowRead),
    NotFound,
}

/// Filter for transcript queries and deletions.
#[derive(Clone, Debug, Default)]
pub struct MessageFilter {
    pub flow_id: Option<String>,
    pub chat_id: Option<String>,
    pub user_id: Option<i64>,
    /// Page backwards: only messages with `id` strictly below this.
    pub before_id: Option<i64>,
    pub limit: Option<usize>,
}

/// One distinct (flow, chat) conversation with its activity bounds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub flow_id: String,
    pub chat_id: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

#[derive(Debug, Error, Diagnostic)]
pub enum PersistenceError {
    #[error("persistence backend error: {0}")]
    #[diagnostic(code(flowchat::persistence::backend))]
    Backend(String),

    #[error("message not found: {id}")]
    #[diagnostic(code(flowchat::persistence::message_not_found))]
    MessageNotFound { id: i64 },
}

/// Read access to durable flow definitions.
#[async_trait]
pub trait FlowStore: Send + Sync {
    async fn get_flow_by_id(&self, flow_id: &str) -> Result<FlowLookup, PersistenceError>;
}

/// Append/query log of chat transcripts. The core writes through; it never
/// caches these as truth.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append one record; the returned copy carries the assigned id.
    async fn append_message(&self, message: ChatMessage) -> Result<ChatMessage, PersistenceError>;

    /// Matching records, newest id first.
    async fn query_messages(
        &self,
        filter: MessageFilter,
    ) -> Result<Vec<ChatMessage>, PersistenceError>;

    /// Delete matching records; returns how many went away.
    async fn delete_messages(&self, filter: MessageFilter) -> Result<u64, PersistenceError>;

    /// Distinct (flow, chat) conversations for a user, newest activity
    /// first.
    async fn list_conversations(
        &self,
        user_id: i64,
    ) -> Result<Vec<ConversationSummary>, PersistenceError>;

    /// Set the liked flag on one of the user's own messages.
    async fn set_liked(
        &self,
        message_id: i64,
        user_id: i64,
        liked: bool,
    ) -> Result<(), PersistenceError>;

    /// Attach a comment to a message.
    async fn set_comment(
        &self,
        message_id: i64,
        comment: String,
    ) -> Result<(), PersistenceError>;
}

/// Volatile flow store for tests and the standalone binary.
#[derive(Default)]
pub struct InMemoryFlowStore {
    flows: Mutex<FxHashMap<String, FlowRead>>,
}

impl InMemoryFlowStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, flow: FlowRead) {
        let mut flows = self.flows.lock().expect("flow map poisoned");
        flows.insert(flow.id.clone(), flow);
    }
}

#[async_trait]
impl FlowStore for InMemoryFlowStore {
    async fn get_flow_by_id(&self, flow_id: &str) -> Result<FlowLookup, PersistenceError> {
        let flows = self.flows.lock().expect("flow map poisoned");
        Ok(match flows.get(flow_id) {
            Some(flow) => FlowLookup::Found(flow.clone()),
            None => FlowLookup::NotFound,
        })
    }
}

/// Volatile transcript store with auto-incrementing ids.
#[derive(Default)]
pub struct InMemoryMessageStore {
    messages: Mutex<Vec<ChatMessage>>,
    next_id: AtomicI64,
}

impl InMemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

fn matches(message: &ChatMessage, filter: &MessageFilter) -> bool {
    if let Some(flow_id) = &filter.flow_id
        && &message.flow_id != flow_id
    {
        return false;
    }
    if let Some(chat_id) = &filter.chat_id
        && &message.chat_id != chat_id
    {
        return false;
    }
    if let Some(user_id) = filter.user_id
        && message.user_id != user_id
    {
        return false;
    }
    if let Some(before_id) = filter.before_id
        && message.id >= before_id
    {
        return false;
    }
    true
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append_message(
        &self,
        mut message: ChatMessage,
    ) -> Result<ChatMessage, PersistenceError> {
        message.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut messages = self.messages.lock().expect("message log poisoned");
        messages.push(message.clone());
        Ok(message)
    }

    async fn query_messages(
        &self,
        filter: MessageFilter,
    ) -> Result<Vec<ChatMessage>, PersistenceError> {
        let messages = self.messages.lock().expect("message log poisoned");
        let mut hits: Vec<ChatMessage> = messages
            .iter()
            .filter(|message| matches(message, &filter))
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.id.cmp(&a.id));
        if let Some(limit) = filter.limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }

    async fn delete_messages(&self, filter: MessageFilter) -> Result<u64, PersistenceError> {
        let mut messages = self.messages.lock().expect("message log poisoned");
        let before = messages.len();
        messages.retain(|message| !matches(message, &filter));
        Ok((before - messages.len()) as u64)
    }

    async fn list_conversations(
        &self,
        user_id: i64,
    ) -> Result<Vec<ConversationSummary>, PersistenceError> {
        let messages = self.messages.lock().expect("message log poisoned");
        let mut grouped: FxHashMap<(String, String), ConversationSummary> = FxHashMap::default();
        for message in messages.iter().filter(|m| m.user_id == user_id) {
            let key = (message.flow_id.clone(), message.chat_id.clone());
            grouped
                .entry(key)
                .and_modify(|summary| {
                    summary.create_time = summary.create_time.max(message.create_time);
                    summary.update_time = summary.update_time.max(message.update_time);
                })
                .or_insert_with(|| ConversationSummary {
                    flow_id: message.flow_id.clone(),
                    chat_id: message.chat_id.clone(),
                    create_time: message.create_time,
                    update_time: message.update_time,
                });
        }
        let mut summaries: Vec<ConversationSummary> = grouped.into_values().collect();
        summaries.sort_by(|a, b| b.create_time.cmp(&a.create_time));
        Ok(summaries)
    }

    async fn set_liked(
        &self,
        message_id: i64,
        user_id: i64,
        liked: bool,
    ) -> Result<(), PersistenceError> {
        let mut messages = self.messages.lock().expect("message log poisoned");
        let message = messages
            .iter_mut()
            .find(|m| m.id == message_id && m.user_id == user_id)
            .ok_or(PersistenceError::MessageNotFound { id: message_id })?;
        message.liked = liked;
        message.update_time = Utc::now();
        Ok(())
    }

    async fn set_comment(
        &self,
        message_id: i64,
        comment: String,
    ) -> Result<(), PersistenceError> {
        let mut messages = self.messages.lock().expect("message log poisoned");
        let message = messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or(PersistenceError::MessageNotFound { id: message_id })?;
        message.comment = Some(comment);
        message.update_time = Utc::now();
        Ok(())
    }
}
